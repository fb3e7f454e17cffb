// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Listen source: E1.31 (sACN) data packets for a single universe.
//!
//! The receiver joins the universe's multicast group and also accepts unicast
//! packets on the same port. Preview data, alternate start codes and packets
//! that arrive out of sequence are dropped, and only channels whose value
//! changed produce updates.

use std::{
    collections::HashMap,
    fmt, io,
    net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4},
};

use thiserror::Error;
use tokio::{net::UdpSocket, select, sync::mpsc::Sender, task::JoinHandle};
use tracing::{debug, error, info, span, warn, Instrument, Level};

use super::{DmxUpdate, FrameTracker};

/// The port E1.31 traffic is sent to.
pub const SACN_PORT: u16 = 5568;

/// The universes E1.31 can address.
pub const MIN_UNIVERSE: u16 = 1;
pub const MAX_UNIVERSE: u16 = 63999;

const ACN_PACKET_IDENTIFIER: [u8; 12] = *b"ASC-E1.17\0\0\0";
const VECTOR_ROOT_E131_DATA: u32 = 0x0000_0004;
const VECTOR_E131_DATA_PACKET: u32 = 0x0000_0002;
const VECTOR_DMP_SET_PROPERTY: u8 = 0x02;
const DMP_ADDRESS_DATA_TYPE: u8 = 0xa1;
const DMX_START_CODE: u8 = 0x00;

const OPTION_PREVIEW: u8 = 0x80;
const OPTION_STREAM_TERMINATED: u8 = 0x40;

const CID_OFFSET: usize = 22;
const PRIORITY_OFFSET: usize = 108;
const SEQUENCE_OFFSET: usize = 111;
const OPTIONS_OFFSET: usize = 112;
const UNIVERSE_OFFSET: usize = 113;
const DMP_VECTOR_OFFSET: usize = 117;
const PROPERTY_COUNT_OFFSET: usize = 123;
const START_CODE_OFFSET: usize = 125;

/// Big enough for a full 512 channel data packet.
const MAX_PACKET_SIZE: usize = 638;

/// Packets within this many sequence numbers behind the last one are stale.
const SEQUENCE_WINDOW: i8 = -20;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PacketError {
    #[error("packet is too short ({0} bytes)")]
    Truncated(usize),
    #[error("not an ACN packet")]
    NotAcn,
    #[error("unsupported root vector {0:#x}")]
    RootVector(u32),
    #[error("unsupported framing vector {0:#x}")]
    FramingVector(u32),
    #[error("malformed DMP layer")]
    Dmp,
}

/// The parts of an E1.31 data packet the receiver cares about.
#[derive(Debug, PartialEq, Eq)]
pub struct DataPacket<'a> {
    pub cid: [u8; 16],
    pub universe: u16,
    pub priority: u8,
    pub sequence: u8,
    pub preview: bool,
    pub terminated: bool,
    pub start_code: u8,
    /// Channel values, channel 1 first.
    pub values: &'a [u8],
}

fn u16_at(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buf[offset], buf[offset + 1]])
}

fn u32_at(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

/// Parses an E1.31 data packet.
pub fn parse(buf: &[u8]) -> Result<DataPacket<'_>, PacketError> {
    if buf.len() < 22 {
        return Err(PacketError::Truncated(buf.len()));
    }
    if buf[4..16] != ACN_PACKET_IDENTIFIER {
        return Err(PacketError::NotAcn);
    }
    let root_vector = u32_at(buf, 18);
    if root_vector != VECTOR_ROOT_E131_DATA {
        return Err(PacketError::RootVector(root_vector));
    }
    if buf.len() <= START_CODE_OFFSET {
        return Err(PacketError::Truncated(buf.len()));
    }
    let framing_vector = u32_at(buf, 40);
    if framing_vector != VECTOR_E131_DATA_PACKET {
        return Err(PacketError::FramingVector(framing_vector));
    }
    if buf[DMP_VECTOR_OFFSET] != VECTOR_DMP_SET_PROPERTY
        || buf[DMP_VECTOR_OFFSET + 1] != DMP_ADDRESS_DATA_TYPE
    {
        return Err(PacketError::Dmp);
    }

    // The property count includes the start code.
    let count = usize::from(u16_at(buf, PROPERTY_COUNT_OFFSET));
    let end = START_CODE_OFFSET + count;
    if count == 0 || buf.len() < end {
        return Err(PacketError::Dmp);
    }

    let mut cid = [0u8; 16];
    cid.copy_from_slice(&buf[CID_OFFSET..CID_OFFSET + 16]);
    let options = buf[OPTIONS_OFFSET];
    Ok(DataPacket {
        cid,
        universe: u16_at(buf, UNIVERSE_OFFSET),
        priority: buf[PRIORITY_OFFSET],
        sequence: buf[SEQUENCE_OFFSET],
        preview: options & OPTION_PREVIEW != 0,
        terminated: options & OPTION_STREAM_TERMINATED != 0,
        start_code: buf[START_CODE_OFFSET],
        values: &buf[START_CODE_OFFSET + 1..end],
    })
}

/// The multicast group a universe is sent to.
pub fn multicast_group(universe: u16) -> Ipv4Addr {
    let [high, low] = universe.to_be_bytes();
    Ipv4Addr::new(239, 255, high, low)
}

/// Tracks the last sequence number from each sender.
#[derive(Debug, Default)]
struct Sequences {
    last: HashMap<[u8; 16], u8>,
}

impl Sequences {
    /// Records the sequence number, returning false if the packet is stale.
    fn accept(&mut self, cid: [u8; 16], sequence: u8) -> bool {
        if let Some(last) = self.last.get(&cid) {
            let delta = sequence.wrapping_sub(*last) as i8;
            if delta <= 0 && delta > SEQUENCE_WINDOW {
                return false;
            }
        }
        self.last.insert(cid, sequence);
        true
    }

    fn forget(&mut self, cid: &[u8; 16]) {
        self.last.remove(cid);
    }
}

/// Filters data packets for one universe down to channel changes.
#[derive(Debug)]
struct Filter {
    universe: u16,
    sequences: Sequences,
    tracker: FrameTracker,
}

impl Filter {
    fn new(universe: u16) -> Filter {
        Filter {
            universe,
            sequences: Sequences::default(),
            tracker: FrameTracker::default(),
        }
    }

    fn updates(&mut self, packet: &DataPacket) -> Vec<DmxUpdate> {
        if packet.universe != self.universe || packet.preview {
            return Vec::new();
        }
        if !self.sequences.accept(packet.cid, packet.sequence) {
            debug!(sequence = packet.sequence, "Dropping out of sequence packet");
            return Vec::new();
        }
        if packet.terminated {
            // Outputs keep their last values.
            info!(universe = self.universe, "sACN sender terminated its stream.");
            self.sequences.forget(&packet.cid);
            return Vec::new();
        }
        if packet.start_code != DMX_START_CODE {
            return Vec::new();
        }
        self.tracker.diff(self.universe, packet.values)
    }
}

/// A source receiving E1.31 data for a single universe.
pub struct Receiver {
    universe: u16,
    addr: SocketAddr,
}

impl Receiver {
    pub fn new(universe: u16, port: u16) -> Receiver {
        Receiver {
            universe,
            addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)),
        }
    }

    pub fn with_addr(universe: u16, addr: SocketAddr) -> Receiver {
        Receiver { universe, addr }
    }
}

impl fmt::Display for Receiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listen (sACN universe {} on {})", self.universe, self.addr)
    }
}

impl super::Source for Receiver {
    fn monitor_updates(&self, updates_tx: Sender<DmxUpdate>) -> JoinHandle<Result<(), io::Error>> {
        let universe = self.universe;
        let addr = self.addr;

        tokio::spawn(
            async move {
                let socket = UdpSocket::bind(addr).await?;
                if addr.ip() == IpAddr::V4(Ipv4Addr::UNSPECIFIED) {
                    let group = multicast_group(universe);
                    if let Err(e) = socket.join_multicast_v4(group, Ipv4Addr::UNSPECIFIED) {
                        warn!(
                            group = %group,
                            err = e.to_string(),
                            "Unable to join multicast group, only unicast sACN will be received"
                        );
                    }
                }
                info!(addr = %socket.local_addr()?, universe, "sACN receiver started.");

                let mut buf = [0u8; MAX_PACKET_SIZE];
                let mut filter = Filter::new(universe);
                loop {
                    select! {
                        _ = updates_tx.closed() => {
                            info!("sACN receiver stopped.");
                            return Ok(());
                        }
                        result = socket.recv_from(&mut buf) => {
                            let size = match result {
                                Ok((size, _)) => size,
                                Err(e) => {
                                    error!(err = e.to_string(), "Error receiving UDP.");
                                    continue;
                                }
                            };
                            let packet = match parse(&buf[..size]) {
                                Ok(packet) => packet,
                                Err(e) => {
                                    debug!(err = e.to_string(), "Ignoring sACN packet");
                                    continue;
                                }
                            };
                            for update in filter.updates(&packet) {
                                if updates_tx.send(update).await.is_err() {
                                    return Ok(());
                                }
                            }
                        }
                    }
                }
            }
            .instrument(span!(Level::INFO, "sACN receiver")),
        )
    }
}
