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

//! Listen source: DMX values bridged over OSC.
//!
//! Two message shapes are understood:
//!
//! * `/dmx/<universe>/<channel>` with a single int (0-255) or float (0.0-1.0).
//! * `/dmx/<universe>` with a blob of up to 512 channel values, channel 1 first.
//!
//! Only channel values that changed since they were last seen produce updates.

use std::{
    fmt, io,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
};

use rosc::{OscMessage, OscPacket, OscType};
use tokio::{net::UdpSocket, select, sync::mpsc::Sender, task::JoinHandle};
use tracing::{debug, error, info, span, Instrument, Level};

use super::{DmxUpdate, FrameTracker, UNIVERSE_SIZE};

const ADDRESS_PREFIX: &str = "dmx";

/// A source listening for OSC DMX messages on a UDP port.
pub struct Listener {
    addr: SocketAddr,
}

impl Listener {
    pub fn new(port: u16) -> Listener {
        Listener {
            addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)),
        }
    }

    pub fn with_addr(addr: SocketAddr) -> Listener {
        Listener { addr }
    }
}

impl fmt::Display for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listen (OSC on {})", self.addr)
    }
}

impl super::Source for Listener {
    fn monitor_updates(&self, updates_tx: Sender<DmxUpdate>) -> JoinHandle<Result<(), io::Error>> {
        let addr = self.addr;

        tokio::spawn(
            async move {
                let socket = UdpSocket::bind(addr).await?;
                info!(addr = %socket.local_addr()?, "OSC listener started.");

                let mut buf = [0u8; rosc::decoder::MTU];
                let mut tracker = FrameTracker::default();
                loop {
                    select! {
                        _ = updates_tx.closed() => {
                            info!("OSC listener stopped.");
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
                            let packet = match rosc::decoder::decode_udp(&buf[..size]) {
                                Ok((_, packet)) => packet,
                                Err(e) => {
                                    debug!(err = e.to_string(), "Error decoding OSC message");
                                    continue;
                                }
                            };
                            for update in translate(&packet, &mut tracker) {
                                if updates_tx.send(update).await.is_err() {
                                    return Ok(());
                                }
                            }
                        }
                    }
                }
            }
            .instrument(span!(Level::INFO, "OSC listener")),
        )
    }
}

/// Converts an OSC packet into DMX updates. Bundles are unpacked recursively and
/// anything that isn't a DMX message is ignored.
pub fn translate(packet: &OscPacket, tracker: &mut FrameTracker) -> Vec<DmxUpdate> {
    match packet {
        OscPacket::Message(msg) => translate_message(msg, tracker),
        OscPacket::Bundle(bundle) => bundle
            .content
            .iter()
            .flat_map(|packet| translate(packet, tracker))
            .collect(),
    }
}

fn translate_message(msg: &OscMessage, tracker: &mut FrameTracker) -> Vec<DmxUpdate> {
    let mut parts = msg.addr.split('/').skip(1);
    if parts.next() != Some(ADDRESS_PREFIX) {
        return Vec::new();
    }
    let Some(universe) = parts.next().and_then(|part| part.parse::<u16>().ok()) else {
        debug!(addr = msg.addr, "Missing DMX universe");
        return Vec::new();
    };

    match (parts.next(), parts.next(), msg.args.as_slice()) {
        (None, _, [OscType::Blob(values)]) => tracker.diff(universe, values),
        (Some(channel), None, [arg]) => {
            let channel = match channel.parse::<u16>() {
                Ok(channel) if (1..=UNIVERSE_SIZE).contains(&channel) => channel,
                _ => {
                    debug!(addr = msg.addr, "Invalid DMX channel");
                    return Vec::new();
                }
            };
            match value_of(arg) {
                Some(value) => tracker.change(universe, channel, value).into_iter().collect(),
                None => {
                    debug!(addr = msg.addr, "Unsupported DMX value argument");
                    Vec::new()
                }
            }
        }
        _ => {
            debug!(addr = msg.addr, "Malformed DMX message");
            Vec::new()
        }
    }
}

fn value_of(arg: &OscType) -> Option<u8> {
    match arg {
        OscType::Int(value) => Some((*value).clamp(0, 255) as u8),
        OscType::Long(value) => Some((*value).clamp(0, 255) as u8),
        OscType::Float(value) if value.is_finite() => {
            Some((value.clamp(0.0, 1.0) * 255.0).round() as u8)
        }
        OscType::Double(value) if value.is_finite() => {
            Some((value.clamp(0.0, 1.0) * 255.0).round() as u8)
        }
        _ => None,
    }
}
