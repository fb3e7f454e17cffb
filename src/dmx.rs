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
use std::{collections::HashMap, fmt, io, str::FromStr, sync::Arc, time::Instant};

use thiserror::Error;
use tokio::{sync::mpsc::Sender, task::JoinHandle};

use crate::{
    config::{self, Protocol},
    output::OutputId,
};

pub mod manual;
pub mod osc;
pub mod sacn;

/// The number of channels in a DMX universe.
pub const UNIVERSE_SIZE: u16 = 512;

/// A single channel value change as delivered by a DMX source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmxUpdate {
    pub universe: u16,
    pub channel: u16,
    pub value: u8,
}

impl DmxUpdate {
    pub fn new(universe: u16, channel: u16, value: u8) -> DmxUpdate {
        DmxUpdate {
            universe,
            channel,
            value,
        }
    }
}

/// A channel update accepted by the engine, stamped with its arrival time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawUpdate {
    pub channel: u16,
    pub value: u8,
    pub timestamp: Instant,
}

impl RawUpdate {
    pub fn now(channel: u16, value: u8) -> RawUpdate {
        RawUpdate {
            channel,
            value,
            timestamp: Instant::now(),
        }
    }
}

/// The logical signals carried by an output's channel group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// Chooses the media file.
    Select,
    /// Controls opacity.
    Dimmer,
    /// Controls end of media behavior.
    Mode,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Select => write!(f, "select"),
            Signal::Dimmer => write!(f, "dimmer"),
            Signal::Mode => write!(f, "mode"),
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum GroupError {
    #[error("start channel {0} is out of range, must be between 1 and {max}", max = ChannelGroup::MAX_START)]
    OutOfRange(u16),
}

/// The three consecutive channels that drive a single output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelGroup {
    start_channel: u16,
}

impl ChannelGroup {
    pub const SELECT_OFFSET: u16 = 0;
    pub const DIMMER_OFFSET: u16 = 1;
    pub const MODE_OFFSET: u16 = 2;

    /// The highest start channel that still fits the whole group in a universe.
    pub const MAX_START: u16 = UNIVERSE_SIZE - Self::MODE_OFFSET;

    pub fn new(start_channel: u16) -> Result<ChannelGroup, GroupError> {
        if !(1..=Self::MAX_START).contains(&start_channel) {
            return Err(GroupError::OutOfRange(start_channel));
        }
        Ok(ChannelGroup { start_channel })
    }

    pub fn start_channel(&self) -> u16 {
        self.start_channel
    }

    pub fn select_channel(&self) -> u16 {
        self.start_channel + Self::SELECT_OFFSET
    }

    pub fn dimmer_channel(&self) -> u16 {
        self.start_channel + Self::DIMMER_OFFSET
    }

    pub fn mode_channel(&self) -> u16 {
        self.start_channel + Self::MODE_OFFSET
    }

    /// The signal carried by the given channel, if it belongs to this group.
    pub fn signal_for(&self, channel: u16) -> Option<Signal> {
        match channel.checked_sub(self.start_channel)? {
            Self::SELECT_OFFSET => Some(Signal::Select),
            Self::DIMMER_OFFSET => Some(Signal::Dimmer),
            Self::MODE_OFFSET => Some(Signal::Mode),
            _ => None,
        }
    }

    /// Whether the two groups share any channel.
    pub fn overlaps(&self, other: &ChannelGroup) -> bool {
        self.start_channel <= other.mode_channel() && other.start_channel <= self.mode_channel()
    }
}

impl fmt::Display for ChannelGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "channels {}-{}",
            self.select_channel(),
            self.mode_channel()
        )
    }
}

/// Maps each channel of the universe to the output signal it drives.
#[derive(Debug, Clone)]
pub struct Routes {
    by_channel: Vec<Option<(OutputId, Signal)>>,
}

impl Default for Routes {
    fn default() -> Self {
        Routes {
            by_channel: vec![None; usize::from(UNIVERSE_SIZE) + 1],
        }
    }
}

impl Routes {
    /// Builds the routing table. Returns the conflicting pair if two groups overlap.
    pub fn build<'a, I>(groups: I) -> Result<Routes, (OutputId, OutputId)>
    where
        I: IntoIterator<Item = (OutputId, &'a ChannelGroup)>,
    {
        let mut routes = Routes::default();
        for (id, group) in groups {
            for channel in group.select_channel()..=group.mode_channel() {
                let slot = &mut routes.by_channel[usize::from(channel)];
                if let Some((other, _)) = slot {
                    return Err((*other, id));
                }
                *slot = group.signal_for(channel).map(|signal| (id, signal));
            }
        }
        Ok(routes)
    }

    /// Looks up the output and signal for a channel. Channels outside every group
    /// return None.
    pub fn lookup(&self, channel: u16) -> Option<(OutputId, Signal)> {
        self.by_channel
            .get(usize::from(channel))
            .copied()
            .flatten()
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("expected 4 values (start channel, select, dimmer, mode), got {0}")]
    FieldCount(usize),
    #[error("invalid {field} value \"{value}\"")]
    Value { field: &'static str, value: String },
    #[error(transparent)]
    Group(#[from] GroupError),
}

/// An operator supplied set of values for one channel group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestValues {
    pub group: ChannelGroup,
    pub select: u8,
    pub dimmer: u8,
    pub mode: u8,
}

impl TestValues {
    /// The updates this tuple produces, in select, dimmer, mode order.
    pub fn to_updates(&self, universe: u16) -> [DmxUpdate; 3] {
        [
            DmxUpdate::new(universe, self.group.select_channel(), self.select),
            DmxUpdate::new(universe, self.group.dimmer_channel(), self.dimmer),
            DmxUpdate::new(universe, self.group.mode_channel(), self.mode),
        ]
    }
}

impl FromStr for TestValues {
    type Err = ParseError;

    /// Parses "start select dimmer mode", separated by whitespace or commas.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|field| !field.is_empty())
            .collect();
        if fields.len() != 4 {
            return Err(ParseError::FieldCount(fields.len()));
        }

        let start_channel = fields[0]
            .parse::<u16>()
            .map_err(|_| ParseError::Value {
                field: "start channel",
                value: fields[0].to_string(),
            })?;
        let value = |field: &'static str, raw: &str| {
            raw.parse::<u8>().map_err(|_| ParseError::Value {
                field,
                value: raw.to_string(),
            })
        };

        Ok(TestValues {
            group: ChannelGroup::new(start_channel)?,
            select: value("select", fields[1])?,
            dimmer: value("dimmer", fields[2])?,
            mode: value("mode", fields[3])?,
        })
    }
}

/// Remembers the last value seen on every channel of each universe, so that
/// sources which repeat whole frames only report changes. Channels start at zero.
#[derive(Debug, Default)]
pub struct FrameTracker {
    frames: HashMap<u16, Vec<u8>>,
}

impl FrameTracker {
    /// Records the frame, channel 1 first, and returns updates for the channels
    /// that changed. Channels past the end of a short frame are left alone.
    pub fn diff(&mut self, universe: u16, values: &[u8]) -> Vec<DmxUpdate> {
        let values = &values[..values.len().min(usize::from(UNIVERSE_SIZE))];
        let previous = self.frame(universe);

        let updates = values
            .iter()
            .zip(1..=UNIVERSE_SIZE)
            .filter(|&(&value, channel)| previous[usize::from(channel - 1)] != value)
            .map(|(&value, channel)| DmxUpdate::new(universe, channel, value))
            .collect();

        previous[..values.len()].copy_from_slice(values);
        updates
    }

    /// Records a single channel value, returning an update if it changed.
    pub fn change(&mut self, universe: u16, channel: u16, value: u8) -> Option<DmxUpdate> {
        let index = usize::from(channel.checked_sub(1)?);
        let previous = self.frame(universe).get_mut(index)?;
        if *previous == value {
            return None;
        }
        *previous = value;
        Some(DmxUpdate::new(universe, channel, value))
    }

    fn frame(&mut self, universe: u16) -> &mut Vec<u8> {
        self.frames
            .entry(universe)
            .or_insert_with(|| vec![0; usize::from(UNIVERSE_SIZE)])
    }
}

/// Gets the network source described by the listen configuration.
pub fn get_listener(config: &config::Listen, universe: u16) -> Arc<dyn Source> {
    match config.protocol() {
        Protocol::Sacn => Arc::new(sacn::Receiver::new(universe, config.port())),
        Protocol::Osc => Arc::new(osc::Listener::new(config.port())),
    }
}

/// A source of DMX updates. Only one source is bound to the engine at a time.
pub trait Source: fmt::Display + Send + Sync + 'static {
    /// Starts delivering updates on the given channel. The task ends when the
    /// receiving side is dropped or the source fails.
    fn monitor_updates(&self, updates_tx: Sender<DmxUpdate>) -> JoinHandle<Result<(), io::Error>>;
}
