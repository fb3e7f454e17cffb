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
use std::path::PathBuf;

use serde::Deserialize;

use crate::{
    dmx::{ChannelGroup, GroupError},
    surface::{DisplayTarget, Orientation, Position, Size},
};

/// The sizes a resolution can be given as by name.
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Preset {
    #[serde(rename = "hd")]
    Hd,
    #[serde(rename = "4k")]
    FourK,
}

/// An output resolution, either a preset or an explicit size.
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(untagged)]
pub enum Resolution {
    Preset(Preset),
    Custom { width: u32, height: u32 },
}

impl Default for Resolution {
    fn default() -> Self {
        Resolution::Preset(Preset::Hd)
    }
}

impl Resolution {
    /// The landscape size of the resolution.
    pub fn size(&self) -> Size {
        match self {
            Resolution::Preset(Preset::Hd) => Size {
                width: 1920,
                height: 1080,
            },
            Resolution::Preset(Preset::FourK) => Size {
                width: 3840,
                height: 2160,
            },
            Resolution::Custom { width, height } => Size {
                width: *width,
                height: *height,
            },
        }
    }
}

/// A YAML representation of a single output.
#[derive(Deserialize, Clone, Debug)]
pub struct Output {
    /// A name for logs and reports (default: "Output <n>").
    name: Option<String>,

    /// Whether the output plays at all (default: true).
    enabled: Option<bool>,

    /// The first of the output's three channels.
    start_channel: u16,

    /// The folder holding the output's numbered media.
    media_folder: String,

    /// The display to show the output on, 1 being the primary display (default: 1).
    display: Option<usize>,

    /// The surface resolution (default: hd).
    resolution: Option<Resolution>,

    /// Vertical swaps the resolution's width and height (default: horizontal).
    orientation: Option<Orientation>,

    /// A saved window position. Without one the surface opens at the display's top left.
    position: Option<Position>,
}

impl Output {
    /// New will create a new output configuration.
    pub fn new(start_channel: u16, media_folder: &str) -> Output {
        Output {
            name: None,
            enabled: None,
            start_channel,
            media_folder: media_folder.to_string(),
            display: None,
            resolution: None,
            orientation: None,
            position: None,
        }
    }

    /// Returns the configured name, or a name based on the output's position.
    pub fn name(&self, index: usize) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("Output {}", index + 1))
    }

    pub fn enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn start_channel(&self) -> u16 {
        self.start_channel
    }

    /// Returns the output's channel group.
    pub fn group(&self) -> Result<ChannelGroup, GroupError> {
        ChannelGroup::new(self.start_channel)
    }

    pub fn media_folder(&self) -> PathBuf {
        PathBuf::from(&self.media_folder)
    }

    /// Returns the zero based display target.
    pub fn display(&self) -> DisplayTarget {
        DisplayTarget(self.display.unwrap_or(1).saturating_sub(1))
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation.unwrap_or_default()
    }

    /// Returns the surface size with the orientation applied.
    pub fn size(&self) -> Size {
        let size = self.resolution.unwrap_or_default().size();
        match self.orientation() {
            Orientation::Horizontal => size,
            Orientation::Vertical => Size {
                width: size.height,
                height: size.width,
            },
        }
    }

    pub fn position(&self) -> Option<Position> {
        self.position
    }

    pub fn with_name(mut self, name: &str) -> Output {
        self.name = Some(name.to_string());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Output {
        self.enabled = Some(enabled);
        self
    }

    pub fn with_display(mut self, display: usize) -> Output {
        self.display = Some(display);
        self
    }

    pub fn with_position(mut self, position: Position) -> Output {
        self.position = Some(position);
        self
    }
}
