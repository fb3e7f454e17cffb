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
use std::{path::Path, time::Duration};

use config::{Config, File};
use duration_string::DurationString;
use serde::Deserialize;

use crate::{
    coalesce::DEFAULT_WINDOW,
    dmx::sacn::{MAX_UNIVERSE, MIN_UNIVERSE, SACN_PORT},
    output::{BlackoutPolicy, ModeEncoding, Policy},
    router::Mode,
};

use super::{error::ConfigError, output::Output, surface::Surface, MAX_OUTPUTS};

pub const DEFAULT_UNIVERSE: u16 = 1;
pub const DEFAULT_OSC_PORT: u16 = 7770;

/// Where the outputs are shown.
#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Each output fills its own display.
    #[default]
    Production,
    /// Every output is shown at half size on the primary display.
    Preview,
}

/// How preview surfaces are arranged on the primary display.
#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PreviewLayout {
    #[default]
    SideBySide,
    Stacked,
}

/// The network protocol the listen source speaks.
#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// E1.31 straight from a lighting console.
    #[default]
    Sacn,
    /// DMX values bridged over OSC.
    Osc,
}

/// A YAML representation of the listen source.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Listen {
    /// The protocol (default: sacn).
    protocol: Option<Protocol>,

    /// The UDP port (default: 5568 for sACN, 7770 for OSC).
    port: Option<u16>,
}

impl Listen {
    pub fn new(protocol: Protocol, port: Option<u16>) -> Listen {
        Listen {
            protocol: Some(protocol),
            port,
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol.unwrap_or_default()
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(match self.protocol() {
            Protocol::Sacn => SACN_PORT,
            Protocol::Osc => DEFAULT_OSC_PORT,
        })
    }
}

/// The configuration for the DMX media player.
#[derive(Deserialize, Clone, Debug)]
pub struct Player {
    /// The DMX universe the outputs are patched in (default: 1).
    universe: Option<u16>,

    /// The source bound at start up (default: test).
    source: Option<Mode>,

    /// Production or preview (default: production).
    stage: Option<Stage>,

    /// The preview arrangement (default: side-by-side).
    preview_layout: Option<PreviewLayout>,

    /// How long updates for an output are gathered before they're committed (default: 25ms).
    coalesce_window: Option<String>,

    /// How the mode channel is read (default: two-band).
    mode_encoding: Option<ModeEncoding>,

    /// What happens to playback while the dimmer is at zero (default: keep-playing).
    blackout: Option<BlackoutPolicy>,

    /// The listen source configuration.
    listen: Option<Listen>,

    /// The surface configuration.
    surface: Option<Surface>,

    /// The outputs, at most two.
    #[serde(default)]
    outputs: Vec<Output>,
}

impl Player {
    /// New will create a new player configuration.
    pub fn new(outputs: Vec<Output>, surface: Surface) -> Player {
        Player {
            universe: None,
            source: None,
            stage: None,
            preview_layout: None,
            coalesce_window: None,
            mode_encoding: None,
            blackout: None,
            listen: None,
            surface: Some(surface),
            outputs,
        }
    }

    /// Parse and validate a player configuration from a YAML file.
    pub fn deserialize(path: &Path) -> Result<Player, ConfigError> {
        let player = Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize::<Player>()?;
        player.validate()?;
        Ok(player)
    }

    /// Checks the values serde can't.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_UNIVERSE..=MAX_UNIVERSE).contains(&self.universe()) {
            return Err(ConfigError::Universe(self.universe()));
        }
        if self.outputs.len() > MAX_OUTPUTS {
            return Err(ConfigError::TooManyOutputs(self.outputs.len()));
        }
        for (i, output) in self.outputs.iter().enumerate() {
            output.group().map_err(|source| ConfigError::Group {
                output: output.name(i),
                source,
            })?;
        }
        self.coalesce_window()?;
        Ok(())
    }

    pub fn universe(&self) -> u16 {
        self.universe.unwrap_or(DEFAULT_UNIVERSE)
    }

    pub fn source(&self) -> Mode {
        self.source.unwrap_or_default()
    }

    pub fn stage(&self) -> Stage {
        self.stage.unwrap_or_default()
    }

    pub fn preview_layout(&self) -> PreviewLayout {
        self.preview_layout.unwrap_or_default()
    }

    /// Returns the coalescing window.
    pub fn coalesce_window(&self) -> Result<Duration, ConfigError> {
        match &self.coalesce_window {
            Some(window) => Ok(DurationString::from_string(window.clone())?.into()),
            None => Ok(DEFAULT_WINDOW),
        }
    }

    /// Returns the mode channel and blackout interpretation.
    pub fn policy(&self) -> Policy {
        Policy {
            encoding: self.mode_encoding.unwrap_or_default(),
            blackout: self.blackout.unwrap_or_default(),
        }
    }

    pub fn listen(&self) -> Listen {
        self.listen.clone().unwrap_or_default()
    }

    pub fn surface(&self) -> Surface {
        self.surface.clone().unwrap_or_default()
    }

    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    pub fn with_stage(mut self, stage: Stage, layout: PreviewLayout) -> Player {
        self.stage = Some(stage);
        self.preview_layout = Some(layout);
        self
    }
}
