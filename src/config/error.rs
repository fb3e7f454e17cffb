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
use crate::dmx::GroupError;

/// Typed error for config load/parse failures so callers can distinguish
/// e.g. file-not-found from invalid values without string matching.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config load/parse error: {0}")]
    Load(#[from] config::ConfigError),
    #[error("Invalid duration: {0}")]
    Duration(#[from] duration_string::Error),
    #[error("Universe {0} is out of range, must be between 1 and 63999")]
    Universe(u16),
    #[error("At most {max} outputs can be configured, found {0}", max = super::MAX_OUTPUTS)]
    TooManyOutputs(usize),
    #[error("Output {output}: {source}")]
    Group { output: String, source: GroupError },
}
