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
use std::path::Path;

use serde::Deserialize;

use crate::surface::Display;

/// Which surface adapter renders the outputs.
#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SurfaceKind {
    /// Commands are written as JSON lines for an external renderer.
    #[default]
    Jsonl,
    /// Nothing is rendered. Useful for dry runs.
    Mock,
}

/// A YAML representation of the surface configuration.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Surface {
    /// The adapter (default: jsonl).
    kind: Option<SurfaceKind>,

    /// Where the jsonl adapter writes (default: standard output).
    path: Option<String>,

    /// The displays available to the adapter, primary first.
    displays: Option<Vec<Display>>,
}

impl Surface {
    pub fn new(kind: SurfaceKind, displays: Vec<Display>) -> Surface {
        Surface {
            kind: Some(kind),
            path: None,
            displays: Some(displays),
        }
    }

    pub fn with_path(mut self, path: &Path) -> Surface {
        self.path = Some(path.to_string_lossy().into_owned());
        self
    }

    pub fn kind(&self) -> SurfaceKind {
        self.kind.unwrap_or_default()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref().map(Path::new)
    }

    /// Returns the configured displays, or a single default primary display.
    pub fn displays(&self) -> Vec<Display> {
        match &self.displays {
            Some(displays) if !displays.is_empty() => displays.clone(),
            _ => vec![Display::fallback()],
        }
    }
}
