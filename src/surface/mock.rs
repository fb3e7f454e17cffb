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
use std::{
    collections::{HashMap, HashSet},
    fmt,
};

use parking_lot::Mutex;
use tracing::info;

use crate::{
    media::MediaRef,
    output::{Look, OutputId},
};

use super::{Display, Placement, Position, SurfaceError};

/// A surface call as seen by the mock.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Open { id: OutputId, placement: Placement },
    Load {
        id: OutputId,
        media: Option<String>,
        look: Look,
    },
    Adjust { id: OutputId, look: Look },
    Move { id: OutputId, position: Position },
    Close { id: OutputId },
}

impl Call {
    pub fn id(&self) -> OutputId {
        match self {
            Call::Open { id, .. }
            | Call::Load { id, .. }
            | Call::Adjust { id, .. }
            | Call::Move { id, .. }
            | Call::Close { id } => *id,
        }
    }
}

/// A mock surface. Doesn't render anything, but records every call.
pub struct Surface {
    name: String,
    displays: Vec<Display>,
    calls: Mutex<Vec<Call>>,
    open: Mutex<HashMap<OutputId, Placement>>,
    failing_displays: Mutex<HashSet<String>>,
}

impl Surface {
    pub fn new(name: &str, displays: Vec<Display>) -> Surface {
        Surface {
            name: name.to_string(),
            displays,
            calls: Mutex::new(Vec::new()),
            open: Mutex::new(HashMap::new()),
            failing_displays: Mutex::new(HashSet::new()),
        }
    }

    /// Makes every open on the named display fail.
    pub fn fail_open_on(&self, display: &str) {
        self.failing_displays.lock().insert(display.to_string());
    }

    /// Every successful call so far.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Every successful call for the output so far.
    pub fn calls_for(&self, id: OutputId) -> Vec<Call> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.id() == id)
            .cloned()
            .collect()
    }

    pub fn loads(&self, id: OutputId) -> usize {
        self.calls_for(id)
            .iter()
            .filter(|call| matches!(call, Call::Load { .. }))
            .count()
    }

    pub fn adjusts(&self, id: OutputId) -> usize {
        self.calls_for(id)
            .iter()
            .filter(|call| matches!(call, Call::Adjust { .. }))
            .count()
    }

    pub fn is_open(&self, id: OutputId) -> bool {
        self.open.lock().contains_key(&id)
    }

    /// The most recent load or adjust for the output, as (media, look).
    pub fn showing(&self, id: OutputId) -> Option<(Option<String>, Look)> {
        if !self.is_open(id) {
            return None;
        }
        let calls = self.calls_for(id);
        let mut media = None;
        let mut look = None;
        for call in calls.iter() {
            match call {
                Call::Open { .. } => {
                    media = None;
                    look = None;
                }
                Call::Load {
                    media: loaded,
                    look: loaded_look,
                    ..
                } => {
                    media = loaded.clone();
                    look = Some(*loaded_look);
                }
                Call::Adjust {
                    look: adjusted, ..
                } => look = Some(*adjusted),
                _ => {}
            }
        }
        look.map(|look| (media, look))
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    fn require_open(&self, id: OutputId) -> Result<(), SurfaceError> {
        if self.is_open(id) {
            Ok(())
        } else {
            Err(SurfaceError::NotOpen(id))
        }
    }
}

impl super::Surface for Surface {
    fn displays(&self) -> Result<Vec<Display>, SurfaceError> {
        Ok(self.displays.clone())
    }

    fn open(&self, id: OutputId, placement: &Placement) -> Result<(), SurfaceError> {
        if self.failing_displays.lock().contains(&placement.display) {
            return Err(SurfaceError::DisplayUnavailable(placement.display.clone()));
        }
        info!(surface = self.name, output = %id, display = placement.display, "Opening surface (mock).");
        self.open.lock().insert(id, placement.clone());
        self.record(Call::Open {
            id,
            placement: placement.clone(),
        });
        Ok(())
    }

    fn load(
        &self,
        id: OutputId,
        media: Option<&MediaRef>,
        look: &Look,
    ) -> Result<(), SurfaceError> {
        self.require_open(id)?;
        self.record(Call::Load {
            id,
            media: media.map(|media| media.filename().to_string()),
            look: *look,
        });
        Ok(())
    }

    fn adjust(&self, id: OutputId, look: &Look) -> Result<(), SurfaceError> {
        self.require_open(id)?;
        self.record(Call::Adjust { id, look: *look });
        Ok(())
    }

    fn move_to(&self, id: OutputId, position: Position) -> Result<(), SurfaceError> {
        self.require_open(id)?;
        if let Some(placement) = self.open.lock().get_mut(&id) {
            placement.position = position;
        }
        self.record(Call::Move { id, position });
        Ok(())
    }

    fn close(&self, id: OutputId) -> Result<(), SurfaceError> {
        self.require_open(id)?;
        info!(surface = self.name, output = %id, "Closing surface (mock).");
        self.open.lock().remove(&id);
        self.record(Call::Close { id });
        Ok(())
    }
}

impl fmt::Display for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}
