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
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    coalesce::Pending,
    media::{Catalog, MediaRef},
};

/// Identifies an output by its position in the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputId(pub u8);

impl OutputId {
    pub fn index(&self) -> usize {
        usize::from(self.0)
    }
}

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "output-{}", u16::from(self.0) + 1)
    }
}

/// How the mode channel maps to end of media behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModeEncoding {
    /// Values below 128 loop, values from 128 play once and hold the last frame.
    #[default]
    TwoBand,
    /// 0 stops (no media), 1 plays once and holds, anything higher loops.
    ThreeValue,
}

impl ModeEncoding {
    pub fn decode(&self, mode: u8) -> EndBehavior {
        match self {
            ModeEncoding::TwoBand => {
                if mode < 128 {
                    EndBehavior::Loop
                } else {
                    EndBehavior::Hold
                }
            }
            ModeEncoding::ThreeValue => match mode {
                0 => EndBehavior::Stop,
                1 => EndBehavior::Hold,
                _ => EndBehavior::Loop,
            },
        }
    }
}

/// What a surface does when its media reaches the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EndBehavior {
    /// No media is shown at all.
    Stop,
    /// Restart from the beginning.
    Loop,
    /// Play once and hold the last frame.
    Hold,
}

/// What happens to playback while the dimmer is at zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlackoutPolicy {
    /// Keep decoding while invisible.
    #[default]
    KeepPlaying,
    /// Pause while invisible and resume where it left off.
    Pause,
}

/// Interpretation rules shared by every output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Policy {
    pub encoding: ModeEncoding,
    pub blackout: BlackoutPolicy,
}

/// Everything about a frame except which media it shows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Look {
    /// 0.0 to 1.0, linear in the dimmer value.
    pub opacity: f32,
    pub end: EndBehavior,
    pub paused: bool,
}

impl Look {
    pub fn looping(&self) -> bool {
        self.end == EndBehavior::Loop
    }
}

/// A complete description of what a surface should be showing.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub media: Option<MediaRef>,
    pub look: Look,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Nothing to show.
    Idle,
    /// Media resolved, surface not open yet.
    Armed,
    /// Surface open and showing the resolved media.
    Playing,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Idle => write!(f, "idle"),
            Phase::Armed => write!(f, "armed"),
            Phase::Playing => write!(f, "playing"),
        }
    }
}

/// The surface work a committed change requires.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Nothing visible changed.
    Unchanged,
    /// The surface should be closed.
    Release,
    /// The surface should show this frame. `cut` is set when the media differs
    /// from what was shown before and must start from the beginning.
    Present { frame: Frame, cut: bool },
}

/// The committed state of one output.
#[derive(Debug)]
pub struct OutputState {
    id: OutputId,
    select: u8,
    dimmer: u8,
    mode: u8,
    resolved: Option<MediaRef>,
    surface_open: bool,
    /// The last select value that failed to resolve, so a miss is only logged once.
    last_miss: Option<u8>,
    commits: u64,
}

impl OutputState {
    pub fn new(id: OutputId) -> OutputState {
        OutputState {
            id,
            select: 0,
            dimmer: 0,
            mode: 0,
            resolved: None,
            surface_open: false,
            last_miss: None,
            commits: 0,
        }
    }

    pub fn select(&self) -> u8 {
        self.select
    }

    pub fn dimmer(&self) -> u8 {
        self.dimmer
    }

    pub fn mode(&self) -> u8 {
        self.mode
    }

    pub fn resolved(&self) -> Option<&MediaRef> {
        self.resolved.as_ref()
    }

    pub fn surface_open(&self) -> bool {
        self.surface_open
    }

    /// The number of commits applied since the output was created or reset.
    pub fn commits(&self) -> u64 {
        self.commits
    }

    pub fn phase(&self, policy: &Policy) -> Phase {
        match (self.frame(policy).media, self.surface_open) {
            (None, _) => Phase::Idle,
            (Some(_), false) => Phase::Armed,
            (Some(_), true) => Phase::Playing,
        }
    }

    /// The frame the committed values describe.
    pub fn frame(&self, policy: &Policy) -> Frame {
        let end = policy.encoding.decode(self.mode);
        Frame {
            media: if end == EndBehavior::Stop {
                None
            } else {
                self.resolved.clone()
            },
            look: Look {
                opacity: f32::from(self.dimmer) / 255.0,
                end,
                paused: policy.blackout == BlackoutPolicy::Pause && self.dimmer == 0,
            },
        }
    }

    /// Applies a set of coalesced values as a single transition. The catalog is
    /// only consulted when the select value changes.
    pub fn commit(&mut self, pending: Pending, catalog: &Catalog, policy: &Policy) -> Transition {
        let before = self.frame(policy);
        self.commits += 1;

        if let Some(dimmer) = pending.dimmer {
            self.dimmer = dimmer;
        }
        if let Some(mode) = pending.mode {
            self.mode = mode;
        }
        if let Some(select) = pending.select.filter(|select| *select != self.select) {
            self.select = select;
            self.resolve(catalog);
        }

        self.transition(before, policy)
    }

    /// Re-resolves the current select value, used after the catalog is refreshed.
    pub fn reevaluate(&mut self, catalog: &Catalog, policy: &Policy) -> Transition {
        let before = self.frame(policy);
        self.resolve(catalog);
        self.transition(before, policy)
    }

    /// Returns to the initial baseline, releasing the surface if it is open.
    pub fn reset(&mut self) -> Transition {
        let was_open = self.surface_open;
        *self = OutputState::new(self.id);
        if was_open {
            Transition::Release
        } else {
            Transition::Unchanged
        }
    }

    /// Records that the surface has been opened for the resolved media.
    pub fn mark_open(&mut self) {
        self.surface_open = true;
    }

    fn resolve(&mut self, catalog: &Catalog) {
        self.resolved = catalog.resolve(self.select).cloned();
        match (&self.resolved, self.select) {
            (_, 0) | (Some(_), _) => self.last_miss = None,
            (None, select) => {
                if self.last_miss != Some(select) {
                    warn!(
                        output = %self.id,
                        select,
                        folder = %catalog.folder().display(),
                        "No media matches the select value, output is blank"
                    );
                    self.last_miss = Some(select);
                }
            }
        }
    }

    fn transition(&mut self, before: Frame, policy: &Policy) -> Transition {
        let after = self.frame(policy);

        if after.media.is_none() {
            if self.surface_open {
                self.surface_open = false;
                info!(output = %self.id, "Output is idle, releasing surface");
                return Transition::Release;
            }
            return Transition::Unchanged;
        }

        if self.surface_open && before == after {
            return Transition::Unchanged;
        }

        let cut = !self.surface_open || before.media != after.media;
        if cut {
            if let Some(media) = after.media.as_ref() {
                info!(
                    output = %self.id,
                    media = media.filename(),
                    select = self.select,
                    looping = after.look.looping(),
                    "Cutting to media"
                );
            }
        }
        Transition::Present { frame: after, cut }
    }
}

#[cfg(test)]
mod test {
    use std::{error::Error, fs::File, path::Path};

    use tempfile::tempdir;

    use crate::{coalesce::Pending, media::Catalog};

    use super::{
        BlackoutPolicy, EndBehavior, ModeEncoding, OutputId, OutputState, Phase, Policy,
        Transition,
    };

    fn catalog(folder: &Path, names: &[&str]) -> Result<Catalog, Box<dyn Error>> {
        for name in names {
            File::create(folder.join(name))?;
        }
        Ok(Catalog::try_scan(folder)?)
    }

    fn pending(select: Option<u8>, dimmer: Option<u8>, mode: Option<u8>) -> Pending {
        Pending {
            select,
            dimmer,
            mode,
        }
    }

    /// Commits and, like the engine, marks the surface open on a present.
    fn commit(
        state: &mut OutputState,
        values: Pending,
        catalog: &Catalog,
        policy: &Policy,
    ) -> Transition {
        let transition = state.commit(values, catalog, policy);
        if let Transition::Present { .. } = transition {
            state.mark_open();
        }
        transition
    }

    #[test]
    fn test_mode_encodings() {
        assert_eq!(EndBehavior::Loop, ModeEncoding::TwoBand.decode(0));
        assert_eq!(EndBehavior::Loop, ModeEncoding::TwoBand.decode(127));
        assert_eq!(EndBehavior::Hold, ModeEncoding::TwoBand.decode(128));
        assert_eq!(EndBehavior::Hold, ModeEncoding::TwoBand.decode(255));

        assert_eq!(EndBehavior::Stop, ModeEncoding::ThreeValue.decode(0));
        assert_eq!(EndBehavior::Hold, ModeEncoding::ThreeValue.decode(1));
        assert_eq!(EndBehavior::Loop, ModeEncoding::ThreeValue.decode(2));
        assert_eq!(EndBehavior::Loop, ModeEncoding::ThreeValue.decode(200));
    }

    #[test]
    fn test_dimmer_only_change() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let catalog = catalog(dir.path(), &["005.mp4"])?;
        let policy = Policy::default();
        let mut state = OutputState::new(OutputId(0));

        match commit(&mut state, pending(Some(5), Some(255), Some(1)), &catalog, &policy) {
            Transition::Present { frame, cut } => {
                assert!(cut);
                assert_eq!(
                    "005.mp4",
                    frame.media.expect("media should resolve").filename()
                );
                assert_eq!(1.0, frame.look.opacity);
                assert!(frame.look.looping());
            }
            other => panic!("expected present, got {:?}", other),
        }
        assert_eq!(Phase::Playing, state.phase(&policy));

        match commit(&mut state, pending(None, Some(128), None), &catalog, &policy) {
            Transition::Present { frame, cut } => {
                assert!(!cut, "dimmer change must not reload");
                assert_eq!(
                    "005.mp4",
                    frame.media.expect("media should resolve").filename()
                );
                assert_eq!(128.0 / 255.0, frame.look.opacity);
                assert!(frame.look.looping());
            }
            other => panic!("expected present, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_select_change_is_a_hard_cut() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let catalog = catalog(dir.path(), &["010_a.mp4", "020_b.mp4"])?;
        let policy = Policy::default();
        let mut state = OutputState::new(OutputId(0));

        commit(&mut state, pending(Some(10), Some(255), Some(0)), &catalog, &policy);
        match commit(
            &mut state,
            pending(Some(20), Some(100), Some(200)),
            &catalog,
            &policy,
        ) {
            Transition::Present { frame, cut } => {
                assert!(cut);
                assert_eq!(
                    "020_b.mp4",
                    frame.media.expect("media should resolve").filename()
                );
                assert_eq!(100.0 / 255.0, frame.look.opacity);
                assert_eq!(EndBehavior::Hold, frame.look.end);
            }
            other => panic!("expected present, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_mode_only_change_keeps_media() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let catalog = catalog(dir.path(), &["003.png"])?;
        let policy = Policy::default();
        let mut state = OutputState::new(OutputId(1));

        commit(&mut state, pending(Some(3), Some(255), Some(127)), &catalog, &policy);
        match commit(&mut state, pending(None, None, Some(128)), &catalog, &policy) {
            Transition::Present { frame, cut } => {
                assert!(!cut);
                assert_eq!(EndBehavior::Hold, frame.look.end);
            }
            other => panic!("expected present, got {:?}", other),
        }

        // The same values again change nothing.
        assert_eq!(
            Transition::Unchanged,
            commit(&mut state, pending(Some(3), None, Some(129)), &catalog, &policy)
        );
        assert_eq!(3, state.commits());
        Ok(())
    }

    #[test]
    fn test_select_zero_releases() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let catalog = catalog(dir.path(), &["001.mp4"])?;
        let policy = Policy::default();
        let mut state = OutputState::new(OutputId(0));

        // Nothing to release yet.
        assert_eq!(
            Transition::Unchanged,
            commit(&mut state, pending(Some(0), Some(255), None), &catalog, &policy)
        );

        commit(&mut state, pending(Some(1), None, None), &catalog, &policy);
        assert!(state.surface_open());
        assert_eq!(
            Transition::Release,
            commit(&mut state, pending(Some(0), None, None), &catalog, &policy)
        );
        assert!(!state.surface_open());
        assert_eq!(Phase::Idle, state.phase(&policy));
        assert!(state.resolved().is_none());
        Ok(())
    }

    #[test]
    fn test_dimmer_zero_keeps_surface_open() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let catalog = catalog(dir.path(), &["001.mp4"])?;
        let policy = Policy::default();
        let mut state = OutputState::new(OutputId(0));

        commit(&mut state, pending(Some(1), Some(255), None), &catalog, &policy);
        match commit(&mut state, pending(None, Some(0), None), &catalog, &policy) {
            Transition::Present { frame, cut } => {
                assert!(!cut);
                assert_eq!(0.0, frame.look.opacity);
                assert!(!frame.look.paused);
            }
            other => panic!("expected present, got {:?}", other),
        }
        assert_eq!(Phase::Playing, state.phase(&policy));

        let pause = Policy {
            blackout: BlackoutPolicy::Pause,
            ..Policy::default()
        };
        assert!(state.frame(&pause).look.paused);
        Ok(())
    }

    #[test]
    fn test_three_value_stop_releases() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let catalog = catalog(dir.path(), &["001.mp4"])?;
        let policy = Policy {
            encoding: ModeEncoding::ThreeValue,
            ..Policy::default()
        };
        let mut state = OutputState::new(OutputId(0));

        assert_eq!(
            Transition::Unchanged,
            commit(&mut state, pending(Some(1), Some(255), Some(0)), &catalog, &policy)
        );
        assert_eq!(Phase::Idle, state.phase(&policy));

        assert!(matches!(
            commit(&mut state, pending(None, None, Some(1)), &catalog, &policy),
            Transition::Present { cut: true, .. }
        ));
        assert_eq!(
            Transition::Release,
            commit(&mut state, pending(None, None, Some(0)), &catalog, &policy)
        );
        Ok(())
    }

    #[test]
    fn test_miss_recovers_on_refresh() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let empty = catalog(dir.path(), &[])?;
        let policy = Policy::default();
        let mut state = OutputState::new(OutputId(0));

        assert_eq!(
            Transition::Unchanged,
            commit(&mut state, pending(Some(9), Some(255), None), &empty, &policy)
        );
        assert_eq!(Phase::Idle, state.phase(&policy));

        let refreshed = catalog(dir.path(), &["009_late.mov"])?;
        match state.reevaluate(&refreshed, &policy) {
            Transition::Present { frame, cut } => {
                assert!(cut);
                assert_eq!(
                    "009_late.mov",
                    frame.media.expect("media should resolve").filename()
                );
            }
            other => panic!("expected present, got {:?}", other),
        }
        assert_eq!(Phase::Armed, state.phase(&policy));
        Ok(())
    }

    #[test]
    fn test_reset() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let catalog = catalog(dir.path(), &["001.mp4"])?;
        let policy = Policy::default();
        let mut state = OutputState::new(OutputId(0));

        assert_eq!(Transition::Unchanged, state.reset());

        commit(&mut state, pending(Some(1), Some(200), Some(3)), &catalog, &policy);
        assert_eq!(Transition::Release, state.reset());
        assert_eq!((0, 0, 0), (state.select(), state.dimmer(), state.mode()));
        assert_eq!(0, state.commits());
        assert!(!state.surface_open());
        Ok(())
    }
}
