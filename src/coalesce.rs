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
use std::time::{Duration, Instant};

use crate::dmx::{RawUpdate, Signal};

/// The default commit window.
pub const DEFAULT_WINDOW: Duration = Duration::from_millis(25);

/// Bounds for a configured commit window.
pub const MIN_WINDOW: Duration = Duration::from_millis(1);
pub const MAX_WINDOW: Duration = Duration::from_millis(250);

/// Values waiting to be committed. The last value seen for each signal wins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pending {
    pub select: Option<u8>,
    pub dimmer: Option<u8>,
    pub mode: Option<u8>,
}

impl Pending {
    pub fn is_empty(&self) -> bool {
        self.select.is_none() && self.dimmer.is_none() && self.mode.is_none()
    }

    fn record(&mut self, signal: Signal, value: u8) {
        match signal {
            Signal::Select => self.select = Some(value),
            Signal::Dimmer => self.dimmer = Some(value),
            Signal::Mode => self.mode = Some(value),
        }
    }
}

/// How many windows values may be held while updates keep arriving.
const MAX_HOLD_WINDOWS: u32 = 2;

/// Buffers the updates for one output until its window elapses without
/// another update. A steady stream is committed at least once every max hold,
/// measured from the first value held.
#[derive(Debug)]
pub struct Coalescer {
    window: Duration,
    pending: Pending,
    quiet: Option<Instant>,
    held_since: Option<Instant>,
}

impl Coalescer {
    pub fn new(window: Duration) -> Coalescer {
        Coalescer {
            window: window.clamp(MIN_WINDOW, MAX_WINDOW),
            pending: Pending::default(),
            quiet: None,
            held_since: None,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn max_hold(&self) -> Duration {
        self.window * MAX_HOLD_WINDOWS
    }

    /// Records an update and pushes the quiet deadline out to a full window
    /// after it. The deadline never moves earlier.
    pub fn record(&mut self, signal: Signal, update: &RawUpdate) {
        self.pending.record(signal, update.value);

        let quiet = update.timestamp + self.window;
        self.quiet = Some(match self.quiet {
            Some(current) if current > quiet => current,
            _ => quiet,
        });
        self.held_since.get_or_insert(update.timestamp);
    }

    /// When the pending values should be committed, if any are waiting: after a
    /// quiet window or once the max hold runs out, whichever comes first.
    pub fn deadline(&self) -> Option<Instant> {
        let quiet = self.quiet?;
        Some(match self.held_since {
            Some(held_since) => quiet.min(held_since + self.max_hold()),
            None => quiet,
        })
    }

    /// Takes the pending values if the deadline has passed.
    pub fn take_due(&mut self, now: Instant) -> Option<Pending> {
        match self.deadline() {
            Some(deadline) if deadline <= now => self.take(),
            _ => None,
        }
    }

    /// Takes the pending values regardless of the deadline.
    pub fn take(&mut self) -> Option<Pending> {
        self.quiet = None;
        self.held_since = None;
        let pending = std::mem::take(&mut self.pending);
        if pending.is_empty() {
            None
        } else {
            Some(pending)
        }
    }

    /// Drops anything pending without committing it.
    pub fn cancel(&mut self) {
        self.pending = Pending::default();
        self.quiet = None;
        self.held_since = None;
    }
}

#[cfg(test)]
mod test {
    use std::time::{Duration, Instant};

    use crate::dmx::{RawUpdate, Signal};

    use super::{Coalescer, Pending, MAX_WINDOW, MIN_WINDOW};

    fn update(value: u8, timestamp: Instant) -> RawUpdate {
        RawUpdate {
            channel: 1,
            value,
            timestamp,
        }
    }

    #[test]
    fn test_last_value_wins() {
        let start = Instant::now();
        let window = Duration::from_millis(20);
        let mut coalescer = Coalescer::new(window);

        coalescer.record(Signal::Select, &update(1, start));
        coalescer.record(Signal::Dimmer, &update(50, start));
        coalescer.record(Signal::Select, &update(2, start + Duration::from_millis(5)));
        coalescer.record(Signal::Mode, &update(200, start + Duration::from_millis(10)));

        assert_eq!(
            Some(start + Duration::from_millis(10) + window),
            coalescer.deadline()
        );
        assert_eq!(None, coalescer.take_due(start + Duration::from_millis(25)));
        assert_eq!(
            Some(Pending {
                select: Some(2),
                dimmer: Some(50),
                mode: Some(200),
            }),
            coalescer.take_due(start + Duration::from_millis(30))
        );
        assert_eq!(None, coalescer.deadline());
        assert_eq!(None, coalescer.take());
    }

    #[test]
    fn test_deadline_never_moves_earlier() {
        let start = Instant::now();
        let mut coalescer = Coalescer::new(Duration::from_millis(20));

        coalescer.record(Signal::Dimmer, &update(1, start + Duration::from_millis(10)));
        // A late delivered update stamped earlier doesn't shorten the window.
        coalescer.record(Signal::Dimmer, &update(2, start));
        assert_eq!(
            Some(start + Duration::from_millis(30)),
            coalescer.deadline()
        );
    }

    #[test]
    fn test_steady_stream_commits_within_max_hold() {
        let start = Instant::now();
        let mut coalescer = Coalescer::new(Duration::from_millis(25));
        let max_hold = coalescer.max_hold();
        let tick = Duration::from_millis(22);

        // A 44Hz stream never leaves a quiet window.
        let mut commits = Vec::new();
        let mut now = start;
        for value in 0..90u8 {
            coalescer.record(Signal::Dimmer, &update(value, now));
            if let Some(pending) = coalescer.take_due(now) {
                commits.push((now, pending.dimmer));
            }
            now += tick;
        }

        assert!(commits.len() >= 20, "only {} commits", commits.len());
        let (first, _) = commits[0];
        assert!(first - start <= max_hold + tick);
        // The next hold starts with the first value after a commit.
        for pair in commits.windows(2) {
            assert!(pair[1].0 - pair[0].0 <= max_hold + tick * 2);
        }
        // Each commit carries the newest value.
        let (at, dimmer) = commits[commits.len() - 1];
        let expected = u8::try_from((at - start).as_millis() / tick.as_millis()).ok();
        assert_eq!(expected, dimmer);
    }

    #[test]
    fn test_max_hold_starts_at_first_value() {
        let start = Instant::now();
        let mut coalescer = Coalescer::new(Duration::from_millis(20));

        coalescer.record(Signal::Select, &update(1, start));
        coalescer.record(Signal::Dimmer, &update(2, start + Duration::from_millis(15)));
        coalescer.record(Signal::Dimmer, &update(3, start + Duration::from_millis(30)));
        assert_eq!(Some(start + Duration::from_millis(40)), coalescer.deadline());
        assert_eq!(
            Some(Pending {
                select: Some(1),
                dimmer: Some(3),
                mode: None,
            }),
            coalescer.take_due(start + Duration::from_millis(40))
        );

        // The next hold starts with the next value.
        coalescer.record(Signal::Dimmer, &update(4, start + Duration::from_millis(45)));
        assert_eq!(Some(start + Duration::from_millis(65)), coalescer.deadline());
    }

    #[test]
    fn test_cancel() {
        let start = Instant::now();
        let mut coalescer = Coalescer::new(Duration::from_millis(20));

        coalescer.record(Signal::Select, &update(1, start));
        coalescer.cancel();
        assert_eq!(None, coalescer.deadline());
        assert_eq!(None, coalescer.take_due(start + Duration::from_secs(1)));
    }

    #[test]
    fn test_window_is_clamped() {
        assert_eq!(MIN_WINDOW, Coalescer::new(Duration::ZERO).window());
        assert_eq!(MAX_WINDOW, Coalescer::new(Duration::from_secs(5)).window());
    }
}
