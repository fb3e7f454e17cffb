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
use std::{fmt, io, sync::Arc};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::{sync::mpsc::Sender, task::JoinHandle};
use tracing::{debug, info, span, Instrument, Level};

use super::{DmxUpdate, TestValues};

#[derive(Error, Debug)]
pub enum InjectError {
    #[error("the manual source is not bound to the engine")]
    Detached,
}

/// A source driven by operator supplied test values. Injected values travel
/// through exactly the same path as network updates.
pub struct Manual {
    /// The universe the injected updates are addressed to.
    universe: u16,
    /// The channel of the current binding, if any.
    sink: Arc<Mutex<Option<Sender<DmxUpdate>>>>,
}

impl Manual {
    pub fn new(universe: u16) -> Manual {
        Manual {
            universe,
            sink: Arc::new(Mutex::new(None)),
        }
    }

    /// Whether the source is currently bound.
    pub fn is_attached(&self) -> bool {
        self.sink
            .lock()
            .as_ref()
            .is_some_and(|sink| !sink.is_closed())
    }

    /// Sends the select, dimmer and mode values of one channel group, in that order.
    pub async fn inject(&self, values: TestValues) -> Result<(), InjectError> {
        let sink = self.sink.lock().clone().ok_or(InjectError::Detached)?;

        for update in values.to_updates(self.universe) {
            sink.send(update).await.map_err(|_| InjectError::Detached)?;
        }
        debug!(
            start_channel = values.group.start_channel(),
            select = values.select,
            dimmer = values.dimmer,
            mode = values.mode,
            "Injected test values"
        );
        Ok(())
    }
}

impl fmt::Display for Manual {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "test (universe {})", self.universe)
    }
}

impl super::Source for Manual {
    fn monitor_updates(&self, updates_tx: Sender<DmxUpdate>) -> JoinHandle<Result<(), io::Error>> {
        *self.sink.lock() = Some(updates_tx.clone());
        let sink = self.sink.clone();

        tokio::spawn(
            async move {
                info!("Manual source attached.");
                updates_tx.closed().await;

                let mut sink = sink.lock();
                if sink
                    .as_ref()
                    .is_some_and(|current| current.same_channel(&updates_tx))
                {
                    *sink = None;
                }
                info!("Manual source detached.");
                Ok(())
            }
            .instrument(span!(Level::INFO, "manual source")),
        )
    }
}

#[cfg(test)]
mod test {
    use std::error::Error;

    use tokio::sync::mpsc;

    use crate::dmx::{DmxUpdate, Source};

    use super::{InjectError, Manual};

    #[tokio::test(flavor = "multi_thread")]
    async fn test_inject_order() -> Result<(), Box<dyn Error>> {
        let manual = Manual::new(1);
        let (updates_tx, mut updates_rx) = mpsc::channel(16);
        let handle = manual.monitor_updates(updates_tx);
        assert!(manual.is_attached());

        manual.inject("20 3 200 130".parse()?).await?;

        assert_eq!(Some(DmxUpdate::new(1, 20, 3)), updates_rx.recv().await);
        assert_eq!(Some(DmxUpdate::new(1, 21, 200)), updates_rx.recv().await);
        assert_eq!(Some(DmxUpdate::new(1, 22, 130)), updates_rx.recv().await);

        drop(updates_rx);
        handle.await??;
        assert!(!manual.is_attached());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_inject_detached() -> Result<(), Box<dyn Error>> {
        let manual = Manual::new(1);
        assert!(matches!(
            manual.inject("1 1 1 1".parse()?).await,
            Err(InjectError::Detached)
        ));
        Ok(())
    }
}
