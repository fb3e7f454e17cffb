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

use serde::{Deserialize, Serialize};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{error, info, warn};

use crate::{
    dmx::{DmxUpdate, Source},
    engine::Engine,
};

/// Updates buffered between the bound source and the engine.
const UPDATE_QUEUE_SIZE: usize = 512;

/// Where updates come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Operator supplied test values.
    #[default]
    Test,
    /// Live values from the network.
    Listen,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Test => write!(f, "test"),
            Mode::Listen => write!(f, "listen"),
        }
    }
}

struct Binding {
    mode: Mode,
    source: Arc<dyn Source>,
    source_handle: JoinHandle<Result<(), io::Error>>,
    forwarder: JoinHandle<()>,
}

/// Binds exactly one source to the engine at a time.
pub struct Router {
    engine: Arc<Engine>,
    binding: Mutex<Option<Binding>>,
}

impl Router {
    pub fn new(engine: Arc<Engine>) -> Router {
        Router {
            engine,
            binding: Mutex::new(None),
        }
    }

    /// Switches to the given source. The previous source is stopped and anything
    /// it queued is dropped, then every output is reset to idle, and only then
    /// does the new source start delivering.
    pub async fn bind(&self, mode: Mode, source: Arc<dyn Source>) {
        let mut binding = self.binding.lock().await;
        if let Some(previous) = binding.take() {
            Self::detach(previous).await;
        }
        self.engine.reset().await;

        let (updates_tx, mut updates_rx) = mpsc::channel::<DmxUpdate>(UPDATE_QUEUE_SIZE);
        let source_handle = source.monitor_updates(updates_tx);
        let engine = self.engine.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(update) = updates_rx.recv().await {
                engine.ingest(update).await;
            }
            info!(mode = %mode, "Source closed.");
        });

        info!(mode = %mode, source = %source, "Source bound.");
        *binding = Some(Binding {
            mode,
            source,
            source_handle,
            forwarder,
        });
    }

    /// Stops the bound source, if any, and resets every output.
    pub async fn unbind(&self) {
        let mut binding = self.binding.lock().await;
        if let Some(previous) = binding.take() {
            Self::detach(previous).await;
            self.engine.reset().await;
        }
    }

    /// The mode of the bound source.
    pub async fn mode(&self) -> Option<Mode> {
        self.binding.lock().await.as_ref().map(|binding| binding.mode)
    }

    pub fn engine(&self) -> Arc<Engine> {
        self.engine.clone()
    }

    async fn detach(binding: Binding) {
        // Dropping the receiver discards anything still queued.
        binding.forwarder.abort();
        if let Err(e) = binding.forwarder.await {
            if !e.is_cancelled() {
                error!(err = e.to_string(), "Error stopping update forwarder");
            }
        }

        binding.source_handle.abort();
        match binding.source_handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(
                source = %binding.source,
                err = e.to_string(),
                "Source had failed"
            ),
            Err(e) if e.is_cancelled() => {}
            Err(e) => error!(err = e.to_string(), "Error stopping source"),
        }
        info!(mode = %binding.mode, source = %binding.source, "Source unbound.");
    }
}
