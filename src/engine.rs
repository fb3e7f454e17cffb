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
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;
use tokio::{
    select,
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::sleep_until,
};
use tracing::{debug, error, info, span, Instrument, Level};

use crate::{
    coalesce::Coalescer,
    config::{self, ConfigError, PreviewLayout, Stage, MAX_OUTPUTS},
    dmx::{ChannelGroup, DmxUpdate, GroupError, RawUpdate, Routes, Signal},
    media::{Catalog, Catalogs},
    output::{OutputId, OutputState, Phase, Policy, Transition},
    surface::{Anchor, Delta, DisplayTarget, Geometry, Position, Size, Surface, SurfaceManager},
};

/// Updates queued for a single output before ingestion waits.
const OUTPUT_QUEUE_SIZE: usize = 64;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{0} and {1} share DMX channels")]
    Overlap(String, String),
    #[error("no output {0} is configured")]
    UnknownOutput(OutputId),
    #[error("at most {max} outputs are supported, got {0}", max = MAX_OUTPUTS)]
    TooManyOutputs(usize),
    #[error(transparent)]
    Group(#[from] GroupError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Settings shared by every output.
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    /// The only universe the engine looks at.
    pub universe: u16,
    /// The coalescing window.
    pub window: Duration,
    pub policy: Policy,
}

/// Everything the engine needs to know about one output.
#[derive(Debug, Clone)]
pub struct OutputSpec {
    pub name: String,
    pub enabled: bool,
    pub group: ChannelGroup,
    pub media_folder: PathBuf,
    pub target: DisplayTarget,
    pub geometry: Geometry,
}

impl OutputSpec {
    /// Builds the specs for every configured output, placing them for the stage.
    pub fn from_config(config: &config::Player) -> Result<Vec<OutputSpec>, EngineError> {
        let mut preview_offset = Delta::default();
        config
            .outputs()
            .iter()
            .enumerate()
            .map(|(i, output)| -> Result<OutputSpec, EngineError> {
                let (target, geometry) = match config.stage() {
                    Stage::Production => (
                        output.display(),
                        Geometry {
                            size: output.size(),
                            orientation: output.orientation(),
                            anchor: output
                                .position()
                                .map_or(Anchor::Offset(Delta::default()), Anchor::Saved),
                        },
                    ),
                    Stage::Preview => {
                        let full = output.size();
                        let size = Size {
                            width: full.width / 2,
                            height: full.height / 2,
                        };
                        let geometry = Geometry {
                            size,
                            orientation: output.orientation(),
                            anchor: Anchor::Offset(preview_offset),
                        };
                        match config.preview_layout() {
                            PreviewLayout::SideBySide => {
                                preview_offset.dx += i32::try_from(size.width).unwrap_or(i32::MAX)
                            }
                            PreviewLayout::Stacked => {
                                preview_offset.dy += i32::try_from(size.height).unwrap_or(i32::MAX)
                            }
                        }
                        (DisplayTarget(0), geometry)
                    }
                };

                Ok(OutputSpec {
                    name: output.name(i),
                    enabled: output.enabled(),
                    group: output.group()?,
                    media_folder: output.media_folder(),
                    target,
                    geometry,
                })
            })
            .collect()
    }
}

/// What an output is doing right now.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub name: String,
    pub select: u8,
    pub dimmer: u8,
    pub mode: u8,
    pub phase: Phase,
    pub media: Option<String>,
    pub commits: u64,
}

enum Command {
    Update(Signal, RawUpdate),
    Reset(oneshot::Sender<()>),
    Refresh,
    Folder(PathBuf),
    Snapshot(oneshot::Sender<Snapshot>),
}

struct Worker {
    sender: mpsc::Sender<Command>,
    handle: JoinHandle<()>,
}

struct Slot {
    id: OutputId,
    spec: OutputSpec,
    worker: Option<Worker>,
}

struct Outputs {
    routes: Routes,
    slots: Vec<Slot>,
}

impl Outputs {
    fn rebuild_routes(&mut self) -> Result<(), EngineError> {
        let routes = Routes::build(
            self.slots
                .iter()
                .filter(|slot| slot.spec.enabled)
                .map(|slot| (slot.id, &slot.spec.group)),
        )
        .map_err(|(a, b)| {
            EngineError::Overlap(
                self.slots[a.index()].spec.name.clone(),
                self.slots[b.index()].spec.name.clone(),
            )
        })?;
        self.routes = routes;
        Ok(())
    }

    fn slot(&mut self, id: OutputId) -> Result<&mut Slot, EngineError> {
        self.slots
            .get_mut(id.index())
            .ok_or(EngineError::UnknownOutput(id))
    }
}

/// Routes DMX updates to per-output workers. Each enabled output has its own
/// task owning its coalescer and state, so outputs never wait on each other.
pub struct Engine {
    settings: Settings,
    catalogs: Arc<Catalogs>,
    surfaces: Arc<SurfaceManager>,
    outputs: RwLock<Outputs>,
}

impl Engine {
    /// Creates the engine and starts a worker for every enabled output. Must be
    /// called from within a tokio runtime.
    pub fn new(
        settings: Settings,
        specs: Vec<OutputSpec>,
        catalogs: Arc<Catalogs>,
        surface: Arc<dyn Surface>,
    ) -> Result<Arc<Engine>, EngineError> {
        if specs.len() > MAX_OUTPUTS {
            return Err(EngineError::TooManyOutputs(specs.len()));
        }
        let mut outputs = Outputs {
            routes: Routes::default(),
            slots: specs
                .into_iter()
                .zip(0u8..)
                .map(|(spec, i)| Slot {
                    id: OutputId(i),
                    spec,
                    worker: None,
                })
                .collect(),
        };
        outputs.rebuild_routes()?;

        let engine = Arc::new(Engine {
            settings,
            catalogs,
            surfaces: Arc::new(SurfaceManager::new(surface)),
            outputs: RwLock::new(Outputs {
                routes: Routes::default(),
                slots: Vec::new(),
            }),
        });

        for slot in outputs.slots.iter_mut() {
            if slot.spec.enabled {
                slot.worker = Some(engine.spawn_worker(slot.id, &slot.spec));
            }
        }
        *engine.outputs.write() = outputs;

        info!(
            universe = settings.universe,
            window = format!("{:?}", settings.window),
            "Engine started."
        );
        Ok(engine)
    }

    /// Creates the engine from a player configuration.
    pub fn from_config(
        config: &config::Player,
        surface: Arc<dyn Surface>,
    ) -> Result<Arc<Engine>, EngineError> {
        Engine::new(
            Settings {
                universe: config.universe(),
                window: config.coalesce_window()?,
                policy: config.policy(),
            },
            OutputSpec::from_config(config)?,
            Arc::new(Catalogs::new()),
            surface,
        )
    }

    pub fn surfaces(&self) -> Arc<SurfaceManager> {
        self.surfaces.clone()
    }

    /// The configured outputs and whether they're enabled.
    pub fn outputs(&self) -> Vec<(OutputId, OutputSpec)> {
        self.outputs
            .read()
            .slots
            .iter()
            .map(|slot| (slot.id, slot.spec.clone()))
            .collect()
    }

    /// Hands an update to the output it belongs to. Updates for other universes
    /// or for channels outside every group are ignored.
    pub async fn ingest(&self, update: DmxUpdate) {
        if update.universe != self.settings.universe {
            return;
        }

        let routed = {
            let outputs = self.outputs.read();
            outputs.routes.lookup(update.channel).and_then(|(id, signal)| {
                outputs.slots[id.index()]
                    .worker
                    .as_ref()
                    .map(|worker| (worker.sender.clone(), signal))
            })
        };
        let Some((sender, signal)) = routed else {
            return;
        };

        let raw = RawUpdate::now(update.channel, update.value);
        if sender.send(Command::Update(signal, raw)).await.is_err() {
            debug!(channel = update.channel, "Output stopped before update arrived");
        }
    }

    /// Returns every output to its idle baseline, dropping anything pending. Returns
    /// once every worker has applied the reset.
    pub async fn reset(&self) {
        let senders = self.senders();
        let mut acks = Vec::with_capacity(senders.len());
        for (_, sender) in senders {
            let (ack_tx, ack_rx) = oneshot::channel();
            if sender.send(Command::Reset(ack_tx)).await.is_ok() {
                acks.push(ack_rx);
            }
        }
        for ack in acks {
            let _ = ack.await;
        }
        info!("All outputs reset.");
    }

    /// Enables or disables an output. Disabling releases its surface.
    pub fn set_enabled(&self, id: OutputId, enabled: bool) -> Result<(), EngineError> {
        let mut outputs = self.outputs.write();
        let slot = outputs.slot(id)?;
        if slot.spec.enabled == enabled {
            return Ok(());
        }

        slot.spec.enabled = enabled;
        if let Err(e) = outputs.rebuild_routes() {
            outputs.slot(id)?.spec.enabled = !enabled;
            return Err(e);
        }

        let slot = outputs.slot(id)?;
        if enabled {
            slot.worker = Some(self.spawn_worker(id, &slot.spec));
            info!(output = %id, "Output enabled.");
        } else {
            // The worker releases the surface once its channel closes.
            slot.worker = None;
            info!(output = %id, "Output disabled.");
        }
        Ok(())
    }

    /// Moves an output to a new start channel. The output returns to idle, since
    /// its committed values came from the old channels.
    pub async fn set_start_channel(&self, id: OutputId, start_channel: u16) -> Result<(), EngineError> {
        let group = ChannelGroup::new(start_channel)?;
        let sender = {
            let mut outputs = self.outputs.write();
            let previous = std::mem::replace(&mut outputs.slot(id)?.spec.group, group);
            if let Err(e) = outputs.rebuild_routes() {
                outputs.slot(id)?.spec.group = previous;
                return Err(e);
            }
            outputs
                .slot(id)?
                .worker
                .as_ref()
                .map(|worker| worker.sender.clone())
        };

        info!(output = %id, %group, "Output moved.");
        if let Some(sender) = sender {
            let (ack_tx, ack_rx) = oneshot::channel();
            if sender.send(Command::Reset(ack_tx)).await.is_ok() {
                let _ = ack_rx.await;
            }
        }
        Ok(())
    }

    /// Points an output at a new media folder, listing it and re-evaluating the
    /// current select value against it.
    pub async fn set_media_folder(&self, id: OutputId, folder: &Path) -> Result<(), EngineError> {
        let sender = {
            let mut outputs = self.outputs.write();
            let slot = outputs.slot(id)?;
            slot.spec.media_folder = folder.to_path_buf();
            slot.worker.as_ref().map(|worker| worker.sender.clone())
        };

        self.catalogs.refresh(folder);
        if let Some(sender) = sender {
            let _ = sender.send(Command::Folder(folder.to_path_buf())).await;
        }
        Ok(())
    }

    /// Re-lists a media folder and re-evaluates every output using it.
    pub async fn refresh_catalog(&self, folder: &Path) -> Arc<Catalog> {
        let catalog = self.catalogs.refresh(folder);
        let senders: Vec<mpsc::Sender<Command>> = {
            let outputs = self.outputs.read();
            outputs
                .slots
                .iter()
                .filter(|slot| slot.spec.media_folder == folder)
                .filter_map(|slot| slot.worker.as_ref().map(|worker| worker.sender.clone()))
                .collect()
        };
        for sender in senders {
            let _ = sender.send(Command::Refresh).await;
        }
        catalog
    }

    /// Re-lists every configured media folder.
    pub async fn refresh_all(&self) {
        let mut folders: Vec<PathBuf> = self
            .outputs
            .read()
            .slots
            .iter()
            .map(|slot| slot.spec.media_folder.clone())
            .collect();
        folders.sort();
        folders.dedup();
        for folder in folders {
            let catalog = self.refresh_catalog(&folder).await;
            info!(folder = %folder.display(), entries = catalog.len(), "Catalog refreshed.");
        }
    }

    /// Moves an output's surface, returning its new position if it's open.
    pub async fn nudge(&self, id: OutputId, delta: Delta) -> Option<Position> {
        self.surfaces.reposition(id, delta).await
    }

    /// The state of an enabled output.
    pub async fn snapshot(&self, id: OutputId) -> Option<Snapshot> {
        let sender = self
            .outputs
            .read()
            .slots
            .get(id.index())?
            .worker
            .as_ref()?
            .sender
            .clone();
        let (reply_tx, reply_rx) = oneshot::channel();
        sender.send(Command::Snapshot(reply_tx)).await.ok()?;
        reply_rx.await.ok()
    }

    /// Stops every worker and closes every surface.
    pub async fn shutdown(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut outputs = self.outputs.write();
            outputs
                .slots
                .iter_mut()
                .filter_map(|slot| slot.worker.take())
                .map(|worker| worker.handle)
                .collect()
        };
        for handle in handles {
            if let Err(e) = handle.await {
                error!(err = e.to_string(), "Error waiting for output worker to stop");
            }
        }

        let surfaces = self.surfaces.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || surfaces.shutdown()).await {
            error!(err = e.to_string(), "Error shutting down surfaces");
        }
        info!("Engine stopped.");
    }

    fn senders(&self) -> Vec<(OutputId, mpsc::Sender<Command>)> {
        self.outputs
            .read()
            .slots
            .iter()
            .filter_map(|slot| {
                slot.worker
                    .as_ref()
                    .map(|worker| (slot.id, worker.sender.clone()))
            })
            .collect()
    }

    fn spawn_worker(&self, id: OutputId, spec: &OutputSpec) -> Worker {
        let (sender, receiver) = mpsc::channel(OUTPUT_QUEUE_SIZE);
        let context = OutputWorker {
            id,
            name: spec.name.clone(),
            target: spec.target,
            geometry: spec.geometry,
            folder: spec.media_folder.clone(),
            window: self.settings.window,
            policy: self.settings.policy,
            catalogs: self.catalogs.clone(),
            surfaces: self.surfaces.clone(),
        };
        let span = span!(Level::INFO, "output", output = %id, name = %spec.name);
        let handle = tokio::spawn(context.run(receiver).instrument(span));
        Worker { sender, handle }
    }
}

/// The coalescer and state machine pair for one output.
struct OutputWorker {
    id: OutputId,
    name: String,
    target: DisplayTarget,
    geometry: Geometry,
    folder: PathBuf,
    window: Duration,
    policy: Policy,
    catalogs: Arc<Catalogs>,
    surfaces: Arc<SurfaceManager>,
}

impl OutputWorker {
    async fn run(mut self, mut receiver: mpsc::Receiver<Command>) {
        let mut state = OutputState::new(self.id);
        let mut coalescer = Coalescer::new(self.window);
        let mut catalog = self.catalogs.get(&self.folder);
        info!(
            folder = %self.folder.display(),
            entries = catalog.len(),
            window = ?coalescer.window(),
            max_hold = ?coalescer.max_hold(),
            "Output started."
        );

        loop {
            let deadline = coalescer.deadline();
            let wake = tokio::time::Instant::from_std(deadline.unwrap_or_else(Instant::now));

            select! {
                command = receiver.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    match command {
                        Command::Update(signal, update) => coalescer.record(signal, &update),
                        Command::Reset(ack) => {
                            coalescer.cancel();
                            let transition = state.reset();
                            self.apply(&mut state, transition);
                            let _ = ack.send(());
                        }
                        Command::Refresh => {
                            catalog = self.catalogs.get(&self.folder);
                            let transition = state.reevaluate(&catalog, &self.policy);
                            self.apply(&mut state, transition);
                        }
                        Command::Folder(folder) => {
                            self.folder = folder;
                            catalog = self.catalogs.get(&self.folder);
                            info!(folder = %self.folder.display(), entries = catalog.len(), "Media folder changed.");
                            let transition = state.reevaluate(&catalog, &self.policy);
                            self.apply(&mut state, transition);
                        }
                        Command::Snapshot(reply) => {
                            let _ = reply.send(self.snapshot(&state));
                        }
                    }
                }
                _ = sleep_until(wake), if deadline.is_some() => {
                    if let Some(pending) = coalescer.take_due(Instant::now()) {
                        debug!(
                            select = ?pending.select,
                            dimmer = ?pending.dimmer,
                            mode = ?pending.mode,
                            "Committing"
                        );
                        let transition = state.commit(pending, &catalog, &self.policy);
                        self.apply(&mut state, transition);
                    }
                }
            }
        }

        coalescer.cancel();
        let transition = state.reset();
        self.apply(&mut state, transition);
        info!("Output stopped.");
    }

    fn apply(&self, state: &mut OutputState, transition: Transition) {
        match transition {
            Transition::Unchanged => {}
            Transition::Release => self.surfaces.close(self.id),
            Transition::Present { frame, .. } => {
                if !state.surface_open() {
                    self.surfaces.open(self.id, self.target, self.geometry);
                    state.mark_open();
                }
                self.surfaces.update(self.id, frame);
            }
        }
    }

    fn snapshot(&self, state: &OutputState) -> Snapshot {
        Snapshot {
            name: self.name.clone(),
            select: state.select(),
            dimmer: state.dimmer(),
            mode: state.mode(),
            phase: state.phase(&self.policy),
            media: state.resolved().map(|media| media.filename().to_string()),
            commits: state.commits(),
        }
    }
}
