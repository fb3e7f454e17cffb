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
    collections::HashMap,
    fmt,
    fs::OpenOptions,
    io,
    ops::Add,
    sync::Arc,
    thread::{self, JoinHandle},
};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, error, info, span, warn, Level};

use crate::{
    config,
    media::MediaRef,
    output::{Frame, Look, OutputId},
};

pub mod jsonl;
pub mod mock;

#[derive(Error, Debug)]
pub enum SurfaceError {
    #[error("display {0} is not available")]
    DisplayUnavailable(String),
    #[error("no surface is open for {0}")]
    NotOpen(OutputId),
    #[error("surface I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("surface encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A physical display a surface can be placed on.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Display {
    pub name: String,
    #[serde(default)]
    pub x: i32,
    #[serde(default)]
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Display {
    /// The display assumed when none can be enumerated.
    pub fn fallback() -> Display {
        Display {
            name: "Primary Display".to_string(),
            x: 0,
            y: 0,
            width: 1920,
            height: 1080,
        }
    }

    pub fn origin(&self) -> Position {
        Position {
            x: self.x,
            y: self.y,
        }
    }
}

impl fmt::Display for Display {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}x{} at {},{})",
            self.name, self.width, self.height, self.x, self.y
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

/// A relative movement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delta {
    pub dx: i32,
    pub dy: i32,
}

impl Add<Delta> for Position {
    type Output = Position;

    fn add(self, delta: Delta) -> Position {
        Position {
            x: self.x.saturating_add(delta.dx),
            y: self.y.saturating_add(delta.dy),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Horizontal,
    Vertical,
}

/// Where a surface sits relative to its display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    /// An absolute, previously saved position.
    Saved(Position),
    /// An offset from the display's top left corner.
    Offset(Delta),
}

/// The requested size and position of a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub size: Size,
    pub orientation: Orientation,
    pub anchor: Anchor,
}

impl Geometry {
    /// Places the geometry on a display. A fallback placement ignores saved
    /// positions, since they belong to a display that isn't there.
    pub fn place(&self, display: &Display, fallback: bool) -> Placement {
        let position = match self.anchor {
            Anchor::Saved(position) if !fallback => position,
            Anchor::Saved(_) => display.origin(),
            Anchor::Offset(delta) => display.origin() + delta,
        };
        Placement {
            display: display.name.clone(),
            position,
            size: self.size,
            orientation: self.orientation,
        }
    }
}

/// A display index, zero being the primary display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisplayTarget(pub usize);

/// A concrete placement handed to the surface adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Placement {
    pub display: String,
    pub position: Position,
    pub size: Size,
    pub orientation: Orientation,
}

/// A platform specific rendering surface. Each output has at most one.
pub trait Surface: fmt::Display + Send + Sync {
    /// The displays known to the platform, primary first.
    fn displays(&self) -> Result<Vec<Display>, SurfaceError>;

    /// Opens a surface for the output.
    fn open(&self, id: OutputId, placement: &Placement) -> Result<(), SurfaceError>;

    /// Loads media from the beginning, or blanks the surface if there is none.
    fn load(&self, id: OutputId, media: Option<&MediaRef>, look: &Look)
        -> Result<(), SurfaceError>;

    /// Changes opacity and end behavior without touching the media.
    fn adjust(&self, id: OutputId, look: &Look) -> Result<(), SurfaceError>;

    /// Moves the surface.
    fn move_to(&self, id: OutputId, position: Position) -> Result<(), SurfaceError>;

    /// Closes the surface.
    fn close(&self, id: OutputId) -> Result<(), SurfaceError>;
}

/// Gets the surface adapter described by the configuration.
pub fn get(config: &config::Surface) -> Result<Arc<dyn Surface>, SurfaceError> {
    let displays = config.displays();
    match config.kind() {
        config::SurfaceKind::Mock => Ok(Arc::new(mock::Surface::new("mock", displays))),
        config::SurfaceKind::Jsonl => match config.path() {
            // Appending leaves a running renderer's stream intact.
            Some(path) => Ok(Arc::new(jsonl::Surface::new(
                Box::new(OpenOptions::new().append(true).create(true).open(path)?),
                displays,
            ))),
            None => Ok(Arc::new(jsonl::Surface::new(Box::new(io::stdout()), displays))),
        },
    }
}

enum Op {
    Open(DisplayTarget, Geometry),
    Update(Frame),
    Reposition(Delta, oneshot::Sender<Option<Position>>),
    Close,
    Flush(oneshot::Sender<()>),
}

struct Dispatcher {
    sender: Sender<Op>,
    handle: JoinHandle<()>,
}

/// Owns the surface lifecycle for every output. Calls never block: each output
/// has a thread that applies its operations in order.
pub struct SurfaceManager {
    surface: Arc<dyn Surface>,
    dispatchers: Mutex<HashMap<OutputId, Dispatcher>>,
}

impl SurfaceManager {
    pub fn new(surface: Arc<dyn Surface>) -> SurfaceManager {
        SurfaceManager {
            surface,
            dispatchers: Mutex::new(HashMap::new()),
        }
    }

    /// Opens a surface for the output, closing any existing one first.
    pub fn open(&self, id: OutputId, target: DisplayTarget, geometry: Geometry) {
        self.dispatch(id, Op::Open(target, geometry));
    }

    /// Shows the frame. Repeating the frame that is already shown does nothing.
    pub fn update(&self, id: OutputId, frame: Frame) {
        self.dispatch(id, Op::Update(frame));
    }

    /// Moves the output's surface and returns its new position, or None if no
    /// surface is open.
    pub async fn reposition(&self, id: OutputId, delta: Delta) -> Option<Position> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.dispatch(id, Op::Reposition(delta, reply_tx));
        reply_rx.await.ok().flatten()
    }

    pub fn close(&self, id: OutputId) {
        self.dispatch(id, Op::Close);
    }

    /// Waits until every operation queued for the output so far has been applied.
    pub async fn flush(&self, id: OutputId) {
        let (done_tx, done_rx) = oneshot::channel();
        self.dispatch(id, Op::Flush(done_tx));
        let _ = done_rx.await;
    }

    /// Closes every surface and stops the dispatcher threads.
    pub fn shutdown(&self) {
        let dispatchers: Vec<(OutputId, Dispatcher)> = self.dispatchers.lock().drain().collect();
        for (id, dispatcher) in dispatchers {
            let _ = dispatcher.sender.send(Op::Close);
            drop(dispatcher.sender);
            if dispatcher.handle.join().is_err() {
                error!(output = %id, "Error joining surface dispatcher");
            }
        }
    }

    fn dispatch(&self, id: OutputId, op: Op) {
        let mut dispatchers = self.dispatchers.lock();
        let dispatcher = dispatchers.entry(id).or_insert_with(|| {
            let (sender, receiver) = crossbeam_channel::unbounded();
            let surface = self.surface.clone();
            let handle = thread::spawn(move || {
                Applier::new(id, surface).run(receiver);
            });
            Dispatcher { sender, handle }
        });
        if dispatcher.sender.send(op).is_err() {
            error!(output = %id, "Surface dispatcher has stopped");
        }
    }
}

impl Drop for SurfaceManager {
    fn drop(&mut self) {
        // Threads exit once their channel disconnects.
        self.dispatchers.lock().clear();
    }
}

/// Applies one output's surface operations on its dispatcher thread.
struct Applier {
    id: OutputId,
    surface: Arc<dyn Surface>,
    placement: Option<Placement>,
    applied: Option<Frame>,
}

impl Applier {
    fn new(id: OutputId, surface: Arc<dyn Surface>) -> Applier {
        Applier {
            id,
            surface,
            placement: None,
            applied: None,
        }
    }

    fn run(mut self, receiver: Receiver<Op>) {
        let span = span!(Level::INFO, "surface", output = %self.id);
        let _enter = span.enter();

        while let Ok(op) = receiver.recv() {
            match op {
                Op::Open(target, geometry) => self.open(target, geometry),
                Op::Update(frame) => self.update(frame),
                Op::Reposition(delta, reply) => {
                    let _ = reply.send(self.reposition(delta));
                }
                Op::Close => self.close(),
                Op::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
        debug!("Surface dispatcher stopped.");
    }

    fn displays(&self) -> Vec<Display> {
        match self.surface.displays() {
            Ok(displays) if !displays.is_empty() => displays,
            Ok(_) => {
                warn!("No displays reported, assuming a default primary display");
                vec![Display::fallback()]
            }
            Err(e) => {
                warn!(
                    err = e.to_string(),
                    "Unable to enumerate displays, assuming a default primary display"
                );
                vec![Display::fallback()]
            }
        }
    }

    fn open(&mut self, target: DisplayTarget, geometry: Geometry) {
        self.close();

        let displays = self.displays();
        let primary = &displays[0];
        let (target_display, fallback) = match displays.get(target.0) {
            Some(target_display) => (target_display, false),
            None => {
                warn!(
                    display = target.0 + 1,
                    fallback = %primary.name,
                    "Display is not available, degrading to the primary display"
                );
                (primary, true)
            }
        };

        let placement = geometry.place(target_display, fallback);
        let placement = match self.surface.open(self.id, &placement) {
            Ok(()) => placement,
            Err(e) if !fallback && target.0 != 0 => {
                warn!(
                    err = e.to_string(),
                    display = %target_display.name,
                    fallback = %primary.name,
                    "Unable to open surface, degrading to the primary display"
                );
                let placement = geometry.place(primary, true);
                if let Err(e) = self.surface.open(self.id, &placement) {
                    error!(err = e.to_string(), "Unable to open surface");
                    return;
                }
                placement
            }
            Err(e) => {
                error!(err = e.to_string(), "Unable to open surface");
                return;
            }
        };

        info!(
            display = %placement.display,
            position = %placement.position,
            width = placement.size.width,
            height = placement.size.height,
            "Surface opened."
        );
        self.placement = Some(placement);
    }

    fn update(&mut self, frame: Frame) {
        if self.placement.is_none() {
            debug!("Ignoring update, no surface is open");
            return;
        }
        if self.applied.as_ref() == Some(&frame) {
            return;
        }

        let reload = self
            .applied
            .as_ref()
            .map_or(true, |applied| applied.media != frame.media);
        let result = if reload {
            self.surface.load(self.id, frame.media.as_ref(), &frame.look)
        } else {
            self.surface.adjust(self.id, &frame.look)
        };

        match result {
            Ok(()) => self.applied = Some(frame),
            Err(e) => {
                error!(err = e.to_string(), "Unable to update surface");
                self.applied = None;
            }
        }
    }

    fn reposition(&mut self, delta: Delta) -> Option<Position> {
        let Some(placement) = self.placement.as_mut() else {
            info!("Ignoring reposition, no surface is open");
            return None;
        };

        let position = placement.position + delta;
        match self.surface.move_to(self.id, position) {
            Ok(()) => {
                placement.position = position;
                Some(position)
            }
            Err(e) => {
                error!(err = e.to_string(), "Unable to move surface");
                None
            }
        }
    }

    fn close(&mut self) {
        self.applied = None;
        if self.placement.take().is_none() {
            return;
        }
        match self.surface.close(self.id) {
            Ok(()) => info!("Surface closed."),
            Err(e) => error!(err = e.to_string(), "Unable to close surface"),
        }
    }
}
