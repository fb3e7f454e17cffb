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

//! A surface that hands every command to an external renderer as one JSON
//! object per line.

use std::{collections::HashSet, fmt, io::Write, path::Path};

use parking_lot::Mutex;
use serde::Serialize;

use crate::{
    media::{MediaKind, MediaRef},
    output::{EndBehavior, Look, OutputId},
};

use super::{Display, Orientation, Placement, Position, SurfaceError};

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
enum Command<'a> {
    Open {
        output: String,
        display: &'a str,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        orientation: Orientation,
    },
    Load {
        output: String,
        media_path: Option<&'a Path>,
        kind: Option<MediaKind>,
        opacity: f32,
        #[serde(rename = "loop")]
        looping: bool,
        end: EndBehavior,
        paused: bool,
    },
    Adjust {
        output: String,
        opacity: f32,
        #[serde(rename = "loop")]
        looping: bool,
        end: EndBehavior,
        paused: bool,
    },
    Move {
        output: String,
        x: i32,
        y: i32,
    },
    Close {
        output: String,
    },
}

pub struct Surface {
    writer: Mutex<Box<dyn Write + Send>>,
    displays: Vec<Display>,
    open: Mutex<HashSet<OutputId>>,
}

impl Surface {
    pub fn new(writer: Box<dyn Write + Send>, displays: Vec<Display>) -> Surface {
        Surface {
            writer: Mutex::new(writer),
            displays,
            open: Mutex::new(HashSet::new()),
        }
    }

    /// The renderer only knows about outputs it was told to open.
    fn require_open(&self, id: OutputId) -> Result<(), SurfaceError> {
        if self.open.lock().contains(&id) {
            Ok(())
        } else {
            Err(SurfaceError::NotOpen(id))
        }
    }

    fn emit(&self, command: &Command) -> Result<(), SurfaceError> {
        let mut writer = self.writer.lock();
        serde_json::to_writer(&mut *writer, command)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

impl super::Surface for Surface {
    fn displays(&self) -> Result<Vec<Display>, SurfaceError> {
        Ok(self.displays.clone())
    }

    fn open(&self, id: OutputId, placement: &Placement) -> Result<(), SurfaceError> {
        // With no configured displays any display name is passed through.
        if !self.displays.is_empty()
            && !self
                .displays
                .iter()
                .any(|display| display.name == placement.display)
        {
            return Err(SurfaceError::DisplayUnavailable(placement.display.clone()));
        }
        self.emit(&Command::Open {
            output: id.to_string(),
            display: &placement.display,
            x: placement.position.x,
            y: placement.position.y,
            width: placement.size.width,
            height: placement.size.height,
            orientation: placement.orientation,
        })?;
        self.open.lock().insert(id);
        Ok(())
    }

    fn load(
        &self,
        id: OutputId,
        media: Option<&MediaRef>,
        look: &Look,
    ) -> Result<(), SurfaceError> {
        self.require_open(id)?;
        self.emit(&Command::Load {
            output: id.to_string(),
            media_path: media.map(|media| media.path()),
            kind: media.map(|media| media.kind()),
            opacity: look.opacity,
            looping: look.looping(),
            end: look.end,
            paused: look.paused,
        })
    }

    fn adjust(&self, id: OutputId, look: &Look) -> Result<(), SurfaceError> {
        self.require_open(id)?;
        self.emit(&Command::Adjust {
            output: id.to_string(),
            opacity: look.opacity,
            looping: look.looping(),
            end: look.end,
            paused: look.paused,
        })
    }

    fn move_to(&self, id: OutputId, position: Position) -> Result<(), SurfaceError> {
        self.require_open(id)?;
        self.emit(&Command::Move {
            output: id.to_string(),
            x: position.x,
            y: position.y,
        })
    }

    fn close(&self, id: OutputId) -> Result<(), SurfaceError> {
        if !self.open.lock().remove(&id) {
            return Err(SurfaceError::NotOpen(id));
        }
        self.emit(&Command::Close {
            output: id.to_string(),
        })
    }
}

impl fmt::Display for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JSON lines renderer")
    }
}

#[cfg(test)]
mod test {
    use std::{
        error::Error,
        io::{self, Write},
        path::PathBuf,
        sync::Arc,
    };

    use parking_lot::Mutex;
    use serde_json::{json, Value};

    use crate::{
        media::{MediaKind, MediaRef},
        output::{EndBehavior, Look, OutputId},
        surface::{
            Display, Orientation, Placement, Position, Size, Surface as _, SurfaceError,
        },
    };

    use super::Surface;

    /// A writer whose contents can be inspected after it's been boxed.
    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Shared {
        fn lines(&self) -> Result<Vec<Value>, serde_json::Error> {
            let bytes = self.0.lock().clone();
            String::from_utf8_lossy(&bytes)
                .lines()
                .map(serde_json::from_str)
                .collect()
        }
    }

    #[test]
    fn test_commands() -> Result<(), Box<dyn Error>> {
        let shared = Shared::default();
        let surface = Surface::new(Box::new(shared.clone()), vec![]);
        let id = OutputId(1);

        surface.open(
            id,
            &Placement {
                display: "Main".to_string(),
                position: Position { x: 10, y: 20 },
                size: Size {
                    width: 1080,
                    height: 1920,
                },
                orientation: Orientation::Vertical,
            },
        )?;
        let media = MediaRef::new(
            "004_loop.mp4",
            PathBuf::from("/media/004_loop.mp4"),
            MediaKind::Video,
        );
        let look = Look {
            opacity: 0.5,
            end: EndBehavior::Loop,
            paused: false,
        };
        surface.load(id, Some(&media), &look)?;
        surface.load(id, None, &look)?;
        surface.move_to(id, Position { x: -5, y: 0 })?;
        surface.close(id)?;

        let lines = shared.lines()?;
        assert_eq!(
            vec![
                json!({"op": "open", "output": "output-2", "display": "Main", "x": 10, "y": 20,
                       "width": 1080, "height": 1920, "orientation": "vertical"}),
                json!({"op": "load", "output": "output-2", "media_path": "/media/004_loop.mp4",
                       "kind": "video", "opacity": 0.5, "loop": true, "end": "loop", "paused": false}),
                json!({"op": "load", "output": "output-2", "media_path": null, "kind": null,
                       "opacity": 0.5, "loop": true, "end": "loop", "paused": false}),
                json!({"op": "move", "output": "output-2", "x": -5, "y": 0}),
                json!({"op": "close", "output": "output-2"}),
            ],
            lines
        );
        Ok(())
    }

    #[test]
    fn test_unknown_outputs_and_displays() -> Result<(), Box<dyn Error>> {
        let shared = Shared::default();
        let surface = Surface::new(Box::new(shared.clone()), vec![Display::fallback()]);
        let id = OutputId(0);
        let look = Look {
            opacity: 1.0,
            end: EndBehavior::Loop,
            paused: false,
        };

        assert!(matches!(
            surface.load(id, None, &look),
            Err(SurfaceError::NotOpen(_))
        ));
        assert!(matches!(surface.close(id), Err(SurfaceError::NotOpen(_))));

        let mut placement = Placement {
            display: "Projector".to_string(),
            position: Position::default(),
            size: Size {
                width: 1920,
                height: 1080,
            },
            orientation: Orientation::Horizontal,
        };
        assert!(matches!(
            surface.open(id, &placement),
            Err(SurfaceError::DisplayUnavailable(name)) if name == "Projector"
        ));

        placement.display = Display::fallback().name;
        surface.open(id, &placement)?;
        surface.adjust(id, &look)?;
        surface.close(id)?;
        assert!(matches!(
            surface.move_to(id, Position::default()),
            Err(SurfaceError::NotOpen(_))
        ));
        assert_eq!(3, shared.lines()?.len());
        Ok(())
    }
}
