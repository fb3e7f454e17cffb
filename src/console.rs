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
use std::{io, str::FromStr, sync::Arc, thread};

use thiserror::Error;
use tokio::sync::mpsc::{Receiver, Sender};
use tracing::{error, info, span, warn, Level};

use crate::{
    dmx::{manual::Manual, ParseError, Source, TestValues},
    output::OutputId,
    router::{Mode, Router},
    surface::Delta,
};

const TEST: &str = "test";
const LISTEN: &str = "listen";
const NUDGE: &str = "nudge";
const REFRESH: &str = "refresh";
const ENABLE: &str = "enable";
const DISABLE: &str = "disable";
const STATUS: &str = "status";
const QUIT: &str = "quit";

/// Operator commands read from the console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Sends a set of test values, switching to test mode if needed.
    Test(TestValues),
    /// Switches the bound source.
    Switch(Mode),
    /// Moves an output's surface.
    Nudge(OutputId, Delta),
    /// Re-lists every media folder.
    Refresh,
    Enable(OutputId),
    Disable(OutputId),
    /// Prints the state of every output.
    Status,
    Quit,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CommandError {
    #[error("unrecognized command \"{0}\"")]
    Unrecognized(String),
    #[error("invalid output \"{0}\", outputs are numbered from 1")]
    Output(String),
    #[error("invalid offset \"{0}\"")]
    Offset(String),
    #[error(transparent)]
    Values(#[from] ParseError),
}

fn parse_output(raw: Option<&str>) -> Result<OutputId, CommandError> {
    let raw = raw.unwrap_or_default();
    match raw.parse::<u8>() {
        Ok(n) if n >= 1 => Ok(OutputId(n - 1)),
        _ => Err(CommandError::Output(raw.to_string())),
    }
}

fn parse_offset(raw: Option<&str>) -> Result<i32, CommandError> {
    let raw = raw.unwrap_or_default();
    raw.parse::<i32>()
        .map_err(|_| CommandError::Offset(raw.to_string()))
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (verb, rest) = s.split_once(char::is_whitespace).unwrap_or((s, ""));
        let mut args = rest.split_whitespace();

        match verb.to_lowercase().as_str() {
            TEST if rest.trim().is_empty() => Ok(Command::Switch(Mode::Test)),
            TEST => Ok(Command::Test(rest.parse()?)),
            LISTEN => Ok(Command::Switch(Mode::Listen)),
            NUDGE => Ok(Command::Nudge(
                parse_output(args.next())?,
                Delta {
                    dx: parse_offset(args.next())?,
                    dy: parse_offset(args.next())?,
                },
            )),
            REFRESH => Ok(Command::Refresh),
            ENABLE => Ok(Command::Enable(parse_output(args.next())?)),
            DISABLE => Ok(Command::Disable(parse_output(args.next())?)),
            STATUS => Ok(Command::Status),
            QUIT | "exit" => Ok(Command::Quit),
            _ => Err(CommandError::Unrecognized(s.to_string())),
        }
    }
}

/// Reads one command. Returns false once the input is exhausted.
fn monitor_io<R, W>(
    commands_tx: &Sender<Command>,
    mut reader: R,
    mut writer: W,
) -> Result<bool, io::Error>
where
    R: io::BufRead,
    W: io::Write,
{
    write!(
        writer,
        "Command ({} <start> <select> <dimmer> <mode>, {}, {}, {} <output> <dx> <dy>, {}, {} <output>, {} <output>, {}, {}): ",
        TEST, TEST, LISTEN, NUDGE, REFRESH, ENABLE, DISABLE, STATUS, QUIT,
    )?;
    writer.flush()?;
    let mut input: String = String::default();
    if reader.read_line(&mut input)? == 0 {
        return Ok(false);
    }
    if input.trim().is_empty() {
        return Ok(true);
    }

    match input.parse::<Command>() {
        Ok(command) => commands_tx
            .blocking_send(command)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?,
        Err(e) => {
            warn!(input = input.trim(), err = e.to_string(), "Unrecognized input");
            writeln!(writer, "{}", e)?;
        }
    }
    Ok(true)
}

/// Reads commands from standard input until it closes. Prompts go to standard
/// error, leaving standard output to the renderer.
pub fn monitor_stdin(
    commands_tx: Sender<Command>,
) -> Result<thread::JoinHandle<Result<(), io::Error>>, io::Error> {
    thread::Builder::new()
        .name("console".to_string())
        .spawn(move || {
            let span = span!(Level::INFO, "console");
            let _enter = span.enter();

            info!("Console started.");
            while monitor_io(&commands_tx, io::stdin().lock(), io::stderr())? {}
            info!("Console input closed.");
            Ok(())
        })
}

/// Executes operator commands against the router.
pub struct Console {
    router: Arc<Router>,
    manual: Arc<Manual>,
    listener: Arc<dyn Source>,
}

impl Console {
    pub fn new(router: Arc<Router>, manual: Arc<Manual>, listener: Arc<dyn Source>) -> Console {
        Console {
            router,
            manual,
            listener,
        }
    }

    /// Binds the source for the given mode.
    pub async fn switch(&self, mode: Mode) {
        if self.router.mode().await == Some(mode) {
            return;
        }
        let source: Arc<dyn Source> = match mode {
            Mode::Test => self.manual.clone(),
            Mode::Listen => self.listener.clone(),
        };
        self.router.bind(mode, source).await;
    }

    /// Runs commands until quit is requested. Once the input closes the player
    /// keeps running without an operator, so this only returns on quit.
    pub async fn run(&self, mut commands_rx: Receiver<Command>) {
        while let Some(command) = commands_rx.recv().await {
            if !self.execute(command).await {
                return;
            }
        }
        info!("No more operator input, running until stopped.");
        std::future::pending::<()>().await
    }

    /// Executes a command. Returns false if the console should stop.
    pub async fn execute(&self, command: Command) -> bool {
        info!(command = format!("{:?}", command), "Received command.");
        let engine = self.router.engine();

        match command {
            Command::Test(values) => {
                self.switch(Mode::Test).await;
                if let Err(e) = self.manual.inject(values).await {
                    error!(err = e.to_string(), "Unable to send test values");
                }
            }
            Command::Switch(mode) => self.switch(mode).await,
            Command::Nudge(id, delta) => match engine.nudge(id, delta).await {
                Some(position) => info!(output = %id, %position, "Output moved."),
                None => warn!(output = %id, "Output has no open surface to move"),
            },
            Command::Refresh => engine.refresh_all().await,
            Command::Enable(id) | Command::Disable(id) => {
                let enabled = matches!(command, Command::Enable(_));
                if let Err(e) = engine.set_enabled(id, enabled) {
                    error!(output = %id, err = e.to_string(), "Unable to change output");
                }
            }
            Command::Status => {
                let mode = self.router.mode().await;
                for (id, spec) in engine.outputs() {
                    match engine.snapshot(id).await {
                        Some(snapshot) => info!(
                            output = %id,
                            name = snapshot.name,
                            mode = ?mode,
                            select = snapshot.select,
                            dimmer = snapshot.dimmer,
                            channel_mode = snapshot.mode,
                            phase = %snapshot.phase,
                            media = ?snapshot.media,
                            "Output status"
                        ),
                        None => info!(output = %id, name = spec.name, "Output disabled"),
                    }
                }
            }
            Command::Quit => return false,
        }
        true
    }
}
