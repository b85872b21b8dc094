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
use std::io;

use tokio::{
    sync::{mpsc::Sender, watch},
    task::JoinHandle,
};
use tracing::{info, span, warn, Level};

use crate::{
    engine::{RenderState, UiEvent},
    session::{GenerationConfig, Scale},
};

const HELP: &str = "Commands: play, stop, list, grid, add <text>, text <id> <text>, \
weight <id> <weight>, remove <id>, step <track> <step>, seq <weight>, bpm <bpm|auto>, \
scale <scale|auto>, temperature <value>, guidance <value>, density <value|auto>, \
brightness <value|auto>, quit";

/// A parsed line of input.
#[derive(Debug, PartialEq)]
enum Command {
    Send(UiEvent),
    List,
    Grid,
    Help,
    Quit,
}

/// A controller that drives the engine from the keyboard.
pub struct Driver {
    render_rx: watch::Receiver<RenderState>,
    settings: GenerationConfig,
}

impl Driver {
    /// Creates a keyboard driver. Settings commands edit a copy of the given settings.
    pub fn new(render_rx: watch::Receiver<RenderState>, settings: GenerationConfig) -> Driver {
        Driver {
            render_rx,
            settings,
        }
    }

    /// Handles one line of input. Returns false once there is nothing more to read.
    fn monitor_io<R, W>(
        events_tx: &Sender<UiEvent>,
        render_rx: &watch::Receiver<RenderState>,
        settings: &mut GenerationConfig,
        mut reader: R,
        mut writer: W,
    ) -> Result<bool, io::Error>
    where
        R: io::BufRead,
        W: io::Write,
    {
        write!(writer, "> ")?;
        writer.flush()?;
        let mut input = String::default();
        if reader.read_line(&mut input)? == 0 {
            Self::send(events_tx, UiEvent::Shutdown)?;
            return Ok(false);
        }

        let command = match parse_command(&input, settings) {
            Ok(Some(command)) => command,
            Ok(None) => return Ok(true),
            Err(message) => {
                warn!(input = input.trim(), "Unrecognized input");
                writeln!(writer, "{}", message)?;
                return Ok(true);
            }
        };

        match command {
            Command::Send(event) => Self::send(events_tx, event)?,
            Command::List => {
                let render = render_rx.borrow();
                for prompt in render.prompts.iter() {
                    let filtered = if render.filtered.contains(&prompt.text) {
                        " (filtered)"
                    } else {
                        ""
                    };
                    writeln!(
                        writer,
                        "{:>10} {:.2} {}{}",
                        prompt.id, prompt.weight, prompt.text, filtered
                    )?;
                }
                writeln!(writer, "[{}]", render.state)?;
            }
            Command::Grid => {
                let render = render_rx.borrow();
                write!(writer, "{}", render.grid.render(render.playhead))?;
                writeln!(writer, "weight {:.2}", render.sequencer_weight)?;
            }
            Command::Help => writeln!(writer, "{}", HELP)?,
            Command::Quit => {
                Self::send(events_tx, UiEvent::Shutdown)?;
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn send(events_tx: &Sender<UiEvent>, event: UiEvent) -> Result<(), io::Error> {
        events_tx
            .blocking_send(event)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }
}

impl super::Driver for Driver {
    fn monitor_events(&self, events_tx: Sender<UiEvent>) -> JoinHandle<Result<(), io::Error>> {
        let render_rx = self.render_rx.clone();
        let mut settings = self.settings.clone();
        tokio::task::spawn_blocking(move || {
            let span = span!(Level::INFO, "keyboard driver");
            let _enter = span.enter();

            info!("Keyboard driver started.");
            println!("{}", HELP);

            while Self::monitor_io(
                &events_tx,
                &render_rx,
                &mut settings,
                io::stdin().lock(),
                io::stdout(),
            )? {}
            Ok(())
        })
    }
}

/// Prompt ids may be given without their prefix.
fn prompt_id(id: &str) -> String {
    if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) {
        format!("prompt-{}", id)
    } else {
        id.to_string()
    }
}

fn parse_number<T: std::str::FromStr>(value: &str, name: &str) -> Result<T, String> {
    value
        .trim()
        .parse()
        .map_err(|_| format!("{} must be a number, got {:?}", name, value.trim()))
}

/// Parses an optional value where "auto" leaves the choice to the model.
fn parse_auto<T: std::str::FromStr>(value: &str, name: &str) -> Result<Option<T>, String> {
    if value.trim().eq_ignore_ascii_case("auto") {
        return Ok(None);
    }
    parse_number(value, name).map(Some)
}

fn parse_scale(value: &str) -> Result<Option<Scale>, String> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("auto") {
        return Ok(None);
    }
    serde_json::from_value(serde_json::Value::String(value.to_uppercase()))
        .map(Some)
        .map_err(|_| format!("unknown scale {:?}", value))
}

/// Parses a line of input. Settings commands are applied to `settings` only if the result is in
/// range.
fn parse_command(input: &str, settings: &mut GenerationConfig) -> Result<Option<Command>, String> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(None);
    }
    let (command, rest) = input.split_once(char::is_whitespace).unwrap_or((input, ""));
    let rest = rest.trim();
    let missing = || format!("{} needs more arguments", command);

    let mut updated = settings.clone();
    let event = match command.to_lowercase().as_str() {
        "play" => UiEvent::PlayPause,
        "stop" => UiEvent::Stop,
        "list" => return Ok(Some(Command::List)),
        "grid" => return Ok(Some(Command::Grid)),
        "help" => return Ok(Some(Command::Help)),
        "quit" => return Ok(Some(Command::Quit)),
        "add" if !rest.is_empty() => UiEvent::PromptAdded {
            text: rest.to_string(),
            color: String::new(),
        },
        "text" => {
            let (id, text) = rest.split_once(char::is_whitespace).ok_or_else(missing)?;
            UiEvent::PromptChanged {
                id: prompt_id(id),
                text: Some(text.trim().to_string()),
                weight: None,
            }
        }
        "weight" => {
            let (id, weight) = rest.split_once(char::is_whitespace).ok_or_else(missing)?;
            UiEvent::PromptChanged {
                id: prompt_id(id),
                text: None,
                weight: Some(parse_number(weight, "weight")?),
            }
        }
        "remove" if !rest.is_empty() => UiEvent::PromptRemoved { id: prompt_id(rest) },
        "step" => {
            let (track, step) = rest.split_once(char::is_whitespace).ok_or_else(missing)?;
            UiEvent::SequencerStepToggled {
                track: parse_number(track, "track")?,
                step: parse_number(step, "step")?,
            }
        }
        "seq" if !rest.is_empty() => UiEvent::SequencerWeightChanged(parse_number(rest, "weight")?),
        "bpm" if !rest.is_empty() => {
            updated.bpm = parse_auto(rest, "bpm")?;
            UiEvent::SettingsChanged(updated.clone())
        }
        "scale" if !rest.is_empty() => {
            updated.scale = parse_scale(rest)?;
            UiEvent::SettingsChanged(updated.clone())
        }
        "temperature" if !rest.is_empty() => {
            updated.temperature = parse_number(rest, "temperature")?;
            UiEvent::SettingsChanged(updated.clone())
        }
        "guidance" if !rest.is_empty() => {
            updated.guidance = parse_number(rest, "guidance")?;
            UiEvent::SettingsChanged(updated.clone())
        }
        "density" if !rest.is_empty() => {
            updated.density = parse_auto(rest, "density")?;
            UiEvent::SettingsChanged(updated.clone())
        }
        "brightness" if !rest.is_empty() => {
            updated.brightness = parse_auto(rest, "brightness")?;
            UiEvent::SettingsChanged(updated.clone())
        }
        "add" | "remove" | "seq" | "bpm" | "scale" | "temperature" | "guidance" | "density"
        | "brightness" => return Err(missing()),
        _ => return Err(format!("unknown command {:?}; {}", command, HELP)),
    };

    if let UiEvent::SettingsChanged(config) = &event {
        config.validate().map_err(|e| e.to_string())?;
        *settings = updated;
    }
    Ok(Some(Command::Send(event)))
}
