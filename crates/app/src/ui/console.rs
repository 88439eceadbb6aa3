//! Line-oriented console front end.
//!
//! A reader thread turns stdin lines into [`ConsoleCommand`]s and forwards
//! them to the UI event loop; all state changes happen on the UI thread.

use std::{
    io::{self, BufRead},
    thread,
};

use crossbeam_channel::Sender;
use tracing::debug;

use crate::{telemetry, ui::UiEvent};

pub(crate) const HELP: &str = "\
commands:
  calibrate                     start calibration (show the marker to the camera)
  capture                       capture the marker and continue
  measure <distance> <lpi> <ior> marker distance, lenticule density, index of refraction
  density <green-red-distance>  distance between the green and red lines
  load <path>                   load a 3D object in the renderer
  track on|off                  toggle head tracking updates
  status                        print calibration and link state
  help                          show this list
  quit                          exit";

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum ConsoleCommand {
    Calibrate,
    Capture,
    Measure {
        distance: String,
        density: String,
        ior: String,
    },
    Density(String),
    Load(String),
    Track(bool),
    Status,
    Help,
    Quit,
}

/// Parse one input line. Blank lines yield `Ok(None)`.
///
/// Numeric arguments are passed through as text; the wizard validates them so
/// it can name the offending field.
pub(crate) fn parse_command(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let mut args = rest.split_whitespace().map(str::to_string);

    let command = match word.to_ascii_lowercase().as_str() {
        "calibrate" | "start" => ConsoleCommand::Calibrate,
        "capture" => ConsoleCommand::Capture,
        "measure" => ConsoleCommand::Measure {
            distance: args.next().unwrap_or_default(),
            density: args.next().unwrap_or_default(),
            ior: args.next().unwrap_or_default(),
        },
        "density" => ConsoleCommand::Density(args.next().unwrap_or_default()),
        "load" => ConsoleCommand::Load(rest.to_string()),
        "track" => match rest.to_ascii_lowercase().as_str() {
            "on" => ConsoleCommand::Track(true),
            "off" => ConsoleCommand::Track(false),
            other => return Err(format!("expected `track on` or `track off`, got {other:?}")),
        },
        "status" => ConsoleCommand::Status,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => return Err(format!("unknown command {other:?}; type `help`")),
    };
    Ok(Some(command))
}

/// Forward stdin lines to the UI loop until input closes or the loop exits.
pub(crate) fn spawn_stdin_reader(events: Sender<UiEvent>) -> io::Result<thread::JoinHandle<()>> {
    telemetry::spawn_thread("console-input", move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let event = match line {
                Ok(line) => match parse_command(&line) {
                    Ok(Some(command)) => UiEvent::Command(command),
                    Ok(None) => continue,
                    Err(message) => UiEvent::Rejected(message),
                },
                Err(err) => {
                    debug!("stdin read failed: {err}");
                    break;
                }
            };
            if events.send(event).is_err() {
                return;
            }
        }
        let _ = events.send(UiEvent::InputClosed);
    })
}
