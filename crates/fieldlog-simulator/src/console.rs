//! The line console: a text control channel on stdin.
//!
//! A reader thread forwards every line to the controller and raises the
//! manual wake line, the same way serial activity wakes the real logger.
//! Lines are parsed into [`Command`]s and run against the controller's
//! [`CommandSurface`] whenever it polls.

use std::collections::VecDeque;
use std::io::{self, BufRead};
use std::str::FromStr;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread;

use fieldlog_core::power::{WakeLatch, WakeSource};
use fieldlog_core::{CommandSurface, ControlChannel, DataloggerError};
use log::{debug, info};
use thiserror::Error;

pub const HELP: &str = "\
commands:
  configure <type> <json>      configure a slot (generic_analog, dht22, sht4x, driver_template)
  clear <slot>                 erase a slot
  show [slot]                  device configuration, or one slot
  list                         every sensor configuration
  interval <minutes>           time between measurement cycles
  bursts <n>                   bursts per measurement cycle (1-20)
  start-up-delay <ms>          settle time after waking
  inter-burst-delay <s>        pause between bursts (0-300)
  site <name>                  site name, up to 8 of A-Z 0-9 _ -
  note <text>                  user note written in every record
  value <integer>              user value written in every record
  calibrate <slot> <step> ...  calibration step (init, low, high, store, ...)
  deploy                       start a deployment and begin logging
  arm                          deploy on the next wake
  debug                        bench logging every 5 s
  exit                         back to interactive mode
  start-logging | stop-logging log a line on every interactive pass
  mode                         current mode
  quit                         stop the simulator";

/// One parsed console line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    Help,
    Configure { sensor_type: &'a str, json: &'a str },
    Clear(u8),
    Show(Option<u8>),
    List,
    Interval(u16),
    Bursts(u8),
    StartUpDelay(u16),
    InterBurstDelay(u16),
    Site(&'a str),
    Note(&'a str),
    Value(i32),
    Calibrate {
        slot: u8,
        step: &'a str,
        args: Vec<&'a str>,
    },
    Deploy,
    Arm,
    Debug,
    Exit,
    StartLogging,
    StopLogging,
    Mode,
    Quit,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command '{0}', try 'help'")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("'{0}' is not a valid number")]
    Number(String),
}

/// Splits off the first word and returns it with the trimmed remainder.
fn next_word(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    match text.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (text, ""),
    }
}

fn number<T: FromStr>(word: &str, usage: &'static str) -> Result<T, CommandError> {
    if word.is_empty() {
        return Err(CommandError::Usage(usage));
    }
    word.parse()
        .map_err(|_| CommandError::Number(word.to_string()))
}

pub fn parse(line: &str) -> Result<Command<'_>, CommandError> {
    let (name, rest) = next_word(line);
    let command = match name {
        "help" | "?" => Command::Help,
        "configure" => {
            let (sensor_type, json) = next_word(rest);
            if sensor_type.is_empty() || json.is_empty() {
                return Err(CommandError::Usage("configure <type> <json>"));
            }
            Command::Configure { sensor_type, json }
        }
        "clear" => Command::Clear(number(rest, "clear <slot>")?),
        "show" if rest.is_empty() => Command::Show(None),
        "show" => Command::Show(Some(number(rest, "show [slot]")?)),
        "list" => Command::List,
        "interval" => Command::Interval(number(rest, "interval <minutes>")?),
        "bursts" => Command::Bursts(number(rest, "bursts <n>")?),
        "start-up-delay" => Command::StartUpDelay(number(rest, "start-up-delay <ms>")?),
        "inter-burst-delay" => Command::InterBurstDelay(number(rest, "inter-burst-delay <s>")?),
        "site" => Command::Site(rest),
        "note" => Command::Note(rest),
        "value" => Command::Value(number(rest, "value <integer>")?),
        "calibrate" => {
            const USAGE: &str = "calibrate <slot> <step> [args...]";
            let (slot, rest) = next_word(rest);
            let (step, rest) = next_word(rest);
            if step.is_empty() {
                return Err(CommandError::Usage(USAGE));
            }
            Command::Calibrate {
                slot: number(slot, USAGE)?,
                step,
                args: rest.split_whitespace().collect(),
            }
        }
        "deploy" => Command::Deploy,
        "arm" => Command::Arm,
        "debug" => Command::Debug,
        "exit" => Command::Exit,
        "start-logging" => Command::StartLogging,
        "stop-logging" => Command::StopLogging,
        "mode" => Command::Mode,
        "quit" => Command::Quit,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(command)
}

/// Runs a command. `Some` carries text to show instead of a bare `OK`.
pub fn execute(
    command: Command<'_>,
    surface: &mut dyn CommandSurface,
) -> Result<Option<String>, DataloggerError> {
    match command {
        Command::Help => return Ok(Some(HELP.to_string())),
        Command::Configure { sensor_type, json } => {
            surface.set_sensor_configuration(sensor_type, json)?
        }
        Command::Clear(slot) => surface.clear_slot(slot)?,
        Command::Show(None) => return Ok(Some(format!("{:#}", surface.configuration()))),
        Command::Show(Some(slot)) => {
            return Ok(Some(format!("{:#}", surface.sensor_configuration(slot)?)));
        }
        Command::List => {
            let list = serde_json::Value::Array(surface.sensor_configurations());
            return Ok(Some(format!("{:#}", list)));
        }
        Command::Interval(minutes) => surface.set_interval(minutes)?,
        Command::Bursts(bursts) => surface.set_burst_number(bursts)?,
        Command::StartUpDelay(millis) => surface.set_start_up_delay(millis)?,
        Command::InterBurstDelay(seconds) => surface.set_inter_burst_delay(seconds)?,
        Command::Site(name) => surface.set_site_name(name)?,
        Command::Note(note) => surface.set_user_note(note)?,
        Command::Value(value) => surface.set_user_value(value),
        Command::Calibrate { slot, step, args } => surface.calibrate(slot, step, &args)?,
        Command::Deploy => surface.deploy()?,
        Command::Arm => surface.arm_deploy_on_trigger()?,
        Command::Debug => surface.enter_debugging()?,
        Command::Exit => surface.enter_interactive()?,
        Command::StartLogging => surface.start_logging(),
        Command::StopLogging => surface.stop_logging(),
        Command::Mode => return Ok(Some(surface.mode().label().to_string())),
        // The console acts on quit before a command reaches the surface.
        Command::Quit => {}
    }
    Ok(None)
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

pub struct Console {
    lines: Receiver<String>,
    queued: VecDeque<String>,
    latch: &'static WakeLatch,
    quit: bool,
    closed: bool,
}

impl Console {
    /// Starts the stdin reader thread.
    pub fn spawn(latch: &'static WakeLatch) -> io::Result<Self> {
        let (sender, lines) = mpsc::channel();
        thread::Builder::new()
            .name("console".into())
            .spawn(move || forward_lines(io::stdin().lock(), &sender, latch))?;
        Ok(Self::new(lines, latch))
    }

    pub fn new(lines: Receiver<String>, latch: &'static WakeLatch) -> Self {
        Self {
            lines,
            queued: VecDeque::new(),
            latch,
            quit: false,
            closed: false,
        }
    }

    pub fn quit_requested(&self) -> bool {
        self.quit
    }

    /// Runs one line and returns the reply.
    pub fn handle(&mut self, line: &str, surface: &mut dyn CommandSurface) -> String {
        match parse(line) {
            Ok(Command::Quit) => {
                self.quit = true;
                "bye".to_string()
            }
            Ok(command) => match execute(command, surface) {
                Ok(Some(text)) => text,
                Ok(None) => "OK".to_string(),
                Err(e) => format!("ERROR: {}", e),
            },
            Err(e) => format!("ERROR: {}", e),
        }
    }

    /// Moves everything the reader thread has sent into the queue.
    fn fill(&mut self) {
        loop {
            match self.lines.try_recv() {
                Ok(line) => self.queued.push_back(line),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.closed {
                        info!("Console input closed");
                        self.closed = true;
                    }
                    break;
                }
            }
        }
    }
}

impl ControlChannel for Console {
    fn input_pending(&mut self) -> bool {
        self.fill();
        !self.queued.is_empty()
    }

    fn poll(&mut self, surface: &mut dyn CommandSurface) {
        // Acknowledge the wake before draining so a line arriving now wakes
        // the next sleep.
        self.latch.clear();
        self.fill();
        while let Some(line) = self.queued.pop_front() {
            if line.trim().is_empty() {
                continue;
            }
            debug!("Console: {}", line);
            let reply = self.handle(&line, surface);
            println!("{}", reply);
        }
    }
}

/// Reader thread body: forwards lines until end of input.
fn forward_lines(input: impl BufRead, sender: &Sender<String>, latch: &WakeLatch) {
    for line in input.lines() {
        let Ok(line) = line else { break };
        if sender.send(line).is_err() {
            break;
        }
        latch.record(WakeSource::ManualWake);
    }
}
