//! Desktop simulator for the fieldlog datalogger.
//!
//! Runs the fieldlog-core controller against a simulated board: synthetic
//! sensors, a clock that runs `--speedup` times faster than the host, an
//! EEPROM image file and log files in a host directory (or a FAT disk image
//! with `--sd-image`). Control input is read line by line from stdin.
//!
//! # Console commands
//!
//! | Command                       | Action                               |
//! |-------------------------------|--------------------------------------|
//! | `configure <type> <json>`     | Configure a sensor slot              |
//! | `clear <slot>`                | Erase a slot                         |
//! | `show [slot]` / `list`        | Print configuration as JSON          |
//! | `interval`, `bursts`, ...     | Change a device setting              |
//! | `site`, `note`, `value`       | Site name and per-record user fields |
//! | `calibrate <slot> <step> ...` | Run a calibration step               |
//! | `deploy` / `arm` / `debug`    | Change operating mode                |
//! | `exit`                        | Back to interactive mode             |
//! | `quit`                        | Quit                                 |
//!
//! `help` lists every command. Input while the logger sleeps wakes it, just
//! like serial activity on the real board.

mod console;
mod eeprom_file;
mod platform;
mod storage;

use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use anyhow::{Context, anyhow};
use clap::Parser;
use fieldlog_core::power::WakeLatch;
use fieldlog_core::storage::{LogStorage, SdCardLog};
use fieldlog_core::{Datalogger, DataloggerError, Mode};
use log::{error, info, warn};

use crate::console::Console;
use crate::eeprom_file::FileEeprom;
use crate::platform::SimPlatform;
use crate::storage::{DirectoryLog, HostTimeSource, ImageBlockDevice};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Host time between interactive passes.
const INTERACTIVE_TICK: Duration = Duration::from_millis(100);

/// The wake line shared by the console thread and the simulated board.
static WAKE_LATCH: WakeLatch = WakeLatch::new();

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(version, about = "Run the fieldlog datalogger on the desktop")]
struct Args {
    /// EEPROM image file, created on first write
    #[arg(long, default_value = "eeprom.bin")]
    eeprom: PathBuf,

    /// Directory that receives the DATA/ log tree
    #[arg(long, default_value = "sim-data", conflicts_with = "sd_image")]
    data_dir: PathBuf,

    /// FAT-formatted disk image to log to instead of a directory
    #[arg(long)]
    sd_image: Option<PathBuf>,

    /// How many times faster than real time the board clock runs
    #[arg(long, default_value_t = 60.0, value_parser = parse_speedup)]
    speedup: f64,

    /// Seed for synthetic signals and deployment ids
    #[arg(long)]
    seed: Option<u64>,
}

fn parse_speedup(text: &str) -> Result<f64, String> {
    match text.parse::<f64>() {
        Ok(factor) if factor.is_finite() && factor > 0.0 => Ok(factor),
        _ => Err(format!("'{}' is not a positive number", text)),
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    info!("Starting fieldlog simulator (speedup {}x)", args.speedup);

    let eeprom = FileEeprom::open(&args.eeprom)
        .with_context(|| format!("opening EEPROM image {}", args.eeprom.display()))?;
    info!("Configuration memory {}", eeprom.path().display());
    let platform = SimPlatform::new(args.speedup, args.seed, &WAKE_LATCH);
    let mut console = Console::spawn(&WAKE_LATCH).context("starting console reader")?;

    match &args.sd_image {
        Some(image) => {
            let device = ImageBlockDevice::open(image)
                .with_context(|| format!("opening SD card image {}", image.display()))?;
            simulate(eeprom, SdCardLog::new(device, HostTimeSource), platform, &mut console)
        }
        None => simulate(
            eeprom,
            DirectoryLog::new(&args.data_dir),
            platform,
            &mut console,
        ),
    }
}

fn simulate<L: LogStorage>(
    eeprom: FileEeprom,
    storage: L,
    platform: SimPlatform,
    console: &mut Console,
) -> anyhow::Result<()> {
    let mut logger =
        Datalogger::new(eeprom, storage, platform).map_err(|e| anyhow!("boot failed: {}", e))?;

    match logger.setup() {
        Ok(()) => {}
        // Nothing can be recorded without the medium: halt.
        Err(e @ DataloggerError::StorageUnavailable(_)) => {
            return Err(anyhow!("halting: {}", e));
        }
        Err(e) => warn!("Setup finished with an error: {}", e),
    }
    info!("Mode {}; type 'help' for commands", logger.mode().label());

    // -----------------------------------------------------------------------
    // Main loop
    // -----------------------------------------------------------------------
    'running: loop {
        if let Err(e) = logger.step(console) {
            warn!("{}", e);
        }
        if console.quit_requested() {
            break 'running;
        }

        // Interactive passes have no sleep of their own
        if logger.mode() == Mode::Interactive {
            thread::sleep(INTERACTIVE_TICK);
        }
    }

    if let Err(e) = logger.log_mut().close() {
        warn!("Closing the log failed: {}", e);
    }
    info!("Simulator exiting");
    Ok(())
}
