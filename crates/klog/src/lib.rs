//! Kernel logging backend.
//!
//! Kernel subsystems log through the `log` facade. This crate is the
//! facade's backend: it formats each record with a coloured level tag and
//! hands the line to a console sink (the serial port on hardware, a capture
//! buffer under test).
#![cfg_attr(not(test), no_std)]

use core::fmt;

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::Once;

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => " INFO",
            Level::Warn => " WARN",
            Level::Error => "ERROR",
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            Level::Trace => "\x1b[90m", // Gray
            Level::Debug => "\x1b[36m", // Cyan
            Level::Info => "\x1b[32m",  // Green
            Level::Warn => "\x1b[33m",  // Yellow
            Level::Error => "\x1b[31m", // Red
        }
    }
}

impl From<log::Level> for Level {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Trace => Level::Trace,
            log::Level::Debug => Level::Debug,
            log::Level::Info => Level::Info,
            log::Level::Warn => Level::Warn,
            log::Level::Error => Level::Error,
        }
    }
}

/// Where formatted lines go. Called once per record, newline included.
pub type Sink = fn(fmt::Arguments<'_>);

/// Logger settings fixed at `init` time.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Records above this level are discarded before formatting.
    pub level: LevelFilter,
    /// Wrap the level tag in ANSI colour escapes.
    pub ansi: bool,
}

impl Config {
    pub const fn new() -> Self {
        Self {
            level: LevelFilter::Info,
            ansi: true,
        }
    }

    pub const fn level(mut self, level: LevelFilter) -> Self {
        self.level = level;
        self
    }

    pub const fn ansi(mut self, ansi: bool) -> Self {
        self.ansi = ansi;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

struct KernelLogger {
    output: Once<(Sink, Config)>,
}

static LOGGER: KernelLogger = KernelLogger { output: Once::new() };

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        match self.output.get() {
            Some((_, config)) => metadata.level() <= config.level,
            None => false,
        }
    }

    fn log(&self, record: &Record<'_>) {
        let Some((sink, config)) = self.output.get() else {
            return;
        };
        if record.level() > config.level {
            return;
        }
        let level = Level::from(record.level());
        if config.ansi {
            sink(format_args!(
                "{}[{}]\x1b[0m {}: {}\n",
                level.color(),
                level.as_str(),
                record.target(),
                record.args()
            ));
        } else {
            sink(format_args!(
                "[{}] {}: {}\n",
                level.as_str(),
                record.target(),
                record.args()
            ));
        }
    }

    fn flush(&self) {}
}

/// Install the kernel logger.
///
/// The first call wins; the sink and config of later calls are ignored and
/// `log::set_logger` reports the conflict.
pub fn init(sink: Sink, config: Config) -> Result<(), SetLoggerError> {
    LOGGER.output.call_once(|| (sink, config));
    log::set_logger(&LOGGER)?;
    log::set_max_level(config.level);
    Ok(())
}

/// Print to the console sink without a level tag. Dropped before `init`.
pub fn print(args: fmt::Arguments<'_>) {
    if let Some((sink, _)) = LOGGER.output.get() {
        sink(args);
    }
}
