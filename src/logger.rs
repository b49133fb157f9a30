// Copyright 2020 Peter Williams <peter@newton.cx> and collaborators
// Licensed under the MIT License.

//! The terminal logging backend.
//!
//! Library code only ever talks to the `log` facade. This backend renders each
//! record with a colored level tag: informational output goes to stdout and
//! everything else to stderr, so that warnings about skipped fields stand out
//! in CI logs.

use lazy_static::lazy_static;
use log::{Level, LevelFilter, Log};
use std::{
    io::{self, Write},
    sync::RwLock,
};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// The process-wide logger.
pub struct Logger {
    inner: RwLock<InnerLogger>,
    debug_cspec: ColorSpec,
    info_cspec: ColorSpec,
    warn_cspec: ColorSpec,
    error_cspec: ColorSpec,
    note_cspec: ColorSpec,
}

struct InnerLogger {
    stdout: StandardStream,
    stderr: StandardStream,
}

lazy_static! {
    static ref LOGGER: Logger = {
        let stdout = StandardStream::stdout(ColorChoice::Auto);
        let stderr = StandardStream::stderr(ColorChoice::Auto);
        let mut debug_cspec = ColorSpec::new();
        let mut info_cspec = ColorSpec::new();
        let mut warn_cspec = ColorSpec::new();
        let mut error_cspec = ColorSpec::new();
        let mut note_cspec = ColorSpec::new();

        debug_cspec.set_dimmed(true);
        info_cspec.set_fg(Some(Color::Green)).set_bold(true);
        warn_cspec.set_fg(Some(Color::Yellow)).set_bold(true);
        error_cspec.set_fg(Some(Color::Red)).set_bold(true);
        note_cspec.set_fg(Some(Color::Cyan)).set_bold(true);

        Logger {
            inner: RwLock::new(InnerLogger { stdout, stderr }),
            debug_cspec,
            info_cspec,
            warn_cspec,
            error_cspec,
            note_cspec,
        }
    };
}

impl Logger {
    /// Install this type as the global logger and set the maximum level.
    pub fn init(verbose: bool) -> Result<(), log::SetLoggerError> {
        log::set_logger(&*LOGGER)?;
        log::set_max_level(if verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        });
        Ok(())
    }

    /// Print one of the underlying causes of a fatal error, after the error
    /// itself has been logged.
    pub fn print_cause(cause: &dyn std::fmt::Display) {
        if let Ok(mut inner) = LOGGER.inner.write() {
            let _r = inner.stderr.set_color(&LOGGER.note_cspec);
            let _r = write!(&mut inner.stderr, "caused by:");
            let _r = inner.stderr.reset();
            let _r = writeln!(&mut inner.stderr, " {}", cause);
        }
    }
}

impl Log for Logger {
    fn enabled(&self, _: &log::Metadata) -> bool {
        // Filtering is left to `log::set_max_level()`.
        true
    }

    fn log(&self, record: &log::Record) {
        let (cspec, tag) = match record.level() {
            Level::Trace | Level::Debug => (&self.debug_cspec, "debug:"),
            Level::Info => (&self.info_cspec, "info:"),
            Level::Warn => (&self.warn_cspec, "warning:"),
            Level::Error => (&self.error_cspec, "error:"),
        };

        if let Ok(mut inner) = self.inner.write() {
            let stream = if record.level() == Level::Info {
                &mut inner.stdout
            } else {
                &mut inner.stderr
            };

            let _r = stream.set_color(cspec);
            let _r = write!(stream, "{}", tag);
            let _r = stream.reset();
            let _r = writeln!(stream, " {}", record.args());
        }
    }

    fn flush(&self) {
        let _r = io::stdout().flush();
        let _r = io::stderr().flush();
    }
}
