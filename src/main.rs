#[macro_use]
extern crate log;

use std::env::consts::{ARCH, FAMILY, OS};
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};

use anyhow::Error;
use log::LevelFilter;
use simplelog::{
    ColorChoice, CombinedLogger, Config, ConfigBuilder, TermLogger, TerminalMode, WriteLogger,
};

use crate::program::Program;

mod canvas;
mod program;

/// Name of the log file written next to the binary.
const LOG_NAME: &str = "canvas_archiver.log";

/// Buffered writer behind the file logger. Flushed every 50 lines, so an
/// aborted run loses at most a screenful of log output. The logger
/// serializes writes, and the buffer flushes on drop.
struct BufferedFileWriter {
    inner: BufWriter<std::fs::File>,
    lines_since_flush: usize,
}

impl BufferedFileWriter {
    fn new() -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(LOG_NAME)?;

        Ok(Self {
            inner: BufWriter::with_capacity(64 * 1024, file),
            lines_since_flush: 0,
        })
    }
}

impl Write for BufferedFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let size = self.inner.write(buf)?;

        self.lines_since_flush += buf.iter().filter(|&&b| b == b'\n').count();
        if self.lines_since_flush >= 50 {
            self.inner.flush()?;
            self.lines_since_flush = 0;
        }

        Ok(size)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn main() -> Result<(), Error> {
    initialize_logger();
    log_system_information();

    let program = Program::new();
    program.run()
}

/// Initializes the logger with preset filtering and robust file handling.
fn initialize_logger() {
    // Keep the original terminal logger for console output
    let mut config = ConfigBuilder::new();
    config.add_filter_allow_str("canvas_archiver");

    // Use buffered file writer for better reliability and performance
    let buffered_file_writer = match BufferedFileWriter::new() {
        Ok(writer) => writer,
        Err(e) => {
            eprintln!(
                "Failed to create buffered file writer: {}. Logging will only output to terminal.",
                e
            );
            // Continue with only terminal logging
            let _ = TermLogger::init(
                LevelFilter::Info,
                Config::default(),
                TerminalMode::Mixed,
                ColorChoice::Auto,
            );
            return;
        }
    };

    if let Err(e) = CombinedLogger::init(vec![
        TermLogger::new(
            LevelFilter::Info,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ),
        WriteLogger::new(LevelFilter::max(), config.build(), buffered_file_writer),
    ]) {
        eprintln!(
            "Failed to initialize combined logger: {}. Falling back to terminal-only logging.",
            e
        );
        let _ = TermLogger::init(
            LevelFilter::Info,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        );
    }
}

/// Logs important information about the system being used.
fn log_system_information() {
    trace!("Printing system information out into log for debug purposes...");
    trace!("ARCH:   \"{}\"", ARCH);
    trace!("FAMILY: \"{}\"", FAMILY);
    trace!("OS:     \"{}\"", OS);
}
