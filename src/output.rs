use std::io::{self, Write};

use serde::Serialize;

use crate::app::{CountResult, DownloadResult, ProgressEvent, ProgressSink, TotalResult};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_download(result: &DownloadResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_count(result: &CountResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_total(result: &TotalResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Line-oriented progress on stderr for interactive runs.
pub struct TextOutput;

impl ProgressSink for TextOutput {
    fn event(&self, event: ProgressEvent) {
        let mut stderr = io::stderr().lock();
        let _ = match event.elapsed {
            Some(elapsed) => writeln!(
                stderr,
                "{} ({:.2} sec.)",
                event.message,
                elapsed.as_secs_f64()
            ),
            None => writeln!(stderr, "{}", event.message),
        };
    }
}
