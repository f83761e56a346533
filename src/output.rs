use std::io::{self, Write};

use serde::Serialize;

use crate::app::{EnrichReport, ProgressEvent, ProgressSink, ResolveResult, RunReport};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_upsert(report: &RunReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_enrich(report: &EnrichReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_resolve(result: &ResolveResult) -> io::Result<()> {
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

pub struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => eprintln!("{} ({} ms)", event.message, elapsed.as_millis()),
            None => eprintln!("{}", event.message),
        }
    }
}
