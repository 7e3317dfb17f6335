use std::io::{self, Write};

use serde::Serialize;

use crate::app::{EventLevel, ImportResult, ProgressEvent, ProgressSink};

pub const WARNING_MARKER: &str = "****  BIDS IMPORTATION WARNING:";

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

/// Machine-readable output: progress is dropped, the result is printed as JSON.
pub struct JsonOutput;

impl JsonOutput {
    pub fn print_import(result: &ImportResult) -> io::Result<()> {
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

/// Line-oriented progress on stdout for interactive runs.
pub struct ConsoleOutput;

impl ConsoleOutput {
    pub fn format_event(event: &ProgressEvent) -> String {
        let mut line = match event.level {
            EventLevel::Warning => format!("{WARNING_MARKER} {}", event.message),
            EventLevel::Info => event.message.clone(),
        };
        if let Some(elapsed) = event.elapsed {
            line.push_str(&format!(" ({:.1}s)", elapsed.as_secs_f64()));
        }
        line
    }
}

impl ProgressSink for ConsoleOutput {
    fn event(&self, event: ProgressEvent) {
        println!("{}", Self::format_event(&event));
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn warnings_carry_the_marker() {
        let line = ConsoleOutput::format_event(&ProgressEvent::warning("no recorded events"));
        assert_eq!(line, "****  BIDS IMPORTATION WARNING: no recorded events");
    }

    #[test]
    fn elapsed_time_is_appended() {
        let event = ProgressEvent {
            message: "phase=Convert; 2 series converted".to_string(),
            level: EventLevel::Info,
            elapsed: Some(Duration::from_millis(1500)),
        };
        assert_eq!(
            ConsoleOutput::format_event(&event),
            "phase=Convert; 2 series converted (1.5s)"
        );
    }
}
