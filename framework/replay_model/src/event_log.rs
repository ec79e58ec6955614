use std::io::{BufRead, Write};
use std::path::Path;

use anyhow::Context;
use simcity_telemetry::TelemetryEvent;

/// Serialize events to a writer, one JSON object per line.
pub fn store_events<W: Write>(events: &[TelemetryEvent], writer: &mut W) -> anyhow::Result<()> {
    for event in events {
        serde_json::to_writer(&mut *writer, event)?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}

/// Replace the file at `path` with the given events. The recommended extension is `.jsonl`.
pub fn write_event_log(path: &Path, events: &[TelemetryEvent]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let mut file = std::io::BufWriter::new(
        std::fs::File::create(path)
            .with_context(|| format!("Failed to create event log {}", path.display()))?,
    );
    store_events(events, &mut file)?;
    file.flush()?;
    Ok(())
}

/// Append events to the file at `path`, creating it if needed.
pub fn append_events(path: &Path, events: &[TelemetryEvent]) -> anyhow::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .with_context(|| format!("Failed to open event log {}", path.display()))?;
    store_events(events, &mut file)
}

/// Load an event log written by [write_event_log] or [append_events]. Blank lines are skipped.
pub fn load_event_log(path: &Path) -> anyhow::Result<Vec<TelemetryEvent>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open event log {}", path.display()))?;
    let reader = std::io::BufReader::new(file);

    let mut events = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event: TelemetryEvent = serde_json::from_str(&line).with_context(|| {
            format!("Invalid event on line {} of {}", number + 1, path.display())
        })?;
        events.push(event);
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use simcity_telemetry::{EventType, Telemetry};

    #[test]
    fn append_extends_an_existing_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("events.jsonl");

        let telemetry = Telemetry::new();
        let at = chrono::Utc::now();
        telemetry.log(EventType::AgentSpawn, at, serde_json::json!({"agentId": "c-0"}));
        telemetry.log(EventType::Cancel, at, serde_json::json!({"bookingId": "b"}));
        let events = telemetry.events();

        write_event_log(&path, &events[..1]).unwrap();
        append_events(&path, &events[1..]).unwrap();

        assert_eq!(load_event_log(&path).unwrap(), events);
    }

    #[test]
    fn bad_lines_are_reported_with_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        std::fs::write(&path, "\n{\"not\": \"an event\"}\n").unwrap();

        let err = load_event_log(&path).unwrap_err();
        assert!(format!("{err:#}").contains("line 2"));
    }
}
