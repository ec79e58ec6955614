//! The report a harness process writes to stdout, and the caller's parser for it.
//!
//! The harness first prints a text report:
//!
//! ```text
//! PASS
//! events: 120
//! duration: 45.3s
//! ```
//!
//! or
//!
//! ```text
//! FAIL
//! invariant: slot_double_booked
//! event_index: 37
//! error: slot 4 claimed by bk-a while held by bk-b
//! forensic: {"slot":4}
//! ```
//!
//! followed by a single JSON line encoding the same [HarnessOutcome]. Exit codes are 0 for PASS,
//! 1 for FAIL and anything else for an infrastructure failure.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum HarnessOutcome {
    Success {
        events: u64,
        /// Seconds.
        duration: f64,
    },
    Failure {
        invariant: String,
        event_index: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        forensic: Option<Value>,
    },
    InfraError {
        message: String,
    },
}

impl HarnessOutcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            HarnessOutcome::Success { .. } => 0,
            HarnessOutcome::Failure { .. } => 1,
            HarnessOutcome::InfraError { .. } => 2,
        }
    }

    pub fn render_text(&self) -> String {
        match self {
            HarnessOutcome::Success { events, duration } => {
                format!("PASS\nevents: {events}\nduration: {duration:.1}s")
            }
            HarnessOutcome::Failure {
                invariant,
                event_index,
                error,
                forensic,
            } => {
                let mut out = format!("FAIL\ninvariant: {invariant}\nevent_index: {event_index}");
                if let Some(error) = error {
                    out.push_str(&format!("\nerror: {}", single_line(error)));
                }
                if let Some(forensic) = forensic {
                    out.push_str(&format!("\nforensic: {forensic}"));
                }
                out
            }
            HarnessOutcome::InfraError { message } => {
                format!("ERROR\nerror: {}", single_line(message))
            }
        }
    }

    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"kind":"infraError","message":"unencodable outcome: {e}"}}"#)
        })
    }
}

fn single_line(s: &str) -> String {
    s.lines().map(str::trim).collect::<Vec<_>>().join(" ")
}

/// What the caller learns from a finished harness process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events_executed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_invariant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_event_index: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forensic: Option<Value>,
}

impl From<HarnessOutcome> for ParsedOutcome {
    fn from(outcome: HarnessOutcome) -> Self {
        match outcome {
            HarnessOutcome::Success { events, duration } => ParsedOutcome {
                success: true,
                events_executed: Some(events),
                duration_seconds: Some(duration),
                ..Default::default()
            },
            HarnessOutcome::Failure {
                invariant,
                event_index,
                error,
                forensic,
            } => ParsedOutcome {
                success: false,
                failed_invariant: Some(invariant),
                failed_event_index: Some(event_index),
                error,
                forensic,
                ..Default::default()
            },
            HarnessOutcome::InfraError { message } => ParsedOutcome {
                success: false,
                error: Some(message),
                ..Default::default()
            },
        }
    }
}

/// The harness did not produce a test verdict. This is never a defect of the system under test.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HarnessError {
    #[error("Harness infrastructure failure (exit code {exit_code:?}): {message}")]
    Infrastructure {
        exit_code: Option<i32>,
        message: String,
    },
}

/// Interpret the stdout and exit code of a harness process.
///
/// The structured JSON line is preferred; output from harnesses that only print the text report
/// is parsed from the text. Exit codes other than 0 and 1, or a report that disagrees with the
/// exit code, are infrastructure failures.
pub fn parse_harness_output(
    stdout: &str,
    exit_code: Option<i32>,
) -> Result<ParsedOutcome, HarnessError> {
    let structured = stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .find_map(|line| serde_json::from_str::<HarnessOutcome>(line).ok());

    let passed = match exit_code {
        Some(0) => true,
        Some(1) => false,
        other => {
            let message = match structured {
                Some(HarnessOutcome::InfraError { message }) => message,
                _ => tail(stdout),
            };
            return Err(HarnessError::Infrastructure {
                exit_code: other,
                message,
            });
        }
    };

    let parsed = match structured {
        Some(outcome @ (HarnessOutcome::Success { .. } | HarnessOutcome::Failure { .. })) => {
            ParsedOutcome::from(outcome)
        }
        Some(HarnessOutcome::InfraError { message }) => {
            return Err(HarnessError::Infrastructure { exit_code, message })
        }
        None => parse_text(stdout, exit_code)?,
    };

    if parsed.success != passed {
        return Err(HarnessError::Infrastructure {
            exit_code,
            message: format!(
                "harness reported {} but exited with {exit_code:?}",
                if parsed.success { "PASS" } else { "FAIL" }
            ),
        });
    }
    Ok(parsed)
}

fn parse_text(stdout: &str, exit_code: Option<i32>) -> Result<ParsedOutcome, HarnessError> {
    let mut lines = stdout.lines().map(str::trim).filter(|l| !l.is_empty());

    let mut parsed = match lines.next() {
        Some("PASS") => ParsedOutcome {
            success: true,
            ..Default::default()
        },
        Some("FAIL") => ParsedOutcome::default(),
        _ => {
            return Err(HarnessError::Infrastructure {
                exit_code,
                message: format!("unrecognised harness report: {}", tail(stdout)),
            })
        }
    };

    for line in lines {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "events" => parsed.events_executed = value.parse().ok(),
            "duration" => {
                parsed.duration_seconds = value.trim_end_matches('s').trim().parse().ok()
            }
            "invariant" => parsed.failed_invariant = Some(value.to_string()),
            "event_index" => parsed.failed_event_index = value.parse().ok(),
            "error" => parsed.error = Some(value.to_string()),
            "forensic" => {
                let forensic = serde_json::from_str(value)
                    .unwrap_or_else(|_| Value::String(value.to_string()));
                parsed.forensic = Some(forensic);
            }
            _ => {}
        }
    }

    Ok(parsed)
}

fn tail(stdout: &str) -> String {
    let lines: Vec<&str> = stdout.lines().collect();
    let start = lines.len().saturating_sub(5);
    let tail = lines[start..].join("\n");
    if tail.trim().is_empty() {
        "no output".to_string()
    } else {
        tail
    }
}
