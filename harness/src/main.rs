use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::Parser;
use simcity_harness::{execute, HarnessCli, HarnessOutcome};

fn main() -> ExitCode {
    env_logger::init();

    let cli = match HarnessCli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            let _ = e.print();
            return report(HarnessOutcome::InfraError {
                message: e.to_string(),
            });
        }
    };

    let outcome = match execute(cli) {
        Ok(report) => report.outcome,
        Err(e) => {
            log::error!("Harness could not run: {e:?}");
            HarnessOutcome::InfraError {
                message: format!("{e:#}"),
            }
        }
    };

    report(outcome)
}

fn report(outcome: HarnessOutcome) -> ExitCode {
    println!("{}", outcome.render_text());
    println!("{}", outcome.to_json_line());
    ExitCode::from(outcome.exit_code())
}
