use std::cmp::min;
use std::fmt::Write;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressState, ProgressStyle};
use simcity_core::prelude::DelegatedShutdownListener;
use simcity_telemetry::Telemetry;

/// Displays a progress bar on stderr while the run is going, showing how long is left and how
/// much of the event budget has been used.
pub(crate) fn start_progress(
    planned_runtime: Duration,
    telemetry: std::sync::Arc<Telemetry>,
    max_events: u64,
    mut shutdown_listener: DelegatedShutdownListener,
) -> anyhow::Result<std::thread::JoinHandle<()>> {
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{wide_bar:.cyan/blue}] [{elapsed_precise} / {planned_runtime}] {msg}",
    )?
    .with_key("planned_runtime", {
        let hours = planned_runtime.as_secs() / 3600;
        let minutes = (planned_runtime.as_secs() % 3600) / 60;
        let seconds = planned_runtime.as_secs() % 60;
        move |_state: &ProgressState, w: &mut dyn Write| {
            let _ = write!(w, "{hours:02}:{minutes:02}:{seconds:02}");
        }
    })
    .progress_chars("#>-");

    let handle = std::thread::Builder::new()
        .name("progress".to_string())
        .spawn(move || {
            let start_time = Instant::now();
            let pb = ProgressBar::new(planned_runtime.as_secs());
            pb.set_style(style);

            loop {
                let new = min(start_time.elapsed().as_secs(), planned_runtime.as_secs());
                pb.set_position(new);
                pb.set_message(format!(
                    "{}/{max_events} events",
                    telemetry.agent_event_count()
                ));

                if shutdown_listener.sleep_unless_shutdown(Duration::from_secs(1)) {
                    log::trace!("Progress thread shutting down");
                    pb.finish_and_clear();
                    break;
                }
            }
        })?;

    Ok(handle)
}
