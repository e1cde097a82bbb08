#![forbid(unsafe_code)]

use anyhow::{bail, Context, Result};
use log::{error, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use udmon::cli::{self, RunConfiguration};
use udmon::constants::{SHUTDOWN_GRACE_MS, SIGNAL_POLL_INTERVAL_MS};
use udmon::filters::EventFilter;
use udmon::logging;
use udmon::monitor::{EventSink, MonitorSettings, QueuedSink, UdisksMonitor};
use udmon::output::{self, EventPrinter, OutputFormat};

enum MonitorExit {
    Finished(i32),
    Interrupted,
}

fn main() -> Result<()> {
    let run = cli::parse_args()?;
    logging::init(&run.config.logging.level)?;

    // Set up interrupt handling
    let interrupted = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, interrupted.clone())
        .context("Failed to register SIGINT handler")?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, interrupted.clone())
        .context("Failed to register SIGTERM handler")?;

    let format = if run.config.output.json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };
    let filter = EventFilter::new(&run.config.output.filters)?;
    let printer: Arc<dyn EventSink> = Arc::new(EventPrinter::new(std::io::stdout(), format, filter));
    let sink = Arc::new(
        QueuedSink::new(printer, run.config.output.queue_capacity)
            .context("Failed to start the event dispatcher")?,
    );

    let outcome = supervise(&run, format, sink.clone(), &interrupted);

    // Flush queued events before reporting the outcome
    sink.close();
    outcome
}

/// Run the monitor, relaunching it when asked to, until it stops or we are interrupted
fn supervise(
    run: &RunConfiguration,
    format: OutputFormat,
    sink: Arc<QueuedSink>,
    interrupted: &AtomicBool,
) -> Result<()> {
    let settings = run.config.monitor_settings();
    let restart = run.config.monitor.restart;

    loop {
        let monitor = match UdisksMonitor::launch(&settings, sink.clone()) {
            Ok(monitor) => monitor,
            Err(e) if restart => {
                error!("Failed to launch '{}': {}", settings.command, e);
                if !sleep_unless_interrupted(run.config.restart_delay(), interrupted) {
                    return Ok(());
                }
                continue;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to launch '{}'", settings.command))
            }
        };

        if !run.config.output.quiet {
            eprintln!(
                "Monitoring '{}' (pid {}). Press Ctrl+C to exit.",
                monitor.command(),
                monitor.pid()
            );
        }

        match wait_for_exit(&monitor, interrupted)? {
            MonitorExit::Interrupted => {
                if run.list_on_exit {
                    // Queued events go out first; later ones are dropped
                    sink.close();
                    print_snapshot(&monitor, format)?;
                }
                stop(&monitor, &settings);
                logging::log_shutdown("interrupted");
                return Ok(());
            }
            MonitorExit::Finished(code) if restart => {
                if code != 0 {
                    warn!("Monitor exited with code {}, relaunching", code);
                }
                if !sleep_unless_interrupted(run.config.restart_delay(), interrupted) {
                    logging::log_shutdown("interrupted");
                    return Ok(());
                }
            }
            MonitorExit::Finished(0) => return Ok(()),
            MonitorExit::Finished(code) => {
                bail!("Monitor '{}' exited with code {}", settings.command, code)
            }
        }
    }
}

fn wait_for_exit(monitor: &UdisksMonitor, interrupted: &AtomicBool) -> Result<MonitorExit> {
    let poll = Duration::from_millis(SIGNAL_POLL_INTERVAL_MS);
    loop {
        if let Some(code) = monitor.join_timeout(poll)? {
            // The monitor may end on its own while a signal is being handled
            if interrupted.load(Ordering::Relaxed) {
                return Ok(MonitorExit::Interrupted);
            }
            return Ok(MonitorExit::Finished(code));
        }
        if interrupted.load(Ordering::Relaxed) {
            return Ok(MonitorExit::Interrupted);
        }
    }
}

fn stop(monitor: &UdisksMonitor, settings: &MonitorSettings) {
    if let Err(e) = monitor.terminate() {
        warn!("Unable to stop '{}': {}", settings.command, e);
        return;
    }

    match monitor.join_timeout(Duration::from_millis(SHUTDOWN_GRACE_MS)) {
        Ok(Some(_)) => {}
        Ok(None) => warn!(
            "Monitor (pid {}) did not exit within {}ms",
            monitor.pid(),
            SHUTDOWN_GRACE_MS
        ),
        Err(e) => warn!("Unable to wait for the monitor: {}", e),
    }
}

fn print_snapshot(monitor: &UdisksMonitor, format: OutputFormat) -> Result<()> {
    let devices = monitor.ready_block_devices();
    match format {
        OutputFormat::Human => println!("{}", output::format_snapshot_human(&devices)),
        OutputFormat::Json => println!("{}", output::format_snapshot_json(&devices)?),
    }
    Ok(())
}

/// Returns false if interrupted before the delay elapsed
fn sleep_unless_interrupted(delay: Duration, interrupted: &AtomicBool) -> bool {
    let deadline = Instant::now() + delay;
    let poll = Duration::from_millis(SIGNAL_POLL_INTERVAL_MS);
    while !interrupted.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep(poll.min(deadline - now));
    }
    false
}
