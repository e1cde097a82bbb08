//! Supervised `udisksctl monitor`
//!
//! Owns the monitor process and its parser. Every line from stdout is
//! applied under a single mutex; resulting events are published after the
//! lock is released, in the order their lines arrived. When the process
//! finishes, all open records are discarded without removal events.

use log::error;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::constants::DEFAULT_MONITOR_COMMAND;
use crate::logging;
use crate::models::{BlockDeviceInfo, DiskInfo, ProcessError};
use crate::monitor::parser::DeviceEventParser;
use crate::monitor::sink::EventSink;
use crate::process::{LaunchOptions, ProcessListener, SupervisedProcess};

/// What to run and how
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSettings {
    pub command: String,
    pub launch: LaunchOptions,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            command: DEFAULT_MONITOR_COMMAND.to_string(),
            launch: LaunchOptions::default(),
        }
    }
}

struct MonitorState {
    parser: Mutex<DeviceEventParser>,
    sink: Arc<dyn EventSink>,
}

impl MonitorState {
    fn parser(&self) -> MutexGuard<'_, DeviceEventParser> {
        self.parser.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ProcessListener for MonitorState {
    fn on_output_line(&self, line: &str) {
        let events = self.parser().feed(line);
        for event in events {
            logging::log_event_published(&event);
            self.sink.publish(event);
        }
    }

    fn on_error_line(&self, line: &str) {
        error!("monitor error: {}", line);
    }

    fn on_finishing(&self, exit_code: i32) {
        self.parser().reset();
        logging::log_monitor_finished(exit_code);
    }
}

/// A running monitor publishing device events to a sink
pub struct UdisksMonitor {
    process: SupervisedProcess,
    state: Arc<MonitorState>,
}

impl UdisksMonitor {
    /// Launch the monitor command; events start flowing to `sink` immediately.
    ///
    /// Launch failures are returned as-is; relaunching is up to the caller.
    pub fn launch(settings: &MonitorSettings, sink: Arc<dyn EventSink>) -> Result<Self, ProcessError> {
        let state = Arc::new(MonitorState {
            parser: Mutex::new(DeviceEventParser::new()),
            sink,
        });

        let listener: Arc<dyn ProcessListener> = state.clone();
        let process =
            SupervisedProcess::launch_with_listener(&settings.command, &settings.launch, Some(listener))?;
        logging::log_monitor_launched(process.pid(), process.command(), process.is_privileged());

        Ok(Self { process, state })
    }

    /// Call `f` for every ready block device.
    ///
    /// The records are copied under the parser lock and `f` runs after it is
    /// released, so `f` may query the monitor again.
    pub fn enumerate_ready_block_devices<F>(&self, f: F)
    where
        F: FnMut(&BlockDeviceInfo),
    {
        self.ready_block_devices().iter().for_each(f);
    }

    /// Snapshot of the ready block devices
    pub fn ready_block_devices(&self) -> Vec<BlockDeviceInfo> {
        let mut ready = Vec::new();
        self.state
            .parser()
            .enumerate_ready_block_devices(|b| ready.push(b.clone()));
        ready
    }

    /// Disks currently tracked, complete or not
    pub fn known_disks(&self) -> Vec<DiskInfo> {
        self.state.parser().disks().cloned().collect()
    }

    pub fn pid(&self) -> u32 {
        self.process.pid()
    }

    pub fn command(&self) -> &str {
        self.process.command()
    }

    pub fn is_finished(&self) -> bool {
        self.process.is_finished()
    }

    /// Block until the monitor exits and its output is fully processed
    pub fn join(&self) -> Result<i32, ProcessError> {
        self.process.join()
    }

    pub fn join_timeout(&self, timeout: Duration) -> Result<Option<i32>, ProcessError> {
        self.process.join_timeout(timeout)
    }

    /// Ask the monitor process to exit
    pub fn terminate(&self) -> Result<(), ProcessError> {
        self.process.terminate()
    }
}
