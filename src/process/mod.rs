//! Supervised shell processes
//!
//! Launches a command through a shell that first echoes its own pid, then
//! drains stdout and stderr on two dedicated threads while a third thread
//! waits for the process to exit. `join` returns only once all three have
//! finished.

use log::{debug, error};
use std::io::{BufRead, BufReader};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;

use crate::constants::{
    DEFAULT_SHELL, INTERRUPTED_EXIT_CODE, PID_SENTINEL_PREFIX, PRIVILEGE_PREFIX,
    SESSION_DETACH_PREFIX,
};
use crate::models::ProcessError;

/// How a command is wrapped when launched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    /// Shell executed with `-c`
    pub shell: String,
    /// Run through `sudo setsid` so the elevated process outlives its parent
    pub privileged: bool,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            shell: DEFAULT_SHELL.to_string(),
            privileged: false,
        }
    }
}

/// Receives lines as they are read instead of having them buffered.
///
/// Callbacks run on the drain threads; `on_finishing` runs exactly once,
/// on whichever worker completes last, and returns before `join` does.
pub trait ProcessListener: Send + Sync {
    fn on_output_line(&self, line: &str);
    fn on_error_line(&self, line: &str);
    fn on_finishing(&self, _exit_code: i32) {}
}

/// Build the argv used to launch `command`
pub fn command_line(command: &str, options: &LaunchOptions) -> Vec<String> {
    let mut argv = Vec::with_capacity(5);
    if options.privileged {
        argv.push(PRIVILEGE_PREFIX.to_string());
        argv.push(SESSION_DETACH_PREFIX.to_string());
    }
    argv.push(options.shell.clone());
    argv.push("-c".to_string());
    argv.push(format!("{}{}", PID_SENTINEL_PREFIX, command));
    argv
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Output,
    Errors,
}

impl Stream {
    fn name(self) -> &'static str {
        match self {
            Stream::Output => "output",
            Stream::Errors => "errors",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    Drained(Stream),
    Exited(i32),
}

#[derive(Debug, Default)]
struct Completion {
    exit_code: Option<i32>,
    exited: bool,
    output_drained: bool,
    errors_drained: bool,
    finishing: bool,
    finished: bool,
}

impl Completion {
    fn all_signalled(&self) -> bool {
        self.exited && self.output_drained && self.errors_drained
    }

    /// All three workers are done and `on_finishing` has returned
    fn is_finished(&self) -> bool {
        self.finished
    }
}

struct Shared {
    command: String,
    output: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
    completion: Mutex<Completion>,
    completed: Condvar,
    listener: Option<Arc<dyn ProcessListener>>,
}

impl Shared {
    fn new(command: &str, listener: Option<Arc<dyn ProcessListener>>) -> Self {
        Self {
            command: command.to_string(),
            output: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            completion: Mutex::new(Completion::default()),
            completed: Condvar::new(),
            listener,
        }
    }

    fn deliver(&self, stream: Stream, line: String) {
        match (&self.listener, stream) {
            (Some(listener), Stream::Output) => listener.on_output_line(&line),
            (Some(listener), Stream::Errors) => listener.on_error_line(&line),
            (None, Stream::Output) => relock(&self.output).push(line),
            (None, Stream::Errors) => relock(&self.errors).push(line),
        }
    }

    fn complete(&self, stage: Stage) {
        let finished_with = {
            let mut completion = relock(&self.completion);
            match stage {
                Stage::Drained(Stream::Output) => completion.output_drained = true,
                Stage::Drained(Stream::Errors) => completion.errors_drained = true,
                Stage::Exited(code) => {
                    completion.exit_code = Some(code);
                    completion.exited = true;
                }
            }

            if completion.all_signalled() && !completion.finishing {
                completion.finishing = true;
                Some(completion.exit_code.unwrap_or(INTERRUPTED_EXIT_CODE))
            } else {
                None
            }
        };

        let Some(code) = finished_with else {
            return;
        };

        if let Some(listener) = &self.listener {
            if catch_unwind(AssertUnwindSafe(|| listener.on_finishing(code))).is_err() {
                error!("finishing callback for '{}' panicked", self.command);
            }
        }

        relock(&self.completion).finished = true;
        self.completed.notify_all();
    }
}

/// Sets a completion flag when dropped, so a worker that panics still
/// releases anyone blocked in `join`.
struct CompletionGuard {
    shared: Arc<Shared>,
    stage: Stage,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.shared.complete(self.stage);
    }
}

fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A running (or finished) shell command with its pid, output and exit code
pub struct SupervisedProcess {
    pid: u32,
    privileged: bool,
    shared: Arc<Shared>,
}

impl SupervisedProcess {
    /// Launch `command` and buffer its output
    pub fn launch(command: &str, options: &LaunchOptions) -> Result<Self, ProcessError> {
        Self::launch_with_listener(command, options, None)
    }

    /// Launch `command`, forwarding every line to `listener` when one is given
    pub fn launch_with_listener(
        command: &str,
        options: &LaunchOptions,
        listener: Option<Arc<dyn ProcessListener>>,
    ) -> Result<Self, ProcessError> {
        let argv = command_line(command, options);
        let spawn_error = |source| ProcessError::Spawn {
            command: command.to_string(),
            source,
        };

        let mut launcher = Command::new(&argv[0]);
        launcher
            .args(&argv[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // `setsid` already makes the elevated shell a group leader
        if !options.privileged {
            launcher.process_group(0);
        }
        let mut child = launcher.spawn().map_err(spawn_error)?;

        // The command never expects input
        drop(child.stdin.take());

        let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => (stdout, stderr),
            _ => {
                reap(&mut child);
                return Err(spawn_error(std::io::Error::other("output pipes not captured")));
            }
        };

        let mut stdout = BufReader::new(stdout);
        let pid = match read_pid(&mut stdout, command) {
            Ok(pid) => pid,
            Err(e) => {
                reap(&mut child);
                return Err(e);
            }
        };
        debug!("launched '{}' with pid={}", command, pid);

        let shared = Arc::new(Shared::new(command, listener));

        let drains = spawn_worker(&shared, format!("udmon-out-{}", pid), Stage::Drained(Stream::Output), {
            let shared = shared.clone();
            move || drain(&shared, stdout, Stream::Output)
        })
        .and_then(|()| {
            spawn_worker(&shared, format!("udmon-err-{}", pid), Stage::Drained(Stream::Errors), {
                let shared = shared.clone();
                move || drain(&shared, BufReader::new(stderr), Stream::Errors)
            })
        });
        if let Err(e) = drains {
            reap(&mut child);
            return Err(spawn_error(e));
        }

        // The watcher owns the child handle; it reports the exit code itself
        let watcher_shared = shared.clone();
        thread::Builder::new()
            .name(format!("udmon-wait-{}", pid))
            .spawn(move || {
                let code = match child.wait() {
                    Ok(status) => exit_code_of(status),
                    Err(e) => {
                        error!("unable to wait for '{}': {}", watcher_shared.command, e);
                        INTERRUPTED_EXIT_CODE
                    }
                };
                watcher_shared.complete(Stage::Exited(code));
            })
            .map_err(spawn_error)?;

        Ok(Self {
            pid,
            privileged: options.privileged,
            shared,
        })
    }

    /// Pid reported by the shell's sentinel line
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn command(&self) -> &str {
        &self.shared.command
    }

    pub fn is_privileged(&self) -> bool {
        self.privileged
    }

    /// Block until the process has exited and both streams are drained
    pub fn join(&self) -> Result<i32, ProcessError> {
        let completion = self
            .shared
            .completion
            .lock()
            .map_err(|_| ProcessError::Interrupted)?;
        let completion = self
            .shared
            .completed
            .wait_while(completion, |c| !c.is_finished())
            .map_err(|_| ProcessError::Interrupted)?;
        Ok(completion.exit_code.unwrap_or(INTERRUPTED_EXIT_CODE))
    }

    /// Like `join`, but gives up after `timeout` and returns `None`
    pub fn join_timeout(&self, timeout: Duration) -> Result<Option<i32>, ProcessError> {
        let completion = self
            .shared
            .completion
            .lock()
            .map_err(|_| ProcessError::Interrupted)?;
        let (completion, _) = self
            .shared
            .completed
            .wait_timeout_while(completion, timeout, |c| !c.is_finished())
            .map_err(|_| ProcessError::Interrupted)?;

        if completion.is_finished() {
            Ok(Some(completion.exit_code.unwrap_or(INTERRUPTED_EXIT_CODE)))
        } else {
            Ok(None)
        }
    }

    pub fn is_finished(&self) -> bool {
        relock(&self.shared.completion).is_finished()
    }

    /// Exit code, once the process has exited
    pub fn exit_code(&self) -> Option<i32> {
        let completion = relock(&self.shared.completion);
        completion.exited.then_some(completion.exit_code).flatten()
    }

    /// Lines read from stdout so far (empty when a listener is attached)
    pub fn output_lines(&self) -> Vec<String> {
        relock(&self.shared.output).clone()
    }

    /// Lines read from stderr so far (empty when a listener is attached)
    pub fn error_lines(&self) -> Vec<String> {
        relock(&self.shared.errors).clone()
    }

    /// Send SIGTERM to the shell's process group.
    ///
    /// The shell leads its own group, so children it forked (pipelines,
    /// commands that are not exec'd) are signalled too. Once every holder of
    /// the pipes is gone the drain workers finish and `join` returns. A
    /// privileged process usually cannot be signalled by an unprivileged
    /// parent and yields `ProcessError::Signal`.
    pub fn terminate(&self) -> Result<(), ProcessError> {
        if relock(&self.shared.completion).is_finished() {
            return Ok(());
        }

        let raw = i32::try_from(self.pid).map_err(|_| ProcessError::Signal {
            pid: self.pid,
            source: Errno::EINVAL,
        })?;

        match killpg(Pid::from_raw(raw), Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(source) => Err(ProcessError::Signal {
                pid: self.pid,
                source,
            }),
        }
    }
}

fn spawn_worker<F>(
    shared: &Arc<Shared>,
    name: String,
    stage: Stage,
    work: F,
) -> std::io::Result<()>
where
    F: FnOnce() + Send + 'static,
{
    let guard = CompletionGuard {
        shared: shared.clone(),
        stage,
    };
    thread::Builder::new().name(name).spawn(move || {
        let _guard = guard;
        work();
    })?;
    Ok(())
}

fn drain<R: BufRead>(shared: &Shared, mut reader: R, stream: Stream) {
    loop {
        match read_line_lossy(&mut reader) {
            Ok(Some(line)) => shared.deliver(stream, line),
            Ok(None) => break,
            Err(e) => {
                error!(
                    "unable to read the {} of the process '{}': {}",
                    stream.name(),
                    shared.command,
                    e
                );
                break;
            }
        }
    }
}

fn read_pid<R: BufRead>(reader: &mut R, command: &str) -> Result<u32, ProcessError> {
    let line = read_line_lossy(reader)
        .map_err(|source| ProcessError::Spawn {
            command: command.to_string(),
            source,
        })?
        .ok_or_else(|| ProcessError::MissingPid(command.to_string()))?;

    let candidate = line.trim();
    candidate
        .parse::<u32>()
        .map_err(|_| ProcessError::InvalidPid(candidate.to_string()))
}

/// Read one line, stripping the terminator and replacing invalid UTF-8
pub(crate) fn read_line_lossy<R: BufRead>(reader: &mut R) -> std::io::Result<Option<String>> {
    let mut buf = Vec::new();
    if reader.read_until(b'\n', &mut buf)? == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

/// Shell convention: death by signal N is reported as 128 + N
fn exit_code_of(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signo| 128 + signo))
        .unwrap_or(INTERRUPTED_EXIT_CODE)
}

fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}
