#![allow(dead_code)]

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// A short `udisksctl monitor` session: one drive and one partition appear
pub const SESSION: &str = "\
Monitoring the udisks daemon. Press Ctrl+C to exit.
10:15:01.100: Added /org/freedesktop/UDisks2/drives/Acme_Stick_0001
  org.freedesktop.UDisks2.Drive:
    CanPowerOff:                true
    ConnectionBus:              usb
    Model:                      Stick
    Removable:                  true
    Vendor:                     Acme
10:15:01.200: Added /org/freedesktop/UDisks2/block_devices/sdz
  org.freedesktop.UDisks2.Block:
    Device:                     /dev/sdz
    Drive:                      '/org/freedesktop/UDisks2/drives/Acme_Stick_0001'
    IdType:
10:15:01.300: Added /org/freedesktop/UDisks2/block_devices/sdz1
  org.freedesktop.UDisks2.Block:
    Device:                     /dev/sdz1
    Drive:                      '/org/freedesktop/UDisks2/drives/Acme_Stick_0001'
    IdType:                     vfat
    IdUUID:                     1234-ABCD
";

/// The same devices going away again
pub const REMOVAL: &str = "\
10:20:00.000: Removed /org/freedesktop/UDisks2/block_devices/sdz1
10:20:00.001: Removed /org/freedesktop/UDisks2/block_devices/sdz
10:20:00.002: Removed /org/freedesktop/UDisks2/drives/Acme_Stick_0001
";

/// Scratch directory holding an empty config and monitor fixtures.
/// Every run gets `--config` so a real user config never leaks into tests.
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub config_path: PathBuf,
}

impl TestEnvironment {
    pub fn new() -> anyhow::Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, "")?;
        Ok(Self {
            temp_dir,
            config_path,
        })
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn write_config(&self, content: &str) -> anyhow::Result<()> {
        fs::write(&self.config_path, content)?;
        Ok(())
    }

    pub fn write_fixture(&self, name: &str, content: &str) -> anyhow::Result<PathBuf> {
        let path = self.path().join(name);
        fs::write(&path, content)?;
        Ok(path)
    }

    /// Monitor command replaying `fixture`
    pub fn cat_command(&self, fixture: &Path) -> String {
        format!("cat '{}'", fixture.display())
    }

    pub fn cmd(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::Command::cargo_bin("udmon").unwrap();
        cmd.env_remove("RUST_LOG")
            .arg("--config")
            .arg(&self.config_path);
        cmd
    }

    /// Start udmon in the background with captured output
    pub fn spawn(&self, args: &[&str]) -> anyhow::Result<RunningUdmon> {
        let child = Command::new(env!("CARGO_BIN_EXE_udmon"))
            .env_remove("RUST_LOG")
            .arg("--config")
            .arg(&self.config_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        Ok(RunningUdmon::new(child))
    }
}

/// A udmon process whose stdout is read line by line on a helper thread
pub struct RunningUdmon {
    child: Child,
    lines: Receiver<String>,
    seen: Vec<String>,
}

impl RunningUdmon {
    fn new(mut child: Child) -> Self {
        let (tx, lines) = mpsc::channel();
        if let Some(stdout) = child.stdout.take() {
            thread::spawn(move || {
                for line in BufReader::new(stdout).lines().map_while(Result::ok) {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            });
        }
        Self {
            child,
            lines,
            seen: Vec::new(),
        }
    }

    pub fn pid(&self) -> i32 {
        self.child.id() as i32
    }

    /// Wait until at least `count` stdout lines arrived in total
    pub fn wait_for_lines(&mut self, count: usize, timeout: Duration) -> anyhow::Result<&[String]> {
        let deadline = Instant::now() + timeout;
        while self.seen.len() < count {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.lines.recv_timeout(remaining) {
                Ok(line) => self.seen.push(line),
                Err(_) => anyhow::bail!(
                    "expected {} lines within {:?}, got {:?}",
                    count,
                    timeout,
                    self.seen
                ),
            }
        }
        Ok(&self.seen)
    }

    pub fn interrupt(&self) {
        unsafe {
            libc::kill(self.pid(), libc::SIGINT);
        }
    }

    /// Wait for exit, killing the process if it overstays `timeout`.
    /// Returns the status and every stdout line.
    pub fn finish(mut self, timeout: Duration) -> anyhow::Result<(ExitStatus, Vec<String>)> {
        let deadline = Instant::now() + timeout;
        let status = loop {
            if let Some(status) = self.child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = self.child.kill();
                let _ = self.child.wait();
                anyhow::bail!("udmon did not exit within {:?}", timeout);
            }
            thread::sleep(Duration::from_millis(20));
        };

        // The reader thread ends once the pipe closes
        while let Ok(line) = self.lines.recv_timeout(Duration::from_secs(2)) {
            self.seen.push(line);
        }
        Ok((status, std::mem::take(&mut self.seen)))
    }
}

impl Drop for RunningUdmon {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
