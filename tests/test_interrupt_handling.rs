//! Signal handling and relaunch behaviour of the binary

mod helpers;

use helpers::{TestEnvironment, SESSION};
use serde_json::Value;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(15);

#[test]
fn test_sigint_stops_monitor_and_exits_cleanly() {
    let env = TestEnvironment::new().unwrap();
    let fixture = env.write_fixture("session.txt", SESSION).unwrap();
    let command = format!("{}; sleep 60", env.cat_command(&fixture));

    let mut udmon = env
        .spawn(&["--json", "--quiet", "--command", &command])
        .unwrap();
    udmon.wait_for_lines(2, TIMEOUT).unwrap();

    udmon.interrupt();
    let (status, lines) = udmon.finish(TIMEOUT).unwrap();
    assert!(status.success(), "udmon exited with {:?}", status);
    assert_eq!(lines.len(), 2);
}

#[test]
fn test_list_on_exit_prints_ready_devices() {
    let env = TestEnvironment::new().unwrap();
    let fixture = env.write_fixture("session.txt", SESSION).unwrap();
    let command = format!("{}; sleep 60", env.cat_command(&fixture));

    let mut udmon = env
        .spawn(&["--json", "--quiet", "--list-on-exit", "--command", &command])
        .unwrap();
    udmon.wait_for_lines(2, TIMEOUT).unwrap();

    udmon.interrupt();
    let (status, lines) = udmon.finish(TIMEOUT).unwrap();
    assert!(status.success());

    // Two event lines followed by a pretty-printed snapshot array
    let snapshot: Value = serde_json::from_str(&lines[2..].join("\n")).unwrap();
    let devices = snapshot.as_array().unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0]["devicePath"], "/dev/sdz1");
    assert_eq!(devices[0]["fsType"], "vfat");
}

#[test]
fn test_snapshot_follows_every_event_it_lists() {
    let env = TestEnvironment::new().unwrap();
    let mut session = String::new();
    for n in 0..100 {
        session.push_str(&format!(
            "10:00:00.000: Added /org/freedesktop/UDisks2/block_devices/p{n}\n\
             Device: /dev/p{n}\n\
             Drive: '/org/freedesktop/UDisks2/drives/D'\n\
             IdType: ext4\n"
        ));
    }
    let fixture = env.write_fixture("session.txt", &session).unwrap();
    let command = format!("{}; sleep 60", env.cat_command(&fixture));

    let mut udmon = env
        .spawn(&[
            "--json",
            "--quiet",
            "--list-on-exit",
            "--queue-capacity",
            "1",
            "--command",
            &command,
        ])
        .unwrap();
    udmon.wait_for_lines(1, TIMEOUT).unwrap();

    udmon.interrupt();
    let (status, lines) = udmon.finish(TIMEOUT).unwrap();
    assert!(status.success());

    let split = lines
        .iter()
        .position(|line| line.starts_with('['))
        .expect("snapshot printed");
    let printed: Vec<String> = lines[..split]
        .iter()
        .map(|line| {
            let event: Value = serde_json::from_str(line).unwrap();
            event["devicePath"].as_str().unwrap().to_string()
        })
        .collect();

    let snapshot: Value = serde_json::from_str(&lines[split..].join("\n")).unwrap();
    for device in snapshot.as_array().unwrap() {
        let path = device["devicePath"].as_str().unwrap();
        assert!(printed.iter().any(|p| p == path), "{} listed before its event", path);
    }
}

#[test]
fn test_restart_relaunches_until_interrupted() {
    let env = TestEnvironment::new().unwrap();
    let fixture = env.write_fixture("session.txt", SESSION).unwrap();
    let command = env.cat_command(&fixture);

    let mut udmon = env
        .spawn(&[
            "--json",
            "--quiet",
            "--filter",
            "*/drives/*",
            "--restart",
            "--restart-delay",
            "50",
            "--command",
            &command,
        ])
        .unwrap();

    // Each run of the session announces the drive again
    let lines = udmon.wait_for_lines(3, TIMEOUT).unwrap().to_vec();
    for line in &lines {
        let event: Value = serde_json::from_str(line).unwrap();
        assert_eq!(event["event"], "disk-added");
    }

    udmon.interrupt();
    let (status, _) = udmon.finish(TIMEOUT).unwrap();
    assert!(status.success());
}

#[test]
fn test_restart_survives_failing_monitor() {
    let env = TestEnvironment::new().unwrap();
    let marker = env.path().join("runs");
    let fixture = env.write_fixture("session.txt", SESSION).unwrap();
    // Fail on the first run, replay the session afterwards
    let command = format!(
        "if [ -e '{marker}' ]; then {cat}; else touch '{marker}'; exit 3; fi",
        marker = marker.display(),
        cat = env.cat_command(&fixture)
    );

    let mut udmon = env
        .spawn(&[
            "--json",
            "--quiet",
            "--restart",
            "--restart-delay",
            "50",
            "--command",
            &command,
        ])
        .unwrap();
    udmon.wait_for_lines(2, TIMEOUT).unwrap();

    udmon.interrupt();
    let (status, _) = udmon.finish(TIMEOUT).unwrap();
    assert!(status.success());
}
