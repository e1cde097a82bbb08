//! CLI argument parsing and validation module
//!
//! Handles command-line interface using clap, including:
//! - Monitor command, shell and privilege options
//! - Event filters
//! - Output format selection (human/JSON)
//! - Restart policy
//! - Config file and log level

use anyhow::{Context, Result};
use clap::builder::PossibleValuesParser;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;

use crate::config::Configuration;
use crate::constants::{APP_NAME, LOG_LEVELS};

const VERSION: &str = concat!(env!("UDMON_BUILD_VERSION"), " (", env!("GIT_HASH"), ")");

/// Everything the binary needs for one run
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfiguration {
    /// File configuration with command-line overrides applied
    pub config: Configuration,
    /// Print the ready block devices when the monitor finishes
    pub list_on_exit: bool,
}

pub fn build_cli() -> Command {
    Command::new(APP_NAME)
        .version(VERSION)
        .about("Watch disks and block devices come and go")
        .long_about(
            "Runs `udisksctl monitor` under supervision and prints a typed event whenever a \
             disk appears or disappears, or a block device becomes ready for use.",
        )
        .arg(
            Arg::new("command")
                .short('c')
                .long("command")
                .value_name("CMD")
                .help("Monitor command to supervise [default: udisksctl monitor]"),
        )
        .arg(
            Arg::new("shell")
                .long("shell")
                .value_name("PATH")
                .help("Shell used to run the monitor command [default: /bin/bash]"),
        )
        .arg(
            Arg::new("privileged")
                .long("privileged")
                .help("Run the monitor through sudo in its own session")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("json")
                .short('j')
                .long("json")
                .help("Output one JSON object per event")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Only print events, no status messages")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("filter")
                .short('f')
                .long("filter")
                .value_name("GLOB")
                .help("Only show events whose object path or device path matches (repeatable)")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("restart")
                .long("restart")
                .help("Relaunch the monitor whenever it exits")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("restart-delay")
                .long("restart-delay")
                .value_name("MS")
                .help("Delay before relaunching, in milliseconds [default: 1000]")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("queue-capacity")
                .long("queue-capacity")
                .value_name("N")
                .help("Events buffered ahead of a slow stdout [default: 256]")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .help("Configuration file [default: ~/.config/udmon/config.toml]")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("Diagnostics written to stderr [default: info]")
                .value_parser(PossibleValuesParser::new(LOG_LEVELS.iter().copied())),
        )
        .arg(
            Arg::new("list-on-exit")
                .long("list-on-exit")
                .help("Print the ready block devices when the monitor finishes")
                .action(ArgAction::SetTrue),
        )
}

/// Parse command line arguments and return configuration
pub fn parse_args() -> Result<RunConfiguration> {
    from_matches(&build_cli().get_matches())
}

/// Load the configuration file and apply command-line overrides
pub fn from_matches(matches: &ArgMatches) -> Result<RunConfiguration> {
    let config_path = matches.get_one::<PathBuf>("config");
    let mut config = Configuration::load(config_path.map(PathBuf::as_path))?;

    if let Some(command) = matches.get_one::<String>("command") {
        config.monitor.command = command.clone();
    }
    if let Some(shell) = matches.get_one::<String>("shell") {
        config.monitor.shell = shell.clone();
    }
    if matches.get_flag("privileged") {
        config.monitor.privileged = true;
    }
    if matches.get_flag("restart") {
        config.monitor.restart = true;
    }
    if let Some(delay) = matches.get_one::<u64>("restart-delay") {
        config.monitor.restart_delay_ms = *delay;
    }

    if matches.get_flag("json") {
        config.output.json = true;
    }
    if matches.get_flag("quiet") {
        config.output.quiet = true;
    }
    if let Some(filters) = matches.get_many::<String>("filter") {
        config.output.filters = filters.cloned().collect();
    }
    if let Some(capacity) = matches.get_one::<usize>("queue-capacity") {
        config.output.queue_capacity = *capacity;
    }

    if let Some(level) = matches.get_one::<String>("log-level") {
        config.logging.level = level.clone();
    }

    config.validate().context("Invalid arguments")?;

    Ok(RunConfiguration {
        config,
        list_on_exit: matches.get_flag("list-on-exit"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn parse(args: &[&str]) -> Result<RunConfiguration> {
        let matches = build_cli().try_get_matches_from(args.iter().copied())?;
        from_matches(&matches)
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        build_cli().debug_assert();
    }

    #[test]
    fn test_overrides_applied_on_top_of_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[monitor]\ncommand = \"cat fixture\"\nrestart_delay_ms = 50\n\n[output]\nfilters = [\"/dev/sd*\"]\n",
        )
        .unwrap();

        let run = parse(&[
            "udmon",
            "--config",
            path.to_str().unwrap(),
            "--json",
            "--filter",
            "/dev/nvme*",
            "--filter",
            "/dev/vd*",
            "--log-level",
            "debug",
            "--list-on-exit",
        ])
        .unwrap();

        assert_eq!(run.config.monitor.command, "cat fixture");
        assert_eq!(run.config.monitor.restart_delay_ms, 50);
        assert!(run.config.output.json);
        assert_eq!(run.config.output.filters, vec!["/dev/nvme*", "/dev/vd*"]);
        assert_eq!(run.config.logging.level, "debug");
        assert!(run.list_on_exit);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.toml");
        fs::write(&path, "").unwrap();
        let config = path.to_str().unwrap();

        assert!(parse(&["udmon", "--config", config, "--queue-capacity", "0"]).is_err());
        assert!(parse(&["udmon", "--config", config, "--filter", "/dev/sd["]).is_err());
        assert!(parse(&["udmon", "--config", config, "--log-level", "loud"]).is_err());
        assert!(parse(&["udmon", "--config", config, "--command", ""]).is_err());
    }
}
