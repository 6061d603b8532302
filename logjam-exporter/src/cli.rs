use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use logjam_config::{Config, OverridableConfig};

use crate::setup;

/// Builds the command line interface of the exporter.
pub fn make_command() -> Command {
    Command::new("logjam-exporter")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Exports logjam request metrics to Prometheus.")
        .max_term_width(79)
        .arg(
            Arg::new("config")
                .long("config")
                .short('C')
                .value_name("DIR")
                .default_value(".")
                .help("The path to the config folder."),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .action(ArgAction::SetTrue)
                .help("Log collector lifecycle and throughput at info level."),
        )
        .arg(
            Arg::new("debug")
                .long("debug")
                .action(ArgAction::SetTrue)
                .help("Trace metrics dropped by the collectors."),
        )
        .arg(
            Arg::new("stats_interval")
                .long("stats-interval")
                .short('r')
                .value_name("SECONDS")
                .help("Seconds between two throughput reports."),
        )
        .arg(
            Arg::new("logjam_url")
                .long("logjam-url")
                .short('l')
                .value_name("URL")
                .env("LOGJAM_URL")
                .help("Base URL of the logjam server providing stream definitions."),
        )
        .arg(
            Arg::new("env")
                .long("env")
                .short('e')
                .value_name("ENVS")
                .env("LOGJAM_ENV")
                .help("Comma separated list of environments to process."),
        )
        .arg(
            Arg::new("datacenters")
                .long("datacenters")
                .short('D')
                .value_name("DCS")
                .env("LOGJAM_DATACENTERS")
                .help("Comma separated list of known datacenters."),
        )
        .arg(
            Arg::new("default_dc")
                .long("default-dc")
                .short('u')
                .value_name("DC")
                .env("LOGJAM_DATACENTER")
                .help("Datacenter of events whose host matches no known datacenter."),
        )
        .arg(
            Arg::new("parsers")
                .long("parsers")
                .short('P')
                .value_name("NUM")
                .help("Number of decoder threads."),
        )
        .arg(
            Arg::new("clean_after")
                .long("clean-after")
                .short('c')
                .value_name("MINUTES")
                .help("Minutes after which quiet actions are removed."),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .short('p')
                .value_name("PORT")
                .help("Port for scraping and ingestion."),
        )
        .arg(
            Arg::new("host")
                .long("host")
                .value_name("ADDR")
                .help("Address the HTTP server binds to."),
        )
        .arg(
            Arg::new("abort_after")
                .long("abort")
                .short('A')
                .value_name("SECONDS")
                .env("LOGJAM_ABORT_AFTER")
                .help("Abort after this many seconds without heartbeat. 0 disables."),
        )
        .arg(
            Arg::new("rcv_hwm")
                .long("rcv-hwm")
                .short('R')
                .value_name("NUM")
                .env("LOGJAM_RCV_HWM")
                .help("Number of messages queued before new ones are dropped."),
        )
        .arg(
            Arg::new("statsd")
                .long("statsd")
                .value_name("HOST:PORT")
                .env("LOGJAM_STATSD")
                .help("Send internal metrics to this statsd server."),
        )
        .arg(
            Arg::new("shutdown_timeout")
                .long("shutdown-timeout")
                .value_name("SECONDS")
                .help("Seconds to wait for a graceful shutdown."),
        )
}

/// Collects the overrides given on the command line or in the environment.
fn extract_overrides(matches: &ArgMatches) -> OverridableConfig {
    let value = |id: &str| matches.get_one::<String>(id).cloned();
    let flag = |id: &str| matches.get_flag(id).then(|| "true".to_owned());

    OverridableConfig {
        host: value("host"),
        port: value("port"),
        parsers: value("parsers"),
        rcv_hwm: value("rcv_hwm"),
        abort_after: value("abort_after"),
        stats_interval: value("stats_interval"),
        logjam_url: value("logjam_url"),
        env: value("env"),
        datacenters: value("datacenters"),
        default_dc: value("default_dc"),
        clean_after: value("clean_after"),
        verbose: flag("verbose"),
        debug: flag("debug"),
        statsd: value("statsd"),
        shutdown_timeout: value("shutdown_timeout"),
    }
}

/// Parses the command line, loads the config and runs the exporter.
pub fn execute() -> Result<()> {
    let matches = make_command().get_matches();

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or(".");

    let mut config = Config::from_path(config_path)
        .with_context(|| format!("failed to load config from {config_path}"))?;
    config
        .apply_override(extract_overrides(&matches))
        .context("invalid command line arguments")?;

    logjam_log::init(config.logging());
    setup::dump_spawn_infos(&config);
    setup::init_metrics(&config)?;

    logjam_server::run(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command() {
        make_command().debug_assert();
    }

    #[test]
    fn test_extract_overrides() {
        let matches = make_command()
            .try_get_matches_from([
                "logjam-exporter",
                "-v",
                "-p",
                "9000",
                "-D",
                "a,b",
                "--abort",
                "0",
            ])
            .unwrap();

        let overrides = extract_overrides(&matches);
        assert_eq!(overrides.verbose.as_deref(), Some("true"));
        assert_eq!(overrides.debug, None);
        assert_eq!(overrides.port.as_deref(), Some("9000"));
        assert_eq!(overrides.datacenters.as_deref(), Some("a,b"));
        assert_eq!(overrides.abort_after.as_deref(), Some("0"));
        assert_eq!(overrides.parsers, None);
    }

    #[test]
    fn test_rejects_positional_arguments() {
        let result = make_command().try_get_matches_from(["logjam-exporter", "extra"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_overrides_apply() {
        let matches = make_command()
            .try_get_matches_from(["logjam-exporter", "-P", "8", "-R", "10"])
            .unwrap();

        let mut config = Config::default();
        config.apply_override(extract_overrides(&matches)).unwrap();
        assert_eq!(config.parsers(), 8);
        assert_eq!(config.rcv_hwm(), 10);
    }
}
