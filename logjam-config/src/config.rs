use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use logjam_log::{LogConfig, LogLevel};
use logjam_metrics::{Options, Resources, StreamFilter};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Defines the source of a config error.
#[derive(Debug, Default)]
enum ConfigErrorSource {
    /// An error occurring independently.
    #[default]
    None,
    /// An error originating from a configuration file.
    File(PathBuf),
    /// An error originating in a field override (an env var, or a CLI parameter).
    FieldOverride(String),
}

impl fmt::Display for ConfigErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigErrorSource::None => Ok(()),
            ConfigErrorSource::File(file_name) => write!(f, " (file {})", file_name.display()),
            ConfigErrorSource::FieldOverride(name) => write!(f, " (field {name})"),
        }
    }
}

/// Indicates config related errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigErrorKind {
    /// Failed to open the file.
    #[error("could not open config file")]
    CouldNotOpenFile,
    /// Failed to serialize the configuration.
    #[error("could not serialize config")]
    CouldNotSerialize,
    /// Parsing YAML failed.
    #[error("could not parse yaml config file")]
    BadYaml,
    /// Invalid config value.
    #[error("invalid config value")]
    InvalidValue,
}

/// Indicates config related errors.
#[derive(Debug)]
pub struct ConfigError {
    kind: ConfigErrorKind,
    source: ConfigErrorSource,
    inner: Option<BoxError>,
}

impl ConfigError {
    #[inline]
    fn new(kind: ConfigErrorKind) -> Self {
        Self {
            kind,
            source: ConfigErrorSource::None,
            inner: None,
        }
    }

    #[inline]
    fn wrap<E>(inner: E, kind: ConfigErrorKind) -> Self
    where
        E: Into<BoxError>,
    {
        Self {
            inner: Some(inner.into()),
            ..Self::new(kind)
        }
    }

    #[inline]
    fn for_field<E>(inner: E, field: &'static str) -> Self
    where
        E: Into<BoxError>,
    {
        Self::wrap(inner, ConfigErrorKind::InvalidValue).field(field)
    }

    #[inline]
    fn file(mut self, path: impl AsRef<Path>) -> Self {
        self.source = ConfigErrorSource::File(path.as_ref().to_path_buf());
        self
    }

    #[inline]
    fn field(mut self, name: &'static str) -> Self {
        self.source = ConfigErrorSource::FieldOverride(name.to_owned());
        self
    }

    /// Returns the error kind of the error.
    pub fn kind(&self) -> ConfigErrorKind {
        self.kind
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind, self.source)
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner.as_deref().map(|e| e as &(dyn Error + 'static))
    }
}

enum ConfigFormat {
    Yaml,
}

impl ConfigFormat {
    fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Yaml => "yml",
        }
    }
}

trait ConfigObject: DeserializeOwned + Serialize + Default {
    /// The format in which to serialize this configuration.
    fn format() -> ConfigFormat;

    /// The basename of the config file.
    fn name() -> &'static str;

    /// The full filename of the config file, including the file extension.
    fn path(base: &Path) -> PathBuf {
        base.join(format!("{}.{}", Self::name(), Self::format().extension()))
    }

    /// Loads the config file from a file within the given directory location.
    ///
    /// Returns the default configuration if the file does not exist.
    fn load(base: &Path) -> Result<Self, ConfigError> {
        let path = Self::path(base);

        let f = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(ConfigError::wrap(e, ConfigErrorKind::CouldNotOpenFile).file(&path));
            }
        };

        match Self::format() {
            ConfigFormat::Yaml => serde_yaml::from_reader(io::BufReader::new(f))
                .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml).file(&path)),
        }
    }
}

/// Structure used to hold information about configuration overrides via CLI parameters or
/// environment variables.
#[derive(Debug, Default)]
pub struct OverridableConfig {
    /// The address the HTTP server binds to.
    pub host: Option<String>,
    /// The port for scraping and ingestion.
    pub port: Option<String>,
    /// The number of decoder threads.
    pub parsers: Option<String>,
    /// Capacity of the ingest queue.
    pub rcv_hwm: Option<String>,
    /// Seconds without heartbeat after which the process aborts.
    pub abort_after: Option<String>,
    /// Seconds between two stats reports.
    pub stats_interval: Option<String>,
    /// Base URL of the logjam control plane.
    pub logjam_url: Option<String>,
    /// Comma separated list of environments to process.
    pub env: Option<String>,
    /// Comma separated list of known datacenters.
    pub datacenters: Option<String>,
    /// The `dc` label of events without a known datacenter.
    pub default_dc: Option<String>,
    /// Minutes after which quiet actions are evicted.
    pub clean_after: Option<String>,
    /// "true" to log collector lifecycle and stats at info level.
    pub verbose: Option<String>,
    /// "true" to trace dropped sub-metrics.
    pub debug: Option<String>,
    /// Host and port of the statsd server.
    pub statsd: Option<String>,
    /// Seconds to wait for services on shutdown.
    pub shutdown_timeout: Option<String>,
}

/// Controls the metrics the exporter reports about itself.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Metrics {
    /// Hostname and port of the statsd server.
    ///
    /// Defaults to `None`, which disables internal metrics.
    statsd: Option<String>,
    /// Common prefix that should be added to all metrics.
    ///
    /// Defaults to `"logjam.exporter"`.
    prefix: String,
    /// Default tags to apply to all metrics.
    default_tags: BTreeMap<String, String>,
    /// Tag name to report the hostname to for each metric. Defaults to not sending such a tag.
    hostname_tag: Option<String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: None,
            prefix: "logjam.exporter".to_owned(),
            default_tags: BTreeMap::new(),
            hostname_tag: None,
        }
    }
}

/// The HTTP server and the ingest pipeline.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Exporter {
    /// The address to bind to. Defaults to all interfaces.
    host: IpAddr,
    /// The port for `/metrics` and `/ingest`.
    port: u16,
    /// The number of decoder threads.
    parsers: usize,
    /// Capacity of the ingest queue. Messages beyond are dropped.
    rcv_hwm: usize,
    /// Seconds without heartbeat after which the process exits.
    abort_after: u64,
    /// Seconds between two stats reports.
    stats_interval: u64,
    /// Seconds to wait for services to finish on shutdown.
    shutdown_timeout: u64,
    /// Logs collector lifecycle and stats at info level.
    verbose: bool,
    /// Traces dropped sub-metrics.
    debug: bool,
}

impl Default for Exporter {
    fn default() -> Self {
        Exporter {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8081,
            parsers: 4,
            rcv_hwm: 1_000_000,
            abort_after: 60,
            stats_interval: 1,
            shutdown_timeout: 10,
            verbose: false,
            debug: false,
        }
    }
}

/// Discovery of stream definitions.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Streams {
    /// Base URL of the logjam control plane.
    logjam_url: Url,
    /// Comma separated list of environments to process. Empty means all.
    env: String,
    /// Seconds between two fetches of the stream definitions.
    refresh_interval: u64,
}

impl Default for Streams {
    fn default() -> Self {
        Streams {
            logjam_url: default_logjam_url(),
            env: String::new(),
            refresh_interval: 60,
        }
    }
}

fn default_logjam_url() -> Url {
    "http://localhost:3000/".parse().unwrap()
}

/// Aggregation settings shared by all collectors.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Collector {
    /// Known datacenters, matched against host names.
    datacenters: Vec<String>,
    /// The `dc` label of events without a known datacenter.
    default_dc: String,
    /// Minutes after which an action without events is evicted.
    clean_after: u64,
    /// Seconds between two eviction sweeps.
    sweep_interval: u64,
    /// Resources exported for every stream.
    #[serde(flatten)]
    resources: Resources,
}

impl Default for Collector {
    fn default() -> Self {
        let options = Options::default();
        Collector {
            datacenters: options.datacenters,
            default_dc: options.default_dc,
            clean_after: options.clean_after,
            sweep_interval: 60,
            resources: options.resources,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct ConfigValues {
    #[serde(default)]
    logging: LogConfig,
    #[serde(default)]
    metrics: Metrics,
    #[serde(default)]
    exporter: Exporter,
    #[serde(default)]
    streams: Streams,
    #[serde(default)]
    collector: Collector,
}

impl ConfigObject for ConfigValues {
    fn format() -> ConfigFormat {
        ConfigFormat::Yaml
    }

    fn name() -> &'static str {
        "config"
    }
}

/// Config struct.
pub struct Config {
    values: ConfigValues,
    path: PathBuf,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("path", &self.path)
            .field("values", &self.values)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            values: ConfigValues::default(),
            path: PathBuf::new(),
        }
    }
}

impl Config {
    /// Loads a config from a given config folder.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let path = std::env::current_dir()
            .map(|x| x.join(path.as_ref()))
            .unwrap_or_else(|_| path.as_ref().to_path_buf());

        Ok(Config {
            values: ConfigValues::load(&path)?,
            path,
        })
    }

    /// Creates a config from a YAML string.
    ///
    /// This is mostly useful for tests.
    pub fn from_yaml_str(yaml: &str) -> Result<Config, ConfigError> {
        Ok(Config {
            values: serde_yaml::from_str(yaml)
                .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml))?,
            path: PathBuf::new(),
        })
    }

    /// Override configuration with values coming from other sources (e.g. env variables or
    /// command line parameters).
    pub fn apply_override(
        &mut self,
        overrides: OverridableConfig,
    ) -> Result<&mut Self, ConfigError> {
        let exporter = &mut self.values.exporter;

        if let Some(host) = overrides.host {
            exporter.host = host
                .parse::<IpAddr>()
                .map_err(|err| ConfigError::for_field(err, "host"))?;
        }

        if let Some(port) = overrides.port {
            exporter.port = port
                .parse()
                .map_err(|err| ConfigError::for_field(err, "port"))?;
        }

        if let Some(parsers) = overrides.parsers {
            exporter.parsers = parsers
                .parse()
                .map_err(|err| ConfigError::for_field(err, "parsers"))?;
        }

        if let Some(rcv_hwm) = overrides.rcv_hwm {
            exporter.rcv_hwm = rcv_hwm
                .parse()
                .map_err(|err| ConfigError::for_field(err, "rcv_hwm"))?;
        }

        if let Some(abort_after) = overrides.abort_after {
            exporter.abort_after = abort_after
                .parse()
                .map_err(|err| ConfigError::for_field(err, "abort_after"))?;
        }

        if let Some(stats_interval) = overrides.stats_interval {
            exporter.stats_interval = stats_interval
                .parse()
                .map_err(|err| ConfigError::for_field(err, "stats_interval"))?;
        }

        if let Some(shutdown_timeout) = overrides.shutdown_timeout {
            exporter.shutdown_timeout = shutdown_timeout
                .parse()
                .map_err(|err| ConfigError::for_field(err, "shutdown_timeout"))?;
        }

        if let Some(verbose) = overrides.verbose {
            exporter.verbose = parse_bool(&verbose, "verbose")?;
        }

        if let Some(debug) = overrides.debug {
            exporter.debug = parse_bool(&debug, "debug")?;
        }

        if exporter.verbose || exporter.debug {
            let logging = &mut self.values.logging;
            if matches!(
                logging.level,
                LogLevel::Off | LogLevel::Error | LogLevel::Warn | LogLevel::Info
            ) {
                logging.level = LogLevel::Debug;
            }
        }

        let streams = &mut self.values.streams;

        if let Some(logjam_url) = overrides.logjam_url {
            streams.logjam_url = logjam_url
                .parse::<Url>()
                .map_err(|err| ConfigError::for_field(err, "logjam_url"))?;
        }

        if let Some(env) = overrides.env {
            streams.env = env;
        }

        let collector = &mut self.values.collector;

        if let Some(datacenters) = overrides.datacenters {
            collector.datacenters = datacenters
                .split(',')
                .map(str::trim)
                .filter(|dc| !dc.is_empty())
                .map(str::to_owned)
                .collect();
        }

        if let Some(default_dc) = overrides.default_dc {
            collector.default_dc = default_dc;
        }

        if let Some(clean_after) = overrides.clean_after {
            collector.clean_after = clean_after
                .parse()
                .map_err(|err| ConfigError::for_field(err, "clean_after"))?;
        }

        if let Some(statsd) = overrides.statsd {
            self.values.metrics.statsd = Some(statsd).filter(|s| !s.is_empty());
        }

        Ok(self)
    }

    /// Checks if the config file exists.
    pub fn config_exists<P: AsRef<Path>>(path: P) -> bool {
        fs::metadata(ConfigValues::path(path.as_ref())).is_ok()
    }

    /// Returns the directory the config was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Dumps out a YAML string of the values.
    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(&self.values)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotSerialize))
    }

    /// Returns the logging configuration.
    pub fn logging(&self) -> &LogConfig {
        &self.values.logging
    }

    /// Returns the address of the statsd server, if internal metrics are enabled.
    pub fn statsd_addr(&self) -> Option<&str> {
        self.values.metrics.statsd.as_deref()
    }

    /// Returns the prefix of all internal metrics.
    pub fn metrics_prefix(&self) -> &str {
        &self.values.metrics.prefix
    }

    /// Returns the default tags of all internal metrics.
    pub fn metrics_default_tags(&self) -> &BTreeMap<String, String> {
        &self.values.metrics.default_tags
    }

    /// Returns the tag name under which the hostname is reported.
    pub fn metrics_hostname_tag(&self) -> Option<&str> {
        self.values.metrics.hostname_tag.as_deref()
    }

    /// Returns the socket address of the HTTP server.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.values.exporter.host, self.values.exporter.port)
    }

    /// Returns the number of decoder threads, at least one.
    pub fn parsers(&self) -> usize {
        self.values.exporter.parsers.max(1)
    }

    /// Returns the capacity of the ingest queue, at least one.
    pub fn rcv_hwm(&self) -> usize {
        self.values.exporter.rcv_hwm.max(1)
    }

    /// Returns the time without heartbeat after which the process exits.
    pub fn abort_after(&self) -> Duration {
        Duration::from_secs(self.values.exporter.abort_after)
    }

    /// Returns the interval of the stats reporter.
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.values.exporter.stats_interval.max(1))
    }

    /// Returns the time to wait for services to finish on shutdown.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.values.exporter.shutdown_timeout)
    }

    /// Returns `true` if collector lifecycle and stats are logged at info level.
    pub fn verbose(&self) -> bool {
        self.values.exporter.verbose
    }

    /// Returns the base URL of the control plane.
    pub fn logjam_url(&self) -> &Url {
        &self.values.streams.logjam_url
    }

    /// Returns the filter selecting the streams to process.
    pub fn stream_filter(&self) -> StreamFilter {
        StreamFilter::new(&self.values.streams.env)
    }

    /// Returns the interval between two fetches of the stream definitions.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.values.streams.refresh_interval.max(1))
    }

    /// Returns the options shared by all collectors.
    pub fn collector_options(&self) -> Options {
        let collector = &self.values.collector;
        Options {
            verbose: self.values.exporter.verbose,
            debug: self.values.exporter.debug,
            datacenters: collector.datacenters.clone(),
            default_dc: collector.default_dc.clone(),
            clean_after: collector.clean_after,
            resources: collector.resources.clone(),
        }
    }

    /// Returns the interval between two eviction sweeps of a collector.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.values.collector.sweep_interval.max(1))
    }
}

fn parse_bool(value: &str, field: &'static str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" | "" => Ok(false),
        _ => Err(ConfigError::new(ConfigErrorKind::InvalidValue).field(field)),
    }
}
