use anyhow::{Context, Result};
use logjam_config::Config;
use logjam_statsd::MetricsClientConfig;

/// Print spawn infos to the log.
pub fn dump_spawn_infos(config: &Config) {
    if config.path().as_os_str().is_empty() {
        logjam_log::info!("launching exporter without config folder");
    } else {
        logjam_log::info!(
            "launching exporter from config folder {}",
            config.path().display()
        );
    }

    logjam_log::info!("  listen address: {}", config.listen_addr());
    logjam_log::info!("  logjam url: {}", config.logjam_url());
    logjam_log::info!("  parsers: {}", config.parsers());
    logjam_log::info!("  log level: {}", config.logging().level);
}

/// Initialize the metric system.
pub fn init_metrics(config: &Config) -> Result<()> {
    let Some(host) = config.statsd_addr() else {
        return Ok(());
    };

    let mut default_tags = config.metrics_default_tags().clone();
    if let Some(hostname_tag) = config.metrics_hostname_tag()
        && let Some(hostname) = hostname::get().ok().and_then(|s| s.into_string().ok())
    {
        default_tags.insert(hostname_tag.to_owned(), hostname);
    }

    logjam_statsd::init(MetricsClientConfig {
        prefix: config.metrics_prefix(),
        host,
        default_tags,
    })
    .with_context(|| format!("failed to initialize statsd client for {host}"))?;

    Ok(())
}
