use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use logjam_config::Config;
use logjam_metrics::{AppEnv, CollectorManager, Resources, StreamDefinition};
use logjam_statsd::metric;
use logjam_system::{Controller, Receiver, Service};
use tokio::time::MissedTickBehavior;
use url::Url;

use crate::statsd::{ServerCounters, ServerTimers};

/// Failures to fetch stream definitions from the control plane.
#[derive(Debug, thiserror::Error)]
pub enum StreamsError {
    /// The endpoint URL could not be built from the configured base URL.
    #[error("invalid control plane url")]
    InvalidUrl(#[from] url::ParseError),
    /// The request failed or returned an error status.
    #[error("request to control plane failed")]
    Request(#[from] reqwest::Error),
}

/// Periodically reconciles the collectors with the stream definitions of the control plane.
///
/// Fetch failures are logged and retried on the next tick. Resources returned by the control plane
/// are added to every stream.
#[derive(Debug)]
pub struct StreamsUpdater {
    client: reqwest::Client,
    streams_url: Url,
    resources_url: Url,
    refresh_interval: Duration,
    manager: Arc<CollectorManager>,
}

impl StreamsUpdater {
    pub fn new(config: &Config, manager: Arc<CollectorManager>) -> Result<Self, StreamsError> {
        let base = config.logjam_url();
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .gzip(true)
            .build()?;

        Ok(Self {
            client,
            streams_url: base.join("admin/streams")?,
            resources_url: base.join("admin/resources")?,
            refresh_interval: config.refresh_interval(),
            manager,
        })
    }

    async fn fetch_resources(&self) -> Result<Resources, StreamsError> {
        let resources = self
            .client
            .get(self.resources_url.clone())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(resources)
    }

    async fn fetch_streams(&self) -> Result<HashMap<String, StreamDefinition>, StreamsError> {
        let streams = self
            .client
            .get(self.streams_url.clone())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(streams)
    }

    /// Fetches all definitions and applies them to the manager.
    async fn update(&self) -> Result<(), StreamsError> {
        let streams = metric!(timer(ServerTimers::StreamsFetchDuration), {
            self.fetch_streams().await?
        });

        let resources = match self.fetch_resources().await {
            Ok(resources) => resources,
            Err(error) => {
                logjam_log::debug!(
                    error = &error as &dyn Error,
                    "could not fetch resources, using configured resources"
                );
                Resources::default()
            }
        };

        let changes = self
            .manager
            .update_streams(parse_streams(streams, &resources))
            .await;

        if !changes.is_empty() {
            logjam_log::debug!(
                added = changes.added.len(),
                updated = changes.updated.len(),
                removed = changes.removed.len(),
                "updated stream definitions"
            );
        }

        Ok(())
    }
}

/// Validates the definitions of a stream map and adds shared resources to every definition.
///
/// The identity of a stream comes from its `app` and `env` fields, since both may contain dashes.
/// Only definitions without them fall back to the key, which is split at its last dash.
fn parse_streams(
    streams: HashMap<String, StreamDefinition>,
    resources: &Resources,
) -> Vec<(AppEnv, StreamDefinition)> {
    streams
        .into_iter()
        .filter_map(|(name, mut stream)| {
            let app_env = if stream.app.is_empty() && stream.env.is_empty() {
                name.parse::<AppEnv>().inspect(|app_env| {
                    stream.app = app_env.app().to_owned();
                    stream.env = app_env.env().to_owned();
                })
            } else {
                stream.app_env()
            };

            match app_env {
                Ok(app_env) => {
                    stream.resources = stream.resources.merge(resources);
                    Some((app_env, stream))
                }
                Err(error) => {
                    logjam_log::warn!(
                        error = &error as &dyn Error,
                        stream = name.as_str(),
                        "ignoring stream with invalid name"
                    );
                    None
                }
            }
        })
        .collect()
}

impl Service for StreamsUpdater {
    type Interface = ();

    async fn run(self, _rx: Receiver<Self::Interface>) {
        let mut ticker = tokio::time::interval(self.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown = Controller::shutdown_handle();

        logjam_log::info!("fetching stream definitions from {}", self.streams_url);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.notified() => break,
                _ = ticker.tick() => match self.update().await {
                    Ok(()) => {
                        metric!(counter(ServerCounters::StreamsFetched) += 1, result = "success");
                    }
                    Err(error) => {
                        metric!(counter(ServerCounters::StreamsFetched) += 1, result = "failure");
                        logjam_log::error!(
                            error = &error as &dyn Error,
                            "failed to update stream definitions"
                        );
                    }
                },
            }
        }
    }
}
