use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use hashbrown::HashMap;
use hashbrown::hash_map::Entry;
use logjam_statsd::metric;
use parking_lot::RwLock;

use crate::collector::{Collector, Options, Snapshot};
use crate::statsd::MetricGauges;
use crate::stream::{AppEnv, StreamDefinition, StreamFilter};
use crate::sweeper::Sweeper;

/// Default interval between two eviction sweeps of a collector.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Summary of a reconciliation in [`CollectorManager::update_streams`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StreamChanges {
    /// Streams that got a new collector.
    pub added: Vec<AppEnv>,
    /// Streams whose definition changed.
    pub updated: Vec<AppEnv>,
    /// Streams whose collector was removed.
    pub removed: Vec<AppEnv>,
}

impl StreamChanges {
    /// Returns `true` if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug)]
struct CollectorEntry {
    collector: Arc<Collector>,
    sweeper: Sweeper,
}

/// Registry of one [`Collector`] per app-env.
///
/// Lookups only take a read lock. Creation happens under the write lock, so that concurrent
/// discovery of the same app-env never yields two collectors.
///
/// Creating collectors spawns their sweeper, so methods that create collectors must be called
/// from within a tokio runtime.
pub struct CollectorManager {
    options: Arc<Options>,
    sweep_interval: Duration,
    filter: StreamFilter,
    collectors: RwLock<HashMap<AppEnv, CollectorEntry>>,
}

impl CollectorManager {
    /// Creates an empty manager.
    pub fn new(options: Arc<Options>, sweep_interval: Duration, filter: StreamFilter) -> Self {
        Self {
            options,
            sweep_interval,
            filter,
            collectors: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the options passed to every collector.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Returns the collector responsible for `app_env`.
    pub fn lookup(&self, app_env: &str) -> Option<Arc<Collector>> {
        let collectors = self.collectors.read();
        collectors
            .get(app_env)
            .map(|entry| Arc::clone(&entry.collector))
    }

    /// Returns the collector for `app_env`, creating it from `stream` if it does not exist.
    pub fn get_or_create(&self, app_env: AppEnv, stream: &StreamDefinition) -> Arc<Collector> {
        let mut collectors = self.collectors.write();

        let collector = match collectors.entry(app_env) {
            Entry::Occupied(entry) => return Arc::clone(&entry.get().collector),
            Entry::Vacant(entry) => {
                let new_entry = self.create_entry(entry.key(), stream);
                Arc::clone(&entry.insert(new_entry).collector)
            }
        };

        metric!(gauge(MetricGauges::Collectors) = collectors.len() as u64);
        collector
    }

    /// Reconciles the registry with the complete set of stream definitions.
    ///
    /// Streams rejected by the filter are skipped. Collectors without a definition are removed
    /// and their sweepers are joined before this returns.
    pub async fn update_streams<I>(&self, streams: I) -> StreamChanges
    where
        I: IntoIterator<Item = (AppEnv, StreamDefinition)>,
    {
        let streams: HashMap<AppEnv, StreamDefinition> = streams
            .into_iter()
            .filter(|(app_env, _)| self.filter.matches(app_env))
            .collect();

        let mut changes = StreamChanges::default();

        let removed = {
            let mut collectors = self.collectors.write();

            for (app_env, stream) in &streams {
                match collectors.get(app_env) {
                    Some(entry) => {
                        if *entry.collector.stream() != *stream {
                            entry.collector.update_stream(stream);
                            changes.updated.push(app_env.clone());
                        }
                    }
                    None => {
                        let entry = self.create_entry(app_env, stream);
                        collectors.insert(app_env.clone(), entry);
                        changes.added.push(app_env.clone());
                    }
                }
            }

            let removed: Vec<_> = collectors
                .extract_if(|app_env, _| !streams.contains_key(app_env))
                .collect();

            metric!(gauge(MetricGauges::Collectors) = collectors.len() as u64);
            removed
        };

        for (app_env, entry) in removed {
            entry.sweeper.stop().await;
            changes.removed.push(app_env);
        }

        for (change, app_envs) in [
            ("added", &changes.added),
            ("updated", &changes.updated),
            ("removed", &changes.removed),
        ] {
            for app_env in app_envs {
                self.log_change(change, app_env);
            }
        }

        changes.added.sort_unstable();
        changes.updated.sort_unstable();
        changes.removed.sort_unstable();
        changes
    }

    /// Removes the collector of `app_env` and waits for its sweeper to stop.
    ///
    /// Returns `false` if no such collector exists.
    pub async fn remove(&self, app_env: &str) -> bool {
        let entry = self.collectors.write().remove(app_env);

        match entry {
            Some(entry) => {
                entry.sweeper.stop().await;
                self.log_change("removed", entry.collector.app_env());
                true
            }
            None => false,
        }
    }

    /// Takes a snapshot of every collector, ordered by app-env.
    ///
    /// The registry lock is released before the collectors are read.
    pub fn gather(&self) -> Vec<Snapshot> {
        let mut collectors: Vec<_> = {
            let collectors = self.collectors.read();
            collectors
                .values()
                .map(|entry| Arc::clone(&entry.collector))
                .collect()
        };

        collectors.sort_unstable_by(|a, b| a.app_env().cmp(b.app_env()));
        collectors.iter().map(|collector| collector.snapshot()).collect()
    }

    /// Stops all sweepers and removes all collectors.
    pub async fn shutdown(&self) {
        let entries: Vec<_> = self.collectors.write().drain().collect();
        let count = entries.len();

        for (_, entry) in entries {
            entry.sweeper.stop().await;
        }

        logjam_log::debug!("stopped {count} collectors");
    }

    /// Returns the number of collectors.
    pub fn len(&self) -> usize {
        self.collectors.read().len()
    }

    /// Returns `true` if there are no collectors.
    pub fn is_empty(&self) -> bool {
        self.collectors.read().is_empty()
    }

    /// Returns all app-envs with a collector, sorted.
    pub fn app_envs(&self) -> Vec<AppEnv> {
        let mut app_envs: Vec<_> = self.collectors.read().keys().cloned().collect();
        app_envs.sort_unstable();
        app_envs
    }

    fn create_entry(&self, app_env: &AppEnv, stream: &StreamDefinition) -> CollectorEntry {
        let collector = Arc::new(Collector::new(
            app_env.clone(),
            stream,
            Arc::clone(&self.options),
        ));
        let sweeper = Sweeper::spawn(Arc::clone(&collector), self.sweep_interval);

        CollectorEntry { collector, sweeper }
    }

    fn log_change(&self, change: &str, app_env: &AppEnv) {
        if self.options.verbose {
            logjam_log::info!(app_env = app_env.as_str(), "{change} stream");
        } else {
            logjam_log::debug!(app_env = app_env.as_str(), "{change} stream");
        }
    }
}

impl fmt::Debug for CollectorManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectorManager")
            .field("options", &self.options)
            .field("sweep_interval", &self.sweep_interval)
            .field("filter", &self.filter)
            .field("collectors", &self.app_envs())
            .finish()
    }
}
