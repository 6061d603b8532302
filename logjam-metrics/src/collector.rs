use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use hashbrown::{Equivalent, HashMap, HashSet};
use logjam_statsd::metric;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::event::{EventKind, MetricEvent, Props};
use crate::naming::{self, MetricKind};
use crate::statsd::{MetricCounters, MetricTimers};
use crate::stream::{AppEnv, Resources, StreamDefinition};

/// Action label of events that do not name one.
pub const DEFAULT_ACTION: &str = "Unknown#unknown";

/// Base names of the primary families of events with a fixed `metric` label.
const PRIMARY_BASES: [&str; 5] = [
    "http_response_time",
    "api_response_time",
    "job_execution_time",
    "page_time",
    "ajax_time",
];

/// Upper bounds of the buckets of distribution families, in seconds.
pub const DURATION_BUCKETS: [f64; 16] = [
    0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 25.0, 50.0, 100.0,
];

/// Settings shared by all collectors.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Options {
    /// Log collector lifecycle at info level.
    pub verbose: bool,
    /// Trace dropped sub-metrics.
    pub debug: bool,
    /// Known datacenters, used to derive the `dc` label from host names.
    pub datacenters: Vec<String>,
    /// The `dc` label of events without a datacenter.
    pub default_dc: String,
    /// Minutes after which an action without events is evicted.
    pub clean_after: u64,
    /// Resources exported for every stream in addition to the stream's own.
    pub resources: Resources,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            verbose: false,
            debug: false,
            datacenters: Vec::new(),
            default_dc: "unknown".to_owned(),
            clean_after: 5,
            resources: Resources::default(),
        }
    }
}

impl Options {
    /// Returns the age after which actions are evicted.
    pub fn clean_after(&self) -> Duration {
        Duration::from_secs(self.clean_after.saturating_mul(60))
    }

    /// Returns the first known datacenter that is a dot separated component of `host`.
    ///
    /// ```
    /// use logjam_metrics::Options;
    ///
    /// let options = Options {
    ///     datacenters: vec!["ams".to_owned(), "fra".to_owned()],
    ///     ..Default::default()
    /// };
    ///
    /// assert_eq!(options.datacenter_for_host("web-7.fra.example.com"), Some("fra"));
    /// assert_eq!(options.datacenter_for_host("web-7.example.com"), None);
    /// ```
    pub fn datacenter_for_host(&self, host: &str) -> Option<&str> {
        self.datacenters
            .iter()
            .find(|dc| host.split('.').any(|part| part == dc.as_str()))
            .map(String::as_str)
    }
}

/// Aggregated state of one series.
#[derive(Clone, Debug, PartialEq)]
pub enum Series {
    /// Count and sum of observations.
    Summary {
        /// Number of observations.
        count: u64,
        /// Sum of all observations.
        sum: f64,
    },
    /// Count, sum and per-bucket counts of observations.
    Distribution {
        /// Number of observations.
        count: u64,
        /// Sum of all observations.
        sum: f64,
        /// Observations per bucket of [`DURATION_BUCKETS`], not cumulative.
        buckets: Vec<u64>,
    },
    /// A running total.
    Total {
        /// Sum of all increments.
        value: f64,
    },
}

impl Series {
    fn new(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Summary => Self::Summary { count: 0, sum: 0.0 },
            MetricKind::Distribution => Self::Distribution {
                count: 0,
                sum: 0.0,
                buckets: vec![0; DURATION_BUCKETS.len()],
            },
            MetricKind::Total => Self::Total { value: 0.0 },
        }
    }

    fn observe(&mut self, value: f64) {
        match self {
            Self::Summary { count, sum } => {
                *count += 1;
                *sum += value;
            }
            Self::Distribution {
                count,
                sum,
                buckets,
            } => {
                *count += 1;
                *sum += value;
                // Values above the largest bound only show up in the implicit +Inf bucket.
                let index = DURATION_BUCKETS.partition_point(|bound| *bound < value);
                if let Some(bucket) = buckets.get_mut(index) {
                    *bucket += 1;
                }
            }
            Self::Total { value: total } => *total += value,
        }
    }

    /// Returns the kind of family this series belongs to.
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Summary { .. } => MetricKind::Summary,
            Self::Distribution { .. } => MetricKind::Distribution,
            Self::Total { .. } => MetricKind::Total,
        }
    }

    /// Returns `(upper bound, cumulative count)` pairs of a distribution.
    ///
    /// Empty for other kinds.
    pub fn cumulative_buckets(&self) -> Vec<(f64, u64)> {
        let Self::Distribution { buckets, .. } = self else {
            return Vec::new();
        };

        DURATION_BUCKETS
            .iter()
            .zip(buckets)
            .scan(0, |total, (bound, count)| {
                *total += count;
                Some((*bound, *total))
            })
            .collect()
    }
}

/// Copy of one family taken by [`Collector::snapshot`].
#[derive(Clone, Debug, PartialEq)]
pub struct FamilySnapshot {
    /// Full family name, e.g. `logjam:action:db_time_summary_seconds`.
    pub name: String,
    /// Aggregation kind of all series in this family.
    pub kind: MetricKind,
    /// Series sorted by labels.
    pub series: Vec<(Props, Series)>,
}

/// Copy of a collector's aggregates, rendered without holding its lock.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    /// The collector's identity.
    pub app_env: AppEnv,
    /// Non-empty families sorted by name.
    pub families: Vec<FamilySnapshot>,
}

impl Snapshot {
    /// Returns the total number of series in this snapshot.
    pub fn series_count(&self) -> usize {
        self.families.iter().map(|f| f.series.len()).sum()
    }
}

/// Borrowed form of [`Props`] for lookups that do not allocate.
///
/// Fields must stay in the same order as in `Props`, so that both hash identically.
#[derive(Hash)]
struct PropsRef<'a> {
    app: &'a str,
    env: &'a str,
    metric: &'a str,
    action: &'a str,
    code: &'a str,
    method: &'a str,
    cluster: &'a str,
    dc: &'a str,
    extra: &'a BTreeMap<String, String>,
}

impl PropsRef<'_> {
    fn to_props(&self) -> Props {
        Props {
            app: self.app.to_owned(),
            env: self.env.to_owned(),
            metric: self.metric.to_owned(),
            action: self.action.to_owned(),
            code: self.code.to_owned(),
            method: self.method.to_owned(),
            cluster: self.cluster.to_owned(),
            dc: self.dc.to_owned(),
            extra: self.extra.clone(),
        }
    }
}

impl Equivalent<Props> for PropsRef<'_> {
    fn equivalent(&self, key: &Props) -> bool {
        self.action == key.action
            && self.code == key.code
            && self.method == key.method
            && self.metric == key.metric
            && self.cluster == key.cluster
            && self.dc == key.dc
            && self.app == key.app
            && self.env == key.env
            && *self.extra == key.extra
    }
}

fn or_default<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.is_empty() { default } else { value }
}

/// What feeds the observations of a family.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Source {
    /// The primary value of events.
    Primary,
    /// A declared time or call resource.
    Resource,
}

#[derive(Debug)]
struct Family {
    name: String,
    kind: MetricKind,
    source: Source,
    series: HashMap<Props, Series>,
}

/// Family indices of the primary observation of an event.
#[derive(Clone, Copy, Debug)]
struct Primary {
    summary: usize,
    distribution: usize,
}

#[derive(Debug, Default)]
struct State {
    families: Vec<Family>,
    by_name: HashMap<String, usize>,
    log: HashMap<String, Primary>,
    page: Option<Primary>,
    ajax: Option<Primary>,
    time_resources: HashMap<String, usize>,
    call_resources: HashMap<String, usize>,
    actions: HashMap<String, Instant>,
}

impl State {
    /// Returns the index of the family with the given name, creating it if needed.
    ///
    /// Returns `None` if the name does not follow the naming convention, or if the family is
    /// already fed from a different source.
    fn family(&mut self, name: String, source: Source) -> Option<usize> {
        if let Some(&index) = self.by_name.get(&name) {
            return match self.families[index].source == source {
                true => Some(index),
                false => {
                    logjam_log::debug!(family = name.as_str(), "family name already taken");
                    None
                }
            };
        }

        let (_, kind) = naming::classify(&name)?;
        let index = self.families.len();
        self.families.push(Family {
            name: name.clone(),
            kind,
            source,
            series: HashMap::new(),
        });
        self.by_name.insert(name, index);
        Some(index)
    }

    fn new_primary(&mut self, base: &str) -> Option<Primary> {
        Some(Primary {
            summary: self.family(naming::summary_name(base), Source::Primary)?,
            distribution: self.family(naming::distribution_name(base), Source::Primary)?,
        })
    }

    fn primary(&mut self, kind: EventKind, metric: &str) -> Option<Primary> {
        match kind {
            EventKind::Log => {
                if let Some(primary) = self.log.get(metric) {
                    return Some(*primary);
                }
                if !naming::is_valid_metric_name(metric) {
                    return None;
                }

                let base = match metric {
                    "http" | "api" => format!("{metric}_response_time"),
                    "job" => "job_execution_time".to_owned(),
                    other => format!("{other}_time"),
                };
                let primary = self.new_primary(&base)?;
                self.log.insert(metric.to_owned(), primary);
                Some(primary)
            }
            EventKind::Page => {
                if self.page.is_none() {
                    self.page = self.new_primary("page_time");
                }
                self.page
            }
            EventKind::Ajax => {
                if self.ajax.is_none() {
                    self.ajax = self.new_primary("ajax_time");
                }
                self.ajax
            }
        }
    }

    fn time_resource(&mut self, resource: &str) -> Option<usize> {
        if let Some(&index) = self.time_resources.get(resource) {
            return Some(index);
        }
        let index = self.family(naming::summary_name(resource), Source::Resource)?;
        self.time_resources.insert(resource.to_owned(), index);
        Some(index)
    }

    fn call_resource(&mut self, resource: &str) -> Option<usize> {
        if let Some(&index) = self.call_resources.get(resource) {
            return Some(index);
        }
        let index = self.family(naming::total_name(resource), Source::Resource)?;
        self.call_resources.insert(resource.to_owned(), index);
        Some(index)
    }

    fn observe(&mut self, family: usize, key: &PropsRef<'_>, value: f64) {
        let Some(family) = self.families.get_mut(family) else {
            return;
        };

        if let Some(series) = family.series.get_mut(key) {
            series.observe(value);
            return;
        }

        let mut series = Series::new(family.kind);
        series.observe(value);
        family.series.insert(key.to_props(), series);
    }

    fn touch(&mut self, action: &str, now: Instant) {
        match self.actions.get_mut(action) {
            Some(updated) => *updated = now,
            None => {
                self.actions.insert(action.to_owned(), now);
            }
        }
    }

    fn remove_action(&mut self, action: &str) -> bool {
        let mut removed = self.actions.remove(action).is_some();

        for family in &mut self.families {
            let before = family.series.len();
            family.series.retain(|props, _| props.action != action);
            removed |= family.series.len() != before;
        }

        removed
    }

    fn series_count(&self) -> usize {
        self.families.iter().map(|f| f.series.len()).sum()
    }
}

/// The stream definition and the resources derived from it.
#[derive(Debug)]
struct StreamConfig {
    stream: Arc<StreamDefinition>,
    resources: Resources,
}

impl StreamConfig {
    fn new(app_env: &AppEnv, stream: &StreamDefinition, options: &Options) -> Self {
        let mut resources = options.resources.merge(&stream.resources);

        for set in [&mut resources.time_resources, &mut resources.call_resources] {
            set.retain(|name| {
                let valid = naming::is_valid_metric_name(name);
                if !valid {
                    logjam_log::warn!(
                        app_env = app_env.as_str(),
                        resource = name.as_str(),
                        "ignoring resource with invalid name"
                    );
                }
                valid
            });
        }

        resources.time_resources.retain(|name| {
            let reserved = PRIMARY_BASES.contains(&name.as_str());
            if reserved {
                logjam_log::warn!(
                    app_env = app_env.as_str(),
                    resource = name.as_str(),
                    "ignoring time resource named like a request timing"
                );
            }
            !reserved
        });

        Self {
            stream: Arc::new(stream.clone()),
            resources,
        }
    }
}

/// Aggregates the metric events of one app-env.
///
/// All series and the action registry are guarded by a single lock. Every public operation
/// holds it for the duration of one call, which keeps the series of an action and its registry
/// entry consistent with each other.
pub struct Collector {
    app_env: AppEnv,
    options: Arc<Options>,
    config: ArcSwap<StreamConfig>,
    state: Mutex<State>,
}

impl Collector {
    /// Creates an empty collector for a stream.
    pub fn new(app_env: AppEnv, stream: &StreamDefinition, options: Arc<Options>) -> Self {
        let config = StreamConfig::new(&app_env, stream, &options);

        Self {
            app_env,
            options,
            config: ArcSwap::from_pointee(config),
            state: Mutex::new(State::default()),
        }
    }

    /// Returns the identity of this collector.
    pub fn app_env(&self) -> &AppEnv {
        &self.app_env
    }

    /// Returns the options this collector was created with.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Returns the current stream definition.
    pub fn stream(&self) -> Arc<StreamDefinition> {
        Arc::clone(&self.config.load().stream)
    }

    /// Returns the resources exported by this collector.
    pub fn resources(&self) -> Resources {
        self.config.load().resources.clone()
    }

    /// Replaces the stream definition.
    ///
    /// Newly declared resources are exported from the next event on. Series of resources that
    /// are no longer declared stay until their actions are evicted.
    pub fn update_stream(&self, stream: &StreamDefinition) {
        let config = StreamConfig::new(&self.app_env, stream, &self.options);
        self.config.store(Arc::new(config));
    }

    /// Records an event.
    ///
    /// Missing `app` and `env` labels are taken from the collector, a missing `action` becomes
    /// [`DEFAULT_ACTION`] and a missing `dc` the configured default datacenter. Sub-metrics are
    /// only recorded for declared resources.
    ///
    /// Returns `false` if the event was dropped because its value is not finite or its `metric`
    /// label is not a valid name.
    pub fn record(&self, event: &MetricEvent) -> bool {
        if !event.value.is_finite() {
            metric!(counter(MetricCounters::EventDropped) += 1, reason = "non_finite");
            return false;
        }

        let config = self.config.load();
        let props = &event.props;
        let metric = or_default(&props.metric, event.kind.default_metric());
        let key = PropsRef {
            app: or_default(&props.app, self.app_env.app()),
            env: or_default(&props.env, self.app_env.env()),
            metric,
            action: or_default(&props.action, DEFAULT_ACTION),
            code: &props.code,
            method: &props.method,
            cluster: &props.cluster,
            dc: or_default(&props.dc, &self.options.default_dc),
            extra: &props.extra,
        };

        let now = Instant::now();
        let mut state = self.state.lock();

        let Some(primary) = state.primary(event.kind, metric) else {
            drop(state);
            metric!(counter(MetricCounters::EventDropped) += 1, reason = "invalid_metric");
            return false;
        };

        state.observe(primary.summary, &key, event.value);
        state.observe(primary.distribution, &key, event.value);

        let mut skipped = Vec::new();

        for (resource, &value) in &event.time_metrics {
            if !value.is_finite() || !config.resources.time_resources.contains(resource) {
                skipped.push(resource);
                continue;
            }
            match state.time_resource(resource) {
                Some(family) => state.observe(family, &key, value),
                None => skipped.push(resource),
            }
        }

        for (resource, &value) in &event.counter_metrics {
            if !value.is_finite() || !config.resources.call_resources.contains(resource) {
                skipped.push(resource);
                continue;
            }
            match state.call_resource(resource) {
                Some(family) => state.observe(family, &key, value),
                None => skipped.push(resource),
            }
        }

        state.touch(key.action, now);
        drop(state);

        if self.options.debug {
            for resource in skipped {
                logjam_log::trace!(
                    app_env = self.app_env.as_str(),
                    resource = resource.as_str(),
                    "skipped sub-metric"
                );
                metric!(counter(MetricCounters::SubMetricSkipped) += 1);
            }
        }

        metric!(counter(MetricCounters::EventRecorded) += 1);
        true
    }

    /// Removes all series of an action together with its registry entry.
    ///
    /// Returns `true` if anything was removed, `false` if the action is unknown.
    pub fn remove_action(&self, action: &str) -> bool {
        let removed = self.state.lock().remove_action(action);

        if removed && self.options.verbose {
            logjam_log::info!(app_env = self.app_env.as_str(), action, "removed action");
        }

        removed
    }

    /// Removes every action without events for longer than `clean_after` before `now`.
    ///
    /// Returns the number of evicted actions.
    pub fn evict_stale_actions(&self, now: Instant) -> usize {
        let max_age = self.options.clean_after();

        let evicted = metric!(timer(MetricTimers::SweepDuration), {
            let mut state = self.state.lock();

            let stale: HashSet<String> = state
                .actions
                .iter()
                .filter(|(_, updated)| now.saturating_duration_since(**updated) > max_age)
                .map(|(action, _)| action.clone())
                .collect();

            if !stale.is_empty() {
                state.actions.retain(|action, _| !stale.contains(action));
                for family in &mut state.families {
                    family
                        .series
                        .retain(|props, _| !stale.contains(&props.action));
                }
            }

            stale.len()
        });

        if evicted > 0 {
            metric!(counter(MetricCounters::ActionsEvicted) += evicted as i64);
            logjam_log::debug!(
                app_env = self.app_env.as_str(),
                evicted,
                "evicted stale actions"
            );
        }

        evicted
    }

    /// Copies all non-empty families.
    ///
    /// The lock is held only while copying. Sorting happens afterwards.
    pub fn snapshot(&self) -> Snapshot {
        let mut families: Vec<_> = {
            let state = self.state.lock();
            state
                .families
                .iter()
                .filter(|family| !family.series.is_empty())
                .map(|family| FamilySnapshot {
                    name: family.name.clone(),
                    kind: family.kind,
                    series: family
                        .series
                        .iter()
                        .map(|(props, series)| (props.clone(), series.clone()))
                        .collect(),
                })
                .collect()
        };

        families.sort_unstable_by(|a, b| a.name.cmp(&b.name));
        for family in &mut families {
            family.series.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        }

        Snapshot {
            app_env: self.app_env.clone(),
            families,
        }
    }

    /// Returns the number of series across all families.
    pub fn series_count(&self) -> usize {
        self.state.lock().series_count()
    }

    /// Returns the number of actions in the registry.
    pub fn action_count(&self) -> usize {
        self.state.lock().actions.len()
    }
}

impl fmt::Debug for Collector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collector")
            .field("app_env", &self.app_env)
            .field("options", &self.options)
            .field("config", &self.config.load())
            .finish_non_exhaustive()
    }
}
