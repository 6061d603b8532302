use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::naming;

/// Origin of a [`MetricEvent`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// A backend request log or background job.
    Log,
    /// A frontend page load timing.
    Page,
    /// A frontend ajax call timing.
    Ajax,
}

impl EventKind {
    /// The `metric` label used when an event does not carry one.
    pub const fn default_metric(&self) -> &'static str {
        match self {
            Self::Log => "http",
            Self::Page => "page",
            Self::Ajax => "ajax",
        }
    }

    /// Returns the kind as a static string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Page => "page",
            Self::Ajax => "ajax",
        }
    }
}

/// Labels of a metric series.
///
/// The core schema is fixed. Labels outside of it are kept in `extra`. Empty values mean the
/// label is absent and are not exported.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd, Deserialize, Serialize)]
#[serde(default)]
pub struct Props {
    /// Application name.
    pub app: String,
    /// Environment name.
    pub env: String,
    /// Metric family of the observation, e.g. `http`, `api` or `job`.
    pub metric: String,
    /// Controller action or job name.
    pub action: String,
    /// HTTP response code or job exit code.
    pub code: String,
    /// HTTP method.
    pub method: String,
    /// Cluster that handled the request.
    pub cluster: String,
    /// Datacenter that handled the request.
    pub dc: String,
    /// Additional labels.
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl Props {
    /// Builds props from a loosely typed label map.
    ///
    /// Known keys populate the core schema, all others end up in `extra`. Keys that cannot be
    /// used as label names are dropped.
    pub fn from_map<I, K, V>(map: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String> + AsRef<str>,
        V: Into<String>,
    {
        let mut props = Self::default();

        for (key, value) in map {
            let slot = match key.as_ref() {
                "app" => Some(&mut props.app),
                "env" => Some(&mut props.env),
                "metric" => Some(&mut props.metric),
                "action" => Some(&mut props.action),
                "code" => Some(&mut props.code),
                "method" => Some(&mut props.method),
                "cluster" => Some(&mut props.cluster),
                "dc" => Some(&mut props.dc),
                _ => None,
            };

            match slot {
                Some(slot) => *slot = value.into(),
                None if naming::is_valid_label_name(key.as_ref()) => {
                    props.extra.insert(key.into(), value.into());
                }
                None => {
                    logjam_log::trace!(label = key.as_ref(), "dropping invalid label name");
                }
            }
        }

        props
    }

    /// Returns the value of a label, or `None` if it is absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        let value = match key {
            "app" => &self.app,
            "env" => &self.env,
            "metric" => &self.metric,
            "action" => &self.action,
            "code" => &self.code,
            "method" => &self.method,
            "cluster" => &self.cluster,
            "dc" => &self.dc,
            _ => self.extra.get(key)?,
        };

        (!value.is_empty()).then_some(value.as_str())
    }

    /// Iterates all present labels, core schema first.
    ///
    /// Additional labels with invalid names are skipped.
    pub fn labels(&self) -> impl Iterator<Item = (&str, &str)> {
        [
            ("app", &self.app),
            ("env", &self.env),
            ("metric", &self.metric),
            ("action", &self.action),
            ("code", &self.code),
            ("method", &self.method),
            ("cluster", &self.cluster),
            ("dc", &self.dc),
        ]
        .into_iter()
        .chain(
            self.extra
                .iter()
                .filter(|(k, _)| naming::is_valid_label_name(k))
                .map(|(k, v)| (k.as_str(), v)),
        )
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| (k, v.as_str()))
    }
}

/// A decoded observation routed to a collector.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricEvent {
    /// Origin of the event.
    pub kind: EventKind,
    /// Series labels.
    pub props: Props,
    /// Primary duration in seconds.
    pub value: f64,
    /// Sub-timings in seconds, keyed by resource name.
    pub time_metrics: BTreeMap<String, f64>,
    /// Sub-counters, keyed by resource name.
    pub counter_metrics: BTreeMap<String, f64>,
}

impl MetricEvent {
    /// Creates an event without sub-metrics.
    pub fn new(kind: EventKind, props: Props, value: f64) -> Self {
        Self {
            kind,
            props,
            value,
            time_metrics: BTreeMap::new(),
            counter_metrics: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_props_from_map() {
        let props = Props::from_map([
            ("app", "shop"),
            ("env", "production"),
            ("action", "ProductsController#index"),
            ("dc", "ams"),
            ("shard", "7"),
        ]);

        assert_eq!(props.app, "shop");
        assert_eq!(props.action, "ProductsController#index");
        assert_eq!(props.get("dc"), Some("ams"));
        assert_eq!(props.get("shard"), Some("7"));
        assert_eq!(props.get("method"), None);
        assert_eq!(props.extra.len(), 1);
    }

    #[test]
    fn test_labels_skip_empty() {
        let props = Props::from_map([
            ("zone", "b"),
            ("app", "shop"),
            ("code", "200"),
            ("method", ""),
        ]);

        let labels: Vec<_> = props.labels().collect();
        assert_eq!(labels, [("app", "shop"), ("code", "200"), ("zone", "b")]);
    }

    #[test]
    fn test_invalid_label_names() {
        let props = Props::from_map([("shard", "7"), ("x-request-id", "abc"), ("le", "1")]);
        assert_eq!(props.extra.len(), 1);
        assert_eq!(props.get("x-request-id"), None);

        let mut props = Props::default();
        props.extra.insert("bad key".to_owned(), "x".to_owned());
        props.extra.insert("zone".to_owned(), "b".to_owned());
        let labels: Vec<_> = props.labels().collect();
        assert_eq!(labels, [("zone", "b")]);
    }

    #[test]
    fn test_default_metric() {
        assert_eq!(EventKind::Log.default_metric(), "http");
        assert_eq!(EventKind::Page.default_metric(), "page");
        assert_eq!(EventKind::Ajax.default_metric(), "ajax");
    }
}
