//! Naming convention of exported metric families.
//!
//! Every family produced by a collector is called `logjam:action:<metric>_<suffix>`, where the
//! suffix encodes how the family aggregates its observations.

use std::fmt;

/// Prefix shared by all exported families.
pub const METRIC_PREFIX: &str = "logjam:action:";

const SUMMARY_SUFFIX: &str = "_summary_seconds";
const DISTRIBUTION_SUFFIX: &str = "_distribution_seconds";
const TOTAL_SUFFIX: &str = "_total";

/// The aggregation kind of a metric family.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum MetricKind {
    /// Count and sum of observed durations.
    Summary,
    /// Count, sum and bucketed counts of observed durations.
    Distribution,
    /// A monotonic total.
    Total,
}

impl MetricKind {
    /// Returns the kind as a static string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Summary => "summary",
            Self::Distribution => "distribution",
            Self::Total => "total",
        }
    }

    const fn suffix(&self) -> &'static str {
        match self {
            Self::Summary => SUMMARY_SUFFIX,
            Self::Distribution => DISTRIBUTION_SUFFIX,
            Self::Total => TOTAL_SUFFIX,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Splits a family name into its logical metric name and kind.
///
/// Returns `None` for names that do not follow the convention. Callers drop such sub-metrics,
/// which keeps the exporter compatible with instrumentation it does not understand yet.
///
/// # Example
///
/// ```
/// use logjam_metrics::{classify, MetricKind};
///
/// assert_eq!(
///     classify("logjam:action:db_time_summary_seconds"),
///     Some(("db_time", MetricKind::Summary))
/// );
/// assert_eq!(classify("logjam:action:db_time_murks_seconds"), None);
/// ```
pub fn classify(name: &str) -> Option<(&str, MetricKind)> {
    let rest = name.strip_prefix(METRIC_PREFIX)?;

    let (metric, kind) = if let Some(metric) = rest.strip_suffix(SUMMARY_SUFFIX) {
        (metric, MetricKind::Summary)
    } else if let Some(metric) = rest.strip_suffix(DISTRIBUTION_SUFFIX) {
        (metric, MetricKind::Distribution)
    } else if let Some(metric) = rest.strip_suffix(TOTAL_SUFFIX) {
        (metric, MetricKind::Total)
    } else {
        return None;
    };

    (!metric.is_empty()).then_some((metric, kind))
}

/// Builds the family name for `metric` with the given kind.
pub fn family_name(metric: &str, kind: MetricKind) -> String {
    let suffix = kind.suffix();
    let mut name = String::with_capacity(METRIC_PREFIX.len() + metric.len() + suffix.len());
    name.push_str(METRIC_PREFIX);
    name.push_str(metric);
    name.push_str(suffix);
    name
}

/// Builds the name of a summary family, e.g. `logjam:action:db_time_summary_seconds`.
pub fn summary_name(metric: &str) -> String {
    family_name(metric, MetricKind::Summary)
}

/// Builds the name of a distribution family, e.g. `logjam:action:db_time_distribution_seconds`.
pub fn distribution_name(metric: &str) -> String {
    family_name(metric, MetricKind::Distribution)
}

/// Builds the name of a total family, e.g. `logjam:action:db_calls_total`.
pub fn total_name(metric: &str) -> String {
    family_name(metric, MetricKind::Total)
}

/// Returns `true` if `name` can be used as a metric or resource name.
///
/// Valid names match `[a-zA-Z_][a-zA-Z0-9_]*`.
pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Returns `true` if `name` can be used as an additional series label.
///
/// Label names follow the metric name rules, except that names starting with `__` are reserved
/// and `le` and `quantile` are generated by the exposition format.
pub fn is_valid_label_name(name: &str) -> bool {
    is_valid_metric_name(name) && !name.starts_with("__") && !matches!(name, "le" | "quantile")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_known_suffixes() {
        assert_eq!(
            classify("logjam:action:db_time_summary_seconds"),
            Some(("db_time", MetricKind::Summary))
        );
        assert_eq!(
            classify("logjam:action:db_time_distribution_seconds"),
            Some(("db_time", MetricKind::Distribution))
        );
        assert_eq!(
            classify("logjam:action:db_calls_total"),
            Some(("db_calls", MetricKind::Total))
        );
    }

    #[test]
    fn test_classify_unknown() {
        assert_eq!(classify("logjam:action:db_time_murks_seconds"), None);
        assert_eq!(classify("logjam:action:_total"), None);
        assert_eq!(classify("logjam:action:"), None);
        assert_eq!(classify("other:action:db_calls_total"), None);
        assert_eq!(classify("db_calls_total"), None);
        assert_eq!(classify(""), None);
    }

    #[test]
    fn test_classify_is_stable() {
        let name = "logjam:action:http_response_time_summary_seconds";
        assert_eq!(classify(name), classify(name));
        assert_eq!(
            classify(name).map(|(m, k)| (m, k.as_str())),
            Some(("http_response_time", "summary"))
        );
    }

    #[test]
    fn test_names_roundtrip_through_classify() {
        for metric in ["db_time", "page_time", "memcache_calls"] {
            assert_eq!(classify(&summary_name(metric)), Some((metric, MetricKind::Summary)));
            assert_eq!(
                classify(&distribution_name(metric)),
                Some((metric, MetricKind::Distribution))
            );
            assert_eq!(classify(&total_name(metric)), Some((metric, MetricKind::Total)));
        }
    }

    #[test]
    fn test_valid_metric_names() {
        assert!(is_valid_metric_name("db_time"));
        assert!(is_valid_metric_name("_private"));
        assert!(is_valid_metric_name("rest2_calls"));
        assert!(!is_valid_metric_name(""));
        assert!(!is_valid_metric_name("2fast"));
        assert!(!is_valid_metric_name("db-time"));
        assert!(!is_valid_metric_name("db time"));
    }

    #[test]
    fn test_valid_label_names() {
        assert!(is_valid_label_name("shard"));
        assert!(is_valid_label_name("_zone"));
        assert!(!is_valid_label_name("x-request-id"));
        assert!(!is_valid_label_name("__name__"));
        assert!(!is_valid_label_name("le"));
        assert!(!is_valid_label_name("quantile"));
    }
}
