//! Rendering of collector snapshots in the Prometheus text exposition format.

use std::collections::BTreeMap;

use logjam_metrics::{FamilySnapshot, MetricKind, Props, Series, Snapshot};
use prometheus::proto::{
    Bucket, Counter, Histogram, LabelPair, Metric, MetricFamily, MetricType, Summary,
};
use prometheus::{Encoder, TextEncoder};

/// Content type of the rendered exposition.
pub const CONTENT_TYPE: &str = prometheus::TEXT_FORMAT;

/// Converts snapshots into metric families.
///
/// Families with the same name are merged across collectors. Empty families are skipped. The
/// result is ordered by family name.
pub fn families(snapshots: &[Snapshot]) -> Vec<MetricFamily> {
    let mut merged: BTreeMap<&str, (MetricKind, Vec<Metric>)> = BTreeMap::new();

    for family in snapshots.iter().flat_map(|s| &s.families) {
        if family.series.is_empty() {
            continue;
        }

        let (_, metrics) = merged
            .entry(family.name.as_str())
            .or_insert_with(|| (family.kind, Vec::new()));
        metrics.extend(convert_family(family));
    }

    merged
        .into_iter()
        .map(|(name, (kind, metrics))| {
            let mut family = MetricFamily::default();
            family.set_name(name.to_owned());
            family.set_help(help(kind).to_owned());
            family.set_field_type(metric_type(kind));
            family.set_metric(metrics.into());
            family
        })
        .collect()
}

/// Renders snapshots as text.
pub fn encode(snapshots: &[Snapshot]) -> Result<String, prometheus::Error> {
    let families = families(snapshots);

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

fn help(kind: MetricKind) -> &'static str {
    match kind {
        MetricKind::Summary => "Summary of observed values in seconds.",
        MetricKind::Distribution => "Distribution of observed values in seconds.",
        MetricKind::Total => "Total of observed values.",
    }
}

fn metric_type(kind: MetricKind) -> MetricType {
    match kind {
        MetricKind::Summary => MetricType::SUMMARY,
        MetricKind::Distribution => MetricType::HISTOGRAM,
        MetricKind::Total => MetricType::COUNTER,
    }
}

fn convert_family(family: &FamilySnapshot) -> impl Iterator<Item = Metric> + '_ {
    family
        .series
        .iter()
        .map(|(props, series)| convert_series(props, series))
}

fn convert_series(props: &Props, series: &Series) -> Metric {
    let mut metric = Metric::default();

    let labels: Vec<LabelPair> = props
        .labels()
        .map(|(name, value)| {
            let mut label = LabelPair::default();
            label.set_name(name.to_owned());
            label.set_value(value.to_owned());
            label
        })
        .collect();
    metric.set_label(labels.into());

    match series {
        Series::Summary { count, sum } => {
            let mut summary = Summary::default();
            summary.set_sample_count(*count);
            summary.set_sample_sum(*sum);
            metric.set_summary(summary);
        }
        Series::Distribution { count, sum, .. } => {
            let buckets: Vec<Bucket> = series
                .cumulative_buckets()
                .into_iter()
                .map(|(upper_bound, cumulative_count)| {
                    let mut bucket = Bucket::default();
                    bucket.set_upper_bound(upper_bound);
                    bucket.set_cumulative_count(cumulative_count);
                    bucket
                })
                .collect();

            let mut histogram = Histogram::default();
            histogram.set_sample_count(*count);
            histogram.set_sample_sum(*sum);
            histogram.set_bucket(buckets.into());
            metric.set_histogram(histogram);
        }
        Series::Total { value } => {
            let mut counter = Counter::default();
            counter.set_value(*value);
            metric.set_counter(counter);
        }
    }

    metric
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use logjam_metrics::{
        Collector, EventKind, MetricEvent, Options, Resources, StreamDefinition,
    };

    use super::*;

    fn collector(name: &str) -> Collector {
        let app_env = name.parse().unwrap();
        let options = Options {
            resources: Resources {
                time_resources: Default::default(),
                call_resources: ["db_calls".to_owned()].into(),
            },
            ..Default::default()
        };
        Collector::new(app_env, &StreamDefinition::default(), Arc::new(options))
    }

    fn event(action: &str, value: f64) -> MetricEvent {
        let props = Props::from_map([
            ("metric", "http"),
            ("action", action),
            ("code", "200"),
            ("method", "GET"),
        ]);
        let mut event = MetricEvent::new(EventKind::Log, props, value);
        event.counter_metrics.insert("db_calls".to_owned(), 3.0);
        event
    }

    #[test]
    fn test_merge_families_by_name() {
        let shop = collector("shop-production");
        shop.record(&event("Products#index", 0.2));
        let blog = collector("blog-production");
        blog.record(&event("Posts#show", 0.4));

        let families = families(&[shop.snapshot(), blog.snapshot()]);
        let names: Vec<_> = families.iter().map(|f| f.get_name()).collect();

        assert_eq!(
            names,
            [
                "logjam:action:db_calls_total",
                "logjam:action:http_response_time_distribution_seconds",
                "logjam:action:http_response_time_summary_seconds",
            ]
        );

        for family in &families {
            assert_eq!(family.get_metric().len(), 2);
        }
    }

    #[test]
    fn test_encode_skips_invalid_label_names() {
        let shop = collector("shop-production");
        let mut event = event("Products#index", 0.2);
        event
            .props
            .extra
            .insert("x-request-id".to_owned(), "abc".to_owned());
        event.props.extra.insert("shard".to_owned(), "7".to_owned());
        shop.record(&event);

        let text = encode(&[shop.snapshot()]).unwrap();
        assert!(!text.contains("x-request-id"));
        assert!(text.contains(r#"dc="unknown",shard="7"} 3"#));
    }

    #[test]
    fn test_skip_empty() {
        let empty = collector("shop-production");
        assert!(families(&[empty.snapshot()]).is_empty());
        assert_eq!(encode(&[]).unwrap(), "");
    }

    #[test]
    fn test_encode() {
        let shop = collector("shop-production");
        shop.record(&event("Products#index", 0.2));
        shop.record(&event("Products#index", 0.3));

        let text = encode(&[shop.snapshot()]).unwrap();

        assert!(text.contains("# TYPE logjam:action:db_calls_total counter\n"));
        assert!(text.contains(
            "# TYPE logjam:action:http_response_time_summary_seconds summary\n"
        ));
        assert!(text.contains(
            "# TYPE logjam:action:http_response_time_distribution_seconds histogram\n"
        ));
        assert!(text.contains(
            r#"logjam:action:db_calls_total{app="shop",env="production",metric="http",action="Products#index",code="200",method="GET",dc="unknown"} 6"#
        ));
        assert!(text.contains(
            r#"logjam:action:http_response_time_summary_seconds_count{app="shop",env="production",metric="http",action="Products#index",code="200",method="GET",dc="unknown"} 2"#
        ));
        assert!(text.contains(
            r#"logjam:action:http_response_time_distribution_seconds_bucket{app="shop",env="production",metric="http",action="Products#index",code="200",method="GET",dc="unknown",le="+Inf"} 2"#
        ));
    }
}
