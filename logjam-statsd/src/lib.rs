//! Self-observation of the exporter via statsd, built on cadence.
//!
//! Metrics are names attached to a kind: implement [`CounterMetric`], [`GaugeMetric`],
//! [`TimerMetric`] or [`DistributionMetric`] on an enum and emit its variants with the [`metric!`]
//! macro. A counter can therefore never be sent as a gauge by accident.
//!
//! Nothing is sent until [`init`] has configured a statsd daemon:
//!
//! ```no_run
//! # use std::collections::BTreeMap;
//! # use logjam_statsd::MetricsClientConfig;
//! logjam_statsd::init(MetricsClientConfig {
//!     prefix: "logjam.exporter",
//!     host: "localhost:8125",
//!     default_tags: BTreeMap::new(),
//! })
//! .ok();
//! ```
//!
//! ```
//! use logjam_statsd::{metric, CounterMetric};
//!
//! struct EventsDropped;
//!
//! impl CounterMetric for EventsDropped {
//!     fn name(&self) -> &'static str {
//!         "events.dropped"
//!     }
//! }
//!
//! metric!(counter(EventsDropped) += 1, reason = "queue_full");
//! ```
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::error::Error;
use std::net::{ToSocketAddrs, UdpSocket};
use std::sync::Arc;

use cadence::{
    BufferedUdpMetricSink, Metric, MetricBuilder, MetricError, MetricSink, QueuingMetricSink,
    SpyMetricSink, StatsdClient,
};
use parking_lot::RwLock;

/// Packets buffered for the sender thread; further packets are dropped.
const QUEUE_CAPACITY: usize = 100_000;

/// A statsd client that adds a fixed set of tags to every metric.
#[derive(Debug)]
pub struct MetricsClient {
    client: StatsdClient,
    default_tags: Vec<(String, String)>,
}

impl MetricsClient {
    /// Creates a client writing to `sink` with names prefixed by `prefix`.
    pub fn new<S>(prefix: &str, sink: S, default_tags: BTreeMap<String, String>) -> Self
    where
        S: MetricSink + Sync + Send + std::panic::RefUnwindSafe + 'static,
    {
        let client = StatsdClient::builder(prefix, sink)
            .with_error_handler(|error| {
                logjam_log::debug!(error = &error as &dyn Error, "failed to send metric");
            })
            .build();

        Self {
            client,
            default_tags: default_tags.into_iter().collect(),
        }
    }

    /// Returns the underlying cadence client.
    pub fn statsd(&self) -> &StatsdClient {
        &self.client
    }

    /// Adds the default tags to `metric` and sends it.
    #[inline]
    pub fn send<'a, T>(&'a self, metric: MetricBuilder<'a, '_, T>)
    where
        T: Metric + From<String>,
    {
        let metric = self
            .default_tags
            .iter()
            .fold(metric, |metric, (key, value)| metric.with_tag(key, value));

        if let Err(error) = metric.try_send() {
            logjam_log::error!(
                error = &error as &dyn Error,
                capacity = QUEUE_CAPACITY,
                "dropped metric"
            );
        }
    }
}

/// Configuration for [`init`].
#[derive(Debug)]
pub struct MetricsClientConfig<'a, A> {
    /// Prefix prepended to all metric names.
    pub prefix: &'a str,
    /// Address of the statsd daemon.
    pub host: A,
    /// Tags added to all metrics, such as the host name.
    pub default_tags: BTreeMap<String, String>,
}

static CLIENT: RwLock<Option<Arc<MetricsClient>>> = RwLock::new(None);

thread_local! {
    /// Replaces the global client on this thread while capturing in tests.
    static OVERRIDE: RefCell<Option<Arc<MetricsClient>>> = const { RefCell::new(None) };
}

#[doc(hidden)]
pub mod _pred {
    pub use cadence::prelude::*;
}

/// Installs `client` for all threads.
pub fn set_client(client: MetricsClient) {
    *CLIENT.write() = Some(Arc::new(client));
}

/// Removes the global client. Metrics are discarded afterwards.
pub fn disable() {
    *CLIENT.write() = None;
}

/// Reports metrics to the statsd daemon at `config.host`.
///
/// Packets are queued and sent over UDP from a background thread. Fails if the host cannot be
/// resolved or no local socket can be bound.
pub fn init<A: ToSocketAddrs>(config: MetricsClientConfig<'_, A>) -> Result<(), MetricError> {
    let Some(addr) = config.host.to_socket_addrs()?.next() else {
        return Err(MetricError::from((
            cadence::ErrorKind::InvalidInput,
            "statsd host did not resolve",
        )));
    };

    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.set_nonblocking(true)?;

    let sink = QueuingMetricSink::with_capacity(
        BufferedUdpMetricSink::from(addr, socket)?,
        QUEUE_CAPACITY,
    );
    set_client(MetricsClient::new(config.prefix, sink, config.default_tags));

    logjam_log::info!("reporting metrics to statsd at {addr}");
    Ok(())
}

/// Runs `f` and returns every packet it emitted on the current thread.
///
/// Metric names are not prefixed and no default tags are added.
pub fn with_capturing_test_client(f: impl FnOnce()) -> Vec<String> {
    let (rx, sink) = SpyMetricSink::new();
    let client = Arc::new(MetricsClient::new("", sink, BTreeMap::new()));

    let previous = OVERRIDE.with(|cell| cell.replace(Some(client)));
    f();
    OVERRIDE.with(|cell| cell.replace(previous));

    rx.try_iter()
        .map(|packet| String::from_utf8_lossy(&packet).into_owned())
        .collect()
}

/// Calls `f` with the active client, or returns the default if none is configured.
///
/// Prefer the [`metric!`] macro.
#[inline]
pub fn with_client<F, R>(f: F) -> R
where
    F: FnOnce(&MetricsClient) -> R,
    R: Default,
{
    let client = OVERRIDE
        .with(|cell| cell.borrow().clone())
        .or_else(|| CLIENT.read().clone());

    match client {
        Some(client) => f(&client),
        None => R::default(),
    }
}

/// A duration, sent as a distribution in milliseconds.
///
/// ```
/// use logjam_statsd::{metric, TimerMetric};
///
/// struct StreamsFetch;
///
/// impl TimerMetric for StreamsFetch {
///     fn name(&self) -> &'static str {
///         "streams.fetch"
///     }
/// }
///
/// let streams = metric!(timer(StreamsFetch), { vec!["shop-production"] });
/// # assert_eq!(streams.len(), 1);
/// ```
pub trait TimerMetric {
    /// The name sent to statsd.
    fn name(&self) -> &'static str;
}

/// A count of occurrences. Increments by zero are not sent.
pub trait CounterMetric {
    /// The name sent to statsd.
    fn name(&self) -> &'static str;
}

/// An arbitrary value whose distribution is of interest.
pub trait DistributionMetric {
    /// The name sent to statsd.
    fn name(&self) -> &'static str;
}

/// A value that is set rather than accumulated, such as a queue length.
pub trait GaugeMetric {
    /// The name sent to statsd.
    fn name(&self) -> &'static str;
}

/// Emits a metric through the active client.
///
/// Tags follow the value as `key = value` pairs; dotted keys are allowed.
///
/// ```
/// # use logjam_statsd::{metric, GaugeMetric};
/// # struct QueueSize;
/// # impl GaugeMetric for QueueSize {
/// #     fn name(&self) -> &'static str { "queue.size" }
/// # }
/// metric!(gauge(QueueSize) = 42, queue.name = "ingest");
/// ```
#[macro_export]
macro_rules! metric {
    (@send $method:ident, $name:expr, $value:expr $(, $($k:ident).* = $v:expr)*) => {
        $crate::with_client(|client| {
            use $crate::_pred::*;
            client.send(
                client.statsd().$method(&$name, $value)
                    $(.with_tag(stringify!($($k).*), $v))*
            )
        })
    };

    (counter($id:expr) += $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {{
        let value: i64 = $value;
        if value != 0 {
            $crate::metric!(@send count_with_tags, $crate::CounterMetric::name(&$id), value $(, $($k).* = $v)*);
        }
    }};

    (gauge($id:expr) = $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        $crate::metric!(@send gauge_with_tags, $crate::GaugeMetric::name(&$id), $value $(, $($k).* = $v)*)
    };

    (distribution($id:expr) = $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        $crate::metric!(@send distribution_with_tags, $crate::DistributionMetric::name(&$id), $value $(, $($k).* = $v)*)
    };

    (timer($id:expr) = $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {{
        let millis = ::std::time::Duration::as_secs_f64(&$value) * 1000.0;
        $crate::metric!(@send distribution_with_tags, $crate::TimerMetric::name(&$id), millis $(, $($k).* = $v)*)
    }};

    (timer($id:expr), $($($k:ident).* = $v:expr,)* $block:block) => {{
        let started = ::std::time::Instant::now();
        let result = $block;
        $crate::metric!(timer($id) = started.elapsed() $(, $($k).* = $v)*);
        result
    }};
}
