use std::error::Error;
use std::io;
use std::sync::Arc;
use std::thread;

use bytes::Bytes;
use crossbeam_channel::Receiver;
use logjam_metrics::{CollectorManager, EventKind, MetricEvent, Options, Props, StreamDefinition};
use logjam_system::Addr;
use serde_json::{Map, Value};

use crate::services::watchdog::Heartbeat;
use crate::stats::{Outcome, Stats};

/// Topic of liveness messages from the upstream bus.
pub const HEARTBEAT_TOPIC: &str = "heartbeat";

/// A raw message as received from the ingest endpoint.
#[derive(Clone, Debug)]
pub struct IngestMessage {
    /// The app-env the message belongs to.
    pub stream: String,
    /// The routing topic, e.g. `logs.shop.production`.
    pub topic: String,
    /// The undecoded JSON body.
    pub body: Bytes,
}

/// Failures to turn a message body into a metric event.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The body is not valid JSON.
    #[error("invalid json")]
    InvalidJson(#[from] serde_json::Error),
    /// The body is valid JSON, but not an object.
    #[error("message is not a json object")]
    NotAnObject,
    /// A required timing is absent or not a number.
    #[error("missing field {0}")]
    MissingField(&'static str),
}

fn event_kind(topic: &str) -> Option<EventKind> {
    if topic.starts_with("logs") {
        Some(EventKind::Log)
    } else if topic.starts_with("frontend.page") {
        Some(EventKind::Page)
    } else if topic.starts_with("frontend.ajax") {
        Some(EventKind::Ajax)
    } else {
        None
    }
}

fn number(fields: &Map<String, Value>, key: &str) -> Option<f64> {
    fields.get(key).and_then(Value::as_f64)
}

fn string<'a>(fields: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    fields.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn label(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// Turns the body of a request log or frontend message into a metric event.
///
/// Timings are converted from milliseconds to seconds. Returns `Ok(None)` for requests that are
/// deliberately not exported.
pub fn decode_event(
    kind: EventKind,
    body: &[u8],
    stream: &StreamDefinition,
    options: &Options,
) -> Result<Option<MetricEvent>, DecodeError> {
    let Value::Object(fields) = serde_json::from_slice(body)? else {
        return Err(DecodeError::NotAnObject);
    };

    let action = string(&fields, "action").unwrap_or_default();
    let dc = match string(&fields, "datacenter") {
        Some(dc) => dc,
        None => string(&fields, "host")
            .and_then(|host| options.datacenter_for_host(host))
            .unwrap_or_default(),
    };

    let mut props = Props {
        action: action.to_owned(),
        code: label(fields.get("code")),
        cluster: string(&fields, "cluster").unwrap_or_default().to_owned(),
        dc: dc.to_owned(),
        ..Default::default()
    };

    match kind {
        EventKind::Log => {
            let request_info = fields.get("request_info").and_then(Value::as_object);

            match request_info {
                Some(info) => {
                    let url = string(info, "url").unwrap_or_default();
                    if stream.is_ignored_request(url) {
                        return Ok(None);
                    }

                    props.method = string(info, "method")
                        .unwrap_or_default()
                        .to_ascii_uppercase();
                    props.metric = match stream.is_api_request(action) {
                        true => "api",
                        false => "http",
                    }
                    .to_owned();
                }
                None => props.metric = "job".to_owned(),
            }

            let total_time =
                number(&fields, "total_time").ok_or(DecodeError::MissingField("total_time"))?;
            let mut event = MetricEvent::new(kind, props, total_time / 1000.0);

            for (name, value) in &fields {
                if name == "total_time" || name == "code" {
                    continue;
                }
                let Some(value) = value.as_f64() else {
                    continue;
                };

                if name.ends_with("_time") {
                    event.time_metrics.insert(name.clone(), value / 1000.0);
                } else {
                    event.counter_metrics.insert(name.clone(), value);
                }
            }

            Ok(Some(event))
        }
        EventKind::Page | EventKind::Ajax => {
            if stream.is_backend_only(action) {
                return Ok(None);
            }

            let field = match kind {
                EventKind::Page => "page_time",
                _ => "ajax_time",
            };
            let value = number(&fields, field)
                .or_else(|| number(&fields, "total_time"))
                .ok_or(DecodeError::MissingField(field))?;

            Ok(Some(MetricEvent::new(kind, props, value / 1000.0)))
        }
    }
}

/// Routes ingested messages to their collectors.
#[derive(Debug)]
pub struct Decoder {
    manager: Arc<CollectorManager>,
    stats: Arc<Stats>,
    watchdog: Addr<Heartbeat>,
}

impl Decoder {
    pub fn new(
        manager: Arc<CollectorManager>,
        stats: Arc<Stats>,
        watchdog: Addr<Heartbeat>,
    ) -> Self {
        Self {
            manager,
            stats,
            watchdog,
        }
    }

    /// Decodes and records one message and counts its outcome.
    pub fn handle(&self, message: &IngestMessage) -> Outcome {
        let outcome = self.decode(message);
        self.stats.count(outcome);
        outcome
    }

    fn decode(&self, message: &IngestMessage) -> Outcome {
        if message.topic == HEARTBEAT_TOPIC {
            self.watchdog.send(Heartbeat);
            return Outcome::Heartbeat;
        }

        let Some(kind) = event_kind(&message.topic) else {
            logjam_log::trace!(
                topic = message.topic.as_str(),
                "ignoring message with unknown topic"
            );
            return Outcome::Ignored;
        };

        let Some(collector) = self.manager.lookup(&message.stream) else {
            logjam_log::trace!(stream = message.stream.as_str(), "no collector for stream");
            return Outcome::Missed;
        };

        let stream = collector.stream();
        match decode_event(kind, &message.body, &stream, self.manager.options()) {
            Ok(Some(event)) if collector.record(&event) => Outcome::Processed,
            Ok(Some(_)) => Outcome::Invalid,
            Ok(None) => Outcome::Ignored,
            Err(error) => {
                logjam_log::debug!(
                    error = &error as &dyn Error,
                    stream = message.stream.as_str(),
                    "failed to decode message"
                );
                Outcome::Invalid
            }
        }
    }
}

/// Worker threads decoding messages from the ingest queue.
///
/// The workers exit once every sender of the queue has been dropped and the queue is drained.
#[derive(Debug)]
pub struct DecoderPool {
    handles: Vec<thread::JoinHandle<()>>,
}

impl DecoderPool {
    /// Spawns `workers` threads consuming `queue`.
    pub fn start(
        workers: usize,
        queue: Receiver<IngestMessage>,
        decoder: Arc<Decoder>,
    ) -> io::Result<Self> {
        let handles = (0..workers.max(1))
            .map(|index| {
                let queue = queue.clone();
                let decoder = Arc::clone(&decoder);

                thread::Builder::new()
                    .name(format!("decoder-{index}"))
                    .spawn(move || {
                        for message in queue.iter() {
                            decoder.handle(&message);
                        }
                    })
            })
            .collect::<io::Result<_>>()?;

        Ok(Self { handles })
    }

    /// Returns the number of worker threads.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Blocks until all workers have exited.
    pub fn join(self) {
        for handle in self.handles {
            if handle.join().is_err() {
                logjam_log::error!("decoder thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use logjam_metrics::{Resources, Snapshot, StreamFilter};

    use super::*;

    fn stream() -> StreamDefinition {
        StreamDefinition {
            app: "shop".to_owned(),
            env: "production".to_owned(),
            ignored_request_uri: Some("/_system".to_owned()),
            backend_only_requests: "Admin".to_owned(),
            api_requests: vec!["Api".to_owned()],
            resources: Resources {
                time_resources: ["db_time".to_owned()].into(),
                call_resources: ["db_calls".to_owned()].into(),
            },
        }
    }

    fn options() -> Options {
        Options {
            datacenters: vec!["ams".to_owned(), "fra".to_owned()],
            ..Default::default()
        }
    }

    fn setup() -> (Decoder, logjam_system::Receiver<Heartbeat>) {
        let manager = CollectorManager::new(
            Arc::new(options()),
            Duration::from_secs(60),
            StreamFilter::default(),
        );
        manager.get_or_create("shop-production".parse().unwrap(), &stream());

        let (watchdog, heartbeats) = logjam_system::channel("watchdog");
        let decoder = Decoder::new(Arc::new(manager), Arc::new(Stats::default()), watchdog);
        (decoder, heartbeats)
    }

    fn message(stream: &str, topic: &str, body: &str) -> IngestMessage {
        IngestMessage {
            stream: stream.to_owned(),
            topic: topic.to_owned(),
            body: Bytes::copy_from_slice(body.as_bytes()),
        }
    }

    fn snapshot(decoder: &Decoder) -> Snapshot {
        decoder.manager.lookup("shop-production").unwrap().snapshot()
    }

    fn family_names(snapshot: &Snapshot) -> Vec<&str> {
        snapshot.families.iter().map(|f| f.name.as_str()).collect()
    }

    #[test]
    fn test_decode_request_log() {
        let body = br#"{
            "action": "ProductsController#index",
            "code": 200,
            "host": "web-1.fra.example.com",
            "cluster": "c1",
            "total_time": 250.0,
            "db_time": 50.0,
            "db_calls": 3,
            "request_info": {"method": "get", "url": "/products"}
        }"#;

        let event = decode_event(EventKind::Log, body, &stream(), &options())
            .unwrap()
            .unwrap();

        assert_eq!(event.value, 0.25);
        assert_eq!(event.props.metric, "http");
        assert_eq!(event.props.action, "ProductsController#index");
        assert_eq!(event.props.code, "200");
        assert_eq!(event.props.method, "GET");
        assert_eq!(event.props.cluster, "c1");
        assert_eq!(event.props.dc, "fra");
        assert_eq!(event.time_metrics.get("db_time"), Some(&0.05));
        assert_eq!(event.counter_metrics.get("db_calls"), Some(&3.0));
        assert!(!event.counter_metrics.contains_key("code"));
    }

    #[test]
    fn test_decode_api_and_job() {
        let api = br#"{"action": "Api::V1::Products#show", "total_time": 10, "request_info": {"url": "/api"}}"#;
        let event = decode_event(EventKind::Log, api, &stream(), &options())
            .unwrap()
            .unwrap();
        assert_eq!(event.props.metric, "api");

        let job = br#"{"action": "ImportJob#perform", "total_time": 10, "datacenter": "ams"}"#;
        let event = decode_event(EventKind::Log, job, &stream(), &options())
            .unwrap()
            .unwrap();
        assert_eq!(event.props.metric, "job");
        assert_eq!(event.props.dc, "ams");
    }

    #[test]
    fn test_decode_ignored_request() {
        let body = br#"{"action": "Health#check", "total_time": 1, "request_info": {"url": "/_system/alive"}}"#;
        let decoded = decode_event(EventKind::Log, body, &stream(), &options()).unwrap();
        assert!(decoded.is_none());
    }

    #[test]
    fn test_decode_frontend() {
        let page = br#"{"action": "Products#index", "page_time": 1200}"#;
        let event = decode_event(EventKind::Page, page, &stream(), &options())
            .unwrap()
            .unwrap();
        assert_eq!(event.value, 1.2);
        assert_eq!(event.props.metric, "");

        let ajax = br#"{"action": "Products#search", "total_time": 300}"#;
        let event = decode_event(EventKind::Ajax, ajax, &stream(), &options())
            .unwrap()
            .unwrap();
        assert_eq!(event.value, 0.3);

        let backend_only = br#"{"action": "Admin::Users#index", "page_time": 1}"#;
        let decoded = decode_event(EventKind::Page, backend_only, &stream(), &options()).unwrap();
        assert!(decoded.is_none());
    }

    #[test]
    fn test_decode_errors() {
        let result = decode_event(EventKind::Log, b"{", &stream(), &options());
        assert!(matches!(result, Err(DecodeError::InvalidJson(_))));

        let result = decode_event(EventKind::Log, b"[]", &stream(), &options());
        assert!(matches!(result, Err(DecodeError::NotAnObject)));

        let result = decode_event(EventKind::Log, br#"{"action": "A#b"}"#, &stream(), &options());
        assert!(matches!(result, Err(DecodeError::MissingField("total_time"))));
    }

    #[tokio::test]
    async fn test_handle_outcomes() {
        let (decoder, mut heartbeats) = setup();
        let log = r#"{"action": "Products#index", "total_time": 100, "db_time": 20, "request_info": {"url": "/"}}"#;

        let cases = [
            (message("shop-production", "logs.shop.production", log), Outcome::Processed),
            (message("blog-production", "logs.blog.production", log), Outcome::Missed),
            (message("shop-production", "logs.shop.production", "nope"), Outcome::Invalid),
            (message("shop-production", "frontend.page.shop", "{}"), Outcome::Invalid),
            (message("shop-production", "mobile.shop", log), Outcome::Ignored),
            (message("", HEARTBEAT_TOPIC, ""), Outcome::Heartbeat),
        ];

        for (message, expected) in &cases {
            assert_eq!(decoder.handle(message), *expected, "{message:?}");
        }

        assert!(heartbeats.recv().await.is_some());

        let stats = decoder.stats.take();
        assert_eq!(stats.get(Outcome::Processed), 1);
        assert_eq!(stats.get(Outcome::Invalid), 2);

        let snapshot = snapshot(&decoder);
        assert_eq!(
            family_names(&snapshot),
            [
                "logjam:action:db_time_summary_seconds",
                "logjam:action:http_response_time_distribution_seconds",
                "logjam:action:http_response_time_summary_seconds",
            ]
        );
    }

    #[tokio::test]
    async fn test_pool_drains_queue() {
        let (decoder, _heartbeats) = setup();
        let decoder = Arc::new(decoder);

        let (tx, rx) = crossbeam_channel::bounded(100);
        let pool = DecoderPool::start(3, rx, Arc::clone(&decoder)).unwrap();
        assert_eq!(pool.len(), 3);

        for i in 0..50 {
            let body = format!(r#"{{"action": "C#a{i}", "total_time": 5}}"#);
            tx.send(message("shop-production", "logs.shop.production", &body))
                .unwrap();
        }
        drop(tx);

        pool.join();

        assert_eq!(decoder.stats.take().get(Outcome::Processed), 50);
        let collector = decoder.manager.lookup("shop-production").unwrap();
        assert_eq!(collector.action_count(), 50);
    }
}
