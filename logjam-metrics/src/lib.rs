//! Aggregation of logjam request metrics per application environment.
//!
//! Decoded [`MetricEvent`]s are routed through the [`CollectorManager`] to the [`Collector`] of
//! their app-env, which accumulates them into summary, distribution and total series. Family
//! names follow the convention implemented in [`naming`]:
//!
//! ```text
//! logjam:action:http_response_time_summary_seconds{app="shop",env="production",action="..."}
//! logjam:action:db_calls_total{app="shop",env="production",action="..."}
//! ```
//!
//! Series are labeled with the action that produced them. Since action names are unbounded, each
//! collector tracks when an action was last seen, and a [`Sweeper`] evicts all series of actions
//! that have been quiet for longer than [`Options::clean_after`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use logjam_metrics::{Collector, EventKind, MetricEvent, Options, Props, StreamDefinition};
//!
//! let stream = StreamDefinition {
//!     app: "shop".to_owned(),
//!     env: "production".to_owned(),
//!     ..Default::default()
//! };
//!
//! let collector = Collector::new(stream.app_env().unwrap(), &stream, Arc::new(Options::default()));
//!
//! let props = Props::from_map([("action", "ProductsController#index"), ("code", "200")]);
//! collector.record(&MetricEvent::new(EventKind::Log, props, 0.042));
//!
//! assert!(collector.remove_action("ProductsController#index"));
//! assert!(!collector.remove_action("ProductsController#index"));
//! ```

#![warn(missing_docs)]

mod collector;
mod event;
mod manager;
pub mod naming;
mod statsd;
mod stream;
mod sweeper;

pub use self::collector::*;
pub use self::event::*;
pub use self::manager::*;
pub use self::naming::{MetricKind, classify, is_valid_label_name, is_valid_metric_name};
pub use self::stream::*;
pub use self::sweeper::*;
