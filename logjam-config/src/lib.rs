//! Configuration for the logjam exporter CLI and server.
//!
//! The configuration is read from `config.yml` within a configuration directory. Every value has a
//! default, so a missing file is equivalent to an empty one. Values passed on the command line or
//! through environment variables are applied on top via [`Config::apply_override`].
//!
//! ```yaml
//! exporter:
//!   port: 8081
//!   parsers: 4
//! streams:
//!   logjam_url: http://logjam.example.com
//!   env: production,staging
//! collector:
//!   datacenters: [ams, fra]
//!   clean_after: 5
//! ```

#![warn(missing_docs)]

mod config;

pub use self::config::*;
