//! Foundational system components for the exporter's services.
//!
//! A [`Service`] owns its state and processes messages of its [`Interface`] one by one from a
//! [`Receiver`]. Other components talk to it through a cloneable [`Addr`]. The [`Controller`]
//! broadcasts process shutdown to every service that holds a [`ShutdownHandle`].

#![warn(missing_docs)]

mod controller;
mod service;

pub use self::controller::*;
pub use self::service::*;
