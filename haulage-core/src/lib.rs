#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

pub mod clock;
pub mod config;
pub mod engine;
pub mod entities;
pub mod error;
pub mod events;
pub mod framework;
pub mod geo;
pub mod ids;
pub mod locks;
pub mod oracles;
pub mod pricing;
pub mod processors;
pub mod rate_limit;
pub mod store;
