#![cfg_attr(not(test), forbid(unsafe_code))]
#![deny(warnings, clippy::pedantic)]
#![allow(clippy::multiple_crate_versions)]

//! Ephemera keeps watched chat channels ephemeral.
//!
//! Messages are discovered live through the gateway and retroactively through
//! a paginated history walk; each one is deleted once it is older than the
//! configured TTL.

pub mod backfill;
pub mod error;
pub mod gateway;
pub mod http;
pub mod orchestrator;
pub mod rest;
pub mod scheduler;
pub mod tracer;

pub use error::{BotError, BotResult};
pub use orchestrator::Orchestrator;
