#![cfg_attr(not(test), forbid(unsafe_code))]
#![deny(warnings, clippy::pedantic)]
#![allow(clippy::multiple_crate_versions)]

//! Configuration and wire models shared by the Ephemera binaries.

pub mod config;
pub mod models;
