//! Command handlers

pub mod config;
pub mod ops;
pub mod pending;
pub mod status;
pub mod sync;
pub mod transfers;
pub mod watch;
