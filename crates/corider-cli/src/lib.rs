//! Corider CLI library
//!
//! Configuration loading, production wiring and command handlers behind the
//! `corider` binary.

#![allow(missing_docs)]

/// Session, transport and dispatch wiring
pub mod client;

/// Command handlers
pub mod commands;

/// Client configuration file
pub mod config;

pub use client::Client;
pub use config::ClientConfig;
