//! MISP (Malware Information Sharing Platform) plugin.
//!
//! Pulls attributes as indicators (incremental or look-back windows, with
//! checkpointed pagination), shares indicators into MISP events, and retracts
//! attributes that are no longer active.

pub mod client;
pub mod config;
pub mod constants;
pub mod plugin;
pub mod types;

pub use client::MispClient;
pub use config::MispConfig;
pub use plugin::{build_search_query, MispPlugin};
