//! Contract Address Relay Library
//!
//! Extracts token announcements from Telegram messages, filters them by
//! quality tier, suppresses duplicates and forwards them to destination
//! chats.

pub mod cli;
pub mod config;
pub mod dedup;
pub mod delivery;
pub mod error;
pub mod extract;
pub mod filter;
pub mod platform;
pub mod relay;
pub mod store;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
