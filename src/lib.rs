//! Discord channel history link grabber
//!
//! This library provides tools to:
//! - Page through the full message history of Discord channels over REST
//! - Extract inline URLs and attachment URLs from every message
//! - Append them to a plain-text log framed by per-channel markers
//! - Expose scrape progress as Prometheus metrics

pub mod config;
pub mod discord;
pub mod error;
pub mod links;
pub mod metrics;
pub mod output;
pub mod scraper;
pub mod session;

// Re-export common types
pub use config::{Config, Overrides};
pub use discord::{Attachment, DiscordClient, Message};
pub use error::{Error, Result};
pub use links::LinkExtractor;
pub use output::LinkSink;
pub use scraper::{HistoryScraper, MessageSource, ScrapeRequest, ScrapeSummary};
pub use session::{RunLock, Session};
