//! flyerfeed: retail flyer acquisition, extraction and reconciliation.
//!
//! Flyers are crawled from a public aggregator, stored page by page, parsed
//! by a vision model into priced items, and merged into a SQLite database.

pub mod config;
pub mod llm;
pub mod mail;
pub mod models;
pub mod repository;
pub mod schema;
pub mod scrapers;
pub mod services;
pub mod storage;

pub use config::{load_settings, Settings};
