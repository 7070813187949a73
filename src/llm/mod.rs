//! Vision-model extraction of flyer pages into structured items.

pub mod client;
pub mod extraction;

pub use client::{GeminiClient, GeminiConfig};
pub use extraction::{
    Attachment, ExtractionError, FlyerExtractor, ParsedFlyer, ParsedItem, EXTRACTION_PROMPT,
};
