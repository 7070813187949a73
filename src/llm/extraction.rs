//! Extraction contract: what goes to the vision model and what comes back.

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Instructions sent alongside every page image.
pub const EXTRACTION_PROMPT: &str = r#"Extract information from this flyer.
For each item, provide a "bounding_box" that encompasses the entire area relevant to that item, which MUST include:
1. The image of the item.
2. The name/description text of the item.
3. The price tag.

Include the following for each item:
1. a list of "categories" (e.g., fruits, tools, selfcare, toys, meat, etc.). MUST be in English.
2. a list of "keywords" (e.g., beer, toothpaste, cafe, meat, chicken, lego, cheese, etc.). MUST be in English.
3. original price if available.
4. "start_date" and "end_date" (YYYY-MM-DD) if different from the whole flyer validity; otherwise use the flyer's dates for the item too.

Return JSON in the following format:
{
  "start_date": "YYYY-MM-DD or empty if not found",
  "end_date": "YYYY-MM-DD or empty if not found",
  "items": [
    {
      "name": "Item name",
      "price": 12.34,
      "original_price": 15.99,
      "quantity": "kg, 100g, pcs, pack, etc.",
      "start_date": "YYYY-MM-DD",
      "end_date": "YYYY-MM-DD",
      "bounding_box": [ymin, xmin, ymax, xmax],
      "categories": ["category 1", "category 2"],
      "keywords": ["keyword1", "keyword2"]
    }
  ]
}
Return ONLY valid JSON. Do not include any text before or after the JSON block. Do not include comments or trailing commas. Ensure all strings are properly escaped.
Keep bounding box coordinates as normalized values [0, 1000].
The bounding box should be generous enough to capture all the mentioned elements without cutting them off."#;

/// A document handed to the extractor.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn new(filename: impl Into<String>, content_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            data,
        }
    }

    /// Build an attachment, sniffing the MIME type from the content.
    pub fn sniffed(filename: impl Into<String>, data: Vec<u8>) -> Self {
        let content_type = infer::get(&data)
            .map(|kind| kind.mime_type().to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());
        Self::new(filename, content_type, data)
    }

    /// Images and PDFs are the only content the model accepts.
    pub fn is_supported(&self) -> bool {
        self.content_type.starts_with("image/") || self.is_pdf()
    }

    pub fn is_pdf(&self) -> bool {
        self.content_type == "application/pdf"
    }
}

/// Treat an explicit JSON `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Extraction result for one flyer page (or document).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedFlyer {
    /// `YYYY-MM-DD` or empty.
    #[serde(default, deserialize_with = "null_as_default")]
    pub start_date: String,
    /// `YYYY-MM-DD` or empty.
    #[serde(default, deserialize_with = "null_as_default")]
    pub end_date: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub items: Vec<ParsedItem>,
}

/// One product offer as returned by the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedItem {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub price: f64,
    #[serde(default)]
    pub original_price: Option<f64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub quantity: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub start_date: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub end_date: String,
    /// `[ymin, xmin, ymax, xmax]` normalized to 0..=1000.
    #[serde(default, deserialize_with = "null_as_default")]
    pub bounding_box: Vec<f64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub categories: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub keywords: Vec<String>,
}

impl ParsedItem {
    /// The bounding box as a fixed array, if it has exactly four values.
    pub fn bounding_box(&self) -> Option<[f64; 4]> {
        self.bounding_box.as_slice().try_into().ok()
    }
}

/// Everything that can go wrong in one extraction call.
///
/// All variants count as a single failed attempt for the page.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("no attachments to parse")]
    NoAttachments,

    #[error("no supported attachments (images or PDF) found for parsing")]
    UnsupportedAttachments,

    #[error("extraction API key is not configured")]
    MissingApiKey,

    #[error("connection error: {0}")]
    Connection(#[from] reqwest::Error),

    #[error("rate limited by extraction service")]
    RateLimited,

    #[error("API error: HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("empty response from extraction service")]
    EmptyResponse,

    #[error("failed to unmarshal JSON: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Turns page images into structured flyer data.
#[async_trait]
pub trait FlyerExtractor: Send + Sync {
    async fn extract(&self, attachments: &[Attachment]) -> Result<ParsedFlyer, ExtractionError>;
}

/// Strip markdown code fences the model sometimes wraps JSON in.
pub fn clean_json(raw: &str) -> &str {
    let s = raw.trim();
    let s = if let Some(rest) = s.strip_prefix("```json") {
        rest.strip_suffix("```").unwrap_or(rest)
    } else if let Some(rest) = s.strip_prefix("```") {
        rest.strip_suffix("```").unwrap_or(rest)
    } else {
        s
    };
    s.trim()
}

/// Parse a model reply into a [`ParsedFlyer`].
pub fn parse_reply(raw: &str) -> Result<ParsedFlyer, ExtractionError> {
    let json = clean_json(raw);
    if json.is_empty() {
        return Err(ExtractionError::EmptyResponse);
    }
    Ok(serde_json::from_str(json)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_json() {
        assert_eq!(clean_json("```json\n{\"key\": \"value\"}\n```"), "{\"key\": \"value\"}");
        assert_eq!(clean_json("```\n{\"key\": \"value\"}\n```"), "{\"key\": \"value\"}");
        assert_eq!(clean_json("{\"key\": \"value\"}"), "{\"key\": \"value\"}");
        assert_eq!(clean_json("   \n{\"key\": \"value\"}\n   "), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_parse_reply_with_nulls() {
        let raw = r#"```json
        {
          "start_date": "2025-03-03",
          "end_date": null,
          "items": [
            {
              "name": "Pilsner Urquell 0,5 l",
              "price": 24.9,
              "original_price": null,
              "quantity": null,
              "bounding_box": [100, 100, 200, 200],
              "categories": ["drinks"],
              "keywords": null
            }
          ]
        }
        ```"#;

        let parsed = parse_reply(raw).unwrap();
        assert_eq!(parsed.start_date, "2025-03-03");
        assert_eq!(parsed.end_date, "");
        assert_eq!(parsed.items.len(), 1);

        let item = &parsed.items[0];
        assert_eq!(item.original_price, None);
        assert_eq!(item.quantity, "");
        assert!(item.keywords.is_empty());
        assert_eq!(item.bounding_box(), Some([100.0, 100.0, 200.0, 200.0]));
    }

    #[test]
    fn test_parse_reply_errors() {
        assert!(matches!(parse_reply("  "), Err(ExtractionError::EmptyResponse)));
        assert!(matches!(
            parse_reply("{\"items\": [}"),
            Err(ExtractionError::Malformed(_))
        ));
    }

    #[test]
    fn test_bounding_box_requires_four_values() {
        let item = ParsedItem {
            bounding_box: vec![1.0, 2.0, 3.0],
            ..Default::default()
        };
        assert_eq!(item.bounding_box(), None);
    }

    #[test]
    fn test_attachment_support() {
        assert!(Attachment::new("a.jpg", "image/jpeg", vec![]).is_supported());
        assert!(Attachment::new("a.pdf", "application/pdf", vec![]).is_supported());
        assert!(!Attachment::new("a.txt", "text/plain", vec![]).is_supported());

        let pdf = Attachment::sniffed("x", b"%PDF-1.7\n".to_vec());
        assert!(pdf.is_pdf());
    }
}
