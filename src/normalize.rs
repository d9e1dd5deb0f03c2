//! Response normalization
//!
//! Upstream servers return a mix of shapes: a structured `content` array, a
//! bare string, or an arbitrary JSON value. Every tool invocation result is
//! folded into one canonical [`ResponseEnvelope`] so callers never see a raw
//! upstream shape.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// One block of normalized response content
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    /// Plain text
    Text(String),
    /// Structured block passed through unchanged
    Opaque(Value),
}

impl ContentBlock {
    /// Create a text block
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Text payload, if this is a text block
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Opaque(_) => None,
        }
    }
}

impl Serialize for ContentBlock {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Text(text) => {
                let mut map = Map::new();
                map.insert("kind".to_string(), Value::String("text".to_string()));
                map.insert("text".to_string(), Value::String(text.clone()));
                Value::Object(map).serialize(serializer)
            }
            Self::Opaque(value) => value.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for ContentBlock {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        match &value {
            Value::Object(map) if map.get("kind").and_then(Value::as_str) == Some("text") => {
                let text = map
                    .get("text")
                    .and_then(Value::as_str)
                    .ok_or_else(|| D::Error::custom("text block without text field"))?;
                Ok(Self::Text(text.to_string()))
            }
            _ => Ok(Self::Opaque(value)),
        }
    }
}

/// Canonical shape of a tool invocation result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    /// Ordered content blocks
    pub content_blocks: Vec<ContentBlock>,
    /// Upstream-reported error, if any
    pub error: Option<String>,
    /// Identifier of the connection that served the call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_server: Option<String>,
}

impl ResponseEnvelope {
    /// Empty envelope with no error
    pub fn empty() -> Self {
        Self {
            content_blocks: Vec::new(),
            error: None,
            source_server: None,
        }
    }

    /// Annotate the envelope with the connection that served it
    pub fn with_source(mut self, identifier: impl Into<String>) -> Self {
        self.source_server = Some(identifier.into());
        self
    }

    /// Concatenated text of all text blocks
    pub fn text(&self) -> String {
        self.content_blocks
            .iter()
            .filter_map(ContentBlock::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Fold an arbitrary upstream result into a [`ResponseEnvelope`].
///
/// Pure function: no side effects, no speculative field access beyond the
/// `content` and `error` keys.
pub fn normalize(result: Option<Value>) -> ResponseEnvelope {
    let value = match result {
        None | Some(Value::Null) => return ResponseEnvelope::empty(),
        Some(value) => value,
    };

    if let Value::String(text) = value {
        return ResponseEnvelope {
            content_blocks: vec![ContentBlock::Text(text)],
            error: None,
            source_server: None,
        };
    }

    if let Value::Object(ref map) = value {
        if let Some(Value::Array(items)) = map.get("content") {
            let content_blocks = items
                .iter()
                .map(|item| match item {
                    Value::String(text) => ContentBlock::Text(text.clone()),
                    other => ContentBlock::Opaque(other.clone()),
                })
                .collect();

            let error = match map.get("error") {
                None | Some(Value::Null) => None,
                Some(Value::String(message)) => Some(message.clone()),
                Some(other) => Some(other.to_string()),
            };

            return ResponseEnvelope {
                content_blocks,
                error,
                source_server: None,
            };
        }
    }

    // Anything else is rendered as readable text
    let text = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
    ResponseEnvelope {
        content_blocks: vec![ContentBlock::Text(text)],
        error: None,
        source_server: None,
    }
}
