//! Validation of the structuring phase output.
//!
//! Accepts the raw completion text, strips markdown wrapping when the
//! model ignored the no-fences rule, parses, and schema-checks into
//! [`ExtractedOrderGroup`] values. Any failure is a [`SchemaError`]; the
//! orchestrator answers the first one with a single repair call.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Extracted types (wire format camelCase)
// ---------------------------------------------------------------------------

/// How sure the model is that a client matched a catalog entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchConfidence {
    /// No usable match signal.
    #[default]
    Unknown,
    /// Weak or conflicting match.
    Low,
    /// Plausible but not certain match.
    Medium,
    /// Unambiguous catalog match.
    High,
}

/// Review status of one extracted item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    /// Item is fully resolved.
    #[default]
    Confirmed,
    /// Item needs human review before the order can be saved.
    Ambiguous,
}

/// A product reference as extracted, resolved to the catalog when possible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRef {
    /// Catalog product id, `None` when unresolved.
    #[serde(default)]
    pub id: Option<String>,
    /// The name as the model wrote it.
    pub name: String,
}

/// A variant reference as extracted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantRef {
    /// Catalog variant id, `None` when unresolved.
    #[serde(default)]
    pub id: Option<String>,
    /// The name as the model wrote it.
    pub name: String,
}

/// One extracted order line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedLineItem {
    /// The ordered product.
    pub product: ProductRef,
    /// Ordered quantity. Strictly positive; fractional for by-weight items.
    pub quantity: f64,
    /// Chosen variant, when the product comes in variants.
    #[serde(default)]
    pub variant: Option<VariantRef>,
    /// Review status.
    #[serde(default)]
    pub status: ItemStatus,
    /// Candidate products when the item is ambiguous.
    #[serde(default)]
    pub alternatives: Vec<ProductRef>,
    /// Free-text remarks carried through from the message.
    #[serde(default)]
    pub notes: Option<String>,
}

/// The client a group of items belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedClientMatch {
    /// Catalog client id, present only when the match is reliable.
    #[serde(default)]
    pub id: Option<String>,
    /// The client name as written in the message.
    pub name: String,
    /// Match confidence reported by the model.
    #[serde(default)]
    pub match_confidence: MatchConfidence,
}

/// One client order as extracted by the structuring phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedOrderGroup {
    /// The client the items belong to.
    pub client: ExtractedClientMatch,
    /// Extracted order lines. May be empty when the model saw a client
    /// but no decodable items.
    #[serde(default)]
    pub items: Vec<ExtractedLineItem>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a structuring response failed validation.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The text is not valid JSON, even after unwrapping fences.
    #[error("response is not valid JSON: {0}")]
    Parse(String),
    /// The top-level JSON value is not an array.
    #[error("response is not a JSON array")]
    NotArray,
    /// One group violates the schema.
    #[error("group {index}: {reason}")]
    Group {
        /// Zero-based index of the offending group.
        index: usize,
        /// What was wrong with it.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Parse and schema-check a structuring response.
///
/// Tries the text as-is first, then the contents of a markdown code fence.
///
/// # Errors
///
/// Returns [`SchemaError`] describing the first violation found.
pub fn validate_response(text: &str) -> Result<Vec<ExtractedOrderGroup>, SchemaError> {
    let trimmed = text.trim();

    let value = match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(value) => value,
        Err(first_err) => {
            let fenced = extract_json_block(trimmed)
                .and_then(|block| serde_json::from_str::<serde_json::Value>(block).ok());
            match fenced {
                Some(value) => value,
                None => {
                    return Err(SchemaError::Parse(format!(
                        "{first_err}; response starts with: {}",
                        truncate_for_error(trimmed, 200)
                    )));
                }
            }
        }
    };

    let serde_json::Value::Array(raw_groups) = value else {
        return Err(SchemaError::NotArray);
    };

    let mut groups = Vec::with_capacity(raw_groups.len());
    for (index, raw) in raw_groups.into_iter().enumerate() {
        let group: ExtractedOrderGroup =
            serde_json::from_value(raw).map_err(|e| SchemaError::Group {
                index,
                reason: e.to_string(),
            })?;
        check_group(index, &group)?;
        groups.push(group);
    }
    Ok(groups)
}

/// Field-level checks serde cannot express.
fn check_group(index: usize, group: &ExtractedOrderGroup) -> Result<(), SchemaError> {
    if group.client.name.trim().is_empty() {
        return Err(SchemaError::Group {
            index,
            reason: "client name is empty".to_owned(),
        });
    }
    for (item_index, item) in group.items.iter().enumerate() {
        if item.product.name.trim().is_empty() {
            return Err(SchemaError::Group {
                index,
                reason: format!("item {item_index}: product name is empty"),
            });
        }
        if !item.quantity.is_finite() || item.quantity <= 0.0 {
            return Err(SchemaError::Group {
                index,
                reason: format!(
                    "item {item_index}: quantity must be positive, got {}",
                    item.quantity
                ),
            });
        }
    }
    Ok(())
}

/// Extract JSON content from a markdown code fence.
///
/// Supports both ````json ... ```` and ```` ``` ... ``` ```` blocks.
fn extract_json_block(text: &str) -> Option<&str> {
    let start_marker_json = "```json";
    let start_marker_plain = "```";
    let end_marker = "```";

    let content_start = if let Some(pos) = text.find(start_marker_json) {
        pos.checked_add(start_marker_json.len())?
    } else if let Some(pos) = text.find(start_marker_plain) {
        pos.checked_add(start_marker_plain.len())?
    } else {
        return None;
    };

    let rest = text.get(content_start..)?;
    let rest = rest.strip_prefix('\n').unwrap_or(rest);

    let end_pos = rest.find(end_marker)?;
    let content = rest.get(..end_pos)?;
    Some(content.trim())
}

/// Truncate a string for inclusion in error messages.
fn truncate_for_error(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        s
    } else {
        let mut end = max_len;
        while end > 0 && !s.is_char_boundary(end) {
            end = end.saturating_sub(1);
        }
        s.get(..end).unwrap_or(s)
    }
}
