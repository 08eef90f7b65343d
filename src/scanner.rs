//! Lexical pre-scan of a raw message against the catalog.
//!
//! Runs before any model call and is fully deterministic: tokenize the
//! message, drop filler, then try to account for every remaining token as
//! either a known client first name or a known product/variant name.
//! Tokens that match nothing are reported as unknown so the UI can
//! highlight them, split into segments that concatenate back to the
//! exact original message.

use serde::{Deserialize, Serialize};

use crate::catalog::CatalogSnapshot;

/// How many leading candidate tokens may name the client.
const CLIENT_WINDOW: usize = 3;

/// Filler dropped before matching. Determiners, conjunctions, units,
/// small number words, and politeness filler in Spanish and English.
/// Words of two characters or fewer are dropped unconditionally, so
/// this list only needs the longer ones.
const STOP_WORDS: &[&str] = &[
    // determiners and connectives
    "los", "las", "una", "unos", "unas", "del", "con", "sin", "por", "para", "que", "the", "and",
    "for", "with", "also", "tambien", "también",
    // units and measures
    "kilo", "kilos", "litro", "litros", "gramos", "medio", "media", "docena", "pieza", "piezas",
    "paquete", "paquetes", "bolsa", "bolsas", "caja", "cajas",
    // small number words
    "uno", "dos", "tres", "cuatro", "cinco", "seis", "siete", "ocho", "nueve", "diez", "once",
    "doce", "veinte", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine",
    "ten", "half", "dozen",
    // politeness and order filler
    "hola", "buenas", "buenos", "dias", "días", "tardes", "noches", "gracias", "favor", "porfa",
    "porfavor", "quiero", "quiere", "quieren", "dame", "ponme", "manda", "mandame", "mándame",
    "necesito", "apunta", "apuntame", "apúntame", "please", "thanks", "send", "want", "need",
    "pedido", "pedidos", "orden", "hoy", "manana", "mañana",
];

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

/// Which name list a token failed to match against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownKind {
    /// Token sat in the client window and matched no client first name.
    Client,
    /// Token matched no product or variant name.
    Product,
}

/// A token the scanner could not account for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnknownToken {
    /// Normalized (lowercased, punctuation stripped) token text.
    pub word: String,
    /// Whether the token was expected to be a client or a product.
    pub kind: UnknownKind,
}

/// A run of the original message, marked for highlighting or not.
///
/// Segments are contiguous and in order: concatenating their `text`
/// fields reproduces the original message byte for byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSegment {
    /// Original message text for this run, casing and whitespace intact.
    pub text: String,
    /// Whether this run is an unknown token to highlight.
    pub highlighted: bool,
}

/// Result of scanning one message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    /// Unknown tokens in order of appearance.
    pub unknown: Vec<UnknownToken>,
    /// The message split into highlighted and plain runs.
    pub segments: Vec<MessageSegment>,
}

// ---------------------------------------------------------------------------
// Scan
// ---------------------------------------------------------------------------

/// Scan a message against the catalog.
///
/// An empty catalog produces no unknown tokens: with nothing to match
/// against, flagging every word would be noise rather than signal.
pub fn scan(message: &str, catalog: &CatalogSnapshot) -> ScanReport {
    if catalog.is_empty() {
        return ScanReport {
            unknown: Vec::new(),
            segments: plain_segments(message),
        };
    }

    let client_names: Vec<String> = catalog
        .clients
        .iter()
        .map(|c| c.first_name().to_lowercase())
        .collect();
    // TODO: fold diacritics before matching so "azucar" matches "Azúcar".
    let product_names: Vec<String> = catalog
        .products
        .iter()
        .flat_map(|p| {
            std::iter::once(p.name.to_lowercase())
                .chain(p.variants.iter().map(|v| v.name.to_lowercase()))
        })
        .collect();

    let tokens = candidate_tokens(message);
    let mut flagged: Vec<(RawToken, UnknownKind)> = Vec::new();

    // The client window covers the first few candidate tokens and closes
    // early: informal messages put the client before the first product
    // mention, so once a product (or an unknown) shows up, every later
    // token is a product candidate.
    let mut window_open = true;
    for (position, token) in tokens.into_iter().enumerate() {
        let in_window = window_open && position < CLIENT_WINDOW;

        if in_window && matches_any(&token.word, &client_names) {
            continue;
        }
        if matches_any(&token.word, &product_names) {
            window_open = false;
            continue;
        }
        let kind = if in_window {
            UnknownKind::Client
        } else {
            UnknownKind::Product
        };
        window_open = false;
        flagged.push((token, kind));
    }

    build_report(message, flagged)
}

// ---------------------------------------------------------------------------
// Tokenization
// ---------------------------------------------------------------------------

/// A whitespace-delimited chunk of the message, normalized for matching
/// but remembering its byte span in the original.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RawToken {
    /// Lowercased alphanumeric core of the chunk.
    word: String,
    /// Byte offset of the chunk start in the original message.
    start: usize,
    /// Byte offset one past the chunk end.
    end: usize,
}

/// Split the message into candidate tokens.
///
/// Drops, in order: chunks that normalize to nothing, stop words,
/// pure-numeric tokens, and tokens of two characters or fewer.
fn candidate_tokens(message: &str) -> Vec<RawToken> {
    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;
    let mut end = 0usize;

    for (i, c) in message.char_indices() {
        if c.is_whitespace() {
            if let Some(s) = start.take() {
                push_candidate(message, s, end, &mut tokens);
            }
        } else {
            if start.is_none() {
                start = Some(i);
            }
            end = i.saturating_add(c.len_utf8());
        }
    }
    if let Some(s) = start {
        push_candidate(message, s, end, &mut tokens);
    }

    tokens
}

/// Normalize one chunk and keep it if it survives the filters.
fn push_candidate(message: &str, start: usize, end: usize, out: &mut Vec<RawToken>) {
    let chunk = &message[start..end];
    let word: String = chunk
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect();

    if word.is_empty() || STOP_WORDS.contains(&word.as_str()) {
        return;
    }
    if word.chars().all(|c| c.is_ascii_digit()) {
        return;
    }
    if word.chars().count() <= 2 {
        return;
    }

    out.push(RawToken { word, start, end });
}

/// Substring containment in either direction, both sides lowercased.
///
/// "leches" matches the product "Leche" (name inside token) and "juan"
/// matches the client "Juan Perez" (token equals the first name). Short
/// names make this deliberately permissive; false positives surface
/// downstream as review flags, never as dropped data.
fn matches_any(word: &str, names: &[String]) -> bool {
    names
        .iter()
        .any(|name| name.contains(word) || word.contains(name))
}

// ---------------------------------------------------------------------------
// Segments
// ---------------------------------------------------------------------------

/// Assemble the report from flagged tokens, in appearance order.
fn build_report(message: &str, flagged: Vec<(RawToken, UnknownKind)>) -> ScanReport {
    let mut segments = Vec::new();
    let mut cursor = 0usize;

    for (token, _) in &flagged {
        if token.start > cursor {
            segments.push(MessageSegment {
                text: message[cursor..token.start].to_owned(),
                highlighted: false,
            });
        }
        segments.push(MessageSegment {
            text: message[token.start..token.end].to_owned(),
            highlighted: true,
        });
        cursor = token.end;
    }
    if cursor < message.len() {
        segments.push(MessageSegment {
            text: message[cursor..].to_owned(),
            highlighted: false,
        });
    }

    let unknown = flagged
        .into_iter()
        .map(|(token, kind)| UnknownToken {
            word: token.word,
            kind,
        })
        .collect();

    ScanReport { unknown, segments }
}

/// The whole message as a single unhighlighted segment.
fn plain_segments(message: &str) -> Vec<MessageSegment> {
    if message.is_empty() {
        return Vec::new();
    }
    vec![MessageSegment {
        text: message.to_owned(),
        highlighted: false,
    }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ClientRecord, ProductRecord, VariantRecord};

    fn catalog() -> CatalogSnapshot {
        CatalogSnapshot {
            clients: vec![
                ClientRecord {
                    id: "c1".to_owned(),
                    name: "Juan Perez".to_owned(),
                    phone: None,
                },
                ClientRecord {
                    id: "c2".to_owned(),
                    name: "Maria Lopez".to_owned(),
                    phone: None,
                },
            ],
            products: vec![
                ProductRecord {
                    id: "p1".to_owned(),
                    name: "Leche".to_owned(),
                    price: 25.0,
                    variants: vec![],
                },
                ProductRecord {
                    id: "p2".to_owned(),
                    name: "Queso".to_owned(),
                    price: 80.0,
                    variants: vec![VariantRecord {
                        id: "v1".to_owned(),
                        name: "Oaxaca".to_owned(),
                        price: 95.0,
                    }],
                },
                ProductRecord {
                    id: "p3".to_owned(),
                    name: "Tomate".to_owned(),
                    price: 18.0,
                    variants: vec![],
                },
            ],
        }
    }

    fn joined(report: &ScanReport) -> String {
        report.segments.iter().map(|s| s.text.as_str()).collect()
    }

    #[test]
    fn test_known_client_and_product_produce_no_unknowns() {
        let report = scan("juan 3 leches", &catalog());
        assert!(
            report.unknown.is_empty(),
            "all tokens account for catalog entries: {:?}",
            report.unknown
        );
        assert!(report.segments.iter().all(|s| !s.highlighted));
    }

    #[test]
    fn test_unknown_client_then_unknown_products() {
        let report = scan("xyz 5 cosas raras", &catalog());
        let kinds: Vec<(&str, UnknownKind)> = report
            .unknown
            .iter()
            .map(|u| (u.word.as_str(), u.kind))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("xyz", UnknownKind::Client),
                ("cosas", UnknownKind::Product),
                ("raras", UnknownKind::Product),
            ]
        );
    }

    #[test]
    fn test_empty_catalog_flags_nothing() {
        let report = scan("xyz 5 cosas raras", &CatalogSnapshot::default());
        assert!(report.unknown.is_empty());
        assert_eq!(joined(&report), "xyz 5 cosas raras");
    }

    #[test]
    fn test_segments_round_trip_exactly() {
        let message = "  Hola! XYZ,   2 cosas\traras  para mañana  ";
        let report = scan(message, &catalog());
        assert_eq!(joined(&report), message, "segments must re-join to the original");
    }

    #[test]
    fn test_highlighted_segments_cover_unknown_words() {
        let report = scan("xyz 5 cosas raras", &catalog());
        let highlighted: Vec<&str> = report
            .segments
            .iter()
            .filter(|s| s.highlighted)
            .map(|s| s.text.as_str())
            .collect();
        assert_eq!(highlighted, vec!["xyz", "cosas", "raras"]);
    }

    #[test]
    fn test_highlight_keeps_original_casing() {
        let report = scan("XyZ 2 leches", &catalog());
        assert_eq!(report.unknown.len(), 1);
        assert_eq!(report.unknown[0].word, "xyz");
        let highlighted: Vec<&str> = report
            .segments
            .iter()
            .filter(|s| s.highlighted)
            .map(|s| s.text.as_str())
            .collect();
        assert_eq!(highlighted, vec!["XyZ"]);
    }

    #[test]
    fn test_stop_words_and_numbers_are_skipped() {
        // Everything except "tomate" is filler; it matches a product, so
        // the scan is clean and nothing lands in the client window.
        let report = scan("quiero 2 kilos de tomate por favor", &catalog());
        assert!(report.unknown.is_empty(), "unexpected: {:?}", report.unknown);
    }

    #[test]
    fn test_token_inflection_matches_product() {
        // "leches" contains the product name "leche".
        let report = scan("maria quiere 2 leches", &catalog());
        assert!(report.unknown.is_empty(), "unexpected: {:?}", report.unknown);
    }

    #[test]
    fn test_variant_names_count_as_known() {
        let report = scan("juan 1 queso oaxaca", &catalog());
        assert!(report.unknown.is_empty(), "unexpected: {:?}", report.unknown);
    }

    #[test]
    fn test_client_after_first_product_is_flagged_as_product() {
        // The client window closes at the first product match; later
        // tokens are product candidates even when they name a client.
        let report = scan("leche para juan", &catalog());
        assert_eq!(report.unknown.len(), 1);
        assert_eq!(report.unknown[0].word, "juan");
        assert_eq!(report.unknown[0].kind, UnknownKind::Product);
    }

    #[test]
    fn test_client_match_never_reported_as_product() {
        let report = scan("juan maria 3 leches", &catalog());
        assert!(
            report.unknown.is_empty(),
            "client-window matches must be consumed: {:?}",
            report.unknown
        );
    }

    #[test]
    fn test_only_filler_yields_plain_message() {
        let report = scan("hola buenas por favor", &catalog());
        assert!(report.unknown.is_empty());
        assert_eq!(joined(&report), "hola buenas por favor");
        assert_eq!(report.segments.len(), 1);
        assert!(!report.segments[0].highlighted);
    }

    #[test]
    fn test_empty_message() {
        let report = scan("", &catalog());
        assert!(report.unknown.is_empty());
        assert!(report.segments.is_empty());
    }

    #[test]
    fn test_punctuation_stripped_before_matching() {
        let report = scan("juan: 3 leches!!", &catalog());
        assert!(report.unknown.is_empty(), "unexpected: {:?}", report.unknown);
        assert_eq!(joined(&report), "juan: 3 leches!!");
    }

    #[test]
    fn test_short_tokens_dropped() {
        // "te" is two characters and is dropped before matching.
        let report = scan("juan un te", &catalog());
        assert!(report.unknown.is_empty(), "unexpected: {:?}", report.unknown);
    }

    #[test]
    fn test_multibyte_message_round_trip() {
        let message = "Ramón pidió 2 leches y algo más ñoño";
        let report = scan(message, &catalog());
        assert_eq!(joined(&report), message);
    }
}
