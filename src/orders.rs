//! Draft order board: aggregation, completeness, and edits.
//!
//! Validated order groups land here as draft cards, one per client.
//! Groups sharing a resolved catalog client merge into a single card;
//! groups whose client never resolved stay separate, because two unknown
//! "pepe"s are not provably the same person. Every mutation recomputes
//! nothing: completeness is derived on read, and it is the only gate for
//! persisting a card.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::{CatalogSnapshot, NewOrder, NewOrderItem};
use crate::pipeline::validator::{
    ExtractedClientMatch, ExtractedLineItem, ExtractedOrderGroup, ItemStatus, MatchConfidence,
    ProductRef, VariantRef,
};

// ---------------------------------------------------------------------------
// Cards
// ---------------------------------------------------------------------------

/// Lifecycle of a draft card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardState {
    /// Editable draft, not yet persisted.
    Pending,
    /// Persisted. Frozen against further edits.
    Saved,
}

/// One per-client draft order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftOrderCard {
    /// Persisted order id, set once the card is saved.
    pub order_id: Option<String>,
    /// The client this order belongs to.
    pub client: ExtractedClientMatch,
    /// Order lines, in extraction order.
    pub items: Vec<ExtractedLineItem>,
    /// Whether the order was already paid.
    pub paid: bool,
    /// Draft lifecycle state.
    pub state: CardState,
}

impl DraftOrderCard {
    fn new(client: ExtractedClientMatch, items: Vec<ExtractedLineItem>) -> Self {
        Self {
            order_id: None,
            client,
            items,
            paid: false,
            state: CardState::Pending,
        }
    }

    /// Whether this card may be persisted as-is.
    ///
    /// Requires a resolved client at high confidence, at least one item,
    /// and every item resolved, positively quantified, and unambiguous.
    /// An empty card is never complete: an order with no lines cannot be
    /// charged.
    pub fn is_complete(&self) -> bool {
        self.client.id.is_some()
            && self.client.match_confidence == MatchConfidence::High
            && !self.items.is_empty()
            && self.items.iter().all(item_complete)
    }

    /// Monetary total from catalog prices.
    ///
    /// Uses the variant price when one is resolved, the product price
    /// otherwise. Items without a resolved product contribute nothing.
    pub fn total(&self, catalog: &CatalogSnapshot) -> f64 {
        self.items
            .iter()
            .filter_map(|item| {
                let product_id = item.product.id.as_deref()?;
                let variant_id = item.variant.as_ref().and_then(|v| v.id.as_deref());
                let unit = catalog
                    .unit_price(product_id, variant_id)
                    .or_else(|| catalog.unit_price(product_id, None))?;
                Some(unit * item.quantity)
            })
            .sum()
    }
}

fn item_complete(item: &ExtractedLineItem) -> bool {
    item.product.id.is_some() && item.quantity > 0.0 && item.status != ItemStatus::Ambiguous
}

// ---------------------------------------------------------------------------
// Edits
// ---------------------------------------------------------------------------

/// A single edit to a draft card.
#[derive(Debug, Clone, PartialEq)]
pub enum CardEdit {
    /// Change an item's quantity.
    SetQuantity {
        /// Item index within the card.
        item: usize,
        /// New quantity, strictly positive.
        quantity: f64,
    },
    /// Delete an item.
    RemoveItem {
        /// Item index within the card.
        item: usize,
    },
    /// Append an item.
    AddItem {
        /// The item to append.
        item: ExtractedLineItem,
    },
    /// Resolve an item to a catalog product.
    AssignProduct {
        /// Item index within the card.
        item: usize,
        /// Catalog product id.
        product_id: String,
    },
    /// Resolve an item's variant.
    AssignVariant {
        /// Item index within the card.
        item: usize,
        /// Catalog variant id, of the item's product.
        variant_id: String,
    },
    /// Resolve the card's client.
    AssignClient {
        /// Catalog client id.
        client_id: String,
    },
    /// Mark an ambiguous item as reviewed and confirmed.
    ConfirmItem {
        /// Item index within the card.
        item: usize,
    },
    /// Toggle the paid flag.
    SetPaid {
        /// New paid state.
        paid: bool,
    },
    /// Replace an item's free-text notes.
    SetNotes {
        /// Item index within the card.
        item: usize,
        /// New notes, or `None` to clear.
        notes: Option<String>,
    },
}

/// Why a board operation was rejected.
#[derive(Debug, Error)]
pub enum BoardError {
    /// No card at the given index.
    #[error("no card at index {0}")]
    CardIndex(usize),
    /// No item at the given index within the card.
    #[error("card {card}: no item at index {item}")]
    ItemIndex {
        /// Card index.
        card: usize,
        /// Item index.
        item: usize,
    },
    /// The product id is not in the catalog.
    #[error("unknown product id: {0}")]
    UnknownProduct(String),
    /// The variant id does not belong to the item's product.
    #[error("unknown variant id {variant} for product {product}")]
    UnknownVariant {
        /// The item's product id.
        product: String,
        /// The rejected variant id.
        variant: String,
    },
    /// The client id is not in the catalog.
    #[error("unknown client id: {0}")]
    UnknownClient(String),
    /// The item needs a resolved product first.
    #[error("card {card} item {item}: assign a product first")]
    ProductRequired {
        /// Card index.
        card: usize,
        /// Item index.
        item: usize,
    },
    /// The item's product comes in variants and none is resolved.
    #[error("card {card} item {item}: choose a variant first")]
    VariantRequired {
        /// Card index.
        card: usize,
        /// Item index.
        item: usize,
    },
    /// The card is not complete, so it cannot be persisted.
    #[error("card {0} is not complete")]
    Incomplete(usize),
    /// The quantity is not strictly positive.
    #[error("quantity must be positive, got {0}")]
    InvalidQuantity(f64),
    /// The card was already saved and is frozen.
    #[error("card {0} is already saved")]
    AlreadySaved(usize),
}

// ---------------------------------------------------------------------------
// Board
// ---------------------------------------------------------------------------

/// The set of draft cards produced by the latest analysis.
#[derive(Debug, Clone, Default)]
pub struct OrderBoard {
    cards: Vec<DraftOrderCard>,
}

impl OrderBoard {
    /// Create an empty board.
    pub fn new() -> Self {
        Self::default()
    }

    /// All cards, in board order.
    pub fn cards(&self) -> &[DraftOrderCard] {
        &self.cards
    }

    /// One card by index.
    pub fn card(&self, index: usize) -> Option<&DraftOrderCard> {
        self.cards.get(index)
    }

    /// Number of cards on the board.
    pub fn len(&self) -> usize {
        self.cards.len()
    }

    /// Whether the board has no cards.
    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// Whether every pending card may be persisted.
    pub fn all_complete(&self) -> bool {
        self.cards
            .iter()
            .filter(|card| card.state == CardState::Pending)
            .all(DraftOrderCard::is_complete)
    }

    /// Replace the board with freshly extracted groups.
    ///
    /// Groups with the same resolved client id merge into one card, items
    /// appended in group order and confidence kept at the highest seen.
    /// Groups without a resolved client each get their own card. Items
    /// whose product has variants but none resolved are marked ambiguous
    /// here, never dropped; zero-item groups are kept as incomplete cards.
    pub fn ingest(&mut self, groups: Vec<ExtractedOrderGroup>, catalog: &CatalogSnapshot) {
        let mut cards: Vec<DraftOrderCard> = Vec::new();
        let mut by_client: HashMap<String, usize> = HashMap::new();

        for group in groups {
            let mut client = group.client;
            // An id the catalog does not know is no id at all.
            if client
                .id
                .as_deref()
                .is_some_and(|id| catalog.client(id).is_none())
            {
                client.id = None;
            }

            let mut items = group.items;
            for item in &mut items {
                normalize_item(item, catalog);
            }

            let Some(id) = client.id.clone() else {
                cards.push(DraftOrderCard::new(client, items));
                continue;
            };

            if let Some(card) = by_client.get(&id).and_then(|&index| cards.get_mut(index)) {
                card.items.extend(items);
                card.client.match_confidence =
                    card.client.match_confidence.max(client.match_confidence);
                continue;
            }
            by_client.insert(id, cards.len());
            cards.push(DraftOrderCard::new(client, items));
        }

        self.cards = cards;
    }

    /// Apply one edit to a pending card.
    ///
    /// # Errors
    ///
    /// Returns [`BoardError`] on bad indices, unknown catalog ids, or a
    /// saved card; the board is unchanged on error.
    pub fn apply(
        &mut self,
        card_index: usize,
        edit: CardEdit,
        catalog: &CatalogSnapshot,
    ) -> Result<(), BoardError> {
        let card = self
            .cards
            .get_mut(card_index)
            .ok_or(BoardError::CardIndex(card_index))?;
        if card.state == CardState::Saved {
            return Err(BoardError::AlreadySaved(card_index));
        }

        match edit {
            CardEdit::SetQuantity { item, quantity } => {
                if !quantity.is_finite() || quantity <= 0.0 {
                    return Err(BoardError::InvalidQuantity(quantity));
                }
                item_mut(card, card_index, item)?.quantity = quantity;
            }
            CardEdit::RemoveItem { item } => {
                if item >= card.items.len() {
                    return Err(BoardError::ItemIndex {
                        card: card_index,
                        item,
                    });
                }
                card.items.remove(item);
            }
            CardEdit::AddItem { item } => {
                let mut item = item;
                normalize_item(&mut item, catalog);
                card.items.push(item);
            }
            CardEdit::AssignProduct { item, product_id } => {
                let product = catalog
                    .product(&product_id)
                    .ok_or_else(|| BoardError::UnknownProduct(product_id.clone()))?;
                let has_variants = !product.variants.is_empty();
                let name = product.name.clone();
                let entry = item_mut(card, card_index, item)?;
                entry.product = ProductRef {
                    id: Some(product_id),
                    name,
                };
                entry.variant = None;
                entry.alternatives.clear();
                entry.status = if has_variants {
                    ItemStatus::Ambiguous
                } else {
                    ItemStatus::Confirmed
                };
            }
            CardEdit::AssignVariant { item, variant_id } => {
                let product_id = card
                    .items
                    .get(item)
                    .ok_or(BoardError::ItemIndex {
                        card: card_index,
                        item,
                    })?
                    .product
                    .id
                    .clone()
                    .ok_or(BoardError::ProductRequired {
                        card: card_index,
                        item,
                    })?;
                let variant = catalog
                    .product(&product_id)
                    .and_then(|p| p.variant(&variant_id))
                    .ok_or_else(|| BoardError::UnknownVariant {
                        product: product_id,
                        variant: variant_id.clone(),
                    })?;
                let name = variant.name.clone();
                let entry = item_mut(card, card_index, item)?;
                entry.variant = Some(VariantRef {
                    id: Some(variant_id),
                    name,
                });
                entry.alternatives.clear();
                entry.status = ItemStatus::Confirmed;
            }
            CardEdit::AssignClient { client_id } => {
                let client = catalog
                    .client(&client_id)
                    .ok_or_else(|| BoardError::UnknownClient(client_id.clone()))?;
                card.client = ExtractedClientMatch {
                    id: Some(client_id),
                    name: client.name.clone(),
                    match_confidence: MatchConfidence::High,
                };
            }
            CardEdit::ConfirmItem { item } => {
                let entry = item_mut(card, card_index, item)?;
                let unresolved_variant = entry.product.id.as_deref().is_some_and(|product_id| {
                    catalog.product(product_id).is_some_and(|product| {
                        !product.variants.is_empty()
                            && entry
                                .variant
                                .as_ref()
                                .and_then(|v| v.id.as_deref())
                                .and_then(|vid| product.variant(vid))
                                .is_none()
                    })
                });
                if unresolved_variant {
                    return Err(BoardError::VariantRequired {
                        card: card_index,
                        item,
                    });
                }
                entry.status = ItemStatus::Confirmed;
            }
            CardEdit::SetPaid { paid } => {
                card.paid = paid;
            }
            CardEdit::SetNotes { item, notes } => {
                item_mut(card, card_index, item)?.notes = notes;
            }
        }
        Ok(())
    }

    /// Delete a card.
    ///
    /// # Errors
    ///
    /// Returns [`BoardError::CardIndex`] when the index is out of range.
    pub fn remove(&mut self, card_index: usize) -> Result<DraftOrderCard, BoardError> {
        if card_index >= self.cards.len() {
            return Err(BoardError::CardIndex(card_index));
        }
        Ok(self.cards.remove(card_index))
    }

    /// Convert a complete pending card into its persistence record.
    ///
    /// # Errors
    ///
    /// Returns [`BoardError`] when the card is missing, saved, incomplete,
    /// or references catalog ids that no longer resolve.
    pub fn to_new_order(
        &self,
        card_index: usize,
        catalog: &CatalogSnapshot,
    ) -> Result<NewOrder, BoardError> {
        let card = self
            .cards
            .get(card_index)
            .ok_or(BoardError::CardIndex(card_index))?;
        if card.state == CardState::Saved {
            return Err(BoardError::AlreadySaved(card_index));
        }
        if !card.is_complete() {
            return Err(BoardError::Incomplete(card_index));
        }
        let client_id = card
            .client
            .id
            .clone()
            .ok_or(BoardError::Incomplete(card_index))?;

        let mut items = Vec::with_capacity(card.items.len());
        for item in &card.items {
            let product_id = item
                .product
                .id
                .clone()
                .ok_or(BoardError::Incomplete(card_index))?;
            let variant_id = item.variant.as_ref().and_then(|v| v.id.clone());
            let unit_price = catalog
                .unit_price(&product_id, variant_id.as_deref())
                .ok_or_else(|| BoardError::UnknownProduct(product_id.clone()))?;
            items.push(NewOrderItem {
                product_id,
                variant_id,
                quantity: item.quantity,
                unit_price,
            });
        }

        Ok(NewOrder {
            client_id,
            paid: card.paid,
            items,
        })
    }

    /// Record that a card was persisted under `order_id`.
    ///
    /// # Errors
    ///
    /// Returns [`BoardError::CardIndex`] when the index is out of range.
    pub fn mark_saved(&mut self, card_index: usize, order_id: String) -> Result<(), BoardError> {
        let card = self
            .cards
            .get_mut(card_index)
            .ok_or(BoardError::CardIndex(card_index))?;
        card.order_id = Some(order_id);
        card.state = CardState::Saved;
        Ok(())
    }
}

fn item_mut<'a>(
    card: &'a mut DraftOrderCard,
    card_index: usize,
    item: usize,
) -> Result<&'a mut ExtractedLineItem, BoardError> {
    card.items.get_mut(item).ok_or(BoardError::ItemIndex {
        card: card_index,
        item,
    })
}

/// Normalization at ingest time.
///
/// A product id the catalog does not know is cleared. An item whose
/// product comes in variants with none resolved is marked ambiguous. A
/// variant on a variant-less product is dropped.
fn normalize_item(item: &mut ExtractedLineItem, catalog: &CatalogSnapshot) {
    let Some(product_id) = item.product.id.as_deref() else {
        return;
    };
    let Some(product) = catalog.product(product_id) else {
        item.product.id = None;
        return;
    };
    if product.variants.is_empty() {
        item.variant = None;
        return;
    }
    let resolved = item
        .variant
        .as_ref()
        .and_then(|v| v.id.as_deref())
        .and_then(|vid| product.variant(vid))
        .is_some();
    if !resolved {
        item.status = ItemStatus::Ambiguous;
    }
}
