//! Comanda extracts structured draft orders from free-text messages.
//!
//! A seller pastes a customer message (often several orders jumbled
//! together); comanda scans it against the catalog for instant feedback,
//! then runs a staged LLM pipeline that breaks the message into
//! per-client chunks, structures each chunk into order groups, validates
//! the result against a strict schema, and repairs one malformed reply
//! before giving up. Extracted groups land on a board of draft cards the
//! seller can edit and save to SQLite once complete.
//!
//! The crate is organized around that flow:
//!
//! - [`catalog`] holds the catalog snapshot and the store trait.
//! - [`scanner`] flags words the catalog cannot account for, no model involved.
//! - [`completion`] speaks to the Gemini generateContent endpoint.
//! - [`pipeline`] runs the phased extraction with progress reporting.
//! - [`orders`] merges extracted groups into editable draft cards.
//! - [`session`] ties catalog, pipeline, and board together behind one facade.
//! - [`store`] is the SQLite implementation of the catalog store.
//! - [`config`] and [`logging`] carry file/env configuration and tracing setup.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod catalog;
pub mod completion;
pub mod config;
pub mod logging;
pub mod orders;
pub mod pipeline;
pub mod scanner;
pub mod session;
pub mod store;
