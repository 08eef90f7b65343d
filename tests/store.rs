//! Integration tests for `src/store.rs`.

#[path = "store/sqlite_test.rs"]
mod sqlite_test;
