//! hnkw-store: Persistent keyword embedding cache
//!
//! This crate provides the storage core of the keyword pipeline:
//! - Lossless byte encoding of `f32` embedding vectors
//! - A SQLite-backed keyword -> vector table with batched upserts
//! - Scoped open/close with use-after-close detection

pub mod codec;
pub mod store;

pub use codec::{CodecError, ELEMENT_WIDTH};
pub use store::{EmbeddingStore, StoreConfig, StoreError, StoreStats};
