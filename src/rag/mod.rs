//! Local retrieval index over a directory of notes.
//!
//! # Architecture
//!
//! - `scanner`: Walks the notes directory, derives content ids, classifies changes
//! - `chunking`: Splits document lines into overlapping chunks
//! - `embeddings`: Wraps fastembed behind the `Embedder` trait
//! - `vector_index`: In-memory exact inner-product index with positional ids
//! - `vector_storage`: Binary file I/O for vectors.bin persistence
//! - `meta_store`: Slot-addressed chunk records (meta.jsonl + meta.idx)
//! - `builder`: Cold build and the batch writer shared with rebuilds
//! - `rebuild`: Incremental rebuild with full-build fallback
//! - `index`: Loading a committed index
//! - `retrieval`: Query to ranked chunks
//!
//! A chunk's record and its vector always share a slot number, across both
//! stores and across rebuilds.

pub mod builder;
pub mod chunking;
pub mod embeddings;
pub mod index;
pub mod meta_store;
pub mod rebuild;
pub mod retrieval;
pub mod scanner;
pub mod vector_index;
pub mod vector_storage;

/// Default embedding model name
pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";
