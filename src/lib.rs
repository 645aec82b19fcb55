//! # caskdb_core
//!
//! A log-structured, append-only key-value storage engine in the Bitcask
//! tradition: every write is appended to an open segment file, an in-memory
//! index (the "KeyDir") maps each live key to its most recent record, and
//! reads are a single seek-and-read against that record's offset.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                      Engine                           │
//! │  (public facade: open, set, get, delete, scan,        │
//! │   split, compact, close)                              │
//! └──────────┬──────────────────────────┬────────────────┘
//!            │                          │
//! ┌──────────▼──────────┐    ┌──────────▼───────────────┐
//! │       KeyDir         │    │       Registry            │
//! │  (key -> offset)      │    │  (segment id -> file)     │
//! └──────────┬──────────┘    └──────────┬───────────────┘
//!            │                          │
//! ┌──────────▼──────────────────────────▼───────────────┐
//! │                    SegmentSet                         │
//! │        (one open file handle per segment id)          │
//! └─────────────────────┬───────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────┐
//! │                      codec                            │
//! │   (crc32 || timestamp || key_size || value_size ||    │
//! │                   key || value)                       │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Invariants
//!
//! - **Append-only**: live data is never rewritten in place; deletes are
//!   tombstone records.
//! - **Single writer**: one process owns a store at a time, enforced by an
//!   advisory file lock.
//! - **Crash safety**: every record is checksummed; the registry is written
//!   with a temp-file-then-rename so a crash mid-save never leaves a
//!   half-written registry.
//! - **Startup replay**: the KeyDir is never itself persisted — it is
//!   rebuilt by replaying every segment in ascending id order each time the
//!   store is opened.
//!
//! ## Example
//!
//! ```rust,ignore
//! use caskdb_core::{Engine, EngineOptions};
//! use std::path::Path;
//!
//! let mut engine = Engine::open(Path::new("./data/registry.json"), EngineOptions::default())?;
//! engine.set("name", "jojo")?;
//! assert_eq!(engine.get("name")?, "jojo");
//! engine.delete("name")?;
//! engine.close()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod config;
mod engine;
mod error;
mod keydir;
mod registry;
mod segment_set;

pub use codec::{Header, Record};
pub use config::{EngineOptions, SegmentSizeLimit};
pub use engine::Engine;
pub use error::{CaskError, CaskResult};
pub use keydir::{KeyDir, KeyDirEntry};
pub use registry::Registry;
pub use segment_set::SegmentSet;
