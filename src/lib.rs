//! # CinderKV
//!
//! An embeddable, ordered key-value storage engine built on a
//! **Log-Structured Merge (LSM)** architecture. Designed for high write
//! throughput, lock-free concurrent reads, and bounded memory.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                       Engine                            │
//! │  ┌────────────┐   ┌─────────────┐   ┌───────────────┐   │
//! │  │   Active   │   │  Flushing   │   │  Sorted runs  │   │
//! │  │  memtable  │   │  memtable   │   │   (on disk)   │   │
//! │  └─────┬──────┘   └──────┬──────┘   └───────┬───────┘   │
//! │        │   freeze        │   flush          │           │
//! │        └─────────►       └─────────►        │           │
//! │                                             │           │
//! │  ┌──────────────────────────────────────────┘           │
//! │  │  Compaction (all runs → one, newest-wins)            │
//! │  └──────────────────────────────────────────────────────│
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | Core storage engine — open, read, write, scan, flush, compact |
//! | [`memtable`] | Lock-free in-memory write buffer with an overflow latch |
//! | [`run`] | Immutable, sorted, on-disk run files with a random-access index |
//! | [`storage`] | The ordered set of sorted runs backing a data directory |
//! | [`encoding`] | Hand-written little-endian codec for on-disk records |
//!
//! ## Key Features
//!
//! - **Lock-free concurrent reads and writes** — the memtable is a
//!   concurrent skip list; upserts share the coordination lock and never
//!   wait on each other.
//! - **Single background flusher** — one worker thread handles flushes
//!   and compaction; overflowing writers get back-pressure instead of
//!   unbounded queueing.
//! - **Newest-wins merging** — reads and scans resolve the active
//!   memtable, the flushing memtable, and every sorted run through a
//!   priority-ordered k-way merge with tombstone masking.
//! - **Atomic run publication** — run files become visible only after a
//!   fully synced temp file is renamed into place; a crash can never
//!   expose a partial run.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cinderkv::{Engine, EngineConfig};
//!
//! let engine = Engine::open(EngineConfig {
//!     data_dir: "/tmp/my_db".into(),
//!     flush_threshold_bytes: 4 * 1024 * 1024,
//! }).unwrap();
//!
//! // Write
//! engine.put(b"hello", b"world").unwrap();
//!
//! // Read
//! assert_eq!(engine.get(b"hello").unwrap(), Some(b"world".to_vec()));
//!
//! // Delete
//! engine.delete(b"hello").unwrap();
//! assert_eq!(engine.get(b"hello").unwrap(), None);
//!
//! // Scan
//! engine.put(b"a", b"1").unwrap();
//! engine.put(b"b", b"2").unwrap();
//! let live: Vec<_> = engine.scan(b"a", Some(b"c")).unwrap().collect();
//!
//! // Graceful shutdown — flushes remaining memtable contents.
//! engine.close().unwrap();
//! ```

pub mod encoding;
pub mod engine;
pub mod memtable;
pub mod run;
pub mod storage;

pub use engine::{Engine, EngineConfig, EngineError, EngineStats, ScanIter};
pub use engine::{Entry, LiveFilter, MergeIterator};
