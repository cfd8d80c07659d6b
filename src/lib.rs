//! # notegate
//!
//! Continuous semantic indexing of a personal document tree, with
//! directory-level gates controlling what the API may delete and an ignore
//! list controlling what gets indexed at all.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐  events  ┌──────────┐  due   ┌─────────┐
//! │ filesystem │─────────▶│ watcher  │───────▶│ indexer │──┐
//! └────────────┘          │ debounce │        └────┬────┘  │ chunk + embed
//!                         └──────────┘             │       ▼
//!          ┌─────────────┐   ┌──────────────┐   ┌───────────────┐
//!          │ PolicyStore │   │   Registry   │◀──│  VectorStore  │
//!          └──────┬──────┘   └──────┬───────┘   └───────┬───────┘
//!                 └─────────────────┼───────────────────┘
//!                                   ▼
//!                             ┌──────────┐
//!                             │ HTTP API │
//!                             └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`paths`] | Relative-path normalization |
//! | [`persist`] | Atomic JSON snapshots |
//! | [`policy`] | Gates and ignore entries |
//! | [`registry`] | Indexed-document registry |
//! | [`chunk`] | Overlapping text windows |
//! | [`extract`] | Extension → content handler |
//! | [`embedding`] | Embedder trait and HTTP client |
//! | [`store`] | Vector store trait and backends |
//! | [`db`] | SQLite connection |
//! | [`migrate`] | Vector table schema |
//! | [`fs_scan`] | Filtered filesystem walk |
//! | [`indexer`] | Processing passes and reconciliation |
//! | [`debounce`] | Per-path debounce timers |
//! | [`watcher`] | Event sources and the watch loop |
//! | [`search`] | Semantic search |
//! | [`app`] | Component wiring |
//! | [`server`] | HTTP API |

pub mod app;
pub mod chunk;
pub mod config;
pub mod db;
pub mod debounce;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod fs_scan;
pub mod indexer;
pub mod migrate;
pub mod models;
pub mod paths;
pub mod persist;
pub mod policy;
pub mod registry;
pub mod search;
pub mod server;
pub mod store;
pub mod watcher;
