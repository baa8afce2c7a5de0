//! # Chunk Locator
//!
//! Recovers, for every chunk produced by an upstream rewriting step, its
//! byte span in the reference text of the original document, plus the
//! structural metadata (pages, headings, section markers, bounding boxes)
//! of the original extraction.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────────────┐   ┌───────────┐
//! │ Reference  │──▶│ Pipeline             │──▶│  SQLite   │
//! │ Candidates │   │ match→resolve→project│   │  chunks   │
//! └────────────┘   └──────────────────────┘   └─────┬─────┘
//!                                                   │
//!                                 ┌─────────────────┤
//!                                 ▼                 ▼
//!                            ┌──────────┐     ┌──────────┐
//!                            │   CLI    │     │   HTTP   │
//!                            │(chunkloc)│     │ (review) │
//!                            └──────────┘     └──────────┘
//! ```
//!
//! Matching rules, the overlap resolver, the projector, and ledger rules
//! live in `chunk-locator-core`. This crate adds the async stage, SQLite
//! persistence, the network tiers, and the CLI and HTTP surfaces.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite [`Store`](chunk_locator_core::store::Store) backend |
//! | [`extract`] | JSON reference / candidate inputs |
//! | [`embedding`] | Embedding providers and the semantic tier |
//! | [`assist`] | Language-model assisted tier |
//! | [`pipeline`] | The `locate` stage |
//! | [`locate_cmd`] | `chunkloc locate` |
//! | [`review`] | `show`, `validate`, `correct`, `forget` |
//! | [`server`] | HTTP review API |

pub mod assist;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod locate_cmd;
pub mod migrate;
pub mod pipeline;
pub mod review;
pub mod server;
pub mod sqlite_store;
