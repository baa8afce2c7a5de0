//! # Chunk Locator Core
//!
//! Runtime-free logic for recovering chunk positions: data models, the
//! trigram index, text normalization, matcher tiers, the overlap resolver,
//! the metadata projector, ledger rules, and the store abstraction.
//!
//! This crate contains no tokio, sqlx, network, or filesystem code. The
//! `chunk-locator` app crate supplies the async pipeline, SQLite storage,
//! and the embedding / language-model tiers.

pub mod cache;
pub mod embedding;
pub mod ledger;
pub mod matcher;
pub mod models;
pub mod normalize;
pub mod overlap;
pub mod projector;
pub mod store;
pub mod trigram;

pub use matcher::{MatcherConfig, ReferenceIndex, TierContext};
pub use models::{CandidateChunk, ConfidenceTier, MatchResult, StructuralChunk};
