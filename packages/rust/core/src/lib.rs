//! Crafting engine and read views for OpenCraft.
//!
//! This crate ties the store, the generator, and the embedder together into
//! the [`CraftEngine`], and runs the background [`EnrichmentQueue`] that
//! records provenance and registers discoveries.

pub mod craft;
pub mod enrichment;
pub mod graph;
pub mod rank;
pub mod similarity;

pub use craft::{CraftEngine, HealthReport, LabelledOutcome};
pub use enrichment::{EnrichmentJob, EnrichmentQueue, EnrichmentStats};
pub use graph::{GraphEdge, GraphNode, GraphView, graph};
pub use rank::{craft_rank, rank};
pub use similarity::{Neighbor, backfill_embeddings, cosine, nearest, similarity};
