//! The crafting engine.
//!
//! `craft` checks the combination cache, falls back to the generator on a
//! miss, and returns as soon as it has an answer. Anything owed to the
//! provenance log is handed to the [`EnrichmentQueue`].

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use opencraft_providers::{EmbeddingProvider, Generator, build_embedder};
use opencraft_shared::{
    AppConfig, CraftOutcome, EnrichmentConfig, MaterialSummary, OpenCraftError, Result,
    database_path, normalize_name,
};
use opencraft_storage::Storage;

use crate::enrichment::{EnrichmentJob, EnrichmentQueue, EnrichmentStats};
use crate::graph::{self, GraphView};
use crate::similarity::{self, Neighbor};

/// Cache rows offered to the generator as exemplar candidates.
const HISTORY_WINDOW: u32 = 64;

/// The six pairs of base elements, in display order.
const DEFAULT_PAIRS: [(&str, &str); 6] = [
    ("Water", "Fire"),
    ("Water", "Earth"),
    ("Fire", "Earth"),
    ("Water", "Air"),
    ("Earth", "Air"),
    ("Fire", "Air"),
];

/// A default combination labelled `"A + B"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelledOutcome {
    pub label: String,
    #[serde(flatten)]
    pub outcome: CraftOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub materials: usize,
    pub enrichment: EnrichmentStats,
}

/// Owns the store, the generator, the embedder, and the enrichment queue.
pub struct CraftEngine {
    storage: Arc<Storage>,
    generator: Generator,
    embedder: Arc<dyn EmbeddingProvider>,
    enrichment: EnrichmentQueue,
}

impl CraftEngine {
    /// Open the configured database and build every collaborator.
    pub async fn open(config: &AppConfig) -> Result<Self> {
        let path = database_path(config)?;
        let storage = Arc::new(Storage::open(&path).await?);
        let generator = Generator::from_config(&config.generator)?;
        let embedder = build_embedder(&config.embedding)?;
        info!(db = %path.display(), model = %config.generator.model, "craft engine opened");
        Ok(Self::new(storage, generator, embedder, &config.enrichment))
    }

    /// Assemble an engine from parts. Starts the enrichment queue.
    pub fn new(
        storage: Arc<Storage>,
        generator: Generator,
        embedder: Arc<dyn EmbeddingProvider>,
        enrichment: &EnrichmentConfig,
    ) -> Self {
        let queue = EnrichmentQueue::start(storage.clone(), embedder.clone(), enrichment);
        Self {
            storage,
            generator,
            embedder,
            enrichment: queue,
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Combine two materials.
    ///
    /// Returns the empty outcome when generation fails. Only store failures
    /// and empty operands are errors.
    #[instrument(skip(self))]
    pub async fn craft(
        &self,
        first: &str,
        second: &str,
        username: Option<&str>,
    ) -> Result<CraftOutcome> {
        let first = normalize_operand(first)?;
        let second = normalize_operand(second)?;
        let username = username.map(str::trim).filter(|u| !u.is_empty());

        if let Some(hit) = self.storage.lookup(&first, &second).await? {
            debug!(result = %hit.result, "cache hit");
            let outcome = CraftOutcome {
                result: hit.result,
                emoji: hit.emoji,
                is_discovery: false,
            };
            self.schedule(&first, &second, &outcome, username).await;
            return Ok(outcome);
        }

        debug!("cache miss");
        let history = self
            .storage
            .recent_combinations_touching(&first, &second, HISTORY_WINDOW)
            .await?;

        let generated = match self.generator.generate(&first, &second, &history).await {
            Ok(generated) => generated,
            Err(e) => {
                warn!(error = %e, "no result for pair");
                return Ok(CraftOutcome::empty());
            }
        };

        // A name reached by another pair keeps its registered spelling and emoji.
        let outcome = match self.storage.get_material(&generated.name).await? {
            Some(existing) => CraftOutcome {
                result: existing.name,
                emoji: existing.emoji,
                is_discovery: false,
            },
            None => CraftOutcome {
                result: generated.name,
                emoji: generated.emoji,
                is_discovery: true,
            },
        };

        self.storage
            .insert_cache(&first, &second, &outcome.result, &outcome.emoji)
            .await?;
        info!(
            result = %outcome.result,
            discovery = outcome.is_discovery,
            attempts = generated.attempts,
            emoji_patched = generated.emoji_patched,
            "generated new combination"
        );

        self.schedule(&first, &second, &outcome, username).await;
        Ok(outcome)
    }

    /// Queue enrichment for a user-attributed craft. Admission failures are
    /// logged; the outcome stands regardless.
    async fn schedule(
        &self,
        first: &str,
        second: &str,
        outcome: &CraftOutcome,
        username: Option<&str>,
    ) {
        let Some(user) = username else {
            return;
        };
        let job = EnrichmentJob {
            first_word: first.to_string(),
            second_word: second.to_string(),
            result_name: outcome.result.clone(),
            result_emoji: outcome.emoji.clone(),
            username: user.to_string(),
            is_discovery: outcome.is_discovery,
        };
        if let Err(e) = self.enrichment.submit(job).await {
            warn!(error = %e, "enrichment not scheduled");
        }
    }

    /// Craft every pair of base elements.
    pub async fn default_combinations(
        &self,
        username: Option<&str>,
    ) -> Result<Vec<LabelledOutcome>> {
        let mut results = Vec::with_capacity(DEFAULT_PAIRS.len());
        for (a, b) in DEFAULT_PAIRS {
            let outcome = self.craft(a, b, username).await?;
            results.push(LabelledOutcome {
                label: format!("{a} + {b}"),
                outcome,
            });
        }
        Ok(results)
    }

    pub async fn list_materials(&self) -> Result<Vec<MaterialSummary>> {
        Ok(self
            .storage
            .list_materials()
            .await?
            .iter()
            .map(MaterialSummary::from)
            .collect())
    }

    pub async fn user_materials(&self, username: &str) -> Result<Vec<MaterialSummary>> {
        self.storage.user_materials(username).await
    }

    pub async fn graph(&self, username: Option<&str>) -> Result<GraphView> {
        graph::graph(&self.storage, username).await
    }

    pub async fn similarity(&self, a: &str, b: &str) -> Result<f32> {
        similarity::similarity(&self.storage, a, b).await
    }

    pub async fn nearest(&self, name: &str, k: usize) -> Result<Vec<Neighbor>> {
        similarity::nearest(&self.storage, name, k).await
    }

    pub async fn backfill_embeddings(&self) -> Result<usize> {
        similarity::backfill_embeddings(&self.storage, self.embedder.as_ref()).await
    }

    /// Store liveness plus queue counters.
    pub async fn health(&self) -> Result<HealthReport> {
        self.storage.ping().await?;
        let materials = self.storage.list_materials().await?.len();
        Ok(HealthReport {
            status: "ok",
            materials,
            enrichment: self.enrichment.stats(),
        })
    }

    pub fn enrichment_stats(&self) -> EnrichmentStats {
        self.enrichment.stats()
    }

    /// Wait for every queued enrichment job to finish.
    pub async fn wait_idle(&self) {
        self.enrichment.wait_idle().await;
    }

    /// Drain the enrichment queue. Further crafts still answer but no
    /// longer log.
    pub async fn shutdown(&self) {
        self.enrichment.shutdown().await;
    }
}

fn normalize_operand(raw: &str) -> Result<String> {
    let name = normalize_name(raw);
    if name.is_empty() {
        return Err(OpenCraftError::invalid_input("operands must not be empty"));
    }
    Ok(name)
}
