//! Embedding similarity over the material registry.

use serde::Serialize;
use tracing::{info, instrument, warn};

use opencraft_providers::EmbeddingProvider;
use opencraft_shared::{OpenCraftError, Result};
use opencraft_storage::Storage;

/// A material and its similarity to some query material.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Neighbor {
    pub name: String,
    pub emoji: String,
    pub similarity: f32,
}

/// Cosine similarity in `[-1, 1]`. Zero-norm input yields 0.
pub fn cosine(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(OpenCraftError::validation(format!(
            "embedding length mismatch: {} vs {}",
            a.len(),
            b.len()
        )));
    }
    let (mut dot, mut na, mut nb) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return Ok(0.0);
    }
    Ok((dot / (na.sqrt() * nb.sqrt())).clamp(-1.0, 1.0))
}

async fn embedding_of(storage: &Storage, name: &str) -> Result<Vec<f32>> {
    storage
        .get_material(name)
        .await?
        .ok_or_else(|| OpenCraftError::MaterialNotFound(name.to_string()))?
        .embedding
        .ok_or_else(|| OpenCraftError::MaterialNotFound(format!("{name} has no embedding yet")))
}

/// Similarity of two registered, embedded materials.
#[instrument(skip(storage))]
pub async fn similarity(storage: &Storage, a: &str, b: &str) -> Result<f32> {
    let va = embedding_of(storage, a).await?;
    let vb = embedding_of(storage, b).await?;
    cosine(&va, &vb)
}

/// The `k` materials most similar to `name`, best first. Materials without
/// an embedding, or with one of a different length, are skipped.
#[instrument(skip(storage))]
pub async fn nearest(storage: &Storage, name: &str, k: usize) -> Result<Vec<Neighbor>> {
    let query = embedding_of(storage, name).await?;
    let query_lower = name.to_lowercase();

    let mut scored: Vec<Neighbor> = storage
        .list_materials()
        .await?
        .into_iter()
        .filter(|m| m.name.to_lowercase() != query_lower)
        .filter_map(|m| {
            let score = cosine(&query, m.embedding.as_deref()?).ok()?;
            Some(Neighbor {
                name: m.name,
                emoji: m.emoji,
                similarity: score,
            })
        })
        .collect();

    scored.sort_by(|x, y| y.similarity.total_cmp(&x.similarity));
    scored.truncate(k);
    Ok(scored)
}

/// Compute and store embeddings for every material missing one. Returns how
/// many were filled. Individual embedding failures are logged and skipped.
#[instrument(skip_all, fields(model = embedder.model_id()))]
pub async fn backfill_embeddings(
    storage: &Storage,
    embedder: &dyn EmbeddingProvider,
) -> Result<usize> {
    let missing = storage.materials_missing_embedding().await?;
    let mut filled = 0;
    for name in &missing {
        match embedder.embed(name).await {
            Ok(vector) => {
                if storage.set_embedding(name, &vector).await? {
                    filled += 1;
                }
            }
            Err(e) => warn!(material = %name, error = %e, "embedding failed during backfill"),
        }
    }
    info!(missing = missing.len(), filled, "embedding backfill finished");
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencraft_providers::HashEmbedder;
    use uuid::Uuid;

    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("oc_sim_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    #[test]
    fn cosine_edge_cases() {
        assert!((cosine(&[1.0, 0.0], &[2.0, 0.0]).unwrap() - 1.0).abs() < 1e-6);
        assert!((cosine(&[1.0, 0.0], &[-1.0, 0.0]).unwrap() + 1.0).abs() < 1e-6);
        assert_eq!(cosine(&[1.0, 0.0], &[0.0, 1.0]).unwrap(), 0.0);
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 1.0]).unwrap(), 0.0);
        assert!(cosine(&[1.0], &[1.0, 0.0]).is_err());
    }

    #[tokio::test]
    async fn similarity_is_symmetric_and_reflexive() {
        let storage = test_storage().await;
        storage
            .register_material("Steam", "💨", Some("alice"), Some(&[0.6, 0.8, 0.0]))
            .await
            .unwrap();
        storage
            .register_material("Mud", "🟤", Some("alice"), Some(&[0.0, 0.6, 0.8]))
            .await
            .unwrap();

        let ab = similarity(&storage, "Steam", "Mud").await.unwrap();
        let ba = similarity(&storage, "mud", "steam").await.unwrap();
        assert_eq!(ab, ba);
        assert!((ab - 0.48).abs() < 1e-5);
        assert!((similarity(&storage, "Steam", "Steam").await.unwrap() - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn missing_material_or_embedding_is_not_found() {
        let storage = test_storage().await;
        storage
            .register_material("Steam", "💨", Some("alice"), Some(&[1.0, 0.0]))
            .await
            .unwrap();

        let unknown = similarity(&storage, "Steam", "Unobtainium").await;
        assert!(matches!(unknown, Err(OpenCraftError::MaterialNotFound(_))));

        // Fire is seeded without an embedding.
        let unembedded = similarity(&storage, "Steam", "Fire").await;
        assert!(matches!(unembedded, Err(OpenCraftError::MaterialNotFound(_))));
    }

    #[tokio::test]
    async fn backfill_then_nearest() {
        let storage = test_storage().await;
        let embedder = HashEmbedder::new(128);
        storage.register_material("Steam", "💨", Some("a"), None).await.unwrap();
        storage.register_material("Steam Engine", "🚂", Some("a"), None).await.unwrap();

        assert_eq!(backfill_embeddings(&storage, &embedder).await.unwrap(), 6);
        assert_eq!(backfill_embeddings(&storage, &embedder).await.unwrap(), 0);

        let near = nearest(&storage, "Steam", 3).await.unwrap();
        assert_eq!(near.len(), 3);
        assert_eq!(near[0].name, "Steam Engine");
        assert!(near.iter().all(|n| n.name != "Steam"));
        assert!(near.windows(2).all(|w| w[0].similarity >= w[1].similarity));
    }
}
