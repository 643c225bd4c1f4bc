//! Embed Stage (§4.4) — selects content items needing an embedding, batches
//! them through the embedding client, and writes vectors plus a text hash.

use std::num::NonZeroUsize;

use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::EmbedConfig;
use crate::error::StorageResult;
use crate::llm::{call_meta, CallAccounting, EmbeddingClient, LlmError, Purpose};
use crate::model::{CallStatus, ContentItem, DigestMode, Embedding, JsonMap, ProviderCall, Topic};
use crate::storage::Storage;

use super::ingest::{truncate_id, StageError};

/// Outcome of one Embed Stage run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbedResult {
    pub attempted: usize,
    pub embedded: usize,
    pub updated_hash_only: usize,
    pub errors: usize,
    pub batches: usize,
    /// Set when the embedding client reports missing credentials: the run
    /// completes with zero effect rather than failing the pipeline.
    pub disabled: bool,
    pub stage_errors: Vec<StageError>,
}

fn build_input_text(item: &ContentItem, max_input_chars: usize) -> String {
    let mut text = item.title.clone().unwrap_or_default().trim().to_string();
    if let Some(body) = &item.body_text {
        text.push_str("\n\n");
        text.push_str(body);
    }
    text.chars().take(max_input_chars).collect()
}

fn hash_text(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// One item still needing an embedded vector this run, carrying the input
/// text it was hashed from so identical-text items can share one provider
/// call (`cache` below).
struct PendingItem {
    content_item_id: String,
    hash: String,
    input: String,
}

/// Run Embed for one `(topic, window?)` scope, per §4.4's selection and
/// batching contract.
#[allow(clippy::too_many_arguments)]
pub async fn run_embed(
    storage: &Storage,
    client: &dyn EmbeddingClient,
    user_id: &str,
    topic: &Topic,
    window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    tier: DigestMode,
    config: &EmbedConfig,
) -> StorageResult<EmbedResult> {
    let mut result = EmbedResult::default();
    let model = client.model_name().to_string();
    let dims = client.dims();

    let candidates = storage.items_needing_embedding(&topic.id, window, &model, dims, config.max_items)?;
    result.attempted = candidates.len();

    let mut pending: Vec<PendingItem> = Vec::new();

    for item in &candidates {
        let input = build_input_text(item, config.max_input_chars);
        let hash = hash_text(&input);

        let existing = storage.get_embedding(&item.id)?;
        let matches_existing_model = existing.as_ref().is_some_and(|e| e.matches_model(&model, dims));
        if matches_existing_model && item.hash_text.is_none() {
            storage.set_hash_text(&item.id, &hash)?;
            result.updated_hash_only += 1;
            continue;
        }

        pending.push(PendingItem {
            content_item_id: item.id.clone(),
            hash,
            input,
        });
    }

    // Within-run cache so items that hash identically (exact duplicate
    // title+body text) are embedded once and the vector reused, rather than
    // paying for a second provider call.
    let mut cache: LruCache<String, Vec<f64>> = LruCache::new(NonZeroUsize::new(pending.len().max(1)).unwrap());

    let mut remaining: Vec<&PendingItem> = Vec::new();
    for item in &pending {
        if let Some(vector) = cache.get(&item.hash).cloned() {
            write_embedding(storage, &item.content_item_id, &model, dims, &vector, &item.hash)?;
            result.embedded += 1;
        } else {
            remaining.push(item);
        }
    }

    for batch in remaining.chunks(config.batch_size.max(1)) {
        result.batches += 1;
        let inputs: Vec<String> = batch.iter().map(|p| p.input.clone()).collect();
        let started_at = Utc::now();

        match client.embed_batch(tier, &inputs).await {
            Ok((vectors, accounting)) => {
                if let Some(err) = validate_vectors(&vectors, dims) {
                    record_batch_call(storage, user_id, topic, &accounting, started_at, false, Some(&err.to_string()))?;
                    result.errors += batch.len();
                    for item in batch {
                        result.stage_errors.push(StageError {
                            id: truncate_id(&item.content_item_id),
                            message: err.to_string(),
                        });
                    }
                    continue;
                }

                let mut writes = Vec::with_capacity(batch.len());
                for (item, vector) in batch.iter().zip(vectors.into_iter()) {
                    writes.push(embedding_write(&item.content_item_id, &model, dims, vector.clone(), &item.hash));
                    cache.put(item.hash.clone(), vector);
                }
                storage.write_embedding_batch(&writes)?;
                result.embedded += batch.len();
                record_batch_call(storage, user_id, topic, &accounting, started_at, true, None)?;
            }
            Err(LlmError::MissingCredentials(_)) => {
                result.disabled = true;
                return Ok(result);
            }
            Err(err) => {
                let accounting = CallAccounting {
                    input_tokens: 0,
                    output_tokens: 0,
                    cost_estimate_credits: 0.0,
                };
                record_batch_call(storage, user_id, topic, &accounting, started_at, false, Some(&err.to_string()))?;
                result.errors += batch.len();
                for item in batch {
                    result.stage_errors.push(StageError {
                        id: truncate_id(&item.content_item_id),
                        message: err.to_string(),
                    });
                }
            }
        }
    }

    Ok(result)
}

fn validate_vectors(vectors: &[Vec<f64>], expected_dims: usize) -> Option<LlmError> {
    for v in vectors {
        if v.len() != expected_dims {
            return Some(LlmError::DimensionMismatch {
                expected: expected_dims,
                got: v.len(),
            });
        }
        if v.iter().any(|x| !x.is_finite()) {
            return Some(LlmError::NonFiniteVector);
        }
    }
    None
}

/// Build one `(content_item_id, hash_text, Embedding)` write tuple for
/// `Storage::write_embedding_batch`.
fn embedding_write(content_item_id: &str, model: &str, dims: usize, vector: Vec<f64>, hash: &str) -> (String, String, Embedding) {
    (
        content_item_id.to_string(),
        hash.to_string(),
        Embedding {
            content_item_id: content_item_id.to_string(),
            model: model.to_string(),
            dims,
            vector,
        },
    )
}

/// Write one item's `hash_text` + embedding inside its own single-item
/// transaction (§4.4, §5, P12: every embedding write is all-or-nothing).
fn write_embedding(
    storage: &Storage,
    content_item_id: &str,
    model: &str,
    dims: usize,
    vector: &[f64],
    hash: &str,
) -> StorageResult<()> {
    storage.write_embedding_batch(&[embedding_write(content_item_id, model, dims, vector.to_vec(), hash)])
}

fn record_batch_call(
    storage: &Storage,
    user_id: &str,
    topic: &Topic,
    accounting: &CallAccounting,
    started_at: DateTime<Utc>,
    ok: bool,
    error_message: Option<&str>,
) -> StorageResult<()> {
    let call = ProviderCall {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        purpose: Purpose::Embed.as_str().to_string(),
        provider: "embedding-client".to_string(),
        model: "embed".to_string(),
        input_tokens: accounting.input_tokens,
        output_tokens: accounting.output_tokens,
        cost_estimate_credits: accounting.cost_estimate_credits,
        meta: call_meta(topic, Purpose::Embed),
        started_at,
        ended_at: Utc::now(),
        status: if ok { CallStatus::Ok } else { CallStatus::Error },
        error: error_message.map(|m| {
            let mut map = JsonMap::new();
            map.insert("message".to_string(), serde_json::Value::String(m.to_string()));
            map
        }),
    };
    storage.insert_provider_call(&call)
}
