use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::LlmResult;
use crate::model::DigestMode;

use super::{CallAccounting, EmbeddingClient};

/// A deterministic embedding client that hashes input text into a
/// fixed-dimension unit vector. Used by tests and by the runner's default
/// wiring when no real embedding provider is configured (Non-goal:
/// concrete embedding provider SDKs, §1).
///
/// The hash is expanded into `dims` floats via repeated SHA-256 over the
/// input concatenated with a counter, then L2-normalized, so cosine
/// similarity between two distinct inputs is well-defined and stable
/// across runs.
pub struct HashEmbeddingClient {
    model: String,
    dims: usize,
}

impl HashEmbeddingClient {
    pub fn new(dims: usize) -> Self {
        Self {
            model: "hash-embed-v1".to_string(),
            dims,
        }
    }

    fn embed_one(&self, input: &str) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.dims);
        let mut counter: u32 = 0;
        while out.len() < self.dims {
            let mut hasher = Sha256::new();
            hasher.update(input.as_bytes());
            hasher.update(counter.to_le_bytes());
            let digest = hasher.finalize();
            for chunk in digest.chunks(4) {
                if out.len() >= self.dims {
                    break;
                }
                let mut buf = [0u8; 4];
                buf[..chunk.len()].copy_from_slice(chunk);
                let as_u32 = u32::from_le_bytes(buf);
                // map into [-1, 1]
                out.push((as_u32 as f64 / u32::MAX as f64) * 2.0 - 1.0);
            }
            counter += 1;
        }
        let norm: f64 = out.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm > 0.0 {
            for v in out.iter_mut() {
                *v /= norm;
            }
        }
        out
    }
}

#[async_trait]
impl EmbeddingClient for HashEmbeddingClient {
    fn dims(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_batch(
        &self,
        _tier: DigestMode,
        inputs: &[String],
    ) -> LlmResult<(Vec<Vec<f64>>, CallAccounting)> {
        let vectors = inputs.iter().map(|s| self.embed_one(s)).collect();
        let accounting = CallAccounting {
            input_tokens: inputs.iter().map(|s| s.len() as i64 / 4).sum(),
            output_tokens: 0,
            cost_estimate_credits: 0.0,
        };
        Ok((vectors, accounting))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_input_yields_same_vector() {
        let client = HashEmbeddingClient::new(16);
        let (v1, _) = client
            .embed_batch(DigestMode::Normal, &["hello world".to_string()])
            .await
            .unwrap();
        let (v2, _) = client
            .embed_batch(DigestMode::Normal, &["hello world".to_string()])
            .await
            .unwrap();
        assert_eq!(v1, v2);
        assert_eq!(v1[0].len(), 16);
    }

    #[tokio::test]
    async fn different_inputs_yield_different_vectors() {
        let client = HashEmbeddingClient::new(16);
        let (v, _) = client
            .embed_batch(
                DigestMode::Normal,
                &["alpha".to_string(), "beta".to_string()],
            )
            .await
            .unwrap();
        assert_ne!(v[0], v[1]);
    }

    #[tokio::test]
    async fn vectors_are_finite_and_unit_norm() {
        let client = HashEmbeddingClient::new(8);
        let (v, _) = client
            .embed_batch(DigestMode::Normal, &["x".to_string()])
            .await
            .unwrap();
        let norm: f64 = v[0].iter().map(|x| x * x).sum::<f64>().sqrt();
        assert!(v[0].iter().all(|x| x.is_finite()));
        assert!((norm - 1.0).abs() < 1e-6);
    }
}
