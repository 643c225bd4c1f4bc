use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Vector;

/// A user's reaction to one digest item, captured for both UX history and
/// as the raw material for `TopicPreferenceProfile` updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackAction {
    Like,
    Dislike,
    Save,
    Skip,
}

impl FeedbackAction {
    /// Whether this action should nudge the positive EMA (like/save) or the
    /// negative EMA (dislike); `skip` carries no preference signal.
    pub fn polarity(self) -> Option<Polarity> {
        match self {
            FeedbackAction::Like | FeedbackAction::Save => Some(Polarity::Positive),
            FeedbackAction::Dislike => Some(Polarity::Negative),
            FeedbackAction::Skip => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Positive,
    Negative,
}

/// Append-only record of a user action on a digest item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackEvent {
    pub id: String,
    pub user_id: String,
    pub content_item_id: String,
    pub digest_id: String,
    pub action: FeedbackAction,
    pub created_at: DateTime<Utc>,
}

/// Per `(user, topic)` exponential moving average of liked/disliked item
/// embeddings; the ranking formula's `positiveSim`/`negativeSim` terms are
/// cosine similarity against these vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicPreferenceProfile {
    pub user_id: String,
    pub topic_id: String,
    pub positive_vector: Option<Vector>,
    pub negative_vector: Option<Vector>,
    pub positive_count: u64,
    pub negative_count: u64,
}

impl TopicPreferenceProfile {
    pub fn empty(user_id: impl Into<String>, topic_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            topic_id: topic_id.into(),
            positive_vector: None,
            negative_vector: None,
            positive_count: 0,
            negative_count: 0,
        }
    }

    /// Fold one new embedding into the running EMA for the given polarity.
    /// `alpha` is the EMA smoothing factor (weight given to the new sample).
    pub fn apply(&mut self, polarity: Polarity, embedding: &[f64], alpha: f64) {
        match polarity {
            Polarity::Positive => {
                self.positive_vector = Some(ema_update(self.positive_vector.take(), embedding, alpha));
                self.positive_count += 1;
            }
            Polarity::Negative => {
                self.negative_vector = Some(ema_update(self.negative_vector.take(), embedding, alpha));
                self.negative_count += 1;
            }
        }
    }
}

fn ema_update(existing: Option<Vec<f64>>, sample: &[f64], alpha: f64) -> Vec<f64> {
    match existing {
        None => sample.to_vec(),
        Some(prev) => prev
            .iter()
            .zip(sample.iter())
            .map(|(p, s)| (1.0 - alpha) * p + alpha * s)
            .collect(),
    }
}
