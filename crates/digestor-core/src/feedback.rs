//! Feedback ingestion — folds a review-UI action into the per-topic
//! preference profile that Ranking's `positiveSim`/`negativeSim` terms read
//! (§3's `TopicPreferenceProfile`, "updated by Feedback").
//!
//! The review UI itself is out of scope; this is the one piece of that loop
//! that belongs to the engine, since it's what the ranking formula depends
//! on for its preference term.

use chrono::Utc;
use uuid::Uuid;

use crate::error::StorageResult;
use crate::model::{FeedbackAction, FeedbackEvent, TopicPreferenceProfile};
use crate::storage::Storage;

/// Record one feedback action and, if it carries a polarity (like/save nudge
/// positive, dislike nudges negative; skip is neutral), fold the item's
/// embedding into the topic's preference EMA.
pub fn record_feedback(
    storage: &Storage,
    user_id: &str,
    topic_id: &str,
    content_item_id: &str,
    digest_id: &str,
    action: FeedbackAction,
    alpha: f64,
) -> StorageResult<()> {
    let event = FeedbackEvent {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        content_item_id: content_item_id.to_string(),
        digest_id: digest_id.to_string(),
        action,
        created_at: Utc::now(),
    };
    storage.insert_feedback_event(&event)?;

    let Some(polarity) = action.polarity() else {
        return Ok(());
    };

    let Some(embedding) = storage.get_embedding(content_item_id)? else {
        return Ok(());
    };

    let mut profile = storage
        .get_preference_profile(user_id, topic_id)?
        .unwrap_or_else(|| TopicPreferenceProfile::empty(user_id, topic_id));
    profile.apply(polarity, &embedding.vector, alpha);
    storage.upsert_preference_profile(&profile)?;

    Ok(())
}
