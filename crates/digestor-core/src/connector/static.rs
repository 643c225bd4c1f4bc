use async_trait::async_trait;
use serde_json::json;
use std::sync::Mutex;

use crate::error::ConnectorResult;
use crate::model::ContentItemDraft;

use super::{Connector, FetchParams, FetchResult, RawItem};

/// A free, in-memory connector backed by a fixed item list.
///
/// Each raw item is the `ContentItemDraft` itself, serialized to JSON;
/// `normalize` just deserializes it back. Used by tests and by the
/// runner's default wiring where no real external SDK is configured, per
/// the Non-goal excluding concrete connector implementations (§1).
pub struct StaticConnector {
    items: Mutex<Vec<ContentItemDraft>>,
}

impl StaticConnector {
    pub fn new(items: Vec<ContentItemDraft>) -> Self {
        Self {
            items: Mutex::new(items),
        }
    }
}

#[async_trait]
impl Connector for StaticConnector {
    async fn fetch(&self, params: &FetchParams) -> ConnectorResult<FetchResult> {
        let items = self.items.lock().expect("static connector mutex poisoned");
        let raw_items: Vec<RawItem> = items
            .iter()
            .filter(|d| match d.published_at {
                Some(t) => t >= params.window_start && t < params.window_end,
                None => true,
            })
            .take(params.max_items)
            .map(|d| serde_json::to_value(d).unwrap_or_else(|_| json!(null)))
            .collect();

        Ok(FetchResult {
            raw_items,
            next_cursor: params.cursor.clone(),
            provider_calls: Vec::new(),
        })
    }

    fn normalize(&self, raw: &RawItem, _params: &FetchParams) -> ConnectorResult<ContentItemDraft> {
        serde_json::from_value(raw.clone())
            .map_err(|e| crate::error::ConnectorError::Malformed(e.to_string()))
    }
}
