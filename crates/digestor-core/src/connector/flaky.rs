use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::error::{ConnectorError, ConnectorResult};
use crate::model::ContentItemDraft;

use super::{Connector, FetchParams, FetchResult, RawItem};

/// A connector that fails every Nth call, used to exercise Ingest's
/// partial/error `FetchRun` paths without a real flaky external service.
pub struct FlakyConnector {
    fail_every: u64,
    calls: AtomicU64,
}

impl FlakyConnector {
    pub fn new(fail_every: u64) -> Self {
        Self {
            fail_every: fail_every.max(1),
            calls: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl Connector for FlakyConnector {
    async fn fetch(&self, params: &FetchParams) -> ConnectorResult<FetchResult> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call % self.fail_every == 0 {
            return Err(ConnectorError::Transport(format!(
                "simulated transport failure on call {call}"
            )));
        }
        Ok(FetchResult {
            raw_items: vec![serde_json::json!({
                "sourceType": params.source_type,
                "externalId": format!("flaky-{call}"),
                "title": format!("flaky item {call}"),
            })],
            next_cursor: params.cursor.clone(),
            provider_calls: Vec::new(),
        })
    }

    fn normalize(&self, raw: &RawItem, _params: &FetchParams) -> ConnectorResult<ContentItemDraft> {
        let external_id = raw
            .get("externalId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ConnectorError::Malformed("missing externalId".into()))?
            .to_string();
        let title = raw.get("title").and_then(|v| v.as_str()).map(str::to_string);
        Ok(ContentItemDraft {
            source_type: raw
                .get("sourceType")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            external_id: Some(external_id),
            title,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::JsonMap;
    use chrono::Utc;

    fn params() -> FetchParams {
        FetchParams {
            source_id: "src".into(),
            source_type: "rss".into(),
            config: JsonMap::new(),
            cursor: JsonMap::new(),
            window_start: Utc::now(),
            window_end: Utc::now(),
            max_items: 10,
        }
    }

    #[tokio::test]
    async fn fails_every_nth_call() {
        let connector = FlakyConnector::new(3);
        assert!(connector.fetch(&params()).await.is_ok());
        assert!(connector.fetch(&params()).await.is_ok());
        assert!(connector.fetch(&params()).await.is_err());
        assert!(connector.fetch(&params()).await.is_ok());
    }
}
