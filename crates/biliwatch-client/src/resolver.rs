//! bvid → cid resolution through the video page's embedded initial state.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::ClientError;
use crate::FetchClient;

const PAGES_READY_PREDICATE: &str = "return !!(window.__INITIAL_STATE__ \
     && window.__INITIAL_STATE__.videoData \
     && window.__INITIAL_STATE__.videoData.pages \
     && window.__INITIAL_STATE__.videoData.pages.length);";

const INITIAL_STATE_EXTRACT: &str = "return JSON.stringify(window.__INITIAL_STATE__);";

/// Resolves a video's first-part cid by loading its page and reading
/// `window.__INITIAL_STATE__`. Resolutions are cached for the resolver's
/// lifetime; cids are stable for a given bvid.
pub struct CatalogResolver {
    video_url_base: String,
    cache: Mutex<HashMap<String, i64>>,
}

impl Default for CatalogResolver {
    fn default() -> Self {
        Self::new("https://www.bilibili.com/video")
    }
}

impl CatalogResolver {
    pub fn new(video_url_base: impl Into<String>) -> Self {
        Self {
            video_url_base: video_url_base.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn resolve(&self, client: &FetchClient, bvid: &str) -> Result<i64, ClientError> {
        if bvid.is_empty() {
            return Err(ClientError::Validation("bvid must not be empty".to_string()));
        }
        if let Some(cid) = self.cache.lock().await.get(bvid) {
            return Ok(*cid);
        }

        let url = format!("{}/{}/", self.video_url_base, bvid);
        let raw = client
            .page_state(&url, PAGES_READY_PREDICATE, INITIAL_STATE_EXTRACT)
            .await?;
        let text = raw
            .as_str()
            .ok_or_else(|| ClientError::transient("initial state extract was not a string"))?;
        let state: Value = serde_json::from_str(text)
            .map_err(|err| ClientError::transient(format!("initial state not JSON: {err}")))?;
        let cid = state
            .pointer("/videoData/pages/0/cid")
            .and_then(Value::as_i64)
            .ok_or_else(|| ClientError::NotFound(format!("no cid in page state for {bvid}")))?;

        debug!(bvid, cid, "resolved cid");
        self.cache.lock().await.insert(bvid.to_string(), cid);
        Ok(cid)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::mock::MockRuntime;
    use crate::FetchOptions;

    fn fast_client(runtime: Arc<MockRuntime>) -> FetchClient {
        FetchClient::new(
            runtime,
            FetchOptions {
                wait_timeout: Duration::from_millis(50),
                backoff: Duration::from_millis(1),
                ..FetchOptions::default()
            },
        )
    }

    fn page_state_string() -> Value {
        Value::String(
            json!({ "videoData": { "pages": [ { "cid": 987654, "page": 1 } ] } }).to_string(),
        )
    }

    #[tokio::test]
    async fn empty_bvid_is_rejected_without_network() {
        let runtime = Arc::new(MockRuntime::new());
        let client = fast_client(runtime.clone());
        let resolver = CatalogResolver::default();

        let err = resolver.resolve(&client, "").await.expect_err("validation");
        assert!(matches!(err, ClientError::Validation(_)));
        assert_eq!(runtime.log.lock().expect("lock").sessions_opened, 0);
    }

    #[tokio::test]
    async fn second_resolve_is_served_from_cache() {
        let runtime = Arc::new(MockRuntime::new());
        // predicate polls answer true by default; queue only the extract result
        runtime.push_sync(page_state_string());
        let client = fast_client(runtime.clone());
        let resolver = CatalogResolver::default();

        let cid = resolver.resolve(&client, "BV1xx411c7mD").await.expect("resolve");
        assert_eq!(cid, 987654);
        let navigations_after_first = runtime.log.lock().expect("lock").navigations.len();

        let cid = resolver.resolve(&client, "BV1xx411c7mD").await.expect("cached");
        assert_eq!(cid, 987654);
        assert_eq!(
            runtime.log.lock().expect("lock").navigations.len(),
            navigations_after_first
        );
    }

    #[tokio::test]
    async fn missing_page_structure_surfaces_not_found() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.push_sync(Value::String(json!({ "videoData": {} }).to_string()));
        let client = fast_client(runtime.clone());
        let resolver = CatalogResolver::default();

        let err = resolver
            .resolve(&client, "BV1xx411c7mD")
            .await
            .expect_err("not found");
        assert!(matches!(err, ClientError::NotFound(_)));
    }
}
