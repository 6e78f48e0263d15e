//! Session-bootstrapped fetch access to the platform, with retry/backoff and
//! same-site context establishment.

pub mod error;
pub mod resolver;
pub mod session;
pub mod webdriver;

pub use error::ClientError;
pub use resolver::CatalogResolver;
pub use session::{BrowserRuntime, BrowserSession};
pub use webdriver::{WebDriverConfig, WebDriverRuntime};

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub const CRATE_NAME: &str = "biliwatch-client";

/// Readiness signal for the home bootstrap: DOMContentLoaded is enough to have
/// session cookies issued.
const READY_STATE_PREDICATE: &str =
    "return document.readyState === 'interactive' || document.readyState === 'complete';";

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub home_url: String,
    /// Bound on explicit page-state waits.
    pub wait_timeout: Duration,
    /// Additional attempts after the first failed fetch.
    pub retries: u32,
    /// Base delay before the first retry; doubles per attempt.
    pub backoff: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            home_url: "https://www.bilibili.com/".to_string(),
            wait_timeout: Duration::from_secs(15),
            retries: 2,
            backoff: Duration::from_millis(800),
        }
    }
}

enum SessionState {
    Uninitialized,
    Ready {
        session: Box<dyn BrowserSession>,
        bootstrapped: bool,
    },
    Closed,
}

/// JSON access to the platform through a browser session. The session is built
/// lazily, bootstrapped against the home surface once (same-site cookies are
/// required or the API answers 412), and rebuilt transparently after `close`.
pub struct FetchClient {
    runtime: Arc<dyn BrowserRuntime>,
    options: FetchOptions,
    state: Mutex<SessionState>,
}

impl FetchClient {
    pub fn new(runtime: Arc<dyn BrowserRuntime>, options: FetchOptions) -> Self {
        Self {
            runtime,
            options,
            state: Mutex::new(SessionState::Uninitialized),
        }
    }

    /// Visit the home surface once so subsequent same-origin fetches carry
    /// session cookies. No-op when the context is already established.
    pub async fn establish_context(&self) -> Result<(), ClientError> {
        let mut state = self.state.lock().await;
        self.ensure_ready(&mut state).await.map(|_| ())
    }

    /// Fetch a JSON endpoint from the platform origin, retrying transient
    /// failures with exponential backoff.
    pub async fn fetch_json(&self, url: &str) -> Result<Value, ClientError> {
        let mut state = self.state.lock().await;
        let session = self.ensure_ready(&mut state).await?;

        let script = fetch_script(url);
        let attempts = self.options.retries.saturating_add(1);
        let mut last_error = String::new();
        for attempt in 0..attempts {
            match run_fetch(session, &script).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    warn!(url, attempt, %err, "fetch attempt failed");
                    last_error = err.to_string();
                }
            }
            if attempt + 1 < attempts {
                tokio::time::sleep(self.options.backoff * (1u32 << attempt)).await;
            }
        }
        Err(ClientError::Transient {
            attempts,
            message: last_error,
        })
    }

    /// Navigate to `url`, wait for `ready_predicate` to become truthy, then
    /// evaluate `extract` and return its result.
    pub async fn page_state(
        &self,
        url: &str,
        ready_predicate: &str,
        extract: &str,
    ) -> Result<Value, ClientError> {
        let mut state = self.state.lock().await;
        let session = self.ensure_ready(&mut state).await?;
        session.navigate(url).await?;
        session
            .wait_until(ready_predicate, self.options.wait_timeout)
            .await?;
        session.execute(extract).await
    }

    /// Release the browser session. Idempotent; a later call rebuilds and
    /// re-bootstraps the session.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if let SessionState::Ready { session, .. } =
            std::mem::replace(&mut *state, SessionState::Closed)
        {
            if let Err(err) = session.close().await {
                warn!(%err, "browser session close failed");
            }
        }
    }

    async fn ensure_ready<'a>(
        &self,
        state: &'a mut SessionState,
    ) -> Result<&'a dyn BrowserSession, ClientError> {
        if !matches!(state, SessionState::Ready { .. }) {
            debug!("opening browser session");
            let session = self.runtime.open_session().await?;
            *state = SessionState::Ready {
                session,
                bootstrapped: false,
            };
        }
        let SessionState::Ready {
            session,
            bootstrapped,
        } = state
        else {
            return Err(ClientError::transient("browser session slot unavailable"));
        };
        if !*bootstrapped {
            session.navigate(&self.options.home_url).await?;
            session
                .wait_until(READY_STATE_PREDICATE, self.options.wait_timeout)
                .await?;
            *bootstrapped = true;
            debug!("home context established");
        }
        Ok(&**session)
    }
}

/// Page-side fetch bridge: resolves through the session callback with a JSON
/// envelope so failures come back as data instead of script errors.
fn fetch_script(url: &str) -> String {
    let url_json = Value::String(url.to_string()).to_string();
    format!(
        r#"
        const url = {url_json};
        const cb = arguments[arguments.length - 1];
        fetch(url, {{ credentials: 'include' }})
            .then(r => r.json())
            .then(data => cb(JSON.stringify({{ ok: true, data }})))
            .catch(err => cb(JSON.stringify({{ ok: false, error: String(err) }})));
        "#
    )
}

async fn run_fetch(session: &dyn BrowserSession, script: &str) -> Result<Value, ClientError> {
    let raw = session.execute_async(script).await?;
    let text = raw
        .as_str()
        .ok_or_else(|| ClientError::transient("fetch bridge returned a non-string payload"))?;
    let envelope: Value = serde_json::from_str(text)
        .map_err(|err| ClientError::transient(format!("fetch bridge payload not JSON: {err}")))?;
    if envelope.get("ok").and_then(Value::as_bool).unwrap_or(false) {
        Ok(envelope.get("data").cloned().unwrap_or(Value::Null))
    } else {
        let message = envelope
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown fetch error");
        Err(ClientError::transient(message))
    }
}


#[cfg(test)]
mod tests {
    use super::mock::MockRuntime;
    use super::*;
    use serde_json::json;

    fn fast_options() -> FetchOptions {
        FetchOptions {
            wait_timeout: Duration::from_millis(50),
            retries: 2,
            backoff: Duration::from_millis(1),
            ..FetchOptions::default()
        }
    }

    #[tokio::test]
    async fn establish_context_bootstraps_home_exactly_once() {
        let runtime = Arc::new(MockRuntime::new());
        let client = FetchClient::new(runtime.clone(), fast_options());

        client.establish_context().await.expect("first bootstrap");
        client.establish_context().await.expect("second bootstrap");

        let log = runtime.log.lock().expect("lock");
        assert_eq!(log.sessions_opened, 1);
        assert_eq!(log.navigations.len(), 1);
        assert!(log.navigations[0].contains("bilibili.com"));
    }

    #[tokio::test]
    async fn fetch_json_unwraps_bridge_envelope() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.push_async(Ok(MockRuntime::fetch_ok(json!({"code": 0, "data": 7}))));
        let client = FetchClient::new(runtime.clone(), fast_options());

        let value = client.fetch_json("https://api.example/x").await.expect("fetch");
        assert_eq!(value, json!({"code": 0, "data": 7}));
        assert_eq!(runtime.log.lock().expect("lock").async_scripts.len(), 1);
    }

    #[tokio::test]
    async fn fetch_json_retries_then_surfaces_attempt_count() {
        let runtime = Arc::new(MockRuntime::new());
        for _ in 0..3 {
            runtime.push_async(Ok(MockRuntime::fetch_rejected("HTTP 412")));
        }
        let client = FetchClient::new(runtime.clone(), fast_options());

        let err = client.fetch_json("https://api.example/x").await.expect_err("exhausted");
        match err {
            ClientError::Transient { attempts, message } => {
                assert_eq!(attempts, 3);
                assert!(message.contains("HTTP 412"));
            }
            other => panic!("expected transient error, got {other:?}"),
        }
        assert_eq!(runtime.log.lock().expect("lock").async_scripts.len(), 3);
    }

    #[tokio::test]
    async fn fetch_json_recovers_on_a_later_attempt() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.push_async(Ok(MockRuntime::fetch_rejected("timeout")));
        runtime.push_async(Ok(MockRuntime::fetch_ok(json!(42))));
        let client = FetchClient::new(runtime.clone(), fast_options());

        let value = client.fetch_json("https://api.example/x").await.expect("fetch");
        assert_eq!(value, json!(42));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_rebuild_rebootstraps() {
        let runtime = Arc::new(MockRuntime::new());
        let client = FetchClient::new(runtime.clone(), fast_options());

        client.establish_context().await.expect("bootstrap");
        client.close().await;
        client.close().await;
        assert_eq!(runtime.log.lock().expect("lock").closes, 1);

        // a fetch after close rebuilds the session and bootstraps again
        runtime.push_async(Ok(MockRuntime::fetch_ok(json!(null))));
        client.fetch_json("https://api.example/x").await.expect("fetch");
        let log = runtime.log.lock().expect("lock");
        assert_eq!(log.sessions_opened, 2);
        assert_eq!(log.navigations.len(), 2);
    }
}
