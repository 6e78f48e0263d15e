//! Browser-automation collaborator contracts.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ClientError;

pub(crate) const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// A live page context inside a remote browser. Scripts run with the page's
/// origin, so same-site `fetch` calls carry whatever cookies the session has
/// accumulated.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), ClientError>;

    /// Run a synchronous script in the page. The script must `return` a value.
    async fn execute(&self, script: &str) -> Result<Value, ClientError>;

    /// Run an asynchronous script. The page-side callback is passed as the
    /// last script argument.
    async fn execute_async(&self, script: &str) -> Result<Value, ClientError>;

    async fn close(&self) -> Result<(), ClientError>;

    /// Poll `predicate` (a script returning a boolean) until it is truthy or
    /// `timeout` elapses.
    async fn wait_until(&self, predicate: &str, timeout: Duration) -> Result<(), ClientError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.execute(predicate).await?.as_bool().unwrap_or(false) {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ClientError::NotFound(format!(
                    "condition not met within {timeout:?}: {predicate}"
                )));
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }
}

/// Factory for browser sessions; lets cycles rebuild a torn-down session.
#[async_trait]
pub trait BrowserRuntime: Send + Sync {
    async fn open_session(&self) -> Result<Box<dyn BrowserSession>, ClientError>;
}
