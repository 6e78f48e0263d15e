//! Minimal W3C WebDriver client backing [`BrowserSession`].

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::ClientError;
use crate::session::{BrowserRuntime, BrowserSession};

#[derive(Debug, Clone)]
pub struct WebDriverConfig {
    /// Base URL of the WebDriver endpoint, e.g. a local chromedriver.
    pub base_url: String,
    pub headless: bool,
    pub page_load_timeout: Duration,
    pub script_timeout: Duration,
}

impl Default for WebDriverConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:9515".to_string(),
            headless: true,
            page_load_timeout: Duration::from_secs(20),
            script_timeout: Duration::from_secs(20),
        }
    }
}

pub struct WebDriverRuntime {
    http: reqwest::Client,
    config: WebDriverConfig,
}

impl WebDriverRuntime {
    pub fn new(config: WebDriverConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self { http, config })
    }

    fn capabilities(&self) -> Value {
        let mut args = vec![
            "--disable-gpu",
            "--no-sandbox",
            "--disable-dev-shm-usage",
            "--disable-blink-features=AutomationControlled",
            "--blink-settings=imagesEnabled=false",
        ];
        if self.config.headless {
            args.push("--headless=new");
        }
        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    // DOMContentLoaded is enough; explicit waits cover the rest
                    "pageLoadStrategy": "eager",
                    "goog:chromeOptions": {
                        "args": args,
                        "excludeSwitches": ["enable-automation"],
                    }
                }
            }
        })
    }
}

#[async_trait]
impl BrowserRuntime for WebDriverRuntime {
    async fn open_session(&self) -> Result<Box<dyn BrowserSession>, ClientError> {
        let base = self.config.base_url.trim_end_matches('/');
        let value = post(&self.http, &format!("{base}/session"), self.capabilities()).await?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::transient("webdriver session response carried no id"))?
            .to_string();
        debug!(%session_id, "webdriver session created");

        let session = WebDriverSession {
            http: self.http.clone(),
            session_url: format!("{base}/session/{session_id}"),
        };
        post(
            &session.http,
            &format!("{}/timeouts", session.session_url),
            json!({
                "pageLoad": self.config.page_load_timeout.as_millis() as u64,
                "script": self.config.script_timeout.as_millis() as u64,
            }),
        )
        .await?;
        Ok(Box::new(session))
    }
}

struct WebDriverSession {
    http: reqwest::Client,
    session_url: String,
}

#[async_trait]
impl BrowserSession for WebDriverSession {
    async fn navigate(&self, url: &str) -> Result<(), ClientError> {
        post(
            &self.http,
            &format!("{}/url", self.session_url),
            json!({ "url": url }),
        )
        .await
        .map(|_| ())
    }

    async fn execute(&self, script: &str) -> Result<Value, ClientError> {
        post(
            &self.http,
            &format!("{}/execute/sync", self.session_url),
            json!({ "script": script, "args": [] }),
        )
        .await
    }

    async fn execute_async(&self, script: &str) -> Result<Value, ClientError> {
        post(
            &self.http,
            &format!("{}/execute/async", self.session_url),
            json!({ "script": script, "args": [] }),
        )
        .await
    }

    async fn close(&self) -> Result<(), ClientError> {
        self.http
            .delete(&self.session_url)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// One WebDriver command round-trip; the protocol wraps every payload in
/// `{"value": ...}` and carries errors the same way.
async fn post(http: &reqwest::Client, url: &str, body: Value) -> Result<Value, ClientError> {
    let resp = http.post(url).json(&body).send().await?;
    let status = resp.status();
    let payload: Value = resp.json().await?;
    if !status.is_success() {
        let message = payload
            .pointer("/value/message")
            .and_then(Value::as_str)
            .unwrap_or("webdriver command failed");
        return Err(ClientError::transient(format!("webdriver {status}: {message}")));
    }
    Ok(payload.get("value").cloned().unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headless_flag_toggles_chrome_arg() {
        let runtime = WebDriverRuntime::new(WebDriverConfig::default()).expect("runtime");
        let caps = runtime.capabilities();
        let args = caps
            .pointer("/capabilities/alwaysMatch/goog:chromeOptions/args")
            .and_then(Value::as_array)
            .expect("args array");
        assert!(args.iter().any(|a| a == "--headless=new"));

        let runtime = WebDriverRuntime::new(WebDriverConfig {
            headless: false,
            ..WebDriverConfig::default()
        })
        .expect("runtime");
        let caps = runtime.capabilities();
        let args = caps
            .pointer("/capabilities/alwaysMatch/goog:chromeOptions/args")
            .and_then(Value::as_array)
            .expect("args array");
        assert!(!args.iter().any(|a| a == "--headless=new"));
    }
}
