//! Scripted browser runtime shared by the cycle and scheduler tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use biliwatch_client::{BrowserRuntime, BrowserSession, ClientError};
use serde_json::{json, Value};

#[derive(Default)]
pub struct ScriptedRuntime {
    async_responses: Arc<Mutex<VecDeque<Value>>>,
    sync_responses: Arc<Mutex<VecDeque<Value>>>,
    sessions: Arc<AtomicUsize>,
    delay: Mutex<Duration>,
}

impl ScriptedRuntime {
    /// Queue an API payload, wrapped the way the page-side fetch bridge
    /// returns results.
    pub fn push_fetch(&self, api_payload: Value) {
        let bridged = Value::String(json!({ "ok": true, "data": api_payload }).to_string());
        self.async_responses.lock().expect("lock").push_back(bridged);
    }

    /// Queue a result for a page-state extract; readiness predicates always
    /// answer true.
    pub fn push_extract(&self, value: Value) {
        self.sync_responses.lock().expect("lock").push_back(value);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().expect("lock") = delay;
    }

    pub fn sessions_opened(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserRuntime for ScriptedRuntime {
    async fn open_session(&self) -> Result<Box<dyn BrowserSession>, ClientError> {
        self.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession {
            async_responses: self.async_responses.clone(),
            sync_responses: self.sync_responses.clone(),
            delay: *self.delay.lock().expect("lock"),
        }))
    }
}

struct ScriptedSession {
    async_responses: Arc<Mutex<VecDeque<Value>>>,
    sync_responses: Arc<Mutex<VecDeque<Value>>>,
    delay: Duration,
}

#[async_trait]
impl BrowserSession for ScriptedSession {
    async fn navigate(&self, _url: &str) -> Result<(), ClientError> {
        Ok(())
    }

    async fn execute(&self, script: &str) -> Result<Value, ClientError> {
        // extract scripts serialize page state; predicates just return true
        if script.contains("JSON.stringify") {
            if let Some(queued) = self.sync_responses.lock().expect("lock").pop_front() {
                return Ok(queued);
            }
        }
        Ok(Value::Bool(true))
    }

    async fn execute_async(&self, _script: &str) -> Result<Value, ClientError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.async_responses
            .lock()
            .expect("lock")
            .pop_front()
            .ok_or_else(|| ClientError::transient("no scripted response"))
    }

    async fn close(&self) -> Result<(), ClientError> {
        Ok(())
    }
}
