//! Wire shapes for the platform's JSON API. Every struct keeps unmodelled
//! fields in an `extra` bag so payload growth upstream stays harmless.

use std::collections::BTreeMap;

use biliwatch_client::ClientError;
use serde::Deserialize;
use serde_json::Value;

/// Standard response wrapper: business success is `code == 0`. An absent code
/// counts as failure.
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<T> {
    pub code: Option<i64>,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    pub fn into_data(self) -> Result<T, ClientError> {
        if self.code != Some(0) {
            return Err(ClientError::Api {
                code: self.code.unwrap_or(-1),
                message: if self.message.is_empty() {
                    "missing or non-zero response code".to_string()
                } else {
                    self.message
                },
            });
        }
        self.data.ok_or(ClientError::Api {
            code: 0,
            message: "response carried no data".to_string(),
        })
    }
}

/// One page of the trending catalog.
#[derive(Debug, Default, Deserialize)]
pub struct PopularPage {
    #[serde(default)]
    pub list: Vec<PopularItem>,
    #[serde(default)]
    pub no_more: bool,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PopularItem {
    pub bvid: Option<String>,
    pub aid: Option<i64>,
    pub cid: Option<i64>,
    pub title: Option<String>,
    pub pic: Option<String>,
    pub stat: Option<StatBlock>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Engagement counters. The play count arrives as `view` on most surfaces and
/// `vv` on some, as a number or a numeric string.
#[derive(Debug, Default, Deserialize)]
pub struct StatBlock {
    pub view: Option<Value>,
    pub vv: Option<Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl StatBlock {
    /// `view` wins over `vv`; a value that cannot be read as an integer is
    /// treated as absent.
    pub fn play_count(&self) -> Option<i64> {
        self.view
            .as_ref()
            .and_then(coerce_count)
            .or_else(|| self.vv.as_ref().and_then(coerce_count))
    }
}

fn coerce_count(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Single-video detail payload, source of the category enrichment.
#[derive(Debug, Default, Deserialize)]
pub struct VideoDetail {
    pub bvid: Option<String>,
    pub aid: Option<i64>,
    pub cid: Option<i64>,
    pub title: Option<String>,
    pub pic: Option<String>,
    pub tid_v2: Option<i64>,
    pub copyright: Option<i64>,
    pub stat: Option<StatBlock>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Live-viewer sample; `total` is the display string, e.g. "1.2万+".
#[derive(Debug, Default, Deserialize)]
pub struct OnlineTotal {
    pub total: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}
