//! RASA HTTP intent engine (`POST /model/parse`).

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde_json::{Value, json};
use tracing::debug;

use voice_agent_core::config::RasaConfig;
use voice_agent_core::types::{Intent, Slot};

use crate::error::NluError;
use crate::nlu::IntentEngine;

pub struct RasaEngine {
    base_url: String,
    timeout: Duration,
    min_confidence: f64,
    client: Mutex<Option<reqwest::blocking::Client>>,
}

impl RasaEngine {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(5),
            min_confidence: 0.0,
            client: Mutex::new(None),
        }
    }

    pub fn from_config(config: &RasaConfig) -> Self {
        let mut engine = Self::new(config.url.clone());
        if let Some(secs) = config.timeout_secs {
            engine.timeout = Duration::from_secs(secs);
        }
        if let Some(c) = config.min_confidence {
            engine.min_confidence = c;
        }
        engine
    }

    /// Blocking client, built on first use from the calling (blocking) thread.
    fn client(&self) -> Result<reqwest::blocking::Client, NluError> {
        let mut guard = self.client.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| NluError::Service(e.to_string()))?;
        *guard = Some(client.clone());
        Ok(client)
    }
}

impl IntentEngine for RasaEngine {
    fn name(&self) -> &str {
        "rasa"
    }

    fn extract(&self, text: &str) -> Result<Value, NluError> {
        let url = format!("{}/model/parse", self.base_url.trim_end_matches('/'));
        debug!(url = %url, "rasa parse");
        let resp = self
            .client()?
            .post(&url)
            .json(&json!({ "text": text }))
            .send()
            .map_err(|e| NluError::Service(e.to_string()))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().unwrap_or_default();
            return Err(NluError::Service(format!("rasa error {status}: {body}")));
        }
        resp.json::<Value>()
            .map_err(|e| NluError::Service(e.to_string()))
    }

    fn process(&self, raw: &Value) -> Option<Intent> {
        let name = raw["intent"]["name"].as_str().filter(|n| !n.is_empty())?;
        let confidence = raw["intent"]["confidence"].as_f64().unwrap_or(1.0);
        if confidence < self.min_confidence {
            debug!(intent = name, confidence, "intent below confidence threshold");
            return None;
        }
        let slots = raw["entities"]
            .as_array()
            .map(|entities| {
                entities
                    .iter()
                    .filter_map(|e| {
                        let value = match &e["value"] {
                            Value::String(s) => s.clone(),
                            Value::Null => return None,
                            other => other.to_string(),
                        };
                        Some(Slot::new(e["entity"].as_str()?, value))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Some(Intent::new(name, slots))
    }
}
