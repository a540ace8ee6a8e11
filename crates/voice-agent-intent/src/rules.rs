//! Offline rule-based intent engine.
//!
//! Rule file (JSON5):
//!
//! ```json5
//! {
//!   intents: [
//!     { intent: "HeadlightsControl", patterns: ["turn (?P<action>on|off) the (head)?lights"] },
//!   ],
//! }
//! ```
//!
//! Rules are tried in file order; the first matching pattern wins. Named
//! capture groups that matched become slots, in pattern order.

use std::path::Path;

use regex::Regex;
use serde::Deserialize;
use serde_json::{Value, json};

use voice_agent_core::types::{Intent, Slot};

use crate::error::NluError;
use crate::nlu::IntentEngine;

#[derive(Debug, Deserialize)]
struct RuleFile {
    intents: Vec<RuleSpec>,
}

#[derive(Debug, Deserialize)]
struct RuleSpec {
    intent: String,
    patterns: Vec<String>,
}

struct Rule {
    intent: String,
    patterns: Vec<Regex>,
}

pub struct RuleEngine {
    rules: Vec<Rule>,
}

impl RuleEngine {
    pub fn load(path: &Path) -> Result<Self, NluError> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, NluError> {
        let file: RuleFile = json5::from_str(raw).map_err(|e| NluError::Rules(e.to_string()))?;
        let mut rules = Vec::with_capacity(file.intents.len());
        for spec in file.intents {
            let patterns = spec
                .patterns
                .iter()
                .map(|p| {
                    Regex::new(&format!("(?i){p}"))
                        .map_err(|e| NluError::Rules(format!("{}: {e}", spec.intent)))
                })
                .collect::<Result<Vec<_>, _>>()?;
            rules.push(Rule {
                intent: spec.intent,
                patterns,
            });
        }
        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl IntentEngine for RuleEngine {
    fn name(&self) -> &str {
        "rules"
    }

    fn extract(&self, text: &str) -> Result<Value, NluError> {
        for rule in &self.rules {
            for re in &rule.patterns {
                let Some(caps) = re.captures(text) else {
                    continue;
                };
                let slots: Vec<Value> = re
                    .capture_names()
                    .flatten()
                    .filter_map(|name| {
                        caps.name(name)
                            .filter(|m| !m.as_str().is_empty())
                            .map(|m| json!({ "slotName": name, "value": m.as_str().to_lowercase() }))
                    })
                    .collect();
                return Ok(json!({
                    "input": text,
                    "intent": { "intentName": rule.intent, "probability": 1.0 },
                    "slots": slots,
                }));
            }
        }
        Ok(json!({ "input": text, "intent": { "intentName": null, "probability": 0.0 }, "slots": [] }))
    }

    fn process(&self, raw: &Value) -> Option<Intent> {
        let name = raw["intent"]["intentName"].as_str()?;
        let slots = raw["slots"]
            .as_array()
            .map(|slots| {
                slots
                    .iter()
                    .filter_map(|s| {
                        Some(Slot::new(s["slotName"].as_str()?, s["value"].as_str()?))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Some(Intent::new(name, slots))
    }
}
