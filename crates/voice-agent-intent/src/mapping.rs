//! Intent-to-signal mapping and the execution planner.
//!
//! Mapping file (JSON5):
//!
//! ```json5
//! {
//!   intents: {
//!     ClimateControl: [{
//!       signal: "Vehicle.Cabin.HVAC.Station.Row1.Driver.Temperature",
//!       action_slot: "action",
//!       value_slot: "value",
//!       factor_slot: "factor",
//!       default_factor: 2,
//!       actions: {
//!         set: {},
//!         increase: { kind: "increase", synonyms: ["raise", "warmer"] },
//!         decrease: { kind: "decrease", synonyms: ["lower", "colder"] },
//!       },
//!     }],
//!   },
//! }
//! ```
//!
//! Each intent maps to an ordered list of signal entries; the plan keeps
//! that order.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use voice_agent_core::error::VoiceAgentError;
use voice_agent_core::types::{ExecutionAction, Slot, slot_value};

use crate::error::PlanError;

/// Turns an intent and its slots into an ordered list of signal actions.
/// Implementations perform no I/O.
pub trait ActionPlanner: Send + Sync {
    fn plan(&self, intent: &str, slots: &[Slot]) -> Result<Vec<ExecutionAction>, PlanError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKindSpec {
    /// Absolute value, from the action's `value` or the value slot.
    #[default]
    Set,
    /// Relative change to an absolute value known at plan time.
    Adjust,
    /// Relative change by `+factor`, resolved against the current value.
    Increase,
    /// Relative change by `-factor`, resolved against the current value.
    Decrease,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionSpec {
    #[serde(default)]
    pub kind: ActionKindSpec,
    /// Fixed value written by this action (e.g. `"true"` for `on`).
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub synonyms: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignalEntry {
    pub signal: String,
    #[serde(default)]
    pub action_slot: Option<String>,
    #[serde(default)]
    pub value_slot: Option<String>,
    #[serde(default)]
    pub factor_slot: Option<String>,
    #[serde(default)]
    pub default_factor: Option<i64>,
    #[serde(default)]
    pub actions: BTreeMap<String, ActionSpec>,
}

impl SignalEntry {
    fn find_action(&self, word: &str) -> Option<&ActionSpec> {
        let word = word.trim().to_lowercase();
        self.actions.get(&word).or_else(|| {
            self.actions
                .values()
                .find(|a| a.synonyms.iter().any(|s| s.eq_ignore_ascii_case(&word)))
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Mapping {
    #[serde(default)]
    pub intents: BTreeMap<String, Vec<SignalEntry>>,
}

impl Mapping {
    pub fn load(path: &Path) -> voice_agent_core::error::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| VoiceAgentError::Mapping(format!("{}: {e}", path.display())))?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> voice_agent_core::error::Result<Self> {
        let mapping: Mapping =
            json5::from_str(raw).map_err(|e| VoiceAgentError::Mapping(e.to_string()))?;
        for (intent, entries) in &mapping.intents {
            if let Some(entry) = entries.iter().find(|e| e.signal.trim().is_empty()) {
                return Err(VoiceAgentError::Mapping(format!(
                    "intent '{intent}' has an entry without a signal path (action slot {:?})",
                    entry.action_slot
                )));
            }
        }
        Ok(mapping)
    }

    pub fn intent_names(&self) -> impl Iterator<Item = &str> {
        self.intents.keys().map(String::as_str)
    }
}

/// Planner backed by a [`Mapping`].
pub struct MappingPlanner {
    mapping: Mapping,
}

impl MappingPlanner {
    pub fn new(mapping: Mapping) -> Self {
        Self { mapping }
    }
}

fn required<'a>(slots: &'a [Slot], intent: &str, name: &str) -> Result<&'a str, PlanError> {
    slot_value(slots, name)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| PlanError::SlotsIncomplete {
            intent: intent.to_string(),
            slot: name.to_string(),
        })
}

fn plan_entry(
    intent: &str,
    entry: &SignalEntry,
    slots: &[Slot],
) -> Result<ExecutionAction, PlanError> {
    let default_action = ActionSpec::default();
    let action = match &entry.action_slot {
        Some(slot) => {
            let word = required(slots, intent, slot)?;
            entry
                .find_action(word)
                .ok_or_else(|| PlanError::IntentNotSupported(format!("{intent}:{word}")))?
        }
        None => &default_action,
    };

    let fixed_or_slot = || -> Result<String, PlanError> {
        if let Some(v) = &action.value {
            return Ok(v.clone());
        }
        let slot = entry.value_slot.as_deref().unwrap_or("value");
        required(slots, intent, slot).map(str::to_string)
    };

    match action.kind {
        ActionKindSpec::Set => Ok(ExecutionAction::set(&entry.signal, fixed_or_slot()?)),
        ActionKindSpec::Adjust => Ok(ExecutionAction::adjust_to(&entry.signal, fixed_or_slot()?)),
        ActionKindSpec::Increase | ActionKindSpec::Decrease => {
            let factor_slot = entry.factor_slot.as_deref().unwrap_or("factor");
            let factor = match slot_value(slots, factor_slot).map(str::trim) {
                Some(raw) if !raw.is_empty() => {
                    raw.parse::<i64>().map_err(|_| PlanError::SlotsIncomplete {
                        intent: intent.to_string(),
                        slot: factor_slot.to_string(),
                    })?
                }
                _ => entry.default_factor.ok_or_else(|| PlanError::SlotsIncomplete {
                    intent: intent.to_string(),
                    slot: factor_slot.to_string(),
                })?,
            };
            let signed = if action.kind == ActionKindSpec::Decrease {
                factor.checked_neg()
            } else {
                Some(factor)
            };
            let signed = signed.ok_or_else(|| PlanError::SlotsIncomplete {
                intent: intent.to_string(),
                slot: factor_slot.to_string(),
            })?;
            Ok(ExecutionAction::adjust_by(&entry.signal, signed))
        }
    }
}

impl ActionPlanner for MappingPlanner {
    fn plan(&self, intent: &str, slots: &[Slot]) -> Result<Vec<ExecutionAction>, PlanError> {
        let entries = self
            .mapping
            .intents
            .get(intent)
            .ok_or_else(|| PlanError::IntentNotSupported(intent.to_string()))?;
        entries
            .iter()
            .map(|entry| plan_entry(intent, entry, slots))
            .collect()
    }
}
