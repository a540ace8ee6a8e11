//! Command dispatcher: bus health check, planning, ordered execution and
//! media-control routing.

use std::sync::Arc;

use tracing::{debug, info, warn};

use voice_agent_bus::SignalBridge;
use voice_agent_core::types::{
    ExecuteStatus, ExecutionAction, ExecutionResult, MEDIA_ACTION_SLOT, MEDIA_CONTROL_INTENT,
    Operand, Slot, slot_value,
};
use voice_agent_media::playback::MediaBackend;

use crate::error::PlanError;
use crate::mapping::ActionPlanner;

fn default_message(intent: &str) -> String {
    format!(
        "Sorry, I failed to execute command against intent '{intent}'. \
         Maybe try again with more specific instructions."
    )
}

const CONNECT_FAILED: &str = "Uh oh, I failed to connect to the signal bus.";
const WRITE_FAILED: &str = "Uh oh, I failed to send value to the signal bus.";

pub struct CommandExecutor {
    bridge: Arc<SignalBridge>,
    planner: Arc<dyn ActionPlanner>,
    media: Arc<dyn MediaBackend>,
}

impl CommandExecutor {
    pub fn new(
        bridge: Arc<SignalBridge>,
        planner: Arc<dyn ActionPlanner>,
        media: Arc<dyn MediaBackend>,
    ) -> Self {
        Self {
            bridge,
            planner,
            media,
        }
    }

    pub fn bridge(&self) -> &Arc<SignalBridge> {
        &self.bridge
    }

    /// Execute `intent`. Blocks on bus I/O; call from a blocking thread.
    ///
    /// Every action in the plan runs even after a failure, and the result
    /// reflects the last action processed.
    pub fn execute(&self, req_id: &str, intent: &str, slots: &[Slot]) -> ExecutionResult {
        if intent == MEDIA_CONTROL_INTENT {
            return self.execute_media(req_id, slots);
        }

        if !self.bridge.is_connected() {
            info!(req_id, "signal bus disconnected, reconnecting");
            if !self.bridge.connect() {
                warn!(req_id, intent, "signal bus reconnect failed");
                return ExecutionResult::new(ExecuteStatus::BusConnError, CONNECT_FAILED);
            }
        }

        let plan = match self.planner.plan(intent, slots) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(req_id, error = %e, "no execution plan");
                let status = match e {
                    PlanError::IntentNotSupported(_) => ExecuteStatus::IntentNotSupported,
                    PlanError::SlotsIncomplete { .. } => ExecuteStatus::SlotsIncomplete,
                };
                return ExecutionResult::new(status, default_message(intent));
            }
        };
        debug!(req_id, intent, actions = plan.len(), "executing plan");

        let mut result = ExecutionResult::new(ExecuteStatus::Error, default_message(intent));
        for action in &plan {
            result = self.run_action(req_id, intent, action);
        }
        info!(req_id, intent, status = ?result.status, "command executed");
        result
    }

    fn run_action(&self, req_id: &str, intent: &str, action: &ExecutionAction) -> ExecutionResult {
        let value = match &action.operand {
            Operand::Value(value) => value.clone(),
            Operand::Factor(factor) => {
                let current = match self.bridge.read(&action.path) {
                    Some(v) if !v.trim().is_empty() => v,
                    _ => {
                        debug!(req_id, path = %action.path, "no current value");
                        return ExecutionResult::new(
                            ExecuteStatus::BusConnError,
                            format!(
                                "Uh oh, there is no value set for intent '{intent}'. \
                                 Why not try setting a value first?"
                            ),
                        );
                    }
                };
                let Ok(n) = current.trim().parse::<i64>() else {
                    warn!(req_id, path = %action.path, value = %current, "current value is not an integer");
                    return ExecutionResult::new(ExecuteStatus::Error, default_message(intent));
                };
                match n.checked_add(*factor) {
                    Some(sum) => sum.to_string(),
                    None => {
                        warn!(req_id, path = %action.path, value = n, factor, "adjusted value out of range");
                        return ExecutionResult::new(ExecuteStatus::Error, default_message(intent));
                    }
                }
            }
        };

        if self.bridge.write(&action.path, &value) {
            debug!(req_id, path = %action.path, value = %value, "signal written");
            ExecutionResult::new(
                ExecuteStatus::Success,
                format!("Yay, I successfully updated the intent '{intent}' to value '{value}'."),
            )
        } else {
            warn!(req_id, path = %action.path, "signal write failed");
            ExecutionResult::new(ExecuteStatus::BusConnError, WRITE_FAILED)
        }
    }

    fn execute_media(&self, req_id: &str, slots: &[Slot]) -> ExecutionResult {
        let action = slot_value(slots, MEDIA_ACTION_SLOT)
            .map(|a| a.trim().to_lowercase())
            .unwrap_or_default();
        let (ok, done, verb) = match action.as_str() {
            "resume" | "play" => (self.media.resume(), "resumed the media", "resume the media"),
            "pause" => (self.media.pause(), "paused the media", "pause the media"),
            "next" => (self.media.next(), "played the next track", "play the next track"),
            "previous" => (
                self.media.previous(),
                "played the previous track",
                "play the previous track",
            ),
            "stop" => (self.media.stop(), "stopped the media", "stop the media"),
            _ => {
                warn!(req_id, action = %action, "unknown media action");
                return ExecutionResult::new(
                    ExecuteStatus::Error,
                    default_message(MEDIA_CONTROL_INTENT),
                );
            }
        };
        info!(req_id, action = %action, ok, "media command");
        if ok {
            ExecutionResult::new(ExecuteStatus::Success, format!("Yay, I successfully {done}."))
        } else {
            ExecutionResult::new(ExecuteStatus::Error, format!("Uh oh, I failed to {verb}."))
        }
    }
}
