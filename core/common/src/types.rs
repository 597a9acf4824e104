//! Mutation kinds and the typed payloads recorded in the offline queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of write recorded in the queue.
///
/// Each kind owns an independent queue segment with its own id sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    /// A single logged set within a training session.
    SetWrite,
    /// A lifecycle action applied to a session (start, complete, cancel).
    SessionAction,
    /// A body-weight log entry.
    WeightLogWrite,
}

impl MutationKind {
    /// Every kind, in the order drain cycles visit them.
    pub const ALL: [MutationKind; 3] = [
        MutationKind::SetWrite,
        MutationKind::SessionAction,
        MutationKind::WeightLogWrite,
    ];

    /// Stable string name used in storage and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::SetWrite => "set_write",
            MutationKind::SessionAction => "session_action",
            MutationKind::WeightLogWrite => "weight_log_write",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MutationKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "set_write" | "set" => Ok(MutationKind::SetWrite),
            "session_action" | "session" => Ok(MutationKind::SessionAction),
            "weight_log_write" | "weight" => Ok(MutationKind::WeightLogWrite),
            other => Err(crate::Error::InvalidInput(format!(
                "Unknown mutation kind: {}",
                other
            ))),
        }
    }
}

/// Locally assigned queue identifier, unique within a kind's segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MutationId(i64);

impl MutationId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Payload for recording a set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetPayload {
    pub session_id: String,
    pub exercise_id: String,
    pub set_number: u32,
    pub reps: u32,
    pub weight_kg: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpe: Option<f32>,
    pub performed_at: DateTime<Utc>,
}

/// Lifecycle action applied to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionAction {
    Start,
    Complete,
    Cancel,
}

impl FromStr for SessionAction {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "start" => Ok(SessionAction::Start),
            "complete" => Ok(SessionAction::Complete),
            "cancel" => Ok(SessionAction::Cancel),
            other => Err(crate::Error::InvalidInput(format!(
                "Unknown session action: {}",
                other
            ))),
        }
    }
}

/// Payload for a session lifecycle action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionActionPayload {
    pub session_id: String,
    pub action: SessionAction,
    pub at: DateTime<Utc>,
}

/// Payload for a body-weight log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightLogPayload {
    pub weight_kg: f64,
    pub logged_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// A typed write, before it is flattened into the queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Set(SetPayload),
    Session(SessionActionPayload),
    WeightLog(WeightLogPayload),
}

impl Mutation {
    /// Queue segment this write belongs to.
    pub fn kind(&self) -> MutationKind {
        match self {
            Mutation::Set(_) => MutationKind::SetWrite,
            Mutation::Session(_) => MutationKind::SessionAction,
            Mutation::WeightLog(_) => MutationKind::WeightLogWrite,
        }
    }

    /// Check the payload before it is queued.
    ///
    /// # Errors
    /// - Empty identifiers
    /// - Zero reps, negative or non-finite weights
    pub fn validate(&self) -> crate::Result<()> {
        match self {
            Mutation::Set(set) => {
                if set.session_id.is_empty() || set.exercise_id.is_empty() {
                    return Err(crate::Error::InvalidInput(
                        "Set requires session and exercise ids".to_string(),
                    ));
                }
                if set.reps == 0 {
                    return Err(crate::Error::InvalidInput(
                        "Set must have at least one rep".to_string(),
                    ));
                }
                check_weight(set.weight_kg)
            }
            Mutation::Session(action) => {
                if action.session_id.is_empty() {
                    return Err(crate::Error::InvalidInput(
                        "Session action requires a session id".to_string(),
                    ));
                }
                Ok(())
            }
            Mutation::WeightLog(log) => check_weight(log.weight_kg),
        }
    }

    /// Flatten into the kind and the JSON payload replayed against the API.
    pub fn into_parts(self) -> crate::Result<(MutationKind, serde_json::Value)> {
        let kind = self.kind();
        let value = match self {
            Mutation::Set(p) => serde_json::to_value(p)?,
            Mutation::Session(p) => serde_json::to_value(p)?,
            Mutation::WeightLog(p) => serde_json::to_value(p)?,
        };
        Ok((kind, value))
    }
}

fn check_weight(weight_kg: f64) -> crate::Result<()> {
    if !weight_kg.is_finite() || weight_kg < 0.0 {
        return Err(crate::Error::InvalidInput(format!(
            "Invalid weight: {}",
            weight_kg
        )));
    }
    Ok(())
}
