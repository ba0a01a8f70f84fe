//! Messages exchanged with the external workflow engine.

use serde::{Deserialize, Serialize};

/// Final outcome of an audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditResult {
    Pass,
    Reject,
    Undone,
}

impl AuditResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditResult::Pass => "pass",
            AuditResult::Reject => "reject",
            AuditResult::Undone => "undone",
        }
    }
}

// =============================================================================
// Outbound
// =============================================================================

/// Human-readable summary shown to reviewers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbstractInfo {
    pub title: String,
    pub lines: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookKind {
    Result,
    Process,
}

/// Callback the engine invokes as the audit progresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Webhook {
    pub kind: WebhookKind,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditApply {
    pub apply_id: String,
    pub audit_type: String,
    pub user_id: String,
    pub process_def_key: String,
    pub abstract_info: AbstractInfo,
    pub webhooks: Vec<Webhook>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditCancel {
    pub apply_ids: Vec<String>,
    pub reason: String,
}

// =============================================================================
// Inbound
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditResultMsg {
    pub apply_id: String,
    pub result: AuditResult,
}

/// A node of the approval process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInput {
    pub flow_id: String,
    /// Set when the node reached a decision
    #[serde(default)]
    pub audit_result: Option<AuditResult>,
    /// Reviewer's comment
    #[serde(default)]
    pub audit_idea: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditProcessMsg {
    pub apply_id: String,
    #[serde(default)]
    pub current_activity: Option<Activity>,
    #[serde(default)]
    pub next_activity: Vec<Activity>,
    pub process_input: ProcessInput,
}

impl AuditProcessMsg {
    /// The current node rejected the application.
    pub fn is_node_rejection(&self) -> bool {
        self.process_input.audit_result == Some(AuditResult::Reject)
    }

    /// Node the process is waiting on now: the first next activity, falling
    /// back to the current one when the process did not advance.
    pub fn pending_activity(&self) -> Option<&Activity> {
        self.next_activity
            .first()
            .or(self.current_activity.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditProcDefDelMsg {
    pub proc_def_keys: Vec<String>,
}
