//! IAM Entity Types
//!
//! Portable records for the IAM entities that move between accounts.
//! Field names follow the IAM API so the persisted files read like the
//! API payloads they were captured from.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{IamSyncError, Result};

/// Kind of entity collection handled by the sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Policies,
    Roles,
    RoleManagedPolicies,
    RoleInlinePolicies,
    Groups,
    InstanceProfiles,
    InstanceProfileRoles,
}

impl EntityKind {
    pub const ALL: [EntityKind; 7] = [
        EntityKind::Policies,
        EntityKind::Roles,
        EntityKind::RoleManagedPolicies,
        EntityKind::RoleInlinePolicies,
        EntityKind::Groups,
        EntityKind::InstanceProfiles,
        EntityKind::InstanceProfileRoles,
    ];
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Policies => write!(f, "policy"),
            EntityKind::Roles => write!(f, "role"),
            EntityKind::RoleManagedPolicies => write!(f, "role managed policy"),
            EntityKind::RoleInlinePolicies => write!(f, "role inline policy"),
            EntityKind::Groups => write!(f, "group"),
            EntityKind::InstanceProfiles => write!(f, "instance profile"),
            EntityKind::InstanceProfileRoles => write!(f, "instance profile role"),
        }
    }
}

/// A customer managed policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Policy {
    pub policy_name: String,
    pub path: String,
    /// Document of the version that was default when captured
    pub policy_document: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// An IAM role and its trust document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Role {
    pub role_name: String,
    pub path: String,
    /// Either an embedded JSON document or its text encoding
    pub assume_role_policy_document: Value,
}

/// Managed policy attached to a role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RoleManagedPolicy {
    pub role_name: String,
    pub policy_arn: String,
}

/// Inline policy embedded in a role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RoleInlinePolicy {
    pub role_name: String,
    pub policy_name: String,
    pub policy_document: Value,
}

/// Inline policy carried inside a group record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InlinePolicy {
    pub policy_name: String,
    pub policy_document: Value,
}

/// An IAM group with its attachments embedded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Group {
    pub group_name: String,
    pub path: String,
    #[serde(default)]
    pub managed_policy_arns: Vec<String>,
    #[serde(default)]
    pub inline_policies: Vec<InlinePolicy>,
}

/// An EC2 instance profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InstanceProfile {
    pub instance_profile_name: String,
    pub path: String,
}

/// Role placed in an instance profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InstanceProfileRole {
    pub instance_profile_name: String,
    pub role_name: String,
}

/// Encoding used for role trust documents on export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    /// JSON text, the shape the IAM API accepts
    #[default]
    Text,
    /// Embedded JSON, the shape declarative templates expect
    Structured,
}

/// Return the structured form of a document that may be stored as text.
pub fn document_object(document: &Value) -> Result<Value> {
    match document {
        Value::String(text) => serde_json::from_str(text)
            .map_err(|e| IamSyncError::json("embedded policy document", e)),
        other => Ok(other.clone()),
    }
}

/// Canonical text of a document: two-space indentation, keys sorted.
///
/// `serde_json::Map` is ordered by key, so pretty printing a parsed value
/// already yields sorted keys.
pub fn canonical_document(document: &Value) -> Result<String> {
    let object = document_object(document)?;
    serde_json::to_string_pretty(&object).map_err(|e| IamSyncError::json("policy document", e))
}

/// Encode a document the way the given format stores it.
pub fn encode_document(document: Value, format: DocumentFormat) -> Result<Value> {
    match format {
        DocumentFormat::Structured => document_object(&document),
        DocumentFormat::Text => Ok(Value::String(canonical_document(&document)?)),
    }
}

/// Outcome of reconciling a single entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Created,
    Updated,
    Unchanged,
    Deleted,
    Error,
}

impl std::fmt::Display for SyncAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncAction::Created => write!(f, "created"),
            SyncAction::Updated => write!(f, "updated"),
            SyncAction::Unchanged => write!(f, "unchanged"),
            SyncAction::Deleted => write!(f, "deleted"),
            SyncAction::Error => write!(f, "error"),
        }
    }
}

/// Result of a single reconciliation step
#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    pub kind: EntityKind,
    /// Entity identifier, e.g. `G1` or `G1/Allow`
    pub name: String,
    pub action: SyncAction,
    pub error: Option<String>,
}

impl SyncResult {
    pub fn ok(kind: EntityKind, name: impl Into<String>, action: SyncAction) -> Self {
        Self {
            kind,
            name: name.into(),
            action,
            error: None,
        }
    }

    pub fn failed(kind: EntityKind, name: impl Into<String>, error: impl ToString) -> Self {
        Self {
            kind,
            name: name.into(),
            action: SyncAction::Error,
            error: Some(error.to_string()),
        }
    }

    pub fn success(&self) -> bool {
        self.action != SyncAction::Error
    }
}
