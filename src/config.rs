//! Sync Configuration
//!
//! Settings come from an optional JSON file, then CLI flags override them.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IamSyncError, Result};
use crate::filter::EntityFilters;
use crate::translate::AccountPair;
use crate::types::DocumentFormat;

/// How far reconciliation may go for an entity kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileStrategy {
    /// Create what is missing, leave existing entities alone
    CreateOnly,
    /// Also rewrite documents that differ
    Update,
    /// Also remove children the desired state does not list
    Mirror,
}

impl ReconcileStrategy {
    pub fn updates(self) -> bool {
        matches!(self, ReconcileStrategy::Update | ReconcileStrategy::Mirror)
    }

    pub fn deletes(self) -> bool {
        self == ReconcileStrategy::Mirror
    }
}

impl std::fmt::Display for ReconcileStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconcileStrategy::CreateOnly => write!(f, "create_only"),
            ReconcileStrategy::Update => write!(f, "update"),
            ReconcileStrategy::Mirror => write!(f, "mirror"),
        }
    }
}

/// Strategy per entity kind. Groups are the only kind mirrored by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileStrategies {
    pub policies: ReconcileStrategy,
    pub roles: ReconcileStrategy,
    pub groups: ReconcileStrategy,
    pub instance_profiles: ReconcileStrategy,
}

impl Default for ReconcileStrategies {
    fn default() -> Self {
        Self {
            policies: ReconcileStrategy::Update,
            roles: ReconcileStrategy::CreateOnly,
            groups: ReconcileStrategy::Mirror,
            instance_profiles: ReconcileStrategy::CreateOnly,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub production_account: String,
    pub development_account: String,
    pub region: String,
    /// Role assumed in the production account for cross-account runs
    pub cross_account_role: String,
    pub session_name: String,
    /// Directory holding the per-kind state files
    pub config_dir: PathBuf,
    pub sort_keys: bool,
    pub document_format: DocumentFormat,
    pub filters: EntityFilters,
    pub strategies: ReconcileStrategies,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            production_account: String::new(),
            development_account: String::new(),
            region: "us-east-1".to_string(),
            cross_account_role: "DeveloperAccess".to_string(),
            session_name: "iam-sync".to_string(),
            config_dir: PathBuf::from("config/iam"),
            sort_keys: true,
            document_format: DocumentFormat::Text,
            filters: EntityFilters::default(),
            strategies: ReconcileStrategies::default(),
        }
    }
}

impl SyncConfig {
    /// Load from a JSON file, or defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let text = fs::read_to_string(path).map_err(|source| IamSyncError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text)
            .map_err(|e| IamSyncError::json(format!("config {}", path.display()), e))
    }

    pub fn validate(&self) -> Result<()> {
        validate_account_id("production_account", &self.production_account)?;
        if !self.development_account.is_empty() {
            validate_account_id("development_account", &self.development_account)?;
        }
        if self.cross_account_role.is_empty() {
            return Err(IamSyncError::Config(
                "cross_account_role must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn accounts(&self) -> AccountPair {
        AccountPair {
            production: self.production_account.clone(),
            development: self.development_account.clone(),
        }
    }

    pub fn cross_account_role_arn(&self) -> String {
        format!(
            "arn:aws:iam::{}:role/{}",
            self.production_account, self.cross_account_role
        )
    }
}

fn validate_account_id(field: &str, value: &str) -> Result<()> {
    if value.len() != 12 || !value.chars().all(|c| c.is_ascii_digit()) {
        return Err(IamSyncError::Config(format!(
            "{} must be a 12-digit AWS account id, got {:?}",
            field, value
        )));
    }
    Ok(())
}

/// Static AWS keys read from the credentials file
#[derive(Clone, Deserialize)]
pub struct AwsCredentials {
    pub aws_access_key: String,
    pub aws_secret_key: String,
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("aws_access_key", &self.aws_access_key)
            .field("aws_secret_key", &"<redacted>")
            .finish()
    }
}

impl AwsCredentials {
    /// Read the credentials file. A missing path is a configuration error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.ok_or_else(|| {
            IamSyncError::Credentials(
                "AWS credentials not provided and AWS_CREDENTIALS is not defined".to_string(),
            )
        })?;

        let text = fs::read_to_string(path).map_err(|source| IamSyncError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let credentials: AwsCredentials = serde_json::from_str(&text).map_err(|e| {
            IamSyncError::Credentials(format!("{} is not a valid credentials file: {}", path.display(), e))
        })?;

        if credentials.aws_access_key.is_empty() || credentials.aws_secret_key.is_empty() {
            return Err(IamSyncError::Credentials(format!(
                "{} has an empty access or secret key",
                path.display()
            )));
        }
        Ok(credentials)
    }
}
