//! IAM Control Plane Adapter
//!
//! Trait-based abstraction over the IAM control plane so the extractor and
//! reconciler never talk to the AWS SDK directly.

use async_trait::async_trait;
use thiserror::Error;

use crate::snapshot::{AccountSnapshot, InstanceProfilePage};

/// Errors reported by the control plane
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The entity being created is already present
    #[error("Entity already exists: {0}")]
    AlreadyExists(String),

    /// The entity being changed does not exist
    #[error("No such entity: {0}")]
    NoSuchEntity(String),

    /// Any other service-side rejection
    #[error("{code}: {message}")]
    Service { code: String, message: String },

    /// Request never got a service answer
    #[error("Request failed: {0}")]
    Transport(String),
}

impl ApiError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, ApiError::AlreadyExists(_))
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Operations the sync needs from an IAM control plane
#[async_trait]
pub trait IamApi: Send + Sync {
    /// Account id of the credentials in use
    async fn account_id(&self) -> ApiResult<String>;

    /// One page of roles, groups and local managed policies
    async fn authorization_details(&self, marker: Option<String>) -> ApiResult<AccountSnapshot>;

    /// One page of instance profiles
    async fn instance_profiles(&self, marker: Option<String>) -> ApiResult<InstanceProfilePage>;

    async fn create_policy(
        &self,
        name: &str,
        path: &str,
        document: &str,
        description: Option<&str>,
    ) -> ApiResult<()>;

    async fn create_policy_version(
        &self,
        policy_arn: &str,
        document: &str,
        set_as_default: bool,
    ) -> ApiResult<()>;

    async fn delete_policy_version(&self, policy_arn: &str, version_id: &str) -> ApiResult<()>;

    async fn delete_policy(&self, policy_arn: &str) -> ApiResult<()>;

    async fn create_role(&self, name: &str, path: &str, trust_document: &str) -> ApiResult<()>;

    async fn update_assume_role_policy(&self, role: &str, trust_document: &str) -> ApiResult<()>;

    async fn attach_role_policy(&self, role: &str, policy_arn: &str) -> ApiResult<()>;

    async fn detach_role_policy(&self, role: &str, policy_arn: &str) -> ApiResult<()>;

    async fn put_role_policy(&self, role: &str, policy_name: &str, document: &str)
        -> ApiResult<()>;

    async fn delete_role_policy(&self, role: &str, policy_name: &str) -> ApiResult<()>;

    async fn create_group(&self, name: &str, path: &str) -> ApiResult<()>;

    async fn attach_group_policy(&self, group: &str, policy_arn: &str) -> ApiResult<()>;

    async fn detach_group_policy(&self, group: &str, policy_arn: &str) -> ApiResult<()>;

    async fn put_group_policy(
        &self,
        group: &str,
        policy_name: &str,
        document: &str,
    ) -> ApiResult<()>;

    async fn delete_group_policy(&self, group: &str, policy_name: &str) -> ApiResult<()>;

    async fn create_instance_profile(&self, name: &str, path: &str) -> ApiResult<()>;

    async fn add_role_to_instance_profile(&self, profile: &str, role: &str) -> ApiResult<()>;

    async fn remove_role_from_instance_profile(&self, profile: &str, role: &str)
        -> ApiResult<()>;
}
