//! AWS IAM adapter
//!
//! [`IamApi`] backed by the AWS SDK, plus the STS plumbing used to switch
//! into the production account.

use std::error::Error as StdError;
use std::fmt::Debug;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_credential_types::Credentials;
use aws_sdk_iam::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_iam::types::EntityType;
use aws_sdk_iam::Client as IamClient;
use aws_sdk_sts::Client as StsClient;
use percent_encoding::percent_decode_str;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::AwsCredentials;
use crate::provider::{ApiError, ApiResult, IamApi};
use crate::snapshot::{
    AccountSnapshot, AttachedPolicy, GroupDetail, InstanceProfileDetail, InstanceProfilePage,
    ManagedPolicyDetail, PolicyDetail, PolicyVersion, RoleDetail,
};

const DETAILS_PAGE_SIZE: i32 = 1000;

pub struct AwsIamApi {
    config: SdkConfig,
    iam: IamClient,
}

impl AwsIamApi {
    /// Client for the account the static keys belong to.
    pub async fn connect(credentials: &AwsCredentials, region: &str) -> Self {
        let credentials = Credentials::new(
            &credentials.aws_access_key,
            &credentials.aws_secret_key,
            None,
            None,
            "iam-sync",
        );
        Self::from_config(load_config(credentials, region).await)
    }

    pub fn from_config(config: SdkConfig) -> Self {
        let iam = IamClient::new(&config);
        Self { config, iam }
    }

    /// Client for `role_arn`, using this client's identity to assume it.
    pub async fn assume_role(&self, role_arn: &str, session_name: &str) -> ApiResult<Self> {
        let sts = StsClient::new(&self.config);
        let output = sts
            .assume_role()
            .role_arn(role_arn)
            .role_session_name(session_name)
            .send()
            .await
            .map_err(api_error)?;

        let issued = output
            .credentials()
            .ok_or_else(|| ApiError::Transport(format!("AssumeRole on {} returned no credentials", role_arn)))?;
        let credentials = Credentials::new(
            issued.access_key_id(),
            issued.secret_access_key(),
            Some(issued.session_token().to_string()),
            None,
            "iam-sync-assumed",
        );

        let region = self
            .config
            .region()
            .map(|r| r.to_string())
            .unwrap_or_else(|| "us-east-1".to_string());
        info!(role = %role_arn, "Assumed cross-account role");
        Ok(Self::from_config(load_config(credentials, &region).await))
    }
}

async fn load_config(credentials: Credentials, region: &str) -> SdkConfig {
    aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .credentials_provider(credentials)
        .load()
        .await
}

/// Map an SDK failure onto the adapter's error kinds.
fn api_error<E, R>(err: SdkError<E, R>) -> ApiError
where
    E: ProvideErrorMetadata + StdError + 'static,
    R: Debug,
{
    match &err {
        SdkError::ServiceError(service) => {
            let inner = service.err();
            classify(
                inner.code().unwrap_or("Unknown"),
                inner.message().unwrap_or_default(),
            )
        }
        _ => ApiError::Transport(DisplayErrorContext(&err).to_string()),
    }
}

fn classify(code: &str, message: &str) -> ApiError {
    match code {
        "EntityAlreadyExists" => ApiError::AlreadyExists(message.to_string()),
        "NoSuchEntity" => ApiError::NoSuchEntity(message.to_string()),
        _ => ApiError::Service {
            code: code.to_string(),
            message: message.to_string(),
        },
    }
}

/// IAM returns documents URL-encoded.
fn decode_document(raw: Option<&str>) -> ApiResult<Value> {
    let Some(raw) = raw else {
        return Ok(Value::Null);
    };
    let decoded = percent_decode_str(raw)
        .decode_utf8()
        .map_err(|e| ApiError::Transport(format!("policy document is not UTF-8: {}", e)))?;
    serde_json::from_str(&decoded)
        .map_err(|e| ApiError::Transport(format!("policy document is not JSON: {}", e)))
}

fn attached(policies: &[aws_sdk_iam::types::AttachedPolicy]) -> Vec<AttachedPolicy> {
    policies
        .iter()
        .map(|p| AttachedPolicy {
            policy_name: p.policy_name().map(str::to_string),
            policy_arn: p.policy_arn().unwrap_or_default().to_string(),
        })
        .collect()
}

fn inline(policies: &[aws_sdk_iam::types::PolicyDetail]) -> ApiResult<Vec<PolicyDetail>> {
    policies
        .iter()
        .map(|p| {
            Ok(PolicyDetail {
                policy_name: p.policy_name().unwrap_or_default().to_string(),
                policy_document: decode_document(p.policy_document())?,
            })
        })
        .collect()
}

fn managed_policy(policy: &aws_sdk_iam::types::ManagedPolicyDetail) -> ApiResult<ManagedPolicyDetail> {
    let versions = policy
        .policy_version_list()
        .iter()
        .map(|v| {
            Ok(PolicyVersion {
                version_id: v.version_id().unwrap_or_default().to_string(),
                is_default_version: v.is_default_version(),
                document: decode_document(v.document())?,
            })
        })
        .collect::<ApiResult<Vec<_>>>()?;

    Ok(ManagedPolicyDetail {
        policy_name: policy.policy_name().unwrap_or_default().to_string(),
        arn: policy.arn().unwrap_or_default().to_string(),
        path: policy.path().unwrap_or("/").to_string(),
        description: policy.description().map(str::to_string),
        policy_version_list: versions,
    })
}

fn role(role: &aws_sdk_iam::types::RoleDetail) -> ApiResult<RoleDetail> {
    Ok(RoleDetail {
        role_name: role.role_name().unwrap_or_default().to_string(),
        path: role.path().unwrap_or("/").to_string(),
        assume_role_policy_document: decode_document(role.assume_role_policy_document())?,
        attached_managed_policies: attached(role.attached_managed_policies()),
        role_policy_list: inline(role.role_policy_list())?,
    })
}

fn group(group: &aws_sdk_iam::types::GroupDetail) -> ApiResult<GroupDetail> {
    Ok(GroupDetail {
        group_name: group.group_name().unwrap_or_default().to_string(),
        path: group.path().unwrap_or("/").to_string(),
        attached_managed_policies: attached(group.attached_managed_policies()),
        group_policy_list: inline(group.group_policy_list())?,
    })
}

#[async_trait]
impl IamApi for AwsIamApi {
    async fn account_id(&self) -> ApiResult<String> {
        let identity = StsClient::new(&self.config)
            .get_caller_identity()
            .send()
            .await
            .map_err(api_error)?;
        identity
            .account()
            .map(str::to_string)
            .ok_or_else(|| ApiError::Transport("GetCallerIdentity returned no account".to_string()))
    }

    async fn authorization_details(&self, marker: Option<String>) -> ApiResult<AccountSnapshot> {
        let output = self
            .iam
            .get_account_authorization_details()
            .filter(EntityType::Role)
            .filter(EntityType::Group)
            .filter(EntityType::LocalManagedPolicy)
            .max_items(DETAILS_PAGE_SIZE)
            .set_marker(marker)
            .send()
            .await
            .map_err(api_error)?;

        let snapshot = AccountSnapshot {
            policies: output
                .policies()
                .iter()
                .map(managed_policy)
                .collect::<ApiResult<_>>()?,
            role_detail_list: output.role_detail_list().iter().map(role).collect::<ApiResult<_>>()?,
            group_detail_list: output.group_detail_list().iter().map(group).collect::<ApiResult<_>>()?,
            instance_profiles: vec![],
            is_truncated: output.is_truncated(),
            marker: output.marker().map(str::to_string),
        };

        debug!(
            policies = snapshot.policies.len(),
            roles = snapshot.role_detail_list.len(),
            groups = snapshot.group_detail_list.len(),
            truncated = snapshot.is_truncated,
            "Fetched authorization details page"
        );
        Ok(snapshot)
    }

    async fn instance_profiles(&self, marker: Option<String>) -> ApiResult<InstanceProfilePage> {
        let output = self
            .iam
            .list_instance_profiles()
            .set_marker(marker)
            .send()
            .await
            .map_err(api_error)?;

        let instance_profiles = output
            .instance_profiles()
            .iter()
            .map(|p| InstanceProfileDetail {
                instance_profile_name: p.instance_profile_name().to_string(),
                path: p.path().to_string(),
                role_names: p.roles().iter().map(|r| r.role_name().to_string()).collect(),
            })
            .collect();

        Ok(InstanceProfilePage {
            instance_profiles,
            is_truncated: output.is_truncated(),
            marker: output.marker().map(str::to_string),
        })
    }

    async fn create_policy(
        &self,
        name: &str,
        path: &str,
        document: &str,
        description: Option<&str>,
    ) -> ApiResult<()> {
        self.iam
            .create_policy()
            .policy_name(name)
            .path(path)
            .policy_document(document)
            .set_description(description.map(str::to_string))
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn create_policy_version(
        &self,
        policy_arn: &str,
        document: &str,
        set_as_default: bool,
    ) -> ApiResult<()> {
        self.iam
            .create_policy_version()
            .policy_arn(policy_arn)
            .policy_document(document)
            .set_as_default(set_as_default)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn delete_policy_version(&self, policy_arn: &str, version_id: &str) -> ApiResult<()> {
        self.iam
            .delete_policy_version()
            .policy_arn(policy_arn)
            .version_id(version_id)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn delete_policy(&self, policy_arn: &str) -> ApiResult<()> {
        self.iam
            .delete_policy()
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn create_role(&self, name: &str, path: &str, trust_document: &str) -> ApiResult<()> {
        self.iam
            .create_role()
            .role_name(name)
            .path(path)
            .assume_role_policy_document(trust_document)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn update_assume_role_policy(&self, role: &str, trust_document: &str) -> ApiResult<()> {
        self.iam
            .update_assume_role_policy()
            .role_name(role)
            .policy_document(trust_document)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn attach_role_policy(&self, role: &str, policy_arn: &str) -> ApiResult<()> {
        self.iam
            .attach_role_policy()
            .role_name(role)
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn detach_role_policy(&self, role: &str, policy_arn: &str) -> ApiResult<()> {
        self.iam
            .detach_role_policy()
            .role_name(role)
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn put_role_policy(&self, role: &str, policy_name: &str, document: &str) -> ApiResult<()> {
        self.iam
            .put_role_policy()
            .role_name(role)
            .policy_name(policy_name)
            .policy_document(document)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn delete_role_policy(&self, role: &str, policy_name: &str) -> ApiResult<()> {
        self.iam
            .delete_role_policy()
            .role_name(role)
            .policy_name(policy_name)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn create_group(&self, name: &str, path: &str) -> ApiResult<()> {
        self.iam
            .create_group()
            .group_name(name)
            .path(path)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn attach_group_policy(&self, group: &str, policy_arn: &str) -> ApiResult<()> {
        self.iam
            .attach_group_policy()
            .group_name(group)
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn detach_group_policy(&self, group: &str, policy_arn: &str) -> ApiResult<()> {
        self.iam
            .detach_group_policy()
            .group_name(group)
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn put_group_policy(&self, group: &str, policy_name: &str, document: &str) -> ApiResult<()> {
        self.iam
            .put_group_policy()
            .group_name(group)
            .policy_name(policy_name)
            .policy_document(document)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn delete_group_policy(&self, group: &str, policy_name: &str) -> ApiResult<()> {
        self.iam
            .delete_group_policy()
            .group_name(group)
            .policy_name(policy_name)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn create_instance_profile(&self, name: &str, path: &str) -> ApiResult<()> {
        self.iam
            .create_instance_profile()
            .instance_profile_name(name)
            .path(path)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn add_role_to_instance_profile(&self, profile: &str, role: &str) -> ApiResult<()> {
        self.iam
            .add_role_to_instance_profile()
            .instance_profile_name(profile)
            .role_name(role)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn remove_role_from_instance_profile(&self, profile: &str, role: &str) -> ApiResult<()> {
        self.iam
            .remove_role_from_instance_profile()
            .instance_profile_name(profile)
            .role_name(role)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }
}
