//! Account Snapshot
//!
//! Raw IAM state of one account, shaped like the account authorization
//! details response. Pages from the control plane are merged into a single
//! snapshot before anything else looks at them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::provider::{ApiError, IamApi};

/// Merged authorization details for an account
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AccountSnapshot {
    #[serde(default)]
    pub policies: Vec<ManagedPolicyDetail>,
    #[serde(default)]
    pub role_detail_list: Vec<RoleDetail>,
    #[serde(default)]
    pub group_detail_list: Vec<GroupDetail>,
    #[serde(default)]
    pub instance_profiles: Vec<InstanceProfileDetail>,
    #[serde(default)]
    pub is_truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<String>,
}

/// Managed policy with its retained versions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ManagedPolicyDetail {
    pub policy_name: String,
    pub arn: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub policy_version_list: Vec<PolicyVersion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyVersion {
    pub version_id: String,
    pub is_default_version: bool,
    pub document: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AttachedPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_name: Option<String>,
    pub policy_arn: String,
}

/// Inline policy as reported for a role or group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDetail {
    pub policy_name: String,
    pub policy_document: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RoleDetail {
    pub role_name: String,
    pub path: String,
    pub assume_role_policy_document: Value,
    #[serde(default)]
    pub attached_managed_policies: Vec<AttachedPolicy>,
    #[serde(default)]
    pub role_policy_list: Vec<PolicyDetail>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GroupDetail {
    pub group_name: String,
    pub path: String,
    #[serde(default)]
    pub attached_managed_policies: Vec<AttachedPolicy>,
    #[serde(default)]
    pub group_policy_list: Vec<PolicyDetail>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InstanceProfileDetail {
    pub instance_profile_name: String,
    pub path: String,
    #[serde(default)]
    pub role_names: Vec<String>,
}

/// One page of instance profiles
#[derive(Debug, Clone, Default)]
pub struct InstanceProfilePage {
    pub instance_profiles: Vec<InstanceProfileDetail>,
    pub is_truncated: bool,
    pub marker: Option<String>,
}

impl ManagedPolicyDetail {
    /// The version currently in effect
    pub fn default_version(&self) -> Option<&PolicyVersion> {
        self.policy_version_list.iter().find(|v| v.is_default_version)
    }

    /// The non-default version with the smallest numeric suffix
    pub fn oldest_version(&self) -> Option<&PolicyVersion> {
        self.policy_version_list
            .iter()
            .filter(|v| !v.is_default_version)
            .filter_map(|v| version_number(&v.version_id).map(|n| (n, v)))
            .min_by_key(|(n, _)| *n)
            .map(|(_, v)| v)
    }
}

/// Numeric part of a version id such as `v4`
pub fn version_number(version_id: &str) -> Option<u32> {
    version_id
        .trim_start_matches(|c| c == 'v' || c == 'V')
        .parse()
        .ok()
}

impl AccountSnapshot {
    /// Append the lists of a follow-up page and take over its cursor.
    pub fn merge_page(&mut self, page: AccountSnapshot) {
        self.policies.extend(page.policies);
        self.role_detail_list.extend(page.role_detail_list);
        self.group_detail_list.extend(page.group_detail_list);
        self.instance_profiles.extend(page.instance_profiles);
        self.is_truncated = page.is_truncated;
        self.marker = page.marker;
    }

    /// Mark the merged result as complete.
    pub fn finish(&mut self) {
        self.is_truncated = false;
        self.marker = None;
    }

    pub fn policy(&self, name: &str) -> Option<&ManagedPolicyDetail> {
        self.policies.iter().find(|p| p.policy_name == name)
    }

    pub fn role(&self, name: &str) -> Option<&RoleDetail> {
        self.role_detail_list.iter().find(|r| r.role_name == name)
    }

    pub fn group(&self, name: &str) -> Option<&GroupDetail> {
        self.group_detail_list.iter().find(|g| g.group_name == name)
    }

    pub fn instance_profile(&self, name: &str) -> Option<&InstanceProfileDetail> {
        self.instance_profiles
            .iter()
            .find(|p| p.instance_profile_name == name)
    }
}

/// Capture the full IAM state of the account behind `api`.
///
/// Follows the truncation flag of both listings until exhausted.
pub async fn capture<A: IamApi + ?Sized>(api: &A) -> Result<AccountSnapshot, ApiError> {
    let mut snapshot = api.authorization_details(None).await?;
    let mut pages = 1;

    while snapshot.is_truncated {
        let marker = snapshot.marker.clone();
        let page = api.authorization_details(marker).await?;
        snapshot.merge_page(page);
        pages += 1;
    }
    snapshot.finish();

    let mut profiles = api.instance_profiles(None).await?;
    snapshot.instance_profiles.append(&mut profiles.instance_profiles);
    while profiles.is_truncated {
        profiles = api.instance_profiles(profiles.marker.take()).await?;
        snapshot.instance_profiles.append(&mut profiles.instance_profiles);
    }

    debug!(
        pages = pages,
        policies = snapshot.policies.len(),
        roles = snapshot.role_detail_list.len(),
        groups = snapshot.group_detail_list.len(),
        instance_profiles = snapshot.instance_profiles.len(),
        "Captured account authorization details"
    );

    Ok(snapshot)
}
