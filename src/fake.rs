//! In-memory IAM control plane for tests.
//!
//! Keeps an account's state in memory, serves it back through the same
//! paginated calls as the real API and records every mutating call.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::provider::{ApiError, ApiResult, IamApi};
use crate::snapshot::{
    AccountSnapshot, AttachedPolicy, GroupDetail, InstanceProfileDetail, InstanceProfilePage,
    ManagedPolicyDetail, PolicyDetail, PolicyVersion, RoleDetail,
};

#[derive(Default)]
struct FakeState {
    policies: Vec<ManagedPolicyDetail>,
    roles: Vec<RoleDetail>,
    groups: Vec<GroupDetail>,
    profiles: Vec<InstanceProfileDetail>,
    calls: Vec<String>,
    failures: HashMap<String, ApiError>,
}

pub struct FakeIam {
    account: String,
    page_size: usize,
    state: Mutex<FakeState>,
}

fn service(code: &str, message: impl Into<String>) -> ApiError {
    ApiError::Service {
        code: code.to_string(),
        message: message.into(),
    }
}

fn parse(document: &str) -> ApiResult<Value> {
    serde_json::from_str(document).map_err(|e| service("MalformedPolicyDocument", e.to_string()))
}

fn page<T: Clone>(items: &[T], index: usize, size: usize) -> (Vec<T>, bool) {
    let start = (index * size).min(items.len());
    let end = ((index + 1) * size).min(items.len());
    (items[start..end].to_vec(), items.len() > end)
}

impl FakeIam {
    pub fn new(account: &str) -> Self {
        Self {
            account: account.to_string(),
            page_size: 1000,
            state: Mutex::new(FakeState::default()),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn policy_arn(&self, name: &str) -> String {
        format!("arn:aws:iam::{}:policy/{}", self.account, name)
    }

    /// Seed a policy with `(version id, is default, document)` entries.
    pub fn add_policy(&self, name: &str, versions: &[(&str, bool, Value)]) {
        let mut state = self.state.lock().unwrap();
        state.policies.push(ManagedPolicyDetail {
            policy_name: name.to_string(),
            arn: self.policy_arn(name),
            path: "/".to_string(),
            description: None,
            policy_version_list: versions
                .iter()
                .map(|(id, default, document)| PolicyVersion {
                    version_id: id.to_string(),
                    is_default_version: *default,
                    document: document.clone(),
                })
                .collect(),
        });
    }

    pub fn add_role(&self, name: &str, trust: Value) {
        let mut state = self.state.lock().unwrap();
        state.roles.push(RoleDetail {
            role_name: name.to_string(),
            path: "/".to_string(),
            assume_role_policy_document: trust,
            attached_managed_policies: vec![],
            role_policy_list: vec![],
        });
    }

    pub fn add_group(&self, name: &str, arns: &[&str], inline: &[(&str, Value)]) {
        let mut state = self.state.lock().unwrap();
        state.groups.push(GroupDetail {
            group_name: name.to_string(),
            path: "/".to_string(),
            attached_managed_policies: arns
                .iter()
                .map(|arn| AttachedPolicy {
                    policy_name: None,
                    policy_arn: arn.to_string(),
                })
                .collect(),
            group_policy_list: inline
                .iter()
                .map(|(name, doc)| PolicyDetail {
                    policy_name: name.to_string(),
                    policy_document: doc.clone(),
                })
                .collect(),
        });
    }

    pub fn add_instance_profile(&self, name: &str, roles: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state.profiles.push(InstanceProfileDetail {
            instance_profile_name: name.to_string(),
            path: "/".to_string(),
            role_names: roles.iter().map(|r| r.to_string()).collect(),
        });
    }

    /// Make the call recorded as `call` fail with `error`.
    pub fn fail_on(&self, call: &str, error: ApiError) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(call.to_string(), error);
    }

    /// Mutating calls in the order they were made
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn policy(&self, name: &str) -> Option<ManagedPolicyDetail> {
        let state = self.state.lock().unwrap();
        state.policies.iter().find(|p| p.policy_name == name).cloned()
    }

    pub fn role(&self, name: &str) -> Option<RoleDetail> {
        let state = self.state.lock().unwrap();
        state.roles.iter().find(|r| r.role_name == name).cloned()
    }

    pub fn group(&self, name: &str) -> Option<GroupDetail> {
        let state = self.state.lock().unwrap();
        state.groups.iter().find(|g| g.group_name == name).cloned()
    }

    pub fn instance_profile(&self, name: &str) -> Option<InstanceProfileDetail> {
        let state = self.state.lock().unwrap();
        state
            .profiles
            .iter()
            .find(|p| p.instance_profile_name == name)
            .cloned()
    }

    fn record(&self, state: &mut FakeState, call: String) -> ApiResult<()> {
        let failure = state.failures.get(&call).cloned();
        state.calls.push(call);
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn marker_index(marker: Option<String>) -> usize {
        marker.and_then(|m| m.parse().ok()).unwrap_or(0)
    }
}

#[async_trait]
impl IamApi for FakeIam {
    async fn account_id(&self) -> ApiResult<String> {
        Ok(self.account.clone())
    }

    async fn authorization_details(&self, marker: Option<String>) -> ApiResult<AccountSnapshot> {
        let state = self.state.lock().unwrap();
        let index = Self::marker_index(marker);

        let (policies, more_policies) = page(&state.policies, index, self.page_size);
        let (roles, more_roles) = page(&state.roles, index, self.page_size);
        let (groups, more_groups) = page(&state.groups, index, self.page_size);
        let is_truncated = more_policies || more_roles || more_groups;

        Ok(AccountSnapshot {
            policies,
            role_detail_list: roles,
            group_detail_list: groups,
            instance_profiles: vec![],
            is_truncated,
            marker: is_truncated.then(|| (index + 1).to_string()),
        })
    }

    async fn instance_profiles(&self, marker: Option<String>) -> ApiResult<InstanceProfilePage> {
        let state = self.state.lock().unwrap();
        let index = Self::marker_index(marker);
        let (instance_profiles, is_truncated) = page(&state.profiles, index, self.page_size);

        Ok(InstanceProfilePage {
            instance_profiles,
            is_truncated,
            marker: is_truncated.then(|| (index + 1).to_string()),
        })
    }

    async fn create_policy(
        &self,
        name: &str,
        path: &str,
        document: &str,
        description: Option<&str>,
    ) -> ApiResult<()> {
        let mut state = self.state.lock().unwrap();
        self.record(&mut state, format!("create_policy {}", name))?;
        if state.policies.iter().any(|p| p.policy_name == name) {
            return Err(ApiError::AlreadyExists(name.to_string()));
        }
        let document = parse(document)?;
        state.policies.push(ManagedPolicyDetail {
            policy_name: name.to_string(),
            arn: self.policy_arn(name),
            path: path.to_string(),
            description: description.map(str::to_string),
            policy_version_list: vec![PolicyVersion {
                version_id: "v1".to_string(),
                is_default_version: true,
                document,
            }],
        });
        Ok(())
    }

    async fn create_policy_version(
        &self,
        policy_arn: &str,
        document: &str,
        set_as_default: bool,
    ) -> ApiResult<()> {
        let mut state = self.state.lock().unwrap();
        self.record(&mut state, format!("create_policy_version {}", policy_arn))?;
        let document = parse(document)?;
        let policy = state
            .policies
            .iter_mut()
            .find(|p| p.arn == policy_arn)
            .ok_or_else(|| ApiError::NoSuchEntity(policy_arn.to_string()))?;
        if policy.policy_version_list.len() >= 5 {
            return Err(service("LimitExceeded", "a policy can have at most 5 versions"));
        }

        let next = policy
            .policy_version_list
            .iter()
            .filter_map(|v| crate::snapshot::version_number(&v.version_id))
            .max()
            .unwrap_or(0)
            + 1;
        if set_as_default {
            for version in &mut policy.policy_version_list {
                version.is_default_version = false;
            }
        }
        policy.policy_version_list.push(PolicyVersion {
            version_id: format!("v{}", next),
            is_default_version: set_as_default,
            document,
        });
        Ok(())
    }

    async fn delete_policy_version(&self, policy_arn: &str, version_id: &str) -> ApiResult<()> {
        let mut state = self.state.lock().unwrap();
        self.record(
            &mut state,
            format!("delete_policy_version {} {}", policy_arn, version_id),
        )?;
        let policy = state
            .policies
            .iter_mut()
            .find(|p| p.arn == policy_arn)
            .ok_or_else(|| ApiError::NoSuchEntity(policy_arn.to_string()))?;
        let index = policy
            .policy_version_list
            .iter()
            .position(|v| v.version_id == version_id)
            .ok_or_else(|| ApiError::NoSuchEntity(version_id.to_string()))?;
        if policy.policy_version_list[index].is_default_version {
            return Err(service("DeleteConflict", "cannot delete the default version"));
        }
        policy.policy_version_list.remove(index);
        Ok(())
    }

    async fn delete_policy(&self, policy_arn: &str) -> ApiResult<()> {
        let mut state = self.state.lock().unwrap();
        self.record(&mut state, format!("delete_policy {}", policy_arn))?;
        let index = state
            .policies
            .iter()
            .position(|p| p.arn == policy_arn)
            .ok_or_else(|| ApiError::NoSuchEntity(policy_arn.to_string()))?;
        if state.policies[index].policy_version_list.len() > 1 {
            return Err(service("DeleteConflict", "policy has non-default versions"));
        }
        state.policies.remove(index);
        Ok(())
    }

    async fn create_role(&self, name: &str, path: &str, trust_document: &str) -> ApiResult<()> {
        let mut state = self.state.lock().unwrap();
        self.record(&mut state, format!("create_role {}", name))?;
        if state.roles.iter().any(|r| r.role_name == name) {
            return Err(ApiError::AlreadyExists(name.to_string()));
        }
        let trust = parse(trust_document)?;
        state.roles.push(RoleDetail {
            role_name: name.to_string(),
            path: path.to_string(),
            assume_role_policy_document: trust,
            attached_managed_policies: vec![],
            role_policy_list: vec![],
        });
        Ok(())
    }

    async fn update_assume_role_policy(&self, role: &str, trust_document: &str) -> ApiResult<()> {
        let mut state = self.state.lock().unwrap();
        self.record(&mut state, format!("update_assume_role_policy {}", role))?;
        let trust = parse(trust_document)?;
        let role = state
            .roles
            .iter_mut()
            .find(|r| r.role_name == role)
            .ok_or_else(|| ApiError::NoSuchEntity(role.to_string()))?;
        role.assume_role_policy_document = trust;
        Ok(())
    }

    async fn attach_role_policy(&self, role: &str, policy_arn: &str) -> ApiResult<()> {
        let mut state = self.state.lock().unwrap();
        self.record(&mut state, format!("attach_role_policy {} {}", role, policy_arn))?;
        let role = state
            .roles
            .iter_mut()
            .find(|r| r.role_name == role)
            .ok_or_else(|| ApiError::NoSuchEntity(role.to_string()))?;
        if !role
            .attached_managed_policies
            .iter()
            .any(|p| p.policy_arn == policy_arn)
        {
            role.attached_managed_policies.push(AttachedPolicy {
                policy_name: None,
                policy_arn: policy_arn.to_string(),
            });
        }
        Ok(())
    }

    async fn detach_role_policy(&self, role: &str, policy_arn: &str) -> ApiResult<()> {
        let mut state = self.state.lock().unwrap();
        self.record(&mut state, format!("detach_role_policy {} {}", role, policy_arn))?;
        let role = state
            .roles
            .iter_mut()
            .find(|r| r.role_name == role)
            .ok_or_else(|| ApiError::NoSuchEntity(role.to_string()))?;
        role.attached_managed_policies
            .retain(|p| p.policy_arn != policy_arn);
        Ok(())
    }

    async fn put_role_policy(
        &self,
        role: &str,
        policy_name: &str,
        document: &str,
    ) -> ApiResult<()> {
        let mut state = self.state.lock().unwrap();
        self.record(&mut state, format!("put_role_policy {}/{}", role, policy_name))?;
        let document = parse(document)?;
        let role = state
            .roles
            .iter_mut()
            .find(|r| r.role_name == role)
            .ok_or_else(|| ApiError::NoSuchEntity(role.to_string()))?;
        role.role_policy_list.retain(|p| p.policy_name != policy_name);
        role.role_policy_list.push(PolicyDetail {
            policy_name: policy_name.to_string(),
            policy_document: document,
        });
        Ok(())
    }

    async fn delete_role_policy(&self, role: &str, policy_name: &str) -> ApiResult<()> {
        let mut state = self.state.lock().unwrap();
        self.record(&mut state, format!("delete_role_policy {}/{}", role, policy_name))?;
        let role = state
            .roles
            .iter_mut()
            .find(|r| r.role_name == role)
            .ok_or_else(|| ApiError::NoSuchEntity(role.to_string()))?;
        role.role_policy_list.retain(|p| p.policy_name != policy_name);
        Ok(())
    }

    async fn create_group(&self, name: &str, path: &str) -> ApiResult<()> {
        let mut state = self.state.lock().unwrap();
        self.record(&mut state, format!("create_group {}", name))?;
        if state.groups.iter().any(|g| g.group_name == name) {
            return Err(ApiError::AlreadyExists(name.to_string()));
        }
        state.groups.push(GroupDetail {
            group_name: name.to_string(),
            path: path.to_string(),
            attached_managed_policies: vec![],
            group_policy_list: vec![],
        });
        Ok(())
    }

    async fn attach_group_policy(&self, group: &str, policy_arn: &str) -> ApiResult<()> {
        let mut state = self.state.lock().unwrap();
        self.record(&mut state, format!("attach_group_policy {} {}", group, policy_arn))?;
        let group = state
            .groups
            .iter_mut()
            .find(|g| g.group_name == group)
            .ok_or_else(|| ApiError::NoSuchEntity(group.to_string()))?;
        if !group
            .attached_managed_policies
            .iter()
            .any(|p| p.policy_arn == policy_arn)
        {
            group.attached_managed_policies.push(AttachedPolicy {
                policy_name: None,
                policy_arn: policy_arn.to_string(),
            });
        }
        Ok(())
    }

    async fn detach_group_policy(&self, group: &str, policy_arn: &str) -> ApiResult<()> {
        let mut state = self.state.lock().unwrap();
        self.record(&mut state, format!("detach_group_policy {} {}", group, policy_arn))?;
        let group = state
            .groups
            .iter_mut()
            .find(|g| g.group_name == group)
            .ok_or_else(|| ApiError::NoSuchEntity(group.to_string()))?;
        group
            .attached_managed_policies
            .retain(|p| p.policy_arn != policy_arn);
        Ok(())
    }

    async fn put_group_policy(
        &self,
        group: &str,
        policy_name: &str,
        document: &str,
    ) -> ApiResult<()> {
        let mut state = self.state.lock().unwrap();
        self.record(&mut state, format!("put_group_policy {}/{}", group, policy_name))?;
        let document = parse(document)?;
        let group = state
            .groups
            .iter_mut()
            .find(|g| g.group_name == group)
            .ok_or_else(|| ApiError::NoSuchEntity(group.to_string()))?;
        group.group_policy_list.retain(|p| p.policy_name != policy_name);
        group.group_policy_list.push(PolicyDetail {
            policy_name: policy_name.to_string(),
            policy_document: document,
        });
        Ok(())
    }

    async fn delete_group_policy(&self, group: &str, policy_name: &str) -> ApiResult<()> {
        let mut state = self.state.lock().unwrap();
        self.record(&mut state, format!("delete_group_policy {}/{}", group, policy_name))?;
        let group = state
            .groups
            .iter_mut()
            .find(|g| g.group_name == group)
            .ok_or_else(|| ApiError::NoSuchEntity(group.to_string()))?;
        group.group_policy_list.retain(|p| p.policy_name != policy_name);
        Ok(())
    }

    async fn create_instance_profile(&self, name: &str, path: &str) -> ApiResult<()> {
        let mut state = self.state.lock().unwrap();
        self.record(&mut state, format!("create_instance_profile {}", name))?;
        if state.profiles.iter().any(|p| p.instance_profile_name == name) {
            return Err(ApiError::AlreadyExists(name.to_string()));
        }
        state.profiles.push(InstanceProfileDetail {
            instance_profile_name: name.to_string(),
            path: path.to_string(),
            role_names: vec![],
        });
        Ok(())
    }

    async fn add_role_to_instance_profile(&self, profile: &str, role: &str) -> ApiResult<()> {
        let mut state = self.state.lock().unwrap();
        self.record(
            &mut state,
            format!("add_role_to_instance_profile {} {}", profile, role),
        )?;
        let profile = state
            .profiles
            .iter_mut()
            .find(|p| p.instance_profile_name == profile)
            .ok_or_else(|| ApiError::NoSuchEntity(profile.to_string()))?;
        if profile.role_names.iter().any(|r| r == role) {
            return Err(ApiError::AlreadyExists(role.to_string()));
        }
        profile.role_names.push(role.to_string());
        Ok(())
    }

    async fn remove_role_from_instance_profile(
        &self,
        profile: &str,
        role: &str,
    ) -> ApiResult<()> {
        let mut state = self.state.lock().unwrap();
        self.record(
            &mut state,
            format!("remove_role_from_instance_profile {} {}", profile, role),
        )?;
        let profile = state
            .profiles
            .iter_mut()
            .find(|p| p.instance_profile_name == profile)
            .ok_or_else(|| ApiError::NoSuchEntity(profile.to_string()))?;
        profile.role_names.retain(|r| r != role);
        Ok(())
    }
}
