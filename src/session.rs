//! Sync Session
//!
//! Owns the desired-state collections for one run. Every operation takes
//! the session explicitly; nothing is held in global state.

use serde::{Deserialize, Serialize};

use crate::types::{
    EntityKind, Group, InstanceProfile, InstanceProfileRole, Policy, Role, RoleInlinePolicy,
    RoleManagedPolicy,
};

/// Desired IAM state, as extracted or loaded from files
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IamSession {
    pub policies: Vec<Policy>,
    pub roles: Vec<Role>,
    pub role_managed_policies: Vec<RoleManagedPolicy>,
    pub role_inline_policies: Vec<RoleInlinePolicy>,
    pub groups: Vec<Group>,
    pub instance_profiles: Vec<InstanceProfile>,
    pub instance_profile_roles: Vec<InstanceProfileRole>,
}

impl IamSession {
    /// Number of records held for a kind
    pub fn count(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::Policies => self.policies.len(),
            EntityKind::Roles => self.roles.len(),
            EntityKind::RoleManagedPolicies => self.role_managed_policies.len(),
            EntityKind::RoleInlinePolicies => self.role_inline_policies.len(),
            EntityKind::Groups => self.groups.len(),
            EntityKind::InstanceProfiles => self.instance_profiles.len(),
            EntityKind::InstanceProfileRoles => self.instance_profile_roles.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        EntityKind::ALL.iter().all(|kind| self.count(*kind) == 0)
    }

    /// Managed policy ARNs the desired state attaches to a role
    pub fn role_managed_arns(&self, role: &str) -> impl Iterator<Item = &str> {
        let role = role.to_string();
        self.role_managed_policies
            .iter()
            .filter(move |a| a.role_name == role)
            .map(|a| a.policy_arn.as_str())
    }

    /// Inline policies the desired state places on a role
    pub fn role_inline(&self, role: &str) -> impl Iterator<Item = &RoleInlinePolicy> {
        let role = role.to_string();
        self.role_inline_policies
            .iter()
            .filter(move |p| p.role_name == role)
    }

    /// Roles the desired state places in an instance profile
    pub fn profile_roles(&self, profile: &str) -> impl Iterator<Item = &str> {
        let profile = profile.to_string();
        self.instance_profile_roles
            .iter()
            .filter(move |a| a.instance_profile_name == profile)
            .map(|a| a.role_name.as_str())
    }
}
