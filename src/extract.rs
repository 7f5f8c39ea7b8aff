//! Extractor
//!
//! Turns a raw account snapshot into the filtered, portable entity
//! collections of an [`IamSession`].

use tracing::{info, warn};

use crate::error::Result;
use crate::filter::{EntityFilters, NameFilter};
use crate::session::IamSession;
use crate::snapshot::AccountSnapshot;
use crate::types::{
    document_object, encode_document, DocumentFormat, Group, InlinePolicy, InstanceProfile,
    InstanceProfileRole, Policy, Role, RoleInlinePolicy, RoleManagedPolicy,
};

pub struct Extractor<'a> {
    filters: &'a EntityFilters,
    trust_format: DocumentFormat,
}

impl<'a> Extractor<'a> {
    pub fn new(filters: &'a EntityFilters, trust_format: DocumentFormat) -> Self {
        Self {
            filters,
            trust_format,
        }
    }

    /// Extract every collection from the snapshot.
    pub fn extract(&self, snapshot: &AccountSnapshot) -> Result<IamSession> {
        let policies = self.extract_policies(snapshot)?;
        let (roles, role_managed_policies, role_inline_policies) = self.extract_roles(snapshot)?;
        let groups = self.extract_groups(snapshot)?;
        let (instance_profiles, instance_profile_roles) = self.extract_instance_profiles(snapshot);

        info!(
            policies = policies.len(),
            roles = roles.len(),
            groups = groups.len(),
            instance_profiles = instance_profiles.len(),
            "Extracted IAM entities"
        );

        Ok(IamSession {
            policies,
            roles,
            role_managed_policies,
            role_inline_policies,
            groups,
            instance_profiles,
            instance_profile_roles,
        })
    }

    /// One policy per managed policy, carrying its default version's document.
    pub fn extract_policies(&self, snapshot: &AccountSnapshot) -> Result<Vec<Policy>> {
        let mut policies = Vec::new();

        for policy in &snapshot.policies {
            if excluded(&self.filters.policies, "policy", &policy.policy_name) {
                continue;
            }

            let Some(version) = policy.default_version() else {
                warn!(policy = %policy.policy_name, "Policy has no default version, skipping");
                continue;
            };

            policies.push(Policy {
                policy_name: policy.policy_name.clone(),
                path: policy.path.clone(),
                policy_document: document_object(&version.document)?,
                description: policy.description.clone(),
            });
        }

        Ok(policies)
    }

    /// Roles plus their managed and inline policy side tables.
    pub fn extract_roles(
        &self,
        snapshot: &AccountSnapshot,
    ) -> Result<(Vec<Role>, Vec<RoleManagedPolicy>, Vec<RoleInlinePolicy>)> {
        let mut roles = Vec::new();
        let mut managed = Vec::new();
        let mut inline = Vec::new();

        for role in &snapshot.role_detail_list {
            if excluded(&self.filters.roles, "role", &role.role_name) {
                continue;
            }

            roles.push(Role {
                role_name: role.role_name.clone(),
                path: role.path.clone(),
                assume_role_policy_document: encode_document(
                    role.assume_role_policy_document.clone(),
                    self.trust_format,
                )?,
            });

            managed.extend(role.attached_managed_policies.iter().map(|p| RoleManagedPolicy {
                role_name: role.role_name.clone(),
                policy_arn: p.policy_arn.clone(),
            }));

            for policy in &role.role_policy_list {
                inline.push(RoleInlinePolicy {
                    role_name: role.role_name.clone(),
                    policy_name: policy.policy_name.clone(),
                    policy_document: document_object(&policy.policy_document)?,
                });
            }
        }

        Ok((roles, managed, inline))
    }

    /// Groups with their attachments embedded.
    pub fn extract_groups(&self, snapshot: &AccountSnapshot) -> Result<Vec<Group>> {
        let mut groups = Vec::new();

        for group in &snapshot.group_detail_list {
            if excluded(&self.filters.groups, "group", &group.group_name) {
                continue;
            }

            let inline_policies = group
                .group_policy_list
                .iter()
                .map(|p| {
                    Ok(InlinePolicy {
                        policy_name: p.policy_name.clone(),
                        policy_document: document_object(&p.policy_document)?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            groups.push(Group {
                group_name: group.group_name.clone(),
                path: group.path.clone(),
                managed_policy_arns: group
                    .attached_managed_policies
                    .iter()
                    .map(|p| p.policy_arn.clone())
                    .collect(),
                inline_policies,
            });
        }

        Ok(groups)
    }

    pub fn extract_instance_profiles(
        &self,
        snapshot: &AccountSnapshot,
    ) -> (Vec<InstanceProfile>, Vec<InstanceProfileRole>) {
        let mut profiles = Vec::new();
        let mut attachments = Vec::new();

        for profile in &snapshot.instance_profiles {
            profiles.push(InstanceProfile {
                instance_profile_name: profile.instance_profile_name.clone(),
                path: profile.path.clone(),
            });
            attachments.extend(profile.role_names.iter().map(|role| InstanceProfileRole {
                instance_profile_name: profile.instance_profile_name.clone(),
                role_name: role.clone(),
            }));
        }

        (profiles, attachments)
    }
}

fn excluded(filter: &NameFilter, kind: &str, name: &str) -> bool {
    if filter.excludes(name) {
        info!("filtering {}: {}", kind, name);
        return true;
    }
    false
}
