//! IAM Reconciler
//!
//! Converges a live account onto the desired state held in an
//! [`IamSession`]. The desired state is always the source of truth; the
//! live snapshot is only consulted to decide what to call.
//!
//! How far a pass may go is set per entity kind by [`ReconcileStrategies`].
//! A failure on one entity is reported in its [`SyncResult`] and the pass
//! moves on to the next entity.

use std::collections::HashSet;
use std::future::Future;

use tracing::{error, info, warn};

use crate::config::{ReconcileStrategies, ReconcileStrategy};
use crate::error::{IamSyncError, Result};
use crate::provider::{ApiResult, IamApi};
use crate::session::IamSession;
use crate::snapshot::{capture, AccountSnapshot, GroupDetail, ManagedPolicyDetail};
use crate::types::{
    canonical_document, EntityKind, Group, InlinePolicy, InstanceProfile, Policy, Role,
    SyncAction, SyncResult,
};

/// Versions IAM retains per managed policy
pub const MAX_POLICY_VERSIONS: usize = 5;

pub struct Reconciler<'a, A: IamApi + ?Sized> {
    api: &'a A,
    live: Option<AccountSnapshot>,
    strategies: ReconcileStrategies,
    dry_run: bool,
}

impl<'a, A: IamApi + ?Sized> Reconciler<'a, A> {
    pub fn new(api: &'a A, strategies: ReconcileStrategies) -> Self {
        Self {
            api,
            live: None,
            strategies,
            dry_run: false,
        }
    }

    /// Use an already captured snapshot of the target account.
    pub fn with_live(mut self, live: AccountSnapshot) -> Self {
        self.live = Some(live);
        self
    }

    /// Log and report planned calls without making them.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Capture the target account again.
    pub async fn refresh(&mut self) -> Result<()> {
        self.live = Some(capture(self.api).await?);
        Ok(())
    }

    pub fn live(&self) -> Result<&AccountSnapshot> {
        self.live.as_ref().ok_or(IamSyncError::SnapshotNotLoaded)
    }

    /// Run one mutating call and turn its outcome into a result.
    ///
    /// In dry-run mode the call future is dropped unpolled.
    async fn apply<F>(&self, kind: EntityKind, name: String, action: SyncAction, call: F) -> SyncResult
    where
        F: Future<Output = ApiResult<()>>,
    {
        if self.dry_run {
            info!("DRY RUN - would mark {} {} as {}", kind, name, action);
            return SyncResult::ok(kind, name, action);
        }

        match call.await {
            Ok(()) => {
                info!("{} {}: {}", kind, name, action);
                SyncResult::ok(kind, name, action)
            }
            Err(e) if e.is_already_exists() => {
                info!("{} {} already exists, leaving it as is", kind, name);
                SyncResult::ok(kind, name, SyncAction::Unchanged)
            }
            Err(e) => {
                error!(kind = %kind, name = %name, error = %e, "IAM call failed");
                SyncResult::failed(kind, name, e)
            }
        }
    }

    fn unchanged(kind: EntityKind, name: impl Into<String>) -> SyncResult {
        SyncResult::ok(kind, name, SyncAction::Unchanged)
    }

    /// Converge every kind in dependency order.
    pub async fn reconcile_all(&self, session: &IamSession) -> Result<Vec<SyncResult>> {
        let mut results = Vec::new();
        for kind in [
            EntityKind::Policies,
            EntityKind::Roles,
            EntityKind::InstanceProfiles,
            EntityKind::InstanceProfileRoles,
            EntityKind::RoleInlinePolicies,
            EntityKind::RoleManagedPolicies,
            EntityKind::Groups,
        ] {
            results.extend(self.reconcile_kind(kind, session).await?);
        }
        Ok(results)
    }

    pub async fn reconcile_kind(
        &self,
        kind: EntityKind,
        session: &IamSession,
    ) -> Result<Vec<SyncResult>> {
        match kind {
            EntityKind::Policies => self.reconcile_policies(&session.policies).await,
            EntityKind::Roles => self.reconcile_roles(&session.roles).await,
            EntityKind::RoleManagedPolicies => self.reconcile_role_managed_policies(session).await,
            EntityKind::RoleInlinePolicies => self.reconcile_role_inline_policies(session).await,
            EntityKind::Groups => self.reconcile_groups(&session.groups).await,
            EntityKind::InstanceProfiles => {
                self.reconcile_instance_profiles(&session.instance_profiles).await
            }
            EntityKind::InstanceProfileRoles => self.reconcile_instance_profile_roles(session).await,
        }
    }

    // ============================================================
    // Policies
    // ============================================================

    pub async fn reconcile_policies(&self, desired: &[Policy]) -> Result<Vec<SyncResult>> {
        let live = self.live()?;
        let strategy = self.strategies.policies;
        let mut results = Vec::new();

        for policy in desired {
            let kind = EntityKind::Policies;
            let name = policy.policy_name.clone();

            let document = match canonical_document(&policy.policy_document) {
                Ok(document) => document,
                Err(e) => {
                    error!(policy = %name, error = %e, "Unreadable policy document");
                    results.push(SyncResult::failed(kind, name, e));
                    continue;
                }
            };

            let Some(existing) = live.policy(&policy.policy_name) else {
                let call = self.api.create_policy(
                    &policy.policy_name,
                    &policy.path,
                    &document,
                    policy.description.as_deref(),
                );
                results.push(self.apply(kind, name, SyncAction::Created, call).await);
                continue;
            };

            if existing.path != policy.path {
                warn!(
                    policy = %name,
                    live_path = %existing.path,
                    desired_path = %policy.path,
                    "Policy path differs; fixing it requires recreating the policy"
                );
            }

            if !strategy.updates() || default_document(existing).as_deref() == Some(document.as_str()) {
                results.push(Self::unchanged(kind, name));
                continue;
            }

            results.extend(self.push_policy_version(existing, &document).await);
        }

        Ok(results)
    }

    /// Make `document` the new default version, evicting the oldest
    /// non-default version first when the policy is at the version limit.
    async fn push_policy_version(
        &self,
        existing: &ManagedPolicyDetail,
        document: &str,
    ) -> Vec<SyncResult> {
        let kind = EntityKind::Policies;
        let mut results = Vec::new();

        if existing.policy_version_list.len() >= MAX_POLICY_VERSIONS {
            let Some(oldest) = existing.oldest_version() else {
                results.push(SyncResult::failed(
                    kind,
                    existing.policy_name.clone(),
                    "no deletable version to make room for a new one",
                ));
                return results;
            };

            let call = self.api.delete_policy_version(&existing.arn, &oldest.version_id);
            let name = format!("{}/{}", existing.policy_name, oldest.version_id);
            let evicted = self.apply(kind, name, SyncAction::Deleted, call).await;
            let failed = !evicted.success();
            results.push(evicted);
            if failed {
                return results;
            }
        }

        let call = self.api.create_policy_version(&existing.arn, document, true);
        results.push(
            self.apply(kind, existing.policy_name.clone(), SyncAction::Updated, call)
                .await,
        );
        results
    }

    // ============================================================
    // Roles
    // ============================================================

    pub async fn reconcile_roles(&self, desired: &[Role]) -> Result<Vec<SyncResult>> {
        let live = self.live()?;
        let strategy = self.strategies.roles;
        let mut results = Vec::new();

        for role in desired {
            let kind = EntityKind::Roles;
            let name = role.role_name.clone();

            let trust = match canonical_document(&role.assume_role_policy_document) {
                Ok(trust) => trust,
                Err(e) => {
                    error!(role = %name, error = %e, "Unreadable trust document");
                    results.push(SyncResult::failed(kind, name, e));
                    continue;
                }
            };

            let Some(existing) = live.role(&role.role_name) else {
                let call = self.api.create_role(&role.role_name, &role.path, &trust);
                results.push(self.apply(kind, name, SyncAction::Created, call).await);
                continue;
            };

            if existing.path != role.path {
                warn!(role = %name, "Role path differs; fixing it requires recreating the role");
            }

            let live_trust = canonical_document(&existing.assume_role_policy_document).ok();
            if strategy.updates() && live_trust.as_deref() != Some(trust.as_str()) {
                let call = self.api.update_assume_role_policy(&role.role_name, &trust);
                results.push(self.apply(kind, name, SyncAction::Updated, call).await);
            } else {
                results.push(Self::unchanged(kind, name));
            }
        }

        Ok(results)
    }

    /// Roles whose attachments the desired state speaks for
    fn owned_roles<'s>(session: &'s IamSession) -> Vec<&'s str> {
        let mut seen = HashSet::new();
        session
            .roles
            .iter()
            .map(|r| r.role_name.as_str())
            .chain(session.role_managed_policies.iter().map(|a| a.role_name.as_str()))
            .chain(session.role_inline_policies.iter().map(|p| p.role_name.as_str()))
            .filter(|name| seen.insert(*name))
            .collect()
    }

    pub async fn reconcile_role_managed_policies(
        &self,
        session: &IamSession,
    ) -> Result<Vec<SyncResult>> {
        let live = self.live()?;
        let strategy = self.strategies.roles;
        let kind = EntityKind::RoleManagedPolicies;
        let mut results = Vec::new();

        for attachment in &session.role_managed_policies {
            let name = format!("{} -> {}", attachment.role_name, attachment.policy_arn);
            let attached = live.role(&attachment.role_name).is_some_and(|r| {
                r.attached_managed_policies
                    .iter()
                    .any(|p| p.policy_arn == attachment.policy_arn)
            });

            if attached {
                results.push(Self::unchanged(kind, name));
                continue;
            }

            let call = self
                .api
                .attach_role_policy(&attachment.role_name, &attachment.policy_arn);
            results.push(self.apply(kind, name, SyncAction::Created, call).await);
        }

        if strategy.deletes() {
            for role_name in Self::owned_roles(session) {
                let Some(role) = live.role(role_name) else {
                    continue;
                };
                let wanted: HashSet<&str> = session.role_managed_arns(role_name).collect();

                for stale in role
                    .attached_managed_policies
                    .iter()
                    .filter(|p| !wanted.contains(p.policy_arn.as_str()))
                {
                    let name = format!("{} -> {}", role_name, stale.policy_arn);
                    let call = self.api.detach_role_policy(role_name, &stale.policy_arn);
                    results.push(self.apply(kind, name, SyncAction::Deleted, call).await);
                }
            }
        }

        Ok(results)
    }

    pub async fn reconcile_role_inline_policies(
        &self,
        session: &IamSession,
    ) -> Result<Vec<SyncResult>> {
        let live = self.live()?;
        let strategy = self.strategies.roles;
        let kind = EntityKind::RoleInlinePolicies;
        let mut results = Vec::new();

        for policy in &session.role_inline_policies {
            let name = format!("{}/{}", policy.role_name, policy.policy_name);

            let document = match canonical_document(&policy.policy_document) {
                Ok(document) => document,
                Err(e) => {
                    results.push(SyncResult::failed(kind, name, e));
                    continue;
                }
            };

            let current = live.role(&policy.role_name).and_then(|r| {
                r.role_policy_list
                    .iter()
                    .find(|p| p.policy_name == policy.policy_name)
            });

            let action = match current {
                None => SyncAction::Created,
                Some(current) => {
                    let same = canonical_document(&current.policy_document).ok().as_deref()
                        == Some(document.as_str());
                    if same || !strategy.updates() {
                        results.push(Self::unchanged(kind, name));
                        continue;
                    }
                    SyncAction::Updated
                }
            };

            let call = self
                .api
                .put_role_policy(&policy.role_name, &policy.policy_name, &document);
            results.push(self.apply(kind, name, action, call).await);
        }

        if strategy.deletes() {
            for role_name in Self::owned_roles(session) {
                let Some(role) = live.role(role_name) else {
                    continue;
                };
                let wanted: HashSet<&str> = session
                    .role_inline(role_name)
                    .map(|p| p.policy_name.as_str())
                    .collect();

                for stale in role
                    .role_policy_list
                    .iter()
                    .filter(|p| !wanted.contains(p.policy_name.as_str()))
                {
                    let name = format!("{}/{}", role_name, stale.policy_name);
                    let call = self.api.delete_role_policy(role_name, &stale.policy_name);
                    results.push(self.apply(kind, name, SyncAction::Deleted, call).await);
                }
            }
        }

        Ok(results)
    }

    // ============================================================
    // Instance profiles
    // ============================================================

    pub async fn reconcile_instance_profiles(
        &self,
        desired: &[InstanceProfile],
    ) -> Result<Vec<SyncResult>> {
        let live = self.live()?;
        let kind = EntityKind::InstanceProfiles;
        let mut results = Vec::new();

        for profile in desired {
            let name = profile.instance_profile_name.clone();
            if live.instance_profile(&name).is_some() {
                results.push(Self::unchanged(kind, name));
                continue;
            }

            let call = self
                .api
                .create_instance_profile(&profile.instance_profile_name, &profile.path);
            results.push(self.apply(kind, name, SyncAction::Created, call).await);
        }

        Ok(results)
    }

    pub async fn reconcile_instance_profile_roles(
        &self,
        session: &IamSession,
    ) -> Result<Vec<SyncResult>> {
        let live = self.live()?;
        let strategy = self.strategies.instance_profiles;
        let kind = EntityKind::InstanceProfileRoles;
        let mut results = Vec::new();

        for attachment in &session.instance_profile_roles {
            let name = format!("{} <- {}", attachment.instance_profile_name, attachment.role_name);
            let present = live
                .instance_profile(&attachment.instance_profile_name)
                .is_some_and(|p| p.role_names.contains(&attachment.role_name));

            if present {
                results.push(Self::unchanged(kind, name));
                continue;
            }

            let call = self
                .api
                .add_role_to_instance_profile(&attachment.instance_profile_name, &attachment.role_name);
            results.push(self.apply(kind, name, SyncAction::Created, call).await);
        }

        if strategy.deletes() {
            for profile in &session.instance_profiles {
                let Some(current) = live.instance_profile(&profile.instance_profile_name) else {
                    continue;
                };
                let wanted: HashSet<&str> =
                    session.profile_roles(&profile.instance_profile_name).collect();

                for stale in current.role_names.iter().filter(|r| !wanted.contains(r.as_str())) {
                    let name = format!("{} <- {}", profile.instance_profile_name, stale);
                    let call = self
                        .api
                        .remove_role_from_instance_profile(&profile.instance_profile_name, stale);
                    results.push(self.apply(kind, name, SyncAction::Deleted, call).await);
                }
            }
        }

        Ok(results)
    }

    // ============================================================
    // Groups
    // ============================================================

    pub async fn reconcile_groups(&self, desired: &[Group]) -> Result<Vec<SyncResult>> {
        let live = self.live()?;
        let strategy = self.strategies.groups;
        let mut results = Vec::new();

        for group in desired {
            match live.group(&group.group_name) {
                None => results.extend(self.build_group(group).await),
                Some(existing) => {
                    if existing.path != group.path {
                        warn!(
                            group = %group.group_name,
                            "Group path differs; fixing it requires recreating the group"
                        );
                    }
                    if strategy == ReconcileStrategy::CreateOnly {
                        results.push(Self::unchanged(EntityKind::Groups, &group.group_name));
                        continue;
                    }
                    results.extend(self.converge_group(group, existing, strategy).await);
                }
            }
        }

        Ok(results)
    }

    /// Create a group with all of its inline policies and attachments.
    async fn build_group(&self, group: &Group) -> Vec<SyncResult> {
        let kind = EntityKind::Groups;
        let mut results = Vec::new();

        let call = self.api.create_group(&group.group_name, &group.path);
        let created = self
            .apply(kind, group.group_name.clone(), SyncAction::Created, call)
            .await;
        let failed = !created.success();
        results.push(created);
        if failed {
            return results;
        }

        for policy in &group.inline_policies {
            results.push(self.put_group_inline(group, policy, SyncAction::Created).await);
        }
        for arn in &group.managed_policy_arns {
            let name = format!("{} -> {}", group.group_name, arn);
            let call = self.api.attach_group_policy(&group.group_name, arn);
            results.push(self.apply(kind, name, SyncAction::Created, call).await);
        }

        results
    }

    async fn put_group_inline(
        &self,
        group: &Group,
        policy: &InlinePolicy,
        action: SyncAction,
    ) -> SyncResult {
        let kind = EntityKind::Groups;
        let name = format!("{}/{}", group.group_name, policy.policy_name);

        match canonical_document(&policy.policy_document) {
            Ok(document) => {
                let call = self
                    .api
                    .put_group_policy(&group.group_name, &policy.policy_name, &document);
                self.apply(kind, name, action, call).await
            }
            Err(e) => SyncResult::failed(kind, name, e),
        }
    }

    /// Reconcile the inline policies and attachments of an existing group.
    async fn converge_group(
        &self,
        group: &Group,
        existing: &GroupDetail,
        strategy: ReconcileStrategy,
    ) -> Vec<SyncResult> {
        let kind = EntityKind::Groups;
        let mut results = Vec::new();

        for policy in &group.inline_policies {
            let current = existing
                .group_policy_list
                .iter()
                .find(|p| p.policy_name == policy.policy_name);

            let action = match current {
                None => SyncAction::Created,
                Some(current) => {
                    let live_text = canonical_document(&current.policy_document).ok();
                    let desired_text = canonical_document(&policy.policy_document).ok();
                    if live_text.is_some() && live_text == desired_text {
                        continue;
                    }
                    SyncAction::Updated
                }
            };
            results.push(self.put_group_inline(group, policy, action).await);
        }

        if strategy.deletes() {
            let wanted: HashSet<&str> = group
                .inline_policies
                .iter()
                .map(|p| p.policy_name.as_str())
                .collect();
            for stale in existing
                .group_policy_list
                .iter()
                .filter(|p| !wanted.contains(p.policy_name.as_str()))
            {
                let name = format!("{}/{}", group.group_name, stale.policy_name);
                let call = self
                    .api
                    .delete_group_policy(&group.group_name, &stale.policy_name);
                results.push(self.apply(kind, name, SyncAction::Deleted, call).await);
            }
        }

        let attached: HashSet<&str> = existing
            .attached_managed_policies
            .iter()
            .map(|p| p.policy_arn.as_str())
            .collect();
        for arn in group
            .managed_policy_arns
            .iter()
            .filter(|arn| !attached.contains(arn.as_str()))
        {
            let name = format!("{} -> {}", group.group_name, arn);
            let call = self.api.attach_group_policy(&group.group_name, arn);
            results.push(self.apply(kind, name, SyncAction::Created, call).await);
        }

        if strategy.deletes() {
            let wanted: HashSet<&str> = group.managed_policy_arns.iter().map(String::as_str).collect();
            for stale in existing
                .attached_managed_policies
                .iter()
                .filter(|p| !wanted.contains(p.policy_arn.as_str()))
            {
                let name = format!("{} -> {}", group.group_name, stale.policy_arn);
                let call = self.api.detach_group_policy(&group.group_name, &stale.policy_arn);
                results.push(self.apply(kind, name, SyncAction::Deleted, call).await);
            }
        }

        if results.is_empty() {
            results.push(Self::unchanged(kind, &group.group_name));
        }
        results
    }
}

/// Canonical text of the live default version, if it has one
fn default_document(policy: &ManagedPolicyDetail) -> Option<String> {
    policy
        .default_version()
        .and_then(|v| canonical_document(&v.document).ok())
}

/// Delete every customer managed policy in the account behind `api`.
///
/// `confirm` is asked once before anything is touched; any answer other
/// than yes aborts. Non-default versions are removed before each policy.
pub async fn delete_all_policies<A, F>(api: &A, confirm: F) -> Result<Vec<SyncResult>>
where
    A: IamApi + ?Sized,
    F: FnOnce(&str) -> std::io::Result<bool>,
{
    let account = api.account_id().await?;
    let question = format!(
        "Delete EVERY customer managed policy in account {}? This cannot be undone.",
        account
    );
    let confirmed = confirm(&question).map_err(|source| IamSyncError::Io {
        path: "<stdin>".into(),
        source,
    })?;
    if !confirmed {
        return Err(IamSyncError::Aborted(format!(
            "policy deletion in account {} was not confirmed",
            account
        )));
    }

    let snapshot = capture(api).await?;
    let kind = EntityKind::Policies;
    let mut results = Vec::new();

    warn!(account = %account, count = snapshot.policies.len(), "Deleting all customer managed policies");

    'policies: for policy in &snapshot.policies {
        for version in policy.policy_version_list.iter().filter(|v| !v.is_default_version) {
            if let Err(e) = api.delete_policy_version(&policy.arn, &version.version_id).await {
                error!(policy = %policy.policy_name, version = %version.version_id, error = %e, "Failed to delete policy version");
                results.push(SyncResult::failed(kind, policy.policy_name.clone(), e));
                continue 'policies;
            }
        }

        match api.delete_policy(&policy.arn).await {
            Ok(()) => {
                info!(policy = %policy.policy_name, "Deleted policy");
                results.push(SyncResult::ok(kind, policy.policy_name.clone(), SyncAction::Deleted));
            }
            Err(e) => {
                error!(policy = %policy.policy_name, error = %e, "Failed to delete policy");
                results.push(SyncResult::failed(kind, policy.policy_name.clone(), e));
            }
        }
    }

    Ok(results)
}
