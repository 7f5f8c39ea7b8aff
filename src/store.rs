//! State File Store
//!
//! One human-readable JSON file per entity kind. These files are the
//! interchange format between accounts and between runs.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use tracing::{debug, info, warn};

use crate::error::{IamSyncError, Result};
use crate::session::IamSession;
use crate::types::EntityKind;

pub struct StateStore {
    dir: PathBuf,
    sort_keys: bool,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>, sort_keys: bool) -> Self {
        Self {
            dir: dir.into(),
            sort_keys,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_name(kind: EntityKind) -> &'static str {
        match kind {
            EntityKind::Policies => "policies.json",
            EntityKind::Roles => "roles.json",
            EntityKind::RoleManagedPolicies => "role_managed_policies.json",
            EntityKind::RoleInlinePolicies => "role_inline_policies.json",
            EntityKind::Groups => "groups.json",
            EntityKind::InstanceProfiles => "instance_profiles.json",
            EntityKind::InstanceProfileRoles => "instance_profile_roles.json",
        }
    }

    pub fn path(&self, kind: EntityKind) -> PathBuf {
        self.dir.join(Self::file_name(kind))
    }

    pub fn exists(&self, kind: EntityKind) -> bool {
        self.path(kind).is_file()
    }

    /// Write one collection, replacing any previous file.
    pub fn save<T: Serialize>(&self, kind: EntityKind, items: &[T]) -> Result<()> {
        let path = self.path(kind);
        fs::create_dir_all(&self.dir).map_err(|source| IamSyncError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let text = self.render(items).map_err(|e| IamSyncError::json(kind.to_string(), e))?;
        fs::write(&path, text).map_err(|source| IamSyncError::Io {
            path: path.clone(),
            source,
        })?;

        debug!(path = ?path, count = items.len(), "Saved {} file", kind);
        Ok(())
    }

    fn render<T: Serialize>(&self, items: &[T]) -> serde_json::Result<String> {
        let mut out = Vec::new();
        let mut serializer =
            serde_json::Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(b"    "));

        if self.sort_keys {
            // Map keys of a `Value` are kept in sorted order
            serde_json::to_value(items)?.serialize(&mut serializer)?;
        } else {
            items.serialize(&mut serializer)?;
        }
        out.push(b'\n');

        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    /// Read one collection.
    pub fn load<T: DeserializeOwned>(&self, kind: EntityKind) -> Result<Vec<T>> {
        let path = self.path(kind);
        let text = fs::read_to_string(&path).map_err(|source| IamSyncError::Io {
            path: path.clone(),
            source,
        })?;

        serde_json::from_str(&text)
            .map_err(|e| IamSyncError::json(format!("{}", path.display()), e))
    }

    /// Read a collection if its file exists, otherwise an empty one.
    pub fn load_or_empty<T: DeserializeOwned>(&self, kind: EntityKind) -> Result<Vec<T>> {
        if self.exists(kind) {
            self.load(kind)
        } else {
            warn!(path = ?self.path(kind), "No {} file, leaving collection empty", kind);
            Ok(Vec::new())
        }
    }

    pub fn save_session(&self, session: &IamSession) -> Result<()> {
        self.save(EntityKind::Policies, &session.policies)?;
        self.save(EntityKind::Roles, &session.roles)?;
        self.save(EntityKind::RoleManagedPolicies, &session.role_managed_policies)?;
        self.save(EntityKind::RoleInlinePolicies, &session.role_inline_policies)?;
        self.save(EntityKind::Groups, &session.groups)?;
        self.save(EntityKind::InstanceProfiles, &session.instance_profiles)?;
        self.save(EntityKind::InstanceProfileRoles, &session.instance_profile_roles)?;

        info!(dir = ?self.dir, "Saved IAM state files");
        Ok(())
    }

    /// Load whichever state files are present.
    pub fn load_session(&self) -> Result<IamSession> {
        let session = IamSession {
            policies: self.load_or_empty(EntityKind::Policies)?,
            roles: self.load_or_empty(EntityKind::Roles)?,
            role_managed_policies: self.load_or_empty(EntityKind::RoleManagedPolicies)?,
            role_inline_policies: self.load_or_empty(EntityKind::RoleInlinePolicies)?,
            groups: self.load_or_empty(EntityKind::Groups)?,
            instance_profiles: self.load_or_empty(EntityKind::InstanceProfiles)?,
            instance_profile_roles: self.load_or_empty(EntityKind::InstanceProfileRoles)?,
        };

        info!(dir = ?self.dir, "Loaded IAM state files");
        Ok(session)
    }
}
