//! Account Translator
//!
//! Rewrites account ids captured in one account so the entities are valid
//! when replayed into another. Only identifier positions are touched:
//! the account segment of an ARN, a string that is exactly the account id,
//! and the same positions inside documents embedded as JSON text.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::IamSession;
use crate::types::{
    Group, InlinePolicy, InstanceProfile, InstanceProfileRole, Policy, Role, RoleInlinePolicy,
    RoleManagedPolicy,
};

/// The two accounts entities move between
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountPair {
    pub production: String,
    pub development: String,
}

impl AccountPair {
    /// Translation applied when exporting from `current`.
    ///
    /// Exports from any non-production account are rewritten toward
    /// production; exports from production toward development. `None` when
    /// the account to rewrite toward is not configured.
    pub fn export_translator(&self, current: &str) -> Option<AccountTranslator> {
        if current == self.production {
            AccountTranslator::between(&self.production, &self.development)
        } else {
            AccountTranslator::between(current, &self.production)
        }
    }

    /// Translation applied before converging `target`.
    pub fn import_translator(&self, target: &str) -> Option<AccountTranslator> {
        if target == self.production {
            AccountTranslator::between(&self.development, &self.production)
        } else {
            AccountTranslator::between(&self.production, target)
        }
    }
}

/// Rewrites `from` account ids to `to`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountTranslator {
    from: String,
    to: String,
}

impl AccountTranslator {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Translator between two known, distinct accounts
    pub fn between(from: &str, to: &str) -> Option<Self> {
        let translator = Self::new(from, to);
        (!translator.is_noop()).then_some(translator)
    }

    pub fn from_account(&self) -> &str {
        &self.from
    }

    pub fn to_account(&self) -> &str {
        &self.to
    }

    pub fn is_noop(&self) -> bool {
        self.from == self.to || self.from.is_empty() || self.to.is_empty()
    }

    pub fn reversed(&self) -> Self {
        Self::new(&self.to, &self.from)
    }

    pub fn translate_str(&self, text: &str) -> String {
        if self.is_noop() {
            return text.to_string();
        }
        if text == self.from {
            return self.to.clone();
        }
        if text.starts_with("arn:") {
            return self.translate_arn(text);
        }
        if let Some(embedded) = self.translate_embedded(text) {
            return embedded;
        }
        text.to_string()
    }

    /// `arn:partition:service:region:account:resource`
    fn translate_arn(&self, arn: &str) -> String {
        let parts: Vec<&str> = arn.splitn(6, ':').collect();
        if parts.len() == 6 && parts[4] == self.from {
            format!(
                "{}:{}:{}:{}:{}:{}",
                parts[0], parts[1], parts[2], parts[3], self.to, parts[5]
            )
        } else {
            arn.to_string()
        }
    }

    /// Rewrite a JSON document held as text, keeping its layout.
    fn translate_embedded(&self, text: &str) -> Option<String> {
        let trimmed = text.trim_start();
        if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
            return None;
        }
        serde_json::from_str::<Value>(text).ok()?;

        let rewritten = self.rewrite_literals(text);
        (rewritten != text).then_some(rewritten)
    }

    /// Replace string values of valid JSON text in place. Object keys and
    /// everything between literals are copied through untouched.
    fn rewrite_literals(&self, text: &str) -> String {
        let bytes = text.as_bytes();
        let mut out = String::with_capacity(text.len());
        let mut copied = 0;
        let mut i = 0;

        while i < bytes.len() {
            if bytes[i] != b'"' {
                i += 1;
                continue;
            }

            let start = i;
            i += 1;
            while i < bytes.len() && bytes[i] != b'"' {
                if bytes[i] == b'\\' {
                    i += 1;
                }
                i += 1;
            }
            let end = (i + 1).min(bytes.len());
            i = end;

            if text[end..].trim_start().starts_with(':') {
                continue;
            }
            let Ok(value) = serde_json::from_str::<String>(&text[start..end]) else {
                continue;
            };
            let translated = self.translate_str(&value);
            if translated == value {
                continue;
            }
            if let Ok(encoded) = serde_json::to_string(&translated) {
                out.push_str(&text[copied..start]);
                out.push_str(&encoded);
                copied = end;
            }
        }

        out.push_str(&text[copied..]);
        out
    }

    pub fn translate_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.translate_str(s)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.translate_value(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.translate_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    pub fn translate<T: Translate>(&self, item: &T) -> T {
        item.translate(self)
    }

    pub fn translate_all<T: Translate>(&self, items: &[T]) -> Vec<T> {
        items.iter().map(|i| i.translate(self)).collect()
    }

    pub fn translate_session(&self, session: &IamSession) -> IamSession {
        IamSession {
            policies: self.translate_all(&session.policies),
            roles: self.translate_all(&session.roles),
            role_managed_policies: self.translate_all(&session.role_managed_policies),
            role_inline_policies: self.translate_all(&session.role_inline_policies),
            groups: self.translate_all(&session.groups),
            instance_profiles: self.translate_all(&session.instance_profiles),
            instance_profile_roles: self.translate_all(&session.instance_profile_roles),
        }
    }
}

/// Entities whose account-bearing fields can be rewritten
pub trait Translate: Sized {
    fn translate(&self, translator: &AccountTranslator) -> Self;
}

impl Translate for Policy {
    fn translate(&self, t: &AccountTranslator) -> Self {
        Self {
            policy_document: t.translate_value(&self.policy_document),
            ..self.clone()
        }
    }
}

impl Translate for Role {
    fn translate(&self, t: &AccountTranslator) -> Self {
        Self {
            assume_role_policy_document: t.translate_value(&self.assume_role_policy_document),
            ..self.clone()
        }
    }
}

impl Translate for RoleManagedPolicy {
    fn translate(&self, t: &AccountTranslator) -> Self {
        Self {
            role_name: self.role_name.clone(),
            policy_arn: t.translate_str(&self.policy_arn),
        }
    }
}

impl Translate for RoleInlinePolicy {
    fn translate(&self, t: &AccountTranslator) -> Self {
        Self {
            policy_document: t.translate_value(&self.policy_document),
            ..self.clone()
        }
    }
}

impl Translate for InlinePolicy {
    fn translate(&self, t: &AccountTranslator) -> Self {
        Self {
            policy_name: self.policy_name.clone(),
            policy_document: t.translate_value(&self.policy_document),
        }
    }
}

impl Translate for Group {
    fn translate(&self, t: &AccountTranslator) -> Self {
        Self {
            group_name: self.group_name.clone(),
            path: self.path.clone(),
            managed_policy_arns: self
                .managed_policy_arns
                .iter()
                .map(|arn| t.translate_str(arn))
                .collect(),
            inline_policies: t.translate_all(&self.inline_policies),
        }
    }
}

impl Translate for InstanceProfile {
    fn translate(&self, _: &AccountTranslator) -> Self {
        self.clone()
    }
}

impl Translate for InstanceProfileRole {
    fn translate(&self, _: &AccountTranslator) -> Self {
        self.clone()
    }
}
