//! Name-based exclusion rules applied during extraction.

use serde::{Deserialize, Serialize};

/// Exclusion rules for one entity kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameFilter {
    /// Excluded when any keyword is a substring of the name
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Excluded when the name equals one of these exactly
    #[serde(default)]
    pub names: Vec<String>,
}

impl NameFilter {
    pub fn new<K, N>(keywords: K, names: N) -> Self
    where
        K: IntoIterator,
        K::Item: Into<String>,
        N: IntoIterator,
        N::Item: Into<String>,
    {
        Self {
            keywords: keywords.into_iter().map(Into::into).collect(),
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn excludes(&self, name: &str) -> bool {
        self.keywords.iter().any(|k| name.contains(k.as_str()))
            || self.names.iter().any(|n| n == name)
    }
}

/// Exclusion rules for every extracted kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityFilters {
    #[serde(default)]
    pub policies: NameFilter,
    #[serde(default)]
    pub roles: NameFilter,
    #[serde(default)]
    pub groups: NameFilter,
}

impl Default for EntityFilters {
    fn default() -> Self {
        Self {
            policies: NameFilter::new(
                ["-client-policy-"],
                [
                    "gion-test-policy",
                    "aplAllowAssumeRoleInProduction",
                    "aplDenyAssumeRoleInProduction",
                ],
            ),
            roles: NameFilter::default(),
            groups: NameFilter::new(
                Vec::<String>::new(),
                [
                    "aplSpeedTestGroup",
                    "aplAdminGroup",
                    "aplDenyProductionAccountAccess",
                    "aplProductionAccountAccess",
                ],
            ),
        }
    }
}
