use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use serde::Serialize;

use crate::error::AppError;

/// Fixed action catalog. Names are dotted identifiers stored in the `permissions` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Permission {
    RecordCreate,
    RecordEdit,
    RecordDelete,
}

impl Permission {
    pub const ALL: [Permission; 3] = [
        Permission::RecordCreate,
        Permission::RecordEdit,
        Permission::RecordDelete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::RecordCreate => "record.create",
            Permission::RecordEdit => "record.edit",
            Permission::RecordDelete => "record.delete",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Permission::RecordCreate => "Register new subject records",
            Permission::RecordEdit => "Edit existing subject records",
            Permission::RecordDelete => "Delete subject records",
        }
    }

    pub fn catalog_names() -> Vec<String> {
        Self::ALL.iter().map(|p| p.as_str().to_string()).collect()
    }
}

impl FromStr for Permission {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| AppError::InvalidReference {
                field: "permission",
                value: s.to_string(),
                valid: Self::catalog_names(),
            })
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Administrator,
    Standard,
}

static STANDARD_BASELINE: Lazy<HashSet<Permission>> = Lazy::new(HashSet::new);

static ADMINISTRATOR_BASELINE: Lazy<HashSet<Permission>> =
    Lazy::new(|| Permission::ALL.iter().copied().collect());

impl Role {
    /// Permissions granted by the role itself, without override rows.
    pub fn baseline(&self) -> &'static HashSet<Permission> {
        match self {
            Role::Administrator => &ADMINISTRATOR_BASELINE,
            Role::Standard => &STANDARD_BASELINE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Administrator => "administrator",
            Role::Standard => "standard",
        }
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "administrator" => Ok(Role::Administrator),
            "standard" => Ok(Role::Standard),
            _ => Err(AppError::InvalidReference {
                field: "role",
                value: s.to_string(),
                valid: vec!["administrator".to_string(), "standard".to_string()],
            }),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The permission set actually enforced for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectivePermissions {
    All,
    Granted(BTreeSet<Permission>),
}

impl EffectivePermissions {
    pub fn contains(&self, permission: Permission) -> bool {
        match self {
            EffectivePermissions::All => true,
            EffectivePermissions::Granted(set) => set.contains(&permission),
        }
    }

    pub fn permissions(&self) -> Vec<Permission> {
        match self {
            EffectivePermissions::All => Permission::ALL.to_vec(),
            EffectivePermissions::Granted(set) => set.iter().copied().collect(),
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.permissions()
            .into_iter()
            .map(|p| p.as_str().to_string())
            .collect()
    }
}

/// Effective permissions for a role and its override grants.
///
/// Administrators short-circuit to every permission; everyone else gets the
/// role baseline united with the overrides.
pub fn resolve<I>(role: Role, overrides: I) -> EffectivePermissions
where
    I: IntoIterator<Item = Permission>,
{
    match role {
        Role::Administrator => EffectivePermissions::All,
        Role::Standard => {
            let mut set: BTreeSet<Permission> = role.baseline().iter().copied().collect();
            set.extend(overrides);
            EffectivePermissions::Granted(set)
        }
    }
}
