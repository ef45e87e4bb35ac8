//! Permission and role values.
//!
//! Declarations may spell these in any case; they compare, render and
//! serialize in canonical lower case.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseAccessError {
    kind: &'static str,
    value: String,
}

/// Access level granted on a single namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NamespacePermission {
    Admin,
    Write,
    Read,
}

impl NamespacePermission {
    pub fn as_str(self) -> &'static str {
        match self {
            NamespacePermission::Admin => "admin",
            NamespacePermission::Write => "write",
            NamespacePermission::Read => "read",
        }
    }
}

impl FromStr for NamespacePermission {
    type Err = ParseAccessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(NamespacePermission::Admin),
            "write" => Ok(NamespacePermission::Write),
            "read" => Ok(NamespacePermission::Read),
            _ => Err(ParseAccessError {
                kind: "namespace permission",
                value: s.to_string(),
            }),
        }
    }
}

/// Account-wide role of a user or service account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AccountRole {
    Owner,
    Admin,
    Developer,
    Read,
    FinanceAdmin,
    None,
}

impl AccountRole {
    pub fn as_str(self) -> &'static str {
        match self {
            AccountRole::Owner => "owner",
            AccountRole::Admin => "admin",
            AccountRole::Developer => "developer",
            AccountRole::Read => "read",
            AccountRole::FinanceAdmin => "finance_admin",
            AccountRole::None => "none",
        }
    }
}

impl FromStr for AccountRole {
    type Err = ParseAccessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "owner" => Ok(AccountRole::Owner),
            "admin" => Ok(AccountRole::Admin),
            "developer" => Ok(AccountRole::Developer),
            "read" => Ok(AccountRole::Read),
            "finance_admin" => Ok(AccountRole::FinanceAdmin),
            "none" => Ok(AccountRole::None),
            _ => Err(ParseAccessError {
                kind: "account role",
                value: s.to_string(),
            }),
        }
    }
}

macro_rules! canonical_string_impls {
    ($ty:ty) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

canonical_string_impls!(NamespacePermission);
canonical_string_impls!(AccountRole);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_parse_ignores_case() {
        assert_eq!(
            "Admin".parse::<NamespacePermission>().unwrap(),
            NamespacePermission::Admin
        );
        assert_eq!(
            "WRITE".parse::<NamespacePermission>().unwrap(),
            "write".parse::<NamespacePermission>().unwrap()
        );
    }

    #[test]
    fn test_role_renders_canonical() {
        let role: AccountRole = "Finance_Admin".parse().unwrap();
        assert_eq!(role, AccountRole::FinanceAdmin);
        assert_eq!(role.to_string(), "finance_admin");
    }

    #[test]
    fn test_unknown_value_rejected() {
        let err = "superuser".parse::<AccountRole>().unwrap_err();
        assert_eq!(err.to_string(), "unknown account role 'superuser'");
    }

    #[test]
    fn test_serde_canonical_on_write() {
        let perm: NamespacePermission = serde_json::from_str("\"Read\"").unwrap();
        assert_eq!(serde_json::to_string(&perm).unwrap(), "\"read\"");
    }
}
