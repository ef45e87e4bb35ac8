//! Operator declarations - each one owns a single subset of a namespace.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use cloudops_core::namespace::{NamespacePatch, NamespaceState, plan_accesses, plan_tags};
use cloudops_core::{MemoryApi, Mutator, NamespacePermission, Snapshot};
use serde::{Deserialize, Serialize};

pub type NamespaceApi = MemoryApi<NamespaceState, NamespacePatch>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Declaration {
    Tags {
        namespace: String,
        tags: HashMap<String, String>,
        /// Tag keys written by earlier runs; those no longer in `tags` are removed.
        #[serde(default)]
        owned: Vec<String>,
    },
    Accesses {
        namespace: String,
        accesses: HashMap<String, NamespacePermission>,
        /// Principals granted by earlier runs; those no longer in `accesses` are revoked.
        #[serde(default)]
        owned: Vec<String>,
    },
}

#[derive(Debug, Default, Deserialize)]
struct DeclarationFile {
    #[serde(default)]
    declarations: Vec<Declaration>,
}

impl Declaration {
    pub fn namespace(&self) -> &str {
        match self {
            Declaration::Tags { namespace, .. } | Declaration::Accesses { namespace, .. } => {
                namespace
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Declaration::Tags { namespace, tags, .. } => {
                format!("{} tags ({} entries)", namespace, tags.len())
            }
            Declaration::Accesses {
                namespace,
                accesses,
                ..
            } => format!("{} accesses ({} entries)", namespace, accesses.len()),
        }
    }

    /// Converge this declaration's subset of its namespace.
    pub async fn apply(
        &self,
        mutator: &Mutator,
        api: &NamespaceApi,
        timeout: Duration,
    ) -> cloudops_core::Result<Snapshot<NamespaceState>> {
        match self {
            Declaration::Tags {
                namespace,
                tags,
                owned,
            } => {
                mutator
                    .reconcile(
                        namespace,
                        api,
                        |current| plan_tags(current, tags, owned),
                        timeout,
                    )
                    .await
            }
            Declaration::Accesses {
                namespace,
                accesses,
                owned,
            } => {
                mutator
                    .reconcile(
                        namespace,
                        api,
                        |current| plan_accesses(current, accesses, owned),
                        timeout,
                    )
                    .await
            }
        }
    }
}

/// Read declarations from a JSON file.
pub async fn load(path: &Path) -> Result<Vec<Declaration>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse(&raw).with_context(|| format!("Invalid declarations in {}", path.display()))
}

fn parse(raw: &str) -> Result<Vec<Declaration>> {
    let file: DeclarationFile = serde_json::from_str(raw)?;
    Ok(file.declarations)
}
