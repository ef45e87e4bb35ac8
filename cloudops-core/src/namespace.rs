//! Namespace aggregate and the subsets independent declarations manage.
//!
//! Tags and accesses are owned by different declarations. Each planner
//! only looks at its own subset, so a patch for one never carries entries
//! of the other.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::access::NamespacePermission;
use crate::aggregate::ApplyPatch;
use crate::diff::diff_map;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceState {
    pub tags: HashMap<String, String>,
    /// Principal (user email or service account ID) to permission.
    pub accesses: HashMap<String, NamespacePermission>,
}

/// Upsert/remove request for one subset of a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "subset", rename_all = "snake_case")]
pub enum NamespacePatch {
    Tags {
        upsert: HashMap<String, String>,
        remove: Vec<String>,
    },
    Accesses {
        upsert: HashMap<String, NamespacePermission>,
        remove: Vec<String>,
    },
}

impl ApplyPatch<NamespaceState> for NamespacePatch {
    fn apply_to(self, state: &mut NamespaceState) {
        match self {
            NamespacePatch::Tags { upsert, remove } => {
                for key in remove {
                    state.tags.remove(&key);
                }
                state.tags.extend(upsert);
            }
            NamespacePatch::Accesses { upsert, remove } => {
                for principal in remove {
                    state.accesses.remove(&principal);
                }
                state.accesses.extend(upsert);
            }
        }
    }
}

/// Tags patch taking `current` to `desired`, or `None` if already there.
///
/// `desired` is the full set of tags this declaration owns; `owned` are the
/// keys it has previously written and may therefore remove. Keys outside
/// both are left alone.
pub fn plan_tags(
    current: &NamespaceState,
    desired: &HashMap<String, String>,
    owned: &[String],
) -> Option<NamespacePatch> {
    let existing = managed_slice(&current.tags, desired, owned);
    let diff = diff_map(&existing, desired);
    if diff.is_empty() {
        return None;
    }
    Some(NamespacePatch::Tags {
        upsert: diff.upserts(),
        remove: diff.removed_keys(),
    })
}

/// Accesses patch taking `current` to `desired`, or `None` if already there.
pub fn plan_accesses(
    current: &NamespaceState,
    desired: &HashMap<String, NamespacePermission>,
    owned: &[String],
) -> Option<NamespacePatch> {
    let existing = managed_slice(&current.accesses, desired, owned);
    let diff = diff_map(&existing, desired);
    if diff.is_empty() {
        return None;
    }
    Some(NamespacePatch::Accesses {
        upsert: diff.upserts(),
        remove: diff.removed_keys(),
    })
}

/// The part of `observed` this declaration is responsible for: keys it
/// declares now plus keys it declared before.
fn managed_slice<V: Clone>(
    observed: &HashMap<String, V>,
    desired: &HashMap<String, V>,
    owned: &[String],
) -> HashMap<String, V> {
    observed
        .iter()
        .filter(|(key, _)| desired.contains_key(*key) || owned.contains(*key))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
