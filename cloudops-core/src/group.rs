//! User group aggregate - membership is reconciled as a set.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::aggregate::ApplyPatch;
use crate::diff::diff_set;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupState {
    pub display_name: String,
    /// User IDs.
    pub members: HashSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipPatch {
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

impl ApplyPatch<GroupState> for MembershipPatch {
    fn apply_to(self, state: &mut GroupState) {
        for user in &self.remove {
            state.members.remove(user);
        }
        state.members.extend(self.add);
    }
}

/// Membership changes taking `current` to `desired`, sorted for stable
/// request bodies, or `None` if already there.
pub fn plan_members(current: &GroupState, desired: &HashSet<String>) -> Option<MembershipPatch> {
    let diff = diff_set(&current.members, desired);
    if diff.is_empty() {
        return None;
    }

    let mut add: Vec<String> = diff.added.into_iter().collect();
    let mut remove: Vec<String> = diff.removed.into_iter().collect();
    add.sort();
    remove.sort();
    Some(MembershipPatch { add, remove })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_plan_members() {
        let current = GroupState {
            display_name: "oncall".to_string(),
            members: users(&["u1", "u2"]),
        };

        let patch = plan_members(&current, &users(&["u2", "u3"])).unwrap();
        assert_eq!(patch.add, vec!["u3".to_string()]);
        assert_eq!(patch.remove, vec!["u1".to_string()]);

        let mut next = current.clone();
        patch.apply_to(&mut next);
        assert_eq!(next.members, users(&["u2", "u3"]));
        assert_eq!(plan_members(&next, &users(&["u2", "u3"])), None);
    }
}
