use std::collections::HashSet;

use crate::presence::PresenceRecord;

/// Events from the world's presence set.
///
/// `Snapshot` is authoritative. `Joined` and `Left` are incremental hints applied on
/// top of the last known set until the next snapshot arrives.
#[derive(Clone, Debug)]
pub enum MembershipEvent {
    Joined {
        agent_id: String,
        presence: Option<PresenceRecord>,
    },
    Left {
        agent_id: String,
    },
    Snapshot {
        members: HashSet<String>,
    },
}

/// The last membership set observed by a mesh manager.
#[derive(Clone, Debug, Default)]
pub struct MembershipView {
    members: HashSet<String>,
}

impl MembershipView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn members(&self) -> &HashSet<String> {
        &self.members
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.members.contains(agent_id)
    }

    /// Returns the member set that results from applying `event` to this view.
    pub fn next(&self, event: &MembershipEvent) -> HashSet<String> {
        match event {
            MembershipEvent::Joined { agent_id, .. } => {
                let mut members = self.members.clone();
                members.insert(agent_id.clone());
                members
            }
            MembershipEvent::Left { agent_id } => {
                let mut members = self.members.clone();
                members.remove(agent_id);
                members
            }
            MembershipEvent::Snapshot { members } => members.clone(),
        }
    }

    pub fn replace(&mut self, members: HashSet<String>) {
        self.members = members;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn set(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn test_incremental_events() {
        let mut view = MembershipView::new();
        let next = view.next(&MembershipEvent::Joined {
            agent_id: "b".to_string(),
            presence: None,
        });
        view.replace(next);
        let next = view.next(&MembershipEvent::Joined {
            agent_id: "c".to_string(),
            presence: None,
        });
        view.replace(next);
        assert_eq!(view.members(), &set(&["b", "c"]));

        let next = view.next(&MembershipEvent::Left {
            agent_id: "b".to_string(),
        });
        view.replace(next);
        assert_eq!(view.members(), &set(&["c"]));
        assert!(!view.contains("b"));
    }

    #[test]
    fn test_snapshot_is_authoritative() {
        let mut view = MembershipView::new();
        view.replace(set(&["b", "c"]));
        let next = view.next(&MembershipEvent::Snapshot {
            members: set(&["d"]),
        });
        assert_eq!(next, set(&["d"]));
    }

    #[test]
    fn test_duplicate_join_is_a_no_op() {
        let mut view = MembershipView::new();
        view.replace(set(&["b"]));
        let next = view.next(&MembershipEvent::Joined {
            agent_id: "b".to_string(),
            presence: None,
        });
        assert_eq!(next, set(&["b"]));
    }
}
