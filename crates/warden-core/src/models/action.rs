//! Grant action bitmask.

use serde::{Deserialize, Serialize};

/// The set of actions a grant allows on its assets, stored as a bitmask.
///
/// Overlapping grants union their action sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionSet(u32);

impl ActionSet {
    pub const CONNECT: ActionSet = ActionSet(0b1);
    pub const UPLOAD_FILE: ActionSet = ActionSet(0b10);
    pub const DOWNLOAD_FILE: ActionSet = ActionSet(0b100);
    pub const COPY: ActionSet = ActionSet(0b1000);
    pub const PASTE: ActionSet = ActionSet(0b1_0000);
    pub const DELETE: ActionSet = ActionSet(0b10_0000);

    const ALL_NAMED: [(ActionSet, &'static str); 6] = [
        (Self::CONNECT, "connect"),
        (Self::UPLOAD_FILE, "upload_file"),
        (Self::DOWNLOAD_FILE, "download_file"),
        (Self::COPY, "copy"),
        (Self::PASTE, "paste"),
        (Self::DELETE, "delete"),
    ];

    pub const fn empty() -> ActionSet {
        ActionSet(0)
    }

    pub const fn from_bits(bits: u32) -> ActionSet {
        ActionSet(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: ActionSet) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: ActionSet) -> ActionSet {
        ActionSet(self.0 | other.0)
    }

    /// Parse a single action by name (as used in session-layer requests).
    pub fn from_name(name: &str) -> Option<ActionSet> {
        Self::ALL_NAMED
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(a, _)| *a)
    }

    /// Names of the actions present in this set.
    pub fn names(self) -> Vec<&'static str> {
        Self::ALL_NAMED
            .iter()
            .filter(|(a, _)| self.contains(*a))
            .map(|(_, n)| *n)
            .collect()
    }
}

impl std::ops::BitOr for ActionSet {
    type Output = ActionSet;

    fn bitor(self, rhs: ActionSet) -> ActionSet {
        self.union(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_and_contains() {
        let set = ActionSet::CONNECT | ActionSet::UPLOAD_FILE;
        assert!(set.contains(ActionSet::CONNECT));
        assert!(set.contains(ActionSet::UPLOAD_FILE));
        assert!(!set.contains(ActionSet::DELETE));
        assert_eq!(set.names(), vec!["connect", "upload_file"]);
    }

    #[test]
    fn name_round_trip() {
        assert_eq!(ActionSet::from_name("connect"), Some(ActionSet::CONNECT));
        assert_eq!(ActionSet::from_name("nope"), None);
    }
}
