//! Discovery events streamed to the consumer of a scan.

use serde::Serialize;

use crate::duplicates::DuplicateGroup;
use crate::scanner::Address;

/// Something the engine discovered.
///
/// Groups are snapshots taken when the event was emitted. Later events may
/// renumber groups, so consumers should key on `position` and treat the
/// latest event for a position as current.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MatcherEvent {
    /// A fingerprint gained its second member.
    NewGroup {
        /// The group, with its freshly assigned position
        group: DuplicateGroup,
    },
    /// An existing duplicate group gained another member.
    NewMatch {
        /// The group after the addition
        group: DuplicateGroup,
        /// The member that was added
        address: Address,
    },
    /// The run loop has exited. Emitted exactly once per engine.
    Finished,
}

impl MatcherEvent {
    /// The group carried by this event, if any.
    #[must_use]
    pub fn group(&self) -> Option<&DuplicateGroup> {
        match self {
            Self::NewGroup { group } | Self::NewMatch { group, .. } => Some(group),
            Self::Finished => None,
        }
    }
}
