use std::ops::Deref;

use crate::{AccessError, EntityKind};

/// Ordered node ids referenced by a way. Ids may repeat, e.g. closed ways
/// start and end on the same node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeRefs {
    ids: Vec<i64>,
}

impl NodeRefs {
    pub(crate) fn from_ids(ids: Vec<i64>) -> Self {
        Self { ids }
    }

    /// Node id at `index`, or a range error outside `[0, len)`.
    #[inline]
    pub fn get(&self, index: usize) -> Result<i64, AccessError> {
        self.ids
            .get(index)
            .copied()
            .ok_or(AccessError::OutOfRange {
                index: i64::try_from(index).unwrap_or(i64::MAX),
                len: self.ids.len(),
            })
    }

    #[inline]
    pub fn as_slice(&self) -> &[i64] {
        &self.ids
    }

    /// True if the way starts and ends on the same node.
    pub fn is_closed(&self) -> bool {
        self.ids.len() > 1 && self.ids.first() == self.ids.last()
    }
}

impl Deref for NodeRefs {
    type Target = [i64];

    fn deref(&self) -> &[i64] {
        &self.ids
    }
}

/// A member of a relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    kind: EntityKind,
    id: i64,
    role: String,
}

impl Member {
    pub fn new(kind: EntityKind, id: i64, role: impl Into<String>) -> Self {
        Self {
            kind,
            id,
            role: role.into(),
        }
    }

    /// Kind of the referenced entity.
    #[inline]
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    #[inline]
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Role; empty when the member has none.
    #[inline]
    pub fn role(&self) -> &str {
        &self.role
    }
}

/// Ordered members of a relation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Members {
    members: Vec<Member>,
}

impl Members {
    pub(crate) fn from_members(members: Vec<Member>) -> Self {
        Self { members }
    }

    #[inline]
    pub fn get(&self, index: usize) -> Result<&Member, AccessError> {
        self.members.get(index).ok_or(AccessError::OutOfRange {
            index: i64::try_from(index).unwrap_or(i64::MAX),
            len: self.members.len(),
        })
    }

    #[inline]
    pub fn as_slice(&self) -> &[Member] {
        &self.members
    }
}

impl Deref for Members {
    type Target = [Member];

    fn deref(&self) -> &[Member] {
        &self.members
    }
}
