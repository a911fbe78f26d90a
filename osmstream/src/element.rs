use std::fmt;

use crate::{AccessError, Members, NodeRefs, Tags, Timestamp};

/// The three OSM entity kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Node,
    Way,
    Relation,
}

impl EntityKind {
    /// Lowercase name as used in OSM XML (`node`, `way`, `relation`).
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Node => "node",
            EntityKind::Way => "way",
            EntityKind::Relation => "relation",
        }
    }

    pub(crate) fn from_name(name: &[u8]) -> Option<Self> {
        match name {
            b"node" => Some(EntityKind::Node),
            b"way" => Some(EntityKind::Way),
            b"relation" => Some(EntityKind::Relation),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata shared by all entity kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Info {
    pub(crate) id: i64,
    pub(crate) version: u32,
    pub(crate) visible: bool,
    pub(crate) changeset: i64,
    pub(crate) timestamp: i64,
    pub(crate) user: String,
    pub(crate) uid: i64,
}

impl Info {
    #[inline]
    pub fn id(&self) -> i64 {
        self.id
    }
    /// Always >= 1.
    #[inline]
    pub fn version(&self) -> u32 {
        self.version
    }
    /// False for deleted entities.
    #[inline]
    pub fn visible(&self) -> bool {
        self.visible
    }
    #[inline]
    pub fn changeset(&self) -> i64 {
        self.changeset
    }
    #[inline]
    pub fn timestamp_seconds_since_epoch(&self) -> i64 {
        self.timestamp
    }
    /// Calendar instant of the edit, computed on each call.
    #[inline]
    pub fn timestamp(&self) -> Timestamp {
        Timestamp::from_epoch_seconds(self.timestamp)
    }
    /// Display name of the editing account. Empty if anonymized.
    #[inline]
    pub fn user(&self) -> &str {
        &self.user
    }
    #[inline]
    pub fn uid(&self) -> i64 {
        self.uid
    }
}

/// Accessors common to every entity.
pub trait OsmObject {
    fn kind(&self) -> EntityKind;
    fn info(&self) -> &Info;
    fn tags(&self) -> &Tags;

    fn id(&self) -> i64 {
        self.info().id()
    }
    fn version(&self) -> u32 {
        self.info().version()
    }
    fn visible(&self) -> bool {
        self.info().visible()
    }
    fn changeset(&self) -> i64 {
        self.info().changeset()
    }
    fn timestamp_seconds_since_epoch(&self) -> i64 {
        self.info().timestamp_seconds_since_epoch()
    }
    fn timestamp(&self) -> Timestamp {
        self.info().timestamp()
    }
    fn user(&self) -> &str {
        self.info().user()
    }
    fn uid(&self) -> i64 {
        self.info().uid()
    }
}

fn deleted(object: &impl OsmObject, field: &'static str) -> AccessError {
    AccessError::Deleted {
        kind: object.kind(),
        id: object.id(),
        field,
    }
}

/// WGS84 coordinates in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub lon: f64,
    pub lat: f64,
}

// --------------------------- NODE ---------------------------

/// A point. Deleted nodes may carry no location.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub(crate) info: Info,
    pub(crate) tags: Tags,
    pub(crate) location: Option<Location>,
}

impl Node {
    #[inline]
    pub fn location(&self) -> Option<Location> {
        self.location
    }
    /// Longitude, or [`AccessError::Deleted`] for a node without location.
    #[inline]
    pub fn lon(&self) -> Result<f64, AccessError> {
        self.location
            .map(|l| l.lon)
            .ok_or_else(|| deleted(self, "lon"))
    }
    /// Latitude, or [`AccessError::Deleted`] for a node without location.
    #[inline]
    pub fn lat(&self) -> Result<f64, AccessError> {
        self.location
            .map(|l| l.lat)
            .ok_or_else(|| deleted(self, "lat"))
    }
}

impl OsmObject for Node {
    fn kind(&self) -> EntityKind {
        EntityKind::Node
    }
    fn info(&self) -> &Info {
        &self.info
    }
    fn tags(&self) -> &Tags {
        &self.tags
    }
}

// --------------------------- WAY ---------------------------

/// An ordered list of node references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Way {
    pub(crate) info: Info,
    pub(crate) tags: Tags,
    pub(crate) nodes: NodeRefs,
}

impl Way {
    #[inline]
    pub fn nodes_count(&self) -> usize {
        self.nodes.len()
    }
    /// Node references. A deleted way without references yields
    /// [`AccessError::Deleted`].
    #[inline]
    pub fn nodes(&self) -> Result<&NodeRefs, AccessError> {
        if !self.info.visible && self.nodes.is_empty() {
            return Err(deleted(self, "nodes"));
        }
        Ok(&self.nodes)
    }
    /// Node id at `index`.
    #[inline]
    pub fn node(&self, index: usize) -> Result<i64, AccessError> {
        self.nodes()?.get(index)
    }
}

impl OsmObject for Way {
    fn kind(&self) -> EntityKind {
        EntityKind::Way
    }
    fn info(&self) -> &Info {
        &self.info
    }
    fn tags(&self) -> &Tags {
        &self.tags
    }
}

// --------------------------- RELATION ---------------------------

/// An ordered list of typed members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub(crate) info: Info,
    pub(crate) tags: Tags,
    pub(crate) members: Members,
}

impl Relation {
    /// Members. A deleted relation without members yields
    /// [`AccessError::Deleted`].
    #[inline]
    pub fn members(&self) -> Result<&Members, AccessError> {
        if !self.info.visible && self.members.is_empty() {
            return Err(deleted(self, "members"));
        }
        Ok(&self.members)
    }
}

impl OsmObject for Relation {
    fn kind(&self) -> EntityKind {
        EntityKind::Relation
    }
    fn info(&self) -> &Info {
        &self.info
    }
    fn tags(&self) -> &Tags {
        &self.tags
    }
}

// --------------------------- ENTITY ---------------------------

/// One decoded OSM entity.
///
/// For more details on OSM elements, see the [OSM wiki](https://wiki.openstreetmap.org/wiki/Elements).
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Node(Node),
    Way(Way),
    Relation(Relation),
}

impl Entity {
    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Entity::Node(node) => Some(node),
            _ => None,
        }
    }

    pub fn as_way(&self) -> Option<&Way> {
        match self {
            Entity::Way(way) => Some(way),
            _ => None,
        }
    }

    pub fn as_relation(&self) -> Option<&Relation> {
        match self {
            Entity::Relation(relation) => Some(relation),
            _ => None,
        }
    }
}

impl OsmObject for Entity {
    fn kind(&self) -> EntityKind {
        match self {
            Entity::Node(_) => EntityKind::Node,
            Entity::Way(_) => EntityKind::Way,
            Entity::Relation(_) => EntityKind::Relation,
        }
    }
    fn info(&self) -> &Info {
        match self {
            Entity::Node(node) => &node.info,
            Entity::Way(way) => &way.info,
            Entity::Relation(relation) => &relation.info,
        }
    }
    fn tags(&self) -> &Tags {
        match self {
            Entity::Node(node) => &node.tags,
            Entity::Way(way) => &way.tags,
            Entity::Relation(relation) => &relation.tags,
        }
    }
}
