use log::debug;

use crate::{Entity, EntityKind, Node, Relation, Way};

/// Selects which entity kinds a stream materializes.
///
/// Decoders consult the filter before building a record, so disabling a kind
/// also skips the work of decoding its tags and references. Prefer this over
/// filtering entities yourself after the fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementFilter {
    /// Whether [`Node`]s should be decoded
    pub nodes: bool,
    /// Whether [`Way`]s should be decoded
    pub ways: bool,
    /// Whether [`Relation`]s should be decoded
    pub relations: bool,
}

impl Default for ElementFilter {
    fn default() -> Self {
        Self::all()
    }
}

impl ElementFilter {
    pub const fn all() -> Self {
        Self {
            nodes: true,
            ways: true,
            relations: true,
        }
    }

    pub const fn none() -> Self {
        Self {
            nodes: false,
            ways: false,
            relations: false,
        }
    }

    /// Enables exactly one kind.
    pub fn only(kind: EntityKind) -> Self {
        let mut filter = Self::none();
        filter.set(kind, true);
        filter
    }

    /// Builds a filter from optional flags; unspecified kinds are enabled.
    pub fn from_options(nodes: Option<bool>, ways: Option<bool>, relations: Option<bool>) -> Self {
        Self {
            nodes: nodes.unwrap_or(true),
            ways: ways.unwrap_or(true),
            relations: relations.unwrap_or(true),
        }
    }

    #[inline]
    pub fn accepts(&self, kind: EntityKind) -> bool {
        match kind {
            EntityKind::Node => self.nodes,
            EntityKind::Way => self.ways,
            EntityKind::Relation => self.relations,
        }
    }

    pub fn set(&mut self, kind: EntityKind, enabled: bool) {
        match kind {
            EntityKind::Node => self.nodes = enabled,
            EntityKind::Way => self.ways = enabled,
            EntityKind::Relation => self.relations = enabled,
        }
    }

    /// Kinds enabled in both filters.
    pub fn intersect(self, other: ElementFilter) -> Self {
        Self {
            nodes: self.nodes && other.nodes,
            ways: self.ways && other.ways,
            relations: self.relations && other.relations,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.nodes || self.ways || self.relations)
    }
}

type Callback<'a, T> = Box<dyn FnMut(&T) + 'a>;

/// Per-kind callbacks invoked by [`OsmReader::apply`](crate::OsmReader::apply).
///
/// At most one callback is registered per kind; registering again replaces
/// the previous one.
#[derive(Default)]
pub struct Handler<'a> {
    node: Option<Callback<'a, Node>>,
    way: Option<Callback<'a, Way>>,
    relation: Option<Callback<'a, Relation>>,
}

impl<'a> Handler<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_node<F: FnMut(&Node) + 'a>(&mut self, callback: F) -> &mut Self {
        self.node = Some(Box::new(callback));
        self
    }

    pub fn on_way<F: FnMut(&Way) + 'a>(&mut self, callback: F) -> &mut Self {
        self.way = Some(Box::new(callback));
        self
    }

    pub fn on_relation<F: FnMut(&Relation) + 'a>(&mut self, callback: F) -> &mut Self {
        self.relation = Some(Box::new(callback));
        self
    }

    /// Kinds that currently have a callback.
    pub fn interest(&self) -> ElementFilter {
        ElementFilter {
            nodes: self.node.is_some(),
            ways: self.way.is_some(),
            relations: self.relation.is_some(),
        }
    }

    /// Hands `entity` to the callback for its kind. Returns false if there is
    /// none.
    pub fn dispatch(&mut self, entity: &Entity) -> bool {
        match entity {
            Entity::Node(node) => call(&mut self.node, node),
            Entity::Way(way) => call(&mut self.way, way),
            Entity::Relation(relation) => call(&mut self.relation, relation),
        }
    }
}

fn call<T>(callback: &mut Option<Callback<'_, T>>, entity: &T) -> bool {
    match callback {
        Some(callback) => {
            (**callback)(entity);
            true
        }
        None => false,
    }
}

impl std::fmt::Debug for Handler<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("interest", &self.interest())
            .finish()
    }
}

/// Number of entities delivered per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub nodes: u64,
    pub ways: u64,
    pub relations: u64,
}

impl Counts {
    pub(crate) fn record(&mut self, kind: EntityKind) {
        match kind {
            EntityKind::Node => self.nodes += 1,
            EntityKind::Way => self.ways += 1,
            EntityKind::Relation => self.relations += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.nodes + self.ways + self.relations
    }
}

pub(crate) fn effective_filter(configured: ElementFilter, handler: &Handler<'_>) -> ElementFilter {
    let filter = configured.intersect(handler.interest());
    if filter != configured {
        debug!("narrowed element filter {:?} to {:?}", configured, filter);
    }
    filter
}
