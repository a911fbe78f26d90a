//! Glob-import the types needed to open a file and read entities.
//!
//! ```
//! use osmstream::prelude::*;
//! ```

pub use crate::{
    Entity, EntityKind, EntityStream, ElementFilter, Handler, Member, Node, OsmObject, OsmReader,
    Relation, Way,
};
