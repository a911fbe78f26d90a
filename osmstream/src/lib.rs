#![doc = include_str!("../README.md")]

include!(concat!(env!("OUT_DIR"), "/proto/mod.rs"));

/// Dynamic call shapes for scripting bindings
pub mod access;
mod delta;
/// Contains Node, Way, Relation and their common metadata
pub mod element;
/// Error types
pub mod error;
/// Element filter and per-kind callbacks
pub mod filter;
mod parser;
/// Prelude
pub mod prelude;
/// Opens files and drives entity streams
pub mod reader;
/// Ordered node references and relation members
pub mod refs;
/// Tag dictionary
pub mod tags;
/// Epoch seconds to calendar time
pub mod timestamp;

pub use element::*;
pub use error::*;
pub use filter::{Counts, ElementFilter, Handler};
pub use reader::*;
pub use refs::*;
pub use tags::Tags;
pub use timestamp::Timestamp;
