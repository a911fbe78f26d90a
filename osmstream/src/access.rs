//! Dynamic call-shape entry points for scripting bindings.
//!
//! Script hosts expose `tags()` / `tags(key)` and `nodes()` / `nodes(index)`
//! as one overloaded function each. These helpers take the raw argument list
//! and route it to the typed operations on [`Tags`] and [`Way`], producing
//! the type or range errors a host should raise for any other call shape.

use crate::{AccessError, NodeRefs, Tags, Way};

/// One argument as received from a script host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Arg<'a> {
    Str(&'a str),
    Number(f64),
    /// Any other value; carries the host's name for its type.
    Other(&'a str),
}

impl Arg<'_> {
    fn type_name(&self) -> String {
        match self {
            Arg::Str(_) => "string".to_string(),
            Arg::Number(_) => "number".to_string(),
            Arg::Other(name) => name.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TagsReply<'a> {
    /// `tags()`: the whole dictionary.
    Map(&'a Tags),
    /// `tags(key)`: the value, or `None` when absent.
    Value(Option<&'a str>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodesReply<'a> {
    /// `nodes()`: every reference in order.
    List(&'a NodeRefs),
    /// `nodes(index)`: one node id.
    Ref(i64),
}

/// Argument list of a host call whose missing arguments arrive as
/// `undefined`. Trailing `undefined`s are dropped; `null` and any
/// `undefined` before a real argument are kept.
pub fn positional<'a>(args: impl IntoIterator<Item = Arg<'a>>) -> Vec<Arg<'a>> {
    let mut args: Vec<Arg<'a>> = args.into_iter().collect();
    while let Some(Arg::Other("undefined")) = args.last() {
        args.pop();
    }
    args
}

/// `tags()` with zero or one string argument.
pub fn call_tags<'a>(tags: &'a Tags, args: &[Arg<'_>]) -> Result<TagsReply<'a>, AccessError> {
    match args {
        [] => Ok(TagsReply::Map(tags)),
        [Arg::Str(key)] => Ok(TagsReply::Value(tags.get(key))),
        [other] => Err(AccessError::ArgumentType {
            operation: "tags",
            expected: "a string key",
            found: other.type_name(),
        }),
        _ => Err(AccessError::Arity {
            operation: "tags",
            max: 1,
            given: args.len(),
        }),
    }
}

/// `nodes()` with zero arguments or one integral index.
pub fn call_nodes<'a>(way: &'a Way, args: &[Arg<'_>]) -> Result<NodesReply<'a>, AccessError> {
    match args {
        [] => Ok(NodesReply::List(way.nodes()?)),
        [Arg::Number(index)] => {
            let refs = way.nodes()?;
            let index = integral_index(*index)?;
            match usize::try_from(index) {
                Ok(index) => refs.get(index).map(NodesReply::Ref),
                Err(_) => Err(AccessError::OutOfRange {
                    index,
                    len: refs.len(),
                }),
            }
        }
        [other] => Err(AccessError::ArgumentType {
            operation: "nodes",
            expected: "an integer index",
            found: other.type_name(),
        }),
        _ => Err(AccessError::Arity {
            operation: "nodes",
            max: 1,
            given: args.len(),
        }),
    }
}

/// A length as the 32-bit count script hosts expose.
pub fn count(field: &'static str, len: usize) -> Result<u32, AccessError> {
    u32::try_from(len).map_err(|_| AccessError::CountOverflow { field, len })
}

fn integral_index(value: f64) -> Result<i64, AccessError> {
    if !value.is_finite() || value.fract() != 0.0 {
        return Err(AccessError::ArgumentType {
            operation: "nodes",
            expected: "an integer index",
            found: format!("number {}", value),
        });
    }
    // Saturates; anything this large is out of range anyway.
    Ok(value as i64)
}
