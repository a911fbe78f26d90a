//! Format-specific stream decoders.

use crate::{DecodeError, ElementFilter, Entity, Header};

pub(crate) mod pbf;
pub(crate) mod xml;

/// A source of entities in file order.
///
/// Implementations consult `filter` before materializing a record, so a
/// disabled kind costs only the work needed to skip over it.
pub(crate) trait EntityDecoder: Send {
    /// File-level metadata, read when the decoder was opened.
    fn header(&self) -> &Header;

    /// Decodes the next entity accepted by `filter`, or `Ok(None)` at a clean
    /// end of input.
    fn next_entity(&mut self, filter: &ElementFilter) -> Result<Option<Entity>, DecodeError>;

    /// Bytes consumed from the (decompressed) source so far.
    fn position(&self) -> u64;
}
