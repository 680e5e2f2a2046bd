use crate::error::Error;

/// Overrides the default clone/drop-based payload ownership protocol.
///
/// Registered on a tree to support payloads that carry their own reference
/// count: `clone_item` bumps it, `free_item` decrements it and releases the
/// backing allocation once it reaches zero.
///
/// When no callbacks are registered, a tree falls back to `P: Clone` for
/// duplication and ordinary drop glue for release.
pub trait ItemCallbacks<P, U> {
    /// Produce a duplicate of `item` for a detached (copy-on-write) node.
    ///
    /// Returning `Err` aborts the enclosing tree operation with
    /// out-of-memory semantics; the tree is left unchanged.
    fn clone_item(&self, item: &P, udata: &U) -> Result<P, Error>;

    /// Release one logical reference to `item`. Must not fail.
    fn free_item(&self, item: P, udata: &U);
}
