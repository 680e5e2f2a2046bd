use thiserror::Error;

/// Errors that can occur while mutating or cloning a tree.
///
/// The tree is left observably unchanged whenever an operation returns
/// an error: no partial mutation is ever visible to the caller.
#[derive(Debug, Error)]
pub enum Error {
    /// The allocator denied a reservation, or an `ItemCallbacks::clone_item`
    /// call failed.
    #[error("allocation failed")]
    OutOfMemory,
}
