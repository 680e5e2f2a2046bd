pub mod allocator;
pub mod callbacks;
pub mod error;
pub mod rtree;

pub use allocator::{Allocator, SystemAllocator};
pub use callbacks::ItemCallbacks;
pub use error::Error;
pub use rtree::{BoundingBox, Extent, RTree};
