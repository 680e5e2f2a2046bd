pub mod bounding_box;
pub mod dimension_type;
pub mod extent;

pub(crate) mod node;
pub(crate) mod split;
mod tree;

pub use bounding_box::BoundingBox;
pub use dimension_type::DimensionType;
pub use extent::Extent;
pub use tree::RTree;
