use crate::allocator::Allocator;
use crate::callbacks::ItemCallbacks;
use crate::error::Error;
use crate::rtree::bounding_box::BoundingBox;
use crate::rtree::dimension_type::DimensionType;
use arrayvec::ArrayVec;
use std::alloc::Layout;
use std::sync::Arc;

/// Shared, per-node context: the callbacks and user data a leaf needs to
/// duplicate or release its payloads, independent of whichever tree handle
/// is currently alive.
///
/// Nodes can outlive the `RTree` that created them once [`RTree::clone`]
/// lets two handles share a node graph, so this cannot simply be a
/// reference into the tree; it is cloned (cheaply, via `Arc`) into every
/// leaf at construction time.
pub(crate) struct NodeContext<P, U> {
    pub callbacks: Option<Arc<dyn ItemCallbacks<P, U> + Send + Sync>>,
    pub udata: U,
}

impl<P, U> NodeContext<P, U> {
    pub(crate) fn new(udata: U) -> Self {
        Self {
            callbacks: None,
            udata,
        }
    }
}

type Entries<T, const N: usize, const M: usize, Child> = ArrayVec<(BoundingBox<T, N>, Child), M>;

/// A leaf node: its entries map bounding boxes directly to payloads.
pub(crate) struct Leaf<P, T, const N: usize, const M: usize, U>
where
    T: DimensionType,
{
    pub entries: Entries<T, N, M, P>,
    pub ctx: Arc<NodeContext<P, U>>,
}

/// A branch node: its entries map bounding boxes to child nodes.
pub(crate) struct Branch<P, T, const N: usize, const M: usize, U>
where
    T: DimensionType,
{
    pub entries: Entries<T, N, M, Arc<Node<P, T, N, M, U>>>,
}

/// A node in the copy-on-write R-tree graph.
///
/// Sharing is expressed entirely through `Arc`: a node's reference count
/// *is* `Arc::strong_count`, and a node with a strong count greater than one
/// must not be mutated in place — see [`Node::make_mut`].
pub(crate) enum Node<P, T, const N: usize, const M: usize, U>
where
    T: DimensionType,
{
    Leaf(Leaf<P, T, N, M, U>),
    Branch(Branch<P, T, N, M, U>),
}

/// Minimum occupancy for a non-root node, `ceil(0.4 * M)`.
pub(crate) const fn min_fill(m: usize) -> usize {
    (m * 2 + 4) / 5
}

/// The minimum bounding rectangle covering every entry in an entries array.
///
/// Returns the default (unit) box when `entries` is empty, which only
/// occurs for a freshly created, still-empty root.
pub(crate) fn entries_bounding_box<T, const N: usize, const M: usize, Child>(
    entries: &Entries<T, N, M, Child>,
) -> BoundingBox<T, N>
where
    T: DimensionType,
{
    let mut iter = entries.iter().map(|(bb, _)| *bb);
    match iter.next() {
        Some(first) => iter.fold(first, |acc, bb| acc.union(&bb)),
        None => BoundingBox::default(),
    }
}

impl<P, T, const N: usize, const M: usize, U> Node<P, T, N, M, U>
where
    T: DimensionType,
{
    pub(crate) fn new_leaf(ctx: Arc<NodeContext<P, U>>) -> Self {
        Node::Leaf(Leaf {
            entries: ArrayVec::new(),
            ctx,
        })
    }

    pub(crate) fn new_branch() -> Self {
        Node::Branch(Branch {
            entries: ArrayVec::new(),
        })
    }

    pub(crate) fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf(_))
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            Node::Leaf(leaf) => leaf.entries.len(),
            Node::Branch(branch) => branch.entries.len(),
        }
    }

    pub(crate) fn is_full(&self) -> bool {
        self.len() == M
    }

    /// The minimum bounding rectangle covering every entry in this node.
    ///
    /// Returns the default (unit) box for an empty node; this only occurs
    /// for a freshly created, still-empty root.
    pub(crate) fn bounding_box(&self) -> BoundingBox<T, N> {
        match self {
            Node::Leaf(leaf) => entries_bounding_box(&leaf.entries),
            Node::Branch(branch) => entries_bounding_box(&branch.entries),
        }
    }

    /// Ensures `arc` is uniquely owned, detaching (duplicating) it first if
    /// another tree handle shares it. This is the realization of `cow_node`.
    ///
    /// On success, returns a mutable reference into `*arc`. On failure the
    /// allocator denied the reservation and `*arc` is left untouched.
    pub(crate) fn make_mut<'a>(
        arc: &'a mut Arc<Self>,
        alloc: &dyn Allocator,
    ) -> Result<&'a mut Self, Error>
    where
        P: Clone,
    {
        if Arc::strong_count(arc) > 1 {
            let duplicate = arc.duplicate(alloc)?;
            *arc = Arc::new(duplicate);
        }
        Ok(Arc::get_mut(arc).expect("uniquely owned after duplication"))
    }

    /// Builds a standalone copy of this node: child nodes are re-shared via
    /// `Arc::clone`, payloads are duplicated via [`ItemCallbacks::clone_item`]
    /// (falling back to `Clone::clone` when no callbacks are registered).
    fn duplicate(&self, alloc: &dyn Allocator) -> Result<Self, Error>
    where
        P: Clone,
    {
        alloc.try_reserve(Layout::new::<Self>())?;
        match self {
            Node::Branch(branch) => {
                let mut entries = ArrayVec::new();
                for (bb, child) in branch.entries.iter() {
                    entries.push((*bb, Arc::clone(child)));
                }
                Ok(Node::Branch(Branch { entries }))
            }
            Node::Leaf(leaf) => {
                let mut entries: Entries<T, N, M, P> = ArrayVec::new();
                for (bb, item) in leaf.entries.iter() {
                    let cloned = match &leaf.ctx.callbacks {
                        Some(callbacks) => callbacks.clone_item(item, &leaf.ctx.udata),
                        None => Ok(item.clone()),
                    };
                    match cloned {
                        Ok(duplicate) => entries.push((*bb, duplicate)),
                        Err(err) => {
                            // Roll back the clone_item calls already made so that
                            // clone_item/free_item counts stay balanced (P7) even
                            // on a partial failure.
                            if let Some(callbacks) = &leaf.ctx.callbacks {
                                for (_, already) in entries.drain(..) {
                                    callbacks.free_item(already, &leaf.ctx.udata);
                                }
                            }
                            return Err(err);
                        }
                    }
                }
                Ok(Node::Leaf(Leaf {
                    entries,
                    ctx: Arc::clone(&leaf.ctx),
                }))
            }
        }
    }
}

impl<P, T, const N: usize, const M: usize, U> Drop for Leaf<P, T, N, M, U>
where
    T: DimensionType,
{
    fn drop(&mut self) {
        for (_, item) in self.entries.drain(..) {
            match &self.ctx.callbacks {
                Some(callbacks) => callbacks.free_item(item, &self.ctx.udata),
                None => drop(item),
            }
        }
    }
}
