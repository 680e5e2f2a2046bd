use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cow_rtree::{BoundingBox, Error, ItemCallbacks, RTree};

#[derive(Clone, Debug, PartialEq)]
struct Payload {
    id: u32,
}

/// Counts every clone/free the tree performs through the callback hooks,
/// independent of how many payloads a test inserts directly. The counters
/// are held behind `Arc`s so a test can keep reading them after the
/// callbacks object itself has been moved into the tree.
#[derive(Clone, Default)]
struct Counters {
    clone_calls: Arc<AtomicUsize>,
    free_calls: Arc<AtomicUsize>,
}

struct CountingCallbacks(Counters);

impl ItemCallbacks<Payload, ()> for CountingCallbacks {
    fn clone_item(&self, item: &Payload, _udata: &()) -> Result<Payload, Error> {
        self.0.clone_calls.fetch_add(1, Ordering::SeqCst);
        Ok(item.clone())
    }

    fn free_item(&self, _item: Payload, _udata: &()) {
        self.0.free_calls.fetch_add(1, Ordering::SeqCst);
    }
}

fn bb(min: [f64; 2], max: [f64; 2]) -> BoundingBox<f64, 2> {
    BoundingBox::from([min[0]..=max[0], min[1]..=max[1]])
}

fn ids(tree: &RTree<Payload, f64, 2, 8>) -> Vec<u32> {
    let mut found = Vec::new();
    tree.scan(|_, p| {
        found.push(p.id);
        true
    });
    found.sort_unstable();
    found
}

#[test]
fn clone_then_mutate_leaves_original_unaffected() {
    let mut tree: RTree<Payload, f64, 2, 8> = RTree::new();
    for id in 0..5u32 {
        let x = id as f64;
        tree.insert(bb([x, 0.0], [x + 1.0, 1.0]), Payload { id }).unwrap();
    }
    let original_ids = ids(&tree);

    let mut clone = tree.clone();
    clone.insert(bb([100.0, 100.0], [101.0, 101.0]), Payload { id: 999 }).unwrap();
    let removed = clone.delete(&bb([0.0, 0.0], [1.0, 1.0]), &Payload { id: 0 }).unwrap();
    assert!(removed);

    assert_eq!(ids(&tree), original_ids, "mutating the clone must not affect the original");
    assert_eq!(tree.count(), 5);
    assert_eq!(clone.count(), 5);
    assert_eq!(ids(&clone), vec![1, 2, 3, 4, 999]);
}

#[test]
fn deleting_half_the_clone_leaves_the_original_whole() {
    let mut tree: RTree<Payload, f64, 2, 8> = RTree::new();
    for id in 0..10u32 {
        let x = id as f64;
        tree.insert(bb([x, 0.0], [x + 1.0, 1.0]), Payload { id }).unwrap();
    }

    let mut clone = tree.clone();
    for id in 0..5u32 {
        let x = id as f64;
        let removed = clone.delete(&bb([x, 0.0], [x + 1.0, 1.0]), &Payload { id }).unwrap();
        assert!(removed);
    }

    assert_eq!(tree.count(), 10);
    assert_eq!(ids(&tree), (0..10).collect::<Vec<_>>());

    assert_eq!(clone.count(), 5);
    assert_eq!(ids(&clone), (5..10).collect::<Vec<_>>());
}

#[test]
fn twenty_independent_clones_balance_clone_and_free_callbacks() {
    let counters = Counters::default();

    let mut tree: RTree<Payload, f64, 2, 8> = RTree::new();
    tree.set_item_callbacks(CountingCallbacks(counters.clone()));
    tree.insert(bb([0.0, 0.0], [1.0, 1.0]), Payload { id: 0 }).unwrap();
    let mut inserted_directly = 1u32;

    let mut handles = Vec::new();
    for i in 0..20u32 {
        let mut handle = tree.clone();
        // Force the clone to detach its own copy of the shared leaf, which
        // is where `clone_item` gets invoked.
        let x = 10.0 + i as f64;
        handle.insert(bb([x, x], [x + 1.0, x + 1.0]), Payload { id: 1000 + i }).unwrap();
        inserted_directly += 1;
        handles.push(handle);
    }

    drop(handles);
    drop(tree);

    let clone_calls = counters.clone_calls.load(Ordering::SeqCst);
    let free_calls = counters.free_calls.load(Ordering::SeqCst);
    assert_eq!(
        free_calls,
        clone_calls + inserted_directly as usize,
        "every payload must be freed exactly once per direct insert plus every clone_item duplication"
    );
}
