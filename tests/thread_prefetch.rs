//! Integration coverage for the thread-backed prefetch iterators (§4.C):
//! both the buffered map-parent mode and the single-producer iter-parent
//! mode, including checkpoint/resume and sparse-element handling.

use flowset::map::RangeDataset;
use flowset::{MapHandle, ReadOptions};
use std::sync::Arc;

fn drain(it: &mut dyn flowset::DatasetIterator<i64>) -> Vec<i64> {
    let mut out = Vec::new();
    while let Some(v) = it.next().unwrap() {
        out.push(v);
    }
    out
}

#[test]
fn map_parent_prefetch_preserves_order() {
    let source = MapHandle::new(Arc::new(RangeDataset::new(0, 50, 1)));
    let opts = ReadOptions::new(4, 3);
    let ds = source.to_iter(opts);
    let mut it = ds.iter();
    assert_eq!(drain(&mut *it), (0..50).collect::<Vec<_>>());
}

#[test]
fn map_parent_prefetch_checkpoint_resumes_at_the_same_suffix() {
    let source = MapHandle::new(Arc::new(RangeDataset::new(0, 20, 1)));
    let ds = source.to_iter(ReadOptions::new(2, 2));
    let mut it = ds.iter();
    for _ in 0..7 {
        it.next().unwrap();
    }
    let state = it.state().unwrap();

    let mut resumed = ds.iter();
    resumed.restore(state).unwrap();
    let rest = drain(&mut *resumed);
    assert_eq!(rest, (7..20).collect::<Vec<_>>());
}

#[test]
fn iter_parent_prefetch_state_is_answerable_before_the_first_next() {
    let source = MapHandle::new(Arc::new(RangeDataset::new(0, 5, 1)));
    let base = source.to_iter(ReadOptions::default());
    let prefetched = base.thread_prefetch(4);
    let mut it = prefetched.iter();
    // must not panic or error even though next() has never been called
    it.state().unwrap();
}

#[test]
fn iter_parent_prefetch_checkpoint_resumes_at_the_same_suffix() {
    let source = MapHandle::new(Arc::new(RangeDataset::new(0, 30, 1)));
    let base = source.to_iter(ReadOptions::default());
    let prefetched = base.thread_prefetch(4);

    let mut it = prefetched.iter();
    for _ in 0..11 {
        it.next().unwrap();
    }
    let state = it.state().unwrap();

    let mut resumed = prefetched.iter();
    resumed.restore(state).unwrap();
    let rest = drain(&mut *resumed);
    assert_eq!(rest, (11..30).collect::<Vec<_>>());
}

#[test]
fn sparse_elements_are_skipped_by_default() {
    let source = MapHandle::new(Arc::new(RangeDataset::new(0, 10, 1)))
        .filter(Arc::new(|v: &i64| v % 3 == 0));
    let ds = source.to_iter(ReadOptions::new(2, 2));
    let mut it = ds.iter();
    assert_eq!(drain(&mut *it), vec![0, 3, 6, 9]);
}

#[test]
fn sparse_elements_are_preserved_with_to_iter_with_sparse() {
    let source = MapHandle::new(Arc::new(RangeDataset::new(0, 5, 1)))
        .filter(Arc::new(|v: &i64| v % 3 == 0));
    let ds = source.to_iter_with_sparse(ReadOptions::default());
    let mut it = ds.iter();
    let mut out = Vec::new();
    while let Some(slot) = it.next().unwrap() {
        out.push(slot);
    }
    assert_eq!(out, vec![Some(0), None, None, Some(3), None]);
}
