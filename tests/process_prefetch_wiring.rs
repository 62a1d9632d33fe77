//! Process-prefetch construction-time wiring (§4.D): registry-backed
//! pipeline reconstruction and the validation invariants enforced before any
//! worker process is actually spawned. The worker bootstrap itself
//! (`worker_entrypoint`, re-exec over `std::process::Command`) needs a host
//! binary that calls it from `main`, which this test harness is not, so
//! these tests stop at construction rather than driving an iterator.

use flowset::map::RangeDataset;
use flowset::{MapHandle, MultiprocessingOptions, ReadOptions, Value};
use std::sync::Arc;

fn build_pipeline() -> flowset::IterHandle<Value> {
    let base = MapHandle::new(Arc::new(RangeDataset::new(0, 100, 1)));
    base.map_transform(Arc::new(|v: i64| Ok(Value::single_feature("x", vec![v]))))
        .to_iter(ReadOptions::default())
}

fn registered_pipeline(name: &str) -> flowset::IterHandle<Value> {
    let _ = flowset::registry::register(name, build_pipeline);
    build_pipeline()
}

#[test]
fn rejects_zero_workers() {
    let pipeline = registered_pipeline("process_prefetch_wiring::zero_workers");
    let opts = MultiprocessingOptions::new(0);
    assert!(pipeline.process_prefetch("process_prefetch_wiring::zero_workers", opts).is_err());
}

#[test]
fn rejects_nesting_a_second_process_prefetch_node() {
    let name = "process_prefetch_wiring::nested";
    let pipeline = registered_pipeline(name);
    let once = pipeline
        .process_prefetch(name, MultiprocessingOptions::new(1))
        .expect("a single process-prefetch node is valid");
    let twice = once.process_prefetch(name, MultiprocessingOptions::new(1));
    assert!(twice.is_err());
}

#[test]
fn registry_rejects_duplicate_registration_but_builds_by_name() {
    let name = "process_prefetch_wiring::duplicate";
    let _ = registered_pipeline(name);
    assert!(flowset::registry::register(name, build_pipeline).is_err());
    assert!(flowset::registry::build(name).is_ok());
}
