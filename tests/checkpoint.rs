//! Cross-cutting checkpoint/resume coverage (§5, §8 P2): building a
//! multi-stage pipeline (shard -> shuffle -> map -> prefetch -> pack) and
//! confirming that restoring mid-stream reproduces the same suffix as an
//! uninterrupted run, the way every individual stage already guarantees in
//! isolation.

use flowset::map::RangeDataset;
use flowset::pack::LengthStruct;
use flowset::{MapHandle, ReadOptions, Value};
use std::sync::Arc;

fn lengths() -> LengthStruct {
    let mut m = LengthStruct::new();
    m.insert("x".into(), 4);
    m
}

fn build_pipeline() -> flowset::IterHandle<Value> {
    let base = MapHandle::new(Arc::new(RangeDataset::new(0, 40, 1)));
    let shuffled = base.shuffle(99);
    let packed = shuffled
        .map_transform(Arc::new(|v: i64| Ok(Value::single_feature("x", vec![v]))))
        .to_iter(ReadOptions::new(2, 2))
        .pack_single_bin(lengths());
    packed
}

#[test]
fn restoring_mid_stream_reproduces_the_uninterrupted_suffix() {
    let pipeline = build_pipeline();

    let mut baseline = pipeline.iter();
    let mut all = Vec::new();
    while let Some(v) = baseline.next().unwrap() {
        all.push(v);
    }
    assert!(all.len() >= 3, "need at least a few bins to exercise a mid-stream split");

    let mut live = pipeline.iter();
    let split = all.len() / 2;
    for _ in 0..split {
        live.next().unwrap();
    }
    let state = live.state().unwrap();

    let mut resumed = pipeline.iter();
    resumed.restore(state).unwrap();
    let mut resumed_rest = Vec::new();
    while let Some(v) = resumed.next().unwrap() {
        resumed_rest.push(v);
    }

    assert_eq!(resumed_rest, all[split..]);
}
