//! §4.E.1: a single streaming bin. Examples are appended to the one open bin
//! until one doesn't fit, at which point the bin is emitted and a fresh one
//! is opened for the example that didn't fit. An example too large for an
//! empty bin is truncated into it (§8 S4) rather than rejected.

use super::{extract_example, Bin, LengthStruct};
use crate::error::{Error, Result};
use crate::iter::{DatasetIterator, IterDataset, IterHandle};
use crate::value::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct SingleBinPackDataset {
	parent: IterHandle<Value>,
	lengths: LengthStruct,
}

impl SingleBinPackDataset {
	pub fn new(parent: IterHandle<Value>, lengths: LengthStruct) -> Self {
		SingleBinPackDataset { parent, lengths }
	}
}

impl IterDataset<Value> for SingleBinPackDataset {
	fn open(&self) -> Box<dyn DatasetIterator<Value>> {
		Box::new(SingleBinPackIterator {
			parent: self.parent.iter(),
			lengths: self.lengths.clone(),
			bin: None,
			pending: None,
			done: false,
		})
	}

	fn rewrite_slice(&self, worker_index: usize, worker_count: usize) -> Arc<dyn IterDataset<Value>> {
		Arc::new(SingleBinPackDataset {
			parent: self.parent.rewrite_slice(worker_index, worker_count),
			lengths: self.lengths.clone(),
		})
	}

	fn contains_process_prefetch(&self) -> bool {
		self.parent.contains_process_prefetch()
	}
}

/// Whether `example` alone fills every feature in `lengths` to exactly its
/// target length (§4.E.1 rule #1). `extract_example` already guarantees the
/// example's keys exactly match `lengths`'.
fn is_exactly_full(lengths: &LengthStruct, example: &BTreeMap<String, Vec<i64>>) -> bool {
	lengths.iter().all(|(k, &cap)| example[k].len() == cap)
}

struct SingleBinPackIterator {
	parent: Box<dyn DatasetIterator<Value>>,
	lengths: LengthStruct,
	bin: Option<Bin>,
	pending: Option<BTreeMap<String, Vec<i64>>>,
	done: bool,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct State {
	parent: serde_json::Value,
	bin: Option<Bin>,
	pending: Option<BTreeMap<String, Vec<i64>>>,
	done: bool,
}

impl DatasetIterator<Value> for SingleBinPackIterator {
	fn next(&mut self) -> Result<Option<Value>> {
		let _span = tracing::trace_span!("pack.single_bin").entered();
		loop {
			if self.bin.is_none() {
				self.bin = Some(Bin::new(&self.lengths));
			}
			let example = if let Some(ex) = self.pending.take() {
				Some(ex)
			} else if self.done {
				None
			} else {
				match self.parent.next()? {
					Some(v) => Some(extract_example(&self.lengths, &v)?),
					None => {
						self.done = true;
						None
					}
				}
			};
			match example {
				Some(ex) => {
					// Rule #1 (§4.E.1): an example that alone fills every
					// feature exactly jumps the queue ahead of whatever bin
					// is in progress, which is left untouched.
					if is_exactly_full(&self.lengths, &ex) {
						let mut solo = Bin::new(&self.lengths);
						solo.append(&self.lengths, ex);
						return Ok(Some(solo.into_value(&self.lengths)));
					}
					let bin = self.bin.as_ref().expect("just ensured");
					if bin.is_empty() || bin.fits(&self.lengths, &ex) {
						self.bin.as_mut().expect("just ensured").append(&self.lengths, ex);
					} else {
						self.pending = Some(ex);
						let full = self.bin.take().expect("just ensured");
						return Ok(Some(full.into_value(&self.lengths)));
					}
				}
				None => {
					if let Some(bin) = self.bin.take() {
						if !bin.is_empty() {
							return Ok(Some(bin.into_value(&self.lengths)));
						}
					}
					return Ok(None);
				}
			}
		}
	}

	fn state(&mut self) -> Result<serde_json::Value> {
		let state = State {
			parent: self.parent.state()?,
			bin: self.bin.clone(),
			pending: self.pending.clone(),
			done: self.done,
		};
		serde_json::to_value(state).map_err(|e| Error::Codec(e.to_string()))
	}

	fn restore(&mut self, state: serde_json::Value) -> Result<()> {
		let state: State = serde_json::from_value(state).map_err(|e| Error::Codec(e.to_string()))?;
		self.parent.restore(state.parent)?;
		self.bin = state.bin;
		self.pending = state.pending;
		self.done = state.done;
		Ok(())
	}

	fn close(&mut self) -> Result<()> {
		self.parent.close()
	}
}

impl IterHandle<Value> {
	/// Wraps this iter-dataset in the single-bin streaming packer (§4.E.1).
	pub fn pack_single_bin(&self, lengths: LengthStruct) -> IterHandle<Value> {
		IterHandle::new(Arc::new(SingleBinPackDataset::new(self.clone(), lengths)))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::map::{MapHandle, RangeDataset};
	use crate::options::ReadOptions;
	use crate::value::NdArray;

	fn example(len: usize, offset: i64) -> Value {
		Value::single_feature("x", (0..len as i64).map(|i| i + offset).collect())
	}

	fn lengths() -> LengthStruct {
		let mut m = LengthStruct::new();
		m.insert("x".into(), 4);
		m
	}

	fn source(examples: Vec<Value>) -> IterHandle<Value> {
		let examples = Arc::new(examples);
		let parent = MapHandle::new(Arc::new(RangeDataset::new(0, examples.len() as i64, 1))).map_transform(Arc::new(
			move |i: i64| Ok(examples[i as usize].clone()),
		));
		parent.to_iter(ReadOptions::default())
	}

	#[test]
	fn packs_multiple_short_examples_into_one_bin() {
		let parent = source(vec![example(2, 10), example(2, 20)]);
		let ds = SingleBinPackDataset::new(parent, lengths());
		let mut it = ds.open();
		let packed = it.next().unwrap().unwrap();
		let record = packed.as_record().unwrap();
		assert_eq!(record["x"].as_array().unwrap(), &NdArray::new_i64(vec![10, 11, 20, 21]));
		assert_eq!(
			record["x_segment_ids"].as_array().unwrap(),
			&NdArray::new_i64(vec![1, 1, 2, 2])
		);
		assert_eq!(
			record["x_positions"].as_array().unwrap(),
			&NdArray::new_i64(vec![0, 1, 0, 1])
		);
		assert!(it.next().unwrap().is_none());
	}

	#[test]
	fn flushes_and_opens_a_new_bin_when_an_example_does_not_fit() {
		let parent = source(vec![example(3, 0), example(3, 100)]);
		let ds = SingleBinPackDataset::new(parent, lengths());
		let mut it = ds.open();
		let first = it.next().unwrap().unwrap();
		assert_eq!(
			first.as_record().unwrap()["x"].as_array().unwrap(),
			&NdArray::new_i64(vec![0, 1, 2, 0])
		);
		let second = it.next().unwrap().unwrap();
		assert_eq!(
			second.as_record().unwrap()["x"].as_array().unwrap(),
			&NdArray::new_i64(vec![100, 101, 102, 0])
		);
		assert!(it.next().unwrap().is_none());
	}

	#[test]
	fn truncates_an_example_that_overflows_an_empty_bin() {
		let parent = source(vec![example(6, 0)]);
		let ds = SingleBinPackDataset::new(parent, lengths());
		let mut it = ds.open();
		let packed = it.next().unwrap().unwrap();
		assert_eq!(
			packed.as_record().unwrap()["x"].as_array().unwrap(),
			&NdArray::new_i64(vec![0, 1, 2, 3])
		);
		assert!(it.next().unwrap().is_none());
	}

	#[test]
	fn rejects_a_feature_set_that_does_not_match_the_length_structure() {
		let mismatched = Value::single_feature("y", vec![1, 2]);
		let parent = source(vec![mismatched]);
		let ds = SingleBinPackDataset::new(parent, lengths());
		let mut it = ds.open();
		assert!(it.next().is_err());
	}

	#[test]
	fn an_exactly_full_example_jumps_the_queue_ahead_of_the_in_progress_bin() {
		// [1,2,3,4], [5,6], [11,12,13,14], [7], [8] at T=4: the third example
		// is already exactly full on arrival and must be yielded ahead of the
		// still-open bin holding the second example, which only completes
		// once the fourth and fifth examples arrive.
		let parent = source(vec![
			Value::single_feature("x", vec![1, 2, 3, 4]),
			Value::single_feature("x", vec![5, 6]),
			Value::single_feature("x", vec![11, 12, 13, 14]),
			Value::single_feature("x", vec![7]),
			Value::single_feature("x", vec![8]),
		]);
		let ds = SingleBinPackDataset::new(parent, lengths());
		let mut it = ds.open();
		let first = it.next().unwrap().unwrap();
		assert_eq!(first.as_record().unwrap()["x"].as_array().unwrap(), &NdArray::new_i64(vec![1, 2, 3, 4]));
		let second = it.next().unwrap().unwrap();
		assert_eq!(
			second.as_record().unwrap()["x"].as_array().unwrap(),
			&NdArray::new_i64(vec![11, 12, 13, 14])
		);
		let third = it.next().unwrap().unwrap();
		assert_eq!(third.as_record().unwrap()["x"].as_array().unwrap(), &NdArray::new_i64(vec![5, 6, 7, 8]));
		assert!(it.next().unwrap().is_none());
	}

	#[test]
	fn checkpoint_resumes_after_a_jump_the_queue_emission() {
		// After the second next() call (the jump-the-queue emission of the
		// third example), the in-progress bin still only holds the second
		// example; restoring here must still combine it with the fourth and
		// fifth examples exactly as an uninterrupted run would.
		let parent = source(vec![
			Value::single_feature("x", vec![1, 2, 3, 4]),
			Value::single_feature("x", vec![5, 6]),
			Value::single_feature("x", vec![11, 12, 13, 14]),
			Value::single_feature("x", vec![7]),
			Value::single_feature("x", vec![8]),
		]);
		let ds = SingleBinPackDataset::new(parent, lengths());
		let mut it = ds.open();
		let _ = it.next().unwrap().unwrap();
		let _ = it.next().unwrap().unwrap();
		let state = it.state().unwrap();

		let mut resumed = ds.open();
		resumed.restore(state).unwrap();
		let third = resumed.next().unwrap().unwrap();
		assert_eq!(third.as_record().unwrap()["x"].as_array().unwrap(), &NdArray::new_i64(vec![5, 6, 7, 8]));
		assert!(resumed.next().unwrap().is_none());
	}

	#[test]
	fn checkpoint_resumes_mid_bin() {
		let parent = source(vec![example(2, 0), example(2, 50), example(2, 100)]);
		let ds = SingleBinPackDataset::new(parent, lengths());
		let mut it = ds.open();
		// first bin fits the first two examples, then the third forces a flush
		let _ = it.next().unwrap().unwrap();
		let state = it.state().unwrap();
		let mut resumed = ds.open();
		resumed.restore(state).unwrap();
		let second = resumed.next().unwrap().unwrap();
		assert_eq!(
			second.as_record().unwrap()["x"].as_array().unwrap(),
			&NdArray::new_i64(vec![100, 101, 0, 0])
		);
	}
}
