//! §4.E.2: first-fit packing across a fixed pool of concurrently open bins.
//! Each example is placed in the lowest-index bin it fits; if none fits, the
//! least-recently-opened bin is evicted (flushed, if non-empty) to make
//! room. Keeping several bins open at once finds a tighter packing than the
//! single-bin packer at the cost of up to `num_bins` bins' worth of latency
//! before anything is emitted.
//!
//! A bin evicted mid-stream is flushed immediately, in eviction order. The
//! bins still open at input exhaustion are flushed in the order they were
//! opened (oldest first) rather than by their current slot index, since a
//! slot's occupant changes across evictions but its neighbors' relative
//! opening order is what the original packer's emission order tracks.

use super::{extract_example, Bin, LengthStruct};
use crate::error::{Error, Result};
use crate::iter::{DatasetIterator, IterDataset, IterHandle};
use crate::value::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

pub struct MultiBinPackDataset {
	parent: IterHandle<Value>,
	lengths: LengthStruct,
	num_bins: usize,
}

impl MultiBinPackDataset {
	pub fn new(parent: IterHandle<Value>, lengths: LengthStruct, num_bins: usize) -> Self {
		MultiBinPackDataset {
			parent,
			lengths,
			num_bins: num_bins.max(1),
		}
	}
}

impl IterDataset<Value> for MultiBinPackDataset {
	fn open(&self) -> Box<dyn DatasetIterator<Value>> {
		Box::new(MultiBinPackIterator {
			parent: self.parent.iter(),
			lengths: self.lengths.clone(),
			bins: (0..self.num_bins).map(|_| Bin::new(&self.lengths)).collect(),
			generation: vec![0; self.num_bins],
			next_generation: self.num_bins as u64,
			pending: None,
			done: false,
			drain_queue: VecDeque::new(),
		})
	}

	fn rewrite_slice(&self, worker_index: usize, worker_count: usize) -> Arc<dyn IterDataset<Value>> {
		Arc::new(MultiBinPackDataset {
			parent: self.parent.rewrite_slice(worker_index, worker_count),
			lengths: self.lengths.clone(),
			num_bins: self.num_bins,
		})
	}

	fn contains_process_prefetch(&self) -> bool {
		self.parent.contains_process_prefetch()
	}
}

struct MultiBinPackIterator {
	parent: Box<dyn DatasetIterator<Value>>,
	lengths: LengthStruct,
	bins: Vec<Bin>,
	generation: Vec<u64>,
	next_generation: u64,
	pending: Option<BTreeMap<String, Vec<i64>>>,
	done: bool,
	drain_queue: VecDeque<Value>,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct State {
	parent: serde_json::Value,
	bins: Vec<Bin>,
	generation: Vec<u64>,
	next_generation: u64,
	pending: Option<BTreeMap<String, Vec<i64>>>,
	done: bool,
	drain_queue: Vec<Value>,
}

impl MultiBinPackIterator {
	/// Places `example` in the first bin it fits; otherwise evicts the
	/// oldest bin and opens a fresh one there for it. Returns the evicted
	/// bin's packed value, if that bin held anything.
	fn place(&mut self, example: BTreeMap<String, Vec<i64>>) -> Option<Value> {
		if let Some(idx) = self.bins.iter().position(|b| b.fits(&self.lengths, &example)) {
			self.bins[idx].append(&self.lengths, example);
			return None;
		}
		let victim = (0..self.bins.len())
			.min_by_key(|&i| self.generation[i])
			.expect("num_bins >= 1");
		let old = std::mem::replace(&mut self.bins[victim], Bin::new(&self.lengths));
		self.generation[victim] = self.next_generation;
		self.next_generation += 1;
		self.bins[victim].append(&self.lengths, example);
		if old.is_empty() {
			None
		} else {
			Some(old.into_value(&self.lengths))
		}
	}
}

impl DatasetIterator<Value> for MultiBinPackIterator {
	fn next(&mut self) -> Result<Option<Value>> {
		let _span = tracing::trace_span!("pack.multi_bin").entered();
		loop {
			if let Some(v) = self.drain_queue.pop_front() {
				return Ok(Some(v));
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
					if let Some(flushed) = self.place(ex) {
						return Ok(Some(flushed));
					}
				}
				None => {
					// Flush in opening order (oldest generation first), not by
					// slot index: a slot's occupant changes across evictions, so
					// slot order no longer reflects when each remaining bin was
					// actually opened.
					let mut remaining: Vec<(u64, Bin)> = self.generation.drain(..).zip(self.bins.drain(..)).collect();
					remaining.sort_by_key(|(generation, _)| *generation);
					for (_, bin) in remaining {
						if !bin.is_empty() {
							self.drain_queue.push_back(bin.into_value(&self.lengths));
						}
					}
					if let Some(v) = self.drain_queue.pop_front() {
						return Ok(Some(v));
					}
					return Ok(None);
				}
			}
		}
	}

	fn state(&mut self) -> Result<serde_json::Value> {
		let state = State {
			parent: self.parent.state()?,
			bins: self.bins.clone(),
			generation: self.generation.clone(),
			next_generation: self.next_generation,
			pending: self.pending.clone(),
			done: self.done,
			drain_queue: self.drain_queue.iter().cloned().collect(),
		};
		serde_json::to_value(state).map_err(|e| Error::Codec(e.to_string()))
	}

	fn restore(&mut self, state: serde_json::Value) -> Result<()> {
		let state: State = serde_json::from_value(state).map_err(|e| Error::Codec(e.to_string()))?;
		self.parent.restore(state.parent)?;
		self.bins = state.bins;
		self.generation = state.generation;
		self.next_generation = state.next_generation;
		self.pending = state.pending;
		self.done = state.done;
		self.drain_queue = state.drain_queue.into_iter().collect();
		Ok(())
	}

	fn close(&mut self) -> Result<()> {
		self.parent.close()
	}
}

impl IterHandle<Value> {
	/// Wraps this iter-dataset in the first-fit multi-bin packer (§4.E.2).
	pub fn pack_multi_bin(&self, lengths: LengthStruct, num_bins: usize) -> IterHandle<Value> {
		IterHandle::new(Arc::new(MultiBinPackDataset::new(self.clone(), lengths, num_bins)))
	}
}
