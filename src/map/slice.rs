use super::{Length, MapDataset};
use crate::error::Result;
use std::sync::Arc;

/// Index remap `at(i) = parent.at(start + i * step)`, used both for the
/// user-facing `.slice()` sugar and for the per-worker parent-slice rewrite
/// (`slice(worker_index, None, worker_count)`, §4.A) that shards an
/// iter-dataset's map-kind ancestors for process-prefetch. `stop = None`
/// means an unbounded (infinite-length) slice, which is exactly what the
/// rewrite needs: each worker sees an infinite, disjoint residue class.
pub struct SliceDataset<T> {
	parent: Arc<dyn MapDataset<T>>,
	start: u64,
	stop: Option<u64>,
	step: u64,
}

impl<T> SliceDataset<T> {
	pub fn new(parent: Arc<dyn MapDataset<T>>, start: u64, stop: Option<u64>, step: u64) -> Self {
		assert!(step > 0, "slice step must be > 0");
		SliceDataset {
			parent,
			start,
			stop,
			step,
		}
	}
}

impl<T: Send + Sync> MapDataset<T> for SliceDataset<T> {
	fn length(&self) -> Length {
		match self.stop {
			None => Length::Infinite,
			Some(stop) => {
				let span = stop.saturating_sub(self.start);
				Length::Finite(span.div_ceil(self.step))
			}
		}
	}

	fn at(&self, index: u64) -> Result<Option<T>> {
		if let Length::Finite(len) = self.length() {
			if index >= len {
				return Ok(None);
			}
		}
		self.parent.at(self.start + index * self.step)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::map::RangeDataset;

	#[test]
	fn bounded_slice() {
		let parent = Arc::new(RangeDataset::new(0, 20, 1));
		let s = SliceDataset::new(parent, 2, Some(10), 3);
		// indices 2, 5, 8 -> length 3
		assert_eq!(s.length(), Length::Finite(3));
		assert_eq!(s.at(0).unwrap(), Some(2));
		assert_eq!(s.at(2).unwrap(), Some(8));
	}

	#[test]
	fn unbounded_slice_shards_disjoint_residues() {
		let parent = Arc::new(RangeDataset::new(0, 100, 1));
		let worker0 = SliceDataset::new(parent.clone(), 0, None, 2);
		let worker1 = SliceDataset::new(parent, 1, None, 2);
		assert_eq!(worker0.length(), Length::Infinite);
		assert_eq!(worker0.at(0).unwrap(), Some(0));
		assert_eq!(worker0.at(1).unwrap(), Some(2));
		assert_eq!(worker1.at(0).unwrap(), Some(1));
		assert_eq!(worker1.at(1).unwrap(), Some(3));
	}
}
