use super::{Length, MapDataset};
use crate::error::Result;
use std::sync::Arc;

/// Repeats `parent` `num_epochs` times (or infinitely, if `None`). Since
/// every `MapDataset` already resolves out-of-range indices via its own
/// wrap-around policy, repeating only changes the *declared* length;
/// `at(i)` passes straight through to the parent.
pub struct RepeatDataset<T> {
	parent: Arc<dyn MapDataset<T>>,
	num_epochs: Option<u64>,
}

impl<T> RepeatDataset<T> {
	pub fn new(parent: Arc<dyn MapDataset<T>>, num_epochs: Option<u64>) -> Self {
		RepeatDataset {
			parent,
			num_epochs,
		}
	}
}

impl<T: Send + Sync> MapDataset<T> for RepeatDataset<T> {
	fn length(&self) -> Length {
		match self.num_epochs {
			None => Length::Infinite,
			Some(epochs) => match self.parent.length() {
				Length::Infinite => Length::Infinite,
				Length::Finite(n) => Length::Finite(n.saturating_mul(epochs)),
			},
		}
	}

	fn at(&self, index: u64) -> Result<Option<T>> {
		self.parent.at(index)
	}
}
