use super::{Length, MapDataset, MapTransform};
use crate::error::Result;
use std::sync::Arc;

/// Applies a user `MapTransform` to every present element; the sparse
/// sentinel passes through untouched (a filtered-out slot stays filtered
/// out after mapping).
pub struct MapFnDataset<T, U> {
	parent: Arc<dyn MapDataset<T>>,
	transform: Arc<dyn MapTransform<T, U>>,
}

impl<T, U> MapFnDataset<T, U> {
	pub fn new(parent: Arc<dyn MapDataset<T>>, transform: Arc<dyn MapTransform<T, U>>) -> Self {
		MapFnDataset {
			parent,
			transform,
		}
	}
}

impl<T: Send + Sync, U: Send + Sync> MapDataset<U> for MapFnDataset<T, U> {
	fn length(&self) -> Length {
		self.parent.length()
	}

	fn at(&self, index: u64) -> Result<Option<U>> {
		match self.parent.at(index)? {
			Some(item) => Ok(Some(self.transform.map(item)?)),
			None => Ok(None),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::map::RangeDataset;

	#[test]
	fn maps_present_elements() {
		let parent = Arc::new(RangeDataset::new(0, 5, 1));
		let doubled = MapFnDataset::new(parent, Arc::new(|v: i64| Ok(v * 2)));
		assert_eq!(doubled.at(3).unwrap(), Some(6));
	}
}
