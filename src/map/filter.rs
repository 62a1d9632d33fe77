use super::{FilterTransform, Length, MapDataset};
use crate::error::Result;
use std::sync::Arc;

/// `at(i)` returns the parent's element at `i` unchanged if `transform`
/// accepts it, or the sparse sentinel (`Ok(None)`) otherwise. Length is
/// unchanged; iterating over a filtered dataset is what turns the sparse
/// sentinel into "skip transparently" (§4.C).
pub struct FilterDataset<T> {
	parent: Arc<dyn MapDataset<T>>,
	transform: Arc<dyn FilterTransform<T>>,
}

impl<T> FilterDataset<T> {
	pub fn new(parent: Arc<dyn MapDataset<T>>, transform: Arc<dyn FilterTransform<T>>) -> Self {
		FilterDataset {
			parent,
			transform,
		}
	}
}

impl<T: Send + Sync> MapDataset<T> for FilterDataset<T> {
	fn length(&self) -> Length {
		self.parent.length()
	}

	fn at(&self, index: u64) -> Result<Option<T>> {
		match self.parent.at(index)? {
			Some(item) if self.transform.filter(&item) => Ok(Some(item)),
			_ => Ok(None),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::map::RangeDataset;

	#[test]
	fn keeps_matching_drops_rest() {
		let parent = Arc::new(RangeDataset::new(0, 10, 1));
		let f = FilterDataset::new(parent, Arc::new(|v: &i64| v % 2 == 0));
		assert_eq!(f.at(0).unwrap(), Some(0));
		assert_eq!(f.at(1).unwrap(), None);
		assert_eq!(f.at(4).unwrap(), Some(4));
	}
}
