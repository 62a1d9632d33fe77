use super::{Length, MapDataset};
use crate::error::Result;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::HashMap;
use std::sync::Arc;

/// Produces a deterministic, per-epoch permutation of `parent`'s elements
/// (§3, §8 P5): for a fixed `seed`, the multiset of elements over one epoch
/// is unchanged, only their order. Each epoch gets its own permutation
/// (seeded from `seed` and the epoch number) so repeated epochs don't repeat
/// the same order.
pub struct ShuffleDataset<T> {
	parent: Arc<dyn MapDataset<T>>,
	seed: u64,
	length: u64,
	permutations: parking_lot::Mutex<HashMap<u64, Arc<Vec<u64>>>>,
}

impl<T> ShuffleDataset<T> {
	pub fn new(parent: Arc<dyn MapDataset<T>>, seed: u64) -> Self {
		let length = parent
			.length()
			.finite()
			.expect("Shuffle requires a finite parent length");
		ShuffleDataset {
			parent,
			seed,
			length,
			permutations: parking_lot::Mutex::new(HashMap::new()),
		}
	}

	fn permutation_for_epoch(&self, epoch: u64) -> Arc<Vec<u64>> {
		if let Some(perm) = self.permutations.lock().get(&epoch) {
			return perm.clone();
		}
		let mut perm: Vec<u64> = (0..self.length).collect();
		let epoch_seed = self.seed ^ epoch.wrapping_mul(0x9E37_79B9_7F4A_7C15);
		let mut rng = StdRng::seed_from_u64(epoch_seed);
		perm.shuffle(&mut rng);
		let perm = Arc::new(perm);
		self.permutations.lock().insert(epoch, perm.clone());
		perm
	}
}

impl<T: Send + Sync> MapDataset<T> for ShuffleDataset<T> {
	fn length(&self) -> Length {
		Length::Finite(self.length)
	}

	fn at(&self, index: u64) -> Result<Option<T>> {
		if self.length == 0 {
			return Ok(None);
		}
		let epoch = index / self.length;
		let pos = (index % self.length) as usize;
		let perm = self.permutation_for_epoch(epoch);
		let target = epoch * self.length + perm[pos];
		self.parent.at(target)
	}
}
