use super::{Length, MapDataset};
use crate::error::Result;
use crate::options::ShardOptions;
use std::sync::Arc;

/// Random-access primitive that shards `parent` into `shard_count`
/// consecutive, evenly-sized pieces and exposes only the `shard_index`-th
/// piece (§4.B). `at(i)` wraps within the shard's own length while
/// preserving the shard's global offset into `parent`.
pub struct ShardDataset<T> {
	parent: Arc<dyn MapDataset<T>>,
	start: u64,
	end: u64,
	parent_len: u64,
}

impl<T> ShardDataset<T> {
	pub fn new(parent: Arc<dyn MapDataset<T>>, opts: ShardOptions) -> Self {
		let parent_len = parent
			.length()
			.finite()
			.expect("Shard requires a finite parent length");
		let (start, end) = even_split(parent_len, opts);
		ShardDataset {
			parent,
			start,
			end,
			parent_len,
		}
	}
}

/// Computes `[start, end)` for `shard_index` of `shard_count` evenly-sized
/// pieces of `n` items. Without `drop_remainder`, the first `n % shard_count`
/// shards absorb one extra item each.
pub fn even_split(n: u64, opts: ShardOptions) -> (u64, u64) {
	let s = opts.shard_count as u64;
	let k = opts.shard_index as u64;
	assert!(s > 0, "shard_count must be > 0");
	assert!(k < s, "shard_index must be < shard_count");
	let base = n / s;
	if opts.drop_remainder {
		(k * base, (k + 1) * base)
	} else {
		let rem = n % s;
		let start = k * base + k.min(rem);
		let extra = if k < rem {
			1
		} else {
			0
		};
		let end = start + base + extra;
		(start, end)
	}
}

impl<T: Send + Sync> MapDataset<T> for ShardDataset<T> {
	fn length(&self) -> Length {
		Length::Finite(self.end - self.start)
	}

	fn at(&self, index: u64) -> Result<Option<T>> {
		let len = self.end - self.start;
		if len == 0 {
			return Ok(None);
		}
		let epoch = index / len;
		let index_in_epoch = index % len;
		let global = epoch * self.parent_len + index_in_epoch + self.start;
		self.parent.at(global)
	}
}
