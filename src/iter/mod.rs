//! Sequential (`IterDataset`) abstractions: a finite/unknown/infinite lazy
//! sequence that produces stateful, checkpointable iterators, plus the
//! prefetching wrappers and packing transforms built on top of it.

pub mod process_prefetch;
pub mod thread_prefetch;

use crate::error::Result;
use crate::map::MapHandle;
use crate::options::ReadOptions;
use std::sync::Arc;

/// A stateful cursor over an `IterDataset`. `next()` may signal end by
/// returning `Ok(None)`; `state()`/`restore()` snapshot and rewind the
/// cursor. Snapshots are sufficient: restoring then consuming yields the
/// same suffix as the uninterrupted original (§8 P2).
pub trait DatasetIterator<T>: Send {
	fn next(&mut self) -> Result<Option<T>>;

	/// Returns a deep copy of the current state so callers can't mutate
	/// live state (§5).
	fn state(&mut self) -> Result<serde_json::Value>;

	fn restore(&mut self, state: serde_json::Value) -> Result<()>;

	/// Tears down any background worker this iterator owns. The sole
	/// cancel primitive (§5); reuse after `close()` is an error. Default
	/// no-op for iterators with no background worker.
	fn close(&mut self) -> Result<()> {
		Ok(())
	}
}

/// A sequential lazy sequence of finite, unknown, or infinite length.
/// Produces stateful iterators; is not itself indexable.
pub trait IterDataset<T: 'static>: Send + Sync {
	fn open(&self) -> Box<dyn DatasetIterator<T>>;

	/// Recursive parent-slice rewrite (§4.A): returns a fresh tree in which
	/// every map-kind leaf has been replaced by
	/// `leaf.slice(worker_index, None, worker_count)`. Iter-kind nodes
	/// reconstruct themselves around their (recursively rewritten) parent.
	fn rewrite_slice(&self, worker_index: usize, worker_count: usize) -> Arc<dyn IterDataset<T>>;

	/// Whether this node, or any of its iter-kind ancestors, is a
	/// process-prefetch node. Used to enforce the "at most one
	/// process-prefetch node per pipeline" validation (§4.D) at
	/// construction time.
	fn contains_process_prefetch(&self) -> bool {
		false
	}
}

/// A cheaply-cloneable handle around an `IterDataset<T>` node.
pub struct IterHandle<T>(Arc<dyn IterDataset<T>>);

impl<T> Clone for IterHandle<T> {
	fn clone(&self) -> Self {
		IterHandle(self.0.clone())
	}
}

impl<T: Send + Sync + 'static> IterHandle<T> {
	pub fn new(inner: Arc<dyn IterDataset<T>>) -> Self {
		IterHandle(inner)
	}

	pub fn inner(&self) -> Arc<dyn IterDataset<T>> {
		self.0.clone()
	}

	pub fn iter(&self) -> Box<dyn DatasetIterator<T>> {
		self.0.open()
	}

	pub fn rewrite_slice(&self, worker_index: usize, worker_count: usize) -> IterHandle<T> {
		IterHandle(self.0.rewrite_slice(worker_index, worker_count))
	}

	pub fn contains_process_prefetch(&self) -> bool {
		self.0.contains_process_prefetch()
	}

	/// Wraps this iter-dataset in a thread-based prefetch iterator
	/// (§4.C, "variant for iter-dataset parents"): a single producer thread
	/// pushing `(element, state)` pairs into a bounded queue.
	pub fn thread_prefetch(&self, buffer_size: usize) -> IterHandle<T> {
		IterHandle(Arc::new(thread_prefetch::IterPrefetchDataset::new(
			self.clone(),
			buffer_size,
		)))
	}

	// The multi-process prefetch pool (§4.D, `process_prefetch.rs`) is only
	// meaningful over the crate's concrete `Value` element type, since its
	// worker processes transport shared-memory array leaves; see the
	// `impl IterHandle<Value>` block in `crate::iter::process_prefetch`.
}

impl<T: Send + Sync + 'static> MapHandle<T> {
	/// Syntactic sugar to construct an `IterDataset` via the thread-prefetch
	/// leaf (§4.C buffered mode): the map-kind/iter-kind boundary in a
	/// pipeline. ⊥ (sparse) slots are skipped transparently (§8 P4,
	/// `allow_sparse=false`); use [`MapHandle::to_iter_with_sparse`] to
	/// preserve them instead.
	pub fn to_iter(&self, opts: ReadOptions) -> IterHandle<T> {
		IterHandle::new(Arc::new(thread_prefetch::MapPrefetchDataset::new(self.clone(), opts)))
	}

	/// Like [`MapHandle::to_iter`], but preserves ⊥ slots for the consumer
	/// (§8 P4, `allow_sparse=true`) as `Ok(Some(None))` instead of skipping
	/// them, distinguishable from stream exhaustion (`Ok(None)`).
	pub fn to_iter_with_sparse(&self, opts: ReadOptions) -> IterHandle<Option<T>> {
		IterHandle::new(Arc::new(thread_prefetch::SparseMapPrefetchDataset::new(self.clone(), opts)))
	}
}
