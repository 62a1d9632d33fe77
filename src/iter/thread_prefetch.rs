//! Component C: thread-backed prefetch. Two modes share one job — keep a
//! bounded window of elements computed ahead of consumption — but differ in
//! where the work happens because their parents differ:
//!
//! - [`MapPrefetchDataset`] wraps a `MapDataset` (random access, `Send + Sync`)
//!   and fans `at(i)` calls out across a rayon thread pool.
//! - [`IterPrefetchDataset`] wraps an `IterDataset` (sequential, single
//!   cursor) and runs one producer thread pulling from a single parent
//!   iterator, since a sequential cursor can't be shared across threads.

use crate::error::{Error, Result};
use crate::iter::{DatasetIterator, IterDataset, IterHandle};
use crate::map::{Length, MapHandle};
use crate::options::ReadOptions;
use std::collections::VecDeque;
use std::sync::{mpsc, Arc};
use std::thread;

/// Buffered-over-`MapDataset` mode: the map-kind/iter-kind boundary in a
/// pipeline. `rewrite_slice` is where the per-worker parent-slice rewrite
/// (§4.A) actually bottoms out, since this is the map-kind leaf.
///
/// ⊥ (sparse) slots are skipped transparently (§8 P4, `allow_sparse=false`).
/// To preserve them for the consumer instead, use
/// [`SparseMapPrefetchDataset`].
pub struct MapPrefetchDataset<T> {
	parent: MapHandle<T>,
	opts: ReadOptions,
}

impl<T> MapPrefetchDataset<T> {
	pub fn new(parent: MapHandle<T>, opts: ReadOptions) -> Self {
		MapPrefetchDataset { parent, opts }
	}
}

impl<T: Send + Sync + 'static> IterDataset<T> for MapPrefetchDataset<T> {
	fn open(&self) -> Box<dyn DatasetIterator<T>> {
		Box::new(MapPrefetchIterator::new(self.parent.clone(), self.opts))
	}

	fn rewrite_slice(&self, worker_index: usize, worker_count: usize) -> Arc<dyn IterDataset<T>> {
		let sliced = self
			.parent
			.slice(worker_index as u64, None, worker_count as u64);
		Arc::new(MapPrefetchDataset::new(sliced, self.opts))
	}
}

/// Sparse-preserving counterpart to [`MapPrefetchDataset`] (§8 P4,
/// `allow_sparse=true`): every ⊥ slot is delivered to the consumer as
/// `Ok(Some(None))` instead of being skipped, distinguishable from stream
/// exhaustion (`Ok(None)`).
pub struct SparseMapPrefetchDataset<T> {
	parent: MapHandle<T>,
	opts: ReadOptions,
}

impl<T> SparseMapPrefetchDataset<T> {
	pub fn new(parent: MapHandle<T>, opts: ReadOptions) -> Self {
		SparseMapPrefetchDataset { parent, opts }
	}
}

impl<T: Send + Sync + 'static> IterDataset<Option<T>> for SparseMapPrefetchDataset<T> {
	fn open(&self) -> Box<dyn DatasetIterator<Option<T>>> {
		Box::new(SparseMapPrefetchIterator(MapPrefetchIterator::new(self.parent.clone(), self.opts)))
	}

	fn rewrite_slice(&self, worker_index: usize, worker_count: usize) -> Arc<dyn IterDataset<Option<T>>> {
		let sliced = self
			.parent
			.slice(worker_index as u64, None, worker_count as u64);
		Arc::new(SparseMapPrefetchDataset::new(sliced, self.opts))
	}
}

struct MapPrefetchIterator<T> {
	parent: MapHandle<T>,
	pool: Arc<rayon::ThreadPool>,
	buffer_size: usize,
	dispatch_index: u64,
	consumed_index: u64,
	in_flight: VecDeque<mpsc::Receiver<Result<Option<T>>>>,
	closed: bool,
}

impl<T: Send + Sync + 'static> MapPrefetchIterator<T> {
	fn new(parent: MapHandle<T>, opts: ReadOptions) -> Self {
		// `num_threads == 0` means "auto": size the pool to the machine
		// instead of degenerating to a single worker thread.
		let num_threads = if opts.num_threads == 0 {
			num_cpus::get().max(1)
		} else {
			opts.num_threads
		};
		let pool = rayon::ThreadPoolBuilder::new()
			.num_threads(num_threads)
			.build()
			.expect("thread pool with num_threads >= 1");
		MapPrefetchIterator {
			parent,
			pool: Arc::new(pool),
			buffer_size: opts.prefetch_buffer_size,
			dispatch_index: 0,
			consumed_index: 0,
			in_flight: VecDeque::new(),
			closed: false,
		}
	}

	fn ensure_dispatched(&mut self) {
		let target = self.buffer_size + 1;
		while self.in_flight.len() < target {
			if let Length::Finite(n) = self.parent.length() {
				if self.dispatch_index >= n {
					break;
				}
			}
			let idx = self.dispatch_index;
			self.dispatch_index += 1;
			let parent = self.parent.clone();
			let (tx, rx) = mpsc::sync_channel(1);
			self.pool.spawn(move || {
				let _span = tracing::info_span!("prefetch.thread", index = idx).entered();
				let _ = tx.send(parent.at(idx));
			});
			self.in_flight.push_back(rx);
		}
	}

	/// Pulls the next dispatched slot's raw result: `Ok(None)` means the
	/// in-flight queue is empty (stream exhausted), `Ok(Some(None))` means
	/// this slot was sparse (⊥), `Ok(Some(Some(item)))` is a real element.
	/// Shared by both the skip-by-default and sparse-preserving iterators.
	fn recv_next(&mut self) -> Result<Option<Option<T>>> {
		self.ensure_dispatched();
		let Some(rx) = self.in_flight.pop_front() else {
			return Ok(None);
		};
		self.consumed_index += 1;
		let result = rx
			.recv()
			.map_err(|_| Error::upstream_msg("prefetch worker dropped without a result"))?;
		Ok(Some(result?))
	}

	fn state(&mut self) -> Result<serde_json::Value> {
		Ok(serde_json::json!({ "next_index": self.consumed_index }))
	}

	fn restore(&mut self, state: serde_json::Value) -> Result<()> {
		let next_index = state
			.get("next_index")
			.and_then(|v| v.as_u64())
			.ok_or_else(|| Error::Codec("missing next_index in map-prefetch checkpoint".into()))?;
		self.in_flight.clear();
		self.dispatch_index = next_index;
		self.consumed_index = next_index;
		Ok(())
	}

	fn close(&mut self) -> Result<()> {
		self.in_flight.clear();
		self.closed = true;
		Ok(())
	}
}

impl<T: Send + Sync + 'static> DatasetIterator<T> for MapPrefetchIterator<T> {
	fn next(&mut self) -> Result<Option<T>> {
		if self.closed {
			return Err(Error::UseAfterClose);
		}
		loop {
			match self.recv_next()? {
				None => return Ok(None),
				Some(None) => continue,
				Some(Some(item)) => return Ok(Some(item)),
			}
		}
	}

	fn state(&mut self) -> Result<serde_json::Value> {
		MapPrefetchIterator::state(self)
	}

	fn restore(&mut self, state: serde_json::Value) -> Result<()> {
		MapPrefetchIterator::restore(self, state)
	}

	fn close(&mut self) -> Result<()> {
		MapPrefetchIterator::close(self)
	}
}

/// Thin wrapper exposing [`MapPrefetchIterator`]'s raw per-slot result to
/// the consumer instead of skipping ⊥ slots.
struct SparseMapPrefetchIterator<T>(MapPrefetchIterator<T>);

impl<T: Send + Sync + 'static> DatasetIterator<Option<T>> for SparseMapPrefetchIterator<T> {
	fn next(&mut self) -> Result<Option<Option<T>>> {
		if self.0.closed {
			return Err(Error::UseAfterClose);
		}
		self.0.recv_next()
	}

	fn state(&mut self) -> Result<serde_json::Value> {
		self.0.state()
	}

	fn restore(&mut self, state: serde_json::Value) -> Result<()> {
		self.0.restore(state)
	}

	fn close(&mut self) -> Result<()> {
		self.0.close()
	}
}

/// Single-producer-thread mode over an `IterDataset` parent: a sequential
/// cursor can only be driven by one thread, so this pushes `(element, state)`
/// pairs into a bounded channel instead of fanning work out.
pub struct IterPrefetchDataset<T> {
	parent: IterHandle<T>,
	buffer_size: usize,
}

impl<T: Send + Sync + 'static> IterPrefetchDataset<T> {
	pub fn new(parent: IterHandle<T>, buffer_size: usize) -> Self {
		IterPrefetchDataset { parent, buffer_size }
	}
}

impl<T: Send + Sync + 'static> IterDataset<T> for IterPrefetchDataset<T> {
	fn open(&self) -> Box<dyn DatasetIterator<T>> {
		Box::new(IterPrefetchIterator::new(
			self.parent.clone(),
			self.buffer_size,
		))
	}

	fn rewrite_slice(&self, worker_index: usize, worker_count: usize) -> Arc<dyn IterDataset<T>> {
		let rewritten = self.parent.rewrite_slice(worker_index, worker_count);
		Arc::new(IterPrefetchDataset::new(rewritten, self.buffer_size))
	}

	fn contains_process_prefetch(&self) -> bool {
		self.parent.contains_process_prefetch()
	}
}

type Msg<T> = Result<Option<(T, serde_json::Value)>>;

struct IterPrefetchIterator<T> {
	parent: IterHandle<T>,
	buffer_size: usize,
	rx: Option<mpsc::Receiver<Msg<T>>>,
	handle: Option<thread::JoinHandle<()>>,
	last_state: serde_json::Value,
	closed: bool,
}

impl<T: Send + 'static> IterPrefetchIterator<T> {
	fn new(parent: IterHandle<T>, buffer_size: usize) -> Self {
		let mut iter = parent.iter();
		let (tx, rx) = mpsc::sync_channel::<Msg<T>>(buffer_size.max(1));
		// the INIT_SENTINEL handshake (§8 S6): `state()` must be answerable
		// before the first `next()`, so the initial state is captured here,
		// on the calling thread, before the producer thread starts.
		let initial_state = match iter.state() {
			Ok(s) => s,
			Err(e) => {
				let _ = tx.send(Err(e));
				return IterPrefetchIterator {
					parent,
					buffer_size,
					rx: Some(rx),
					handle: None,
					last_state: serde_json::Value::Null,
					closed: false,
				};
			}
		};
		let handle = Self::spawn_producer(iter, tx);
		IterPrefetchIterator {
			parent,
			buffer_size,
			rx: Some(rx),
			handle: Some(handle),
			last_state: initial_state,
			closed: false,
		}
	}

	fn spawn_producer(
		mut iter: Box<dyn DatasetIterator<T>>,
		tx: mpsc::SyncSender<Msg<T>>,
	) -> thread::JoinHandle<()> {
		thread::spawn(move || {
			let _span = tracing::info_span!("prefetch.thread").entered();
			loop {
				let step = match iter.next() {
					Ok(None) => Ok(None),
					Ok(Some(item)) => iter.state().map(|s| Some((item, s))),
					Err(e) => Err(e),
				};
				let done = !matches!(step, Ok(Some(_)));
				if tx.send(step).is_err() || done {
					break;
				}
			}
			let _ = iter.close();
		})
	}

	fn shutdown(&mut self) {
		self.rx.take();
		if let Some(handle) = self.handle.take() {
			let _ = handle.join();
		}
	}
}

impl<T: Send + 'static> DatasetIterator<T> for IterPrefetchIterator<T> {
	fn next(&mut self) -> Result<Option<T>> {
		if self.closed {
			return Err(Error::UseAfterClose);
		}
		let Some(rx) = &self.rx else { return Ok(None) };
		match rx.recv() {
			Ok(Ok(Some((item, state)))) => {
				self.last_state = state;
				Ok(Some(item))
			}
			Ok(Ok(None)) => Ok(None),
			Ok(Err(e)) => Err(e),
			Err(_) => Ok(None),
		}
	}

	fn state(&mut self) -> Result<serde_json::Value> {
		Ok(self.last_state.clone())
	}

	fn restore(&mut self, state: serde_json::Value) -> Result<()> {
		self.shutdown();
		let mut iter = self.parent.iter();
		iter.restore(state.clone())?;
		let (tx, rx) = mpsc::sync_channel::<Msg<T>>(self.buffer_size.max(1));
		self.handle = Some(Self::spawn_producer(iter, tx));
		self.rx = Some(rx);
		self.last_state = state;
		self.closed = false;
		Ok(())
	}

	fn close(&mut self) -> Result<()> {
		self.shutdown();
		self.closed = true;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::map::RangeDataset;

	#[test]
	fn map_prefetch_yields_elements_in_order() {
		let parent = MapHandle::new(Arc::new(RangeDataset::new(0, 5, 1)));
		let ds = MapPrefetchDataset::new(parent, ReadOptions::new(2, 2));
		let mut it = ds.open();
		let mut out = Vec::new();
		while let Some(v) = it.next().unwrap() {
			out.push(v);
		}
		assert_eq!(out, vec![0, 1, 2, 3, 4]);
	}

	#[test]
	fn map_prefetch_checkpoint_resumes_at_the_same_suffix() {
		let parent = MapHandle::new(Arc::new(RangeDataset::new(0, 10, 1)));
		let ds = MapPrefetchDataset::new(parent, ReadOptions::new(1, 1));
		let mut it = ds.open();
		for _ in 0..4 {
			it.next().unwrap();
		}
		let state = it.state().unwrap();
		let mut resumed = ds.open();
		resumed.restore(state).unwrap();
		let expected: Vec<_> = (4..10).collect();
		let mut actual = Vec::new();
		while let Some(v) = resumed.next().unwrap() {
			actual.push(v);
		}
		assert_eq!(actual, expected);
	}

	#[test]
	fn map_prefetch_skips_sparse_elements_by_default() {
		let parent = MapHandle::new(Arc::new(RangeDataset::new(0, 5, 1)))
			.filter(Arc::new(|v: &i64| v % 2 == 0));
		let ds = MapPrefetchDataset::new(parent, ReadOptions::default());
		let mut it = ds.open();
		let mut out = Vec::new();
		while let Some(v) = it.next().unwrap() {
			out.push(v);
		}
		assert_eq!(out, vec![0, 2, 4]);
	}

	#[test]
	fn sparse_map_prefetch_preserves_sparse_slots() {
		let parent = MapHandle::new(Arc::new(RangeDataset::new(0, 5, 1)))
			.filter(Arc::new(|v: &i64| v % 2 == 0));
		let ds = SparseMapPrefetchDataset::new(parent, ReadOptions::default());
		let mut it = ds.open();
		let mut out = Vec::new();
		while let Some(slot) = it.next().unwrap() {
			out.push(slot);
		}
		assert_eq!(out, vec![Some(0), None, Some(2), None, Some(4)]);
	}

	#[test]
	fn iter_prefetch_state_is_answerable_before_the_first_next() {
		let parent = MapHandle::new(Arc::new(RangeDataset::new(0, 3, 1)));
		let iter_ds = parent.to_iter(ReadOptions::default());
		let prefetched = iter_ds.thread_prefetch(1);
		let mut it = prefetched.iter();
		// INIT_SENTINEL: must not panic or block forever before any next().
		let _ = it.state().unwrap();
		assert_eq!(it.next().unwrap(), Some(0));
	}

	#[test]
	fn iter_prefetch_checkpoint_resumes_at_the_same_suffix() {
		let parent = MapHandle::new(Arc::new(RangeDataset::new(0, 6, 1)));
		let iter_ds = parent.to_iter(ReadOptions::default());
		let prefetched = iter_ds.thread_prefetch(2);
		let mut it = prefetched.iter();
		for _ in 0..3 {
			it.next().unwrap();
		}
		let state = it.state().unwrap();
		let mut resumed = prefetched.iter();
		resumed.restore(state).unwrap();
		let mut actual = Vec::new();
		while let Some(v) = resumed.next().unwrap() {
			actual.push(v);
		}
		assert_eq!(actual, vec![3, 4, 5]);
	}
}
