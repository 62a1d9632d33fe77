//! Configuration records for the ambient knobs named in §6. This crate never
//! parses these from a file or the environment — that remains an external
//! collaborator's job — but every field here is public and independently
//! constructible so a host application's config loader can populate it.

/// Options controlling the thread-prefetch iterator (`crate::iter::thread_prefetch`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[non_exhaustive]
pub struct ReadOptions {
	/// Size of the in-flight buffer. `0` degenerates to synchronous access.
	pub prefetch_buffer_size: usize,
	/// Number of worker threads backing the buffered (map-parent) mode.
	pub num_threads: usize,
}

impl Default for ReadOptions {
	fn default() -> Self {
		ReadOptions {
			prefetch_buffer_size: 0,
			num_threads: 1,
		}
	}
}

impl ReadOptions {
	pub fn new(prefetch_buffer_size: usize, num_threads: usize) -> Self {
		ReadOptions {
			prefetch_buffer_size,
			num_threads,
		}
	}
}

/// Worker process start method for `MultiprocessingOptions`. Only `Spawn` is
/// meaningful for this crate's re-exec-based bootstrap (see
/// `crate::iter::process_prefetch`); `Fork` is accepted for wire
/// compatibility with configuration produced by other collaborators and is
/// treated the same as `Spawn`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[non_exhaustive]
pub enum StartMethod {
	Spawn,
	Fork,
}

impl Default for StartMethod {
	fn default() -> Self {
		StartMethod::Spawn
	}
}

/// Options controlling the process-prefetch iterator (`crate::iter::process_prefetch`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[non_exhaustive]
pub struct MultiprocessingOptions {
	/// Number of worker processes. Must be >= 1.
	pub num_workers: usize,
	/// How worker processes are bootstrapped.
	pub start_method: StartMethod,
	/// Per-worker output buffer size (control-channel framed messages
	/// in flight before the worker blocks on a send).
	pub per_worker_buffer_size: usize,
}

impl Default for MultiprocessingOptions {
	fn default() -> Self {
		MultiprocessingOptions {
			num_workers: 1,
			start_method: StartMethod::Spawn,
			per_worker_buffer_size: 1,
		}
	}
}

impl MultiprocessingOptions {
	pub fn new(num_workers: usize) -> Self {
		MultiprocessingOptions {
			num_workers,
			..Default::default()
		}
	}
}

/// Options controlling `crate::map::shard`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[non_exhaustive]
pub struct ShardOptions {
	pub shard_index: usize,
	pub shard_count: usize,
	pub drop_remainder: bool,
}

impl ShardOptions {
	pub fn new(shard_index: usize, shard_count: usize, drop_remainder: bool) -> Self {
		ShardOptions {
			shard_index,
			shard_count,
			drop_remainder,
		}
	}
}
