//! Crate-wide error taxonomy.
//!
//! Configuration errors are fatal at wire-up and never recoverable; upstream
//! errors are propagated to the consumer at the position they would have been
//! observed in a synchronous run. Exhaustion is represented by `Ok(None)` from
//! `next()`, not by a variant here.

use std::fmt;

/// Errors produced by this crate's dataset, iterator, prefetch and packing
/// machinery.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
	/// A transform name was registered twice in the plug-point registry.
	#[error("transform '{0}' is already registered")]
	DuplicateRegistration(String),

	/// `MultiprocessingOptions::num_workers` was less than 1.
	#[error("num_workers must be >= 1, got {0}")]
	InvalidMultiprocessingOptions(usize),

	/// More than one process-prefetch node was found while walking the
	/// parent DAG at construction time.
	#[error("at most one process-prefetch node is allowed in a pipeline")]
	MultipleProcessPrefetch,

	/// The packing length structure and the input element's features
	/// disagree on which features exist.
	#[error("length structure mismatch: {0}")]
	LengthStructureMismatch(String),

	/// An error raised by a user-supplied transform or data source,
	/// propagated in-order to the consumer.
	#[error("upstream error: {0}")]
	Upstream(#[source] Box<dyn std::error::Error + Send + Sync>),

	/// A worker process died; fatal to the owning iterator.
	#[error("worker {worker_index} was lost: {reason}")]
	WorkerLost { worker_index: usize, reason: String },

	/// The iterator was used after `close()`.
	#[error("iterator used after close()")]
	UseAfterClose,

	/// Failure (de)serializing a checkpoint or a cross-process payload.
	#[error("(de)serialization error: {0}")]
	Codec(String),

	/// Failure setting up or tearing down a shared-memory segment.
	#[error("shared-memory error: {0}")]
	SharedMemory(String),

	/// Failure spawning, writing to, or reading from a worker process.
	#[error("process error: {0}")]
	Process(String),
}

impl Error {
	/// Wraps an arbitrary upstream error (from a user transform or source).
	pub fn upstream<E>(err: E) -> Self
	where
		E: std::error::Error + Send + Sync + 'static,
	{
		Error::Upstream(Box::new(err))
	}

	/// Wraps an upstream error carrying only a message.
	pub fn upstream_msg(msg: impl fmt::Display) -> Self {
		Error::Upstream(Box::new(StringError(msg.to_string())))
	}
}

#[derive(Debug)]
struct StringError(String);

impl fmt::Display for StringError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl std::error::Error for StringError {}

pub type Result<T> = std::result::Result<T, Error>;
