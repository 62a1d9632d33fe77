//! Component D: the multi-process prefetch pool (§4.D).
//!
//! `W` worker OS processes each own a shard of the parent pipeline
//! (`parent.rewrite_slice(worker_index, W)`) and are consumed round-robin.
//! Workers are not forked closures — this crate re-execs its own binary with
//! an environment-variable role flag, so `crate::iter::process_prefetch::worker_entrypoint()`
//! must be called near the top of the host's `main` before anything else
//! runs, alongside whatever `crate::registry::register` calls built the
//! pipeline in the first place.
//!
//! The control channel is length-prefixed `bincode` frames over the worker's
//! stdin/stdout; numeric-array leaves cross it by shared-memory descriptor
//! (`crate::shm`) instead of inline bytes.

use crate::error::{Error, Result};
use crate::iter::{DatasetIterator, IterDataset, IterHandle};
use crate::options::MultiprocessingOptions;
use crate::shm;
use crate::value::{Scalar, Value};
use std::collections::BTreeMap;
use std::io::{BufReader, Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

const ROLE_ENV: &str = "FLOWSET_WORKER_ROLE";
const PIPELINE_ENV: &str = "FLOWSET_WORKER_PIPELINE";
const WORKER_INDEX_ENV: &str = "FLOWSET_WORKER_INDEX";
const WORKER_COUNT_ENV: &str = "FLOWSET_WORKER_COUNT";
const WORKER_ID_ENV: &str = "FLOWSET_WORKER_ID";

/// How often a worker's checkpoint state is actually fetched, rather than
/// merely inferred by counting items delivered since the last fetch. Bounds
/// the per-item overhead of keeping every worker's state fresh.
const RECORD_INTERVAL: Duration = Duration::from_secs(3);

#[derive(serde::Serialize, serde::Deserialize)]
enum WireValue {
	Scalar(Scalar),
	InlineArray(crate::value::NdArray),
	ShmArray(shm::ShmDescriptor),
	Record(BTreeMap<String, WireValue>),
}

fn value_to_wire(value: &Value, shm_dir: &std::path::Path) -> Result<WireValue> {
	match value {
		Value::Scalar(s) => Ok(WireValue::Scalar(s.clone())),
		Value::Array(arr) if arr.is_shm_eligible() => {
			Ok(WireValue::ShmArray(shm::write_ndarray(shm_dir, arr)?))
		}
		Value::Array(arr) => Ok(WireValue::InlineArray(arr.clone())),
		Value::Record(fields) => {
			let mut out = BTreeMap::new();
			for (k, v) in fields {
				out.insert(k.clone(), value_to_wire(v, shm_dir)?);
			}
			Ok(WireValue::Record(out))
		}
	}
}

fn wire_to_value(wire: WireValue) -> Result<Value> {
	match wire {
		WireValue::Scalar(s) => Ok(Value::Scalar(s)),
		WireValue::InlineArray(a) => Ok(Value::Array(a)),
		WireValue::ShmArray(d) => Ok(Value::Array(shm::read_and_consume_ndarray(&d)?)),
		WireValue::Record(fields) => {
			let mut out = BTreeMap::new();
			for (k, v) in fields {
				out.insert(k, wire_to_value(v)?);
			}
			Ok(Value::Record(out))
		}
	}
}

#[derive(serde::Serialize, serde::Deserialize)]
enum WorkerRequest {
	Next { record_state: bool },
	/// Carries the restored state as JSON text: `serde_json::Value`'s
	/// `Deserialize` impl needs a self-describing format, which `bincode`'s
	/// isn't, so it crosses the wire pre-encoded.
	Restore(String),
	Shutdown,
}

#[derive(serde::Serialize, serde::Deserialize)]
enum WorkerResponse {
	Item {
		value: Option<WireValue>,
		state: Option<String>,
	},
	Ack,
	Err(String),
}

fn write_framed<W: Write, M: serde::Serialize>(w: &mut W, msg: &M) -> Result<()> {
	let bytes = bincode::serialize(msg).map_err(|e| Error::Codec(e.to_string()))?;
	let len = bytes.len() as u32;
	w.write_all(&len.to_le_bytes())
		.map_err(|e| Error::Process(e.to_string()))?;
	w.write_all(&bytes).map_err(|e| Error::Process(e.to_string()))?;
	w.flush().map_err(|e| Error::Process(e.to_string()))
}

fn read_framed<R: Read, M: serde::de::DeserializeOwned>(r: &mut R) -> Result<M> {
	let mut len_buf = [0u8; 4];
	r.read_exact(&mut len_buf)
		.map_err(|e| Error::Process(e.to_string()))?;
	let len = u32::from_le_bytes(len_buf) as usize;
	let mut buf = vec![0u8; len];
	r.read_exact(&mut buf).map_err(|e| Error::Process(e.to_string()))?;
	bincode::deserialize(&buf).map_err(|e| Error::Codec(e.to_string()))
}

/// The host-facing entrypoint hook. Must be called near the top of `main`,
/// after the host has made its `crate::registry::register` calls (those run
/// in every re-exec'd process, worker included) but before anything else
/// touches stdin/stdout. A non-worker process returns immediately; a worker
/// process runs its serve loop and exits, never returning to the caller.
pub fn worker_entrypoint() {
	if std::env::var(ROLE_ENV).as_deref() != Ok("worker") {
		return;
	}
	let worker_id = std::env::var(WORKER_ID_ENV).unwrap_or_default();
	let _span = tracing::info_span!("prefetch.process", worker_id = %worker_id).entered();
	if let Err(e) = run_worker_process() {
		tracing::error!(error = %e, "process-prefetch worker exited with an error");
	}
	std::process::exit(0);
}

fn run_worker_process() -> Result<()> {
	let pipeline_name = std::env::var(PIPELINE_ENV).map_err(|_| Error::Process("missing pipeline name".into()))?;
	let worker_index: usize = std::env::var(WORKER_INDEX_ENV)
		.ok()
		.and_then(|v| v.parse().ok())
		.ok_or_else(|| Error::Process("missing worker index".into()))?;
	let worker_count: usize = std::env::var(WORKER_COUNT_ENV)
		.ok()
		.and_then(|v| v.parse().ok())
		.ok_or_else(|| Error::Process("missing worker count".into()))?;
	let shm_dir = std::env::temp_dir();

	let parent = crate::registry::build(&pipeline_name)?;
	let sharded = parent.rewrite_slice(worker_index, worker_count);
	let mut iter = sharded.iter();

	let stdin = std::io::stdin();
	let stdout = std::io::stdout();
	let mut reader = stdin.lock();
	let mut writer = stdout.lock();

	loop {
		let request: WorkerRequest = match read_framed(&mut reader) {
			Ok(r) => r,
			Err(_) => break,
		};
		match request {
			WorkerRequest::Next { record_state } => {
				let response = match iter.next() {
					Ok(item) => {
						let wire = match &item {
							Some(v) => Some(value_to_wire(v, &shm_dir)?),
							None => None,
						};
						let state = if record_state || item.is_none() {
							let s = iter.state()?;
							Some(serde_json::to_string(&s).map_err(|e| Error::Codec(e.to_string()))?)
						} else {
							None
						};
						WorkerResponse::Item { value: wire, state }
					}
					Err(e) => WorkerResponse::Err(e.to_string()),
				};
				write_framed(&mut writer, &response)?;
			}
			WorkerRequest::Restore(json) => {
				let response = (|| -> Result<()> {
					let state: serde_json::Value =
						serde_json::from_str(&json).map_err(|e| Error::Codec(e.to_string()))?;
					iter.restore(state)
				})();
				write_framed(
					&mut writer,
					&match response {
						Ok(()) => WorkerResponse::Ack,
						Err(e) => WorkerResponse::Err(e.to_string()),
					},
				)?;
			}
			WorkerRequest::Shutdown => {
				let _ = iter.close();
				break;
			}
		}
	}
	Ok(())
}

/// The top-level process-prefetch node (§4.D). Concrete over `Value` since
/// its workers transport shared-memory array leaves; see
/// `impl IterHandle<Value>::process_prefetch`.
pub struct ProcessPrefetchDataset {
	pipeline_name: String,
	opts: MultiprocessingOptions,
}

impl ProcessPrefetchDataset {
	pub fn new(
		parent: IterHandle<Value>,
		pipeline_name: impl Into<String>,
		opts: MultiprocessingOptions,
	) -> Result<Self> {
		if opts.num_workers < 1 {
			return Err(Error::InvalidMultiprocessingOptions(opts.num_workers));
		}
		if parent.contains_process_prefetch() {
			return Err(Error::MultipleProcessPrefetch);
		}
		Ok(ProcessPrefetchDataset {
			pipeline_name: pipeline_name.into(),
			opts,
		})
	}
}

impl IterDataset<Value> for ProcessPrefetchDataset {
	fn open(&self) -> Box<dyn DatasetIterator<Value>> {
		Box::new(ProcessPrefetchIterator::new(self.pipeline_name.clone(), self.opts))
	}

	fn rewrite_slice(&self, _worker_index: usize, _worker_count: usize) -> Arc<dyn IterDataset<Value>> {
		// Process-prefetch is required to be the unique, outermost node in a
		// valid pipeline, so nothing above it ever calls this in practice.
		Arc::new(ProcessPrefetchDataset {
			pipeline_name: self.pipeline_name.clone(),
			opts: self.opts,
		})
	}

	fn contains_process_prefetch(&self) -> bool {
		true
	}
}

struct WorkerHandle {
	child: Child,
	stdin: ChildStdin,
	stdout: BufReader<std::process::ChildStdout>,
	pending: std::collections::VecDeque<bool>,
	last_recorded_state: serde_json::Value,
	items_since_recorded: u64,
	last_record_time: Instant,
}

struct ProcessPrefetchIterator {
	pipeline_name: String,
	opts: MultiprocessingOptions,
	workers: Vec<WorkerHandle>,
	exhausted: Vec<bool>,
	next_to_consume: usize,
	spawn_error: Option<Error>,
	closed: bool,
}

impl ProcessPrefetchIterator {
	fn new(pipeline_name: String, opts: MultiprocessingOptions) -> Self {
		let mut workers = Vec::with_capacity(opts.num_workers);
		let mut spawn_error = None;
		for idx in 0..opts.num_workers {
			match Self::spawn_worker(&pipeline_name, idx, opts.num_workers) {
				Ok(w) => workers.push(w),
				Err(e) => {
					spawn_error = Some(e);
					break;
				}
			}
		}
		let exhausted = vec![false; workers.len()];
		ProcessPrefetchIterator {
			pipeline_name,
			opts,
			workers,
			exhausted,
			next_to_consume: 0,
			spawn_error,
			closed: false,
		}
	}

	fn spawn_worker(pipeline_name: &str, index: usize, count: usize) -> Result<WorkerHandle> {
		let exe = std::env::current_exe().map_err(|e| Error::Process(e.to_string()))?;
		let worker_id = uuid::Uuid::new_v4();
		let mut child = Command::new(exe)
			.env(ROLE_ENV, "worker")
			.env(PIPELINE_ENV, pipeline_name)
			.env(WORKER_INDEX_ENV, index.to_string())
			.env(WORKER_COUNT_ENV, count.to_string())
			.env(WORKER_ID_ENV, worker_id.to_string())
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.spawn()
			.map_err(|e| Error::Process(e.to_string()))?;
		let stdin = child
			.stdin
			.take()
			.ok_or_else(|| Error::Process("missing worker stdin".into()))?;
		let stdout = BufReader::new(
			child
				.stdout
				.take()
				.ok_or_else(|| Error::Process("missing worker stdout".into()))?,
		);
		Ok(WorkerHandle {
			child,
			stdin,
			stdout,
			pending: std::collections::VecDeque::new(),
			last_recorded_state: serde_json::Value::Null,
			items_since_recorded: 0,
			last_record_time: Instant::now(),
		})
	}

	fn consume_from(&mut self, idx: usize) -> Result<Option<Value>> {
		let buffer_size = self.opts.per_worker_buffer_size.max(1);
		{
			let worker = &mut self.workers[idx];
			while worker.pending.len() < buffer_size {
				let record = worker.pending.is_empty() && worker.last_record_time.elapsed() >= RECORD_INTERVAL;
				write_framed(&mut worker.stdin, &WorkerRequest::Next { record_state: record })
					.map_err(|e| Error::WorkerLost {
						worker_index: idx,
						reason: e.to_string(),
					})?;
				worker.pending.push_back(record);
			}
		}
		let worker = &mut self.workers[idx];
		worker.pending.pop_front();
		let response: WorkerResponse = read_framed(&mut worker.stdout).map_err(|e| Error::WorkerLost {
			worker_index: idx,
			reason: e.to_string(),
		})?;
		match response {
			WorkerResponse::Item { value, state } => {
				if let Some(s) = state {
					let parsed: serde_json::Value = serde_json::from_str(&s).map_err(|e| Error::Codec(e.to_string()))?;
					worker.last_recorded_state = parsed;
					worker.items_since_recorded = 0;
					worker.last_record_time = Instant::now();
				}
				worker.items_since_recorded += 1;
				match value {
					Some(wire) => Ok(Some(wire_to_value(wire)?)),
					None => Ok(None),
				}
			}
			WorkerResponse::Err(msg) => Err(Error::WorkerLost {
				worker_index: idx,
				reason: msg,
			}),
			WorkerResponse::Ack => Err(Error::Process("unexpected Ack in response to Next".into())),
		}
	}

	fn shutdown_workers(&mut self) {
		for mut worker in self.workers.drain(..) {
			let _ = write_framed(&mut worker.stdin, &WorkerRequest::Shutdown);
			let _ = worker.child.wait();
		}
	}
}

impl DatasetIterator<Value> for ProcessPrefetchIterator {
	fn next(&mut self) -> Result<Option<Value>> {
		if self.closed {
			return Err(Error::UseAfterClose);
		}
		if let Some(e) = self.spawn_error.take() {
			return Err(e);
		}
		let num_workers = self.workers.len();
		if num_workers == 0 {
			return Ok(None);
		}
		for _ in 0..num_workers {
			let idx = self.next_to_consume;
			self.next_to_consume = (idx + 1) % num_workers;
			if self.exhausted[idx] {
				continue;
			}
			match self.consume_from(idx)? {
				Some(v) => return Ok(Some(v)),
				None => self.exhausted[idx] = true,
			}
		}
		Ok(None)
	}

	fn state(&mut self) -> Result<serde_json::Value> {
		let workers_state: Vec<_> = self.workers.iter().map(|w| w.last_recorded_state.clone()).collect();
		let iterations_to_skip: Vec<_> = self.workers.iter().map(|w| w.items_since_recorded).collect();
		Ok(serde_json::json!({
			"workers_state": workers_state,
			"iterations_to_skip": iterations_to_skip,
			"last_worker_index": self.next_to_consume,
		}))
	}

	fn restore(&mut self, state: serde_json::Value) -> Result<()> {
		self.shutdown_workers();
		let workers_state = state
			.get("workers_state")
			.and_then(|v| v.as_array())
			.cloned()
			.ok_or_else(|| Error::Codec("missing workers_state".into()))?;
		let iterations_to_skip: Vec<u64> = state
			.get("iterations_to_skip")
			.and_then(|v| v.as_array())
			.map(|arr| arr.iter().filter_map(|x| x.as_u64()).collect())
			.ok_or_else(|| Error::Codec("missing iterations_to_skip".into()))?;
		let last_worker_index = state
			.get("last_worker_index")
			.and_then(|v| v.as_u64())
			.ok_or_else(|| Error::Codec("missing last_worker_index".into()))? as usize;

		let num_workers = workers_state.len();
		let mut workers = Vec::with_capacity(num_workers);
		for idx in 0..num_workers {
			let mut worker = Self::spawn_worker(&self.pipeline_name, idx, num_workers)?;
			let json = serde_json::to_string(&workers_state[idx]).map_err(|e| Error::Codec(e.to_string()))?;
			write_framed(&mut worker.stdin, &WorkerRequest::Restore(json)).map_err(|e| Error::WorkerLost {
				worker_index: idx,
				reason: e.to_string(),
			})?;
			let ack: WorkerResponse = read_framed(&mut worker.stdout).map_err(|e| Error::WorkerLost {
				worker_index: idx,
				reason: e.to_string(),
			})?;
			if let WorkerResponse::Err(msg) = ack {
				return Err(Error::WorkerLost {
					worker_index: idx,
					reason: msg,
				});
			}
			worker.last_recorded_state = workers_state[idx].clone();
			workers.push(worker);
		}
		self.workers = workers;
		self.exhausted = vec![false; num_workers];
		self.next_to_consume = if num_workers == 0 { 0 } else { last_worker_index % num_workers };
		self.closed = false;

		// fast-forward each worker past the items it had already delivered
		// before the last periodic checkpoint (RECORD_INTERVAL).
		for (idx, skip) in iterations_to_skip.into_iter().enumerate() {
			for _ in 0..skip {
				self.consume_from(idx)?;
			}
			self.workers[idx].items_since_recorded = 0;
		}
		Ok(())
	}

	fn close(&mut self) -> Result<()> {
		self.shutdown_workers();
		self.closed = true;
		Ok(())
	}
}

impl IterHandle<Value> {
	/// Wraps this iter-dataset in the top-level multi-process prefetch pool
	/// (§4.D). `pipeline_name` must already be registered
	/// (`crate::registry::register`) with a builder equivalent to `self`,
	/// since worker processes rebuild it by name rather than receiving it
	/// directly. Fails if the pipeline already contains a process-prefetch
	/// node, or if `opts.num_workers < 1`.
	pub fn process_prefetch(
		&self,
		pipeline_name: impl Into<String>,
		opts: MultiprocessingOptions,
	) -> Result<IterHandle<Value>> {
		Ok(IterHandle::new(Arc::new(ProcessPrefetchDataset::new(
			self.clone(),
			pipeline_name,
			opts,
		)?)))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rejects_zero_workers() {
		let parent = crate::map::MapHandle::new(Arc::new(crate::map::RangeDataset::new(0, 1, 1)))
			.map_transform(Arc::new(|i: i64| Ok(Value::single_feature("x", vec![i]))))
			.to_iter(crate::options::ReadOptions::default());
		let opts = MultiprocessingOptions::new(0);
		let err = ProcessPrefetchDataset::new(parent, "zero-workers", opts).unwrap_err();
		assert!(matches!(err, Error::InvalidMultiprocessingOptions(0)));
	}

	#[test]
	fn rejects_nested_process_prefetch() {
		let opts = MultiprocessingOptions::new(1);
		let leaf = crate::map::MapHandle::new(Arc::new(crate::map::RangeDataset::new(0, 1, 1)))
			.map_transform(Arc::new(|i: i64| Ok(Value::single_feature("x", vec![i]))))
			.to_iter(crate::options::ReadOptions::default());
		let inner = ProcessPrefetchDataset::new(leaf, "inner", opts).unwrap();
		let inner_handle = IterHandle::new(Arc::new(inner));
		let err = ProcessPrefetchDataset::new(inner_handle, "outer", opts).unwrap_err();
		assert!(matches!(err, Error::MultipleProcessPrefetch));
	}
}
