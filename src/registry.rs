//! The named plug-point registry (§4.A).
//!
//! A pipeline registered under a stable name can be rebuilt from that name
//! alone. The one place this crate actually needs that is
//! `crate::iter::process_prefetch`: a re-exec'd worker process can't receive
//! a parent process's `Arc<dyn IterDataset<Value>>` directly, so instead the
//! host registers its pipeline under a name near the top of `main`, in every
//! process, and a worker looks the name back up after re-exec.
//!
//! Grounded on the frozen `static GLOBAL` executor pattern.

use crate::error::{Error, Result};
use crate::iter::IterHandle;
use crate::value::Value;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

type Builder = Arc<dyn Fn() -> IterHandle<Value> + Send + Sync>;

static REGISTRY: Lazy<RwLock<HashMap<String, Builder>>> = Lazy::new(|| RwLock::new(HashMap::new()));

/// Registers `builder` under `name`. Re-registering an existing name is an
/// error: a worker process rebuilding a pipeline by name must get back
/// exactly what every other process building that name got.
pub fn register(
	name: impl Into<String>,
	builder: impl Fn() -> IterHandle<Value> + Send + Sync + 'static,
) -> Result<()> {
	let name = name.into();
	let mut registry = REGISTRY.write();
	if registry.contains_key(&name) {
		return Err(Error::DuplicateRegistration(name));
	}
	registry.insert(name, Arc::new(builder));
	Ok(())
}

/// Builds a fresh instance of the pipeline registered under `name`.
pub fn build(name: &str) -> Result<IterHandle<Value>> {
	let registry = REGISTRY.read();
	let builder = registry
		.get(name)
		.ok_or_else(|| Error::upstream_msg(format!("no pipeline registered under '{name}'")))?;
	Ok(builder())
}
