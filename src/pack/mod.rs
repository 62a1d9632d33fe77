//! Component E: packing transforms. Both packers consume a sequential stream
//! of `Value::Record`s whose features are numeric arrays, and emit fixed-size
//! batches with `{feature}`, `{feature}_segment_ids`, and `{feature}_positions`
//! companion arrays — the standard "packed example" shape: multiple source
//! examples concatenated into one bin, with segment ids distinguishing which
//! source example each position came from and positions giving each token's
//! offset within its own source example. Unfilled bin tail is zero-padded
//! (segment id 0 marks padding).

pub mod multi_bin;
pub mod single_bin;

use crate::error::{Error, Result};
use crate::value::{ArrayData, NdArray, Value};
use std::collections::BTreeMap;

pub use multi_bin::MultiBinPackDataset;
pub use single_bin::SingleBinPackDataset;

/// Per-feature target packed length. Grounds `Error::LengthStructureMismatch`:
/// an input record whose features don't exactly match this map's keys is
/// rejected rather than silently packed against the wrong capacity.
pub type LengthStruct = BTreeMap<String, usize>;

fn extract_example(lengths: &LengthStruct, value: &Value) -> Result<BTreeMap<String, Vec<i64>>> {
	let record = value
		.as_record()
		.ok_or_else(|| Error::LengthStructureMismatch("packing input must be a record of array features".into()))?;
	if record.len() != lengths.len() || !record.keys().all(|k| lengths.contains_key(k)) {
		return Err(Error::LengthStructureMismatch(format!(
			"example features {:?} do not match the packer's length structure {:?}",
			record.keys().collect::<Vec<_>>(),
			lengths.keys().collect::<Vec<_>>()
		)));
	}
	let mut out = BTreeMap::new();
	for (name, v) in record {
		let arr = v
			.as_array()
			.ok_or_else(|| Error::LengthStructureMismatch(format!("feature '{name}' is not an array")))?;
		let tokens = match &arr.data {
			ArrayData::I64(v) => v.clone(),
			ArrayData::F64(v) => v.iter().map(|x| *x as i64).collect(),
			ArrayData::Object(_) => {
				return Err(Error::LengthStructureMismatch(format!(
					"feature '{name}' has a non-numeric dtype"
				)))
			}
		};
		out.insert(name.clone(), tokens);
	}
	Ok(out)
}

/// A single packed bin under construction: per-feature token runs plus their
/// segment-id and position companions, and a running fill count per feature
/// (features may have different lengths, e.g. an encoder/decoder pair).
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub(crate) struct Bin {
	values: BTreeMap<String, Vec<i64>>,
	segment_ids: BTreeMap<String, Vec<i64>>,
	positions: BTreeMap<String, Vec<i64>>,
	filled: BTreeMap<String, usize>,
	next_segment_id: i64,
}

impl Bin {
	pub(crate) fn new(lengths: &LengthStruct) -> Self {
		let mut values = BTreeMap::new();
		let mut segment_ids = BTreeMap::new();
		let mut positions = BTreeMap::new();
		let mut filled = BTreeMap::new();
		for name in lengths.keys() {
			values.insert(name.clone(), Vec::new());
			segment_ids.insert(name.clone(), Vec::new());
			positions.insert(name.clone(), Vec::new());
			filled.insert(name.clone(), 0);
		}
		Bin {
			values,
			segment_ids,
			positions,
			filled,
			next_segment_id: 1,
		}
	}

	pub(crate) fn is_empty(&self) -> bool {
		self.filled.values().all(|&f| f == 0)
	}

	pub(crate) fn fits(&self, lengths: &LengthStruct, example: &BTreeMap<String, Vec<i64>>) -> bool {
		example.iter().all(|(k, v)| lengths[k] - self.filled[k] >= v.len())
	}

	/// Appends `example`, truncating any feature whose token count exceeds
	/// its remaining room. Only ever truncates into what is, at the start of
	/// this call, an otherwise-freshly-opened bin for that feature — a
	/// caller is expected to have already flushed a bin this doesn't `fits`.
	pub(crate) fn append(&mut self, lengths: &LengthStruct, example: BTreeMap<String, Vec<i64>>) {
		let segment_id = self.next_segment_id;
		self.next_segment_id += 1;
		for (feature, mut tokens) in example {
			let cap = lengths[&feature];
			let remaining = cap - self.filled[&feature];
			if tokens.len() > remaining {
				tracing::warn!(
					feature = %feature,
					example_len = tokens.len(),
					capacity = cap,
					"packing: truncating an example that overflows an empty bin"
				);
				tokens.truncate(remaining);
			}
			let n = tokens.len();
			self.positions.get_mut(&feature).expect("feature present").extend(0..n as i64);
			self.segment_ids
				.get_mut(&feature)
				.expect("feature present")
				.extend(std::iter::repeat(segment_id).take(n));
			self.values.get_mut(&feature).expect("feature present").extend(tokens);
			*self.filled.get_mut(&feature).expect("feature present") += n;
		}
	}

	pub(crate) fn into_value(self, lengths: &LengthStruct) -> Value {
		let mut record = BTreeMap::new();
		for (feature, cap) in lengths {
			let mut values = self.values.get(feature).cloned().unwrap_or_default();
			let mut segment_ids = self.segment_ids.get(feature).cloned().unwrap_or_default();
			let mut positions = self.positions.get(feature).cloned().unwrap_or_default();
			values.resize(*cap, 0);
			segment_ids.resize(*cap, 0);
			positions.resize(*cap, 0);
			record.insert(feature.clone(), Value::Array(NdArray::new_i64(values)));
			record.insert(format!("{feature}_segment_ids"), Value::Array(NdArray::new_i64(segment_ids)));
			record.insert(format!("{feature}_positions"), Value::Array(NdArray::new_i64(positions)));
		}
		Value::Record(record)
	}
}
