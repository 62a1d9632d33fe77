//! The dynamic nested-record element type.
//!
//! `Value` is the recursive sum type `Scalar | Array | Record` from the
//! design notes: a scalar leaf, a dense rectangular numeric array leaf, or a
//! named record of further values. Packing (`crate::pack`) and shared-memory
//! transport (`crate::iter::process_prefetch`) are the only places that look
//! past the opaque `Record`/`Array` boundary.

use std::collections::BTreeMap;

/// A scalar leaf.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Scalar {
	Null,
	Bool(bool),
	Int(i64),
	Float(f64),
	Str(String),
}

/// The element type of a `DType::Object` leaf is opaque to this crate; only
/// `I64`/`F64` plain dtypes qualify for shared-memory transport and packing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DType {
	I64,
	F64,
	Object,
}

/// Backing storage for an [`NdArray`]'s elements.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ArrayData {
	I64(Vec<i64>),
	F64(Vec<f64>),
	/// Non-plain dtype; never eligible for shared-memory transport.
	Object(Vec<Scalar>),
}

impl ArrayData {
	pub fn len(&self) -> usize {
		match self {
			ArrayData::I64(v) => v.len(),
			ArrayData::F64(v) => v.len(),
			ArrayData::Object(v) => v.len(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

/// A dense rectangular numeric array leaf: `shape = [len, inner...]`, packed
/// outer-dimension-first. `shape[0]` is the packable sequence length.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NdArray {
	pub shape: Vec<usize>,
	pub dtype: DType,
	pub data: ArrayData,
}

impl NdArray {
	pub fn new_i64(values: Vec<i64>) -> Self {
		let len = values.len();
		NdArray {
			shape: vec![len],
			dtype: DType::I64,
			data: ArrayData::I64(values),
		}
	}

	/// The packable outer-dimension length (e.g. number of tokens).
	pub fn seq_len(&self) -> usize {
		self.shape.first().copied().unwrap_or(0)
	}

	/// The product of all dimensions after the first (1 for a flat 1-D array).
	pub fn inner_size(&self) -> usize {
		self.shape.iter().skip(1).product::<usize>().max(1)
	}

	/// Whether this leaf's dtype is plain (not `Object`) and its storage is
	/// a single contiguous run — i.e. it qualifies for shared-memory
	/// transport (`crate::iter::process_prefetch`) and, via `i64` values,
	/// for packing.
	pub fn is_shm_eligible(&self) -> bool {
		!matches!(self.dtype, DType::Object)
	}

	/// Slices the outer `len` rows `[start, end)`, preserving the inner
	/// dimension(s) verbatim. Used by the packers (`crate::pack`).
	pub fn slice_rows(&self, start: usize, end: usize) -> NdArray {
		let inner = self.inner_size();
		let mut shape = self.shape.clone();
		if shape.is_empty() {
			shape.push(end - start);
		} else {
			shape[0] = end - start;
		}
		let data = match &self.data {
			ArrayData::I64(v) => ArrayData::I64(v[start * inner..end * inner].to_vec()),
			ArrayData::F64(v) => ArrayData::F64(v[start * inner..end * inner].to_vec()),
			ArrayData::Object(v) => ArrayData::Object(v[start * inner..end * inner].to_vec()),
		};
		NdArray {
			shape,
			dtype: self.dtype,
			data,
		}
	}
}

/// An opaque element: a scalar, a dense numeric array, or a named record of
/// further values.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Value {
	Scalar(Scalar),
	Array(NdArray),
	Record(BTreeMap<String, Value>),
}

impl Value {
	/// Convenience constructor for the common "single unnamed feature" shape
	/// used by the degenerate scalar-length-structure packing case.
	pub fn single_feature(name: &str, values: Vec<i64>) -> Value {
		let mut map = BTreeMap::new();
		map.insert(name.to_string(), Value::Array(NdArray::new_i64(values)));
		Value::Record(map)
	}

	/// Returns the top-level record fields, or `None` if this value isn't a
	/// record (packing requires a record of named array features).
	pub fn as_record(&self) -> Option<&BTreeMap<String, Value>> {
		match self {
			Value::Record(m) => Some(m),
			_ => None,
		}
	}

	pub fn as_array(&self) -> Option<&NdArray> {
		match self {
			Value::Array(a) => Some(a),
			_ => None,
		}
	}
}
