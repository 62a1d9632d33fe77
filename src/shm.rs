//! Shared-memory transport for numeric-array leaves (§4.D): a worker process
//! writes an eligible [`NdArray`]'s raw bytes to a temp file once, hands the
//! parent a small descriptor over the control channel instead of the bytes
//! themselves, and the reader consumes the file exactly once.
//!
//! This is a linear, consumed-once resource: nothing re-reads a descriptor
//! after [`read_and_consume_ndarray`] has unlinked it. If a worker dies
//! between writing and the parent reading, the segment is orphaned — cleanup
//! of process-crash orphans is out of scope here.

use crate::error::{Error, Result};
use crate::value::{ArrayData, DType, NdArray};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ShmDescriptor {
	pub path: PathBuf,
	pub dtype: DType,
	pub shape: Vec<usize>,
}

/// Writes `arr`'s raw bytes to a fresh temp file under `dir` and returns a
/// descriptor a peer process can use to read them back. `arr` must be
/// shared-memory eligible ([`NdArray::is_shm_eligible`]); `Object`-dtype
/// leaves travel inline instead.
pub fn write_ndarray(dir: &Path, arr: &NdArray) -> Result<ShmDescriptor> {
	if !arr.is_shm_eligible() {
		return Err(Error::SharedMemory(
			"Object dtype is never shared-memory eligible".into(),
		));
	}
	let bytes: Vec<u8> = match &arr.data {
		ArrayData::I64(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
		ArrayData::F64(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
		ArrayData::Object(_) => unreachable!("checked is_shm_eligible above"),
	};
	let mut tmp = tempfile::Builder::new()
		.prefix("flowset-shm-")
		.tempfile_in(dir)
		.map_err(|e| Error::SharedMemory(e.to_string()))?;
	tmp.write_all(&bytes)
		.map_err(|e| Error::SharedMemory(e.to_string()))?;
	tmp.flush().map_err(|e| Error::SharedMemory(e.to_string()))?;
	// keep(): the file survives the NamedTempFile handle going out of scope;
	// the reader unlinks it explicitly once it has consumed the bytes.
	let (_, path) = tmp.keep().map_err(|e| Error::SharedMemory(e.to_string()))?;
	Ok(ShmDescriptor {
		path,
		dtype: arr.dtype,
		shape: arr.shape.clone(),
	})
}

/// Reads the bytes described by `descriptor` into an owned [`NdArray`] and
/// unlinks the backing file. Calling this twice on the same descriptor is a
/// logic error (the second call will fail to open the already-removed file).
pub fn read_and_consume_ndarray(descriptor: &ShmDescriptor) -> Result<NdArray> {
	let file = std::fs::File::open(&descriptor.path).map_err(|e| Error::SharedMemory(e.to_string()))?;
	// SAFETY: the file is written once, fully, before its path is ever handed
	// to a reader, and no other process mutates it afterward (§4.D).
	let mmap = unsafe { memmap2::Mmap::map(&file) }.map_err(|e| Error::SharedMemory(e.to_string()))?;
	let bytes = &mmap[..];
	let data = match descriptor.dtype {
		DType::I64 => ArrayData::I64(
			bytes
				.chunks_exact(8)
				.map(|c| i64::from_le_bytes(c.try_into().expect("chunk of exactly 8 bytes")))
				.collect(),
		),
		DType::F64 => ArrayData::F64(
			bytes
				.chunks_exact(8)
				.map(|c| f64::from_le_bytes(c.try_into().expect("chunk of exactly 8 bytes")))
				.collect(),
		),
		DType::Object => return Err(Error::SharedMemory("Object dtype is never shared-memory eligible".into())),
	};
	drop(mmap);
	drop(file);
	let _ = std::fs::remove_file(&descriptor.path);
	Ok(NdArray {
		shape: descriptor.shape.clone(),
		dtype: descriptor.dtype,
		data,
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn round_trips_an_i64_array_through_a_temp_file() {
		let dir = std::env::temp_dir();
		let arr = NdArray::new_i64(vec![1, 2, 3, 4]);
		let descriptor = write_ndarray(&dir, &arr).unwrap();
		assert!(descriptor.path.exists());
		let back = read_and_consume_ndarray(&descriptor).unwrap();
		assert_eq!(back, arr);
		assert!(!descriptor.path.exists());
	}

	#[test]
	fn object_dtype_is_rejected() {
		let arr = NdArray {
			shape: vec![1],
			dtype: DType::Object,
			data: ArrayData::Object(vec![crate::value::Scalar::Null]),
		};
		assert!(write_ndarray(&std::env::temp_dir(), &arr).is_err());
	}
}
