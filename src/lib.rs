//! A lazy, composable dataset engine: an indexed `MapDataset` algebra
//! (`crate::map`) for random-access transforms, a sequential `IterDataset`
//! algebra (`crate::iter`) for stateful, checkpointable consumption, thread-
//! and process-backed prefetching, and packing transforms (`crate::pack`)
//! that batch variable-length examples into fixed-size bins.
//!
//! A typical pipeline reads:
//!
//! ```ignore
//! let dataset = MapHandle::new(source)
//!     .shuffle(seed)
//!     .map_transform(tokenize)
//!     .to_iter(ReadOptions::default())
//!     .pack_single_bin(lengths);
//! let mut it = dataset.iter();
//! while let Some(batch) = it.next()? { /* ... */ }
//! ```

pub mod error;
pub mod iter;
pub mod map;
pub mod options;
pub mod pack;
pub mod registry;
pub mod shm;
pub mod value;

pub use error::{Error, Result};
pub use iter::{DatasetIterator, IterDataset, IterHandle};
pub use map::{FilterTransform, Length, MapDataset, MapHandle, MapTransform, RandomMapTransform};
pub use options::{MultiprocessingOptions, ReadOptions, ShardOptions, StartMethod};
pub use value::{ArrayData, DType, NdArray, Scalar, Value};
