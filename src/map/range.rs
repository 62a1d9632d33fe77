use super::{Length, MapDataset};
use crate::error::Result;

/// Random-access primitive producing `start + (i mod length) * step` (§4.B).
/// `length = ceil((stop - start) / step)`.
pub struct RangeDataset {
	start: i64,
	stop: i64,
	step: i64,
	length: u64,
}

impl RangeDataset {
	pub fn new(start: i64, stop: i64, step: i64) -> Self {
		assert!(step != 0, "Range step must be non-zero");
		let span = stop - start;
		let length = if (span > 0) != (step > 0) || span == 0 {
			0
		} else {
			let len = span.unsigned_abs().div_ceil(step.unsigned_abs());
			len
		};
		RangeDataset {
			start,
			stop,
			step,
			length,
		}
	}

	pub fn stop(&self) -> i64 {
		self.stop
	}
}

impl MapDataset<i64> for RangeDataset {
	fn length(&self) -> Length {
		Length::Finite(self.length)
	}

	fn at(&self, index: u64) -> Result<Option<i64>> {
		if self.length == 0 {
			return Ok(None);
		}
		let wrapped = index % self.length;
		Ok(Some(self.start + (wrapped as i64) * self.step))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn basic_range() {
		let r = RangeDataset::new(0, 10, 2);
		assert_eq!(r.length(), Length::Finite(5));
		assert_eq!(r.at(0).unwrap(), Some(0));
		assert_eq!(r.at(4).unwrap(), Some(8));
	}

	#[test]
	fn wraps_past_length() {
		let r = RangeDataset::new(0, 4, 1);
		assert_eq!(r.at(5).unwrap(), Some(1));
	}

	#[test]
	fn offset_range() {
		let r = RangeDataset::new(3, 10, 3);
		// length = ceil(7/3) = 3 -> values 3, 6, 9
		assert_eq!(r.length(), Length::Finite(3));
		assert_eq!(r.at(0).unwrap(), Some(3));
		assert_eq!(r.at(2).unwrap(), Some(9));
		assert_eq!(r.at(3).unwrap(), Some(3));
	}
}
