//! Guard rails: cheap bounds checks shared by every descriptor.
//!
//! Every field a descriptor pulls out of an unknown container is suspect
//! until one of these checks accepts it.  During scoring a failed check
//! simply ends that descriptor's predicate chain; during a full read it
//! becomes a [`ParseError`](crate::descriptor::ParseError).
//!
//! The `check_*` forms return the validated value so they compose with `?`:
//!
//! ```
//! use arcprobe::guard::check_offset;
//! let offset = check_offset(128, 4096)?;
//! assert_eq!(offset, 128);
//! # Ok::<(), arcprobe::guard::GuardError>(())
//! ```

use thiserror::Error;

/// Default upper bound on the number of entries a directory may declare.
pub const DEFAULT_MAX_FILES:           u64   = 65_536;
/// Default upper bound on a stored filename, in bytes.
pub const DEFAULT_MAX_FILENAME_LENGTH: usize = 256;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    #[error("Offset {offset} outside container of {size} bytes")]
    OffsetOutOfRange { offset: u64, size: u64 },
    #[error("Length {length} exceeds container of {size} bytes")]
    LengthOutOfRange { length: u64, size: u64 },
    #[error("Region {offset}+{length} runs past end of container ({size} bytes)")]
    RegionOutOfRange { offset: u64, length: u64, size: u64 },
    #[error("Entry count {count} outside 1..={max}")]
    FileCount { count: u64, max: u64 },
    #[error("Filename length {length} outside 1..={max}")]
    FilenameLength { length: usize, max: usize },
}

/// Sanity limits applied by the count/name checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_files:           u64,
    pub max_filename_length: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_files:           DEFAULT_MAX_FILES,
            max_filename_length: DEFAULT_MAX_FILENAME_LENGTH,
        }
    }
}

impl Limits {
    pub fn check_num_files(&self, count: u64) -> Result<u64, GuardError> {
        if count == 0 || count > self.max_files {
            return Err(GuardError::FileCount { count, max: self.max_files });
        }
        Ok(count)
    }

    pub fn check_filename_length(&self, length: usize) -> Result<usize, GuardError> {
        if length == 0 || length > self.max_filename_length {
            return Err(GuardError::FilenameLength { length, max: self.max_filename_length });
        }
        Ok(length)
    }
}

/// An offset must point strictly inside the container.
pub fn check_offset(offset: u64, size: u64) -> Result<u64, GuardError> {
    if offset >= size {
        return Err(GuardError::OffsetOutOfRange { offset, size });
    }
    Ok(offset)
}

/// A length may be zero but never larger than the container.
pub fn check_length(length: u64, size: u64) -> Result<u64, GuardError> {
    if length > size {
        return Err(GuardError::LengthOutOfRange { length, size });
    }
    Ok(length)
}

/// `offset + length` must not run past the end.  Zero-length regions may sit
/// exactly at the end of the container.
pub fn check_region(offset: u64, length: u64, size: u64) -> Result<(), GuardError> {
    match offset.checked_add(length) {
        Some(end) if end <= size && offset <= size => Ok(()),
        _ => Err(GuardError::RegionOutOfRange { offset, length, size }),
    }
}

/// [`Limits::check_num_files`] with default limits.
pub fn check_num_files(count: u64) -> Result<u64, GuardError> {
    Limits::default().check_num_files(count)
}

/// [`Limits::check_filename_length`] with default limits.
pub fn check_filename_length(length: usize) -> Result<usize, GuardError> {
    Limits::default().check_filename_length(length)
}

#[inline]
pub fn is_valid_offset(offset: u64, size: u64) -> bool {
    check_offset(offset, size).is_ok()
}

#[inline]
pub fn is_valid_length(length: u64, size: u64) -> bool {
    check_length(length, size).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_must_be_inside() {
        assert_eq!(check_offset(0, 10), Ok(0));
        assert_eq!(check_offset(9, 10), Ok(9));
        assert!(check_offset(10, 10).is_err());
        assert!(!is_valid_offset(0, 0));
    }

    #[test]
    fn length_may_equal_size() {
        assert!(is_valid_length(10, 10));
        assert!(is_valid_length(0, 10));
        assert!(!is_valid_length(11, 10));
    }

    #[test]
    fn region_rejects_overflow() {
        assert!(check_region(4, 6, 10).is_ok());
        assert!(check_region(10, 0, 10).is_ok());
        assert!(check_region(5, 6, 10).is_err());
        assert!(check_region(u64::MAX, 2, 10).is_err());
    }

    #[test]
    fn counts_and_names_use_limits() {
        let limits = Limits { max_files: 4, max_filename_length: 8 };
        assert_eq!(limits.check_num_files(4), Ok(4));
        assert_eq!(
            limits.check_num_files(5),
            Err(GuardError::FileCount { count: 5, max: 4 })
        );
        assert!(limits.check_num_files(0).is_err());
        assert!(limits.check_filename_length(8).is_ok());
        assert!(limits.check_filename_length(9).is_err());
        assert!(check_filename_length(0).is_err());
        assert!(check_num_files(DEFAULT_MAX_FILES).is_ok());
    }
}
