//! Gap inference for directories that only record offsets.
//!
//! Each member is assumed to run until the next member in *offset order*
//! (not directory order); the highest one runs to the end of the container.
//! Descriptors call [`calculate_gap_lengths`] explicitly after building
//! offset-only resources.
//!
//! Duplicate offsets are tolerated: every resource sharing an offset gets
//! length 0, because the next sorted offset after its first occurrence is
//! itself.

use crate::resource::Resource;

/// Length of each offset's region, in the order the offsets were given.
///
/// ```
/// use arcprobe::sizing::gap_lengths;
/// assert_eq!(gap_lengths(&[100, 150, 500], 600), vec![50, 350, 100]);
/// assert_eq!(gap_lengths(&[500, 100, 150], 600), vec![100, 50, 350]);
/// ```
pub fn gap_lengths(offsets: &[u64], container_size: u64) -> Vec<u64> {
    let mut sorted = offsets.to_vec();
    sorted.sort_unstable();

    offsets
        .iter()
        .map(|&offset| {
            // First occurrence, so duplicates see themselves as "next".
            let idx = sorted.partition_point(|&o| o < offset);
            let next = match sorted.get(idx + 1) {
                Some(&n) => n,
                None     => container_size,
            };
            next.saturating_sub(offset)
        })
        .collect()
}

/// Fill in every resource's length from the gap to its successor.
///
/// Resources whose decompressed length was never set explicitly follow the
/// new stored length.
pub fn calculate_gap_lengths(resources: &mut [Resource], container_size: u64) {
    let offsets: Vec<u64> = resources.iter().map(Resource::offset).collect();
    for (r, len) in resources.iter_mut().zip(gap_lengths(&offsets, container_size)) {
        r.set_length(len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn canonical_example() {
        assert_eq!(gap_lengths(&[100, 150, 500], 600), [50, 350, 100]);
    }

    #[test]
    fn reattaches_by_offset_not_position() {
        let mut rs = vec![
            Resource::new("a", "c", 500, 0),
            Resource::new("a", "a", 100, 0),
            Resource::new("a", "b", 150, 0),
        ];
        calculate_gap_lengths(&mut rs, 600);
        let got: Vec<(&str, u64)> = rs.iter().map(|r| (r.name(), r.length())).collect();
        assert_eq!(got, [("c", 100), ("a", 50), ("b", 350)]);
    }

    #[test]
    fn duplicates_get_zero() {
        assert_eq!(gap_lengths(&[10, 10, 40], 100), [0, 0, 60]);
        assert_eq!(gap_lengths(&[40, 40], 100), [0, 0]);
    }

    #[test]
    fn explicit_decompressed_length_survives() {
        let mut rs = vec![
            Resource::new("a", "x", 0, 0).with_decompressed_length(99),
            Resource::new("a", "y", 10, 0),
        ];
        calculate_gap_lengths(&mut rs, 30);
        assert_eq!(rs[0].length(), 10);
        assert_eq!(rs[0].decompressed_length(), 99);
        assert_eq!(rs[1].decompressed_length(), 20);
    }

    #[test]
    fn offset_past_end_saturates() {
        assert_eq!(gap_lengths(&[0, 700], 600), [700, 0]);
        assert!(gap_lengths(&[], 10).is_empty());
    }

    proptest! {
        #[test]
        fn unique_offsets_tile_the_tail(mut offsets in proptest::collection::btree_set(0u64..10_000, 1..64)
            .prop_map(|s| s.into_iter().collect::<Vec<_>>()), size_extra in 0u64..1000)
        {
            let size = offsets.iter().max().copied().unwrap_or(0) + size_extra;
            offsets.reverse();
            let lengths = gap_lengths(&offsets, size);
            let min = offsets.iter().min().copied().unwrap_or(0);
            prop_assert_eq!(lengths.iter().sum::<u64>(), size - min);
            for (o, l) in offsets.iter().zip(&lengths) {
                prop_assert!(o + l <= size);
            }
        }
    }
}
