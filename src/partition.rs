//! Window Planning
//!
//! Converts (content length, parallelism, chunk size limit) into the
//! ordered byte windows the orchestrator opens ranged connections for.

/// Plans the initial byte windows of a parallel download.
///
/// Each of the `parallelism` slots gets a slice of `content_length / n`
/// bytes; the last slot absorbs the remainder. A positive
/// `chunk_size_limit` caps every window, leaving the rest of the content
/// untargeted for later scheduling. Windows are inclusive `(begin, end)`
/// pairs, ascending and disjoint; a window that would end before it
/// begins is dropped.
pub(crate) fn plan(content_length: i64, parallelism: u32, chunk_size_limit: i64) -> Vec<(i64, i64)> {
    let n = i64::from(parallelism);
    let mut windows = Vec::with_capacity(parallelism as usize);
    let mut end: i64 = -1;

    for i in 0..n {
        let begin = end + 1;
        let slice = if i == n - 1 {
            content_length - begin
        } else {
            content_length / n
        };
        end = if chunk_size_limit > 0 {
            begin + chunk_size_limit.min(slice) - 1
        } else {
            begin + slice - 1
        };
        if end >= begin {
            windows.push((begin, end));
        }
    }

    windows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_even_split_without_limit() {
        let windows = plan(1_048_576, 4, 0);
        assert_eq!(
            windows,
            vec![
                (0, 262_143),
                (262_144, 524_287),
                (524_288, 786_431),
                (786_432, 1_048_575),
            ]
        );
    }

    #[test]
    fn test_last_window_absorbs_remainder() {
        let windows = plan(10, 3, 0);
        assert_eq!(windows, vec![(0, 2), (3, 5), (6, 9)]);
        let covered: i64 = windows.iter().map(|(b, e)| e - b + 1).sum();
        assert_eq!(covered, 10);
    }

    #[test]
    fn test_chunk_limit_caps_windows() {
        let windows = plan(1_000_000, 4, 100_000);
        assert_eq!(
            windows,
            vec![
                (0, 99_999),
                (100_000, 199_999),
                (200_000, 299_999),
                (300_000, 399_999),
            ]
        );
    }

    #[test]
    fn test_chunk_limit_larger_than_slice_is_inert() {
        assert_eq!(plan(1_000_000, 4, 300_000), plan(1_000_000, 4, 0));
    }

    #[test]
    fn test_degenerate_windows_are_dropped() {
        // Slices round down to zero for all but the last slot.
        assert_eq!(plan(3, 4, 0), vec![(0, 2)]);
    }

    #[test]
    fn test_windows_are_disjoint_and_ascending() {
        let windows = plan(999_999, 6, 0);
        for pair in windows.windows(2) {
            assert_eq!(pair[1].0, pair[0].1 + 1);
        }
        assert_eq!(windows.last().map(|w| w.1), Some(999_998));
    }
}
