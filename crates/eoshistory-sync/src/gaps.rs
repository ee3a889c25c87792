//! Detection of block ranges missing from storage.

use crate::{Gap, HistoryStore, SyncResult};

/// Find maximal runs of missing block numbers.
///
/// `numbers` need not be sorted or unique. A gap `[a+1, b-1]` is reported for
/// each pair of consecutive stored numbers with `b - a > 1`. The leading gap
/// `[0, min-1]` is only reported when `ignore_zero` is false. Gaps are returned
/// highest first.
pub fn find_gaps(numbers: &[u64], ignore_zero: bool) -> Vec<Gap> {
    let mut sorted = numbers.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut gaps: Vec<Gap> = sorted
        .windows(2)
        .filter(|pair| pair[1] - pair[0] > 1)
        .map(|pair| Gap {
            start: pair[0] + 1,
            end: pair[1] - 1,
        })
        .collect();

    if !ignore_zero {
        if let Some(&lowest) = sorted.first() {
            if lowest > 0 {
                gaps.push(Gap {
                    start: 0,
                    end: lowest - 1,
                });
            }
        }
    }

    gaps.sort_by(|a, b| b.start.cmp(&a.start));
    gaps
}

/// Gaps in the blocks currently persisted by `store`.
pub async fn find_stored_gaps<S: HistoryStore + ?Sized>(
    store: &S,
    ignore_zero: bool,
) -> SyncResult<Vec<Gap>> {
    let numbers = store.block_numbers().await?;
    Ok(find_gaps(&numbers, ignore_zero))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interior_gaps_highest_first() {
        let gaps = find_gaps(&[1, 2, 3, 7, 8, 10], true);
        assert_eq!(gaps, vec![Gap { start: 9, end: 9 }, Gap { start: 4, end: 6 }]);
    }

    #[test]
    fn leading_gap_is_optional() {
        assert!(find_gaps(&[5, 6], true).is_empty());
        assert_eq!(find_gaps(&[5, 6], false), vec![Gap { start: 0, end: 4 }]);
        assert!(find_gaps(&[0, 1], false).is_empty());
    }

    #[test]
    fn unsorted_and_duplicate_input() {
        let gaps = find_gaps(&[10, 3, 3, 1], true);
        assert_eq!(gaps, vec![Gap { start: 4, end: 9 }, Gap { start: 2, end: 2 }]);
    }

    #[test]
    fn empty_or_contiguous_has_no_gaps() {
        assert!(find_gaps(&[], false).is_empty());
        assert!(find_gaps(&[100, 101, 102], true).is_empty());
    }

    #[test]
    fn gaps_cover_exactly_the_missing_numbers() {
        let stored = [2u64, 5, 6, 9, 20];
        let mut missing: Vec<u64> = find_gaps(&stored, false)
            .iter()
            .flat_map(|g| g.start..=g.end)
            .collect();
        missing.sort_unstable();
        let expected: Vec<u64> = (0..=20).filter(|n| !stored.contains(n)).collect();
        assert_eq!(missing, expected);
    }
}
