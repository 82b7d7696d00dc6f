//! Page window arithmetic shared by every backend.

use std::ops::Range;

use crate::error::{Result, ReviewError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub skip: usize,
    pub count: usize,
}

impl Window {
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Slice range into the full, newest-first record sequence.
    pub fn range(&self) -> Range<usize> {
        self.skip..self.skip + self.count
    }
}

/// Computes which records belong to `page` when `total` records exist.
///
/// Pages are 1-based. `page == 0` or `page_size == 0` is rejected rather than
/// clamped.
pub fn paginate(total: usize, page: u32, page_size: u32) -> Result<Window> {
    if page < 1 {
        return Err(ReviewError::InvalidArgument(format!(
            "page must be >= 1, got {}",
            page
        )));
    }
    if page_size < 1 {
        return Err(ReviewError::InvalidArgument(format!(
            "pageSize must be >= 1, got {}",
            page_size
        )));
    }

    let skip = (page as usize - 1).saturating_mul(page_size as usize);
    let count = (page_size as usize).min(total.saturating_sub(skip));

    Ok(Window { skip, count })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_third_page_of_twenty_five() {
        let window = paginate(25, 3, 10).unwrap();
        assert_eq!(window, Window { skip: 20, count: 5 });
        assert_eq!(window.range(), 20..25);
    }

    #[test]
    fn test_single_page_holds_everything() {
        let window = paginate(7, 1, 50).unwrap();
        assert_eq!(window, Window { skip: 0, count: 7 });
    }

    #[test]
    fn test_rejects_zero_page_and_size() {
        assert!(matches!(
            paginate(10, 0, 10),
            Err(ReviewError::InvalidArgument(_))
        ));
        assert!(matches!(
            paginate(10, 1, 0),
            Err(ReviewError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_count_zero_iff_skip_reaches_total() {
        for total in 0..40usize {
            for page in 1..12u32 {
                for page_size in 1..9u32 {
                    let w = paginate(total, page, page_size).unwrap();
                    assert_eq!(w.skip, (page as usize - 1) * page_size as usize);
                    if w.skip >= total {
                        assert_eq!(w.count, 0);
                    } else {
                        assert!(w.count > 0);
                        assert_eq!(w.count, (page_size as usize).min(total - w.skip));
                    }
                }
            }
        }
    }

    #[test]
    fn test_pages_cover_sequence_once() {
        let records: Vec<usize> = (0..23).collect();
        for page_size in 1..10u32 {
            let mut seen = Vec::new();
            let mut page = 1;
            loop {
                let w = paginate(records.len(), page, page_size).unwrap();
                if w.is_empty() {
                    break;
                }
                seen.extend_from_slice(&records[w.range()]);
                page += 1;
            }
            assert_eq!(seen, records);
        }
    }

    #[test]
    fn test_huge_page_saturates_to_empty() {
        let w = paginate(10, u32::MAX, u32::MAX).unwrap();
        assert!(w.is_empty());
    }
}
