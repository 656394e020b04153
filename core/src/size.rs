//! Size reconciler (spec.md §4.5): pure element-wise minimum over reported
//! client viewport sizes. No I/O, no state beyond its arguments — the
//! Session applies the result to the PTY.

/// A terminal size in (rows, cols), matching the PTY's own convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    pub rows: u16,
    pub cols: u16,
}

impl Size {
    pub const INITIAL: Size = Size { rows: 24, cols: 80 };
}

/// Element-wise minimum over all *known* client sizes. Clients that have not
/// yet reported a size are excluded (spec.md §4.5). Returns `None` when no
/// client has reported a size, in which case the caller must retain whatever
/// size is already applied to the PTY.
pub fn min_wins(sizes: impl IntoIterator<Item = Size>) -> Option<Size> {
    sizes.into_iter().fold(None, |acc, s| match acc {
        None => Some(s),
        Some(min) => Some(Size {
            rows: min.rows.min(s.rows),
            cols: min.cols.min(s.cols),
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_none() {
        assert_eq!(min_wins(Vec::<Size>::new()), None);
    }

    #[test]
    fn single_size_is_itself() {
        let s = Size { rows: 40, cols: 120 };
        assert_eq!(min_wins(vec![s]), Some(s));
    }

    #[test]
    fn takes_elementwise_minimum_not_smallest_overall() {
        // A: 80x24, B: 100x30 -> min is 80x24 (scenario 2 in spec.md §8).
        let a = Size { rows: 24, cols: 80 };
        let b = Size { rows: 30, cols: 100 };
        assert_eq!(min_wins(vec![a, b]), Some(Size { rows: 24, cols: 80 }));
    }

    #[test]
    fn elementwise_not_pairwise_min_of_whole_tuple() {
        // A: 24x100, B: 30x80 -> elementwise min is 24x80, neither input verbatim.
        let a = Size { rows: 24, cols: 100 };
        let b = Size { rows: 30, cols: 80 };
        assert_eq!(min_wins(vec![a, b]), Some(Size { rows: 24, cols: 80 }));
    }
}
