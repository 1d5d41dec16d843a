//! Range scaler - padded axis bounds for a numeric series

use serde::{Deserialize, Serialize};

/// Relative padding applied on each side of the observed span
const PADDING_RATIO: f64 = 0.1;

/// Padding used when every value is identical, to avoid a zero-height axis
const FLAT_SERIES_PADDING: f64 = 5.0;

/// Axis bounds for display
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplayRange {
    pub min: f64,
    pub max: f64,
}

impl DisplayRange {
    /// Range shown when a series has no usable values
    pub const DEFAULT: DisplayRange = DisplayRange {
        min: 0.0,
        max: 100.0,
    };

    /// Bounds for percentage-valued series such as relative humidity
    pub const PERCENT: (f64, f64) = (0.0, 100.0);
}

impl Default for DisplayRange {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Compute the padded display range of `series`, optionally clamped into `clamp`.
///
/// Non-finite values are ignored; a series with no finite values returns
/// [`DisplayRange::DEFAULT`]. A series lying entirely outside the clamp
/// gets the whole clamp interval.
pub fn display_range(series: &[f64], clamp: Option<(f64, f64)>) -> DisplayRange {
    let mut finite = series.iter().copied().filter(|v| v.is_finite());
    let Some(first) = finite.next() else {
        return DisplayRange::DEFAULT;
    };
    let (lo, hi) = finite.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v)));

    let span = hi - lo;
    let padding = if span == 0.0 {
        FLAT_SERIES_PADDING
    } else {
        span * PADDING_RATIO
    };

    let mut range = DisplayRange {
        min: lo - padding,
        max: hi + padding,
    };
    if let Some((clamp_lo, clamp_hi)) = clamp.filter(|(lo, hi)| lo <= hi) {
        range.min = range.min.clamp(clamp_lo, clamp_hi);
        range.max = range.max.clamp(clamp_lo, clamp_hi);
        // Series entirely outside the clamp collapses to one edge
        if range.min >= range.max {
            range = DisplayRange {
                min: clamp_lo,
                max: clamp_hi,
            };
        }
    }
    range
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_range(actual: DisplayRange, min: f64, max: f64) {
        assert!(
            (actual.min - min).abs() < 1e-9 && (actual.max - max).abs() < 1e-9,
            "expected ({}, {}), got ({}, {})",
            min,
            max,
            actual.min,
            actual.max
        );
    }

    #[test]
    fn test_ten_percent_padding() {
        assert_range(display_range(&[10.0, 20.0, 30.0], None), 8.0, 32.0);
    }

    #[test]
    fn test_flat_series_uses_fixed_padding() {
        assert_range(display_range(&[15.0, 15.0, 15.0], None), 10.0, 20.0);
    }

    #[test]
    fn test_empty_series_default() {
        assert_eq!(display_range(&[], None), DisplayRange::DEFAULT);
        assert_eq!(display_range(&[f64::NAN], None), DisplayRange::DEFAULT);
    }

    #[test]
    fn test_percentage_clamp() {
        let range = display_range(&[2.0, 98.0], Some(DisplayRange::PERCENT));
        assert_range(range, 0.0, 100.0);

        let range = display_range(&[40.0, 60.0], Some(DisplayRange::PERCENT));
        assert_range(range, 38.0, 62.0);
    }

    #[test]
    fn test_out_of_bounds_series_stays_inside_clamp() {
        let range = display_range(&[150.0, 160.0], Some(DisplayRange::PERCENT));
        assert_range(range, 0.0, 100.0);

        let range = display_range(&[-10.0, -5.0], Some(DisplayRange::PERCENT));
        assert_range(range, 0.0, 100.0);

        // Partially outside keeps the in-bounds side
        let range = display_range(&[90.0, 120.0], Some(DisplayRange::PERCENT));
        assert_range(range, 87.0, 100.0);
    }

    #[test]
    fn test_order_independent() {
        assert_eq!(
            display_range(&[30.0, 10.0, 20.0], None),
            display_range(&[10.0, 20.0, 30.0], None)
        );
    }
}
