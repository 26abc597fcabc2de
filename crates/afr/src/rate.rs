//! Snapping measured frame rates onto broadcast cadences.

/// Frame duration of 24000/1001 content, µs.
pub const NTSC_FILM_FRAME_US: f64 = 1_000_000.0 * 1001.0 / 24_000.0;
/// Frame duration of 24 fps content, µs.
pub const FILM_FRAME_US: f64 = 1_000_000.0 / 24.0;
/// A measured mean duration this close to either film cadence is trusted.
pub const FILM_DURATION_TOLERANCE_US: f64 = 25.0;

/// Cadences and the half-open `[low, high)` band that snaps to each.
const SNAP_TABLE: [(f64, f64, f64); 8] = [
    (23.976, 23.95, 23.988),
    (24.0, 23.988, 24.05),
    (25.0, 24.95, 25.05),
    (29.97, 29.95, 29.985),
    (30.0, 29.985, 30.05),
    (50.0, 49.95, 50.05),
    (59.94, 59.9, 59.97),
    (60.0, 59.97, 60.05),
];

/// Standard cadences, ascending.
pub fn standard_rates() -> impl Iterator<Item = f64> {
    SNAP_TABLE.iter().map(|(rate, ..)| *rate)
}

/// Map `fps` onto the standard cadence whose band contains it; values outside
/// every band come back unchanged.
///
/// Between 23.5 and 24.5 fps a sampled mean frame duration, when given,
/// decides between 23.976 and 24 directly as long as it sits within
/// [`FILM_DURATION_TOLERANCE_US`] of one of them.
pub fn snap_to_standard_rate(fps: f64, mean_frame_duration_us: Option<f64>) -> f64 {
    if (23.5..=24.5).contains(&fps)
        && let Some(mean) = mean_frame_duration_us
    {
        let to_ntsc = (mean - NTSC_FILM_FRAME_US).abs();
        let to_film = (mean - FILM_FRAME_US).abs();
        if to_ntsc.min(to_film) <= FILM_DURATION_TOLERANCE_US {
            return if to_ntsc <= to_film { 23.976 } else { 24.0 };
        }
    }

    SNAP_TABLE
        .iter()
        .find(|(_, low, high)| (*low..*high).contains(&fps))
        .map_or(fps, |(rate, ..)| *rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_bands() {
        let cases = [
            (23.976, 23.976),
            (23.98, 23.976),
            (24.0, 24.0),
            (24.02, 24.0),
            (25.03, 25.0),
            (29.97, 29.97),
            (29.99, 30.0),
            (50.0, 50.0),
            (59.94, 59.94),
            (59.99, 60.0),
        ];
        for (input, expected) in cases {
            assert_eq!(snap_to_standard_rate(input, None), expected, "{input}");
        }
    }

    #[test]
    fn test_outside_bands_pass_through() {
        for fps in [12.5, 23.9, 24.3, 47.952, 100.0, 119.88] {
            assert_eq!(snap_to_standard_rate(fps, None), fps);
        }
    }

    #[test]
    fn test_film_disambiguation_by_duration() {
        // 23.9 is outside every band, but the sample timing says NTSC film.
        assert_eq!(snap_to_standard_rate(23.9, Some(41_700.0)), 23.976);
        assert_eq!(snap_to_standard_rate(24.3, Some(41_660.0)), 24.0);
        // Untrustworthy timing falls back to the table.
        assert_eq!(snap_to_standard_rate(23.9, Some(41_500.0)), 23.9);
        assert_eq!(snap_to_standard_rate(24.02, Some(41_000.0)), 24.0);
        // Outside the film window the duration is ignored.
        assert_eq!(snap_to_standard_rate(25.0, Some(41_708.0)), 25.0);
    }

    #[test]
    fn test_film_durations() {
        assert!((NTSC_FILM_FRAME_US - 41_708.33).abs() < 0.01);
        assert!((FILM_FRAME_US - 41_666.67).abs() < 0.01);
    }

    proptest! {
        #[test]
        fn prop_band_members_snap(index in 0usize..8, t in 0.0f64..0.99) {
            let (rate, low, high) = SNAP_TABLE[index];
            let fps = low + (high - low) * t;
            prop_assert_eq!(snap_to_standard_rate(fps, None), rate);
        }

        #[test]
        fn prop_snapping_is_idempotent(fps in 1.0f64..200.0) {
            let once = snap_to_standard_rate(fps, None);
            prop_assert_eq!(snap_to_standard_rate(once, None), once);
        }
    }
}
