//! Display metric synthesis
//!
//! The source does not always report popularity figures. Missing ones are
//! filled with bounded pseudo-random values so listings sort plausibly; the
//! numbers carry no meaning beyond that.

use chrono::Datelike;
use rand::Rng;

pub const MIN_RATING: f64 = 6.0;
pub const MAX_RATING: f64 = 9.5;

pub fn current_year() -> i32 {
    chrono::Utc::now().year()
}

/// View count band for a release year, newest titles first
fn view_band(year: Option<i32>, current_year: i32) -> (u64, u64) {
    match year.map(|y| current_year - y) {
        Some(age) if age <= 0 => (5_000, 80_000),
        Some(1) => (20_000, 250_000),
        Some(2..=4) => (50_000, 500_000),
        Some(_) => (100_000, 1_000_000),
        None => (1_000, 50_000),
    }
}

/// Synthesizes a view count within the band of the release year
pub fn synthesize_view_count<R: Rng>(year: Option<i32>, current_year: i32, rng: &mut R) -> u64 {
    let (low, high) = view_band(year, current_year);
    rng.gen_range(low..=high)
}

/// Synthesizes a rating in `[6.0, 9.5]` with one decimal
pub fn synthesize_rating<R: Rng>(rng: &mut R) -> f64 {
    let tenths = rng.gen_range((MIN_RATING * 10.0) as u32..=(MAX_RATING * 10.0) as u32);
    tenths as f64 / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_count_bands() {
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let fresh = synthesize_view_count(Some(2026), 2026, &mut rng);
            assert!((5_000..=80_000).contains(&fresh));

            let old = synthesize_view_count(Some(2001), 2026, &mut rng);
            assert!((100_000..=1_000_000).contains(&old));

            let unknown = synthesize_view_count(None, 2026, &mut rng);
            assert!((1_000..=50_000).contains(&unknown));
        }
    }

    #[test]
    fn test_rating_bounds() {
        let mut rng = rand::thread_rng();
        for _ in 0..500 {
            let rating = synthesize_rating(&mut rng);
            assert!((MIN_RATING..=MAX_RATING).contains(&rating));
        }
    }
}
