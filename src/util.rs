use std::time::{SystemTime, UNIX_EPOCH};

/// Round to a fixed number of decimal places.
pub fn round_to(value: f32, decimals: i32) -> f32 {
    let scale = 10f32.powi(decimals);
    (value * scale).round() / scale
}

/// Wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_half_away_from_zero() {
        assert_eq!(round_to(0.12345, 3), 0.123);
        assert_eq!(round_to(0.1235, 2), 0.12);
        assert_eq!(round_to(220.56, 1), 220.6);
        assert_eq!(round_to(-1.25, 1), -1.3);
    }
}
