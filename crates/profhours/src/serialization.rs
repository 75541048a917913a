pub mod payload;
pub mod serializer;

use chrono::{DateTime, SecondsFormat};
use rand::Rng;

/// A 32-character lowercase hex id drawn from `rng`.
pub fn random_id<R: Rng>(rng: &mut R) -> String {
    uuid::Builder::from_random_bytes(rng.gen())
        .into_uuid()
        .simple()
        .to_string()
}

/// A 16-character lowercase hex id, as used for span ids.
pub fn random_span_id<R: Rng>(rng: &mut R) -> String {
    format!("{:016x}", rng.gen::<u64>())
}

/// Formats seconds since the Unix epoch as RFC 3339 in UTC.
pub fn rfc3339(unix_seconds: f64) -> String {
    let seconds = unix_seconds.floor();
    let nanos = (((unix_seconds - seconds) * 1e9) as u32).min(999_999_999);
    DateTime::from_timestamp(seconds as i64, nanos)
        .map(|time| time.to_rfc3339_opts(SecondsFormat::Micros, true))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn test_ids() {
        let mut rng = StdRng::seed_from_u64(0);
        let id = random_id(&mut rng);
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(random_span_id(&mut rng).len(), 16);
    }

    #[test]
    fn test_rfc3339() {
        assert_eq!(rfc3339(0.5), "1970-01-01T00:00:00.500000Z");
        assert_eq!(rfc3339(1_700_000_000.0), "2023-11-14T22:13:20.000000Z");
    }
}
