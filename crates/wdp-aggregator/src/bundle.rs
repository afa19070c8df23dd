use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use wdp_weather::ProviderPayload;

/// Merged forecast from every provider that answered.
///
/// Immutable once built; shared between the cache and all waiters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastBundle {
    pub providers: BTreeMap<String, ProviderPayload>,
    /// RFC3339 UTC instant the bundle was assembled
    pub timestamp: String,
}

impl ForecastBundle {
    pub fn new(providers: BTreeMap<String, ProviderPayload>) -> Self {
        Self {
            providers,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }

    pub fn provider_names(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }
}

/// Canonical cache and coalescing key for a coordinate pair
pub fn coordinate_key(lat: f64, lon: f64) -> String {
    format!("{lat:.6},{lon:.6}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinate_key_rounds_to_six_places() {
        assert_eq!(coordinate_key(52.52, 13.41), "52.520000,13.410000");
        assert_eq!(coordinate_key(40.7128, -74.006), "40.712800,-74.006000");
        assert_eq!(coordinate_key(1.00000049, 2.0), "1.000000,2.000000");
    }

    #[test]
    fn test_identical_doubles_share_a_key() {
        let lat = 0.1 + 0.2;
        assert_eq!(coordinate_key(lat, 0.0), coordinate_key(0.1 + 0.2, 0.0));
    }

    #[test]
    fn test_timestamp_is_rfc3339_utc() {
        let bundle = ForecastBundle::new(BTreeMap::new());
        assert!(bundle.timestamp.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&bundle.timestamp).is_ok());
    }
}
