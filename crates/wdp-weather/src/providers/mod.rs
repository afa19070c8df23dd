mod open_meteo;
mod weather_api;

pub use open_meteo::OpenMeteoProvider;
pub use weather_api::{WeatherApiProvider, MISSING_API_KEY_MESSAGE};

use std::collections::BTreeMap;

/// Merge the adapter's own query pairs with the configured static params.
/// Static params win on conflict.
pub(crate) fn build_query(
    base: Vec<(&str, String)>,
    params: &BTreeMap<String, String>,
) -> Vec<(String, String)> {
    let mut merged: BTreeMap<String, String> = base
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect();
    for (key, value) in params {
        merged.insert(key.clone(), value.clone());
    }
    merged.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_params_override_base_pairs() {
        let params = BTreeMap::from([
            ("timezone".to_string(), "UTC".to_string()),
            ("daily".to_string(), "weathercode".to_string()),
        ]);
        let query = build_query(
            vec![("timezone", "auto".to_string()), ("latitude", "1.000000".to_string())],
            &params,
        );
        assert_eq!(
            query,
            vec![
                ("daily".to_string(), "weathercode".to_string()),
                ("latitude".to_string(), "1.000000".to_string()),
                ("timezone".to_string(), "UTC".to_string()),
            ]
        );
    }
}
