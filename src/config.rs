/// Tuning knobs for the matcher, loaded from the environment with the
/// defaults from the external interface contract.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    pub match_threshold_meters: f64,
    pub required_consecutive_matches: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            match_threshold_meters: 30.0,
            required_consecutive_matches: 5,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            match_threshold_meters: std::env::var("GPS_MATCH_THRESHOLD_METERS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.match_threshold_meters),
            required_consecutive_matches: std::env::var("REQUIRED_CONSECUTIVE_MATCHES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.required_consecutive_matches),
        }
    }
}
