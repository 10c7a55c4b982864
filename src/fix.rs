use serde::{Deserialize, Serialize};

/// A single GPS sample from a device. The core only reads `latitude`,
/// `longitude`, and `device_id`; the remaining fields are opaque payload
/// passed through to the store unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fix {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub satellites: Option<u32>,
    #[serde(default)]
    pub hdop: Option<f64>,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<String>,
    pub device_id: String,
}

impl Fix {
    /// `InvalidFix`: lat/lon absent or non-finite.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
            && !self.device_id.is_empty()
    }

    pub fn point(&self) -> crate::geodesy::LatLon {
        crate::geodesy::LatLon::new(self.latitude, self.longitude)
    }
}
