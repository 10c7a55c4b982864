//! Convenience helper for the upload boundary. Not called by any
//! matching/arbitration path — the external HTTP layer owns CSV parsing;
//! this just saves it from reimplementing the header-sniffing logic.

/// Parses a header row containing at least `lat`/`lon` columns (in any
/// order, any casing) and returns the well-formed `(lat, lon)` pairs from
/// the remaining rows. Malformed rows — wrong column count, non-numeric
/// fields — are skipped rather than aborting the whole upload.
pub fn parse_track_csv(text: &str) -> Vec<(f64, f64)> {
    let mut lines = text.lines();
    let header = match lines.next() {
        Some(h) => h,
        None => return Vec::new(),
    };

    let columns: Vec<String> = header.split(',').map(|c| c.trim().to_lowercase()).collect();
    let lat_idx = columns.iter().position(|c| c == "lat" || c == "latitude");
    let lon_idx = columns.iter().position(|c| c == "lon" || c == "longitude");

    let (lat_idx, lon_idx) = match (lat_idx, lon_idx) {
        (Some(a), Some(b)) => (a, b),
        _ => return Vec::new(),
    };

    lines
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(',').collect();
            let lat = fields.get(lat_idx)?.trim().parse::<f64>().ok()?;
            let lon = fields.get(lon_idx)?.trim().parse::<f64>().ok()?;
            Some((lat, lon))
        })
        .collect()
}
