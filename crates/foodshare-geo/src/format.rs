/// Card label for a distance: whole meters below one kilometer, otherwise
/// kilometers with one decimal.
pub fn format_distance(meters: f64) -> String {
    if meters < 1000.0 {
        format!("{}m away", meters.round())
    } else {
        format!("{:.1}km away", meters / 1000.0)
    }
}

/// Bare kilometer figure with one decimal, e.g. `"2.4"`.
pub fn format_kilometers(meters: f64) -> String {
    format!("{:.1}", meters / 1000.0)
}
