use chrono::Duration;

/// Human readable duration used in reports, for example `1h 2m 5s`. Anything below a second is
/// shown as `0s`.
pub fn format_duration_ms(ms: u64) -> String {
    let v = Duration::milliseconds(ms.min(i64::MAX as u64) as i64);
    let parts = [
        (v.num_hours(), "h"),
        (v.num_minutes() % 60, "m"),
        (v.num_seconds() % 60, "s"),
    ];
    let formatted = parts
        .iter()
        .filter(|(value, _)| *value > 0)
        .map(|(value, unit)| format!("{value}{unit}"))
        .collect::<Vec<_>>()
        .join(" ");
    if formatted.is_empty() {
        "0s".into()
    } else {
        formatted
    }
}
