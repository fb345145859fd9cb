use chrono::{DateTime, Utc};

pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

pub fn human_age(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff = now.signed_duration_since(at);

    let plural = |n: i64, unit: &str| format!("{} {}{} ago", n, unit, if n > 1 { "s" } else { "" });

    if diff.num_days() > 365 {
        plural(diff.num_days() / 365, "year")
    } else if diff.num_days() > 30 {
        plural(diff.num_days() / 30, "month")
    } else if diff.num_days() > 0 {
        plural(diff.num_days(), "day")
    } else if diff.num_hours() > 0 {
        plural(diff.num_hours(), "hour")
    } else if diff.num_minutes() > 0 {
        plural(diff.num_minutes(), "minute")
    } else {
        "just now".to_string()
    }
}

pub fn shape(dims: &[usize]) -> String {
    let parts: Vec<String> = dims.iter().map(|d| d.to_string()).collect();
    format!("[{}]", parts.join(", "))
}
