// Fixed-bin histogram helpers for upload durations and file sizes.
// Bins are inclusive of the lower bound, exclusive of the upper.

const MB: i64 = 1024 * 1024;
const GB: i64 = 1024 * MB;

pub const DURATION_BUCKET_LABELS: [&str; 6] = ["0-10s", "10-30s", "30-60s", "1-2m", "2-5m", "5m+"];

pub const SIZE_BUCKET_LABELS: [&str; 6] = [
    "<10MB", "10-50MB", "50-100MB", "100-500MB", "500MB-1GB", "1GB+",
];

pub fn duration_bucket(secs: f64) -> &'static str {
    if secs < 10.0 {
        "0-10s"
    } else if secs < 30.0 {
        "10-30s"
    } else if secs < 60.0 {
        "30-60s"
    } else if secs < 120.0 {
        "1-2m"
    } else if secs < 300.0 {
        "2-5m"
    } else {
        "5m+"
    }
}

pub fn size_bucket(bytes: i64) -> &'static str {
    if bytes < 10 * MB {
        "<10MB"
    } else if bytes < 50 * MB {
        "10-50MB"
    } else if bytes < 100 * MB {
        "50-100MB"
    } else if bytes < 500 * MB {
        "100-500MB"
    } else if bytes < GB {
        "500MB-1GB"
    } else {
        "1GB+"
    }
}
