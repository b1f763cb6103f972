//! Human-readable progress lines.

use skopeo_watch_core::ProgressUpdate;

const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];

/// Format a byte count with binary units.
pub fn format_bytes(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// One line describing `update`.
pub fn format_update(update: &ProgressUpdate) -> String {
    let prefix = format!("[{:>5.1}%]", update.percentage);

    if let Some(error) = &update.snapshot.error {
        return format!("{prefix} error: {error}");
    }
    if update.snapshot.completed {
        return format!("{prefix} completed");
    }

    let mut line = format!("{prefix} {}", update.step());
    if let Some(blob) = &update.current_blob {
        line.push_str(&format!(" sha256:{}", blob.short_digest()));
        if let Some(size) = blob.size() {
            line.push_str(&format!(" ({})", format_bytes(size)));
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use skopeo_watch_core::{OperationKind, ProgressParser};

    const DIGEST: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1024), "1.0 KiB");
        assert_eq!(format_bytes(3 * 1024 * 1024 + 512 * 1024), "3.5 MiB");
    }

    #[test]
    fn test_format_blob_update() {
        let mut parser = ProgressParser::new(OperationKind::Copy);
        let update = parser
            .parse_line(&format!("Copying blob sha256:{DIGEST} (2048 bytes)"))
            .unwrap();
        assert_eq!(
            format_update(&update),
            "[ 45.0%] copying_blob sha256:0123456789ab (2.0 KiB)"
        );
    }

    #[test]
    fn test_format_terminal_updates() {
        let mut parser = ProgressParser::new(OperationKind::Copy);
        parser.mark_completed();
        assert_eq!(format_update(&parser.update()), "[100.0%] completed");

        let mut parser = ProgressParser::new(OperationKind::Copy);
        parser.parse_line("Error: manifest unknown").unwrap();
        assert_eq!(format_update(&parser.update()), "[  0.0%] error: manifest unknown");
    }
}
