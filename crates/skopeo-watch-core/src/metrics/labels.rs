//! Label value helpers.
//!
//! Source and destination strings come straight from the caller and can be
//! arbitrarily long or unique per run. Everything that lands in a label goes
//! through [`sanitize_label`] to keep series cardinality bounded.

/// Label used when a value is empty or cannot be classified.
pub const UNKNOWN_LABEL: &str = "unknown";

/// Truncate to `max_len` characters and replace control characters.
pub fn sanitize_label(value: &str, max_len: usize) -> String {
    let cleaned: String = value
        .trim()
        .chars()
        .take(max_len)
        .map(|c| if c.is_control() { '_' } else { c })
        .collect();

    if cleaned.is_empty() {
        UNKNOWN_LABEL.to_string()
    } else {
        cleaned
    }
}

/// Classify an image reference by its skopeo transport.
///
/// Accepts both `transport:rest` and the `transport://rest` spelling.
pub fn transport_type(reference: &str) -> &'static str {
    let Some((transport, _)) = reference.split_once(':') else {
        return UNKNOWN_LABEL;
    };

    match transport {
        "docker" => "docker",
        "dir" => "dir",
        "oci" => "oci",
        "containers-storage" => "containers_storage",
        "docker-archive" => "docker_archive",
        "oci-archive" => "oci_archive",
        "docker-daemon" => "docker_daemon",
        _ => UNKNOWN_LABEL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_truncates_on_char_boundaries() {
        assert_eq!(sanitize_label("docker://alpine:latest", 9), "docker://");
        // Multi-byte characters count as one.
        assert_eq!(sanitize_label("ééééé", 3), "ééé");
    }

    #[test]
    fn test_sanitize_replaces_controls_and_handles_empty() {
        assert_eq!(sanitize_label("a\tb\nc", 64), "a_b_c");
        assert_eq!(sanitize_label("   ", 64), UNKNOWN_LABEL);
        assert_eq!(sanitize_label("", 64), UNKNOWN_LABEL);
    }

    #[test]
    fn test_transport_types() {
        assert_eq!(transport_type("docker://docker.io/library/alpine:latest"), "docker");
        assert_eq!(transport_type("dir:/tmp/alpine"), "dir");
        assert_eq!(transport_type("dir:///tmp/alpine"), "dir");
        assert_eq!(transport_type("oci:/tmp/layout:latest"), "oci");
        assert_eq!(
            transport_type("containers-storage:localhost/app:1"),
            "containers_storage"
        );
        assert_eq!(transport_type("docker-archive:/tmp/a.tar"), "docker_archive");
        assert_eq!(transport_type("oci-archive:/tmp/a.tar"), "oci_archive");
        assert_eq!(transport_type("docker-daemon:alpine:latest"), "docker_daemon");
        assert_eq!(transport_type("ftp://example.com/x"), UNKNOWN_LABEL);
        assert_eq!(transport_type("alpine"), UNKNOWN_LABEL);
    }
}
