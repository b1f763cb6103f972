//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

pub const DIGEST_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
pub const DIGEST_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
pub const DIGEST_C: &str = "c0ffee00c0ffee00c0ffee00c0ffee00c0ffee00c0ffee00c0ffee00c0ffee00";

/// Write an executable shell script into `dir`.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// A stand-in for skopeo that answers each sub-command from canned output.
pub fn fake_skopeo(dir: &Path) -> PathBuf {
    let body = format!(
        r#"
case "$1" in
  copy)
    echo "Getting image source signatures" >&2
    echo "Copying blob sha256:{DIGEST_A} (1024 bytes)" >&2
    echo "Copying blob sha256:{DIGEST_B} (3072 bytes)" >&2
    echo "Copying config sha256:{DIGEST_C}" >&2
    echo "Writing manifest to image destination" >&2
    echo "Storing signatures" >&2
    exit 0
    ;;
  inspect)
    case "$2" in
      *missing*)
        echo 'time="2024-01-01T00:00:00Z" level=fatal msg="Error reading manifest latest in docker.io/library/missing: manifest unknown"' >&2
        exit 1
        ;;
      *private*)
        echo "Error: unauthorized: authentication required" >&2
        exit 1
        ;;
      *)
        echo '{{"Name":"docker.io/library/alpine","Digest":"sha256:{DIGEST_A}"}}'
        exit 0
        ;;
    esac
    ;;
  delete)
    exit 1
    ;;
  manifest-digest)
    echo "sha256:{DIGEST_A}"
    exit 0
    ;;
esac
exit 2
"#
    );
    write_script(dir, "skopeo", &body)
}

/// Check whether a process with `pid` still exists.
pub fn process_alive(pid: &str) -> bool {
    std::process::Command::new("kill")
        .args(["-0", pid])
        .stderr(std::process::Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}
