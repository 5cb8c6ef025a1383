//! Object and payload identifier rules.
//!
//! Object identifiers (oids) are opaque strings, usually the MD5 hex of a
//! source locator. They map onto the file system through a fixed three-level
//! shard: `oid[0..2]/oid[2..4]/oid[4..6]/oid`. Payload identifiers (pids) are
//! relative paths inside an object directory.

use std::path::{Component, Path, PathBuf};

use crate::error::TypeError;

/// Name of the reserved payload holding an object's own metadata.
pub const RESERVED_METADATA_PID: &str = "TF-OBJ-META";

/// Suffix of the per-payload descriptor sidecar file.
pub const PAYLOAD_META_SUFFIX: &str = ".meta";

/// Lock file name left in object directories by older writers.
pub const MANIFEST_LOCK_FILE: &str = "manifest.lock";

/// Number of leading oid characters consumed by the shard directories.
pub const SHARD_PREFIX_LEN: usize = 6;

/// Prefix and suffix of staging files written next to their final location.
pub const TEMP_FILE_PREFIX: &str = ".fasc-";
pub const TEMP_FILE_SUFFIX: &str = ".tmp";

/// Whether a file name belongs to an unfinished atomic write.
pub fn is_temp_file_name(name: &str) -> bool {
    name.starts_with(TEMP_FILE_PREFIX) && name.ends_with(TEMP_FILE_SUFFIX)
}

/// Lowercase MD5 hex digest of `data`.
pub fn md5_hex(data: impl AsRef<[u8]>) -> String {
    format!("{:x}", md5::compute(data.as_ref()))
}

/// Normalize a payload identifier: backslashes become forward slashes.
pub fn normalize_pid(pid: &str) -> String {
    pid.replace('\\', "/")
}

/// Check that `oid` can be placed in the sharded layout.
pub fn validate_oid(oid: &str) -> Result<(), TypeError> {
    let invalid = |reason: &str| TypeError::InvalidIdentifier {
        id: oid.to_string(),
        reason: reason.to_string(),
    };
    if oid.chars().count() <= SHARD_PREFIX_LEN {
        return Err(invalid("oid length must be greater than 6"));
    }
    if oid.contains(['/', '\\', '\0']) {
        return Err(invalid("oid must not contain path separators or NUL"));
    }
    let [a, b, c] = split_shard(oid);
    if [a, b, c, oid].iter().any(|seg| *seg == "." || *seg == "..") {
        return Err(invalid("oid must not shard into '.' or '..' directories"));
    }
    Ok(())
}

/// The three shard directory names for `oid`.
pub fn shard_segments(oid: &str) -> Result<[&str; 3], TypeError> {
    validate_oid(oid)?;
    Ok(split_shard(oid))
}

// Callers guarantee `oid` has more than six characters.
fn split_shard(oid: &str) -> [&str; 3] {
    // Byte offsets of the 0th, 2nd, 4th and 6th characters.
    let mut bounds = [0usize; 4];
    for (n, (idx, _)) in oid.char_indices().step_by(2).take(4).enumerate() {
        bounds[n] = idx;
    }
    [
        &oid[bounds[0]..bounds[1]],
        &oid[bounds[1]..bounds[2]],
        &oid[bounds[2]..bounds[3]],
    ]
}

/// Path of an object directory relative to the storage root.
pub fn shard_path(oid: &str) -> Result<PathBuf, TypeError> {
    let [a, b, c] = shard_segments(oid)?;
    Ok(Path::new(a).join(b).join(c).join(oid))
}

/// Normalize `pid` and check that it is a safe relative payload path.
///
/// Returns the normalized identifier.
pub fn validate_pid(pid: &str) -> Result<String, TypeError> {
    let pid = normalize_pid(pid);
    let invalid = |reason: &str| TypeError::InvalidIdentifier {
        id: pid.clone(),
        reason: reason.to_string(),
    };
    if pid.is_empty() {
        return Err(invalid("pid must not be empty"));
    }
    if pid.contains('\0') {
        return Err(invalid("pid must not contain NUL"));
    }
    if pid == RESERVED_METADATA_PID {
        return Err(invalid("pid is reserved for object metadata"));
    }
    if pid.ends_with(PAYLOAD_META_SUFFIX) {
        return Err(invalid("pid must not end in .meta"));
    }
    if pid.starts_with('/') || pid.split('/').any(|seg| seg.is_empty()) {
        return Err(invalid("pid must be a relative path without empty segments"));
    }
    if pid.split('/').any(|seg| seg == "." || seg == "..") {
        return Err(invalid("pid must not contain '.' or '..' segments"));
    }
    if Path::new(&pid).components().any(|c| !matches!(c, Component::Normal(_))) {
        return Err(invalid("pid must be a plain relative path"));
    }
    let file_name = pid.rsplit('/').next().unwrap_or(&pid);
    if file_name == MANIFEST_LOCK_FILE {
        return Err(invalid("pid collides with the manifest lock file"));
    }
    if is_temp_file_name(file_name) {
        return Err(invalid("pid collides with the staging file pattern"));
    }
    Ok(pid)
}
