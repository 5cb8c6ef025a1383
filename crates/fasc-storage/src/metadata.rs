//! Object metadata conventions shared by every backend.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{SecondsFormat, Utc};
use fasc_types::{Properties, RESERVED_METADATA_PID};

use crate::error::{StorageError, StorageResult};

/// Label given to the reserved metadata payload.
pub const METADATA_LABEL: &str = "The Fascinator Indexer Metadata";

pub const OBJECT_ID_KEY: &str = "objectId";
pub const DATE_CREATED_KEY: &str = "date_object_created";
/// Added on load; names the payload the properties came from.
pub const META_PID_KEY: &str = "metaPid";

/// Header comment of metadata files.
pub(crate) const METADATA_COMMENT: &str = "Object Metadata";

/// Parse a metadata file and tag it with [`META_PID_KEY`].
pub(crate) fn parse_metadata(bytes: &[u8], path: &Path) -> StorageResult<Properties> {
    let mut props = Properties::parse_bytes(bytes).map_err(|e| StorageError::CorruptMetadata {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    props.set(META_PID_KEY, RESERVED_METADATA_PID);
    Ok(props)
}

/// Fill in the keys every persisted object carries, keeping existing values.
pub(crate) fn finalize_metadata(props: &mut Properties, oid: &str) {
    if !props.contains_key(DATE_CREATED_KEY) {
        props.set(DATE_CREATED_KEY, Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true));
    }
    if !props.contains_key(OBJECT_ID_KEY) {
        props.set(OBJECT_ID_KEY, oid);
    }
}

pub(crate) fn render_metadata(props: &Properties) -> String {
    props.to_file_string(&[METADATA_COMMENT])
}

/// Link files hold a single path; anything bigger is suspicious.
pub(crate) const LINK_SIZE_LIMIT: u64 = 2000;

/// Content stored for a linked payload: the UTF-8 target path.
pub(crate) fn link_bytes(link_path: &Path) -> StorageResult<Vec<u8>> {
    let text = link_path.to_str().ok_or_else(|| StorageError::InvalidIdentifier {
        id: link_path.display().to_string(),
        reason: "link path is not valid UTF-8".into(),
    })?;
    if text.is_empty() {
        return Err(StorageError::InvalidIdentifier {
            id: String::new(),
            reason: "link path must not be empty".into(),
        });
    }
    Ok(text.as_bytes().to_vec())
}

/// Recover the target path from link content. `origin` names the link file
/// in errors.
pub(crate) fn parse_link(bytes: &[u8], origin: &Path) -> StorageResult<PathBuf> {
    let corrupt = |reason: &str| StorageError::CorruptMetadata {
        path: origin.to_path_buf(),
        reason: reason.to_string(),
    };
    let text = std::str::from_utf8(bytes).map_err(|_| corrupt("link target is not valid UTF-8"))?;
    let target = text.trim_end_matches(['\r', '\n']);
    if target.is_empty() {
        return Err(corrupt("link target is empty"));
    }
    Ok(PathBuf::from(target))
}

/// Milliseconds since the Unix epoch, negative before it.
pub(crate) fn epoch_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_millis()).unwrap_or(i64::MAX),
        Err(e) => -i64::try_from(e.duration().as_millis()).unwrap_or(i64::MAX),
    }
}
