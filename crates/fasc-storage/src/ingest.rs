//! Helpers for bringing local files into a store.
//!
//! A harvested file maps to one object whose oid is derived from the file's
//! absolute path, the host and the user, so re-harvesting the same file
//! always addresses the same object.

use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

use fasc_types::md5_hex;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::metadata::epoch_millis;
use crate::traits::{DigitalObject, Payload, Storage};

/// Object metadata key recording the file's modification time in ms.
pub const LAST_MODIFIED_KEY: &str = "lastModified";
/// Object metadata key recording the MD5 of the file's content.
pub const FILE_HASH_KEY: &str = "fileHash";

/// Outcome of [`check_harvest_file`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HarvestStatus {
    New,
    Updated,
    Unchanged,
}

/// Object identifier for a local file on this host and account.
pub fn generate_oid(path: &Path) -> StorageResult<String> {
    generate_oid_with(path, &hostname(), &username())
}

/// [`generate_oid`] with an explicit host and user.
pub fn generate_oid_with(path: &Path, hostname: &str, username: &str) -> StorageResult<String> {
    let absolute = std::path::absolute(path).map_err(StorageError::io("resolve path", path))?;
    let unix = absolute.to_string_lossy().replace('\\', "/");
    Ok(md5_hex(format!("{unix}{hostname}{username}")))
}

/// Payload identifier for a local file: its file name.
pub fn generate_pid(path: &Path) -> StorageResult<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| StorageError::InvalidIdentifier {
            id: path.display().to_string(),
            reason: "path has no UTF-8 file name".into(),
        })
}

fn hostname() -> String {
    ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .chain(fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .find(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

fn username() -> String {
    ["USER", "USERNAME", "LOGNAME"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|u| !u.is_empty())
        .unwrap_or_else(|| "anonymous".to_string())
}

/// Fetch the object, creating it first if it does not exist.
pub fn get_or_create_object<S: Storage>(storage: &S, oid: &str) -> StorageResult<S::Object> {
    match storage.create_object(oid) {
        Ok(object) => Ok(object),
        Err(e) if e.is_already_exists() => storage.get_object(oid),
        Err(e) => Err(e),
    }
}

/// Store `content` under `pid`, replacing any existing payload.
pub fn create_or_update_payload<'a, O: DigitalObject, R: Read>(
    object: &'a mut O,
    pid: &str,
    content: R,
) -> StorageResult<&'a mut O::Payload> {
    if object.has_payload(pid) {
        object.update_payload(pid, content)
    } else {
        object.create_stored_payload(pid, content)
    }
}

/// Copy a local file into its object. The object is closed before it is
/// returned.
pub fn store_file<S: Storage>(storage: &S, path: &Path) -> StorageResult<S::Object> {
    let oid = generate_oid(path)?;
    let pid = generate_pid(path)?;
    let mut object = get_or_create_object(storage, &oid)?;
    let file = File::open(path).map_err(StorageError::io("open harvest file", path))?;
    create_or_update_payload(&mut object, &pid, file)?.close()?;
    object.close()?;
    debug!(oid = %oid, pid = %pid, path = %path.display(), "file stored");
    Ok(object)
}

/// Attach a local file to its object by reference.
pub fn link_file<S: Storage>(storage: &S, path: &Path) -> StorageResult<S::Object> {
    let oid = generate_oid(path)?;
    let pid = generate_pid(path)?;
    let target = std::path::absolute(path).map_err(StorageError::io("resolve path", path))?;
    let mut object = get_or_create_object(storage, &oid)?;
    if object.has_payload(&pid) {
        object.get_payload(&pid)?.close()?;
    } else {
        object.create_linked_payload(&pid, &target)?.close()?;
    }
    object.close()?;
    debug!(oid = %oid, pid = %pid, target = %target.display(), "file linked");
    Ok(object)
}

/// Bring a harvested file up to date in storage.
///
/// The recorded modification time is checked first; only when it differs is
/// the content hashed and compared. New and changed files are stored and
/// their modification time and hash recorded in the object metadata.
pub fn check_harvest_file<S: Storage>(storage: &S, path: &Path) -> StorageResult<HarvestStatus> {
    let oid = generate_oid(path)?;
    let modified = fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(StorageError::io("stat harvest file", path))?;
    let last_mod = epoch_millis(modified).to_string();

    let mut object = match storage.get_object(&oid) {
        Ok(object) => object,
        Err(e) if e.is_not_found() => {
            let hash = hash_file(path)?;
            let mut object = store_file(storage, path)?;
            let meta = object.metadata()?;
            meta.set(LAST_MODIFIED_KEY, last_mod);
            meta.set(FILE_HASH_KEY, hash);
            object.close()?;
            info!(oid = %oid, path = %path.display(), "harvested new file");
            return Ok(HarvestStatus::New);
        }
        Err(e) => return Err(e),
    };

    let meta = object.metadata()?;
    if meta.get(LAST_MODIFIED_KEY) == Some(last_mod.as_str()) {
        return Ok(HarvestStatus::Unchanged);
    }
    let hash = hash_file(path)?;
    if meta.get(FILE_HASH_KEY) == Some(hash.as_str()) {
        meta.set(LAST_MODIFIED_KEY, last_mod);
        object.close()?;
        debug!(oid = %oid, "modification time changed but content did not");
        return Ok(HarvestStatus::Unchanged);
    }

    let pid = match object.source_id() {
        Some(source) => source.to_string(),
        None => generate_pid(path)?,
    };
    let file = File::open(path).map_err(StorageError::io("open harvest file", path))?;
    create_or_update_payload(&mut object, &pid, file)?.close()?;
    let meta = object.metadata()?;
    meta.set(LAST_MODIFIED_KEY, last_mod);
    meta.set(FILE_HASH_KEY, hash);
    object.close()?;
    info!(oid = %oid, pid = %pid, path = %path.display(), "harvested updated file");
    Ok(HarvestStatus::Updated)
}

fn hash_file(path: &Path) -> StorageResult<String> {
    let bytes = fs::read(path).map_err(StorageError::io("hash harvest file", path))?;
    Ok(md5_hex(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::RamStorage;

    #[test]
    fn oid_hashes_path_host_and_user() {
        let oid = generate_oid_with(Path::new("/Users/fascinator/Documents/sample.odt"), "", "").unwrap();
        assert_eq!(oid, "11b498d057256a0b602fa0e7c4073fc3");

        let with_host = generate_oid_with(Path::new("/a/b.txt"), "host", "user").unwrap();
        assert_eq!(with_host, md5_hex("/a/b.txthostuser"));
    }

    #[test]
    fn pid_is_file_name() {
        assert_eq!(generate_pid(Path::new("/tmp/docs/sample.odt")).unwrap(), "sample.odt");
        assert!(generate_pid(Path::new("/")).is_err());
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let storage = RamStorage::new();
        let mut first = get_or_create_object(&storage, "abcdefg1").unwrap();
        first.create_stored_payload("DC", &b"x"[..]).unwrap();
        first.close().unwrap();

        let second = get_or_create_object(&storage, "abcdefg1").unwrap();
        assert!(second.has_payload("DC"));
    }

    #[test]
    fn create_or_update_switches_on_presence() {
        let storage = RamStorage::new();
        let mut obj = storage.create_object("abcdefg1").unwrap();
        create_or_update_payload(&mut obj, "DC", &b"one"[..]).unwrap();
        create_or_update_payload(&mut obj, "DC", &b"two"[..]).unwrap();
        assert_eq!(obj.get_payload("DC").unwrap().read_to_vec().unwrap(), b"two");
        assert_eq!(obj.payload_id_list().len(), 1);
    }

    #[test]
    fn harvest_new_unchanged_updated() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("notes.txt");
        fs::write(&file, b"first").unwrap();
        let storage = RamStorage::new();

        assert_eq!(check_harvest_file(&storage, &file).unwrap(), HarvestStatus::New);
        assert_eq!(check_harvest_file(&storage, &file).unwrap(), HarvestStatus::Unchanged);

        fs::write(&file, b"second version").unwrap();
        let later = std::time::SystemTime::now() + std::time::Duration::from_secs(5);
        File::options()
            .write(true)
            .open(&file)
            .unwrap()
            .set_modified(later)
            .unwrap();
        assert_eq!(check_harvest_file(&storage, &file).unwrap(), HarvestStatus::Updated);

        let oid = generate_oid(&file).unwrap();
        let mut obj = storage.get_object(&oid).unwrap();
        assert_eq!(obj.get_payload("notes.txt").unwrap().read_to_vec().unwrap(), b"second version");
        assert_eq!(
            obj.metadata().unwrap().get(FILE_HASH_KEY),
            Some(md5_hex("second version").as_str())
        );
    }

    #[test]
    fn touched_file_with_same_content_is_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("same.txt");
        fs::write(&file, b"content").unwrap();
        let storage = RamStorage::new();
        check_harvest_file(&storage, &file).unwrap();

        let later = std::time::SystemTime::now() + std::time::Duration::from_secs(5);
        File::options().write(true).open(&file).unwrap().set_modified(later).unwrap();
        assert_eq!(check_harvest_file(&storage, &file).unwrap(), HarvestStatus::Unchanged);

        let oid = generate_oid(&file).unwrap();
        let mut obj = storage.get_object(&oid).unwrap();
        let recorded = epoch_millis(fs::metadata(&file).unwrap().modified().unwrap());
        assert_eq!(
            obj.metadata().unwrap().get(LAST_MODIFIED_KEY),
            Some(recorded.to_string().as_str())
        );
    }

    #[test]
    fn link_file_creates_linked_payload() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("big.bin");
        fs::write(&file, b"external").unwrap();
        let storage = RamStorage::new();

        let mut obj = link_file(&storage, &file).unwrap();
        let payload = obj.get_payload("big.bin").unwrap();
        assert!(payload.is_linked());
        assert_eq!(payload.read_to_vec().unwrap(), b"external");
    }
}
