//! File-system backed storage.
//!
//! Objects live under `<root>/xx/yy/zz/<oid>/`, where the shard directories
//! are the first six characters of the oid taken in pairs. Each object
//! directory holds a `TF-OBJ-META` property file and one data file per
//! payload, with a `<pid>.meta` descriptor sidecar beside it.

mod object;
mod payload;

pub use object::FileSystemDigitalObject;
pub use payload::FileSystemPayload;

use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use fasc_types::{shard_path, Properties, RESERVED_METADATA_PID, TEMP_FILE_PREFIX, TEMP_FILE_SUFFIX};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::StorageConfig;
use crate::error::{StorageError, StorageResult};
use crate::metadata::OBJECT_ID_KEY;
use crate::traits::{DigitalObject, Storage};

/// Depth of a metadata file below the root: three shards, the object, the file.
const METADATA_DEPTH: usize = 5;

/// Sharded object storage rooted at one directory.
///
/// The object id list is scanned from disk once per process and then kept
/// up to date by this instance's own creates and removes.
pub struct FileSystemStorage {
    root: PathBuf,
    object_ids: RwLock<Option<BTreeSet<String>>>,
}

impl FileSystemStorage {
    /// Open the storage described by `config`, creating its root if needed.
    pub fn new(config: &StorageConfig) -> StorageResult<Self> {
        Self::with_root(config.root())
    }

    pub fn with_root(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(StorageError::io("create storage root", &root))?;
        info!(root = %root.display(), "file-system storage opened");
        Ok(Self {
            root,
            object_ids: RwLock::new(None),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory an object with this oid occupies, whether or not it exists.
    pub fn object_path(&self, oid: &str) -> StorageResult<PathBuf> {
        Ok(self.root.join(shard_path(oid)?))
    }

    /// Rescan the root and replace the cached id list.
    pub fn refresh_object_id_list(&self) -> BTreeSet<String> {
        let ids = self.scan_object_ids();
        *self.object_ids.write().expect("lock poisoned") = Some(ids.clone());
        ids
    }

    fn scan_object_ids(&self) -> BTreeSet<String> {
        let mut ids = BTreeSet::new();
        let walker = WalkDir::new(&self.root)
            .min_depth(METADATA_DEPTH)
            .max_depth(METADATA_DEPTH);
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable storage entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() || entry.file_name() != RESERVED_METADATA_PID {
                continue;
            }
            match read_object_id(entry.path()) {
                Ok(oid) => {
                    ids.insert(oid);
                }
                Err(e) => warn!(path = %entry.path().display(), error = %e, "skipping unreadable object metadata"),
            }
        }
        debug!(count = ids.len(), "object ids scanned");
        ids
    }

    fn update_cache(&self, f: impl FnOnce(&mut BTreeSet<String>)) {
        if let Some(ids) = self.object_ids.write().expect("lock poisoned").as_mut() {
            f(ids);
        }
    }
}

/// The oid recorded in a metadata file, falling back to its directory name.
fn read_object_id(path: &Path) -> StorageResult<String> {
    let bytes = fs::read(path).map_err(StorageError::io("read object metadata", path))?;
    let props = Properties::parse_bytes(&bytes).map_err(|e| StorageError::CorruptMetadata {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    if let Some(oid) = props.get(OBJECT_ID_KEY) {
        return Ok(oid.to_string());
    }
    let dir_name = path
        .parent()
        .and_then(Path::file_name)
        .and_then(|n| n.to_str())
        .ok_or_else(|| StorageError::CorruptMetadata {
            path: path.to_path_buf(),
            reason: "no objectId and no usable directory name".into(),
        })?;
    warn!(path = %path.display(), "metadata lacks objectId; using directory name");
    Ok(dir_name.to_string())
}

impl Storage for FileSystemStorage {
    type Object = FileSystemDigitalObject;

    fn create_object(&self, oid: &str) -> StorageResult<FileSystemDigitalObject> {
        let dir = self.object_path(oid)?;
        if dir.exists() {
            return Err(StorageError::ObjectExists { oid: oid.to_string() });
        }
        let object = match FileSystemDigitalObject::create(dir.clone(), oid) {
            Ok(object) => object,
            Err(e) => {
                if let Some(shard) = dir.parent() {
                    prune_empty_dirs(shard, &self.root);
                }
                return Err(e);
            }
        };
        self.update_cache(|ids| {
            ids.insert(oid.to_string());
        });
        info!(oid, "object created");
        Ok(object)
    }

    fn get_object(&self, oid: &str) -> StorageResult<FileSystemDigitalObject> {
        let dir = self.object_path(oid)?;
        if !dir.is_dir() {
            return Err(StorageError::ObjectNotFound { oid: oid.to_string() });
        }
        Ok(FileSystemDigitalObject::open(dir, oid))
    }

    fn remove_object(&self, oid: &str) -> StorageResult<()> {
        let dir = self.object_path(oid)?;
        if !dir.is_dir() {
            return Err(StorageError::ObjectNotFound { oid: oid.to_string() });
        }

        let mut object = FileSystemDigitalObject::open(dir.clone(), oid);
        for pid in object.payload_id_list() {
            if let Err(e) = object.remove_payload(&pid) {
                warn!(oid, pid = %pid, error = %e, "failed to remove payload");
            }
        }
        if let Err(e) = object.close() {
            warn!(oid, error = %e, "failed to close object before removal");
        }

        fs::remove_dir_all(&dir).map_err(StorageError::io("remove object directory", &dir))?;
        if let Some(parent) = dir.parent() {
            prune_empty_dirs(parent, &self.root);
        }
        self.update_cache(|ids| {
            ids.remove(oid);
        });
        info!(oid, "object removed");
        Ok(())
    }

    fn object_id_list(&self) -> BTreeSet<String> {
        if let Some(ids) = self.object_ids.read().expect("lock poisoned").as_ref() {
            return ids.clone();
        }
        self.refresh_object_id_list()
    }
}

impl std::fmt::Debug for FileSystemStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSystemStorage")
            .field("root", &self.root)
            .finish()
    }
}

/// Write `content` to `dest` through a staging file in the same directory.
///
/// With `overwrite` unset the final rename fails if `dest` already exists.
pub(crate) fn write_atomic<R: Read>(dest: &Path, mut content: R, overwrite: bool) -> StorageResult<u64> {
    let parent = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(StorageError::io("create directory", parent))?;

    let mut staged = tempfile::Builder::new()
        .prefix(TEMP_FILE_PREFIX)
        .suffix(TEMP_FILE_SUFFIX)
        .tempfile_in(parent)
        .map_err(StorageError::io("create staging file", parent))?;
    let written = io::copy(&mut content, &mut staged).map_err(StorageError::io("write", dest))?;
    staged.flush().map_err(StorageError::io("flush", dest))?;
    staged
        .as_file()
        .sync_all()
        .map_err(StorageError::io("sync", dest))?;

    let persisted = if overwrite {
        staged.persist(dest)
    } else {
        staged.persist_noclobber(dest)
    };
    persisted.map_err(|e| StorageError::io("persist", dest)(e.error))?;
    Ok(written)
}

/// Whether `err` reports that a no-clobber write hit an existing file.
pub(crate) fn is_exists_error(err: &StorageError) -> bool {
    matches!(err, StorageError::Io { source, .. } if source.kind() == io::ErrorKind::AlreadyExists)
}

/// Remove a file, treating an already missing file as success.
pub(crate) fn remove_if_exists(path: &Path) -> StorageResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::io("remove file", path)(e)),
    }
}

/// Remove empty directories from `start` upwards, stopping below `stop`.
pub(crate) fn prune_empty_dirs(start: &Path, stop: &Path) {
    for dir in start.ancestors() {
        if dir == stop || !dir.starts_with(stop) {
            break;
        }
        if fs::remove_dir(dir).is_err() {
            break;
        }
        debug!(dir = %dir.display(), "pruned empty directory");
    }
}
