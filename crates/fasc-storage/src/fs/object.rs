use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use fasc_types::{
    is_temp_file_name, normalize_pid, validate_pid, PayloadType, Properties, MANIFEST_LOCK_FILE,
    PAYLOAD_META_SUFFIX, RESERVED_METADATA_PID,
};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{StorageError, StorageResult};
use crate::fs::payload::FileSystemPayload;
use crate::fs::{is_exists_error, prune_empty_dirs, remove_if_exists, write_atomic};
use crate::metadata::{
    finalize_metadata, link_bytes, parse_metadata, render_metadata, META_PID_KEY, OBJECT_ID_KEY,
};
use crate::traits::{DigitalObject, Payload};

/// An object stored as a directory of payload files.
///
/// The manifest is built from the directory on open. Payload files written by
/// other processes after that are picked up on first lookup.
#[derive(Debug)]
pub struct FileSystemDigitalObject {
    id: String,
    home: PathBuf,
    source_id: Option<String>,
    manifest: HashMap<String, FileSystemPayload>,
    metadata: Option<Properties>,
}

impl FileSystemDigitalObject {
    /// Lay out a new object directory with its metadata file.
    pub(crate) fn create(home: PathBuf, oid: &str) -> StorageResult<Self> {
        let mut props = Properties::new();
        props.set(OBJECT_ID_KEY, oid);
        let rendered = render_metadata(&props);
        Self::create_with_metadata(home, oid, rendered.as_bytes())
    }

    /// Lay out the object directory and write `meta` as its metadata file.
    ///
    /// On failure the directory is removed again, unless another writer got
    /// there first.
    fn create_with_metadata<R: Read>(home: PathBuf, oid: &str, meta: R) -> StorageResult<Self> {
        fs::create_dir_all(&home).map_err(StorageError::io("create object directory", &home))?;
        let meta_path = home.join(RESERVED_METADATA_PID);
        if let Err(e) = write_atomic(&meta_path, meta, false) {
            if is_exists_error(&e) {
                return Err(StorageError::ObjectExists { oid: oid.to_string() });
            }
            if let Err(cleanup) = fs::remove_dir_all(&home) {
                warn!(oid, error = %cleanup, "failed to remove partial object directory");
            }
            return Err(e);
        }
        Ok(Self::empty(home, oid))
    }

    /// Load an existing object directory.
    pub(crate) fn open(home: PathBuf, oid: &str) -> Self {
        let mut object = Self::empty(home, oid);
        object.build_manifest();
        object
    }

    fn empty(home: PathBuf, oid: &str) -> Self {
        Self {
            id: oid.to_string(),
            home,
            source_id: None,
            manifest: HashMap::new(),
            metadata: None,
        }
    }

    /// Directory holding this object's files.
    pub fn path(&self) -> &Path {
        &self.home
    }

    fn metadata_file(&self) -> PathBuf {
        self.home.join(RESERVED_METADATA_PID)
    }

    fn payload_file(&self, pid: &str) -> PathBuf {
        pid.split('/').fold(self.home.clone(), |path, seg| path.join(seg))
    }

    fn build_manifest(&mut self) {
        let walker = WalkDir::new(&self.home).min_depth(1).sort_by_file_name();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(oid = %self.id, error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str() else {
                warn!(oid = %self.id, path = %entry.path().display(), "skipping non UTF-8 file name");
                continue;
            };
            if name.ends_with(PAYLOAD_META_SUFFIX)
                || name == MANIFEST_LOCK_FILE
                || is_temp_file_name(name)
                || (entry.depth() == 1 && name == RESERVED_METADATA_PID)
            {
                continue;
            }
            let Some(pid) = self.relative_pid(entry.path()) else {
                continue;
            };
            if let Err(e) = validate_pid(&pid) {
                warn!(oid = %self.id, pid = %pid, error = %e, "skipping file with unusable name");
                continue;
            }
            self.load_payload(pid);
        }
        debug!(oid = %self.id, payloads = self.manifest.len(), source = ?self.source_id, "manifest built");
    }

    fn relative_pid(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.home).ok()?;
        let parts = rel
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<Vec<_>>>()?;
        Some(parts.join("/"))
    }

    fn load_payload(&mut self, pid: String) {
        let mut payload = FileSystemPayload::new(&pid, self.payload_file(&pid));
        if let Err(e) = payload.load_descriptor() {
            warn!(oid = %self.id, pid = %pid, error = %e, "failed to load payload descriptor");
        }
        if payload.payload_type() == Some(PayloadType::Source) && self.source_id.is_none() {
            self.source_id = Some(pid.clone());
        }
        self.manifest.insert(pid, payload);
    }

    /// Look a payload up, loading it from disk if it appeared after open.
    fn lookup(&mut self, pid: &str) -> StorageResult<&mut FileSystemPayload> {
        let pid = normalize_pid(pid);
        if !self.manifest.contains_key(&pid)
            && validate_pid(&pid).is_ok()
            && self.payload_file(&pid).is_file()
        {
            debug!(oid = %self.id, pid = %pid, "payload found on disk after open");
            self.load_payload(pid.clone());
        }
        let oid = &self.id;
        self.manifest
            .get_mut(&pid)
            .ok_or_else(|| StorageError::PayloadNotFound { oid: oid.clone(), pid })
    }

    fn create_payload<R: Read>(
        &mut self,
        pid: &str,
        content: R,
        linked: bool,
    ) -> StorageResult<&mut FileSystemPayload> {
        let pid = validate_pid(pid)?;
        let data_file = self.payload_file(&pid);
        let exists = || StorageError::PayloadExists {
            oid: self.id.clone(),
            pid: pid.clone(),
        };
        if self.manifest.contains_key(&pid) || data_file.exists() {
            return Err(exists());
        }
        write_atomic(&data_file, content, false)
            .map_err(|e| if is_exists_error(&e) { exists() } else { e })?;

        let payload_type = if self.source_id.is_none() {
            PayloadType::Source
        } else {
            PayloadType::Enrichment
        };
        let mut payload = FileSystemPayload::new(&pid, data_file);
        payload.descriptor_init(payload_type, linked);
        if let Err(e) = payload.write_descriptor() {
            if let Err(cleanup) = remove_if_exists(payload.data_file()) {
                warn!(oid = %self.id, pid = %pid, error = %cleanup, "failed to clean up payload file");
            }
            return Err(e);
        }
        if payload_type == PayloadType::Source {
            self.source_id = Some(pid.clone());
        }
        debug!(oid = %self.id, pid = %pid, linked, "payload created");
        Ok(self.manifest.entry(pid).or_insert(payload))
    }
}

impl DigitalObject for FileSystemDigitalObject {
    type Payload = FileSystemPayload;

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, oid: &str) {
        self.id = oid.to_string();
    }

    fn source_id(&self) -> Option<&str> {
        self.source_id.as_deref()
    }

    fn set_source_id(&mut self, pid: Option<&str>) {
        self.source_id = pid.map(normalize_pid);
    }

    fn metadata(&mut self) -> StorageResult<&mut Properties> {
        if self.metadata.is_none() {
            let path = self.metadata_file();
            let props = match fs::read(&path) {
                Ok(bytes) => parse_metadata(&bytes, &path)?,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    warn!(oid = %self.id, "object metadata missing; recreating");
                    let mut props = Properties::new();
                    props.set(OBJECT_ID_KEY, self.id.as_str());
                    write_atomic(&path, render_metadata(&props).as_bytes(), true)?;
                    props.set(META_PID_KEY, RESERVED_METADATA_PID);
                    props
                }
                Err(e) => return Err(StorageError::io("read object metadata", &path)(e)),
            };
            self.metadata = Some(props);
        }
        Ok(self.metadata.get_or_insert_with(Properties::new))
    }

    fn payload_id_list(&self) -> BTreeSet<String> {
        self.manifest.keys().cloned().collect()
    }

    fn create_stored_payload<R: Read>(
        &mut self,
        pid: &str,
        content: R,
    ) -> StorageResult<&mut FileSystemPayload> {
        self.create_payload(pid, content, false)
    }

    fn create_linked_payload(
        &mut self,
        pid: &str,
        link_path: &Path,
    ) -> StorageResult<&mut FileSystemPayload> {
        let bytes = link_bytes(link_path)?;
        self.create_payload(pid, bytes.as_slice(), true)
    }

    fn get_payload(&mut self, pid: &str) -> StorageResult<&mut FileSystemPayload> {
        self.lookup(pid)
    }

    fn update_payload<R: Read>(
        &mut self,
        pid: &str,
        content: R,
    ) -> StorageResult<&mut FileSystemPayload> {
        let payload = self.lookup(pid)?;
        payload.replace_content(content)?;
        debug!(pid = %payload.id(), "payload updated");
        Ok(payload)
    }

    fn remove_payload(&mut self, pid: &str) -> StorageResult<()> {
        let pid = normalize_pid(pid);
        self.lookup(&pid)?;
        let Some(mut payload) = self.manifest.remove(&pid) else {
            return Err(StorageError::PayloadNotFound {
                oid: self.id.clone(),
                pid,
            });
        };
        payload.release_streams();
        if let Err(e) = remove_if_exists(payload.data_file()) {
            self.manifest.insert(pid, payload);
            return Err(e);
        }
        remove_if_exists(payload.meta_file())?;
        if let Some(parent) = payload.data_file().parent() {
            prune_empty_dirs(parent, &self.home);
        }
        if self.source_id.as_deref() == Some(pid.as_str()) {
            self.source_id = None;
        }
        debug!(oid = %self.id, pid = %pid, "payload removed");
        Ok(())
    }

    fn close(&mut self) -> StorageResult<()> {
        let mut first_err = None;
        for payload in self.manifest.values_mut() {
            if let Err(e) = payload.close() {
                warn!(oid = %self.id, pid = %payload.id(), error = %e, "failed to close payload");
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        if let Some(props) = self.metadata.as_mut() {
            finalize_metadata(props, &self.id);
            let path = self.home.join(RESERVED_METADATA_PID);
            write_atomic(&path, render_metadata(props).as_bytes(), true)?;
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
