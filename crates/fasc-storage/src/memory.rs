use std::collections::{BTreeSet, HashMap};
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, RwLock};

use fasc_types::{validate_oid, Properties};
use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::generic::{GenericDigitalObject, GenericPayload};
use crate::traits::{DigitalObject, Storage};

type ObjectMap = Arc<RwLock<HashMap<String, GenericDigitalObject>>>;

/// In-memory, HashMap-based storage.
///
/// Intended for tests and embedding. Each handle returned by the storage is a
/// snapshot of the stored object; [`DigitalObject::close`] writes it back.
pub struct RamStorage {
    objects: ObjectMap,
}

impl RamStorage {
    pub fn new() -> Self {
        Self {
            objects: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of objects currently stored.
    pub fn len(&self) -> usize {
        self.objects.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().expect("lock poisoned").is_empty()
    }

    /// Remove all objects.
    pub fn clear(&self) {
        self.objects.write().expect("lock poisoned").clear();
    }
}

impl Default for RamStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for RamStorage {
    type Object = RamObject;

    fn create_object(&self, oid: &str) -> StorageResult<RamObject> {
        validate_oid(oid)?;
        let mut map = self.objects.write().expect("lock poisoned");
        if map.contains_key(oid) {
            return Err(StorageError::ObjectExists { oid: oid.to_string() });
        }
        let object = GenericDigitalObject::new(oid);
        map.insert(oid.to_string(), object.clone());
        debug!(oid, "object created");
        Ok(RamObject {
            inner: object,
            objects: Arc::clone(&self.objects),
        })
    }

    fn get_object(&self, oid: &str) -> StorageResult<RamObject> {
        let map = self.objects.read().expect("lock poisoned");
        let object = map
            .get(oid)
            .cloned()
            .ok_or_else(|| StorageError::ObjectNotFound { oid: oid.to_string() })?;
        Ok(RamObject {
            inner: object,
            objects: Arc::clone(&self.objects),
        })
    }

    fn remove_object(&self, oid: &str) -> StorageResult<()> {
        let mut map = self.objects.write().expect("lock poisoned");
        match map.remove(oid) {
            Some(_) => {
                debug!(oid, "object removed");
                Ok(())
            }
            None => Err(StorageError::ObjectNotFound { oid: oid.to_string() }),
        }
    }

    fn object_id_list(&self) -> BTreeSet<String> {
        let map = self.objects.read().expect("lock poisoned");
        map.keys().cloned().collect()
    }
}

impl std::fmt::Debug for RamStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RamStorage")
            .field("object_count", &self.len())
            .finish()
    }
}

/// Handle on an object held by [`RamStorage`].
#[derive(Debug)]
pub struct RamObject {
    inner: GenericDigitalObject,
    objects: ObjectMap,
}

impl DigitalObject for RamObject {
    type Payload = GenericPayload;

    fn id(&self) -> &str {
        self.inner.id()
    }

    fn set_id(&mut self, oid: &str) {
        self.inner.set_id(oid)
    }

    fn source_id(&self) -> Option<&str> {
        self.inner.source_id()
    }

    fn set_source_id(&mut self, pid: Option<&str>) {
        self.inner.set_source_id(pid)
    }

    fn metadata(&mut self) -> StorageResult<&mut Properties> {
        self.inner.metadata()
    }

    fn payload_id_list(&self) -> BTreeSet<String> {
        self.inner.payload_id_list()
    }

    fn create_stored_payload<R: Read>(
        &mut self,
        pid: &str,
        content: R,
    ) -> StorageResult<&mut GenericPayload> {
        self.inner.create_stored_payload(pid, content)
    }

    fn create_linked_payload(
        &mut self,
        pid: &str,
        link_path: &Path,
    ) -> StorageResult<&mut GenericPayload> {
        self.inner.create_linked_payload(pid, link_path)
    }

    fn get_payload(&mut self, pid: &str) -> StorageResult<&mut GenericPayload> {
        self.inner.get_payload(pid)
    }

    fn update_payload<R: Read>(
        &mut self,
        pid: &str,
        content: R,
    ) -> StorageResult<&mut GenericPayload> {
        self.inner.update_payload(pid, content)
    }

    fn remove_payload(&mut self, pid: &str) -> StorageResult<()> {
        self.inner.remove_payload(pid)
    }

    /// Close the snapshot and write it back, unless the object has been
    /// removed from storage in the meantime.
    fn close(&mut self) -> StorageResult<()> {
        self.inner.close()?;
        let mut map = self.objects.write().expect("lock poisoned");
        match map.get_mut(self.inner.id()) {
            Some(stored) => *stored = self.inner.clone(),
            None => debug!(oid = %self.inner.id(), "object removed before close; not written back"),
        }
        Ok(())
    }
}
