use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;

use fasc_types::{normalize_pid, PayloadType, Properties};

use crate::descriptor::PayloadDescriptor;
use crate::error::{StorageError, StorageResult};
use crate::stream::PayloadStream;

/// One named content stream attached to a digital object.
///
/// Descriptive accessors are provided on top of [`PayloadDescriptor`]; an
/// implementation only has to say where its descriptor lives and how its
/// content is opened and released.
pub trait Payload {
    fn descriptor(&self) -> &PayloadDescriptor;

    fn descriptor_mut(&mut self) -> &mut PayloadDescriptor;

    fn id(&self) -> &str {
        self.descriptor().id()
    }

    fn set_id(&mut self, id: &str) {
        self.descriptor_mut().set_id(id)
    }

    fn payload_type(&self) -> Option<PayloadType> {
        self.descriptor().payload_type()
    }

    fn set_type(&mut self, payload_type: PayloadType) {
        self.descriptor_mut().set_type(payload_type)
    }

    fn label(&self) -> Option<&str> {
        self.descriptor().label()
    }

    fn set_label(&mut self, label: &str) {
        self.descriptor_mut().set_label(label)
    }

    fn content_type(&self) -> Option<&str> {
        self.descriptor().content_type()
    }

    fn set_content_type(&mut self, content_type: &str) {
        self.descriptor_mut().set_content_type(content_type)
    }

    /// Whether the content lives outside the store.
    fn is_linked(&self) -> bool {
        self.descriptor().is_linked()
    }

    /// Open a fresh stream over the current content.
    ///
    /// The stream stays valid until it is dropped or [`Payload::close`] is
    /// called on this payload.
    fn open(&mut self) -> StorageResult<PayloadStream>;

    /// Release open streams and persist any descriptor changes.
    fn close(&mut self) -> StorageResult<()>;

    /// Last modification time in milliseconds since the Unix epoch.
    fn last_modified(&self) -> Option<i64> {
        None
    }

    /// Content size in bytes.
    fn size(&self) -> Option<u64> {
        None
    }

    /// Read the whole content into memory.
    fn read_to_vec(&mut self) -> StorageResult<Vec<u8>> {
        let mut stream = self.open()?;
        let mut buf = Vec::new();
        stream
            .read_to_end(&mut buf)
            .map_err(StorageError::io("read payload", self.id()))?;
        Ok(buf)
    }
}

/// A stored entity grouping payloads under one object identifier.
///
/// Payload handles borrow the object mutably, so an object is edited through
/// one handle at a time. Changes to descriptors and object metadata are only
/// guaranteed durable after [`DigitalObject::close`].
pub trait DigitalObject {
    type Payload: Payload;

    fn id(&self) -> &str;

    fn set_id(&mut self, oid: &str);

    /// Identifier of the payload holding the original source content.
    fn source_id(&self) -> Option<&str>;

    fn set_source_id(&mut self, pid: Option<&str>);

    /// Object-level properties, loaded on first access.
    fn metadata(&mut self) -> StorageResult<&mut Properties>;

    /// Identifiers of all user payloads. The reserved metadata payload is
    /// never listed.
    fn payload_id_list(&self) -> BTreeSet<String>;

    fn has_payload(&self, pid: &str) -> bool {
        self.payload_id_list().contains(&normalize_pid(pid))
    }

    /// Attach a new payload whose content is copied from `content`.
    ///
    /// The first payload of an object becomes its source; later ones are
    /// enrichments.
    fn create_stored_payload<R: Read>(
        &mut self,
        pid: &str,
        content: R,
    ) -> StorageResult<&mut Self::Payload>;

    /// Attach a new payload that refers to an external file by path.
    fn create_linked_payload(
        &mut self,
        pid: &str,
        link_path: &Path,
    ) -> StorageResult<&mut Self::Payload>;

    fn get_payload(&mut self, pid: &str) -> StorageResult<&mut Self::Payload>;

    /// Replace the content of an existing payload.
    fn update_payload<R: Read>(
        &mut self,
        pid: &str,
        content: R,
    ) -> StorageResult<&mut Self::Payload>;

    fn remove_payload(&mut self, pid: &str) -> StorageResult<()>;

    /// Close every payload and persist metadata if it was loaded.
    fn close(&mut self) -> StorageResult<()>;
}

/// A collection of digital objects addressed by oid.
///
/// Implementations are shared between threads; each returned object is an
/// independent handle over the stored state.
pub trait Storage: Send + Sync {
    type Object: DigitalObject;

    /// Create an empty object. Fails if the oid is already present.
    fn create_object(&self, oid: &str) -> StorageResult<Self::Object>;

    fn get_object(&self, oid: &str) -> StorageResult<Self::Object>;

    /// Delete an object together with all of its payloads.
    fn remove_object(&self, oid: &str) -> StorageResult<()>;

    fn object_id_list(&self) -> BTreeSet<String>;

    fn contains(&self, oid: &str) -> bool {
        self.object_id_list().contains(oid)
    }
}
