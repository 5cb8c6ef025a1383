//! In-memory payload and object implementations.
//!
//! Content is buffered as shared bytes, so cloning a payload or object is
//! cheap and every open stream reads a stable snapshot.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::Path;
use std::sync::Arc;

use fasc_types::{mime, normalize_pid, validate_pid, PayloadType, Properties, RESERVED_METADATA_PID};
use tracing::debug;

use crate::descriptor::PayloadDescriptor;
use crate::error::{StorageError, StorageResult};
use crate::metadata::{
    finalize_metadata, link_bytes, parse_link, parse_metadata, render_metadata, METADATA_LABEL,
    META_PID_KEY,
};
use crate::stream::{OpenStreams, PayloadStream};
use crate::traits::{DigitalObject, Payload};

/// A payload whose content is held in memory.
pub struct GenericPayload {
    descriptor: PayloadDescriptor,
    content: Option<Arc<[u8]>>,
    streams: OpenStreams,
}

impl GenericPayload {
    pub fn new(id: &str) -> Self {
        Self {
            descriptor: PayloadDescriptor::new(id),
            content: None,
            streams: OpenStreams::default(),
        }
    }

    /// A payload with its descriptor filled in and no pending changes.
    pub fn with_details(
        id: &str,
        label: &str,
        content_type: &str,
        payload_type: PayloadType,
    ) -> Self {
        let mut payload = Self::new(id);
        payload.descriptor.set_label(label);
        payload.descriptor.set_content_type(content_type);
        payload.descriptor.set_type(payload_type);
        payload.descriptor.mark_clean();
        payload
    }

    /// Copy descriptor and content out of any other payload.
    pub fn copy_from<P: Payload>(other: &mut P) -> StorageResult<Self> {
        let mut payload = Self::new(other.id());
        if let Some(label) = other.label() {
            payload.descriptor.set_label(label);
        }
        if let Some(content_type) = other.content_type() {
            payload.descriptor.set_content_type(content_type);
        }
        if let Some(payload_type) = other.payload_type() {
            payload.descriptor.set_type(payload_type);
        }
        payload.set_content(other.read_to_vec()?);
        payload.descriptor.mark_clean();
        Ok(payload)
    }

    /// Buffer all of `input` as the new content.
    ///
    /// The reader is consumed and dropped whether or not reading succeeds.
    /// The content type is detected from the bytes when none is set yet.
    pub fn set_input_stream<R: Read>(&mut self, input: R) -> StorageResult<()> {
        let bytes = buffer(input, self.descriptor.id())?;
        self.set_content(bytes);
        Ok(())
    }

    /// Buffered content, if any has been set.
    pub fn content(&self) -> Option<&[u8]> {
        self.content.as_deref()
    }

    fn set_content(&mut self, bytes: Vec<u8>) {
        if self.descriptor.content_type().is_none() {
            let detected = mime::detect(&bytes, Some(self.descriptor.id()));
            self.descriptor.set_content_type(&detected);
        }
        self.content = Some(Arc::from(bytes));
    }
}

fn buffer<R: Read>(mut input: R, pid: &str) -> StorageResult<Vec<u8>> {
    let mut bytes = Vec::new();
    input
        .read_to_end(&mut bytes)
        .map_err(StorageError::io("buffer payload content", pid))?;
    Ok(bytes)
}

impl Payload for GenericPayload {
    fn descriptor(&self) -> &PayloadDescriptor {
        &self.descriptor
    }

    fn descriptor_mut(&mut self) -> &mut PayloadDescriptor {
        &mut self.descriptor
    }

    fn open(&mut self) -> StorageResult<PayloadStream> {
        let pid = self.descriptor.id().to_string();
        let content = self
            .content
            .clone()
            .ok_or_else(|| StorageError::NoContent { pid: pid.clone() })?;

        let reader: Box<dyn Read + Send> = if self.descriptor.is_linked() {
            let target = parse_link(&content, Path::new(&pid))?;
            match File::open(&target) {
                Ok(file) => Box::new(file),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(StorageError::LinkTargetNotFound { pid, target });
                }
                Err(e) => return Err(StorageError::io("open linked file", target)(e)),
            }
        } else {
            Box::new(Cursor::new(content))
        };
        Ok(self.streams.track(&pid, reader))
    }

    fn close(&mut self) -> StorageResult<()> {
        self.streams.close_all(self.descriptor.id());
        Ok(())
    }

    fn size(&self) -> Option<u64> {
        if self.descriptor.is_linked() {
            return None;
        }
        self.content.as_ref().map(|c| c.len() as u64)
    }
}

impl Clone for GenericPayload {
    /// Clones share content but not open streams.
    fn clone(&self) -> Self {
        Self {
            descriptor: self.descriptor.clone(),
            content: self.content.clone(),
            streams: OpenStreams::default(),
        }
    }
}

impl fmt::Debug for GenericPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenericPayload")
            .field("descriptor", &self.descriptor)
            .field("content_len", &self.content.as_ref().map(|c| c.len()))
            .field("streams", &self.streams)
            .finish()
    }
}

/// A digital object held entirely in memory.
///
/// Object metadata is kept in a reserved payload that is never listed among
/// the user payloads.
#[derive(Clone, Debug)]
pub struct GenericDigitalObject {
    id: String,
    source_id: Option<String>,
    manifest: HashMap<String, GenericPayload>,
    metadata: Option<Properties>,
    metadata_payload: GenericPayload,
}

impl GenericDigitalObject {
    pub fn new(oid: &str) -> Self {
        Self {
            id: oid.to_string(),
            source_id: None,
            manifest: HashMap::new(),
            metadata: None,
            metadata_payload: GenericPayload::with_details(
                RESERVED_METADATA_PID,
                METADATA_LABEL,
                "text/plain",
                PayloadType::Annotation,
            ),
        }
    }

    fn attach(&mut self, mut payload: GenericPayload) -> &mut GenericPayload {
        let pid = payload.id().to_string();
        if self.source_id.is_none() {
            self.source_id = Some(pid.clone());
            payload.set_type(PayloadType::Source);
        } else {
            payload.set_type(PayloadType::Enrichment);
        }
        if payload.label().is_none() {
            payload.set_label(&pid);
        }
        debug!(oid = %self.id, pid = %pid, linked = payload.is_linked(), "payload created");
        self.manifest.entry(pid).or_insert(payload)
    }

    fn new_payload_id(&self, pid: &str) -> StorageResult<String> {
        let pid = validate_pid(pid)?;
        if self.manifest.contains_key(&pid) {
            return Err(StorageError::PayloadExists {
                oid: self.id.clone(),
                pid,
            });
        }
        Ok(pid)
    }

    fn load_metadata(&self) -> StorageResult<Properties> {
        match self.metadata_payload.content() {
            Some(bytes) => parse_metadata(bytes, Path::new(RESERVED_METADATA_PID)),
            None => {
                let mut props = Properties::new();
                props.set(META_PID_KEY, RESERVED_METADATA_PID);
                Ok(props)
            }
        }
    }
}

impl DigitalObject for GenericDigitalObject {
    type Payload = GenericPayload;

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
            let props = self.load_metadata()?;
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
    ) -> StorageResult<&mut GenericPayload> {
        let pid = self.new_payload_id(pid)?;
        let mut payload = GenericPayload::new(&pid);
        payload.set_input_stream(content)?;
        Ok(self.attach(payload))
    }

    fn create_linked_payload(
        &mut self,
        pid: &str,
        link_path: &Path,
    ) -> StorageResult<&mut GenericPayload> {
        let pid = self.new_payload_id(pid)?;
        let mut payload = GenericPayload::new(&pid);
        payload.descriptor.set_content_type(&mime::detect_path(link_path));
        payload.descriptor.set_linked(true);
        payload.set_content(link_bytes(link_path)?);
        Ok(self.attach(payload))
    }

    fn get_payload(&mut self, pid: &str) -> StorageResult<&mut GenericPayload> {
        let pid = normalize_pid(pid);
        match self.manifest.get_mut(&pid) {
            Some(payload) => Ok(payload),
            None => Err(StorageError::PayloadNotFound {
                oid: self.id.clone(),
                pid,
            }),
        }
    }

    fn update_payload<R: Read>(
        &mut self,
        pid: &str,
        content: R,
    ) -> StorageResult<&mut GenericPayload> {
        let pid = normalize_pid(pid);
        let bytes = buffer(content, &pid)?;
        let payload = self.get_payload(&pid)?;
        payload.streams.close_all(&pid);
        if payload.descriptor.is_linked() {
            payload.descriptor.set_linked(false);
            payload.descriptor.clear_content_type();
        }
        payload.set_content(bytes);
        Ok(payload)
    }

    fn remove_payload(&mut self, pid: &str) -> StorageResult<()> {
        let pid = normalize_pid(pid);
        let mut payload = self
            .manifest
            .remove(&pid)
            .ok_or_else(|| StorageError::PayloadNotFound {
                oid: self.id.clone(),
                pid: pid.clone(),
            })?;
        payload.close()?;
        if self.source_id.as_deref() == Some(pid.as_str()) {
            self.source_id = None;
        }
        debug!(oid = %self.id, pid = %pid, "payload removed");
        Ok(())
    }

    fn close(&mut self) -> StorageResult<()> {
        for payload in self.manifest.values_mut() {
            payload.close()?;
        }
        if let Some(props) = self.metadata.as_mut() {
            finalize_metadata(props, &self.id);
            self.metadata_payload
                .set_content(render_metadata(props).into_bytes());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{DATE_CREATED_KEY, OBJECT_ID_KEY};

    const OID: &str = "e292378c5b38b0d5a4aba11fd40e7151";

    // -----------------------------------------------------------------------
    // GenericPayload
    // -----------------------------------------------------------------------

    #[test]
    fn buffered_content_can_be_reopened() {
        let mut payload = GenericPayload::new("oai_dc");
        payload.set_input_stream(&b"<?xml version=\"1.0\"?><dc/>"[..]).unwrap();
        assert_eq!(payload.content_type(), Some("text/xml"));
        assert_eq!(payload.size(), Some(26));

        let first = payload.read_to_vec().unwrap();
        let second = payload.read_to_vec().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn explicit_content_type_is_kept() {
        let mut payload = GenericPayload::with_details("DC", "Dublin Core", "application/xml", PayloadType::Source);
        assert!(!payload.descriptor().has_meta_changed());
        payload.set_input_stream(&b"plain words"[..]).unwrap();
        assert_eq!(payload.content_type(), Some("application/xml"));
    }

    #[test]
    fn open_without_content_fails() {
        let mut payload = GenericPayload::new("empty");
        let err = payload.open().unwrap_err();
        assert!(matches!(err, StorageError::NoContent { .. }));
    }

    #[test]
    fn close_invalidates_streams() {
        let mut payload = GenericPayload::new("p");
        payload.set_input_stream(&b"data"[..]).unwrap();
        let mut stream = payload.open().unwrap();
        payload.close().unwrap();
        payload.close().unwrap();
        let mut buf = Vec::new();
        assert!(stream.read_to_end(&mut buf).is_err());
    }

    #[test]
    fn clone_does_not_share_streams() {
        let mut payload = GenericPayload::new("p");
        payload.set_input_stream(&b"data"[..]).unwrap();
        let mut stream = payload.open().unwrap();
        let mut copy = payload.clone();
        copy.close().unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"data");
    }

    // -----------------------------------------------------------------------
    // GenericDigitalObject
    // -----------------------------------------------------------------------

    #[test]
    fn first_payload_is_source() {
        let mut obj = GenericDigitalObject::new(OID);
        obj.create_stored_payload("oai_dc", &b"<dc/>"[..]).unwrap();
        obj.create_stored_payload("preview.html", &b"<html/>"[..]).unwrap();

        assert_eq!(obj.source_id(), Some("oai_dc"));
        assert_eq!(obj.get_payload("oai_dc").unwrap().payload_type(), Some(PayloadType::Source));
        assert_eq!(
            obj.get_payload("preview.html").unwrap().payload_type(),
            Some(PayloadType::Enrichment)
        );
    }

    #[test]
    fn duplicate_pid_rejected() {
        let mut obj = GenericDigitalObject::new(OID);
        obj.create_stored_payload("DC", &b"a"[..]).unwrap();
        let err = obj.create_stored_payload("DC", &b"b"[..]).unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(obj.get_payload("DC").unwrap().read_to_vec().unwrap(), b"a");
    }

    #[test]
    fn reserved_pid_rejected_and_hidden() {
        let mut obj = GenericDigitalObject::new(OID);
        assert!(obj.create_stored_payload(RESERVED_METADATA_PID, &b"x"[..]).is_err());
        obj.metadata().unwrap().set("title", "Test");
        obj.close().unwrap();
        assert!(obj.payload_id_list().is_empty());
        assert!(obj.get_payload(RESERVED_METADATA_PID).is_err());
    }

    #[test]
    fn update_replaces_content() {
        let mut obj = GenericDigitalObject::new(OID);
        obj.create_stored_payload("DC", &b"old"[..]).unwrap();
        obj.update_payload("DC", &b"new"[..]).unwrap();
        assert_eq!(obj.get_payload("DC").unwrap().read_to_vec().unwrap(), b"new");
        assert!(obj.update_payload("missing", &b"x"[..]).unwrap_err().is_not_found());
    }

    #[test]
    fn remove_payload_clears_source() {
        let mut obj = GenericDigitalObject::new(OID);
        obj.create_stored_payload("DC", &b"x"[..]).unwrap();
        obj.remove_payload("DC").unwrap();
        assert!(obj.source_id().is_none());
        assert!(obj.remove_payload("DC").unwrap_err().is_not_found());
    }

    #[test]
    fn metadata_persists_through_close() {
        let mut obj = GenericDigitalObject::new(OID);
        obj.metadata().unwrap().set("title", "A title");
        obj.close().unwrap();

        let mut copy = GenericDigitalObject {
            metadata: None,
            ..obj.clone()
        };
        let props = copy.metadata().unwrap();
        assert_eq!(props.get("title"), Some("A title"));
        assert_eq!(props.get(OBJECT_ID_KEY), Some(OID));
        assert_eq!(props.get(META_PID_KEY), Some(RESERVED_METADATA_PID));
        assert!(props.contains_key(DATE_CREATED_KEY));
    }

    #[test]
    fn linked_payload_reads_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("sample.txt");
        std::fs::write(&target, b"linked content").unwrap();

        let mut obj = GenericDigitalObject::new(OID);
        let payload = obj.create_linked_payload("sample.txt", &target).unwrap();
        assert!(payload.is_linked());
        assert_eq!(payload.content_type(), Some("text/plain"));
        assert_eq!(payload.read_to_vec().unwrap(), b"linked content");

        std::fs::remove_file(&target).unwrap();
        let err = obj.get_payload("sample.txt").unwrap().open().unwrap_err();
        assert!(matches!(err, StorageError::LinkTargetNotFound { .. }));
    }

    #[test]
    fn updating_linked_payload_stores_content() {
        let mut obj = GenericDigitalObject::new(OID);
        obj.create_linked_payload("ext", Path::new("/nowhere/ext.bin")).unwrap();
        let payload = obj.update_payload("ext", &b"stored now"[..]).unwrap();
        assert!(!payload.is_linked());
        assert_eq!(payload.content_type(), Some("text/plain"));
        assert_eq!(payload.read_to_vec().unwrap(), b"stored now");
    }

    #[test]
    fn copy_from_other_payload() {
        let mut source = GenericPayload::with_details("DC", "Dublin Core", "text/xml", PayloadType::Source);
        source.set_input_stream(&b"<dc/>"[..]).unwrap();
        let copy = GenericPayload::copy_from(&mut source).unwrap();
        assert_eq!(copy.label(), Some("Dublin Core"));
        assert_eq!(copy.payload_type(), Some(PayloadType::Source));
        assert_eq!(copy.content(), Some(&b"<dc/>"[..]));
    }
}
