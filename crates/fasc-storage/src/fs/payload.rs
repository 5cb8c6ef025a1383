use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use fasc_types::{mime, normalize_pid, PayloadType, Properties, PAYLOAD_META_SUFFIX};
use tracing::{debug, warn};

use crate::descriptor::PayloadDescriptor;
use crate::error::{StorageError, StorageResult};
use crate::fs::write_atomic;
use crate::metadata::{epoch_millis, parse_link, LINK_SIZE_LIMIT};
use crate::stream::{OpenStreams, PayloadStream};
use crate::traits::Payload;

const ID_KEY: &str = "id";
const TYPE_KEY: &str = "payloadType";
const LABEL_KEY: &str = "label";
const LINKED_KEY: &str = "linked";
const CONTENT_TYPE_KEY: &str = "contentType";

/// A payload stored as a data file inside its object directory.
///
/// The descriptor lives next to the data file in a `<pid>.meta` property
/// file. For linked payloads the data file holds the external path.
#[derive(Debug)]
pub struct FileSystemPayload {
    descriptor: PayloadDescriptor,
    data_file: PathBuf,
    meta_file: PathBuf,
    streams: OpenStreams,
}

impl FileSystemPayload {
    pub(crate) fn new(pid: &str, data_file: PathBuf) -> Self {
        let meta_file = sidecar_path(&data_file);
        Self {
            descriptor: PayloadDescriptor::new(pid),
            data_file,
            meta_file,
            streams: OpenStreams::default(),
        }
    }

    pub fn data_file(&self) -> &Path {
        &self.data_file
    }

    pub fn meta_file(&self) -> &Path {
        &self.meta_file
    }

    /// External file a linked payload points at; `None` for stored payloads.
    pub fn link_target(&self) -> StorageResult<Option<PathBuf>> {
        if !self.descriptor.is_linked() {
            return Ok(None);
        }
        let len = fs::metadata(&self.data_file)
            .map_err(StorageError::io("stat link file", &self.data_file))?
            .len();
        if len > LINK_SIZE_LIMIT {
            warn!(pid = %self.descriptor.id(), size = len, "link file is suspiciously large");
            return Err(StorageError::CorruptMetadata {
                path: self.data_file.clone(),
                reason: format!("link file is {len} bytes; expected a single path"),
            });
        }
        let bytes = fs::read(&self.data_file).map_err(StorageError::io("read link file", &self.data_file))?;
        parse_link(&bytes, &self.data_file).map(Some)
    }

    /// Read the sidecar descriptor, writing defaults when it is missing.
    pub(crate) fn load_descriptor(&mut self) -> StorageResult<()> {
        let props = match fs::read(&self.meta_file) {
            Ok(bytes) => Properties::parse_bytes(&bytes).unwrap_or_else(|e| {
                warn!(path = %self.meta_file.display(), error = %e, "unreadable payload descriptor; using defaults");
                Properties::new()
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(pid = %self.descriptor.id(), "no payload descriptor; writing defaults");
                self.descriptor.set_type(PayloadType::Enrichment);
                return self.write_descriptor();
            }
            Err(e) => return Err(StorageError::io("read payload descriptor", &self.meta_file)(e)),
        };

        if let Some(id) = props.get(ID_KEY) {
            if normalize_pid(id) != self.descriptor.id() {
                warn!(pid = %self.descriptor.id(), recorded = id, "descriptor id differs from file path");
            }
        }
        let payload_type = match props.get(TYPE_KEY) {
            Some(raw) => raw.parse::<PayloadType>().unwrap_or_else(|e| {
                warn!(pid = %self.descriptor.id(), error = %e, "unknown payload type; using enrichment");
                PayloadType::Enrichment
            }),
            None => PayloadType::Enrichment,
        };
        self.descriptor.set_type(payload_type);
        let label = props.get(LABEL_KEY).unwrap_or(self.descriptor.id()).to_string();
        self.descriptor.set_label(&label);
        self.descriptor
            .set_linked(props.get(LINKED_KEY).is_some_and(|v| v.eq_ignore_ascii_case("true")));
        match props.get(CONTENT_TYPE_KEY) {
            Some(ct) => self.descriptor.set_content_type(ct),
            None => {
                let detected = self.detect_content_type();
                self.descriptor.set_content_type(&detected);
            }
        }
        self.descriptor.mark_clean();
        Ok(())
    }

    /// Persist the descriptor, filling in defaults for unset fields.
    pub(crate) fn write_descriptor(&mut self) -> StorageResult<()> {
        if self.descriptor.label().is_none() {
            let name = self
                .data_file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.descriptor.id().to_string());
            self.descriptor.set_label(&name);
        }
        if self.descriptor.payload_type().is_none() {
            self.descriptor.set_type(PayloadType::Source);
        }
        if self.descriptor.content_type().is_none() {
            let detected = self.detect_content_type();
            self.descriptor.set_content_type(&detected);
        }

        let d = &self.descriptor;
        let mut props = Properties::new();
        props.set(ID_KEY, d.id());
        props.set(TYPE_KEY, d.payload_type().unwrap_or(PayloadType::Source).as_str());
        props.set(LABEL_KEY, d.label().unwrap_or_default());
        props.set(LINKED_KEY, d.is_linked().to_string());
        props.set(CONTENT_TYPE_KEY, d.content_type().unwrap_or(mime::DEFAULT_MIME_TYPE));
        let text = props.to_file_string(&["Payload descriptor"]);

        write_atomic(&self.meta_file, text.as_bytes(), true)?;
        self.descriptor.mark_clean();
        Ok(())
    }

    /// Overwrite the stored content. A linked payload becomes a stored one.
    pub(crate) fn replace_content<R: Read>(&mut self, content: R) -> StorageResult<()> {
        self.release_streams();
        write_atomic(&self.data_file, content, true)?;
        if self.descriptor.is_linked() {
            self.descriptor.set_linked(false);
            self.descriptor.clear_content_type();
        }
        self.write_descriptor()
    }

    pub(crate) fn release_streams(&mut self) -> usize {
        self.streams.close_all(self.descriptor.id())
    }

    pub(crate) fn descriptor_init(&mut self, payload_type: PayloadType, linked: bool) {
        self.descriptor.set_type(payload_type);
        self.descriptor.set_linked(linked);
    }

    /// File holding the actual bytes: the link target or the data file.
    fn content_path(&self) -> StorageResult<PathBuf> {
        Ok(self.link_target()?.unwrap_or_else(|| self.data_file.clone()))
    }

    fn detect_content_type(&self) -> String {
        match self.link_target() {
            Ok(None) => mime::detect_path(&self.data_file),
            Ok(Some(target)) if target.exists() => mime::detect_path(&target),
            Ok(Some(target)) => mime::from_name(&target.to_string_lossy())
                .unwrap_or(mime::DEFAULT_MIME_TYPE)
                .to_string(),
            Err(e) => {
                warn!(pid = %self.descriptor.id(), error = %e, "cannot resolve link for MIME detection");
                mime::DEFAULT_MIME_TYPE.to_string()
            }
        }
    }

    fn stat(&self) -> StorageResult<fs::Metadata> {
        let path = self.content_path()?;
        fs::metadata(&path).map_err(StorageError::io("stat payload content", path))
    }
}

fn sidecar_path(data_file: &Path) -> PathBuf {
    let mut name = data_file.file_name().unwrap_or_default().to_os_string();
    name.push(PAYLOAD_META_SUFFIX);
    data_file.with_file_name(name)
}

impl Payload for FileSystemPayload {
    fn descriptor(&self) -> &PayloadDescriptor {
        &self.descriptor
    }

    fn descriptor_mut(&mut self) -> &mut PayloadDescriptor {
        &mut self.descriptor
    }

    fn open(&mut self) -> StorageResult<PayloadStream> {
        let pid = self.descriptor.id().to_string();
        let file = match self.link_target()? {
            Some(target) => match File::open(&target) {
                Ok(f) => f,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(StorageError::LinkTargetNotFound { pid, target });
                }
                Err(e) => return Err(StorageError::io("open linked file", target)(e)),
            },
            None => match File::open(&self.data_file) {
                Ok(f) => f,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(StorageError::NoContent { pid });
                }
                Err(e) => return Err(StorageError::io("open payload", &self.data_file)(e)),
            },
        };
        Ok(self.streams.track(&pid, Box::new(file)))
    }

    fn close(&mut self) -> StorageResult<()> {
        self.release_streams();
        if self.descriptor.has_meta_changed() {
            self.write_descriptor()?;
        }
        Ok(())
    }

    fn last_modified(&self) -> Option<i64> {
        match self.stat().and_then(|m| {
            m.modified()
                .map_err(StorageError::io("read modification time", &self.data_file))
        }) {
            Ok(time) => Some(epoch_millis(time)),
            Err(e) => {
                warn!(pid = %self.descriptor.id(), error = %e, "cannot read payload modification time");
                None
            }
        }
    }

    fn size(&self) -> Option<u64> {
        match self.stat() {
            Ok(m) => Some(m.len()),
            Err(e) => {
                warn!(pid = %self.descriptor.id(), error = %e, "cannot read payload size");
                None
            }
        }
    }
}
