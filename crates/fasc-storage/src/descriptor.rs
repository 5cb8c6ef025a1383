use fasc_types::{normalize_pid, PayloadType};

/// Descriptive state shared by every payload implementation.
///
/// Each setter raises the metadata-changed flag when the new value differs
/// from the old one, so an owner can tell whether persisted descriptors need
/// rewriting.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PayloadDescriptor {
    id: String,
    payload_type: Option<PayloadType>,
    label: Option<String>,
    content_type: Option<String>,
    linked: bool,
    meta_changed: bool,
}

impl PayloadDescriptor {
    pub fn new(id: &str) -> Self {
        Self {
            id: normalize_pid(id),
            payload_type: None,
            label: None,
            content_type: None,
            linked: false,
            meta_changed: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn set_id(&mut self, id: &str) {
        let id = normalize_pid(id);
        self.meta_changed |= self.id != id;
        self.id = id;
    }

    pub fn payload_type(&self) -> Option<PayloadType> {
        self.payload_type
    }

    pub fn set_type(&mut self, payload_type: PayloadType) {
        self.meta_changed |= self.payload_type != Some(payload_type);
        self.payload_type = Some(payload_type);
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn set_label(&mut self, label: &str) {
        self.meta_changed |= self.label.as_deref() != Some(label);
        self.label = Some(label.to_string());
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn set_content_type(&mut self, content_type: &str) {
        self.meta_changed |= self.content_type.as_deref() != Some(content_type);
        self.content_type = Some(content_type.to_string());
    }

    pub fn is_linked(&self) -> bool {
        self.linked
    }

    pub(crate) fn set_linked(&mut self, linked: bool) {
        self.meta_changed |= self.linked != linked;
        self.linked = linked;
    }

    pub(crate) fn clear_content_type(&mut self) {
        self.meta_changed |= self.content_type.is_some();
        self.content_type = None;
    }

    pub fn has_meta_changed(&self) -> bool {
        self.meta_changed
    }

    pub(crate) fn mark_clean(&mut self) {
        self.meta_changed = false;
    }
}
