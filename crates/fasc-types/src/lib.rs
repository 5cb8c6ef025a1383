//! Foundation types for the Fascinator object store.
//!
//! Every other crate in the workspace depends on `fasc-types`.
//!
//! # Key Types
//!
//! - [`PayloadType`] -- the role a payload plays within its object
//! - [`Properties`] -- ordered key/value set with the property-file codec
//! - [`ident`] -- oid/pid validation and shard path derivation
//! - [`mime`] -- content-type detection

pub mod error;
pub mod ident;
pub mod mime;
pub mod payload_type;
pub mod properties;

pub use error::TypeError;
pub use ident::{
    is_temp_file_name, md5_hex, normalize_pid, shard_path, validate_oid, validate_pid,
    MANIFEST_LOCK_FILE, PAYLOAD_META_SUFFIX, RESERVED_METADATA_PID, TEMP_FILE_PREFIX,
    TEMP_FILE_SUFFIX,
};
pub use payload_type::PayloadType;
pub use properties::Properties;
