//! Object and payload storage for the Fascinator repository.
//!
//! A store holds digital objects addressed by an opaque object id (oid).
//! Each object groups named payloads (pids): the original source content,
//! enrichments derived from it, previews and so on, plus a reserved property
//! file with object-level metadata.
//!
//! # Storage Backends
//!
//! All backends implement the [`Storage`] trait:
//!
//! - [`FileSystemStorage`] -- sharded directory tree, `xx/yy/zz/<oid>/`
//! - [`RamStorage`] -- `HashMap`-based store for tests and embedding
//!
//! # Design Rules
//!
//! 1. Path placement is a pure function of the oid and pid.
//! 2. The first payload created on an object is its source.
//! 3. Descriptor and metadata changes are durable after `close()`.
//! 4. Content writes go through a staging file and a rename.
//! 5. Identifiers are validated before any file is touched.

pub mod config;
pub mod descriptor;
pub mod error;
pub mod fs;
pub mod generic;
pub mod ingest;
pub mod memory;
pub mod metadata;
pub mod stream;
pub mod traits;

// Re-export primary types at crate root for ergonomic imports.
pub use config::StorageConfig;
pub use descriptor::PayloadDescriptor;
pub use error::{ErrorKind, StorageError, StorageResult};
pub use fs::{FileSystemDigitalObject, FileSystemPayload, FileSystemStorage};
pub use generic::{GenericDigitalObject, GenericPayload};
pub use ingest::HarvestStatus;
pub use memory::{RamObject, RamStorage};
pub use stream::PayloadStream;
pub use traits::{DigitalObject, Payload, Storage};
