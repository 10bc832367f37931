//! labrec: versioned test-record storage with a SQLite secondary index.
//!
//! ```text
//! codec      (t, value) samples <-> fixed or variable-length rows
//! container  single-file hierarchical node store
//! store      RecordStore: versions, references, plots, signatures
//! index      Indexer: SQLite mirror of many records, search, edits
//! lock       cross-process directory lock guarding the index
//! ```

pub mod codec;
pub mod conf;
pub mod config;
pub mod container;
pub mod error;
pub mod index;
pub mod lock;
pub mod signature;
pub mod store;

pub use codec::{MetaValue, RefValue, ReferenceClass, Sample};
pub use conf::{ConfNode, ConfOption, OptionType, OptionValue};
pub use config::{IndexerConfig, StoreConfig};
pub use container::AccessMode;
pub use error::{Result, StoreError};
pub use index::{Column, Indexer, NoProgress, Progress, QueryParams, ScanReport, TestRecord};
pub use lock::{DirLock, LockOptions, WriteLock};
pub use signature::{KeyedHashSigner, Signer};
pub use store::{RecordStore, Reference, ReferenceMeta, UidResolver, VersionInfo};
