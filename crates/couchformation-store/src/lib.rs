//! Couch Formation document store
//!
//! An embedded, file-backed key/value store with multiple named documents
//! per file. Project state is kept in a handful of these files:
//!
//! - `metadata.db`: project UID and the service registry
//! - `network-<region>.db`: one `network:<cloud>` document per cloud
//! - `<service>.db`: numbered node group documents and per-node state
//!
//! ```ignore
//! use couchformation_store::Store;
//!
//! let mut store = Store::open("network-us-east-1.db", "network:aws")?;
//! store.set("vpc_id", "vpc-0a1b2c")?;
//! store.list_add("services", ["cbs"])?;
//! assert!(store.list_exists("services", "cbs")?);
//! ```

pub mod error;
pub mod list;
pub mod store;

pub use error::{Result, StoreError};
pub use list::Tuple;
pub use store::{DEFAULT_DOCUMENT, Store, text_of};
