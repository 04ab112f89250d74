//! sticky-bucket: durable variation assignments per user attribute
//!
//! Once a `(attribute name, attribute value)` pair has been bucketed into a
//! variation for an experiment, the assignment is written to a
//! [`StickyAssignmentsDocument`] so later evaluations return the same
//! variation even if targeting or weights change.
//!
//! ## Key Components
//!
//! - [`StickyBucketStore`]: the capability, with a default fan-out batch read
//! - [`backends`]: local storage, server cookies, client cookies, remote cache
//! - [`persist_assignments`]: merge new assignments without overwriting old ones
//! - [`memory`] / [`FsLocalStorage`]: collaborator implementations

pub mod backends;
pub mod collaborators;
mod document;
mod error;
mod fs;
pub mod memory;
mod store;

pub use backends::{ClientCookieStore, LocalStorageStore, RemoteCacheStore, ServerCookieStore};
pub use collaborators::{CookieAttributes, CookieJar, CookieSink, LocalStorage, RemoteCache, SameSite};
pub use document::{
    attribute_key, parse_document, StickyAssignmentsDocument, DEFAULT_PREFIX, KEY_SEPARATOR,
};
pub use error::{Result, StickyBucketError};
pub use fs::FsLocalStorage;
pub use store::{persist_assignments, AssignmentConflict, MergeReport, SaveAck, StickyBucketStore};
