//! Store variants. Pick one at construction; all share the same contract.

mod cookie;
mod local_storage;
mod remote_cache;

pub use cookie::{ClientCookieStore, ServerCookieStore};
pub use local_storage::LocalStorageStore;
pub use remote_cache::RemoteCacheStore;
