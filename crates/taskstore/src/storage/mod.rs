pub mod lock;
pub mod store;

pub use lock::{FileLocker, LockGuard};
pub use store::Store;
