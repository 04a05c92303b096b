mod locks;

pub use locks::{names, LockRegistry, NamedLockGuard};
