pub mod cache;
pub mod deps;
pub mod locks;
pub mod remote;
pub mod traits;

pub use cache::TtlCache;
pub use deps::DependencyTrail;
pub use locks::EntityLocks;
pub use remote::RemoteRegistry;
