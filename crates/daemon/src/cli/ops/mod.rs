pub mod backup;
pub mod enqueue;
pub mod init;
pub mod restore;
pub mod version;

pub use backup::Backup;
pub use enqueue::Enqueue;
pub use init::Init;
pub use restore::Restore;
pub use version::Version;
