pub mod daemon;
pub mod download;
pub mod health;
pub mod init;
pub mod put;

pub use daemon::Daemon;
pub use download::Download;
pub use health::Health;
pub use init::Init;
pub use put::Put;
