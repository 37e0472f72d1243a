//! drive-sync library: Exposes internal modules for testing.
//!
//! This is a thin library layer over the native adapters (disk, Google Drive,
//! JSON state file, watcher), allowing integration tests to access them.

pub mod config;
pub mod drive;
pub mod native_fs;
pub mod persistence;
pub mod watcher;

// Re-export key types for convenience
pub use config::{Config, WatchConfig, CONFIG_FILE};
pub use drive::{DriveClient, DriveEndpoints, OAuthClient};
pub use native_fs::NativeFs;
pub use persistence::{JsonStateStore, STATE_FILE};
pub use watcher::{FileEvent, FileEventKind, FileWatcher};
