//! Manual override endpoints
//!
//! Both take `{"etcdKey": ..., "filePath": ...}`. Paths are resolved by the
//! daemon, relative to its working directory when not absolute.

pub mod download_file;
pub mod put_file;
