//! securebox-api: the directory and storage service the client talks to
//!
//! [`Directory`] is the seam. [`HttpDirectory`] speaks the SecureBox REST
//! API over HTTPS; [`MemoryDirectory`] keeps everything in process and
//! enforces the same limits and error codes.

pub mod directory;
pub mod error;
pub mod http;
pub mod memory;

pub use directory::{Directory, Download};
pub use error::{ApiError, ApiResult, RemoteErrorKind};
pub use http::HttpDirectory;
pub use memory::{MemoryDirectory, MemoryServer, MAX_FILES_PER_USER, MAX_FILE_SIZE};
