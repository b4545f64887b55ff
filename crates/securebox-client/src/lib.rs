//! securebox-client: a signed-in session against the directory service
//!
//! A [`Session`] owns the unlocked bundle and a [`securebox_api::Directory`]
//! and runs every user-facing operation on top of them.

pub mod error;
pub mod session;

pub use error::{ClientError, ClientResult};
pub use session::{
    bundle_store, sanitize_file_name, DeleteReport, DownloadedFile, Session, SessionOptions,
};
