//! securebox-core: shared record types and configuration schema

pub mod config;
pub mod types;

pub use config::SecureBoxConfig;
pub use types::{FileRecord, Registration, UploadReceipt, UserRecord};
