use async_trait::async_trait;
use securebox_core::{FileRecord, Registration, UploadReceipt, UserRecord};
use securebox_crypto::PublicKey;

use crate::error::ApiResult;

/// A downloaded file and the name the uploader gave it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub file_name: String,
    pub data: Vec<u8>,
}

/// The remote directory of users and relay of files.
///
/// Every call is made on behalf of the token the implementation was
/// constructed with.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Publish a new identity. The returned id may be absent; see
    /// [`Registration::resolve_user_id`].
    async fn register(&self, name: &str, email: &str, public_key_pem: &str)
        -> ApiResult<Registration>;

    /// Users whose name or email contains `query`.
    async fn search(&self, query: &str) -> ApiResult<Vec<UserRecord>>;

    async fn public_key(&self, user_id: &str) -> ApiResult<PublicKey>;

    async fn delete_user(&self, user_id: &str) -> ApiResult<()>;

    /// Files uploaded with this token.
    async fn list_files(&self) -> ApiResult<Vec<FileRecord>>;

    async fn upload(&self, file_name: &str, data: Vec<u8>) -> ApiResult<UploadReceipt>;

    async fn download(&self, file_id: &str) -> ApiResult<Download>;

    async fn delete_file(&self, file_id: &str) -> ApiResult<()>;
}
