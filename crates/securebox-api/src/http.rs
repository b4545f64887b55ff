//! HTTPS client for the SecureBox REST API

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_DISPOSITION};
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use securebox_core::{FileRecord, Registration, UploadReceipt, UserRecord};
use securebox_crypto::PublicKey;

use crate::directory::{Directory, Download};
use crate::error::{ApiError, ApiResult, RemoteErrorKind};

#[derive(Deserialize)]
struct ErrorBody {
    error_code: String,
    #[serde(default, alias = "message")]
    description: Option<String>,
}

#[derive(Deserialize)]
struct PublicKeyBody {
    #[serde(rename = "publicKey")]
    public_key: String,
}

#[derive(Deserialize)]
struct FileList {
    #[serde(default)]
    files_list: Vec<FileRecord>,
}

/// [`Directory`] backed by the remote service.
#[derive(Debug, Clone)]
pub struct HttpDirectory {
    http: reqwest::Client,
    base_url: String,
}

impl HttpDirectory {
    /// Build a client that sends `Authorization: Bearer <token>` on every call.
    ///
    /// `timeout` of `None` leaves requests unbounded.
    pub fn new(base_url: &str, token: &str, timeout: Option<Duration>) -> ApiResult<Self> {
        let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| ApiError::from(RemoteErrorKind::WrongHeader))?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .default_headers(headers);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Turn a non-2xx answer into an [`ApiError`].
    async fn check(resp: reqwest::Response) -> ApiResult<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let raw = resp.bytes().await.map_err(ApiError::body)?;
        let text = String::from_utf8_lossy(&raw);
        match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => {
                tracing::debug!(status = %status, code = %body.error_code, "request rejected");
                Err(ApiError::remote(&body.error_code, body.description))
            }
            Err(_) if status.is_server_error() => {
                Err(ApiError::Transport(format!("HTTP {status}")))
            }
            Err(_) => Err(ApiError::BadResponse(format!(
                "HTTP {status}: {}",
                text.chars().take(200).collect::<String>()
            ))),
        }
    }

    /// Read the whole body of a successful response and parse it as JSON.
    async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> ApiResult<T> {
        let raw = resp.bytes().await.map_err(ApiError::body)?;
        serde_json::from_slice(&raw).map_err(|e| ApiError::BadResponse(e.to_string()))
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> ApiResult<T> {
        let resp = self.http.post(self.url(path)).json(&body).send().await?;
        Self::read_json(Self::check(resp).await?).await
    }

    /// POST where only the status matters; the body is discarded.
    async fn post_ack(&self, path: &str, body: serde_json::Value) -> ApiResult<()> {
        let resp = self.http.post(self.url(path)).json(&body).send().await?;
        Self::check(resp).await?;
        Ok(())
    }
}

#[async_trait]
impl Directory for HttpDirectory {
    async fn register(
        &self,
        name: &str,
        email: &str,
        public_key_pem: &str,
    ) -> ApiResult<Registration> {
        self.post_json(
            "/users/register",
            json!({ "nombre": name, "email": email, "publicKey": public_key_pem }),
        )
        .await
    }

    async fn search(&self, query: &str) -> ApiResult<Vec<UserRecord>> {
        self.post_json("/users/search", json!({ "data_search": query }))
            .await
    }

    async fn public_key(&self, user_id: &str) -> ApiResult<PublicKey> {
        let body: PublicKeyBody = self
            .post_json("/users/getPublicKey", json!({ "userID": user_id }))
            .await?;
        PublicKey::from_pem(&body.public_key)
            .map_err(|e| ApiError::BadResponse(format!("public key of user {user_id}: {e}")))
    }

    async fn delete_user(&self, user_id: &str) -> ApiResult<()> {
        self.post_ack("/users/delete", json!({ "userID": user_id }))
            .await
    }

    async fn list_files(&self) -> ApiResult<Vec<FileRecord>> {
        let resp = self.http.get(self.url("/files/list")).send().await?;
        let list: FileList = Self::read_json(Self::check(resp).await?).await?;
        Ok(list.files_list)
    }

    async fn upload(&self, file_name: &str, data: Vec<u8>) -> ApiResult<UploadReceipt> {
        let size = data.len();
        let form = Form::new().part("ufile", Part::bytes(data).file_name(file_name.to_string()));
        let resp = self
            .http
            .post(self.url("/files/upload"))
            .multipart(form)
            .send()
            .await?;
        let receipt: UploadReceipt = Self::read_json(Self::check(resp).await?).await?;
        tracing::debug!(file_id = %receipt.file_id, bytes = size, "uploaded");
        Ok(receipt)
    }

    async fn download(&self, file_id: &str) -> ApiResult<Download> {
        let resp = self
            .http
            .post(self.url("/files/download"))
            .json(&json!({ "file_id": file_id }))
            .send()
            .await?;
        let resp = Self::check(resp).await?;

        let file_name = resp
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(attachment_filename)
            .unwrap_or_else(|| {
                tracing::warn!(file_id, "no file name in response, using the file id");
                file_id.to_string()
            });
        let data = resp.bytes().await.map_err(ApiError::body)?.to_vec();
        tracing::debug!(file_id, bytes = data.len(), "downloaded");
        Ok(Download { file_name, data })
    }

    async fn delete_file(&self, file_id: &str) -> ApiResult<()> {
        self.post_ack("/files/delete", json!({ "file_id": file_id }))
            .await
    }
}

/// Extract the file name from `attachment; filename="<name>"`.
pub(crate) fn attachment_filename(header: &str) -> Option<String> {
    const KEY: &str = "filename=";
    let start = header.find(KEY)? + KEY.len();
    let rest = &header[start..];
    let name = match rest.strip_prefix('"') {
        Some(quoted) => &quoted[..quoted.find('"')?],
        None => rest.split(';').next()?.trim(),
    };
    (!name.is_empty()).then(|| name.to_string())
}
