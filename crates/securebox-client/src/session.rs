//! Session: bundle + directory + pipeline
//!
//! Remote operations:
//!   - `create_id` / `search_id` / `delete_id`
//!   - `upload` (sign-then-seal for a receiver) / `list_files`
//!   - `download` (fetch + sender key in parallel, then unprotect)
//!   - `delete_files` (bounded worker pool, per-id report)
//!
//! Local operations write next to the input file:
//!   - `encrypt_file` → `<file>.enc`, `sign_file` → `<file>.signed`,
//!     `enc_sign_file` → `<file>.crypt`
//!   - `decrypt_file` / `verify_file` undo them

use std::path::{Path, PathBuf};
use std::sync::Arc;

use securebox_api::{Directory, RemoteErrorKind};
use securebox_core::{FileRecord, SecureBoxConfig, UploadReceipt, UserRecord};
use securebox_crypto::{
    envelope, pipeline, KdfParams, KeyPair, KeySize, PublicKey, SealOptions, WireFormat,
};
use securebox_secrets::{Bundle, BundleStore};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{ClientError, ClientResult};

/// Per-id outcome of [`Session::delete_files`], in input order
pub type DeleteReport = Vec<(String, ClientResult<()>)>;

const ENCRYPTED_EXT: &str = "enc";
const SIGNED_EXT: &str = "signed";
const PROTECTED_EXT: &str = "crypt";

/// Tunables a session runs with
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub seal: SealOptions,
    /// Modulus size for identities created by this session
    pub rsa_bits: usize,
    /// Concurrent requests in [`Session::delete_files`]
    pub delete_concurrency: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            seal: SealOptions::default(),
            rsa_bits: securebox_crypto::DEFAULT_RSA_BITS,
            delete_concurrency: 4,
        }
    }
}

impl SessionOptions {
    pub fn from_config(config: &SecureBoxConfig) -> ClientResult<Self> {
        let format: WireFormat = config
            .crypto
            .envelope_format
            .parse()
            .map_err(|e: securebox_crypto::CryptoError| ClientError::Config(e.to_string()))?;
        let key_size = KeySize::from_bits(config.crypto.symmetric_key_bits)
            .map_err(|e| ClientError::Config(e.to_string()))?;
        if config.crypto.rsa_bits < securebox_crypto::MIN_RSA_BITS {
            return Err(ClientError::Config(format!(
                "crypto.rsa_bits = {} is below the minimum of {}",
                config.crypto.rsa_bits,
                securebox_crypto::MIN_RSA_BITS
            )));
        }
        Ok(Self {
            seal: SealOptions { format, key_size },
            rsa_bits: config.crypto.rsa_bits,
            delete_concurrency: config.client.delete_concurrency.max(1),
        })
    }
}

/// The bundle store described by `config.bundle`.
pub fn bundle_store(config: &SecureBoxConfig) -> BundleStore {
    let kdf = KdfParams {
        mem_cost_kib: config.bundle.argon2_mem_cost_kib,
        time_cost: config.bundle.argon2_time_cost,
        parallelism: config.bundle.argon2_parallelism,
    };
    BundleStore::new(securebox_core::config::expand_tilde(&config.bundle.dir), kdf)
}

/// Result of [`Session::download`]
#[derive(Debug, Clone)]
pub struct DownloadedFile {
    pub path: PathBuf,
    pub bytes: usize,
}

/// An unlocked bundle talking to one directory.
pub struct Session<D> {
    directory: Arc<D>,
    store: BundleStore,
    bundle: Bundle,
    options: SessionOptions,
}

impl<D: Directory + 'static> Session<D> {
    pub fn new(directory: D, store: BundleStore, bundle: Bundle, options: SessionOptions) -> Self {
        Self {
            directory: Arc::new(directory),
            store,
            bundle,
            options,
        }
    }

    pub fn bundle(&self) -> &Bundle {
        &self.bundle
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    fn key_pair(&self) -> ClientResult<&KeyPair> {
        Ok(self.bundle.require_key_pair()?)
    }

    fn format(&self) -> WireFormat {
        self.options.seal.format
    }

    // ── Identity ──────────────────────────────────────────────────────────

    /// Generate a key pair, register it, and store the new identity in the bundle.
    ///
    /// Returns the user id. When the service does not echo one, the user
    /// registered with `email` closest in time to this registration is taken.
    pub async fn create_id(&mut self, name: &str, email: &str) -> ClientResult<String> {
        let bits = self.options.rsa_bits;
        info!(bits, "generating identity key");
        let key = tokio::task::spawn_blocking(move || KeyPair::generate(bits))
            .await
            .map_err(|e| ClientError::Task(format!("key generation: {e}")))??;

        let public_pem = key.public().to_pem()?;
        let registration = self.directory.register(name, email, &public_pem).await?;

        let user_id = match registration.user_id.clone() {
            Some(id) => id,
            None => {
                let candidates = self.directory.search(email).await?;
                registration
                    .resolve_user_id(&candidates)
                    .ok_or(ClientError::Api(RemoteErrorKind::UserNotFound.into()))?
            }
        };

        self.bundle.set_identity(user_id.clone(), key);
        self.store.write(&self.bundle).await?;
        info!(user_id = %user_id, "identity created");
        Ok(user_id)
    }

    pub async fn search_id(&self, query: &str) -> ClientResult<Vec<UserRecord>> {
        let users = self.directory.search(query).await?;
        debug!(query, found = users.len(), "search");
        Ok(users)
    }

    /// Delete the user stored in the bundle, then forget it locally.
    pub async fn delete_id(&mut self) -> ClientResult<String> {
        let user_id = self.bundle.require_user_id()?.to_string();
        self.directory.delete_user(&user_id).await?;
        self.bundle.clear_identity();
        self.store.write(&self.bundle).await?;
        info!(user_id = %user_id, "identity deleted");
        Ok(user_id)
    }

    // ── Remote files ──────────────────────────────────────────────────────

    /// Sign-then-seal `path` for `dest_id` and upload it under its file name.
    pub async fn upload(&self, path: &Path, dest_id: &str) -> ClientResult<UploadReceipt> {
        let data = read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ClientError::Config(format!("{} has no file name", path.display())))?;
        self.upload_bytes(&name, &data, dest_id).await
    }

    pub async fn upload_bytes(
        &self,
        file_name: &str,
        plaintext: &[u8],
        dest_id: &str,
    ) -> ClientResult<UploadReceipt> {
        let receiver = self.directory.public_key(dest_id).await?;
        let envelope =
            pipeline::protect(plaintext, self.key_pair()?, &receiver, &self.options.seal)?;
        let envelope_len = envelope.len();

        let receipt = self.directory.upload(file_name, envelope).await?;
        info!(
            file_id = %receipt.file_id,
            dest_id,
            bytes = plaintext.len(),
            envelope_bytes = envelope_len,
            "uploaded"
        );
        Ok(receipt)
    }

    pub async fn list_files(&self) -> ClientResult<Vec<FileRecord>> {
        Ok(self.directory.list_files().await?)
    }

    /// Fetch a file and its sender's key concurrently, then unprotect.
    ///
    /// Returns the server-side file name and the verified plaintext.
    pub async fn download_bytes(
        &self,
        file_id: &str,
        source_id: &str,
    ) -> ClientResult<(String, Vec<u8>)> {
        let (download, sender) = tokio::join!(
            self.directory.download(file_id),
            self.directory.public_key(source_id)
        );
        let download = download?;
        let sender = sender?;

        let plaintext =
            pipeline::unprotect(&download.data, self.key_pair()?, &sender, self.format())?;
        debug!(file_id, source_id, bytes = plaintext.len(), "signature verified");
        Ok((download.file_name, plaintext))
    }

    /// [`Session::download_bytes`], then write into `out_dir` under the
    /// sanitised server-side name. An existing file is never overwritten.
    pub async fn download(
        &self,
        file_id: &str,
        source_id: &str,
        out_dir: &Path,
    ) -> ClientResult<DownloadedFile> {
        let (name, plaintext) = self.download_bytes(file_id, source_id).await?;

        tokio::fs::create_dir_all(out_dir)
            .await
            .map_err(|e| ClientError::io(out_dir, e))?;
        let wanted = out_dir.join(sanitize_file_name(&name));
        let path = unused_path(Some(wanted.clone()), &wanted);
        if path != wanted {
            warn!(file_id, path = %path.display(), "{} exists, writing beside it", wanted.display());
        }
        write(&path, &plaintext).await?;
        info!(file_id, path = %path.display(), bytes = plaintext.len(), "downloaded");
        Ok(DownloadedFile {
            path,
            bytes: plaintext.len(),
        })
    }

    /// Delete several files with at most `delete_concurrency` requests in flight.
    ///
    /// Every id gets its own outcome, in input order; one failure does not
    /// stop the others. A task that panics is reported against its id.
    pub async fn delete_files(&self, file_ids: &[String]) -> DeleteReport {
        let concurrency = self.options.delete_concurrency.max(1);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut tasks = JoinSet::new();

        for (idx, file_id) in file_ids.iter().cloned().enumerate() {
            let directory = Arc::clone(&self.directory);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => directory.delete_file(&file_id).await.map_err(ClientError::from),
                    Err(e) => Err(ClientError::Task(format!("delete pool closed: {e}"))),
                };
                (idx, result)
            });
        }

        let mut slots: Vec<Option<ClientResult<()>>> = file_ids.iter().map(|_| None).collect();
        let mut lost = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, result)) => slots[idx] = Some(result),
                Err(e) => {
                    warn!("delete task failed: {e}");
                    lost.push(e.to_string());
                }
            }
        }

        let report: DeleteReport = file_ids
            .iter()
            .cloned()
            .zip(slots)
            .map(|(id, slot)| {
                let result = slot.unwrap_or_else(|| {
                    let reason = if lost.is_empty() {
                        "task did not report".to_string()
                    } else {
                        lost.join("; ")
                    };
                    Err(ClientError::Task(format!("deleting {id}: {reason}")))
                });
                (id, result)
            })
            .collect();

        let failed = report.iter().filter(|(_, r)| r.is_err()).count();
        info!(total = file_ids.len(), failed, concurrency, "bulk delete finished");
        report
    }

    // ── Local files ───────────────────────────────────────────────────────

    async fn receiver_key(&self, dest_id: &str) -> ClientResult<PublicKey> {
        Ok(self.directory.public_key(dest_id).await?)
    }

    /// Seal `path` for `dest_id` without signing. Writes `<file>.enc`.
    pub async fn encrypt_file(&self, path: &Path, dest_id: &str) -> ClientResult<PathBuf> {
        let data = read(path).await?;
        let receiver = self.receiver_key(dest_id).await?;
        let sealed = envelope::seal(&data, &receiver, &self.options.seal)?;
        let out = with_extension(path, ENCRYPTED_EXT);
        write(&out, &sealed).await?;
        info!(path = %out.display(), dest_id, "encrypted");
        Ok(out)
    }

    /// Sign `path` with the bundle key. Writes `<file>.signed`.
    pub async fn sign_file(&self, path: &Path) -> ClientResult<PathBuf> {
        let data = read(path).await?;
        let signed = pipeline::sign_only(&data, self.key_pair()?, self.format())?;
        let out = with_extension(path, SIGNED_EXT);
        write(&out, &signed).await?;
        info!(path = %out.display(), "signed");
        Ok(out)
    }

    /// Sign-then-seal `path` for `dest_id`. Writes `<file>.crypt`.
    pub async fn enc_sign_file(&self, path: &Path, dest_id: &str) -> ClientResult<PathBuf> {
        let data = read(path).await?;
        let receiver = self.receiver_key(dest_id).await?;
        let protected = pipeline::protect(&data, self.key_pair()?, &receiver, &self.options.seal)?;
        let out = with_extension(path, PROTECTED_EXT);
        write(&out, &protected).await?;
        info!(path = %out.display(), dest_id, "encrypted and signed");
        Ok(out)
    }

    /// Unseal a `.enc` file, or a `.crypt` file when `source_id` names the signer.
    ///
    /// A `.crypt` file without `source_id` is refused: its inner payload still
    /// carries the signature and is not the original content.
    pub async fn decrypt_file(&self, path: &Path, source_id: Option<&str>) -> ClientResult<PathBuf> {
        if source_id.is_none() && has_extension(path, PROTECTED_EXT) {
            return Err(ClientError::SignerRequired(path.to_path_buf()));
        }
        let data = read(path).await?;
        let receiver = self.key_pair()?;
        let plaintext = match source_id {
            Some(source_id) => {
                let sender = self.receiver_key(source_id).await?;
                pipeline::unprotect(&data, receiver, &sender, self.format())?
            }
            None => envelope::unseal(&data, receiver, self.format())?,
        };
        let out = restored_path(path);
        write(&out, &plaintext).await?;
        info!(path = %out.display(), verified = source_id.is_some(), "decrypted");
        Ok(out)
    }

    /// Check a `.signed` file against `source_id` and write the bare message.
    pub async fn verify_file(&self, path: &Path, source_id: &str) -> ClientResult<PathBuf> {
        let data = read(path).await?;
        let sender = self.receiver_key(source_id).await?;
        let message = pipeline::open_signed(&data, &sender, self.format())?;
        let out = restored_path(path);
        write(&out, &message).await?;
        info!(path = %out.display(), source_id, "signature verified");
        Ok(out)
    }
}

async fn read(path: &Path) -> ClientResult<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|e| ClientError::io(path, e))
}

async fn write(path: &Path, data: &[u8]) -> ClientResult<()> {
    tokio::fs::write(path, data)
        .await
        .map_err(|e| ClientError::io(path, e))
}

/// `notes.txt` → `notes.txt.<ext>`
fn with_extension(path: &Path, ext: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".");
    s.push(ext);
    PathBuf::from(s)
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(ext)
}

/// Strip a `.enc`/`.signed`/`.crypt` suffix. Falls back to appending `.dec`
/// when there is no such suffix or the stripped name already exists.
fn restored_path(path: &Path) -> PathBuf {
    let known = [ENCRYPTED_EXT, SIGNED_EXT, PROTECTED_EXT]
        .iter()
        .any(|ext| has_extension(path, ext));
    unused_path(known.then(|| path.with_extension("")), path)
}

/// First of `preferred`, `<path>.dec`, `<path>.dec.1`, `<path>.dec.2`, ...
/// that does not exist yet.
fn unused_path(preferred: Option<PathBuf>, path: &Path) -> PathBuf {
    if let Some(p) = preferred.filter(|p| !p.exists()) {
        return p;
    }
    let dec = with_extension(path, "dec");
    if !dec.exists() {
        return dec;
    }
    (1u32..)
        .map(|n| with_extension(&dec, &n.to_string()))
        .find(|p| !p.exists())
        .unwrap_or(dec)
}

/// Reduce a server-supplied file name to a safe final path component.
pub fn sanitize_file_name(name: &str) -> String {
    let last = name
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or_default()
        .replace('\0', "");
    if matches!(last.trim(), "" | "." | "..") {
        "download".to_string()
    } else {
        last
    }
}
