//! Bundle store: open, unlock, create and write the credential bundle
//!
//! Opening never prompts. The caller inspects [`Opened`] and supplies a
//! password when the bundle is locked or has to be created.

use std::path::{Path, PathBuf};

use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use securebox_crypto::{cipher, derive_key, KdfParams, KeyPair, IV_LEN, SALT_LEN};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{BundleError, BundleResult};

/// Plain representation, inside the bundle directory
pub const PLAIN_FILE: &str = "bundle.toml";

/// Encrypted representation, inside the bundle directory
pub const ENCRYPTED_FILE: &str = "bundle.enc";

/// Serialized field map. Identical keys in both representations.
#[derive(Default, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct Fields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    /// PKCS#8 PEM private key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key: Option<String>,
}

#[derive(Deserialize)]
struct PlainFile {
    #[serde(default)]
    securebox: Fields,
}

#[derive(Serialize)]
struct PlainFileRef<'a> {
    securebox: &'a Fields,
}

/// The user's credentials, plus the password the bundle is stored under.
///
/// An empty password means the bundle is written in plain form.
pub struct Bundle {
    token: Option<String>,
    user_id: Option<String>,
    key: Option<KeyPair>,
    password: SecretString,
}

impl Bundle {
    fn empty(password: SecretString) -> Self {
        Self {
            token: None,
            user_id: None,
            key: None,
            password,
        }
    }

    fn from_fields(fields: &mut Fields, password: SecretString) -> Result<Self, String> {
        let key = match fields.key.take() {
            Some(pem) => {
                let pem = Zeroizing::new(pem);
                let pair = KeyPair::from_pem(&pem).map_err(|e| e.to_string())?;
                if !pair.has_private() {
                    return Err("stored key has no private half".into());
                }
                Some(pair)
            }
            None => None,
        };
        Ok(Self {
            token: fields.token.take(),
            user_id: fields.user_id.take(),
            key,
            password,
        })
    }

    fn to_fields(&self) -> BundleResult<Fields> {
        let key = match &self.key {
            Some(pair) => Some(pair.to_pem()?.to_string()),
            None => None,
        };
        Ok(Fields {
            token: self.token.clone(),
            user_id: self.user_id.clone(),
            key,
        })
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn key_pair(&self) -> Option<&KeyPair> {
        self.key.as_ref()
    }

    pub fn require_token(&self) -> BundleResult<&str> {
        self.token().ok_or(BundleError::MissingField("token"))
    }

    pub fn require_user_id(&self) -> BundleResult<&str> {
        self.user_id().ok_or(BundleError::MissingField("user id"))
    }

    pub fn require_key_pair(&self) -> BundleResult<&KeyPair> {
        self.key_pair().ok_or(BundleError::MissingField("key pair"))
    }

    pub fn set_token(&mut self, token: impl Into<String>) {
        self.token = Some(token.into());
    }

    /// Replace the identity after a successful registration.
    pub fn set_identity(&mut self, user_id: impl Into<String>, key: KeyPair) {
        self.user_id = Some(user_id.into());
        self.key = Some(key);
    }

    /// Drop the identity after the user was deleted remotely. The token stays.
    pub fn clear_identity(&mut self) {
        self.user_id = None;
        self.key = None;
    }

    pub fn is_encrypted(&self) -> bool {
        !self.password.expose_secret().is_empty()
    }
}

impl std::fmt::Debug for Bundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bundle")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("user_id", &self.user_id)
            .field("key", &self.key)
            .field("encrypted", &self.is_encrypted())
            .finish()
    }
}

/// Result of [`BundleStore::open`]
#[derive(Debug)]
pub enum Opened {
    /// Plain bundle, loaded without a password
    Plain(Bundle),
    /// Encrypted bundle waiting for [`LockedBundle::unlock`]
    Locked(LockedBundle),
    /// Nothing on disk yet; initialise with [`BundleStore::create`]
    Missing,
}

/// Encrypted bundle bytes, read but not yet decrypted
pub struct LockedBundle {
    path: PathBuf,
    raw: Vec<u8>,
    kdf: KdfParams,
}

impl LockedBundle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Derive the key from `password` and decrypt.
    ///
    /// A short file, bad padding or an undecodable field map all surface as
    /// [`BundleError::IncorrectPassword`].
    pub fn unlock(self, password: SecretString) -> BundleResult<Bundle> {
        if self.raw.len() < SALT_LEN + IV_LEN {
            tracing::debug!(len = self.raw.len(), "encrypted bundle too short");
            return Err(BundleError::IncorrectPassword);
        }
        let (salt, rest) = self.raw.split_at(SALT_LEN);
        let (iv, ciphertext) = rest.split_at(IV_LEN);

        let key = derive_key(&password, salt, &self.kdf)?;
        let plain = Zeroizing::new(
            cipher::decrypt(&key, iv, ciphertext).map_err(|_| BundleError::IncorrectPassword)?,
        );
        let mut fields: Fields =
            serde_json::from_slice(&plain).map_err(|_| BundleError::IncorrectPassword)?;
        Bundle::from_fields(&mut fields, password).map_err(|_| BundleError::IncorrectPassword)
    }
}

impl std::fmt::Debug for LockedBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockedBundle")
            .field("path", &self.path)
            .field("len", &self.raw.len())
            .finish()
    }
}

/// Location and KDF parameters of the bundle
#[derive(Debug, Clone)]
pub struct BundleStore {
    dir: PathBuf,
    kdf: KdfParams,
}

impl BundleStore {
    pub fn new(dir: impl Into<PathBuf>, kdf: KdfParams) -> Self {
        Self {
            dir: dir.into(),
            kdf,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn plain_path(&self) -> PathBuf {
        self.dir.join(PLAIN_FILE)
    }

    pub fn encrypted_path(&self) -> PathBuf {
        self.dir.join(ENCRYPTED_FILE)
    }

    /// Look at what is on disk. The encrypted form wins if both exist.
    pub async fn open(&self) -> BundleResult<Opened> {
        let enc_path = self.encrypted_path();
        match tokio::fs::read(&enc_path).await {
            Ok(raw) => {
                tracing::debug!(path = %enc_path.display(), "found encrypted bundle");
                return Ok(Opened::Locked(LockedBundle {
                    path: enc_path,
                    raw,
                    kdf: self.kdf.clone(),
                }));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(BundleError::io(enc_path, e)),
        }

        let plain_path = self.plain_path();
        let text = match tokio::fs::read_to_string(&plain_path).await {
            Ok(text) => Zeroizing::new(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(dir = %self.dir.display(), "no bundle found");
                return Ok(Opened::Missing);
            }
            Err(e) => return Err(BundleError::io(plain_path, e)),
        };

        let mut plain: PlainFile = toml::from_str(&text).map_err(|e| BundleError::Malformed {
            path: plain_path.clone(),
            reason: e.to_string(),
        })?;
        let bundle = Bundle::from_fields(&mut plain.securebox, SecretString::from(String::new()))
            .map_err(|reason| BundleError::Malformed {
                path: plain_path.clone(),
                reason,
            })?;
        tracing::debug!(path = %plain_path.display(), "loaded plain bundle");
        Ok(Opened::Plain(bundle))
    }

    /// Start a new, empty bundle. Nothing is written until [`BundleStore::write`].
    pub fn create(&self, password: SecretString) -> Bundle {
        Bundle::empty(password)
    }

    /// Rewrite the whole bundle, replacing whichever form was on disk.
    ///
    /// Encrypted writes draw a fresh salt and IV every time.
    pub async fn write(&self, bundle: &Bundle) -> BundleResult<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| BundleError::io(&self.dir, e))?;

        let fields = bundle.to_fields()?;
        let (target, stale, contents) = if bundle.is_encrypted() {
            let mut salt = [0u8; SALT_LEN];
            rand::thread_rng().fill_bytes(&mut salt);
            let key = derive_key(&bundle.password, &salt, &self.kdf)?;

            let json = Zeroizing::new(serde_json::to_vec(&fields).map_err(|e| {
                BundleError::Malformed {
                    path: self.encrypted_path(),
                    reason: e.to_string(),
                }
            })?);
            let (iv, ciphertext) = cipher::encrypt_with_key(&key, &json)?;

            let mut out = Vec::with_capacity(SALT_LEN + IV_LEN + ciphertext.len());
            out.extend_from_slice(&salt);
            out.extend_from_slice(&iv);
            out.extend_from_slice(&ciphertext);
            (self.encrypted_path(), self.plain_path(), Zeroizing::new(out))
        } else {
            let text = toml::to_string(&PlainFileRef {
                securebox: &fields,
            })
            .map_err(|e| BundleError::Malformed {
                path: self.plain_path(),
                reason: e.to_string(),
            })?;
            (
                self.plain_path(),
                self.encrypted_path(),
                Zeroizing::new(text.into_bytes()),
            )
        };

        write_atomic(&target, &contents).await?;
        remove_if_exists(&stale).await?;
        tracing::info!(path = %target.display(), encrypted = bundle.is_encrypted(), "bundle written");
        Ok(())
    }
}

/// Write to a sibling temp file, then rename over `path`.
async fn write_atomic(path: &Path, contents: &[u8]) -> BundleResult<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    let tmp_path = parent.join(format!(
        ".{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy()
    ));

    let mut opts = tokio::fs::OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    opts.mode(0o600);

    let mut file = opts
        .open(&tmp_path)
        .await
        .map_err(|e| BundleError::io(&tmp_path, e))?;
    file.write_all(contents)
        .await
        .map_err(|e| BundleError::io(&tmp_path, e))?;
    file.sync_all()
        .await
        .map_err(|e| BundleError::io(&tmp_path, e))?;
    drop(file);

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| BundleError::io(path, e))
}

async fn remove_if_exists(path: &Path) -> BundleResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "removed stale bundle form");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(BundleError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;

    fn identity() -> &'static KeyPair {
        static KEY: OnceLock<KeyPair> = OnceLock::new();
        KEY.get_or_init(|| KeyPair::generate(1024).unwrap())
    }

    fn fast_kdf() -> KdfParams {
        KdfParams {
            mem_cost_kib: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }

    fn store(dir: &Path) -> BundleStore {
        BundleStore::new(dir.join("box"), fast_kdf())
    }

    fn populated(password: &str) -> Bundle {
        let mut bundle = Bundle::empty(SecretString::from(password.to_string()));
        bundle.set_token("tok-123");
        bundle.set_identity("42", identity().clone());
        bundle
    }

    fn pw(s: &str) -> SecretString {
        SecretString::from(s.to_string())
    }

    #[tokio::test]
    async fn test_missing_bundle() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(store(tmp.path()).open().await.unwrap(), Opened::Missing));
    }

    #[tokio::test]
    async fn test_encrypted_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        store.write(&populated("pw1")).await.unwrap();

        assert!(store.encrypted_path().exists());
        assert!(!store.plain_path().exists());

        let Opened::Locked(locked) = store.open().await.unwrap() else {
            panic!("expected a locked bundle");
        };
        let bundle = locked.unlock(pw("pw1")).unwrap();
        assert_eq!(bundle.token(), Some("tok-123"));
        assert_eq!(bundle.user_id(), Some("42"));
        assert_eq!(
            *bundle.key_pair().unwrap().to_pem().unwrap(),
            *identity().to_pem().unwrap()
        );
        assert!(bundle.is_encrypted());
    }

    #[tokio::test]
    async fn test_wrong_password_is_incorrect_password() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        store.write(&populated("pw1")).await.unwrap();

        let Opened::Locked(locked) = store.open().await.unwrap() else {
            panic!("expected a locked bundle");
        };
        assert!(matches!(
            locked.unlock(pw("pw2")),
            Err(BundleError::IncorrectPassword)
        ));
    }

    #[tokio::test]
    async fn test_corrupted_file_is_incorrect_password() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        store.write(&populated("pw1")).await.unwrap();

        let raw = std::fs::read(store.encrypted_path()).unwrap();
        std::fs::write(store.encrypted_path(), &raw[..raw.len() - 1]).unwrap();
        let Opened::Locked(locked) = store.open().await.unwrap() else {
            panic!("expected a locked bundle");
        };
        assert!(matches!(
            locked.unlock(pw("pw1")),
            Err(BundleError::IncorrectPassword)
        ));

        std::fs::write(store.encrypted_path(), b"short").unwrap();
        let Opened::Locked(locked) = store.open().await.unwrap() else {
            panic!("expected a locked bundle");
        };
        assert!(matches!(
            locked.unlock(pw("pw1")),
            Err(BundleError::IncorrectPassword)
        ));
    }

    #[tokio::test]
    async fn test_empty_password_writes_plain() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        store.write(&populated("")).await.unwrap();

        assert!(store.plain_path().exists());
        assert!(!store.encrypted_path().exists());
        let text = std::fs::read_to_string(store.plain_path()).unwrap();
        assert!(text.contains("[securebox]"));
        assert!(text.contains("BEGIN PRIVATE KEY"));

        let Opened::Plain(bundle) = store.open().await.unwrap() else {
            panic!("expected a plain bundle");
        };
        assert_eq!(bundle.token(), Some("tok-123"));
        assert_eq!(bundle.user_id(), Some("42"));
        assert!(!bundle.is_encrypted());
    }

    #[tokio::test]
    async fn test_write_replaces_other_form() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());

        store.write(&populated("")).await.unwrap();
        store.write(&populated("secret")).await.unwrap();
        assert!(store.encrypted_path().exists());
        assert!(!store.plain_path().exists());

        store.write(&populated("")).await.unwrap();
        assert!(store.plain_path().exists());
        assert!(!store.encrypted_path().exists());
    }

    #[tokio::test]
    async fn test_fresh_salt_per_write() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let bundle = populated("pw");

        store.write(&bundle).await.unwrap();
        let first = std::fs::read(store.encrypted_path()).unwrap();
        store.write(&bundle).await.unwrap();
        let second = std::fs::read(store.encrypted_path()).unwrap();

        assert_ne!(first[..SALT_LEN], second[..SALT_LEN]);
        assert_ne!(first, second);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_written_files_are_private() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        for password in ["", "pw"] {
            store.write(&populated(password)).await.unwrap();
            let path = if password.is_empty() {
                store.plain_path()
            } else {
                store.encrypted_path()
            };
            let mode = std::fs::metadata(path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[tokio::test]
    async fn test_hand_edited_plain_file() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        std::fs::create_dir_all(store.dir()).unwrap();
        std::fs::write(store.plain_path(), "[securebox]\ntoken = \"abc\"\n").unwrap();

        let Opened::Plain(bundle) = store.open().await.unwrap() else {
            panic!("expected a plain bundle");
        };
        assert_eq!(bundle.token(), Some("abc"));
        assert!(bundle.user_id().is_none());
        assert!(matches!(
            bundle.require_key_pair(),
            Err(BundleError::MissingField(_))
        ));
    }

    #[tokio::test]
    async fn test_garbage_plain_file_is_malformed() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        std::fs::create_dir_all(store.dir()).unwrap();
        std::fs::write(store.plain_path(), "this is [not toml").unwrap();
        assert!(matches!(
            store.open().await,
            Err(BundleError::Malformed { .. })
        ));

        std::fs::write(store.plain_path(), "[securebox]\nkey = \"nope\"\n").unwrap();
        assert!(matches!(
            store.open().await,
            Err(BundleError::Malformed { .. })
        ));
    }

    #[tokio::test]
    async fn test_create_then_write() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let mut bundle = store.create(pw("pw"));
        assert!(bundle.require_token().is_err());
        bundle.set_token("t");
        store.write(&bundle).await.unwrap();

        let Opened::Locked(locked) = store.open().await.unwrap() else {
            panic!("expected a locked bundle");
        };
        let bundle = locked.unlock(pw("pw")).unwrap();
        assert_eq!(bundle.token(), Some("t"));
        assert!(bundle.key_pair().is_none());
    }

    #[test]
    fn test_debug_hides_token() {
        let rendered = format!("{:?}", populated("pw"));
        assert!(!rendered.contains("tok-123"));
        assert!(!rendered.contains("BEGIN"));
    }
}
