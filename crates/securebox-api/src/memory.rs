//! In-process directory with the same limits and error codes as the service
//!
//! One [`MemoryServer`] is shared by any number of [`MemoryDirectory`]
//! handles, one per token, so several users can exchange files in a test.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use securebox_core::{FileRecord, Registration, UploadReceipt, UserRecord};
use securebox_crypto::PublicKey;

use crate::directory::{Directory, Download};
use crate::error::{ApiError, ApiResult, RemoteErrorKind};

/// Largest accepted upload (FILE1 above this)
pub const MAX_FILE_SIZE: usize = 50 * 1024;

/// Most files one token may hold (FILE3 beyond this)
pub const MAX_FILES_PER_USER: usize = 20;

struct StoredFile {
    owner: String,
    name: String,
    data: Vec<u8>,
}

#[derive(Default)]
struct State {
    /// token -> user registered with it
    users: HashMap<String, UserRecord>,
    files: HashMap<String, StoredFile>,
    next_user_id: u64,
    last_ts: f64,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    echo_user_id: bool,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// Shared state behind every [`MemoryDirectory`] handle.
#[derive(Clone, Default)]
pub struct MemoryServer {
    shared: Arc<Shared>,
}

impl MemoryServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Echo the new user id from `register`, like newer deployments do.
    pub fn with_user_id_echo(mut self) -> Self {
        self.configure(|s| s.echo_user_id = true);
        self
    }

    /// Delay every call, so concurrent callers overlap.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.configure(|s| s.latency = Some(latency));
        self
    }

    fn configure(&mut self, f: impl FnOnce(&mut Shared)) {
        match Arc::get_mut(&mut self.shared) {
            Some(shared) => f(shared),
            None => tracing::warn!("memory server already shared; configuration ignored"),
        }
    }

    /// A directory handle acting with `token`.
    pub fn connect(&self, token: impl Into<String>) -> MemoryDirectory {
        MemoryDirectory {
            shared: Arc::clone(&self.shared),
            token: token.into(),
        }
    }

    /// Highest number of calls that were in progress at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.shared.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn file_count(&self) -> usize {
        lock(&self.shared.state).files.len()
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct InFlight<'a>(&'a Shared);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// [`Directory`] over a [`MemoryServer`], authenticated by one token.
#[derive(Clone)]
pub struct MemoryDirectory {
    shared: Arc<Shared>,
    token: String,
}

impl MemoryDirectory {
    /// Count the call, validate the token and apply the configured latency.
    async fn enter(&self) -> ApiResult<InFlight<'_>> {
        let now = self.shared.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.shared);

        if self.token.trim().is_empty() {
            return Err(RemoteErrorKind::WrongToken.into());
        }
        if let Some(latency) = self.shared.latency {
            tokio::time::sleep(latency).await;
        }
        Ok(guard)
    }

    fn state(&self) -> MutexGuard<'_, State> {
        lock(&self.shared.state)
    }
}

fn now_ts(last: f64) -> f64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default();
    // strictly increasing, so timestamps identify registrations
    if now > last {
        now
    } else {
        last + 0.001
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn register(
        &self,
        name: &str,
        email: &str,
        public_key_pem: &str,
    ) -> ApiResult<Registration> {
        let _call = self.enter().await?;
        if name.is_empty() || email.is_empty() || PublicKey::from_pem(public_key_pem).is_err() {
            return Err(RemoteErrorKind::IncorrectArgs.into());
        }

        let mut state = self.state();
        let ts = now_ts(state.last_ts);
        state.last_ts = ts;
        let user_id = match state.users.get(&self.token) {
            Some(existing) => existing.user_id.clone(),
            None => {
                state.next_user_id += 1;
                format!("{}", 100_000 + state.next_user_id)
            }
        };
        state.users.insert(
            self.token.clone(),
            UserRecord {
                user_id: user_id.clone(),
                name: name.to_string(),
                email: email.to_string(),
                public_key: public_key_pem.to_string(),
                ts,
            },
        );
        tracing::debug!(user_id = %user_id, "registered");

        Ok(Registration {
            user_id: self.shared.echo_user_id.then_some(user_id),
            ts,
        })
    }

    async fn search(&self, query: &str) -> ApiResult<Vec<UserRecord>> {
        let _call = self.enter().await?;
        let needle = query.to_lowercase();
        let state = self.state();
        let mut found: Vec<UserRecord> = state
            .users
            .values()
            .filter(|u| {
                u.name.to_lowercase().contains(&needle) || u.email.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| a.ts.total_cmp(&b.ts));
        Ok(found)
    }

    async fn public_key(&self, user_id: &str) -> ApiResult<PublicKey> {
        let _call = self.enter().await?;
        let pem = self
            .state()
            .users
            .values()
            .find(|u| u.user_id == user_id)
            .map(|u| u.public_key.clone())
            .ok_or(ApiError::from(RemoteErrorKind::UserNotFound))?;
        PublicKey::from_pem(&pem).map_err(|e| ApiError::BadResponse(e.to_string()))
    }

    async fn delete_user(&self, user_id: &str) -> ApiResult<()> {
        let _call = self.enter().await?;
        let mut state = self.state();
        match state.users.get(&self.token) {
            Some(u) if u.user_id == user_id => {
                state.users.remove(&self.token);
                Ok(())
            }
            _ => Err(RemoteErrorKind::UserNotFound.into()),
        }
    }

    async fn list_files(&self) -> ApiResult<Vec<FileRecord>> {
        let _call = self.enter().await?;
        let state = self.state();
        let mut files: Vec<FileRecord> = state
            .files
            .iter()
            .filter(|(_, f)| f.owner == self.token)
            .map(|(id, f)| FileRecord {
                file_id: id.clone(),
                file_name: f.name.clone(),
            })
            .collect();
        files.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(files)
    }

    async fn upload(&self, file_name: &str, data: Vec<u8>) -> ApiResult<UploadReceipt> {
        let _call = self.enter().await?;
        if file_name.is_empty() {
            return Err(RemoteErrorKind::IncorrectArgs.into());
        }
        if data.len() > MAX_FILE_SIZE {
            return Err(ApiError::remote(
                "FILE1",
                Some(format!("{} bytes, limit {MAX_FILE_SIZE}", data.len())),
            ));
        }

        let mut state = self.state();
        let owned = state.files.values().filter(|f| f.owner == self.token).count();
        if owned >= MAX_FILES_PER_USER {
            return Err(RemoteErrorKind::TooManyFiles.into());
        }

        let file_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        let file_size = data.len() as u64;
        state.files.insert(
            file_id.clone(),
            StoredFile {
                owner: self.token.clone(),
                name: file_name.to_string(),
                data,
            },
        );
        Ok(UploadReceipt { file_id, file_size })
    }

    async fn download(&self, file_id: &str) -> ApiResult<Download> {
        let _call = self.enter().await?;
        let state = self.state();
        let file = state
            .files
            .get(file_id)
            .ok_or(ApiError::from(RemoteErrorKind::FileNotFound))?;
        Ok(Download {
            file_name: file.name.clone(),
            data: file.data.clone(),
        })
    }

    async fn delete_file(&self, file_id: &str) -> ApiResult<()> {
        let _call = self.enter().await?;
        let mut state = self.state();
        match state.files.get(file_id) {
            Some(f) if f.owner == self.token => {
                state.files.remove(file_id);
                Ok(())
            }
            _ => Err(RemoteErrorKind::FileNotFound.into()),
        }
    }
}
