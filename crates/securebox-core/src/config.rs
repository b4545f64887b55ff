use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level client configuration (loaded from securebox.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecureBoxConfig {
    pub server: ServerConfig,
    pub crypto: CryptoConfig,
    pub bundle: BundleConfig,
    pub client: ClientConfig,
    pub logging: LoggingConfig,
}

impl SecureBoxConfig {
    /// Load from `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!("config file not found: {} (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config: {}", path.display()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL of the directory/storage REST API
    pub base_url: String,
    /// Request timeout in seconds (0 = none)
    pub timeout_secs: u64,
}

/// Key sizes and wire format
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// RSA modulus size for new identities (default: 2048)
    pub rsa_bits: usize,
    /// Per-message AES key size in bits: 128, 192 or 256 (default: 256)
    pub symmetric_key_bits: usize,
    /// Envelope framing: "framed" or "legacy"
    pub envelope_format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleConfig {
    /// Directory holding bundle.toml / bundle.enc
    pub dir: PathBuf,
    /// Argon2id memory cost in KiB (default: 65536 = 64 MiB)
    pub argon2_mem_cost_kib: u32,
    /// Argon2id time cost (iterations, default: 3)
    pub argon2_time_cost: u32,
    /// Argon2id parallelism (default: 4)
    pub argon2_parallelism: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Concurrent requests when deleting several files (default: 4)
    pub delete_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
    /// Also append logs (plain text) to this file
    pub file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://tfg.eps.uam.es:8080/api".into(),
            timeout_secs: 0,
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            rsa_bits: 2048,
            symmetric_key_bits: 256,
            envelope_format: "framed".into(),
        }
    }
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("~/.config/securebox"),
            argon2_mem_cost_kib: 65536,
            argon2_time_cost: 3,
            argon2_parallelism: 4,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            delete_concurrency: 4,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
            file: None,
        }
    }
}

/// Expand `~` in path to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    match s.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
            PathBuf::from(home).join(rest)
        }
        None => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[server]
base_url = "https://box.example.com/api"
timeout_secs = 30

[crypto]
rsa_bits = 4096
symmetric_key_bits = 128
envelope_format = "legacy"

[bundle]
dir = "/var/lib/securebox"
argon2_mem_cost_kib = 131072
argon2_time_cost = 4
argon2_parallelism = 8

[client]
delete_concurrency = 8

[logging]
level = "debug"
format = "json"
file = "~/.cache/securebox/securebox.log"
"#;
        let config: SecureBoxConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.server.base_url, "https://box.example.com/api");
        assert_eq!(config.server.timeout_secs, 30);
        assert_eq!(config.crypto.rsa_bits, 4096);
        assert_eq!(config.crypto.symmetric_key_bits, 128);
        assert_eq!(config.crypto.envelope_format, "legacy");
        assert_eq!(config.bundle.dir, PathBuf::from("/var/lib/securebox"));
        assert_eq!(config.bundle.argon2_mem_cost_kib, 131072);
        assert_eq!(config.client.delete_concurrency, 8);
        assert_eq!(config.logging.format, "json");
        assert_eq!(
            config.logging.file,
            Some(PathBuf::from("~/.cache/securebox/securebox.log"))
        );
    }

    #[test]
    fn test_parse_defaults() {
        let config: SecureBoxConfig = toml::from_str("").unwrap();

        assert_eq!(config.crypto.rsa_bits, 2048);
        assert_eq!(config.crypto.symmetric_key_bits, 256);
        assert_eq!(config.crypto.envelope_format, "framed");
        assert_eq!(config.server.timeout_secs, 0);
        assert_eq!(config.bundle.argon2_time_cost, 3);
        assert_eq!(config.client.delete_concurrency, 4);
        assert_eq!(config.logging.level, "info");
        assert!(config.logging.file.is_none());
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[crypto]
rsa_bits = 3072
"#;
        let config: SecureBoxConfig = toml::from_str(toml_str).unwrap();

        // Overridden
        assert_eq!(config.crypto.rsa_bits, 3072);
        // Defaults
        assert_eq!(config.crypto.symmetric_key_bits, 256);
        assert_eq!(config.bundle.dir, PathBuf::from("~/.config/securebox"));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SecureBoxConfig::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.crypto.rsa_bits, 2048);
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("securebox.toml");
        std::fs::write(&path, "[crypto\nrsa_bits = ").unwrap();
        assert!(SecureBoxConfig::load(&path).is_err());
    }

    #[test]
    fn test_expand_tilde() {
        let expanded = expand_tilde(Path::new("~/.config/securebox"));
        assert!(!expanded.to_string_lossy().starts_with("~/"));
        assert_eq!(expand_tilde(Path::new("/abs")), PathBuf::from("/abs"));
    }
}
