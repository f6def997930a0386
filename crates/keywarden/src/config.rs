use crate::paths::WardenPaths;
use base64::Engine as _;
use eyre::Context as _;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};

pub const DEFAULT_MAX_WALLETS: usize = 6;
pub const DEFAULT_REVEAL_WINDOW_SECONDS: u64 = 5 * 60;
pub const DEFAULT_REVEAL_TICK_SECONDS: u64 = 60;
pub const DEFAULT_PENDING_STATE_TTL_SECONDS: u64 = 15 * 60;

const fn default_max_wallets() -> usize {
    DEFAULT_MAX_WALLETS
}
const fn default_reveal_window_seconds() -> u64 {
    DEFAULT_REVEAL_WINDOW_SECONDS
}
const fn default_reveal_tick_seconds() -> u64 {
    DEFAULT_REVEAL_TICK_SECONDS
}
const fn default_pending_state_ttl_seconds() -> u64 {
    DEFAULT_PENDING_STATE_TTL_SECONDS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WardenConfig {
    /// Base64-encoded 32-byte master secret. Usually supplied via the
    /// `KEYWARDEN_MASTER_SECRET` env var instead of this file; `gen-key`
    /// prints a fresh one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub master_secret_b64: Option<String>,

    /// Salt for master-key derivation; generated on first use and then fixed
    /// for the lifetime of the data set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub master_salt_b64: Option<String>,

    #[serde(default = "default_max_wallets")]
    pub max_wallets: usize,

    /// How long a revealed secret stays on screen before redaction.
    #[serde(default = "default_reveal_window_seconds")]
    pub reveal_window_seconds: u64,

    /// Countdown-edit interval while a secret is on screen.
    #[serde(default = "default_reveal_tick_seconds")]
    pub reveal_tick_seconds: u64,

    /// Pending conversation state older than this is treated as idle.
    #[serde(default = "default_pending_state_ttl_seconds")]
    pub pending_state_ttl_seconds: u64,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            master_secret_b64: None,
            master_salt_b64: None,
            max_wallets: DEFAULT_MAX_WALLETS,
            reveal_window_seconds: DEFAULT_REVEAL_WINDOW_SECONDS,
            reveal_tick_seconds: DEFAULT_REVEAL_TICK_SECONDS,
            pending_state_ttl_seconds: DEFAULT_PENDING_STATE_TTL_SECONDS,
        }
    }
}

impl WardenConfig {
    /// Resolve the configured master secret: env var wins, then config file.
    pub fn master_secret(&self) -> eyre::Result<SecretString> {
        if let Ok(v) = std::env::var("KEYWARDEN_MASTER_SECRET") {
            let t = v.trim();
            if !t.is_empty() {
                return Ok(SecretString::new(t.to_owned().into()));
            }
        }
        if let Some(s) = &self.master_secret_b64 {
            return Ok(SecretString::new(s.clone().into()));
        }
        eyre::bail!(
            "no master secret configured; set KEYWARDEN_MASTER_SECRET (run `keywarden gen-key`)"
        )
    }
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(paths: &WardenPaths) -> Self {
        Self {
            path: paths.config_dir.join("config.toml"),
        }
    }

    pub fn load_or_init_default(&self) -> eyre::Result<WardenConfig> {
        if !self.path.exists() {
            let cfg = WardenConfig::default();
            self.save(&cfg)?;
            return Ok(cfg);
        }

        let s = fs::read_to_string(&self.path).context("read config.toml")?;
        let cfg: WardenConfig = toml::from_str(&s).context("parse config.toml")?;
        Ok(cfg)
    }

    pub fn save(&self, cfg: &WardenConfig) -> eyre::Result<()> {
        if let Some(parent) = self.path.parent() {
            crate::fsutil::ensure_private_dir(parent)?;
        }
        let s = toml::to_string_pretty(cfg).context("serialize config.toml")?;
        crate::fsutil::write_string_atomic_restrictive(
            &self.path,
            &s,
            crate::fsutil::MODE_FILE_PRIVATE,
        )
        .context("write config.toml")?;
        Ok(())
    }

    /// Return the persisted master-key salt, generating and saving one on
    /// first use. The salt is not secret but must stay stable: records
    /// sealed under a different salt fail loudly on decrypt.
    pub fn ensure_master_salt(&self, cfg: &mut WardenConfig) -> eyre::Result<[u8; 16]> {
        if let Some(s) = &cfg.master_salt_b64 {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(s)
                .context("decode master_salt_b64")?;
            if bytes.len() != 16 {
                eyre::bail!("master_salt_b64 must decode to 16 bytes");
            }
            let mut out = [0_u8; 16];
            out.copy_from_slice(&bytes);
            return Ok(out);
        }

        let salt = crate::cipher::random_salt16();
        cfg.master_salt_b64 = Some(base64::engine::general_purpose::STANDARD.encode(salt));
        self.save(cfg)?;
        Ok(salt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_toml() -> eyre::Result<()> {
        let cfg = WardenConfig::default();
        let s = toml::to_string_pretty(&cfg)?;
        let back: WardenConfig = toml::from_str(&s)?;
        assert_eq!(back.max_wallets, DEFAULT_MAX_WALLETS);
        assert_eq!(back.reveal_window_seconds, DEFAULT_REVEAL_WINDOW_SECONDS);
        Ok(())
    }

    #[test]
    fn ensure_master_salt_is_stable() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let paths = crate::paths::WardenPaths {
            config_dir: dir.path().to_path_buf(),
            data_dir: dir.path().join("data"),
            log_file: dir.path().join("data").join("log.jsonl"),
        };
        let store = ConfigStore::new(&paths);
        let mut cfg = store.load_or_init_default()?;
        let s1 = store.ensure_master_salt(&mut cfg)?;
        let mut cfg2 = store.load_or_init_default()?;
        let s2 = store.ensure_master_salt(&mut cfg2)?;
        assert_eq!(s1, s2, "salt must persist across loads");
        Ok(())
    }
}
