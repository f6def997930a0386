use crate::errors::VaultError;
use aes_gcm::{
    aead::{Aead as _, KeyInit as _},
    Aes256Gcm, Nonce,
};
use argon2::{
    password_hash::{PasswordHasher as _, SaltString},
    Algorithm, Argon2, Params, Version,
};
use base64::Engine as _;
use eyre::Context as _;
use hkdf::Hkdf;
use rand::Rng as _;
use secrecy::{ExposeSecret as _, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::{Mutex, OnceLock};
use zeroize::Zeroizing;

/// Self-describing sealed secret: versioned envelope carrying its own nonce,
/// so opening needs nothing beyond the master key.
///
/// `v == 0` is the empty sentinel: sealing empty plaintext never invokes the
/// cipher (a fixed ciphertext for "" would leak which records are empty).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SealedSecret {
    pub v: u8,
    pub nonce_b64: String,
    pub ct_b64: String,
}

impl SealedSecret {
    pub fn empty() -> Self {
        Self {
            v: 0,
            nonce_b64: String::new(),
            ct_b64: String::new(),
        }
    }

    pub const fn is_empty(&self) -> bool {
        self.v == 0
    }
}

pub fn fill_random(buf: &mut [u8]) {
    let mut rng = rand::rng();
    rng.fill_bytes(buf);
}

pub fn random_salt16() -> [u8; 16] {
    let mut s = [0_u8; 16];
    fill_random(&mut s);
    s
}

/// Generate a fresh base64 master secret for `KEYWARDEN_MASTER_SECRET`.
pub fn generate_master_secret() -> String {
    let mut bytes = [0_u8; 32];
    fill_random(&mut bytes);
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Derive the 32-byte master key from the configured secret.
///
/// Argon2id parameters are frozen to avoid accidental changes across
/// dependency updates (these match `argon2::Params::DEFAULT` in 0.5.x).
pub fn derive_master_key(secret: &SecretString, salt16: &[u8; 16]) -> eyre::Result<[u8; 32]> {
    let params =
        Params::new(19 * 1024, 2, 1, Some(32)).map_err(|e| eyre::eyre!("argon2 params: {e}"))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let salt = SaltString::encode_b64(salt16).map_err(|e| eyre::eyre!("encode salt: {e}"))?;

    let hash = argon2
        .hash_password(secret.expose_secret().as_bytes(), &salt)
        .map_err(|e| eyre::eyre!("argon2 hash: {e}"))?;
    let bytes = hash
        .hash
        .ok_or_else(|| eyre::eyre!("argon2 missing hash"))?;
    let raw = bytes.as_bytes();
    let Some(prefix) = raw.get(..32) else {
        eyre::bail!("argon2 hash too short");
    };
    let mut out = [0_u8; 32];
    out.copy_from_slice(prefix);
    Ok(out)
}

/// Authenticated encryption of single opaque secrets under purpose-bound
/// subkeys of the master key.
pub struct Cipher {
    key: Zeroizing<[u8; 32]>,
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cipher").finish_non_exhaustive()
    }
}

static MASTER: OnceLock<Cipher> = OnceLock::new();
static DERIVE_GUARD: Mutex<()> = Mutex::new(());

impl Cipher {
    pub fn new(key: [u8; 32]) -> Self {
        Self {
            key: Zeroizing::new(key),
        }
    }

    /// Process-wide cipher, derived lazily on first use and cached for the
    /// life of the process. Derivation runs at most once: the guard makes
    /// concurrent first callers wait rather than re-derive.
    pub fn global(secret: &SecretString, salt16: &[u8; 16]) -> eyre::Result<&'static Self> {
        if let Some(c) = MASTER.get() {
            return Ok(c);
        }
        let guard = DERIVE_GUARD
            .lock()
            .map_err(|_| eyre::eyre!("key derivation guard poisoned"))?;
        if let Some(c) = MASTER.get() {
            return Ok(c);
        }
        let key = derive_master_key(secret, salt16)?;
        let c = MASTER.get_or_init(|| Self::new(key));
        drop(guard);
        Ok(c)
    }

    fn subkey(&self, purpose: &str) -> eyre::Result<Zeroizing<[u8; 32]>> {
        let hk = Hkdf::<Sha256>::new(None, self.key.as_ref());
        let info = format!("keywarden:{purpose}");
        let mut out = Zeroizing::new([0_u8; 32]);
        hk.expand(info.as_bytes(), out.as_mut())
            .map_err(|e| eyre::eyre!("hkdf expand: {e}"))?;
        Ok(out)
    }

    /// Seal `plaintext` under a fresh random nonce. Two calls with the same
    /// plaintext produce different envelopes.
    pub fn seal(&self, purpose: &str, plaintext: &[u8]) -> eyre::Result<SealedSecret> {
        if plaintext.is_empty() {
            return Ok(SealedSecret::empty());
        }

        let key = self.subkey(purpose)?;
        let cipher = Aes256Gcm::new_from_slice(key.as_ref()).context("aes init")?;
        let mut nonce = [0_u8; 12];
        fill_random(&mut nonce);
        let ct = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| eyre::eyre!("aes encrypt: {e}"))?;

        Ok(SealedSecret {
            v: 1,
            nonce_b64: base64::engine::general_purpose::STANDARD.encode(nonce),
            ct_b64: base64::engine::general_purpose::STANDARD.encode(ct),
        })
    }

    /// Open a sealed envelope. Tag verification failure, malformed encoding
    /// or an unknown version all surface as `Integrity`; plaintext is never
    /// partially returned.
    pub fn open(&self, purpose: &str, sealed: &SealedSecret) -> Result<Zeroizing<Vec<u8>>, VaultError> {
        if sealed.is_empty() {
            return Ok(Zeroizing::new(Vec::new()));
        }
        if sealed.v != 1 {
            return Err(VaultError::Integrity);
        }

        let key = self.subkey(purpose).map_err(|_| VaultError::Integrity)?;
        let cipher =
            Aes256Gcm::new_from_slice(key.as_ref()).map_err(|_| VaultError::Integrity)?;
        let nonce = base64::engine::general_purpose::STANDARD
            .decode(&sealed.nonce_b64)
            .map_err(|_| VaultError::Integrity)?;
        if nonce.len() != 12 {
            return Err(VaultError::Integrity);
        }
        let ct = base64::engine::general_purpose::STANDARD
            .decode(&sealed.ct_b64)
            .map_err(|_| VaultError::Integrity)?;

        let pt = cipher
            .decrypt(Nonce::from_slice(&nonce), ct.as_ref())
            .map_err(|_| VaultError::Integrity)?;
        Ok(Zeroizing::new(pt))
    }
}
