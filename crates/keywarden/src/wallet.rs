use crate::{cipher::SealedSecret, errors::VaultError};
use bip39::{Language, Mnemonic};
use chrono::{DateTime, Utc};
use ed25519_dalek::{SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

pub const NAME_MIN_CHARS: usize = 3;
pub const NAME_MAX_CHARS: usize = 24;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct WalletId(String);

impl WalletId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WalletId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WalletId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A held keypair. `address` is immutable once created; `secret` is only
/// replaced by a full re-import (modeled as create + delete).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub name: String,
    pub address: String,
    pub secret: SealedSecret,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_phrase: Option<SealedSecret>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Secret-free projection handed to flows and the transport layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WalletView {
    pub id: WalletId,
    pub name: String,
    pub address: String,
    pub active: bool,
}

impl Wallet {
    pub fn view(&self) -> WalletView {
        WalletView {
            id: self.id.clone(),
            name: self.name.clone(),
            address: self.address.clone(),
            active: self.active,
        }
    }
}

/// Plaintext key material, held only transiently between parse/generate and
/// sealing into a record.
#[cfg_attr(test, derive(Debug, PartialEq))]
pub struct KeyMaterial {
    pub seed: Zeroizing<[u8; 32]>,
    pub address: String,
    pub phrase: Option<Zeroizing<String>>,
}

pub fn address_for_seed(seed: &[u8; 32]) -> String {
    let signing = SigningKey::from_bytes(seed);
    bs58::encode(signing.verifying_key().as_bytes()).into_string()
}

fn seed_from_mnemonic(mnemonic: &Mnemonic) -> Zeroizing<[u8; 32]> {
    let full = Zeroizing::new(mnemonic.to_seed_normalized(""));
    let mut seed = Zeroizing::new([0_u8; 32]);
    seed.copy_from_slice(&full[..32]);
    seed
}

/// Generate a fresh 12-word keypair with its recovery phrase.
pub fn generate() -> eyre::Result<KeyMaterial> {
    let mnemonic = Mnemonic::generate_in(Language::English, 12)
        .map_err(|e| eyre::eyre!("generate mnemonic: {e}"))?;
    let seed = seed_from_mnemonic(&mnemonic);
    let address = address_for_seed(&seed);
    Ok(KeyMaterial {
        seed,
        address,
        phrase: Some(Zeroizing::new(mnemonic.to_string())),
    })
}

fn material_from_seed(seed: Zeroizing<[u8; 32]>) -> KeyMaterial {
    let address = address_for_seed(&seed);
    KeyMaterial {
        seed,
        address,
        phrase: None,
    }
}

fn seed_from_keypair_bytes(bytes: &[u8]) -> Result<Zeroizing<[u8; 32]>, VaultError> {
    // 64-byte layout: seed || public key. Reject pairs whose public half
    // doesn't match the seed rather than silently adopting the seed.
    let mut seed = Zeroizing::new([0_u8; 32]);
    seed.copy_from_slice(bytes.get(..32).ok_or(VaultError::InvalidCredential)?);
    let pk_bytes: [u8; 32] = bytes
        .get(32..64)
        .and_then(|s| s.try_into().ok())
        .ok_or(VaultError::InvalidCredential)?;
    let expected =
        VerifyingKey::from_bytes(&pk_bytes).map_err(|_| VaultError::InvalidCredential)?;
    let derived = SigningKey::from_bytes(&seed).verifying_key();
    if derived != expected {
        return Err(VaultError::InvalidCredential);
    }
    Ok(seed)
}

/// Auto-detect and parse user-supplied secret material.
///
/// Accepted forms, in order: BIP-39 recovery phrase; base58 64-byte keypair;
/// base58 32-byte seed; hex seed or keypair (with optional 0x prefix).
pub fn parse_secret_material(input: &str) -> Result<KeyMaterial, VaultError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(VaultError::InvalidCredential);
    }

    if s.split_whitespace().nth(1).is_some() {
        // Multi-word input is only ever a recovery phrase.
        let mnemonic = Mnemonic::parse_in_normalized(Language::English, s)
            .map_err(|_| VaultError::InvalidCredential)?;
        let seed = seed_from_mnemonic(&mnemonic);
        let address = address_for_seed(&seed);
        return Ok(KeyMaterial {
            seed,
            address,
            phrase: Some(Zeroizing::new(mnemonic.to_string())),
        });
    }

    if let Ok(bytes) = bs58::decode(s).into_vec() {
        match bytes.len() {
            64 => return Ok(material_from_seed(seed_from_keypair_bytes(&bytes)?)),
            32 => {
                let mut seed = Zeroizing::new([0_u8; 32]);
                seed.copy_from_slice(&bytes);
                return Ok(material_from_seed(seed));
            }
            _ => {}
        }
    }

    let hex_s = s.strip_prefix("0x").unwrap_or(s);
    if let Ok(bytes) = hex::decode(hex_s) {
        match bytes.len() {
            32 => {
                let mut seed = Zeroizing::new([0_u8; 32]);
                seed.copy_from_slice(&bytes);
                return Ok(material_from_seed(seed));
            }
            64 => return Ok(material_from_seed(seed_from_keypair_bytes(&bytes)?)),
            _ => {}
        }
    }

    Err(VaultError::InvalidCredential)
}

/// Display names: 3-24 chars, letters/digits/single interior spaces.
pub fn validate_display_name(name: &str) -> Result<(), VaultError> {
    let n = name.chars().count();
    if !(NAME_MIN_CHARS..=NAME_MAX_CHARS).contains(&n) {
        return Err(VaultError::InvalidName);
    }
    if name.starts_with(' ') || name.ends_with(' ') || name.contains("  ") {
        return Err(VaultError::InvalidName);
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == ' ')
    {
        return Err(VaultError::InvalidName);
    }
    Ok(())
}

/// Heuristic used for free text while idle: does this look like one of our
/// base58 addresses?
pub fn looks_like_address(s: &str) -> bool {
    let t = s.trim();
    if t.len() < 32 || t.len() > 44 || t.split_whitespace().nth(1).is_some() {
        return false;
    }
    bs58::decode(t).into_vec().is_ok_and(|b| b.len() == 32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_material_round_trips_through_its_phrase() -> eyre::Result<()> {
        let m = generate()?;
        let phrase = m.phrase.as_ref().ok_or_else(|| eyre::eyre!("no phrase"))?;
        let back = parse_secret_material(phrase)?;
        assert_eq!(back.address, m.address);
        Ok(())
    }

    #[test]
    fn parses_base58_seed_and_keypair() -> Result<(), VaultError> {
        let m = generate().map_err(|_| VaultError::InvalidCredential)?;
        let seed_b58 = bs58::encode(m.seed.as_ref()).into_string();
        let back = parse_secret_material(&seed_b58)?;
        assert_eq!(back.address, m.address);

        let signing = SigningKey::from_bytes(&m.seed);
        let mut pair = Vec::with_capacity(64);
        pair.extend_from_slice(m.seed.as_ref());
        pair.extend_from_slice(signing.verifying_key().as_bytes());
        let pair_b58 = bs58::encode(&pair).into_string();
        let back = parse_secret_material(&pair_b58)?;
        assert_eq!(back.address, m.address);
        Ok(())
    }

    #[test]
    fn parses_hex_seed_with_prefix() -> Result<(), VaultError> {
        let m = generate().map_err(|_| VaultError::InvalidCredential)?;
        let hex_s = format!("0x{}", hex::encode(m.seed.as_ref()));
        let back = parse_secret_material(&hex_s)?;
        assert_eq!(back.address, m.address);
        Ok(())
    }

    #[test]
    fn rejects_garbage_material() {
        for bad in ["", "not a key", "zz!!", "0xdeadbeef", "one two three"] {
            assert_eq!(
                parse_secret_material(bad),
                Err(VaultError::InvalidCredential),
                "should reject {bad:?}"
            );
        }
    }

    #[test]
    fn rejects_mismatched_keypair_halves() -> eyre::Result<()> {
        let a = generate()?;
        let b = generate()?;
        let other = SigningKey::from_bytes(&b.seed);
        let mut pair = Vec::with_capacity(64);
        pair.extend_from_slice(a.seed.as_ref());
        pair.extend_from_slice(other.verifying_key().as_bytes());
        let pair_b58 = bs58::encode(&pair).into_string();
        assert_eq!(
            parse_secret_material(&pair_b58),
            Err(VaultError::InvalidCredential)
        );
        Ok(())
    }

    #[test]
    fn name_validation_matches_policy() {
        assert_eq!(validate_display_name("ab"), Err(VaultError::InvalidName));
        assert!(validate_display_name("Wallet2").is_ok());
        assert!(validate_display_name("My Savings").is_ok());
        assert_eq!(
            validate_display_name(" padded "),
            Err(VaultError::InvalidName)
        );
        assert_eq!(
            validate_display_name("way too long of a wallet name"),
            Err(VaultError::InvalidName)
        );
        assert_eq!(
            validate_display_name("emoji🙂"),
            Err(VaultError::InvalidName)
        );
    }

    #[test]
    fn address_lookalike_heuristic() -> eyre::Result<()> {
        let m = generate()?;
        assert!(looks_like_address(&m.address));
        assert!(!looks_like_address("hello there"));
        assert!(!looks_like_address("abc"));
        Ok(())
    }
}
