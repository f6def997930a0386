use crate::{
    cipher::Cipher,
    errors::VaultError,
    store::{UserRecord, UserStore},
    wallet::{self, Wallet, WalletId, WalletView},
};
use chrono::Utc;
use ed25519_dalek::SigningKey;
use std::sync::Arc;
use tracing::info;
use zeroize::Zeroizing;

pub const SECRET_PURPOSE: &str = "wallet-secret";
pub const PHRASE_PURPOSE: &str = "recovery-phrase";

/// Synthetic id for the back-compat view built from legacy mirror fields.
const LEGACY_WALLET_ID: &str = "legacy";

/// Plaintext returned by `reveal_secret`. The caller owns the redaction
/// policy; the vault only guarantees decryption or a typed failure.
pub struct RevealedSecret {
    /// Base58 of the 64-byte keypair (seed || public key) — the same form
    /// `import_wallet` accepts back.
    pub private_key: Zeroizing<String>,
    pub recovery_phrase: Option<Zeroizing<String>>,
}

/// Owns the per-user wallet collection: ordered, capped, exactly one active
/// element, secrets sealed at rest.
///
/// Every mutating operation is load → mutate → compare-and-set save; a
/// concurrent writer makes the save fail with `Conflict` and nothing is
/// written.
pub struct Vault {
    store: Arc<dyn UserStore>,
    cipher: &'static Cipher,
    max_wallets: usize,
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("max_wallets", &self.max_wallets)
            .finish_non_exhaustive()
    }
}

/// Re-point the active flag at `id` and refresh the legacy mirror.
fn activate(record: &mut UserRecord, id: &WalletId) {
    for w in &mut record.wallets {
        w.active = w.id == *id;
    }
    mirror_active(record);
}

/// The legacy top-level fields are a derived view of the active wallet,
/// never an independent source of truth.
fn mirror_active(record: &mut UserRecord) {
    if let Some(active) = record.wallets.iter().find(|w| w.active) {
        record.address = Some(active.address.clone());
        record.encrypted_secret = Some(active.secret.clone());
    }
}

impl Vault {
    pub fn new(store: Arc<dyn UserStore>, cipher: &'static Cipher, max_wallets: usize) -> Self {
        Self {
            store,
            cipher,
            max_wallets,
        }
    }

    pub const fn max_wallets(&self) -> usize {
        self.max_wallets
    }

    fn load_required(&self, user_id: &str) -> eyre::Result<(UserRecord, u64)> {
        self.store
            .load(user_id)?
            .ok_or_else(|| VaultError::NotFound(format!("user {user_id}")).into())
    }

    /// First-contact setup: a new user document holding one generated,
    /// active wallet.
    pub fn bootstrap_user(&self, user_id: &str) -> eyre::Result<WalletView> {
        let mut record = UserRecord::new(user_id);
        let view = self.append_generated(&mut record, "Wallet 1".to_owned())?;
        self.store.create(&record)?;
        info!(user = user_id, "bootstrapped new user with generated wallet");
        Ok(view)
    }

    pub fn user_exists(&self, user_id: &str) -> eyre::Result<bool> {
        Ok(self.store.load(user_id)?.is_some())
    }

    fn append_generated(&self, record: &mut UserRecord, name: String) -> eyre::Result<WalletView> {
        let material = wallet::generate()?;
        self.append_material(record, name, &material)
    }

    fn append_material(
        &self,
        record: &mut UserRecord,
        name: String,
        material: &wallet::KeyMaterial,
    ) -> eyre::Result<WalletView> {
        if record.wallets.len() >= self.max_wallets {
            return Err(VaultError::LimitReached(self.max_wallets).into());
        }

        let secret = self.cipher.seal(SECRET_PURPOSE, material.seed.as_ref())?;
        let recovery_phrase = match &material.phrase {
            Some(p) => Some(self.cipher.seal(PHRASE_PURPOSE, p.as_bytes())?),
            None => None,
        };

        let w = Wallet {
            id: WalletId::generate(),
            name,
            address: material.address.clone(),
            secret,
            recovery_phrase,
            active: false,
            created_at: Utc::now(),
        };
        let id = w.id.clone();
        record.wallets.push(w);
        activate(record, &id);

        let view = record
            .wallets
            .iter()
            .find(|w| w.id == id)
            .map(Wallet::view)
            .ok_or_else(|| eyre::eyre!("wallet vanished after append"))?;
        Ok(view)
    }

    pub fn list_wallets(&self, user_id: &str) -> eyre::Result<Vec<WalletView>> {
        let (record, _) = self.load_required(user_id)?;
        Ok(record.wallets.iter().map(Wallet::view).collect())
    }

    /// The single active wallet. Documents written before multi-wallet
    /// support have an empty collection; those fall back to a view built
    /// from the legacy mirror fields.
    pub fn active_wallet(&self, user_id: &str) -> eyre::Result<WalletView> {
        let (record, _) = self.load_required(user_id)?;
        if let Some(active) = record.wallets.iter().find(|w| w.active) {
            return Ok(active.view());
        }
        if record.wallets.is_empty() {
            if let Some(address) = record.address {
                return Ok(WalletView {
                    id: WalletId::from(LEGACY_WALLET_ID),
                    name: "Wallet 1".to_owned(),
                    address,
                    active: true,
                });
            }
        }
        Err(VaultError::NotFound("active wallet".to_owned()).into())
    }

    pub fn create_wallet(&self, user_id: &str, name: Option<&str>) -> eyre::Result<WalletView> {
        let (mut record, version) = self.load_required(user_id)?;
        let name = match name {
            Some(n) => {
                wallet::validate_display_name(n)?;
                n.to_owned()
            }
            None => format!("Wallet {}", record.wallets.len() + 1),
        };
        let view = self.append_generated(&mut record, name)?;
        self.store.save(&record, version)?;
        info!(user = user_id, wallet = %view.id, "created wallet");
        Ok(view)
    }

    pub fn import_wallet(&self, user_id: &str, secret_material: &str) -> eyre::Result<WalletView> {
        let (mut record, version) = self.load_required(user_id)?;
        let material = wallet::parse_secret_material(secret_material)?;

        if record.wallets.iter().any(|w| w.address == material.address) {
            return Err(VaultError::DuplicateWallet(material.address).into());
        }

        let name = format!("Wallet {}", record.wallets.len() + 1);
        let view = self.append_material(&mut record, name, &material)?;
        self.store.save(&record, version)?;
        info!(user = user_id, wallet = %view.id, "imported wallet");
        Ok(view)
    }

    pub fn switch_active(&self, user_id: &str, wallet_id: &WalletId) -> eyre::Result<WalletView> {
        let (mut record, version) = self.load_required(user_id)?;
        if !record.wallets.iter().any(|w| w.id == *wallet_id) {
            return Err(VaultError::NotFound(wallet_id.to_string()).into());
        }
        activate(&mut record, wallet_id);
        let view = record
            .wallets
            .iter()
            .find(|w| w.active)
            .map(Wallet::view)
            .ok_or_else(|| eyre::eyre!("no active wallet after switch"))?;
        self.store.save(&record, version)?;
        Ok(view)
    }

    pub fn rename(
        &self,
        user_id: &str,
        wallet_id: &WalletId,
        new_name: &str,
    ) -> eyre::Result<WalletView> {
        wallet::validate_display_name(new_name)?;
        let (mut record, version) = self.load_required(user_id)?;
        let w = record
            .wallets
            .iter_mut()
            .find(|w| w.id == *wallet_id)
            .ok_or_else(|| VaultError::NotFound(wallet_id.to_string()))?;
        new_name.clone_into(&mut w.name);
        let view = w.view();
        self.store.save(&record, version)?;
        Ok(view)
    }

    /// Delete a wallet. The collection is never left without an active
    /// wallet while non-empty: deleting the active one activates the first
    /// remaining wallet before the record goes away.
    pub fn delete_wallet(&self, user_id: &str, wallet_id: &WalletId) -> eyre::Result<()> {
        let (mut record, version) = self.load_required(user_id)?;
        let pos = record
            .wallets
            .iter()
            .position(|w| w.id == *wallet_id)
            .ok_or_else(|| VaultError::NotFound(wallet_id.to_string()))?;
        if record.wallets.len() == 1 {
            return Err(VaultError::LastWallet.into());
        }

        let was_active = record.wallets.remove(pos).active;
        if was_active {
            let first = record
                .wallets
                .first()
                .map(|w| w.id.clone())
                .ok_or_else(|| eyre::eyre!("delete left no wallets"))?;
            activate(&mut record, &first);
        }
        self.store.save(&record, version)?;
        info!(user = user_id, wallet = %wallet_id, "deleted wallet");
        Ok(())
    }

    /// Decrypt a wallet's secret material. Cipher internals never escape:
    /// integrity failures surface as `DecryptionFailed`.
    pub fn reveal_secret(&self, user_id: &str, wallet_id: &WalletId) -> eyre::Result<RevealedSecret> {
        let (record, _) = self.load_required(user_id)?;
        let w = record
            .wallets
            .iter()
            .find(|w| w.id == *wallet_id)
            .ok_or_else(|| VaultError::NotFound(wallet_id.to_string()))?;

        let seed_bytes = self
            .cipher
            .open(SECRET_PURPOSE, &w.secret)
            .map_err(|_| VaultError::DecryptionFailed)?;
        let seed: [u8; 32] = seed_bytes
            .as_slice()
            .try_into()
            .map_err(|_| VaultError::DecryptionFailed)?;

        let signing = SigningKey::from_bytes(&seed);
        let mut pair = Zeroizing::new(Vec::with_capacity(64));
        pair.extend_from_slice(&seed);
        pair.extend_from_slice(signing.verifying_key().as_bytes());
        let private_key = Zeroizing::new(bs58::encode(pair.as_slice()).into_string());

        let recovery_phrase = match &w.recovery_phrase {
            Some(sealed) => {
                let bytes = self
                    .cipher
                    .open(PHRASE_PURPOSE, sealed)
                    .map_err(|_| VaultError::DecryptionFailed)?;
                let s = std::str::from_utf8(&bytes)
                    .map_err(|_| VaultError::DecryptionFailed)?
                    .to_owned();
                Some(Zeroizing::new(s))
            }
            None => None,
        };

        Ok(RevealedSecret {
            private_key,
            recovery_phrase,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryUserStore;

    fn test_vault() -> Vault {
        let cipher: &'static Cipher = Box::leak(Box::new(Cipher::new([9_u8; 32])));
        Vault::new(Arc::new(MemoryUserStore::new()), cipher, 6)
    }

    fn assert_invariants(vault: &Vault, user: &str) -> eyre::Result<()> {
        let wallets = vault.list_wallets(user)?;
        assert!(wallets.len() <= vault.max_wallets(), "capacity exceeded");
        if !wallets.is_empty() {
            let active = wallets.iter().filter(|w| w.active).count();
            assert_eq!(active, 1, "exactly one active wallet expected");
        }
        Ok(())
    }

    #[test]
    fn bootstrap_creates_one_active_wallet() -> eyre::Result<()> {
        let vault = test_vault();
        let view = vault.bootstrap_user("u1")?;
        assert!(view.active);
        assert_eq!(vault.list_wallets("u1")?.len(), 1);
        assert_invariants(&vault, "u1")
    }

    #[test]
    fn create_then_delete_scenario() -> eyre::Result<()> {
        let vault = test_vault();
        let w1 = vault.bootstrap_user("u1")?;

        let w2 = vault.create_wallet("u1", Some("Wallet2"))?;
        let wallets = vault.list_wallets("u1")?;
        assert_eq!(wallets.len(), 2);
        assert!(!wallets[0].active, "W1 deactivated after create");
        assert!(wallets[1].active, "W2 active after create");
        assert_eq!(vault.active_wallet("u1")?.id, w2.id);

        vault.delete_wallet("u1", &w2.id)?;
        let wallets = vault.list_wallets("u1")?;
        assert_eq!(wallets.len(), 1);
        assert_eq!(wallets[0].id, w1.id);
        assert!(wallets[0].active, "W1 active again after delete");
        assert_invariants(&vault, "u1")
    }

    #[test]
    fn single_active_holds_across_operation_sequences() -> eyre::Result<()> {
        let vault = test_vault();
        let w1 = vault.bootstrap_user("u1")?;
        let w2 = vault.create_wallet("u1", None)?;
        let w3 = vault.create_wallet("u1", None)?;
        assert_invariants(&vault, "u1")?;

        vault.switch_active("u1", &w1.id)?;
        assert_invariants(&vault, "u1")?;
        assert_eq!(vault.active_wallet("u1")?.id, w1.id);

        vault.delete_wallet("u1", &w1.id)?;
        assert_invariants(&vault, "u1")?;
        // First remaining in order takes over.
        assert_eq!(vault.active_wallet("u1")?.id, w2.id);

        vault.switch_active("u1", &w3.id)?;
        vault.delete_wallet("u1", &w2.id)?;
        assert_invariants(&vault, "u1")?;
        assert_eq!(vault.active_wallet("u1")?.id, w3.id);
        Ok(())
    }

    #[test]
    fn capacity_enforced_at_limit() -> eyre::Result<()> {
        let vault = test_vault();
        vault.bootstrap_user("u1")?;
        for _ in 0..5 {
            vault.create_wallet("u1", None)?;
        }
        assert_eq!(vault.list_wallets("u1")?.len(), 6);

        let err = vault
            .create_wallet("u1", None)
            .err()
            .ok_or_else(|| eyre::eyre!("7th create must fail"))?;
        assert_eq!(
            err.downcast_ref::<VaultError>(),
            Some(&VaultError::LimitReached(6))
        );
        assert_eq!(vault.list_wallets("u1")?.len(), 6, "no mutation on failure");

        let material = crate::wallet::generate()?;
        let phrase = material
            .phrase
            .as_ref()
            .ok_or_else(|| eyre::eyre!("missing phrase"))?;
        let err = vault
            .import_wallet("u1", phrase)
            .err()
            .ok_or_else(|| eyre::eyre!("7th import must fail"))?;
        assert_eq!(
            err.downcast_ref::<VaultError>(),
            Some(&VaultError::LimitReached(6))
        );
        assert_eq!(vault.list_wallets("u1")?.len(), 6);
        Ok(())
    }

    #[test]
    fn delete_only_wallet_refused() -> eyre::Result<()> {
        let vault = test_vault();
        let w1 = vault.bootstrap_user("u1")?;
        let err = vault
            .delete_wallet("u1", &w1.id)
            .err()
            .ok_or_else(|| eyre::eyre!("deleting only wallet must fail"))?;
        assert_eq!(
            err.downcast_ref::<VaultError>(),
            Some(&VaultError::LastWallet)
        );
        assert_eq!(vault.list_wallets("u1")?.len(), 1, "wallet still present");
        Ok(())
    }

    #[test]
    fn duplicate_import_rejected_without_mutation() -> eyre::Result<()> {
        let vault = test_vault();
        vault.bootstrap_user("u1")?;
        let material = crate::wallet::generate()?;
        let phrase = material
            .phrase
            .as_ref()
            .ok_or_else(|| eyre::eyre!("missing phrase"))?
            .as_str()
            .to_owned();

        let imported = vault.import_wallet("u1", &phrase)?;
        assert!(imported.active);
        assert_eq!(vault.list_wallets("u1")?.len(), 2);

        let err = vault
            .import_wallet("u1", &phrase)
            .err()
            .ok_or_else(|| eyre::eyre!("second import must fail"))?;
        assert!(matches!(
            err.downcast_ref::<VaultError>(),
            Some(VaultError::DuplicateWallet(_))
        ));
        assert_eq!(vault.list_wallets("u1")?.len(), 2, "count unchanged");
        Ok(())
    }

    #[test]
    fn import_garbage_is_invalid_credential() -> eyre::Result<()> {
        let vault = test_vault();
        vault.bootstrap_user("u1")?;
        let err = vault
            .import_wallet("u1", "definitely not a key")
            .err()
            .ok_or_else(|| eyre::eyre!("garbage import must fail"))?;
        assert_eq!(
            err.downcast_ref::<VaultError>(),
            Some(&VaultError::InvalidCredential)
        );
        Ok(())
    }

    #[test]
    fn rename_validation_and_success() -> eyre::Result<()> {
        let vault = test_vault();
        let w1 = vault.bootstrap_user("u1")?;

        let err = vault
            .rename("u1", &w1.id, "ab")
            .err()
            .ok_or_else(|| eyre::eyre!("2-char name must fail"))?;
        assert_eq!(
            err.downcast_ref::<VaultError>(),
            Some(&VaultError::InvalidName)
        );

        let view = vault.rename("u1", &w1.id, "Wallet2")?;
        assert_eq!(view.name, "Wallet2");
        Ok(())
    }

    #[test]
    fn switch_active_unknown_id_is_not_found() -> eyre::Result<()> {
        let vault = test_vault();
        vault.bootstrap_user("u1")?;
        let err = vault
            .switch_active("u1", &WalletId::from("nope"))
            .err()
            .ok_or_else(|| eyre::eyre!("unknown id must fail"))?;
        assert!(matches!(
            err.downcast_ref::<VaultError>(),
            Some(VaultError::NotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn reveal_round_trips_key_material() -> eyre::Result<()> {
        let vault = test_vault();
        vault.bootstrap_user("u1")?;
        let material = crate::wallet::generate()?;
        let phrase = material
            .phrase
            .as_ref()
            .ok_or_else(|| eyre::eyre!("missing phrase"))?
            .as_str()
            .to_owned();
        let view = vault.import_wallet("u1", &phrase)?;

        let revealed = vault.reveal_secret("u1", &view.id)?;
        let reparsed = crate::wallet::parse_secret_material(&revealed.private_key)
            .map_err(|e| eyre::eyre!("revealed key must re-import: {e}"))?;
        assert_eq!(reparsed.address, view.address);
        assert_eq!(
            revealed.recovery_phrase.as_deref().map(String::as_str),
            Some(phrase.as_str())
        );
        Ok(())
    }

    #[test]
    fn reveal_with_wrong_master_key_fails_closed() -> eyre::Result<()> {
        let store: Arc<dyn UserStore> = Arc::new(MemoryUserStore::new());
        let good: &'static Cipher = Box::leak(Box::new(Cipher::new([1_u8; 32])));
        let bad: &'static Cipher = Box::leak(Box::new(Cipher::new([2_u8; 32])));

        let vault = Vault::new(Arc::clone(&store), good, 6);
        let w = vault.bootstrap_user("u1")?;

        let rotated = Vault::new(store, bad, 6);
        let err = rotated
            .reveal_secret("u1", &w.id)
            .err()
            .ok_or_else(|| eyre::eyre!("wrong key must fail"))?;
        assert_eq!(
            err.downcast_ref::<VaultError>(),
            Some(&VaultError::DecryptionFailed)
        );
        Ok(())
    }

    #[test]
    fn legacy_mirror_tracks_active_wallet() -> eyre::Result<()> {
        let store = Arc::new(MemoryUserStore::new());
        let cipher: &'static Cipher = Box::leak(Box::new(Cipher::new([3_u8; 32])));
        let vault = Vault::new(Arc::clone(&store) as Arc<dyn UserStore>, cipher, 6);

        let w1 = vault.bootstrap_user("u1")?;
        let w2 = vault.create_wallet("u1", Some("Wallet2"))?;

        let (record, _) = store
            .load("u1")?
            .ok_or_else(|| eyre::eyre!("missing user"))?;
        assert_eq!(record.address.as_deref(), Some(w2.address.as_str()));

        vault.switch_active("u1", &w1.id)?;
        let (record, _) = store
            .load("u1")?
            .ok_or_else(|| eyre::eyre!("missing user"))?;
        assert_eq!(record.address.as_deref(), Some(w1.address.as_str()));
        Ok(())
    }

    #[test]
    fn legacy_document_synthesizes_active_view() -> eyre::Result<()> {
        let store = Arc::new(MemoryUserStore::new());
        let cipher: &'static Cipher = Box::leak(Box::new(Cipher::new([4_u8; 32])));
        let vault = Vault::new(Arc::clone(&store) as Arc<dyn UserStore>, cipher, 6);

        // An old-style document: mirror fields only, empty collection.
        let mut record = UserRecord::new("old");
        record.address = Some("LegacyAddr11111111111111111111111111111111".to_owned());
        store.create(&record)?;

        let view = vault.active_wallet("old")?;
        assert!(view.active);
        assert_eq!(view.address, "LegacyAddr11111111111111111111111111111111");
        Ok(())
    }
}
