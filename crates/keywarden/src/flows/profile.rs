use super::FlowController;
use crate::{
    conversation::{CodePurpose, Pending, StateRecord},
    errors::VaultError,
    transport::{Button, Outbound},
    wallet,
};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher as _, SaltString},
    Argon2,
};
use sha2::{Digest as _, Sha256};
use tracing::info;

const PIN_MIN_DIGITS: usize = 4;
const PIN_MAX_DIGITS: usize = 8;

fn pin_is_valid(pin: &str) -> bool {
    (PIN_MIN_DIGITS..=PIN_MAX_DIGITS).contains(&pin.len())
        && pin.chars().all(|c| c.is_ascii_digit())
}

fn hash_pin(pin: &str) -> eyre::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(pin.as_bytes(), &salt)
        .map_err(|e| eyre::eyre!("hash pin: {e}"))?;
    Ok(hash.to_string())
}

fn code_hash(code: &str) -> String {
    hex::encode(Sha256::digest(code.as_bytes()))
}

fn generate_code() -> String {
    let mut bytes = [0_u8; 4];
    crate::cipher::fill_random(&mut bytes);
    format!("{:06}", u32::from_le_bytes(bytes) % 1_000_000)
}

impl FlowController {
    pub(super) fn start_set_address(&self, user_id: &str) -> eyre::Result<()> {
        self.set_pending(user_id, Some(&StateRecord::new(Pending::ChangingAddress)))?;
        self.send(
            user_id,
            Outbound::with_buttons(
                "Send the payout address you want withdrawals to go to.".to_owned(),
                vec![Button::new("Cancel", "cancel")],
            ),
        )
    }

    pub(super) fn finish_set_address(&self, user_id: &str, text: &str) -> eyre::Result<()> {
        let address = text.trim();
        if !wallet::looks_like_address(address) {
            return Err(VaultError::InvalidCredential.into());
        }
        super::retry_on_conflict(|| {
            let (mut record, version) = self.load(user_id)?;
            record.payout_address = Some(address.to_owned());
            record.conversation = None;
            self.store.save(&record, version)?;
            Ok(())
        })?;
        info!(user = user_id, "payout address updated");
        self.send(user_id, Outbound::text("Payout address saved."))
    }

    /// Setting a PIN for the first time prompts directly; changing an
    /// existing one requires a confirmation code first.
    pub(super) fn start_set_pin(&self, user_id: &str) -> eyre::Result<()> {
        let (record, _) = self.load(user_id)?;
        if record.pin_hash.is_some() {
            return self.send_code(
                user_id,
                CodePurpose::ResetPin,
                "A PIN is already set. To change it, type this confirmation code back",
            );
        }
        self.set_pending(user_id, Some(&StateRecord::new(Pending::SettingPin)))?;
        self.send(
            user_id,
            Outbound::with_buttons(
                format!("Choose a PIN: {PIN_MIN_DIGITS}-{PIN_MAX_DIGITS} digits."),
                vec![Button::new("Cancel", "cancel")],
            ),
        )
    }

    pub(super) fn finish_set_pin(&self, user_id: &str, text: &str) -> eyre::Result<()> {
        let pin = text.trim();
        if !pin_is_valid(pin) {
            return Err(VaultError::InvalidCredential.into());
        }
        let hashed = hash_pin(pin)?;
        // PHC self-check; a hash we cannot parse back must never be stored.
        PasswordHash::new(&hashed).map_err(|_| VaultError::Integrity)?;
        super::retry_on_conflict(|| {
            let (mut record, version) = self.load(user_id)?;
            record.pin_hash = Some(hashed.clone());
            record.conversation = None;
            self.store.save(&record, version)?;
            Ok(())
        })?;
        info!(user = user_id, "pin updated");
        self.send(user_id, Outbound::text("PIN saved."))
    }

    pub(super) fn start_link_code(&self, user_id: &str) -> eyre::Result<()> {
        self.send_code(
            user_id,
            CodePurpose::LinkDevice,
            "To link this account, enter this code on the device you are linking, then type it \
             here to confirm",
        )
    }

    fn send_code(&self, user_id: &str, purpose: CodePurpose, prompt: &str) -> eyre::Result<()> {
        let code = generate_code();
        let state = StateRecord::with_aux(
            Pending::AwaitingCode { purpose },
            serde_json::json!({ "code_hash": code_hash(&code) }),
        );
        self.set_pending(user_id, Some(&state))?;
        self.send(
            user_id,
            Outbound::with_buttons(
                format!("{prompt}: {code}"),
                vec![Button::new("Cancel", "cancel")],
            ),
        )
    }

    pub(super) fn finish_code(
        &self,
        user_id: &str,
        purpose: CodePurpose,
        state: &StateRecord,
        text: &str,
    ) -> eyre::Result<()> {
        let expected = state
            .aux
            .get("code_hash")
            .and_then(|v| v.as_str())
            .ok_or(VaultError::Integrity)?;
        if code_hash(text.trim()) != expected {
            return Err(VaultError::InvalidCredential.into());
        }

        match purpose {
            CodePurpose::LinkDevice => {
                self.clear_pending(user_id)?;
                info!(user = user_id, "device linked");
                self.send(user_id, Outbound::text("Device linked."))
            }
            CodePurpose::ResetPin => {
                self.set_pending(user_id, Some(&StateRecord::new(Pending::SettingPin)))?;
                self.send(
                    user_id,
                    Outbound::with_buttons(
                        format!("Code accepted. Choose a new PIN: {PIN_MIN_DIGITS}-{PIN_MAX_DIGITS} digits."),
                        vec![Button::new("Cancel", "cancel")],
                    ),
                )
            }
        }
    }
}
