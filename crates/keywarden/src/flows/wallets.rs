use super::{retry_on_conflict, FlowController};
use crate::{
    conversation::{Pending, StateRecord},
    transport::{Button, Outbound},
    wallet::WalletId,
};
use tracing::info;

impl FlowController {
    pub(super) fn show_wallets(&self, user_id: &str) -> eyre::Result<()> {
        let wallets = self.vault.list_wallets(user_id)?;
        let mut lines = Vec::with_capacity(wallets.len());
        let mut buttons = Vec::new();
        for w in &wallets {
            let marker = if w.active { "▸" } else { " " };
            lines.push(format!("{marker} {} — {}", w.name, w.address));
            if !w.active {
                buttons.push(Button::new(
                    format!("Use {}", w.name),
                    format!("wallet_switch:{}", w.id),
                ));
            }
            buttons.push(Button::new(
                format!("Rename {}", w.name),
                format!("wallet_rename:{}", w.id),
            ));
            buttons.push(Button::new(
                format!("Export {}", w.name),
                format!("wallet_export:{}", w.id),
            ));
            buttons.push(Button::new(
                format!("Delete {}", w.name),
                format!("wallet_delete:{}", w.id),
            ));
        }
        buttons.push(Button::new("New wallet", "wallet_create"));
        buttons.push(Button::new("Import wallet", "wallet_import"));
        self.send(
            user_id,
            Outbound::with_buttons(lines.join("\n"), buttons),
        )
    }

    pub(super) fn create_wallet(&self, user_id: &str) -> eyre::Result<()> {
        let view = retry_on_conflict(|| self.vault.create_wallet(user_id, None))?;
        self.send(
            user_id,
            Outbound::text(format!(
                "Created {} and made it active.\nAddress: {}",
                view.name, view.address
            )),
        )
    }

    pub(super) fn start_import(&self, user_id: &str) -> eyre::Result<()> {
        self.set_pending(user_id, Some(&StateRecord::new(Pending::ImportingWallet)))?;
        self.send(
            user_id,
            Outbound::with_buttons(
                "Send the wallet's recovery phrase or private key.\n\
                 Delete your message afterwards — anyone who sees it controls the wallet."
                    .to_owned(),
                vec![Button::new("Cancel", "cancel")],
            ),
        )
    }

    pub(super) fn finish_import(&self, user_id: &str, text: &str) -> eyre::Result<()> {
        let view = retry_on_conflict(|| self.vault.import_wallet(user_id, text))?;
        self.clear_pending(user_id)?;
        info!(user = user_id, wallet = %view.id, "import flow completed");
        self.send(
            user_id,
            Outbound::text(format!(
                "Imported {} and made it active.\nAddress: {}",
                view.name, view.address
            )),
        )
    }

    pub(super) fn start_rename(&self, user_id: &str, wallet_id: &WalletId) -> eyre::Result<()> {
        self.set_pending(
            user_id,
            Some(&StateRecord::new(Pending::RenamingWallet {
                wallet_id: wallet_id.clone(),
            })),
        )?;
        self.send(
            user_id,
            Outbound::with_buttons(
                "Send the new name (3-24 letters, digits or spaces).".to_owned(),
                vec![Button::new("Cancel", "cancel")],
            ),
        )
    }

    pub(super) fn finish_rename(
        &self,
        user_id: &str,
        wallet_id: &WalletId,
        text: &str,
    ) -> eyre::Result<()> {
        let view = retry_on_conflict(|| self.vault.rename(user_id, wallet_id, text.trim()))?;
        self.clear_pending(user_id)?;
        self.send(
            user_id,
            Outbound::text(format!("Renamed to {}.", view.name)),
        )
    }

    pub(super) fn switch_wallet(&self, user_id: &str, wallet_id: &WalletId) -> eyre::Result<()> {
        let view = retry_on_conflict(|| self.vault.switch_active(user_id, wallet_id))?;
        self.send(
            user_id,
            Outbound::text(format!(
                "{} is now active.\nAddress: {}",
                view.name, view.address
            )),
        )
    }

    pub(super) fn start_delete(&self, user_id: &str, wallet_id: &WalletId) -> eyre::Result<()> {
        let wallets = self.vault.list_wallets(user_id)?;
        let Some(w) = wallets.iter().find(|w| w.id == *wallet_id) else {
            return Err(crate::errors::VaultError::NotFound(wallet_id.to_string()).into());
        };
        self.send(
            user_id,
            Outbound::with_buttons(
                format!(
                    "Delete {}? Its key is removed from this device. Without a backup of the \
                     recovery phrase the wallet cannot be restored.",
                    w.name
                ),
                vec![
                    Button::new("Yes, delete", format!("wallet_delete_confirm:{wallet_id}")),
                    Button::new("Cancel", "cancel"),
                ],
            ),
        )
    }

    pub(super) fn confirm_delete(&self, user_id: &str, wallet_id: &WalletId) -> eyre::Result<()> {
        retry_on_conflict(|| self.vault.delete_wallet(user_id, wallet_id))?;
        let active = self.vault.active_wallet(user_id)?;
        self.send(
            user_id,
            Outbound::text(format!(
                "Wallet deleted. {} is now active.\nAddress: {}",
                active.name, active.address
            )),
        )
    }
}
