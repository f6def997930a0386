mod profile;
mod reveal;
mod wallets;

use crate::{
    config::WardenConfig,
    conversation::{self, Pending, StateRecord},
    errors::VaultError,
    store::UserStore,
    transport::{Button, Event, EventKind, Outbound, Transport},
    vault::Vault,
    wallet::{self, WalletId},
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Parsed form of a button action id.
///
/// The grammar is `verb` or `verb:<wallet-id>`; ids come back from buttons we
/// rendered ourselves, so anything unparseable is treated as unknown rather
/// than an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Wallets,
    WalletCreate,
    WalletImport,
    WalletRename(WalletId),
    WalletSwitch(WalletId),
    WalletExport(WalletId),
    WalletExportConfirm(WalletId),
    WalletDelete(WalletId),
    WalletDeleteConfirm(WalletId),
    SetAddress,
    SetPin,
    LinkCode,
    Cancel,
}

pub fn parse_action(s: &str) -> Option<Action> {
    let (verb, arg) = match s.split_once(':') {
        Some((v, a)) if !a.is_empty() => (v, Some(a)),
        Some(_) => return None,
        None => (s, None),
    };
    let id = arg.map(WalletId::from);
    match (verb, id) {
        ("wallets", None) => Some(Action::Wallets),
        ("wallet_create", None) => Some(Action::WalletCreate),
        ("wallet_import", None) => Some(Action::WalletImport),
        ("wallet_rename", Some(id)) => Some(Action::WalletRename(id)),
        ("wallet_switch", Some(id)) => Some(Action::WalletSwitch(id)),
        ("wallet_export", Some(id)) => Some(Action::WalletExport(id)),
        ("wallet_export_confirm", Some(id)) => Some(Action::WalletExportConfirm(id)),
        ("wallet_delete", Some(id)) => Some(Action::WalletDelete(id)),
        ("wallet_delete_confirm", Some(id)) => Some(Action::WalletDeleteConfirm(id)),
        ("set_address", None) => Some(Action::SetAddress),
        ("set_pin", None) => Some(Action::SetPin),
        ("link_code", None) => Some(Action::LinkCode),
        ("cancel", None) => Some(Action::Cancel),
        _ => None,
    }
}

/// Orchestrates flows over the vault, the user store and the transport.
///
/// One instance serves all users; per-user state lives in the store. Handlers
/// never leak internals to chat: every failure is mapped to the taxonomy's
/// one-line user message, and any pending flow is reset so the user is never
/// stuck mid-conversation.
pub struct FlowController {
    vault: Arc<Vault>,
    store: Arc<dyn UserStore>,
    transport: Arc<dyn Transport>,
    config: WardenConfig,
}

impl FlowController {
    pub fn new(
        vault: Arc<Vault>,
        store: Arc<dyn UserStore>,
        transport: Arc<dyn Transport>,
        config: WardenConfig,
    ) -> Self {
        Self {
            vault,
            store,
            transport,
            config,
        }
    }

    /// Entry point: one inbound event, one handled interaction.
    ///
    /// Must run inside a tokio runtime: the export flow detaches a
    /// countdown task.
    pub fn handle_event(&self, event: &Event) -> eyre::Result<()> {
        let user_id = event.user_id.as_str();

        if !self.vault.user_exists(user_id)? {
            return self.first_contact(user_id);
        }

        let outcome = match &event.kind {
            EventKind::ButtonPress { action } => match parse_action(action) {
                Some(a) => self.dispatch_action(user_id, &a),
                None => {
                    warn!(user = user_id, action = %action, "unknown action id");
                    self.send(user_id, Outbound::text("I don't recognize that button."))
                }
            },
            EventKind::Text { text } => self.handle_text(user_id, text),
        };

        match outcome {
            Ok(()) => Ok(()),
            Err(err) => self.report_failure(user_id, &err),
        }
    }

    /// Map a handler failure to a chat message. Typed vault errors get their
    /// taxonomy line; anything else gets a generic apology and a log entry.
    /// Either way the pending flow is cleared so the next message starts clean.
    fn report_failure(&self, user_id: &str, err: &eyre::Report) -> eyre::Result<()> {
        let text = match err.downcast_ref::<VaultError>() {
            Some(ve) => {
                if ve.is_security_relevant() {
                    warn!(user = user_id, error = %ve, "security-relevant failure");
                } else {
                    info!(user = user_id, error = %ve, "flow failed");
                }
                ve.user_message()
            }
            None => {
                error!(user = user_id, error = %err, "unexpected flow failure");
                "Something went wrong on our side. Please try again."
            }
        };
        if let Err(reset_err) = self.clear_pending(user_id) {
            warn!(user = user_id, error = %reset_err, "failed to reset pending state");
        }
        // Always leave the user with a way forward.
        self.send(user_id, main_menu(text))
    }

    fn dispatch_action(&self, user_id: &str, action: &Action) -> eyre::Result<()> {
        match action {
            Action::Wallets => self.show_wallets(user_id),
            Action::WalletCreate => self.create_wallet(user_id),
            Action::WalletImport => self.start_import(user_id),
            Action::WalletRename(id) => self.start_rename(user_id, id),
            Action::WalletSwitch(id) => self.switch_wallet(user_id, id),
            Action::WalletExport(id) => self.start_export(user_id, id),
            Action::WalletExportConfirm(id) => self.confirm_export(user_id, id),
            Action::WalletDelete(id) => self.start_delete(user_id, id),
            Action::WalletDeleteConfirm(id) => self.confirm_delete(user_id, id),
            Action::SetAddress => self.start_set_address(user_id),
            Action::SetPin => self.start_set_pin(user_id),
            Action::LinkCode => self.start_link_code(user_id),
            Action::Cancel => self.cancel(user_id),
        }
    }

    /// Free text: if a live pending flow exists, it owns the message.
    /// Otherwise the text is interpreted loosely while idle.
    fn handle_text(&self, user_id: &str, text: &str) -> eyre::Result<()> {
        let (record, _) = self.load(user_id)?;
        let pending = conversation::live_pending(
            record.conversation.as_ref(),
            self.config.pending_state_ttl_seconds,
            Utc::now(),
        )
        .cloned();

        match pending {
            Some(state) => self.handle_pending_text(user_id, &state, text),
            None => self.handle_idle_text(user_id, text),
        }
    }

    fn handle_pending_text(
        &self,
        user_id: &str,
        state: &StateRecord,
        text: &str,
    ) -> eyre::Result<()> {
        match &state.pending {
            Pending::ImportingWallet => self.finish_import(user_id, text),
            Pending::RenamingWallet { wallet_id } => self.finish_rename(user_id, wallet_id, text),
            Pending::ChangingAddress => self.finish_set_address(user_id, text),
            Pending::SettingPin => self.finish_set_pin(user_id, text),
            Pending::AwaitingCode { purpose } => self.finish_code(user_id, *purpose, state, text),
            Pending::ExportConfirmPending { .. } => {
                // Export only proceeds via the explicit confirm button.
                self.clear_pending(user_id)?;
                self.send(
                    user_id,
                    Outbound::text("Export cancelled. Use the buttons to confirm next time."),
                )
            }
        }
    }

    fn handle_idle_text(&self, user_id: &str, text: &str) -> eyre::Result<()> {
        if wallet::looks_like_address(text) {
            return self.send(
                user_id,
                Outbound::text(
                    "That looks like a wallet address. To import a wallet, use Import and send \
                     its recovery phrase or private key.",
                ),
            );
        }
        self.send(user_id, main_menu("What would you like to do?"))
    }

    /// First message from an unknown user: provision them with one generated
    /// wallet and greet.
    fn first_contact(&self, user_id: &str) -> eyre::Result<()> {
        let view = self.vault.bootstrap_user(user_id)?;
        info!(user = user_id, "first contact");
        self.send(
            user_id,
            main_menu(&format!(
                "Welcome! I created a wallet for you.\nAddress: {}",
                view.address
            )),
        )
    }

    fn cancel(&self, user_id: &str) -> eyre::Result<()> {
        self.clear_pending(user_id)?;
        self.send(user_id, main_menu("Cancelled."))
    }

    fn send(&self, user_id: &str, message: Outbound) -> eyre::Result<()> {
        self.transport.send(user_id, &message)?;
        Ok(())
    }

    fn load(&self, user_id: &str) -> eyre::Result<(crate::store::UserRecord, u64)> {
        self.store
            .load(user_id)?
            .ok_or_else(|| VaultError::NotFound(format!("user {user_id}")).into())
    }

    /// Replace (or clear) the pending conversation record. A concurrent
    /// writer triggers one reload-and-retry; pending state is last-writer-wins
    /// so the retry simply reapplies on the fresh version.
    fn set_pending(&self, user_id: &str, pending: Option<&StateRecord>) -> eyre::Result<()> {
        for attempt in 0..2 {
            let (mut record, version) = self.load(user_id)?;
            record.conversation = pending.cloned();
            match self.store.save(&record, version) {
                Ok(_) => return Ok(()),
                Err(err) if attempt == 0 && is_conflict(&err) => {
                    info!(user = user_id, "pending-state save conflicted; retrying");
                }
                Err(err) => return Err(err),
            }
        }
        Err(VaultError::Conflict.into())
    }

    fn clear_pending(&self, user_id: &str) -> eyre::Result<()> {
        self.set_pending(user_id, None)
    }
}

fn main_menu(text: &str) -> Outbound {
    Outbound::with_buttons(
        text.to_owned(),
        vec![
            Button::new("My wallets", "wallets"),
            Button::new("New wallet", "wallet_create"),
            Button::new("Import wallet", "wallet_import"),
            Button::new("Payout address", "set_address"),
            Button::new("Security PIN", "set_pin"),
            Button::new("Link a device", "link_code"),
        ],
    )
}

fn is_conflict(err: &eyre::Report) -> bool {
    matches!(err.downcast_ref::<VaultError>(), Some(VaultError::Conflict))
}

/// Run `op`, retrying exactly once if the optimistic save lost a race.
/// The closure re-loads internally, so the retry sees fresh state.
pub(crate) fn retry_on_conflict<T>(mut op: impl FnMut() -> eyre::Result<T>) -> eyre::Result<T> {
    match op() {
        Err(err) if is_conflict(&err) => {
            info!("operation conflicted; retrying once");
            op()
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_grammar_round_trip() {
        assert_eq!(parse_action("wallets"), Some(Action::Wallets));
        assert_eq!(parse_action("wallet_create"), Some(Action::WalletCreate));
        assert_eq!(
            parse_action("wallet_rename:abc"),
            Some(Action::WalletRename(WalletId::from("abc")))
        );
        assert_eq!(
            parse_action("wallet_delete_confirm:abc"),
            Some(Action::WalletDeleteConfirm(WalletId::from("abc")))
        );
        assert_eq!(parse_action("cancel"), Some(Action::Cancel));
    }

    #[test]
    fn action_grammar_rejects_malformed_ids() {
        assert_eq!(parse_action("wallet_rename"), None, "missing id");
        assert_eq!(parse_action("wallet_rename:"), None, "empty id");
        assert_eq!(parse_action("wallets:extra"), None, "unexpected id");
        assert_eq!(parse_action("self_destruct"), None, "unknown verb");
        assert_eq!(parse_action(""), None);
    }

    #[test]
    fn retry_on_conflict_retries_exactly_once() {
        let mut calls = 0_u32;
        let res: eyre::Result<u32> = retry_on_conflict(|| {
            calls += 1;
            Err(VaultError::Conflict.into())
        });
        assert!(is_conflict(&res.err().map_or_else(
            || eyre::eyre!("expected failure"),
            |e| e
        )));
        assert_eq!(calls, 2);

        let mut calls = 0_u32;
        let res: eyre::Result<u32> = retry_on_conflict(|| {
            calls += 1;
            if calls == 1 {
                Err(VaultError::Conflict.into())
            } else {
                Ok(7)
            }
        });
        assert_eq!(res.ok(), Some(7));
        assert_eq!(calls, 2);
    }

    #[test]
    fn retry_on_conflict_passes_through_other_errors() {
        let mut calls = 0_u32;
        let res: eyre::Result<()> = retry_on_conflict(|| {
            calls += 1;
            Err(VaultError::InvalidName.into())
        });
        assert_eq!(
            res.err().as_ref().and_then(|e| e.downcast_ref::<VaultError>()),
            Some(&VaultError::InvalidName)
        );
        assert_eq!(calls, 1, "non-conflict errors are not retried");
    }
}
