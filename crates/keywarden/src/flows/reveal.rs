use super::FlowController;
use crate::{
    conversation::{self, Pending, StateRecord},
    errors::VaultError,
    transport::{Button, MessageId, Outbound, Transport},
    wallet::WalletId,
};
use chrono::Utc;
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};

const REDACTED_TEXT: &str = "Secret redacted. Export again if you still need it.";

/// Detached task that edits a revealed-secret message down to redaction.
/// Transport failures end the countdown early and are only logged; the
/// reveal itself already happened.
struct CountdownTask {
    transport: Arc<dyn Transport>,
    user_id: String,
    message_id: MessageId,
    body: String,
    window_seconds: u64,
    tick_seconds: u64,
}

impl CountdownTask {
    async fn run(self) {
        let tick = self.tick_seconds.max(1);
        let mut remaining = self.window_seconds;
        while remaining > 0 {
            let step = tick.min(remaining);
            tokio::time::sleep(Duration::from_secs(step)).await;
            remaining -= step;

            let message = if remaining == 0 {
                Outbound::text(REDACTED_TEXT)
            } else {
                Outbound::text(countdown_text(&self.body, remaining))
            };
            if let Err(err) = self.transport.edit(&self.user_id, self.message_id, &message) {
                warn!(user = %self.user_id, error = %err, "countdown edit failed; stopping");
                return;
            }
        }
    }
}

fn countdown_text(body: &str, remaining: u64) -> String {
    format!("{body}\n\nThis message is redacted in {remaining}s.")
}

impl FlowController {
    pub(super) fn start_export(&self, user_id: &str, wallet_id: &WalletId) -> eyre::Result<()> {
        let wallets = self.vault.list_wallets(user_id)?;
        let Some(w) = wallets.iter().find(|w| w.id == *wallet_id) else {
            return Err(VaultError::NotFound(wallet_id.to_string()).into());
        };
        self.set_pending(
            user_id,
            Some(&StateRecord::new(Pending::ExportConfirmPending {
                wallet_id: wallet_id.clone(),
            })),
        )?;
        self.send(
            user_id,
            Outbound::with_buttons(
                format!(
                    "Export the secret key of {}? It will be shown here in plain text and \
                     anyone who sees it controls the wallet.",
                    w.name
                ),
                vec![
                    Button::new("Show it", format!("wallet_export_confirm:{wallet_id}")),
                    Button::new("Cancel", "cancel"),
                ],
            ),
        )
    }

    /// Second step of the export: only proceeds when a live confirmation for
    /// this exact wallet is pending. The plaintext message self-destructs
    /// after the reveal window, with periodic countdown edits.
    pub(super) fn confirm_export(&self, user_id: &str, wallet_id: &WalletId) -> eyre::Result<()> {
        let (record, _) = self.load(user_id)?;
        let confirmed = conversation::live_pending(
            record.conversation.as_ref(),
            self.config.pending_state_ttl_seconds,
            Utc::now(),
        )
        .is_some_and(|s| {
            matches!(&s.pending, Pending::ExportConfirmPending { wallet_id: id } if id == wallet_id)
        });
        if !confirmed {
            self.clear_pending(user_id)?;
            return self.send(
                user_id,
                Outbound::text("That confirmation expired. Start the export again."),
            );
        }
        self.clear_pending(user_id)?;

        let revealed = self.vault.reveal_secret(user_id, wallet_id)?;
        info!(user = user_id, wallet = %wallet_id, "secret exported");

        let window = self.config.reveal_window_seconds;
        let mut body = format!("Private key:\n{}", revealed.private_key.as_str());
        if let Some(phrase) = &revealed.recovery_phrase {
            body.push_str("\n\nRecovery phrase:\n");
            body.push_str(phrase);
        }

        let message_id = self
            .transport
            .send(user_id, &Outbound::text(countdown_text(&body, window)))?;

        tokio::spawn(
            CountdownTask {
                transport: Arc::clone(&self.transport),
                user_id: user_id.to_owned(),
                message_id,
                body,
                window_seconds: window,
                tick_seconds: self.config.reveal_tick_seconds,
            }
            .run(),
        );
        Ok(())
    }
}
