use eyre::Context as _;
use serde::{Deserialize, Serialize};
use std::{
    io::Write as _,
    sync::atomic::{AtomicI64, Ordering},
    sync::Mutex,
};

/// Opaque handle to a delivered message, used to edit or delete it later
/// (countdown ticks, redaction).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct MessageId(pub i64);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    /// Action id delivered back as a `ButtonPress` when tapped.
    pub action: String,
}

impl Button {
    pub fn new(label: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: action.into(),
        }
    }
}

/// A rendered reply: text plus optional tap targets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Outbound {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<Button>,
}

impl Outbound {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            buttons: Vec::new(),
        }
    }

    pub fn with_buttons(text: impl Into<String>, buttons: Vec<Button>) -> Self {
        Self {
            text: text.into(),
            buttons,
        }
    }
}

/// What arrived from the chat surface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    Text { text: String },
    ButtonPress { action: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    pub user_id: String,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Outbound side of the chat surface. Implementations own delivery; the
/// flow layer never sees transport specifics.
pub trait Transport: Send + Sync {
    fn send(&self, user_id: &str, message: &Outbound) -> eyre::Result<MessageId>;
    fn edit(&self, user_id: &str, id: MessageId, message: &Outbound) -> eyre::Result<()>;
    fn delete(&self, user_id: &str, id: MessageId) -> eyre::Result<()>;
}

/// Line-oriented transport over stdout: one JSON object per delivery, for
/// driving the agent from a terminal or a pipe harness.
#[derive(Debug, Default)]
pub struct StdioTransport {
    next_id: AtomicI64,
    out: Mutex<()>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum StdioFrame<'a> {
    Send {
        user_id: &'a str,
        id: i64,
        #[serde(flatten)]
        message: &'a Outbound,
    },
    Edit {
        user_id: &'a str,
        id: i64,
        #[serde(flatten)]
        message: &'a Outbound,
    },
    Delete {
        user_id: &'a str,
        id: i64,
    },
}

impl StdioTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn write_frame(&self, frame: &StdioFrame<'_>) -> eyre::Result<()> {
        let line = serde_json::to_string(frame).context("serialize frame")?;
        let guard = self
            .out
            .lock()
            .map_err(|_| eyre::eyre!("stdout guard poisoned"))?;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{line}").context("write frame")?;
        stdout.flush().context("flush stdout")?;
        drop(guard);
        Ok(())
    }
}

impl Transport for StdioTransport {
    fn send(&self, user_id: &str, message: &Outbound) -> eyre::Result<MessageId> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.write_frame(&StdioFrame::Send {
            user_id,
            id,
            message,
        })?;
        Ok(MessageId(id))
    }

    fn edit(&self, user_id: &str, id: MessageId, message: &Outbound) -> eyre::Result<()> {
        self.write_frame(&StdioFrame::Edit {
            user_id,
            id: id.0,
            message,
        })
    }

    fn delete(&self, user_id: &str, id: MessageId) -> eyre::Result<()> {
        self.write_frame(&StdioFrame::Delete { user_id, id: id.0 })
    }
}

/// Everything a recording transport has seen, in delivery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Sent(MessageId, Outbound),
    Edited(MessageId, Outbound),
    Deleted(MessageId),
}

/// In-memory transport for tests: captures deliveries per user.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    next_id: AtomicI64,
    log: Mutex<Vec<(String, Delivery)>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deliveries(&self, user_id: &str) -> Vec<Delivery> {
        self.log.lock().map_or_else(
            |_| Vec::new(),
            |log| {
                log.iter()
                    .filter(|(u, _)| u == user_id)
                    .map(|(_, d)| d.clone())
                    .collect()
            },
        )
    }

    /// The text of the last message sent or edited for `user_id`.
    pub fn last_text(&self, user_id: &str) -> Option<String> {
        self.deliveries(user_id)
            .into_iter()
            .rev()
            .find_map(|d| match d {
                Delivery::Sent(_, m) | Delivery::Edited(_, m) => Some(m.text),
                Delivery::Deleted(_) => None,
            })
    }

    /// Action ids of the buttons on the last sent/edited message.
    pub fn last_actions(&self, user_id: &str) -> Vec<String> {
        self.deliveries(user_id)
            .into_iter()
            .rev()
            .find_map(|d| match d {
                Delivery::Sent(_, m) | Delivery::Edited(_, m) => {
                    Some(m.buttons.into_iter().map(|b| b.action).collect())
                }
                Delivery::Deleted(_) => None,
            })
            .unwrap_or_default()
    }

    fn record(&self, user_id: &str, delivery: Delivery) -> eyre::Result<()> {
        self.log
            .lock()
            .map_err(|_| eyre::eyre!("delivery log poisoned"))?
            .push((user_id.to_owned(), delivery));
        Ok(())
    }
}

impl Transport for RecordingTransport {
    fn send(&self, user_id: &str, message: &Outbound) -> eyre::Result<MessageId> {
        let id = MessageId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.record(user_id, Delivery::Sent(id, message.clone()))?;
        Ok(id)
    }

    fn edit(&self, user_id: &str, id: MessageId, message: &Outbound) -> eyre::Result<()> {
        self.record(user_id, Delivery::Edited(id, message.clone()))
    }

    fn delete(&self, user_id: &str, id: MessageId) -> eyre::Result<()> {
        self.record(user_id, Delivery::Deleted(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_wire_shape() -> eyre::Result<()> {
        let e: Event = serde_json::from_str(
            r#"{"user_id":"u1","kind":"button_press","action":"wallet_create"}"#,
        )?;
        assert_eq!(
            e.kind,
            EventKind::ButtonPress {
                action: "wallet_create".to_owned()
            }
        );

        let e: Event = serde_json::from_str(r#"{"user_id":"u1","kind":"text","text":"hello"}"#)?;
        assert_eq!(
            e.kind,
            EventKind::Text {
                text: "hello".to_owned()
            }
        );
        Ok(())
    }

    #[test]
    fn recording_transport_tracks_edits() -> eyre::Result<()> {
        let t = RecordingTransport::new();
        let id = t.send("u1", &Outbound::text("first"))?;
        t.edit("u1", id, &Outbound::text("second"))?;
        assert_eq!(t.last_text("u1").as_deref(), Some("second"));
        assert_eq!(t.deliveries("u1").len(), 2);
        assert!(t.deliveries("u2").is_empty());
        Ok(())
    }
}
