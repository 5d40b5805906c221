//! Ephemeral signal routing
//!
//! Typing indicators are pure pass-through: delivered when the recipient has
//! a live connection, silently dropped otherwise. Nothing is persisted and
//! the sender gets no acknowledgment either way.

use std::sync::Arc;

use tracing::debug;

use crate::current_timestamp;
use crate::protocol::events::{Typing, TypingStatus, UserSummary};
use crate::server::connection::Delivery;
use crate::server::presence::PresenceRegistry;

/// Routes typing signals to live recipients
pub struct SignalRouter {
    presence: Arc<PresenceRegistry>,
}

impl SignalRouter {
    pub fn new(presence: Arc<PresenceRegistry>) -> Self {
        Self { presence }
    }

    /// Relay a typing indicator to the recipient, if reachable
    pub async fn typing(&self, from: &UserSummary, signal: &Typing) {
        match self.presence.lookup(&signal.to).await {
            Some(handle) => {
                handle.deliver(Delivery::TypingStatus(TypingStatus {
                    from: from.user_id.clone(),
                    from_name: from.username.clone(),
                    is_typing: signal.is_typing,
                    timestamp: current_timestamp(),
                }));
            }
            None => {
                debug!(to = %signal.to, "typing signal dropped, recipient unreachable");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::events::UserStatus;
    use crate::server::presence::ConnectionHandle;
    use tokio::sync::mpsc;

    fn summary(user_id: &str) -> UserSummary {
        UserSummary {
            user_id: user_id.to_string(),
            username: format!("name-{}", user_id),
            status: UserStatus::Online,
            last_seen: 0,
        }
    }

    #[tokio::test]
    async fn test_typing_reaches_live_recipient() {
        let presence = Arc::new(PresenceRegistry::new());
        let router = SignalRouter::new(Arc::clone(&presence));

        let (tx, mut rx) = mpsc::unbounded_channel();
        presence
            .register(&summary("bob"), ConnectionHandle::new("conn-b", tx))
            .await;

        let signal = Typing {
            to: "bob".to_string(),
            is_typing: true,
        };
        router.typing(&summary("alice"), &signal).await;

        match rx.recv().await.unwrap() {
            Delivery::TypingStatus(status) => {
                assert_eq!(status.from, "alice");
                assert_eq!(status.from_name, "name-alice");
                assert!(status.is_typing);
            }
            other => panic!("unexpected delivery: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_typing_to_offline_recipient_is_dropped() {
        let presence = Arc::new(PresenceRegistry::new());
        let router = SignalRouter::new(presence);

        let signal = Typing {
            to: "bob".to_string(),
            is_typing: true,
        };
        // No registered recipient: must be a silent no-op
        router.typing(&summary("alice"), &signal).await;
    }
}
