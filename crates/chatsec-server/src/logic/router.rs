//! Message router
//!
//! Broadcast and unicast on top of registry snapshots. A line is rendered
//! once, then pushed into each recipient's queue outside the registry lock;
//! a full or closed queue only affects that recipient.

use std::sync::Arc;

use tracing::{debug, trace};

use chatsec_core::{RegistryError, ServerMessage};

use crate::managers::{SessionHandle, SessionRegistry};

/// Delivery counts of one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Routes server messages to authenticated sessions
#[derive(Debug, Clone)]
pub struct MessageRouter {
    registry: Arc<SessionRegistry>,
}

impl MessageRouter {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Deliver to every session in the snapshot taken now
    pub fn broadcast(&self, message: &ServerMessage) -> DeliveryReport {
        let recipients = self.registry.snapshot();
        Self::deliver(&recipients, message)
    }

    /// Deliver to an explicit recipient list, in order
    pub fn deliver(recipients: &[SessionHandle], message: &ServerMessage) -> DeliveryReport {
        let line = message.to_string();
        let mut report = DeliveryReport::default();

        for recipient in recipients {
            if recipient.send_line(line.clone()) {
                report.delivered += 1;
            } else {
                report.failed += 1;
            }
        }

        trace!(
            delivered = report.delivered,
            failed = report.failed,
            "Broadcast delivered"
        );
        report
    }

    /// Broadcast chat text tagged with its sender
    pub fn broadcast_chat(&self, sender: &str, text: &str) -> DeliveryReport {
        self.broadcast(&ServerMessage::Broadcast {
            sender: sender.to_string(),
            text: text.to_string(),
        })
    }

    /// Deliver to the authenticated session called `target`
    pub fn unicast(&self, target: &str, message: &ServerMessage) -> Result<SessionHandle, RegistryError> {
        let handle = self
            .registry
            .lookup_authenticated(target)
            .ok_or_else(|| RegistryError::SessionNotFound {
                name: target.to_string(),
            })?;

        if !handle.send(message) {
            debug!(recipient = target, "Unicast not queued");
        }
        Ok(handle)
    }

    /// Private chat envelope from `sender` to `target`
    pub fn unicast_chat(
        &self,
        target: &str,
        sender: &str,
        text: &str,
    ) -> Result<SessionHandle, RegistryError> {
        self.unicast(
            target,
            &ServerMessage::Private {
                sender: sender.to_string(),
                text: text.to_string(),
            },
        )
    }
}
