use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::MessagingResult;

/// Outcome recorded by an [`AcknowledgementCallback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcknowledgementStatus {
    #[default]
    Pending,
    Accepted,
    Requeued,
}

/// Attached to a received message by channels that can redeliver it.
///
/// Polling consumers accept the message once it was handled and requeue it
/// when handling failed, unless the callback is in manual mode and the
/// handler acknowledges by itself.
pub trait AcknowledgementCallback: Send + Sync {
    /// Whether the consumer acknowledges automatically.
    fn is_auto_ack(&self) -> bool;

    fn accept(&self) -> MessagingResult<()>;

    fn requeue(&self) -> MessagingResult<()>;

    fn status(&self) -> AcknowledgementStatus;
}

/// An acknowledgement callback that only records what happened.
#[derive(Debug, Default)]
pub struct NullAcknowledgementCallback {
    manual: bool,
    status: Mutex<AcknowledgementStatus>,
}

impl NullAcknowledgementCallback {
    pub fn create() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn create_with_manual_ack() -> Arc<Self> {
        Arc::new(Self {
            manual: true,
            ..Self::default()
        })
    }

    pub fn is_acked(&self) -> bool {
        self.status() == AcknowledgementStatus::Accepted
    }

    pub fn is_requeued(&self) -> bool {
        self.status() == AcknowledgementStatus::Requeued
    }
}

impl AcknowledgementCallback for NullAcknowledgementCallback {
    fn is_auto_ack(&self) -> bool {
        !self.manual
    }

    fn accept(&self) -> MessagingResult<()> {
        *self.status.lock() = AcknowledgementStatus::Accepted;
        Ok(())
    }

    fn requeue(&self) -> MessagingResult<()> {
        *self.status.lock() = AcknowledgementStatus::Requeued;
        Ok(())
    }

    fn status(&self) -> AcknowledgementStatus {
        *self.status.lock()
    }
}
