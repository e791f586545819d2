//! Cancellable periodic senders

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Handle to a periodic sender started with
/// [`ControlChannelClient::send_message_interval`](super::ControlChannelClient::send_message_interval).
///
/// Dropping the handle stops the sender. [`IntervalHandle::cancel`] also
/// waits for it to exit, so nothing is sent once it returns.
pub struct IntervalHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl IntervalHandle {
    pub(crate) fn new(cancel: CancellationToken, task: JoinHandle<()>) -> Self {
        Self {
            cancel,
            task: Some(task),
        }
    }

    /// Stop the sender and wait until it has exited
    pub async fn cancel(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Interval sender ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for IntervalHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
