use tokio_util::sync::CancellationToken;

/// Shared stop flag of a batch. Workers poll it at their checkpoints, a worker waiting for the
/// next body bytes or for response headers can also await it.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    token: CancellationToken,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        if !self.token.is_cancelled() {
            log::info!("Stop requested");
        }
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once `stop` has been called
    pub async fn stopped(&self) {
        self.token.cancelled().await
    }
}
