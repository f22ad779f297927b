use std::sync::Arc;
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use tracing::{debug, warn};
use crate::degraded::{DegradedPolicy, FixedCooldown};


/// All failures of a running server surface here and nowhere else - the accept loop, sessions
///  and channels never return errors to anybody.
///
/// Implementations are called concurrently from any number of sessions and channels. They must
///  not block: the accept loop in particular waits for [ServerHooks::on_degraded] before it
///  accepts the next connection.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ServerHooks: Send + Sync + 'static {
    /// accepting a master connection failed
    fn on_accept_error(&self, err: &anyhow::Error);

    /// reading the request, binding a channel or writing a reply failed
    fn on_session_error(&self, err: &anyhow::Error);

    /// a channel's peer did not connect, or writing a frame to it failed
    fn on_channel_error(&self, err: &anyhow::Error);

    /// the accept loop's error mass reached the threshold
    async fn on_degraded(&self, error_mass: usize, last_error: &anyhow::Error);
}


/// Logs all errors and delegates degraded mode to a [DegradedPolicy]
pub struct LoggingHooks {
    degraded_policy: Arc<dyn DegradedPolicy>,
}

impl LoggingHooks {
    pub fn new(degraded_policy: Arc<dyn DegradedPolicy>) -> LoggingHooks {
        LoggingHooks { degraded_policy }
    }
}

impl Default for LoggingHooks {
    fn default() -> Self {
        Self::new(Arc::new(FixedCooldown::default()))
    }
}

#[async_trait]
impl ServerHooks for LoggingHooks {
    fn on_accept_error(&self, err: &anyhow::Error) {
        warn!("error accepting master connection: {:#}", err);
    }

    fn on_session_error(&self, err: &anyhow::Error) {
        warn!("session error: {:#}", err);
    }

    fn on_channel_error(&self, err: &anyhow::Error) {
        debug!("channel error: {:#}", err);
    }

    async fn on_degraded(&self, error_mass: usize, last_error: &anyhow::Error) {
        self.degraded_policy.on_degraded(error_mass, last_error).await
    }
}
