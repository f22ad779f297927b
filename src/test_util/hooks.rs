use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use crate::hooks::ServerHooks;


#[derive(Debug, Clone, Eq, PartialEq)]
pub enum HookEvent {
    AcceptError(String),
    SessionError(String),
    ChannelError(String),
    Degraded { error_mass: usize, last_error: String },
}

/// [ServerHooks] that record every call (errors in their `{:#}` rendering) instead of acting on
///  them. Degraded mode returns immediately.
#[derive(Debug, Default, Clone)]
pub struct TrackingHooks {
    tracker: Arc<Mutex<Vec<HookEvent>>>,
}
impl TrackingHooks {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn events(&self) -> Vec<HookEvent> {
        self.tracker.lock().unwrap().clone()
    }

    pub fn num_session_errors(&self) -> usize {
        self.count(|e| matches!(e, HookEvent::SessionError(_)))
    }

    pub fn num_channel_errors(&self) -> usize {
        self.count(|e| matches!(e, HookEvent::ChannelError(_)))
    }

    pub fn num_accept_errors(&self) -> usize {
        self.count(|e| matches!(e, HookEvent::AcceptError(_)))
    }

    /// the error masses of all degraded-mode calls, in call order
    pub fn degraded_calls(&self) -> Vec<usize> {
        self.tracker.lock().unwrap().iter()
            .filter_map(|e| match e {
                HookEvent::Degraded { error_mass, .. } => Some(*error_mass),
                _ => None,
            })
            .collect()
    }

    fn count(&self, pred: impl Fn(&HookEvent) -> bool) -> usize {
        self.tracker.lock().unwrap().iter()
            .filter(|e| pred(e))
            .count()
    }

    fn track(&self, event: HookEvent) {
        self.tracker.lock().unwrap().push(event);
    }
}

#[async_trait]
impl ServerHooks for TrackingHooks {
    fn on_accept_error(&self, err: &anyhow::Error) {
        self.track(HookEvent::AcceptError(format!("{:#}", err)));
    }

    fn on_session_error(&self, err: &anyhow::Error) {
        self.track(HookEvent::SessionError(format!("{:#}", err)));
    }

    fn on_channel_error(&self, err: &anyhow::Error) {
        self.track(HookEvent::ChannelError(format!("{:#}", err)));
    }

    async fn on_degraded(&self, error_mass: usize, last_error: &anyhow::Error) {
        self.track(HookEvent::Degraded {
            error_mass,
            last_error: format!("{:#}", last_error),
        });
    }
}
