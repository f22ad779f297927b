use std::sync::Mutex;
use std::time::Duration;
use anyhow::bail;
use async_trait::async_trait;
use rand::Rng;
use tokio::time::sleep;
use tracing::{error, warn};


/// Decides how the accept loop reacts to a high error mass, i.e. a streak of consecutive accept
///  failures that reached the configured threshold.
///
/// The accept loop awaits this call before accepting again, so pausing here throttles the loop.
///  It is called once per failure while the streak lasts, with an increasing `error_mass`, and
///  must eventually return.
#[async_trait]
pub trait DegradedPolicy: Send + Sync + 'static {
    async fn on_degraded(&self, error_mass: usize, last_error: &anyhow::Error);
}


/// Pauses the accept loop for the same fixed time on every call
#[derive(Debug)]
pub struct FixedCooldown {
    pub cooldown: Duration,
}
impl Default for FixedCooldown {
    fn default() -> Self {
        FixedCooldown {
            cooldown: Duration::from_secs(30),
        }
    }
}

#[async_trait]
impl DegradedPolicy for FixedCooldown {
    async fn on_degraded(&self, error_mass: usize, last_error: &anyhow::Error) {
        warn!("{} consecutive accept failures, most recently '{}' - pausing for {:?}", error_mass, last_error, self.cooldown);
        sleep(self.cooldown).await;
    }
}


/// Doubles the pause with every call in the same failure streak, up to a maximum. A streak is
///  over when the reported error mass drops, which means that an accept succeeded in between.
///
/// With `jitter` > 0, each pause is shortened by a random fraction of up to `jitter` to avoid
///  several servers retrying in lockstep.
#[derive(Debug)]
pub struct ExponentialCooldown {
    initial: Duration,
    max: Duration,
    jitter: f64,
    streak: Mutex<Streak>,
}

#[derive(Debug, Default)]
struct Streak {
    last_mass: Option<usize>,
    step: u32,
}

impl ExponentialCooldown {
    pub fn new(initial: Duration, max: Duration, jitter: f64) -> anyhow::Result<ExponentialCooldown> {
        if initial > max {
            bail!("initial cooldown {:?} exceeds the maximum of {:?}", initial, max);
        }
        if !(0.0..=1.0).contains(&jitter) {
            bail!("jitter must be between 0 and 1, was {}", jitter);
        }

        Ok(ExponentialCooldown {
            initial,
            max,
            jitter,
            streak: Default::default(),
        })
    }

    fn next_cooldown(&self, error_mass: usize) -> Duration {
        let step = {
            let mut streak = self.streak.lock().unwrap();
            match streak.last_mass {
                Some(last) if error_mass > last => streak.step = streak.step.saturating_add(1),
                _ => streak.step = 0,
            }
            streak.last_mass = Some(error_mass);
            streak.step
        };

        let cooldown = self.initial
            .saturating_mul(2u32.saturating_pow(step))
            .min(self.max);

        if self.jitter > 0.0 {
            cooldown.mul_f64(1.0 - self.jitter * rand::thread_rng().gen_range(0.0..1.0))
        }
        else {
            cooldown
        }
    }
}

#[async_trait]
impl DegradedPolicy for ExponentialCooldown {
    async fn on_degraded(&self, error_mass: usize, last_error: &anyhow::Error) {
        let cooldown = self.next_cooldown(error_mass);
        warn!("{} consecutive accept failures, most recently '{}' - pausing for {:?}", error_mass, last_error, cooldown);
        sleep(cooldown).await;
    }
}


/// Does not pause at all, leaving it to the transport to shed load. Only logs the condition.
#[derive(Debug, Default)]
pub struct ShedLoad;

#[async_trait]
impl DegradedPolicy for ShedLoad {
    async fn on_degraded(&self, error_mass: usize, last_error: &anyhow::Error) {
        error!("{} consecutive accept failures, most recently '{}' - continuing without pause", error_mass, last_error);
    }
}
