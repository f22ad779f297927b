use std::future::pending;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep_until, Instant, Sleep};
use tracing::{debug, trace};


/// A single-shot countdown that can be re-armed any number of times without reallocating.
///
/// A timer that is not armed never fires, regardless of what happened to it before.
pub struct Timer {
    sleep: Pin<Box<Sleep>>,
    armed: bool,
}
impl Timer {
    fn new() -> Timer {
        Timer {
            sleep: Box::pin(sleep_until(Instant::now())),
            armed: false,
        }
    }

    /// (Re-)starts the countdown, discarding any previous deadline
    pub fn arm(&mut self, duration: Duration) {
        self.sleep.as_mut().reset(Instant::now() + duration);
        self.armed = true;
    }

    pub fn stop(&mut self) {
        self.armed = false;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Completes when the armed countdown elapses, leaving the timer stopped. Pending forever for
    ///  a stopped timer.
    pub async fn fired(&mut self) {
        if !self.armed {
            pending::<()>().await;
        }
        self.sleep.as_mut().await;
        self.armed = false;
    }
}


pub struct TimerPool {
    max_pool_size: usize,
    timers: Mutex<Vec<Timer>>,
}

impl TimerPool {
    pub fn new(max_pool_size: usize) -> Self {
        TimerPool {
            max_pool_size,
            timers: Mutex::new(Vec::with_capacity(max_pool_size)),
        }
    }

    /// Takes a stopped timer from the pool. It goes back to the pool when the returned guard is
    ///  dropped.
    pub fn checkout(self: &Arc<Self>) -> PooledTimer {
        PooledTimer {
            timer: Some(self.get_from_pool()),
            pool: self.clone(),
        }
    }

    pub fn num_pooled(&self) -> usize {
        self.timers.lock().unwrap().len()
    }

    fn get_from_pool(&self) -> Timer {
        {
            let mut timers = self.timers.lock().unwrap();
            if let Some(timer) = timers.pop() {
                trace!("returning timer from pool");
                return timer;
            }
        }

        debug!("no timer in pool: creating new timer");
        Timer::new()
    }

    fn return_to_pool(&self, mut timer: Timer) {
        timer.stop();

        let mut timers = self.timers.lock().unwrap();
        if timers.len() < self.max_pool_size {
            trace!("returning timer to pool");
            timers.push(timer);
        }
        else {
            debug!("pool is full: discarding returned timer");
        }
    }
}

pub struct PooledTimer {
    timer: Option<Timer>,
    pool: Arc<TimerPool>,
}
impl Deref for PooledTimer {
    type Target = Timer;

    fn deref(&self) -> &Timer {
        self.timer.as_ref()
            .expect("this is a bug: timer is only taken on drop")
    }
}
impl DerefMut for PooledTimer {
    fn deref_mut(&mut self) -> &mut Timer {
        self.timer.as_mut()
            .expect("this is a bug: timer is only taken on drop")
    }
}
impl Drop for PooledTimer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            self.pool.return_to_pool(timer);
        }
    }
}
