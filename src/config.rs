use std::time::Duration;
use anyhow::bail;
use crate::frame::DEFAULT_MAX_FRAME_LEN;


/// All timeouts are optional, `None` (or zero) meaning "unbounded".
#[derive(Debug, Clone, Default)]
pub struct ServerTimeouts {
    /// Overall deadline for a master connection, counted from its acceptance, and for each
    ///  channel connection, counted from the peer connecting. When it passes, the connection is
    ///  closed regardless of what it is doing.
    pub serving: Option<Duration>,
    /// Maximum idle time between two emissions (or between the request and the first emission).
    ///  This is a rolling timeout: every emission restarts it. When it fires, the master
    ///  connection is closed without reporting an error.
    pub sourcing: Option<Duration>,
    /// How long a freshly bound channel waits for its peer to connect
    pub channel_accept: Option<Duration>,

    pub master_read: Option<Duration>,
    pub master_write: Option<Duration>,
    pub frame_write: Option<Duration>,
}

/// What a channel does after failing to write a frame to its peer
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum WriteErrorPolicy {
    /// keep consuming the emission's frames, attempting (and reporting) every write
    KeepDraining,
    /// close the channel, dropping the remaining frames unconsumed
    Abort,
}


#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Number of consecutive accept failures at which the degraded-mode hook starts being
    ///  called (and it is called for every further failure until an accept succeeds). 0 disables
    ///  degraded mode.
    pub max_error_mass: usize,

    /// Upper bound for the request frame read from a master connection
    pub max_frame_len: usize,

    /// Number of stopped timers kept around for reuse by later sessions
    pub timer_pool_size: usize,

    pub channel_write_error_policy: WriteErrorPolicy,

    pub timeouts: ServerTimeouts,
}

impl ServerConfig {
    pub fn new() -> ServerConfig {
        ServerConfig {
            max_error_mass: 10,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            timer_pool_size: 1024,
            channel_write_error_policy: WriteErrorPolicy::KeepDraining,
            timeouts: ServerTimeouts {
                channel_accept: Some(Duration::from_secs(30)),
                ..Default::default()
            },
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_frame_len == 0 {
            bail!("max frame length must be positive");
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}


#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub max_frame_len: usize,

    pub dial_timeout: Option<Duration>,
    pub request_write_timeout: Option<Duration>,
    /// applies to every single frame read, on master connections (reply headers and addresses)
    ///  as well as on channels
    pub frame_read_timeout: Option<Duration>,
}

impl ClientConfig {
    pub fn new() -> ClientConfig {
        ClientConfig {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            dial_timeout: Some(Duration::from_secs(30)),
            request_write_timeout: None,
            frame_read_timeout: None,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}
