use std::sync::Arc;
use anyhow::Context;
use tokio::task::JoinHandle;
use tracing::{debug, info, span, Instrument, Level};
use uuid::Uuid;
use crate::config::ServerConfig;
use crate::emission::Source;
use crate::error_mass::ErrorMass;
use crate::hooks::{LoggingHooks, ServerHooks};
use crate::mux::{Multiplexer, VirtualListener};
use crate::session::MasterSession;
use crate::timer_pool::TimerPool;


/// Everything sessions and channels share: all of it is either read-only or synchronized
///  internally
pub(crate) struct ServerContext {
    pub mpx: Arc<dyn Multiplexer>,
    pub config: ServerConfig,
    pub hooks: Arc<dyn ServerHooks>,
    pub timer_pool: Arc<TimerPool>,
}


/// A chanserv server. It can listen on any number of addresses, each with a source of its own,
///  and all of them share the configuration, the hooks and the timer pool.
#[derive(Clone)]
pub struct Server {
    ctx: Arc<ServerContext>,
}

impl Server {
    pub fn new(mpx: Arc<dyn Multiplexer>, config: ServerConfig, hooks: Arc<dyn ServerHooks>) -> anyhow::Result<Server> {
        config.validate()
            .context("invalid server configuration")?;

        let timer_pool = Arc::new(TimerPool::new(config.timer_pool_size));
        Ok(Server {
            ctx: Arc::new(ServerContext {
                mpx,
                config,
                hooks,
                timer_pool,
            }),
        })
    }

    /// A server that logs all errors and pauses for a fixed cooldown in degraded mode
    pub fn with_logging_hooks(mpx: Arc<dyn Multiplexer>, config: ServerConfig) -> anyhow::Result<Server> {
        Self::new(mpx, config, Arc::new(LoggingHooks::default()))
    }

    /// Binds a master listener at `addr` and starts accepting on it in a task of its own.
    ///
    /// Only a failure to bind is returned; everything that goes wrong afterwards is reported to
    ///  the hooks. The accept loop runs until the returned handle is aborted.
    pub async fn listen_and_serve(&self, addr: &str, source: impl Source) -> anyhow::Result<JoinHandle<()>> {
        let listener = self.ctx.mpx.bind("", addr).await
            .with_context(|| format!("binding master listener at {}", addr))?;

        let local_addr = listener.local_addr();
        info!("serving at {}", local_addr);

        let span = span!(Level::INFO, "server", addr = %local_addr);
        Ok(tokio::spawn(accept_loop(self.ctx.clone(), listener, Arc::new(source)).instrument(span)))
    }
}

async fn accept_loop(ctx: Arc<ServerContext>, mut listener: Box<dyn VirtualListener>, source: Arc<dyn Source>) {
    let mut error_mass = ErrorMass::new(ctx.config.max_error_mass);

    loop {
        match listener.accept().await {
            Ok(conn) => {
                error_mass.on_success();

                let session_id = Uuid::new_v4();
                debug!(%session_id, "accepted master connection");

                let session = MasterSession::new(ctx.clone(), conn);
                let span = span!(Level::DEBUG, "master_session", %session_id);
                tokio::spawn(session.run(source.clone()).instrument(span));
            }
            Err(e) => {
                ctx.hooks.on_accept_error(&e);
                if let Some(mass) = error_mass.on_failure() {
                    // NB: this blocks the accept loop for as long as the hook decides
                    ctx.hooks.on_degraded(mass, &e).await;
                }
            }
        }
    }
}
