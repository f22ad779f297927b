use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, trace};
use crate::channel::bind_channel;
use crate::deadline::{deadline_after, effective_timeout, op_deadline, sleep_until_opt, with_deadline};
use crate::emission::{Emission, Source};
use crate::frame::{read_frame, write_frame};
use crate::mux::VirtualConn;
use crate::server::ServerContext;


/// Serves one accepted master connection: reads the request, feeds it to the source and relays
///  a reply pair (header, channel address) for each emission, strictly one after the other.
///
/// The session never waits for its channels. It ends when the source's sequence ends, when the
///  source stays idle for longer than the sourcing timeout, when the serving deadline passes or
///  when the request cannot be read - and the master connection is closed in all of these cases.
pub(crate) struct MasterSession {
    ctx: Arc<ServerContext>,
    conn: Box<dyn VirtualConn>,
    serving_deadline: Option<Instant>,
}

impl MasterSession {
    /// NB: the serving deadline starts running here, i.e. when the connection is accepted
    pub fn new(ctx: Arc<ServerContext>, conn: Box<dyn VirtualConn>) -> MasterSession {
        let serving_deadline = deadline_after(ctx.config.timeouts.serving);
        MasterSession {
            ctx,
            conn,
            serving_deadline,
        }
    }

    pub async fn run(mut self, source: Arc<dyn Source>) {
        let ctx = self.ctx.clone();
        let timeouts = &ctx.config.timeouts;

        let read_deadline = op_deadline(self.serving_deadline, timeouts.master_read);
        let request = match with_deadline(read_deadline, "reading request frame", read_frame(&mut self.conn, ctx.config.max_frame_len)).await {
            Ok(request) => request,
            Err(e) => {
                ctx.hooks.on_session_error(&e);
                return;
            }
        };
        debug!("received request of {} bytes", request.len());

        let idle_timeout = effective_timeout(timeouts.sourcing);
        let mut idle_timer = ctx.timer_pool.checkout();
        if let Some(timeout) = idle_timeout {
            idle_timer.arm(timeout);
        }

        let mut emissions = source.source(request);
        let mut num_emissions = 0usize;
        loop {
            let emission = tokio::select! {
                _ = idle_timer.fired() => {
                    debug!("source idle for {:?} - closing session", idle_timeout);
                    break;
                }
                _ = sleep_until_opt(self.serving_deadline) => {
                    debug!("serving timeout elapsed - closing session");
                    break;
                }
                emission = emissions.recv() => match emission {
                    Some(emission) => emission,
                    None => {
                        debug!("sourcing complete after {} emissions", num_emissions);
                        break;
                    }
                }
            };

            if let Some(timeout) = idle_timeout {
                idle_timer.arm(timeout);
            }
            num_emissions += 1;
            self.relay(emission).await;
        }
    }

    async fn relay(&mut self, emission: Emission) {
        let ctx = &self.ctx;

        // a failed bind is reported by bind_channel, and we move on to the next emission
        let Ok(addr) = bind_channel(ctx.mpx.as_ref(), &ctx.config, &ctx.hooks, emission.out).await else {
            return;
        };
        trace!("relaying channel address {}", addr);

        let write_timeout = ctx.config.timeouts.master_write;
        let header_deadline = op_deadline(self.serving_deadline, write_timeout);
        if let Err(e) = with_deadline(header_deadline, "writing reply header", write_frame(&mut self.conn, &emission.header)).await {
            ctx.hooks.on_session_error(&e);
            return;
        }

        // if this write fails, the peer has a header without address and needs to time out on its own
        let addr_deadline = op_deadline(self.serving_deadline, write_timeout);
        if let Err(e) = with_deadline(addr_deadline, "writing reply address", write_frame(&mut self.conn, addr.as_bytes())).await {
            ctx.hooks.on_session_error(&e);
        }
    }
}
