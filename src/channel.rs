use std::sync::Arc;
use std::time::Duration;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, span, trace, Instrument, Level};
use crate::config::{ServerConfig, WriteErrorPolicy};
use crate::deadline::{deadline_after, is_expired, op_deadline, sleep_until_opt, with_deadline};
use crate::frame::write_frame;
use crate::hooks::ServerHooks;
use crate::mux::{Multiplexer, VirtualListener, EPHEMERAL_ADDR};


/// Binds a listener at a fresh address and starts serving `out` on it in a task of its own,
///  returning the address as soon as the listener is bound. The caller can hand out the address
///  right away, but there is no telling whether or when a peer connects.
///
/// A bind failure is reported to the session error hook (and returned). There is no retry.
pub(crate) async fn bind_channel(
    mpx: &dyn Multiplexer,
    config: &ServerConfig,
    hooks: &Arc<dyn ServerHooks>,
    out: mpsc::Receiver<Bytes>,
) -> anyhow::Result<String> {
    let listener = match mpx.bind("", EPHEMERAL_ADDR).await {
        Ok(listener) => listener,
        Err(e) => {
            let e = e.context("binding channel listener");
            hooks.on_session_error(&e);
            return Err(e);
        }
    };

    let addr = listener.local_addr();
    let channel = Channel::new(listener, out, hooks.clone(), config);

    let span = span!(Level::DEBUG, "channel", %addr);
    tokio::spawn(channel.serve().instrument(span));
    Ok(addr)
}


/// A single-use side connection: one listener, at most one peer, one emission's frames.
///
/// Dropping the channel releases the listener and connection, and that is what happens on every
///  exit path of [Channel::serve].
pub(crate) struct Channel {
    listener: Box<dyn VirtualListener>,
    out: mpsc::Receiver<Bytes>,
    hooks: Arc<dyn ServerHooks>,

    accept_timeout: Option<Duration>,
    serving_timeout: Option<Duration>,
    frame_write_timeout: Option<Duration>,
    write_error_policy: WriteErrorPolicy,
}

impl Channel {
    pub fn new(listener: Box<dyn VirtualListener>, out: mpsc::Receiver<Bytes>, hooks: Arc<dyn ServerHooks>, config: &ServerConfig) -> Channel {
        Channel {
            listener,
            out,
            hooks,
            accept_timeout: config.timeouts.channel_accept,
            serving_timeout: config.timeouts.serving,
            frame_write_timeout: config.timeouts.frame_write,
            write_error_policy: config.channel_write_error_policy,
        }
    }

    pub async fn serve(mut self) {
        let addr = self.listener.local_addr();

        let accept_deadline = deadline_after(self.accept_timeout);
        let mut conn = match with_deadline(accept_deadline, "waiting for channel peer", self.listener.accept()).await {
            Ok(conn) => conn,
            Err(e) => {
                // the emission's remaining frames are dropped with `self.out`, unconsumed
                self.hooks.on_channel_error(&e.context(format!("channel {}", addr)));
                return;
            }
        };
        debug!("peer connected");

        let serving_deadline = deadline_after(self.serving_timeout);
        let mut num_frames = 0usize;
        loop {
            let frame = tokio::select! {
                frame = self.out.recv() => match frame {
                    Some(frame) => frame,
                    None => {
                        debug!("emission complete after {} frames", num_frames);
                        break;
                    }
                },
                _ = sleep_until_opt(serving_deadline) => {
                    debug!("serving timeout elapsed after {} frames - closing channel", num_frames);
                    break;
                }
            };

            trace!("writing frame of {} bytes", frame.len());
            let write_deadline = op_deadline(serving_deadline, self.frame_write_timeout);
            match with_deadline(write_deadline, "writing channel frame", write_frame(&mut conn, &frame)).await {
                Ok(()) => num_frames += 1,
                Err(_) if is_expired(serving_deadline) => {
                    debug!("serving timeout elapsed while writing - closing channel");
                    break;
                }
                Err(e) => {
                    self.hooks.on_channel_error(&e.context(format!("channel {}", addr)));
                    if self.write_error_policy == WriteErrorPolicy::Abort {
                        break;
                    }
                }
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use std::time::Duration;
    use anyhow::anyhow;
    use tokio::time::{sleep, Instant};
    use crate::emission::Emission;
    use crate::frame::try_read_frame;
    use crate::mem_mux::MemoryMultiplexer;
    use crate::mux::{MockMultiplexer, MockVirtualListener};
    use crate::test_util::hooks::TrackingHooks;
    use super::*;

    fn frames(raw: &[&'static str]) -> Vec<Bytes> {
        raw.iter().map(|s| Bytes::from_static(s.as_bytes())).collect()
    }

    async fn read_all(mpx: &MemoryMultiplexer, addr: &str) -> Vec<Bytes> {
        let mut conn = mpx.dial(addr).await.unwrap();
        let mut result = Vec::new();
        while let Some(frame) = try_read_frame(&mut conn, 1024).await.unwrap() {
            result.push(frame);
        }
        result
    }

    #[tokio::test]
    async fn test_streams_frames_then_closes() {
        let mpx = MemoryMultiplexer::new();
        let hooks = TrackingHooks::new();
        let listener = mpx.bind("", EPHEMERAL_ADDR).await.unwrap();
        let addr = listener.local_addr();

        let emission = Emission::from_frames("h", frames(&["frameA", "frameB"]));
        let channel = Channel::new(listener, emission.out, Arc::new(hooks.clone()), &ServerConfig::new());

        let (_, received) = tokio::join!(channel.serve(), read_all(&mpx, &addr));

        assert_eq!(received, frames(&["frameA", "frameB"]));
        assert!(hooks.events().is_empty());
        assert_eq!(mpx.open_listeners(), 0);
        assert_eq!(mpx.open_connection_ends(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_never_connects() {
        let mpx = MemoryMultiplexer::new();
        let hooks = TrackingHooks::new();
        let listener = mpx.bind("", EPHEMERAL_ADDR).await.unwrap();

        let (sender, out) = mpsc::channel(4);
        sender.send(Bytes::from_static(b"never read")).await.unwrap();

        let mut config = ServerConfig::new();
        config.timeouts.channel_accept = Some(Duration::from_secs(5));
        let channel = Channel::new(listener, out, Arc::new(hooks.clone()), &config);

        let start = Instant::now();
        channel.serve().await;

        assert_eq!(start.elapsed(), Duration::from_secs(5));
        assert_eq!(hooks.num_channel_errors(), 1);
        assert!(sender.is_closed());
        assert_eq!(mpx.open_listeners(), 0);
    }

    #[tokio::test]
    async fn test_accept_error_is_reported() {
        let mut listener = MockVirtualListener::new();
        listener.expect_local_addr()
            .return_const(":1".to_string());
        listener.expect_accept()
            .times(1)
            .returning(|| Err(anyhow!("transport gone")));

        let hooks = TrackingHooks::new();
        let emission = Emission::from_frames("h", frames(&["a"]));
        Channel::new(Box::new(listener), emission.out, Arc::new(hooks.clone()), &ServerConfig::new())
            .serve().await;

        assert_eq!(hooks.num_channel_errors(), 1);
        assert!(format!("{:?}", hooks.events()).contains("transport gone"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_serving_timeout_mid_stream() {
        let mpx = MemoryMultiplexer::new();
        let hooks = TrackingHooks::new();
        let listener = mpx.bind("", EPHEMERAL_ADDR).await.unwrap();
        let addr = listener.local_addr();

        let (sender, out) = mpsc::channel(4);
        sender.send(Bytes::from_static(b"first")).await.unwrap();

        let mut config = ServerConfig::new();
        config.timeouts.serving = Some(Duration::from_secs(2));
        let handle = tokio::spawn(Channel::new(listener, out, Arc::new(hooks.clone()), &config).serve());

        let start = Instant::now();
        let received = read_all(&mpx, &addr).await;
        assert_eq!(received, frames(&["first"]));
        assert_eq!(start.elapsed(), Duration::from_secs(2));

        handle.await.unwrap();
        assert!(hooks.events().is_empty(), "reaching the serving deadline is not an error");
        assert!(sender.is_closed());
        assert_eq!(mpx.open_listeners(), 0);
        assert_eq!(mpx.open_connection_ends(), 0);
    }

    #[tokio::test]
    async fn test_write_failures_keep_draining() {
        let mpx = MemoryMultiplexer::new();
        let hooks = TrackingHooks::new();
        let listener = mpx.bind("", EPHEMERAL_ADDR).await.unwrap();
        drop(mpx.dial(&listener.local_addr()).await.unwrap());

        let emission = Emission::from_frames("h", frames(&["a", "b", "c"]));
        Channel::new(listener, emission.out, Arc::new(hooks.clone()), &ServerConfig::new())
            .serve().await;

        assert_eq!(hooks.num_channel_errors(), 3);
        assert_eq!(mpx.open_connection_ends(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_write_timeout_keeps_draining() {
        // the peer connects but never reads, and no frame fits the connection's buffer
        let mpx = MemoryMultiplexer::with_buffer_size(8, 16);
        let hooks = TrackingHooks::new();
        let listener = mpx.bind("", EPHEMERAL_ADDR).await.unwrap();
        let _peer = mpx.dial(&listener.local_addr()).await.unwrap();

        let mut config = ServerConfig::new();
        config.timeouts.frame_write = Some(Duration::from_secs(1));
        let emission = Emission::from_frames("h", frames(&["frame-a", "frame-b", "frame-c"]));

        let start = Instant::now();
        Channel::new(listener, emission.out, Arc::new(hooks.clone()), &config)
            .serve().await;

        assert_eq!(start.elapsed(), Duration::from_secs(3));
        assert_eq!(hooks.num_channel_errors(), 3);
        assert!(hooks.events().iter()
            .all(|e| format!("{:?}", e).contains("writing channel frame timed out")));
    }

    #[tokio::test]
    async fn test_write_failure_aborts() {
        let mpx = MemoryMultiplexer::new();
        let hooks = TrackingHooks::new();
        let listener = mpx.bind("", EPHEMERAL_ADDR).await.unwrap();
        drop(mpx.dial(&listener.local_addr()).await.unwrap());

        let mut config = ServerConfig::new();
        config.channel_write_error_policy = WriteErrorPolicy::Abort;
        let emission = Emission::from_frames("h", frames(&["a", "b", "c"]));
        Channel::new(listener, emission.out, Arc::new(hooks.clone()), &config)
            .serve().await;

        assert_eq!(hooks.num_channel_errors(), 1);
    }

    #[tokio::test]
    async fn test_bind_channel_returns_address_before_peer_connects() {
        let mpx = MemoryMultiplexer::new();
        let hooks: Arc<dyn ServerHooks> = Arc::new(TrackingHooks::new());
        let emission = Emission::from_frames("h", frames(&["x"]));

        let addr = bind_channel(&mpx, &ServerConfig::new(), &hooks, emission.out).await.unwrap();
        assert_eq!(mpx.open_listeners(), 1);

        assert_eq!(read_all(&mpx, &addr).await, frames(&["x"]));
        // let the channel task wind down
        while mpx.open_listeners() > 0 {
            sleep(Duration::from_millis(1)).await;
        }
    }

    #[tokio::test]
    async fn test_bind_channel_failure() {
        let mut mpx = MockMultiplexer::new();
        mpx.expect_bind()
            .returning(|_, _| Err(anyhow!("no free address")));

        let hooks = TrackingHooks::new();
        let dyn_hooks: Arc<dyn ServerHooks> = Arc::new(hooks.clone());
        let emission = Emission::from_frames("h", frames(&["x"]));

        assert!(bind_channel(&mpx, &ServerConfig::new(), &dyn_hooks, emission.out).await.is_err());
        assert_eq!(hooks.num_session_errors(), 1);
    }
}
