use std::sync::Arc;
use std::time::Duration;
use anyhow::Context;
use bytes::Bytes;
use tracing::trace;
use crate::config::ClientConfig;
use crate::deadline::{deadline_after, with_deadline};
use crate::frame::{read_frame, try_read_frame, write_frame};
use crate::mux::{Multiplexer, VirtualConn};


/// The client side of the master and channel protocols
#[derive(Clone)]
pub struct Client {
    mpx: Arc<dyn Multiplexer>,
    config: ClientConfig,
}

impl Client {
    pub fn new(mpx: Arc<dyn Multiplexer>, config: ClientConfig) -> Client {
        Client { mpx, config }
    }

    /// Sends `payload` as the request to the server at `master_addr`. Replies are read from the
    ///  returned [MasterReplies], and dropping it closes the master connection.
    pub async fn request(&self, master_addr: &str, payload: &[u8]) -> anyhow::Result<MasterReplies> {
        let mut conn = self.dial(master_addr).await?;

        let write_deadline = deadline_after(self.config.request_write_timeout);
        with_deadline(write_deadline, "writing request", write_frame(&mut conn, payload)).await
            .with_context(|| format!("sending request to {}", master_addr))?;
        trace!("sent request of {} bytes to {}", payload.len(), master_addr);

        Ok(MasterReplies {
            conn,
            max_frame_len: self.config.max_frame_len,
            read_timeout: self.config.frame_read_timeout,
        })
    }

    /// Connects to a channel at an address received in a [Reply]
    pub async fn open_channel(&self, addr: &str) -> anyhow::Result<ChannelReader> {
        Ok(ChannelReader {
            conn: self.dial(addr).await?,
            max_frame_len: self.config.max_frame_len,
            read_timeout: self.config.frame_read_timeout,
        })
    }

    async fn dial(&self, addr: &str) -> anyhow::Result<Box<dyn VirtualConn>> {
        let deadline = deadline_after(self.config.dial_timeout);
        with_deadline(deadline, "dialing", self.mpx.dial(addr)).await
            .with_context(|| format!("connecting to {}", addr))
    }
}


#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub header: Bytes,
    /// the channel's address, to be passed to [Client::open_channel]
    pub address: String,
}


pub struct MasterReplies {
    conn: Box<dyn VirtualConn>,
    max_frame_len: usize,
    read_timeout: Option<Duration>,
}

impl MasterReplies {
    /// The next reply pair, or `None` if the server closed the connection after the previous one
    pub async fn next_reply(&mut self) -> anyhow::Result<Option<Reply>> {
        let deadline = deadline_after(self.read_timeout);
        let Some(header) = with_deadline(deadline, "reading reply header", try_read_frame(&mut self.conn, self.max_frame_len)).await? else {
            return Ok(None);
        };

        let deadline = deadline_after(self.read_timeout);
        let address = with_deadline(deadline, "reading reply address", read_frame(&mut self.conn, self.max_frame_len)).await
            .context("reply header without address")?;
        let address = String::from_utf8(address.to_vec())
            .context("reply address is not valid UTF-8")?;

        Ok(Some(Reply { header, address }))
    }
}


pub struct ChannelReader {
    conn: Box<dyn VirtualConn>,
    max_frame_len: usize,
    read_timeout: Option<Duration>,
}

impl ChannelReader {
    /// The next frame, or `None` when the server closed the channel
    pub async fn next_frame(&mut self) -> anyhow::Result<Option<Bytes>> {
        let deadline = deadline_after(self.read_timeout);
        with_deadline(deadline, "reading channel frame", try_read_frame(&mut self.conn, self.max_frame_len)).await
    }

    pub async fn collect_frames(mut self) -> anyhow::Result<Vec<Bytes>> {
        let mut result = Vec::new();
        while let Some(frame) = self.next_frame().await? {
            result.push(frame);
        }
        Ok(result)
    }
}


#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;
    use tokio::time::Instant;
    use crate::mem_mux::MemoryMultiplexer;
    use crate::mux::VirtualListener;
    use super::*;

    async fn setup(config: ClientConfig) -> (MemoryMultiplexer, Box<dyn VirtualListener>, Client) {
        let mpx = MemoryMultiplexer::new();
        let listener = mpx.bind("", "master").await.unwrap();
        let client = Client::new(Arc::new(mpx.clone()), config);
        (mpx, listener, client)
    }

    #[tokio::test]
    async fn test_request_and_replies() {
        let (_mpx, mut listener, client) = setup(ClientConfig::new()).await;

        let mut replies = client.request("master", b"R1").await.unwrap();
        let mut server = listener.accept().await.unwrap();
        assert_eq!(read_frame(&mut server, 1024).await.unwrap().as_ref(), b"R1");

        write_frame(&mut server, b"H1").await.unwrap();
        write_frame(&mut server, b":49153").await.unwrap();
        write_frame(&mut server, b"H2").await.unwrap();
        write_frame(&mut server, b":49154").await.unwrap();
        drop(server);

        assert_eq!(replies.next_reply().await.unwrap(), Some(Reply { header: Bytes::from("H1"), address: ":49153".to_string() }));
        assert_eq!(replies.next_reply().await.unwrap(), Some(Reply { header: Bytes::from("H2"), address: ":49154".to_string() }));
        assert_eq!(replies.next_reply().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_close_between_header_and_address() {
        let (_mpx, mut listener, client) = setup(ClientConfig::new()).await;

        let mut replies = client.request("master", b"r").await.unwrap();
        let mut server = listener.accept().await.unwrap();
        write_frame(&mut server, b"H1").await.unwrap();
        drop(server);

        let err = replies.next_reply().await.unwrap_err();
        assert!(format!("{:#}", err).contains("reply header without address"));
    }

    #[tokio::test]
    async fn test_address_must_be_utf8() {
        let (_mpx, mut listener, client) = setup(ClientConfig::new()).await;

        let mut replies = client.request("master", b"r").await.unwrap();
        let mut server = listener.accept().await.unwrap();
        write_frame(&mut server, b"H1").await.unwrap();
        write_frame(&mut server, &[0xff, 0xfe]).await.unwrap();

        assert!(replies.next_reply().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_read_timeout() {
        let mut config = ClientConfig::new();
        config.frame_read_timeout = Some(Duration::from_secs(2));
        let (_mpx, mut listener, client) = setup(config).await;

        let mut replies = client.request("master", b"r").await.unwrap();
        let _server = listener.accept().await.unwrap();

        let start = Instant::now();
        let err = replies.next_reply().await.unwrap_err();
        assert_eq!(start.elapsed(), Duration::from_secs(2));
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_dial_unknown_address() {
        let (_mpx, _listener, client) = setup(ClientConfig::new()).await;
        let err = client.request("nowhere", b"r").await.err().unwrap();
        assert!(format!("{:#}", err).contains("connecting to nowhere"));
    }

    #[tokio::test]
    async fn test_collect_channel_frames() {
        let (mpx, _listener, client) = setup(ClientConfig::new()).await;
        let mut channel_listener = mpx.bind("", ":0").await.unwrap();

        let mut reader = client.open_channel(&channel_listener.local_addr()).await.unwrap();
        let mut server = channel_listener.accept().await.unwrap();
        write_frame(&mut server, b"a").await.unwrap();
        assert_eq!(reader.next_frame().await.unwrap(), Some(Bytes::from("a")));

        write_frame(&mut server, b"b").await.unwrap();
        write_frame(&mut server, b"").await.unwrap();
        server.shutdown().await.unwrap();

        assert_eq!(reader.collect_frames().await.unwrap(), vec![Bytes::from("b"), Bytes::new()]);
    }
}
