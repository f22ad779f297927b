//! The virtual-address multiplexing transport, as far as chanserv is concerned. Address
//!  allocation and routing are entirely up to the implementation; chanserv only binds listeners,
//!  accepts on them and (for clients) dials.

use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use tokio::io::{AsyncRead, AsyncWrite};


/// The address to bind for a listener that should get a fresh, implementation-chosen address
pub const EPHEMERAL_ADDR: &str = ":0";

/// A bidirectional byte stream between two endpoints of the multiplexer. Dropping it closes the
///  connection.
pub trait VirtualConn: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl <T: AsyncRead + AsyncWrite + Send + Unpin + 'static> VirtualConn for T {}


#[cfg_attr(test, automock)]
#[async_trait]
pub trait VirtualListener: Send + 'static {
    async fn accept(&mut self) -> anyhow::Result<Box<dyn VirtualConn>>;

    /// The virtual address peers can dial to reach this listener
    fn local_addr(&self) -> String;
}


#[cfg_attr(test, automock)]
#[async_trait]
pub trait Multiplexer: Send + Sync + 'static {
    /// Binds a listener at `addr` in `scope` (an empty scope being the default scope). Dropping
    ///  the listener releases the address.
    async fn bind(&self, scope: &str, addr: &str) -> anyhow::Result<Box<dyn VirtualListener>>;

    async fn dial(&self, addr: &str) -> anyhow::Result<Box<dyn VirtualConn>>;
}
