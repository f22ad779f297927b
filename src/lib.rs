//! chanserv serves requests over a virtual-address multiplexing transport: a client sends a
//!  single request over a master connection, and the server answers with any number of reply
//!  pairs, each naming a fresh single-use channel where the actual data is streamed.
//!
//! ```ascii
//! client                      master conn                   server
//!   |  ---- [request frame] ------------------------------>  |  Source::source(request)
//!   |  <--- [header 1][channel address 1] -----------------  |  emission 1
//!   |  <--- [header 2][channel address 2] -----------------  |  emission 2
//!   |  <--- (close) ---------------------------------------  |  sequence complete / idle / deadline
//!
//!   |  ---- connect to channel address 1 ----------------->  |
//!   |  <--- [frame][frame]...(close) ----------------------  |  emission 1's frames
//! ```
//!
//! All frames are length-prefixed (see [frame]), and all failures after the initial bind are
//!  reported through [hooks::ServerHooks] rather than returned.

pub mod client;
pub mod config;
pub mod deadline;
pub mod degraded;
pub mod emission;
pub mod error_mass;
pub mod frame;
pub mod hooks;
pub mod mem_mux;
pub mod mux;
pub mod server;
pub mod timer_pool;
pub mod test_util;

mod channel;
mod session;


#[cfg(test)]
mod test {
    use tracing::Level;

    #[ctor::ctor]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(Level::TRACE)
            .try_init()
            .ok();
    }
}
