//! Utilities for testing chanserv based code. They are used for testing chanserv itself, but
//!  they are also exported for application testing, together with
//!  [crate::mem_mux::MemoryMultiplexer] as an in-process transport.

pub mod hooks;
