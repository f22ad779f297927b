use bytes::Bytes;
use tokio::sync::mpsc;


/// One item produced by a [Source]: a header that is relayed to the client as-is so it can
///  correlate the channel with its request, and the frames to stream over that channel.
///
/// `out` is consumed by exactly one channel; the sender side closing it ends the channel's
///  stream.
pub struct Emission {
    pub header: Bytes,
    pub out: mpsc::Receiver<Bytes>,
}

impl Emission {
    pub fn new(header: impl Into<Bytes>, out: mpsc::Receiver<Bytes>) -> Emission {
        Emission {
            header: header.into(),
            out,
        }
    }

    /// Convenience for emissions whose frames are all known up front. The frames are buffered,
    ///  so the sequence is already closed when this returns.
    pub fn from_frames(header: impl Into<Bytes>, frames: Vec<Bytes>) -> Emission {
        let (sender, out) = mpsc::channel(frames.len().max(1));
        for frame in frames {
            // capacity covers all frames, and the receiver is still around
            let _ = sender.try_send(frame);
        }
        Emission::new(header, out)
    }
}


/// The application side of a chanserv server: turns a request into a (lazily produced, possibly
///  unbounded) sequence of emissions. The sequence ends when the sender side is dropped.
///
/// Implemented for closures, so `|request| { ... receiver }` can be passed wherever a [Source]
///  is expected.
pub trait Source: Send + Sync + 'static {
    fn source(&self, request: Bytes) -> mpsc::Receiver<Emission>;
}

impl <F> Source for F
where F: Fn(Bytes) -> mpsc::Receiver<Emission> + Send + Sync + 'static
{
    fn source(&self, request: Bytes) -> mpsc::Receiver<Emission> {
        self(request)
    }
}
