use core::fmt;
use core::time::Duration;

use crate::dispatch::Dispatcher;
use crate::request::Request;
use crate::roster::Roster;
use crate::websocket::Opcode;

/// Handle of a connection within one event source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnId(pub u32);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Something that happened on a connection, or a periodic task falling due.  Payloads borrow
/// from the event source and are only valid for the duration of one dispatch.
#[derive(Debug)]
pub enum Event<'a> {
    /// A peer connected
    Accepted(ConnId),
    /// A complete HTTP request arrived that is not a websocket upgrade
    Request(ConnId, &'a Request<'a>),
    /// The websocket handshake completed, the connection now carries frames
    HandshakeDone(ConnId),
    /// A text or binary websocket frame arrived, payload already unmasked
    Frame(ConnId, Opcode, &'a [u8]),
    /// The connection is about to be forgotten.  It is still in the roster while this is
    /// dispatched.
    Closed(ConnId),
    /// A periodic task registered with the reactor fell due
    Timer(&'static str),
}

impl Event<'_> {
    /// The connection the event concerns, `None` for timers.
    pub fn conn(&self) -> Option<ConnId> {
        match self {
            Self::Accepted(id)
            | Self::Request(id, _)
            | Self::HandshakeDone(id)
            | Self::Frame(id, _, _)
            | Self::Closed(id) => Some(*id),
            Self::Timer(_) => None,
        }
    }
}

/// Fatal errors of an event source.  Per connection problems never surface here.
#[derive(Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SourceError {
    /// The listening endpoint could not be bound
    Bind,
    /// The document root to serve from is missing
    DocumentRoot,
    /// The listener failed
    Io,
}

/// Owns the listening endpoint and connections and turns network activity into [`Event`]s.
///
/// Events for one connection are delivered in arrival order, `Closed` is always the last event
/// for a connection and a [`ConnId`] is never handed out twice.
pub trait EventSource {
    /// Wait at most `wait` for activity, dispatching every resulting event before returning.
    /// Returns the number of events dispatched.
    fn poll<D: Dispatcher>(
        &mut self,
        dispatcher: &D,
        state: &mut D::State,
        wait: Duration,
    ) -> impl Future<Output = Result<usize, SourceError>>;

    /// The open connections, for out of band work such as periodic pushes.
    fn roster(&mut self) -> &mut Roster;
}
