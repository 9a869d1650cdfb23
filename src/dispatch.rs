use crate::event::Event;
use crate::response::ResponderError;
use crate::roster::Roster;
use crate::websocket::WebsocketError;

/// HandlerError is returned by `Dispatcher` implementations.  Errors returned by `Responder`
/// method should be passed up in the `ResponderError` variant, other errors are a `CustomError`
#[derive(Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HandlerError {
    /// Errors returned by `Responder` methods
    ResponderError(ResponderError),
    /// Errors returned from websocket operations
    WebsocketError(WebsocketError),
    /// Custom errors as specified by the `Dispatcher` implementation author
    CustomError(&'static str),
}

impl From<ResponderError> for HandlerError {
    fn from(value: ResponderError) -> Self {
        Self::ResponderError(value)
    }
}

impl From<WebsocketError> for HandlerError {
    fn from(value: WebsocketError) -> Self {
        Self::WebsocketError(value)
    }
}

impl From<&'static str> for HandlerError {
    fn from(value: &'static str) -> Self {
        Self::CustomError(value)
    }
}

/// Trait required to be implemented by the resource that decides what happens for each event.
///
/// A dispatcher is purely reactive: it is handed one [`Event`] at a time together with the
/// application state and the roster of open connections, queues whatever it wants sent and
/// returns.  It must not wait on the network, writes go to connection outboxes and are flushed by
/// the event source.
///
/// ```
/// use eventlite::dispatch::{Dispatcher, HandlerError};
/// use eventlite::event::Event;
/// use eventlite::roster::Roster;
///
/// struct Shout;
///
/// impl Dispatcher for Shout {
///     type State = ();
///
///     async fn dispatch(
///         &self,
///         _state: &mut (),
///         event: Event<'_>,
///         roster: &mut Roster,
///     ) -> Result<(), HandlerError> {
///         if let Event::HandshakeDone(id) = event {
///             roster.broadcast_text(Some(id), b"someone arrived");
///         }
///
///         Ok(())
///     }
/// }
/// ```
pub trait Dispatcher {
    /// Application state owned by the poll driver and lent to every dispatch.
    type State;

    /// Handle one event.  An error is logged by the caller, it never stops the loop.
    fn dispatch(
        &self,
        state: &mut Self::State,
        event: Event<'_>,
        roster: &mut Roster,
    ) -> impl Future<Output = Result<(), HandlerError>>;
}
