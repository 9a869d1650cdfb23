//! # Eventlite
//!
//! `eventlite` hosts a single threaded, event driven HTTP and WebSocket dispatch loop aimed at
//! small embedded style hosts, along with the demo applications built on it.
//!
//! This crate provides:
//!
//! * encoding and decoding of HTTP requests, responses and websocket frames on the "wire".
//! * an [`event::EventSource`] that turns connections into a stream of discrete [`event::Event`]s.
//! * a [`dispatch::Dispatcher`] trait, the one place application logic lives.
//! * a [`reactor::Reactor`] that polls the source with a bounded wait and runs periodic tasks
//!   against an injectable monotonic clock.
//! * the "connected device" control panel and websocket chat demos plus an operator console.
//!
//! ## Basic Use
//!
//! Implement [`dispatch::Dispatcher`] for a type, choosing the application state it owns. Each
//! delivered event comes with the [`roster::Roster`] of open connections which is used to write
//! responses, send frames or broadcast.  Hand the dispatcher, its state and an event source to a
//! [`reactor::Reactor`] and call `run()`.
//!
//! ## Example
//!
//! ```
//! use eventlite::dispatch::{Dispatcher, HandlerError};
//! use eventlite::event::Event;
//! use eventlite::response::{Responder, StatusCode};
//! use eventlite::roster::Roster;
//!
//! struct Counter;
//!
//! impl Dispatcher for Counter {
//!     type State = u32;
//!
//!     async fn dispatch(
//!         &self,
//!         hits: &mut u32,
//!         event: Event<'_>,
//!         roster: &mut Roster,
//!     ) -> Result<(), HandlerError> {
//!         if let Event::Request(id, _req) = event {
//!             *hits += 1;
//!             let Some(out) = roster.writer(id) else {
//!                 return Ok(());
//!             };
//!             Responder::new(out)
//!                 .with_status(StatusCode::OK)
//!                 .await?
//!                 .with_body(b"counted")
//!                 .await?;
//!         }
//!
//!         Ok(())
//!     }
//! }
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]
#![allow(async_fn_in_trait)]

extern crate alloc;

// must be first so the logging macros are visible to the modules below
#[macro_use]
mod fmt;

mod ascii;
/// Demo applications
pub mod demo;
/// Dispatcher trait and handler errors
pub mod dispatch;
/// Events and event sources
pub mod event;
/// Static document serving
pub mod files;
/// HTTP Headers
pub mod header;
/// Clock, metrics and locking hooks
pub mod platform;
/// Poll driver
pub mod reactor;
/// HTTP Requests
pub mod request;
/// HTTP responses
pub mod response;
/// Connections and their outbound buffers
pub mod roster;
/// Server side includes
pub mod ssi;
/// Websockets
pub mod websocket;

/// One-shot HTTP client
#[cfg(feature = "std")]
pub mod client;
/// Operator console
#[cfg(feature = "std")]
pub mod console;
/// TCP event source
#[cfg(feature = "std")]
pub mod server;

use embedded_io_async::Write;

pub(crate) enum WriteError {
    NetworkError,
}

pub(crate) trait HttpWrite {
    async fn write<T: Write>(self, writer: &mut T) -> Result<(), WriteError>;
}

/// Write `parts` in order, stopping at the first one the writer refuses.
pub(crate) async fn write_parts<T: Write>(writer: &mut T, parts: &[&[u8]]) -> Result<(), WriteError> {
    for part in parts {
        writer
            .write_all(part)
            .await
            .map_err(|_| WriteError::NetworkError)?;
    }

    Ok(())
}
