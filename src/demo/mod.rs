//! The applications built on the dispatch loop.

/// Websocket chat relay
pub mod chat;
/// Connected device control panel
pub mod device;
/// Minimal HTTP test server
pub mod hello;
