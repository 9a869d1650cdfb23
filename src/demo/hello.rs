//! The smallest useful server: logs what happens and greets every request, closing the
//! connection after each reply.

use alloc::format;

use crate::dispatch::{Dispatcher, HandlerError};
use crate::event::Event;
use crate::header::ResponseHeader;
use crate::response::{Responder, StatusCode};
use crate::roster::Roster;

/// Dispatcher of the HTTP test server.
#[derive(Debug, Default, Clone, Copy)]
pub struct HelloDispatcher;

impl Dispatcher for HelloDispatcher {
    type State = ();

    async fn dispatch(
        &self,
        _state: &mut (),
        event: Event<'_>,
        roster: &mut Roster,
    ) -> Result<(), HandlerError> {
        match event {
            Event::Accepted(id) => info!("{}: Connection from {}", id, roster.peer(id)),
            Event::Request(id, req) => {
                info!("{}: {} {}", id, req.method.as_str(), req.path);

                let query = req.query.map(|q| format!("?{}", q)).unwrap_or_default();
                let body = format!(
                    "<h1>Hello, {}!</h1>\r\nYou asked for {}{}\r\n",
                    roster.peer(id),
                    req.path,
                    query
                );

                let out = roster.writer(id).ok_or("connection gone")?;
                Responder::new(out)
                    .with_status(StatusCode::OK)
                    .await?
                    .with_header(ResponseHeader::ContentType("text/html"))
                    .await?
                    .with_header(ResponseHeader::Connection("close"))
                    .await?
                    .with_body(body.as_bytes())
                    .await?;

                roster.close(id);
            }
            Event::Frame(id, _, payload) => debug!("{}: recv {} bytes", id, payload.len()),
            Event::Closed(id) => info!("{}: Connection closed", id),
            _ => {}
        }

        Ok(())
    }
}

#[cfg(feature = "std")]
pub use self::host::HelloConfig;

#[cfg(feature = "std")]
mod host {
    use core::time::Duration;

    /// Startup configuration of the HTTP test server.
    #[derive(Debug, Clone, Copy)]
    pub struct HelloConfig {
        /// Port to listen on, all interfaces
        pub port: u16,
        /// Longest a poll may wait for network activity
        pub poll_wait: Duration,
        /// Pause between loop iterations
        pub idle: Duration,
    }

    impl Default for HelloConfig {
        fn default() -> Self {
            Self {
                port: 80,
                poll_wait: Duration::ZERO,
                idle: Duration::from_millis(10),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use std::string::String;

    use super::*;
    use crate::request::Request;

    #[tokio::test]
    async fn test_hello_greets_and_closes() {
        let mut roster = Roster::default();
        let id = roster.open("192.168.1.7:5123", 0);
        let req = Request::parse(b"GET /status?x=1 HTTP/1.1\r\nHost: dev\r\n\r\n").unwrap();

        HelloDispatcher
            .dispatch(&mut (), Event::Request(id, &req), &mut roster)
            .await
            .unwrap();

        let conn = roster.get(id).unwrap();
        assert!(conn.flags.closing);

        let reply = String::from_utf8(conn.outbox.as_slice().to_vec()).unwrap();
        let expected = "HTTP/1.1 200 OK\r
Content-Type: text/html\r
Connection: close\r
Content-Length: 62\r
\r
<h1>Hello, 192.168.1.7:5123!</h1>\r
You asked for /status?x=1\r
";
        assert_eq!(reply, expected, "oops, got:\n{}", reply);
    }
}
