//! Websocket chat relay.  Every line a client sends is prefixed with its address, echoed on the
//! local console and relayed to every other client.  Clients are told when someone joins or
//! leaves.

use crate::ascii::utf8_prefix;
use crate::dispatch::{Dispatcher, HandlerError};
use crate::event::Event;
use crate::roster::Roster;
use crate::websocket::Opcode;

/// Sent to everyone else when a client completes the handshake.
pub const JOINED: &str = "++ joined";
/// Sent to everyone else when a websocket client goes away.
pub const LEFT: &str = "-- left";
/// Longest relayed line in bytes, longer lines are cut.
pub const LINE_CAPACITY: usize = 499;

/// Dispatcher of the chat relay.  `echo` receives every relayed line.
pub struct ChatDispatcher<E> {
    echo: E,
}

fn no_echo(_: &str) {}

impl Default for ChatDispatcher<fn(&str)> {
    fn default() -> Self {
        Self { echo: no_echo }
    }
}

impl<E: Fn(&str)> ChatDispatcher<E> {
    /// A relay that hands every line to `echo` as well.
    pub fn new(echo: E) -> Self {
        Self { echo }
    }
}

/// `"<addr> <payload>"`, cut to [`LINE_CAPACITY`] bytes.
pub fn format_line(addr: &str, payload: &[u8]) -> heapless::Vec<u8, LINE_CAPACITY> {
    let mut line = heapless::Vec::new();
    for part in [addr.as_bytes(), b" ", payload] {
        let room = LINE_CAPACITY - line.len();
        let take = part.len().min(room);
        let _ = line.extend_from_slice(&part[..take]);
    }
    line
}

impl<E: Fn(&str)> Dispatcher for ChatDispatcher<E> {
    type State = ();

    async fn dispatch(
        &self,
        _state: &mut (),
        event: Event<'_>,
        roster: &mut Roster,
    ) -> Result<(), HandlerError> {
        match event {
            Event::HandshakeDone(id) => {
                roster.broadcast_text(Some(id), JOINED.as_bytes());
            }
            Event::Frame(id, Opcode::Text, payload) => {
                let line = format_line(roster.peer(id), payload);
                let text = utf8_prefix(&line);
                info!("{}", text);
                (self.echo)(text);
                roster.broadcast_text(Some(id), &line);
            }
            Event::Closed(id) => {
                if roster.get(id).is_some_and(|c| c.flags.websocket) {
                    roster.broadcast_text(Some(id), LEFT.as_bytes());
                }
            }
            _ => {}
        }

        Ok(())
    }
}

#[cfg(feature = "std")]
pub use self::host::{ChatConfig, run};

#[cfg(feature = "std")]
mod host {
    use std::string::String;

    use core::time::Duration;

    use super::ChatDispatcher;
    use crate::event::SourceError;
    use crate::platform::TokioClock;
    use crate::reactor::Reactor;
    use crate::server::TcpEventSource;

    /// Startup configuration of the chat relay.
    #[derive(Debug, Clone)]
    pub struct ChatConfig {
        /// Address to listen on
        pub listen: String,
        /// Longest a poll may wait for network activity
        pub poll_wait: Duration,
        /// Pause between loop iterations
        pub idle: Duration,
    }

    impl Default for ChatConfig {
        fn default() -> Self {
            Self {
                listen: String::from("0.0.0.0:8001"),
                poll_wait: Duration::from_millis(200),
                idle: Duration::ZERO,
            }
        }
    }

    /// Run the chat relay until its event source fails, handing every relayed line to `echo`.
    pub async fn run<E: Fn(&str)>(config: ChatConfig, echo: E) -> SourceError {
        let source = match TcpEventSource::bind(&config.listen).await {
            Ok(source) => source,
            Err(e) => {
                error!("Cannot bind to {}", config.listen);
                return e;
            }
        };
        info!("Started on {}", config.listen);

        let mut reactor = Reactor::new(source, ChatDispatcher::new(echo), (), TokioClock::default())
            .with_wait(config.poll_wait)
            .with_idle(config.idle);

        reactor.run().await
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use std::cell::RefCell;
    use std::string::String;
    use std::vec::Vec;

    use super::*;
    use crate::event::ConnId;

    fn frames(roster: &Roster, id: ConnId) -> Vec<u8> {
        roster.get(id).unwrap().outbox.as_slice().to_vec()
    }

    fn text_frame(text: &str) -> Vec<u8> {
        let mut frame = std::vec![0x81, text.len() as u8];
        frame.extend_from_slice(text.as_bytes());
        frame
    }

    #[test]
    fn test_format_line_is_bounded() {
        assert_eq!(&format_line("1.2.3.4:5", b"hi")[..], b"1.2.3.4:5 hi");

        let long = [b'x'; 600];
        let line = format_line("1.2.3.4:5", &long);
        assert_eq!(line.len(), LINE_CAPACITY);
        assert!(line.starts_with(b"1.2.3.4:5 xxx"));
    }

    #[tokio::test]
    async fn test_chat_lifecycle() {
        let echoed = RefCell::new(Vec::<String>::new());
        let chat = ChatDispatcher::new(|line: &str| echoed.borrow_mut().push(String::from(line)));

        let mut roster = Roster::default();
        let listener = roster.open_listener("0.0.0.0:8001", 0);
        let a = roster.open("10.0.0.1:1000", 0);
        let b = roster.open("10.0.0.2:2000", 0);
        let http = roster.open("10.0.0.3:3000", 0);
        for id in [a, b] {
            roster.get_mut(id).unwrap().flags.websocket = true;
        }

        chat.dispatch(&mut (), Event::HandshakeDone(b), &mut roster)
            .await
            .unwrap();
        assert_eq!(frames(&roster, a), text_frame(JOINED));
        assert!(frames(&roster, b).is_empty());
        roster.get_mut(a).unwrap().outbox.consume(usize::MAX);

        chat.dispatch(&mut (), Event::Frame(a, Opcode::Text, b"hello"), &mut roster)
            .await
            .unwrap();
        assert!(frames(&roster, a).is_empty());
        assert_eq!(frames(&roster, b), text_frame("10.0.0.1:1000 hello"));
        assert_eq!(echoed.borrow().as_slice(), ["10.0.0.1:1000 hello"]);
        roster.get_mut(b).unwrap().outbox.consume(usize::MAX);

        // plain http peers leaving are not announced
        chat.dispatch(&mut (), Event::Closed(http), &mut roster)
            .await
            .unwrap();
        assert!(frames(&roster, b).is_empty());

        chat.dispatch(&mut (), Event::Closed(a), &mut roster)
            .await
            .unwrap();
        assert_eq!(frames(&roster, b), text_frame(LEFT));
        assert!(frames(&roster, listener).is_empty());
        assert!(frames(&roster, http).is_empty());
    }

    #[cfg(feature = "std")]
    mod end_to_end {
        use core::time::Duration;

        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpStream;

        use super::super::*;
        use crate::platform::TokioClock;
        use crate::reactor::Reactor;
        use crate::server::TcpEventSource;
        use crate::websocket::FrameHeader;

        struct WsClient {
            stream: TcpStream,
            buf: std::vec::Vec<u8>,
        }

        impl WsClient {
            async fn connect(addr: std::net::SocketAddr) -> Self {
                let mut stream = TcpStream::connect(addr).await.unwrap();
                stream
                    .write_all(
                        b"GET /ws HTTP/1.1\r\nHost: test\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n",
                    )
                    .await
                    .unwrap();

                let mut buf = std::vec::Vec::new();
                let mut chunk = [0u8; 512];
                let head_end = loop {
                    let n = stream.read(&mut chunk).await.unwrap();
                    assert!(n > 0, "closed during handshake");
                    buf.extend_from_slice(&chunk[..n]);
                    if let Some(p) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                        break p + 4;
                    }
                };
                assert!(buf.starts_with(b"HTTP/1.1 101 Switching Protocols\r\n"));
                buf.drain(..head_end);

                Self { stream, buf }
            }

            async fn send(&mut self, text: &str) {
                let header = FrameHeader::masked(Opcode::Text, text.len(), [7, 1, 2, 9]);
                let mut wire = [0u8; 14];
                let n = header.encode(&mut wire).unwrap();
                let mut payload = text.as_bytes().to_vec();
                header.apply_mask(&mut payload);
                self.stream.write_all(&wire[..n]).await.unwrap();
                self.stream.write_all(&payload).await.unwrap();
            }

            async fn recv(&mut self) -> std::string::String {
                let mut chunk = [0u8; 512];
                loop {
                    if let Ok(header) = FrameHeader::decode(&self.buf) {
                        let end = header.header_len + header.len;
                        if self.buf.len() >= end {
                            assert_eq!(header.opcode, Opcode::Text);
                            let text = std::string::String::from_utf8(
                                self.buf[header.header_len..end].to_vec(),
                            )
                            .unwrap();
                            self.buf.drain(..end);
                            return text;
                        }
                    }
                    let n = self.stream.read(&mut chunk).await.unwrap();
                    assert!(n > 0, "closed while waiting for a frame");
                    self.buf.extend_from_slice(&chunk[..n]);
                }
            }
        }

        #[tokio::test]
        async fn test_chat_over_sockets() {
            let source = TcpEventSource::bind("127.0.0.1:0").await.unwrap();
            let addr = source.local_addr();
            let mut reactor =
                Reactor::new(source, ChatDispatcher::default(), (), TokioClock::default())
                    .with_wait(Duration::from_millis(20));

            let script = async {
                let mut b = WsClient::connect(addr).await;
                let mut a = WsClient::connect(addr).await;
                let a_addr = a.stream.local_addr().unwrap();

                assert_eq!(b.recv().await, JOINED);

                a.send("hello").await;
                assert_eq!(b.recv().await, std::format!("{} hello", a_addr));

                drop(a);
                assert_eq!(b.recv().await, LEFT);
            };

            tokio::time::timeout(Duration::from_secs(10), async {
                tokio::select! {
                    e = reactor.run() => panic!("source failed: {:?}", e),
                    _ = script => {}
                }
            })
            .await
            .unwrap();
        }
    }
}
