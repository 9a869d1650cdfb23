//! TCP event source for `std` hosts.  All connections are multiplexed on the task that polls
//! the source: readiness is awaited for the listener and every socket at once, then data moves
//! with non blocking reads and writes.

use std::io;
use std::net::SocketAddr;
use std::task::Poll;

use core::future::poll_fn;
use core::time::Duration;

use tokio::net::{TcpListener, TcpStream};

use crate::dispatch::Dispatcher;
use crate::event::{ConnId, Event, EventSource, SourceError};
use crate::header::RequestHeader;
use crate::platform::{Clock, TokioClock};
use crate::request::{Request, RequestError};
use crate::response::{Responder, StatusCode};
use crate::roster::{Connection, Roster};
use crate::websocket::{FrameHeader, Opcode, WebsocketError};

/// Largest request head plus body, or websocket frame, a connection may buffer.
pub const MAX_INPUT: usize = 16 * 1024;

const READ_CHUNK: usize = 2048;

const CLOSE_PROTOCOL_ERROR: u16 = 1002;
const CLOSE_TOO_BIG: u16 = 1009;

struct Socket {
    id: ConnId,
    stream: TcpStream,
    inbuf: Vec<u8>,
    eof: bool,
}

/// Accepts TCP connections and delivers the HTTP requests and websocket frames arriving on them
/// as [`Event`]s.
///
/// Websocket upgrades are answered here, the dispatcher only sees `HandshakeDone`.  Pings are
/// answered with pongs, a close frame is echoed before the connection is closed and malformed
/// requests get `400 Bad Request`.
pub struct TcpEventSource {
    listener: TcpListener,
    local_addr: SocketAddr,
    sockets: Vec<Socket>,
    accepted: Vec<(TcpStream, SocketAddr)>,
    roster: Roster,
    clock: TokioClock,
}

impl TcpEventSource {
    /// Listen on `addr`, e.g. `0.0.0.0:8000`.
    pub async fn bind(addr: &str) -> Result<Self, SourceError> {
        match TcpListener::bind(addr).await {
            Ok(listener) => Self::new(listener),
            Err(e) => {
                warn!("bind {} failed: {}", addr, e);
                Err(SourceError::Bind)
            }
        }
    }

    /// Take over an already bound listener.
    pub fn from_std(listener: std::net::TcpListener) -> Result<Self, SourceError> {
        listener
            .set_nonblocking(true)
            .and_then(|_| TcpListener::from_std(listener))
            .map_err(|_| SourceError::Io)
            .and_then(Self::new)
    }

    fn new(listener: TcpListener) -> Result<Self, SourceError> {
        let local_addr = listener.local_addr().map_err(|_| SourceError::Io)?;
        let clock = TokioClock::default();
        let mut roster = Roster::default();
        roster.open_listener(&local_addr.to_string(), clock.now_ms());

        Ok(Self {
            listener,
            local_addr,
            sockets: Vec::new(),
            accepted: Vec::new(),
            roster,
            clock,
        })
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait until the listener or any socket needs attention, or `wait` elapses.
    async fn ready(&mut self, wait: Duration) {
        let listener = &self.listener;
        let sockets = &self.sockets;
        let roster = &self.roster;
        let accepted = &mut self.accepted;

        let readiness = poll_fn(|cx| {
            let mut ready = false;

            loop {
                match listener.poll_accept(cx) {
                    Poll::Ready(Ok(peer)) => {
                        accepted.push(peer);
                        ready = true;
                    }
                    Poll::Ready(Err(e)) => {
                        warn!("accept failed: {}", e);
                        ready = true;
                        break;
                    }
                    Poll::Pending => break,
                }
            }

            for sock in sockets {
                if sock.stream.poll_read_ready(cx).is_ready() {
                    ready = true;
                }
                let pending_output = roster.get(sock.id).is_some_and(|c| !c.outbox.is_empty());
                if pending_output && sock.stream.poll_write_ready(cx).is_ready() {
                    ready = true;
                }
            }

            if ready { Poll::Ready(()) } else { Poll::Pending }
        });

        let _ = tokio::time::timeout(wait, readiness).await;
    }
}

impl EventSource for TcpEventSource {
    async fn poll<D: Dispatcher>(
        &mut self,
        dispatcher: &D,
        state: &mut D::State,
        wait: Duration,
    ) -> Result<usize, SourceError> {
        self.ready(wait).await;

        let mut events = 0;

        for (stream, addr) in self.accepted.drain(..) {
            let id = self.roster.open(&addr.to_string(), self.clock.now_ms());
            debug!("{} accepted from {}", id, addr);
            self.sockets.push(Socket {
                id,
                stream,
                inbuf: Vec::new(),
                eof: false,
            });
            deliver(dispatcher, state, Event::Accepted(id), &mut self.roster).await;
            events += 1;
        }

        for sock in self.sockets.iter_mut() {
            receive(sock);
            events += process_input(sock, dispatcher, state, &mut self.roster).await;
        }

        let mut gone = Vec::new();
        for sock in self.sockets.iter() {
            let Some(conn) = self.roster.get_mut(sock.id) else {
                gone.push(sock.id);
                continue;
            };
            if let Err(e) = flush(sock, conn) {
                debug!("{} write failed: {}", sock.id, e);
                gone.push(sock.id);
                continue;
            }
            if sock.eof || (conn.flags.closing && conn.outbox.is_empty()) {
                gone.push(sock.id);
            }
        }

        for id in gone {
            deliver(dispatcher, state, Event::Closed(id), &mut self.roster).await;
            events += 1;
            self.roster.remove(id);
            self.sockets.retain(|s| s.id != id);
            debug!("{} closed", id);
        }

        Ok(events)
    }

    fn roster(&mut self) -> &mut Roster {
        &mut self.roster
    }
}

/// Hand one event to the dispatcher.  Returns false if the handler failed.
async fn deliver<D: Dispatcher>(
    dispatcher: &D,
    state: &mut D::State,
    event: Event<'_>,
    roster: &mut Roster,
) -> bool {
    let id = event.conn();
    match dispatcher.dispatch(state, event, roster).await {
        Ok(()) => true,
        Err(e) => {
            warn!("handler failed for {:?}: {:?}", id, e);
            false
        }
    }
}

/// Read whatever the socket has without blocking.
fn receive(sock: &mut Socket) {
    if sock.eof {
        return;
    }

    let mut chunk = [0u8; READ_CHUNK];
    loop {
        match sock.stream.try_read(&mut chunk) {
            Ok(0) => {
                sock.eof = true;
                return;
            }
            Ok(n) => sock.inbuf.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("{} read failed: {}", sock.id, e);
                sock.eof = true;
                return;
            }
        }
    }
}

/// Hand as much of the outbox to the socket as it takes.
fn flush(sock: &Socket, conn: &mut Connection) -> io::Result<()> {
    while !conn.outbox.is_empty() {
        match sock.stream.try_write(conn.outbox.as_slice()) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => conn.outbox.consume(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(())
}

/// Turn buffered input into events until only an incomplete message is left.
async fn process_input<D: Dispatcher>(
    sock: &mut Socket,
    dispatcher: &D,
    state: &mut D::State,
    roster: &mut Roster,
) -> usize {
    let id = sock.id;
    let mut consumed = 0;
    let mut events = 0;

    while consumed < sock.inbuf.len() {
        let Some(flags) = roster.get(id).map(|c| c.flags) else {
            break;
        };

        // input after a close is ignored
        if flags.closing {
            consumed = sock.inbuf.len();
            break;
        }

        if flags.websocket {
            let header = match FrameHeader::decode(&sock.inbuf[consumed..]) {
                Ok(header) => header,
                Err(WebsocketError::InsufficientData(_)) => break,
                Err(e) => {
                    debug!("{} bad frame: {:?}", id, e);
                    fail_websocket(roster, id, CLOSE_PROTOCOL_ERROR);
                    continue;
                }
            };

            if !header.is_masked() {
                debug!("{} unmasked frame", id);
                fail_websocket(roster, id, CLOSE_PROTOCOL_ERROR);
                continue;
            }

            if header.len > MAX_INPUT - header.header_len {
                debug!("{} frame of {} bytes too large", id, header.len);
                fail_websocket(roster, id, CLOSE_TOO_BIG);
                continue;
            }

            let start = consumed + header.header_len;
            let end = start + header.len;
            if end > sock.inbuf.len() {
                break;
            }

            header.apply_mask(&mut sock.inbuf[start..end]);
            consumed = end;
            let payload = &sock.inbuf[start..end];

            match header.opcode {
                Opcode::Text | Opcode::Binary => {
                    deliver(dispatcher, state, Event::Frame(id, header.opcode, payload), roster)
                        .await;
                    events += 1;
                }
                Opcode::Ping => {
                    let _ = roster.send_frame(id, Opcode::Pong, payload);
                }
                Opcode::Close => {
                    let _ = roster.send_frame(id, Opcode::Close, payload);
                    roster.close(id);
                }
                Opcode::Pong | Opcode::Continuation => {}
            }
            continue;
        }

        let req = match Request::parse(&sock.inbuf[consumed..]) {
            Ok(req) => req,
            Err(RequestError::Incomplete(_)) if sock.inbuf.len() - consumed <= MAX_INPUT => break,
            Err(e) => {
                debug!("{} bad request: {:?}", id, e);
                bad_request(roster, id).await;
                continue;
            }
        };
        let used = req.consumed();

        if req.is_websocket_upgrade() {
            if upgrade(&req, id, roster).await {
                deliver(dispatcher, state, Event::HandshakeDone(id), roster).await;
                events += 1;
            }
        } else {
            let close_after = matches!(
                req.get_header(RequestHeader::Connection("")),
                Some(RequestHeader::Connection(v)) if v.eq_ignore_ascii_case("close")
            );
            let handled = deliver(dispatcher, state, Event::Request(id, &req), roster).await;
            events += 1;
            // a failed handler may have left a partial response behind
            if close_after || !handled {
                roster.close(id);
            }
        }

        consumed += used;
    }

    sock.inbuf.drain(..consumed);
    events
}

/// Send a close frame carrying `status` and close the connection.
fn fail_websocket(roster: &mut Roster, id: ConnId, status: u16) {
    let _ = roster.send_frame(id, Opcode::Close, &status.to_be_bytes());
    roster.close(id);
}

async fn bad_request(roster: &mut Roster, id: ConnId) {
    if let Some(out) = roster.writer(id) {
        if let Ok(sending) = Responder::new(out).with_status(StatusCode::BadRequest).await {
            let _ = sending.with_body(&[]).await;
        }
    }
    roster.close(id);
}

/// Answer a websocket upgrade request.  Returns true once the connection carries frames.
async fn upgrade(req: &Request<'_>, id: ConnId, roster: &mut Roster) -> bool {
    let Some(RequestHeader::SecWebSocketKey(key)) =
        req.get_header(RequestHeader::SecWebSocketKey(""))
    else {
        debug!("{} upgrade without key", id);
        bad_request(roster, id).await;
        return false;
    };

    let Some(conn) = roster.get_mut(id) else {
        return false;
    };

    let accepted = Responder::new(&mut conn.outbox).upgrade(key).await;
    match accepted {
        Ok(()) => {
            conn.flags.websocket = true;
            true
        }
        Err(e) => {
            debug!("{} upgrade failed: {:?}", id, e);
            conn.flags.closing = true;
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use core::future::Future;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::demo::device::{DeviceDispatcher, Settings};
    use crate::demo::hello::HelloDispatcher;
    use crate::dispatch::HandlerError;
    use crate::files::MemoryRoot;
    use crate::platform::FixedInfo;
    use crate::reactor::Reactor;

    /// Answers every request with its path and keeps the connection open.  `/fail` sends the
    /// status line and then fails.
    struct PathEcho;

    impl Dispatcher for PathEcho {
        type State = ();

        async fn dispatch(
            &self,
            _state: &mut (),
            event: Event<'_>,
            roster: &mut Roster,
        ) -> Result<(), HandlerError> {
            if let Event::Request(id, req) = event {
                let out = roster.writer(id).ok_or("connection gone")?;
                let sending = Responder::new(out).with_status(StatusCode::OK).await?;
                if req.path == "/fail" {
                    return Err(HandlerError::CustomError("refused"));
                }
                sending.with_body(req.path.as_bytes()).await?;
            }

            Ok(())
        }
    }

    /// Run a source for `dispatcher` until `client` is done with it.
    async fn against<D, F, C>(dispatcher: D, state: D::State, client: C) -> F::Output
    where
        D: Dispatcher,
        F: Future,
        C: FnOnce(SocketAddr) -> F,
    {
        let source = TcpEventSource::bind("127.0.0.1:0").await.unwrap();
        let addr = source.local_addr();
        let mut reactor = Reactor::new(source, dispatcher, state, TokioClock::default())
            .with_wait(Duration::from_millis(20));

        let client = client(addr);
        tokio::time::timeout(Duration::from_secs(10), async {
            tokio::select! {
                e = reactor.run() => panic!("source failed: {:?}", e),
                r = client => r,
            }
        })
        .await
        .unwrap()
    }

    async fn websocket_client(addr: SocketAddr) -> TcpStream {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /ws HTTP/1.1\r\nHost: test\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n")
            .await
            .unwrap();

        // read the handshake reply byte by byte so no frame data is swallowed
        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            stream.read_exact(&mut byte).await.unwrap();
            head.push(byte[0]);
        }
        assert!(head.starts_with(b"HTTP/1.1 101 Switching Protocols\r\n"));

        stream
    }

    fn masked(opcode: Opcode, payload: &[u8]) -> Vec<u8> {
        let mask = [0x11, 0x22, 0x33, 0x44];
        let header = FrameHeader::masked(opcode, payload.len(), mask);
        let mut wire = [0u8; 14];
        let n = header.encode(&mut wire).unwrap();
        let mut frame = wire[..n].to_vec();
        let mut body = payload.to_vec();
        header.apply_mask(&mut body);
        frame.extend_from_slice(&body);
        frame
    }

    async fn hello_reactor() -> (Reactor<TcpEventSource, HelloDispatcher, TokioClock>, SocketAddr) {
        let source = TcpEventSource::bind("127.0.0.1:0").await.unwrap();
        let addr = source.local_addr();
        let reactor = Reactor::new(source, HelloDispatcher, (), TokioClock::default())
            .with_wait(Duration::from_millis(50));
        (reactor, addr)
    }

    async fn read_to_end(stream: &mut TcpStream) -> String {
        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await.unwrap();
        String::from_utf8(reply).unwrap()
    }

    #[tokio::test]
    async fn test_bind_failure() {
        let taken = TcpEventSource::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().to_string();
        assert!(matches!(TcpEventSource::bind(&addr).await, Err(SourceError::Bind)));
    }

    #[tokio::test]
    async fn test_request_reply_and_close() {
        let (mut reactor, addr) = hello_reactor().await;

        let client = async {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let local = stream.local_addr().unwrap();
            stream
                .write_all(b"GET /x HTTP/1.1\r\nHost: test\r\n\r\n")
                .await
                .unwrap();
            (read_to_end(&mut stream).await, local)
        };

        let (reply, local) = tokio::select! {
            e = reactor.run() => panic!("source failed: {:?}", e),
            r = client => r,
        };

        assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"), "oops, got:\n{}", reply);
        assert!(reply.ends_with(&std::format!(
            "<h1>Hello, {}!</h1>\r\nYou asked for /x\r\n",
            local
        )));

        // the roster forgets the connection once it is closed
        reactor.turn().await.unwrap();
        assert_eq!(reactor.source().roster().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_request_gets_400() {
        let (mut reactor, addr) = hello_reactor().await;

        let client = async {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(b"BREW /pot HTTP/1.1\r\n\r\n").await.unwrap();
            read_to_end(&mut stream).await
        };

        let reply = tokio::select! {
            e = reactor.run() => panic!("source failed: {:?}", e),
            r = client => r,
        };

        assert_eq!(reply, "HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n");
    }

    #[tokio::test]
    async fn test_ping_gets_pong_and_close_is_echoed() {
        let replies = against(PathEcho, (), |addr| async move {
            let mut stream = websocket_client(addr).await;

            stream.write_all(&masked(Opcode::Ping, b"hb")).await.unwrap();
            let mut pong = [0u8; 4];
            stream.read_exact(&mut pong).await.unwrap();

            stream
                .write_all(&masked(Opcode::Close, &1000u16.to_be_bytes()))
                .await
                .unwrap();
            let mut rest = Vec::new();
            stream.read_to_end(&mut rest).await.unwrap();
            (pong, rest)
        })
        .await;

        assert_eq!(replies.0, [0x8A, 2, b'h', b'b']);
        assert_eq!(replies.1, [0x88, 2, 0x03, 0xE8]);
    }

    #[tokio::test]
    async fn test_huge_frame_length_closes_connection() {
        let (closing, reply) = against(HelloDispatcher, (), |addr| async move {
            let mut stream = websocket_client(addr).await;
            let mut frame = std::vec![0x81, 0xFF];
            frame.extend_from_slice(&[0xFF; 8]);
            frame.extend_from_slice(&[1, 2, 3, 4, b'x']);
            stream.write_all(&frame).await.unwrap();
            let mut closing = Vec::new();
            stream.read_to_end(&mut closing).await.unwrap();

            // the source keeps serving others
            let mut other = TcpStream::connect(addr).await.unwrap();
            other.write_all(b"GET /after HTTP/1.1\r\n\r\n").await.unwrap();
            (closing, read_to_end(&mut other).await)
        })
        .await;

        assert_eq!(closing, [0x88, 2, 0x03, 0xF1]);
        assert!(reply.ends_with("You asked for /after\r\n"), "oops, got:\n{}", reply);
    }

    #[tokio::test]
    async fn test_frame_over_input_limit_closes_connection() {
        let closing = against(PathEcho, (), |addr| async move {
            let mut stream = websocket_client(addr).await;
            let header = FrameHeader::masked(Opcode::Binary, MAX_INPUT, [1, 2, 3, 4]);
            let mut wire = [0u8; 14];
            let n = header.encode(&mut wire).unwrap();
            stream.write_all(&wire[..n]).await.unwrap();
            let mut closing = Vec::new();
            stream.read_to_end(&mut closing).await.unwrap();
            closing
        })
        .await;

        assert_eq!(closing, [0x88, 2, 0x03, 0xF1]);
    }

    #[tokio::test]
    async fn test_unmasked_frame_closes_connection() {
        let closing = against(PathEcho, (), |addr| async move {
            let mut stream = websocket_client(addr).await;
            stream.write_all(&[0x81, 1, b'x']).await.unwrap();
            let mut closing = Vec::new();
            stream.read_to_end(&mut closing).await.unwrap();
            closing
        })
        .await;

        assert_eq!(closing, [0x88, 2, 0x03, 0xEA]);
    }

    #[tokio::test]
    async fn test_pipelined_requests_then_connection_close() {
        let reply = against(PathEcho, (), |addr| async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream
                .write_all(b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\nConnection: close\r\n\r\nGET /c HTTP/1.1\r\n\r\n")
                .await
                .unwrap();
            read_to_end(&mut stream).await
        })
        .await;

        assert_eq!(
            reply,
            "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\n/aHTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\n/b"
        );
    }

    #[tokio::test]
    async fn test_failed_handler_closes_connection() {
        let reply = against(PathEcho, (), |addr| async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(b"GET /fail HTTP/1.1\r\n\r\n").await.unwrap();
            read_to_end(&mut stream).await
        })
        .await;

        assert_eq!(reply, "HTTP/1.1 200 OK\r\n");
    }

    #[tokio::test]
    async fn test_document_larger_than_outbox_is_sent_whole() {
        let big = std::vec![b'z'; 20000];
        let root = MemoryRoot::new().with_file("big.js", &big);
        let device = DeviceDispatcher::new(root, FixedInfo::default());

        let reply = against(device, Settings::default(), |addr| async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream
                .write_all(b"GET /big.js HTTP/1.1\r\nConnection: close\r\n\r\n")
                .await
                .unwrap();
            let mut reply = Vec::new();
            stream.read_to_end(&mut reply).await.unwrap();
            reply
        })
        .await;

        let head = b"HTTP/1.1 200 OK\r\nContent-Type: application/javascript\r\nContent-Length: 20000\r\n\r\n";
        assert_eq!(&reply[..head.len()], head);
        assert_eq!(&reply[head.len()..], &big[..]);
    }

    #[tokio::test]
    async fn test_zero_wait_poll_returns_immediately() {
        let mut source = TcpEventSource::bind("127.0.0.1:0").await.unwrap();
        let events = tokio::time::timeout(
            Duration::from_secs(1),
            source.poll(&HelloDispatcher, &mut (), Duration::ZERO),
        )
        .await
        .unwrap();
        assert_eq!(events, Ok(0));
    }
}
