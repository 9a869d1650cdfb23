use alloc::collections::VecDeque;
use alloc::vec::Vec;

use embedded_io_async::{ErrorKind, ErrorType, Write};

use crate::event::ConnId;
use crate::websocket::{FrameHeader, MAX_HEADER_LEN, Opcode};

/// Default outbox capacity for a connection.
pub const OUTBOX_CAPACITY: usize = 16 * 1024;

/// OutboxFull is returned when queued data would exceed the outbox capacity or memory for it
/// could not be allocated.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct OutboxFull {
    kind: ErrorKind,
}

impl embedded_io_async::Error for OutboxFull {
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

/// Outbound data queued for a connection and not yet accepted by its socket.  Writes are all or
/// nothing: data that does not fit is refused as a whole, so a frame or response line is never
/// half queued.
///
/// Response bodies handed over with [`Outbox::push_body`] are not bound by the capacity.  They
/// wait behind the buffered bytes and are fed out as the socket drains.
#[derive(Debug)]
pub struct Outbox {
    buf: Vec<u8>,
    pending: VecDeque<Vec<u8>>,
    cap: usize,
}

impl Outbox {
    /// An empty outbox that holds at most `cap` bytes.
    pub fn new(cap: usize) -> Self {
        Self {
            buf: Vec::new(),
            pending: VecDeque::new(),
            cap,
        }
    }

    /// Number of queued bytes, bodies included.
    pub fn len(&self) -> usize {
        self.buf.len() + self.pending.iter().map(Vec::len).sum::<usize>()
    }

    /// True if nothing is queued.
    pub fn is_empty(&self) -> bool {
        // pending is only ever non empty behind buffered bytes
        self.buf.is_empty()
    }

    /// The bytes to hand to the socket next.  Bodies still waiting behind them are not included.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Drop the first `n` bytes of [`Outbox::as_slice`] after they were handed to the socket.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.buf.len());
        self.buf.drain(..n);

        if self.buf.is_empty() {
            if let Some(next) = self.pending.pop_front() {
                self.buf = next;
            }
        }
    }

    /// Queue `data` entirely or not at all.
    pub fn try_push(&mut self, data: &[u8]) -> Result<(), OutboxFull> {
        self.try_push_parts(&[data])
    }

    /// Queue all of `parts` back to back, or none of them.
    pub fn try_push_parts(&mut self, parts: &[&[u8]]) -> Result<(), OutboxFull> {
        let total: usize = parts.iter().map(|p| p.len()).sum();
        if self.len() + total > self.cap {
            return Err(OutboxFull {
                kind: ErrorKind::OutOfMemory,
            });
        }

        // keep the order when bodies are still waiting
        let tail = match self.pending.back_mut() {
            Some(tail) => tail,
            None => &mut self.buf,
        };

        if tail.try_reserve(total).is_err() {
            warn!("outbox allocation of {} bytes failed", total);
            return Err(OutboxFull {
                kind: ErrorKind::OutOfMemory,
            });
        }

        for part in parts {
            tail.extend_from_slice(part);
        }

        Ok(())
    }

    /// Queue a whole response body regardless of the capacity.  Bodies that fit are copied into
    /// the buffer, larger ones are kept as they are until the bytes ahead of them are sent.
    pub fn push_body(&mut self, body: Vec<u8>) -> Result<(), OutboxFull> {
        if self.buf.is_empty() {
            self.buf = body;
            return Ok(());
        }

        if self.len() + body.len() <= self.cap {
            return self.try_push(&body);
        }

        if self.pending.try_reserve(1).is_err() {
            warn!("outbox allocation for a {} byte body failed", body.len());
            return Err(OutboxFull {
                kind: ErrorKind::OutOfMemory,
            });
        }
        self.pending.push_back(body);

        Ok(())
    }
}

impl ErrorType for Outbox {
    type Error = OutboxFull;
}

impl Write for Outbox {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.try_push(buf)?;
        Ok(buf.len())
    }

    async fn write_all(&mut self, buf: &[u8]) -> Result<(), Self::Error> {
        self.try_push(buf)
    }
}

/// Connection capability flags.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Flags {
    /// Accepts connections, never carries application data
    pub listening: bool,
    /// Completed the websocket handshake
    pub websocket: bool,
    /// Shut down once the outbox drains
    pub closing: bool,
}

/// One network peer, or a listening endpoint.
#[derive(Debug)]
pub struct Connection {
    /// Handle, never reused by the roster that issued it
    pub id: ConnId,
    /// Capabilities
    pub flags: Flags,
    /// Milliseconds on the source clock when the connection was opened
    pub opened_at: u64,
    /// Peer (or bound) address as text, e.g. `127.0.0.1:5000`
    pub peer: heapless::String<48>,
    /// Data waiting to be sent
    pub outbox: Outbox,
}

/// The set of open connections, in the order they were opened.
#[derive(Debug)]
pub struct Roster {
    conns: Vec<Connection>,
    next_id: u32,
    outbox_capacity: usize,
}

impl Default for Roster {
    fn default() -> Self {
        Self::new(OUTBOX_CAPACITY)
    }
}

impl Roster {
    /// An empty roster whose connections buffer at most `outbox_capacity` outbound bytes each.
    pub fn new(outbox_capacity: usize) -> Self {
        Self {
            conns: Vec::new(),
            next_id: 1,
            outbox_capacity,
        }
    }

    /// Register a newly accepted connection from `peer`.
    pub fn open(&mut self, peer: &str, now_ms: u64) -> ConnId {
        self.insert(peer, now_ms, Flags::default())
    }

    /// Register a listening endpoint bound to `addr`.
    pub fn open_listener(&mut self, addr: &str, now_ms: u64) -> ConnId {
        self.insert(
            addr,
            now_ms,
            Flags {
                listening: true,
                ..Flags::default()
            },
        )
    }

    fn insert(&mut self, peer: &str, now_ms: u64, flags: Flags) -> ConnId {
        let id = ConnId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);

        let mut text = heapless::String::new();
        crate::ascii::push_truncated(&mut text, peer);

        self.conns.push(Connection {
            id,
            flags,
            opened_at: now_ms,
            peer: text,
            outbox: Outbox::new(self.outbox_capacity),
        });

        id
    }

    /// Look up a connection.
    pub fn get(&self, id: ConnId) -> Option<&Connection> {
        self.conns.iter().find(|c| c.id == id)
    }

    /// Look up a connection for modification.
    pub fn get_mut(&mut self, id: ConnId) -> Option<&mut Connection> {
        self.conns.iter_mut().find(|c| c.id == id)
    }

    /// Forget a connection, returning it.
    pub fn remove(&mut self, id: ConnId) -> Option<Connection> {
        let pos = self.conns.iter().position(|c| c.id == id)?;
        Some(self.conns.remove(pos))
    }

    /// All open connections, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.conns.iter()
    }

    /// Number of open connections including listeners.
    pub fn len(&self) -> usize {
        self.conns.len()
    }

    /// True if nothing is open.
    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    /// The outbox of `id` for use with a [`crate::response::Responder`].
    pub fn writer(&mut self, id: ConnId) -> Option<&mut Outbox> {
        self.get_mut(id).map(|c| &mut c.outbox)
    }

    /// Peer address of `id`, empty if unknown.
    pub fn peer(&self, id: ConnId) -> &str {
        self.get(id).map(|c| c.peer.as_str()).unwrap_or("")
    }

    /// Mark `id` to be closed once everything queued so far has been sent.
    pub fn close(&mut self, id: ConnId) {
        if let Some(conn) = self.get_mut(id) {
            conn.flags.closing = true;
        }
    }

    /// Queue one unmasked websocket frame on `id`.
    pub fn send_frame(
        &mut self,
        id: ConnId,
        opcode: Opcode,
        payload: &[u8],
    ) -> Result<(), OutboxFull> {
        let Some(conn) = self.get_mut(id) else {
            return Err(OutboxFull {
                kind: ErrorKind::NotConnected,
            });
        };

        push_frame(&mut conn.outbox, opcode, payload)
    }

    /// Send `text` as a websocket text frame to every websocket connection except `exclude`.
    /// Listeners, plain HTTP connections and connections already closing are skipped, as is any
    /// peer whose outbox cannot take the frame.  Returns the number of peers the frame was queued
    /// for.
    pub fn broadcast_text(&mut self, exclude: Option<ConnId>, text: &[u8]) -> usize {
        let mut sent = 0;

        for conn in self.conns.iter_mut() {
            if Some(conn.id) == exclude
                || conn.flags.listening
                || conn.flags.closing
                || !conn.flags.websocket
            {
                continue;
            }

            match push_frame(&mut conn.outbox, Opcode::Text, text) {
                Ok(()) => sent += 1,
                Err(_) => debug!("broadcast skipped {}, outbox full", conn.id),
            }
        }

        sent
    }
}

fn push_frame(outbox: &mut Outbox, opcode: Opcode, payload: &[u8]) -> Result<(), OutboxFull> {
    let mut head = [0u8; MAX_HEADER_LEN];
    let len = FrameHeader::new(opcode, payload.len())
        .encode(&mut head)
        .map_err(|_| OutboxFull {
            kind: ErrorKind::InvalidInput,
        })?;

    outbox.try_push_parts(&[&head[..len], payload])
}
