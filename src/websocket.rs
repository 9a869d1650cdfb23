//! Websocket framing.  A connection that completed the HTTP upgrade handshake carries a
//! bidirectional, non synchronous exchange of frames that encapsulate payload data.
//!
//! For more info:
//!
//! * <https://developer.mozilla.org/en-US/docs/Web/API/WebSockets_API/Writing_WebSocket_servers>
//!
//! The codec here is buffer oriented: the event source decodes [`FrameHeader`]s from whatever
//! it has received so far and encodes outgoing frames straight into connection outboxes.
//!
//! ```
//! use eventlite::websocket::{FrameHeader, Opcode};
//!
//! let mut dest = [0u8; 14];
//! let header = FrameHeader::new(Opcode::Text, 5);
//! let len = header.encode(&mut dest).unwrap();
//! assert_eq!(&dest[..len], &[0x81, 5]);
//!
//! let decoded = FrameHeader::decode(&[0x81, 5, b'h', b'e', b'l', b'l', b'o']).unwrap();
//! assert_eq!(decoded.opcode, Opcode::Text);
//! assert_eq!(decoded.len, 5);
//! ```

use base64ct::{Base64, Encoding};
use sha1::{Digest, Sha1};

const SEC_WEBSOCKET_ACCEPT_MAGIC: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Longest possible frame header: 2 bytes, 8 bytes extended length and a 4 byte mask.
pub const MAX_HEADER_LEN: usize = 14;

/// Compute the `Sec-WebSocket-Accept` value for a client supplied `Sec-WebSocket-Key`.
pub fn accept_key(key: &str) -> Result<[u8; 28], &'static str> {
    let mut key_hasher = Sha1::new();
    key_hasher.update(key.as_bytes());
    key_hasher.update(SEC_WEBSOCKET_ACCEPT_MAGIC.as_bytes());
    let key_hash = key_hasher.finalize();

    let mut key_b64_buff = [0u8; 28];
    if Base64::encode(&key_hash, &mut key_b64_buff).is_err() {
        return Err("error encoding key hash due to invalid length");
    }

    Ok(key_b64_buff)
}

/// WebsocketError contains the errors that may be returned while handling a websocket connection.
#[derive(Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WebsocketError {
    /// More bytes are needed before the frame header can be decoded
    InsufficientData(usize),
    /// The frame uses a feature this codec does not support
    Unsupported(&'static str),
    /// The frame could not be queued for the client
    NetworkError,
}

/// Frame OP codes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Opcode {
    #[allow(missing_docs)]
    Continuation,
    #[allow(missing_docs)]
    Text,
    #[allow(missing_docs)]
    Binary,
    #[allow(missing_docs)]
    Close,
    #[allow(missing_docs)]
    Ping,
    #[allow(missing_docs)]
    Pong,
}

impl TryFrom<u8> for Opcode {
    type Error = WebsocketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            _ => Err(WebsocketError::Unsupported("reserved opcode")),
        }
    }
}

impl From<Opcode> for u8 {
    fn from(value: Opcode) -> Self {
        match value {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
        }
    }
}

/// FrameHeader encodes/decodes to the websocket wire protocol
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameHeader {
    /// The websocket OP code
    pub opcode: Opcode,
    /// The length of the payload
    pub len: usize,
    /// The number of bytes the header itself occupies on the wire
    pub header_len: usize,
    fin: bool,
    mask: Option<[u8; 4]>,
}

impl FrameHeader {
    /// An unmasked, final frame header as sent by a server.
    pub fn new(opcode: Opcode, len: usize) -> Self {
        let mut header = Self {
            opcode,
            len,
            header_len: 0,
            fin: true,
            mask: None,
        };
        header.header_len = header.wire_len();
        header
    }

    /// A masked header as sent by a client.
    pub fn masked(opcode: Opcode, len: usize, mask: [u8; 4]) -> Self {
        let mut header = Self::new(opcode, len);
        header.mask = Some(mask);
        header.header_len = header.wire_len();
        header
    }

    fn wire_len(&self) -> usize {
        let len_bytes = match self.len {
            0..=125 => 0,
            126..=0xFFFF => 2,
            _ => 8,
        };
        let mask_bytes = if self.mask.is_some() { 4 } else { 0 };
        2 + len_bytes + mask_bytes
    }

    /// True if the client masked the payload.
    pub fn is_masked(&self) -> bool {
        self.mask.is_some()
    }

    /// Decode a frame header from the start of `value`.  Returns
    /// [`WebsocketError::InsufficientData`] with the number of missing bytes when the header is
    /// not complete yet.
    pub fn decode(value: &[u8]) -> Result<Self, WebsocketError> {
        let mut required_bytes = 2usize;

        if value.len() < required_bytes {
            return Err(WebsocketError::InsufficientData(
                required_bytes - value.len(),
            ));
        }

        let fin: bool = (value[0] & 0x80) == 0x80;
        let opcode = Opcode::try_from(value[0] & 0x0F)?;

        if !fin || opcode == Opcode::Continuation {
            return Err(WebsocketError::Unsupported(
                "payload fragmentation not supported",
            ));
        }

        let masked: bool = (value[1] & 0x80) == 0x80;

        let mut len: u64 = (value[1] & 0x7F) as u64;
        let mut mask_offset = 2;
        if len == 126 {
            // 16 bit length field
            required_bytes += 2;
            if value.len() < required_bytes {
                return Err(WebsocketError::InsufficientData(
                    required_bytes - value.len(),
                ));
            }
            len = u16::from_be_bytes([value[2], value[3]]) as u64;
            mask_offset = 4;
        } else if len == 127 {
            // 64bit length field
            required_bytes += 8;
            if value.len() < required_bytes {
                return Err(WebsocketError::InsufficientData(
                    required_bytes - value.len(),
                ));
            }
            let mut be = [0u8; 8];
            be.copy_from_slice(&value[2..10]);
            len = u64::from_be_bytes(be);
            mask_offset = 10;
        }

        let len: usize = match usize::try_from(len) {
            Ok(l) => l,
            Err(_) => {
                return Err(WebsocketError::Unsupported(
                    "payload length exceeds max platform architecture usize",
                ));
            }
        };

        let mut mask: Option<[u8; 4]> = None;

        if masked {
            required_bytes += 4;
            if value.len() < required_bytes {
                return Err(WebsocketError::InsufficientData(
                    required_bytes - value.len(),
                ));
            }

            mask = Some([
                value[mask_offset],
                value[mask_offset + 1],
                value[mask_offset + 2],
                value[mask_offset + 3],
            ]);
        }

        Ok(FrameHeader {
            opcode,
            len,
            header_len: required_bytes,
            fin,
            mask,
        })
    }

    /// Encode the header into `dest` returning the number of bytes written.  `dest` should be
    /// at least [`MAX_HEADER_LEN`] bytes.
    pub fn encode(&self, dest: &mut [u8]) -> Result<usize, WebsocketError> {
        if dest.len() < self.header_len {
            return Err(WebsocketError::Unsupported(
                "encode buffer too small for frame header",
            ));
        }

        dest[0] = u8::from(self.opcode) & 0x0F;
        if self.fin {
            dest[0] |= 0x80;
        }

        dest[1] = if self.mask.is_some() { 0x80 } else { 0 };

        let mut mask_offset = 2;
        if self.len <= 125 {
            dest[1] |= self.len as u8;
        } else if self.len <= u16::MAX.into() {
            // indicate 16 bit length with byte 2 7LSB bits = 126
            dest[1] |= 126u8;
            dest[2..4].copy_from_slice(&(self.len as u16).to_be_bytes());
            mask_offset = 4;
        } else {
            // indicate 64 bit length with byte 2 7LSB bits = 127
            dest[1] |= 127u8;
            dest[2..10].copy_from_slice(&(self.len as u64).to_be_bytes());
            mask_offset = 10;
        }

        if let Some(mask) = self.mask {
            dest[mask_offset..mask_offset + 4].copy_from_slice(&mask);
            return Ok(mask_offset + 4);
        }

        Ok(mask_offset)
    }

    /// XOR `data` with the frame mask.  Applying it twice restores the input.
    pub fn apply_mask(&self, data: &mut [u8]) {
        if let Some(mask) = self.mask {
            for (i, byte) in data.iter_mut().enumerate() {
                *byte ^= mask[i % 4];
            }
        }
    }
}
