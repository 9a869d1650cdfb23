use embedded_io_async::Write;

use crate::ascii::{AsciiInt, CR, LF, atoi};
use crate::{HttpWrite, WriteError, write_parts};

/// Host
pub const HEAD_HOST: &str = "Host";
/// User-Agent
pub const HEAD_USER_AGENT: &str = "User-Agent";
/// Upgrade
pub const HEAD_UPGRADE: &str = "Upgrade";
/// Connection
pub const HEAD_CONNECTION: &str = "Connection";
/// Sec-WebSocket-Key
pub const HEAD_SEC_WEBSOCKET_KEY: &str = "Sec-WebSocket-Key";
/// Sec-WebSocket-Accept
pub const HEAD_SEC_WEBSOCKET_ACCEPT: &str = "Sec-WebSocket-Accept";
/// Content-Length
pub const HEAD_CONTENT_LENGTH: &str = "Content-Length";
/// Content-Type
pub const HEAD_CONTENT_TYPE: &str = "Content-Type";
/// Transfer-Encoding
pub const HEAD_TRANSFER_ENCODING: &str = "Transfer-Encoding";
/// Location
pub const HEAD_LOCATION: &str = "Location";

#[allow(missing_docs)]
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RequestHeader<'a> {
    Host(&'a str),
    UserAgent(&'a str),
    Upgrade(&'a str),
    Connection(&'a str),
    SecWebSocketKey(&'a str),
    ContentLength(usize),
    ContentType(&'a str),
    TransferEncoding(&'a str),
    Other(&'a str, &'a str),
}

impl<'a> TryFrom<(&'a str, &'a str)> for RequestHeader<'a> {
    type Error = &'static str;

    fn try_from((name, value): (&'a str, &'a str)) -> Result<Self, Self::Error> {
        let header = match name {
            _ if name.eq_ignore_ascii_case(HEAD_HOST) => Self::Host(value),
            _ if name.eq_ignore_ascii_case(HEAD_USER_AGENT) => Self::UserAgent(value),
            _ if name.eq_ignore_ascii_case(HEAD_UPGRADE) => Self::Upgrade(value),
            _ if name.eq_ignore_ascii_case(HEAD_CONNECTION) => Self::Connection(value),
            _ if name.eq_ignore_ascii_case(HEAD_SEC_WEBSOCKET_KEY) => {
                Self::SecWebSocketKey(value)
            }
            _ if name.eq_ignore_ascii_case(HEAD_CONTENT_TYPE) => Self::ContentType(value),
            _ if name.eq_ignore_ascii_case(HEAD_TRANSFER_ENCODING) => {
                Self::TransferEncoding(value)
            }
            _ if name.eq_ignore_ascii_case(HEAD_CONTENT_LENGTH) => Self::ContentLength(
                atoi(value.as_bytes()).ok_or("invalid content-length")? as usize,
            ),
            _ => Self::Other(name, value),
        };

        Ok(header)
    }
}

#[allow(missing_docs)]
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ResponseHeader<'a> {
    Connection(&'a str),
    Upgrade(&'a str),
    Location(&'a str),
    TransferEncoding(&'a str),
    ContentLength(usize),
    ContentType(&'a str),
    SecWebSocketAccept([u8; 28]),
    Other(&'a str, &'a str),
}

impl<'a> HttpWrite for ResponseHeader<'a> {
    async fn write<T: Write>(self, writer: &mut T) -> Result<(), WriteError> {
        let len: AsciiInt;

        let (name, val) = match self {
            Self::Connection(s) => (HEAD_CONNECTION, s),
            Self::Upgrade(s) => (HEAD_UPGRADE, s),
            Self::Location(s) => (HEAD_LOCATION, s),
            Self::TransferEncoding(s) => (HEAD_TRANSFER_ENCODING, s),
            Self::ContentLength(n) => {
                len = AsciiInt::from(n as u64);
                (HEAD_CONTENT_LENGTH, len.as_str())
            }
            Self::ContentType(s) => (HEAD_CONTENT_TYPE, s),
            Self::SecWebSocketAccept(ref key) => (
                HEAD_SEC_WEBSOCKET_ACCEPT,
                // base64 output is always ascii
                str::from_utf8(key).map_err(|_| WriteError::NetworkError)?,
            ),
            Self::Other(k, v) => (k, v),
        };

        write_parts(writer, &[name.as_bytes(), b": ", val.as_bytes(), &[CR, LF]]).await
    }
}
