use embedded_io_async::Write;

use crate::ascii::{AsciiInt, CR, LF, SP};
use crate::header::ResponseHeader;
use crate::websocket::accept_key;
use crate::{HttpWrite, WriteError, write_parts};

const HTTP_PROTO: &str = "HTTP/1.1";

/// Responder error is returned as the error when responding to clients.  Generally users of the
/// crate will not inspect this error, but pass it on from the handler implementations.
#[derive(Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResponderError {
    /// Error writing data to the client, for a buffered connection this means its outbox is full
    NetworkError,
    /// Protocol error parsing supplied data
    ProtocolError(&'static str),
}

impl From<WriteError> for ResponderError {
    fn from(value: WriteError) -> Self {
        match value {
            WriteError::NetworkError => Self::NetworkError,
        }
    }
}

/// HTTP status code returned in a response
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StatusCode {
    /// 101 Switching Protocols - eg from HTTP to Websocket
    SwitchingProtocols,
    /// 200 Ok
    OK,
    /// 302 Found
    Found,
    /// 400 Bad Request
    BadRequest,
    /// 404 Not Found
    NotFound,
    /// 405 Method Not Allowed
    MethodNotAllowed,
    /// 500 Server Error
    InternalServerError,
    /// Any other code
    Other(u16),
}

impl HttpWrite for StatusCode {
    async fn write<T: Write>(self, writer: &mut T) -> Result<(), WriteError> {
        let other: AsciiInt;
        let data = match self {
            Self::SwitchingProtocols => "101 Switching Protocols",
            Self::OK => "200 OK",
            Self::Found => "302 Found",
            Self::BadRequest => "400 Bad Request",
            Self::NotFound => "404 Not Found",
            Self::MethodNotAllowed => "405 Method Not Allowed",
            Self::InternalServerError => "500 Internal Server Error",
            Self::Other(n) => {
                other = AsciiInt::from(n as u64);
                other.as_str()
            }
        };

        write_parts(
            writer,
            &[HTTP_PROTO.as_bytes(), &[SP], data.as_bytes(), &[CR, LF]],
        )
        .await
    }
}

/// Responder is the API provided to formulate HTTP responses to the client. A `Responder`
/// will transition to the sending state (`ResponderSending`) when a status is sent.
pub struct Responder<'client, C: Write> {
    client: &'client mut C,
}

impl<'client, C: Write> Responder<'client, C> {
    /// Create a new responder writing to `client`.
    pub fn new(client: &'client mut C) -> Self {
        Self { client }
    }

    /// Set and send the provided status to the client.  Consumes the `self` and returns a new self
    /// that is in the Sending state.
    #[must_use = "http responder not finished with either `with_body` or `no_body` results in a client waiting for data"]
    pub async fn with_status(
        self,
        status: StatusCode,
    ) -> Result<ResponderSending<'client, C>, ResponderError> {
        status.write(self.client).await?;

        Ok(ResponderSending {
            client: self.client,
        })
    }

    /// Send `200 OK` followed by the supplied header.  Consumes the self returning a Self in the
    /// Sending state.
    #[must_use = "http responder not finished with either `with_body` or `no_body` results in a client waiting for data"]
    pub async fn with_header(
        self,
        header: ResponseHeader<'_>,
    ) -> Result<ResponderSending<'client, C>, ResponderError> {
        self.with_status(StatusCode::OK)
            .await?
            .with_header(header)
            .await
    }

    /// Complete the response as a redirect to `location` with an empty body.
    pub async fn redirect(self, status: StatusCode, location: &str) -> Result<(), ResponderError> {
        self.with_status(status)
            .await?
            .with_header(ResponseHeader::Location(location))
            .await?
            .with_body(&[])
            .await
    }

    /// Accept a websocket handshake using the client's `Sec-WebSocket-Key`.  After this returns
    /// the connection carries websocket frames.
    pub async fn upgrade(self, websocket_key: &str) -> Result<(), ResponderError> {
        let accept = accept_key(websocket_key).map_err(ResponderError::ProtocolError)?;

        self.with_status(StatusCode::SwitchingProtocols)
            .await?
            .with_header(ResponseHeader::Upgrade("websocket"))
            .await?
            .with_header(ResponseHeader::Connection("Upgrade"))
            .await?
            .with_header(ResponseHeader::SecWebSocketAccept(accept))
            .await?
            .no_body()
            .await
    }
}

/// ResponderSending is a responder for which a status has already been sent
pub struct ResponderSending<'client, C: Write> {
    client: &'client mut C,
}

impl<'client, C: Write> ResponderSending<'client, C> {
    #[must_use = "http responder not finished with either `with_body` or `no_body` results in a client waiting for data"]
    /// Sends the supplied header to the client.  Consumes
    /// the self returning a Self in the Sending state.
    pub async fn with_header(
        self,
        header: ResponseHeader<'_>,
    ) -> Result<ResponderSending<'client, C>, ResponderError> {
        header.write(self.client).await?;

        Ok(self)
    }

    /// Completes the response with no body.  Consumes the self as it is not valid to produce any
    /// more data to the client in response to the active request.
    pub async fn no_body(self) -> Result<(), ResponderError> {
        self.client
            .write_all(&[CR, LF])
            .await
            .or(Err(ResponderError::NetworkError))
    }

    /// Completes the response with the supplied body setting the Content-Length to the length of
    /// the body.
    pub async fn with_body(self, body: &[u8]) -> Result<(), ResponderError> {
        ResponseHeader::ContentLength(body.len())
            .write(self.client)
            .await?;

        self.client
            .write_all(&[CR, LF])
            .await
            .or(Err(ResponderError::NetworkError))?;

        self.client
            .write_all(body)
            .await
            .or(Err(ResponderError::NetworkError))
    }

    /// Switch to chunked transfer encoding, for bodies whose length is not known upfront.
    pub async fn chunked(self) -> Result<ChunkedBody<'client, C>, ResponderError> {
        let sending = self
            .with_header(ResponseHeader::TransferEncoding("chunked"))
            .await?;

        sending
            .client
            .write_all(&[CR, LF])
            .await
            .or(Err(ResponderError::NetworkError))?;

        Ok(ChunkedBody {
            client: sending.client,
        })
    }
}

/// A response body sent as a sequence of length prefixed chunks.  Must be completed with
/// [`ChunkedBody::finish`] which sends the terminating empty chunk.
#[must_use = "a chunked body must be terminated with `finish`"]
pub struct ChunkedBody<'client, C: Write> {
    client: &'client mut C,
}

impl<'client, C: Write> ChunkedBody<'client, C> {
    /// Send `data` as one chunk.  Empty data is skipped as a zero length chunk would end the body.
    pub async fn chunk(self, data: &[u8]) -> Result<Self, ResponderError> {
        if data.is_empty() {
            return Ok(self);
        }

        let size = AsciiInt::hex(data.len() as u64);
        write_parts(
            self.client,
            &[size.as_str().as_bytes(), &[CR, LF], data, &[CR, LF]],
        )
        .await?;

        Ok(self)
    }

    /// Send the terminating zero length chunk.
    pub async fn finish(self) -> Result<(), ResponderError> {
        self.client
            .write_all(&[b'0', CR, LF, CR, LF])
            .await
            .or(Err(ResponderError::NetworkError))
    }
}
