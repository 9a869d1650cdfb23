use core::mem::discriminant;

use crate::ascii::{COLON, CR, LF, SP};
use crate::header::RequestHeader;

const GET: &[u8] = "GET".as_bytes();
const POST: &[u8] = "POST".as_bytes();
const PUT: &[u8] = "PUT".as_bytes();
const PATCH: &[u8] = "PATCH".as_bytes();
const DELETE: &[u8] = "DELETE".as_bytes();
const OPTIONS: &[u8] = "OPTIONS".as_bytes();
const HEAD: &[u8] = "HEAD".as_bytes();

const HEAD_END: &[u8] = &[CR, LF, CR, LF];

/// Errors produced while parsing a request out of a receive buffer.
#[derive(PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RequestError {
    /// More data is needed.  Carries the expected body length once the headers are complete.
    Incomplete(Option<usize>),
    /// The data can never become a valid request.
    ProtocolError(&'static str),
}

/// Method such as GET. POST, DELETE etc.
#[non_exhaustive]
#[derive(PartialEq, Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Method {
    #[allow(missing_docs)]
    GET,
    #[allow(missing_docs)]
    POST,
    #[allow(missing_docs)]
    PUT,
    #[allow(missing_docs)]
    PATCH,
    #[allow(missing_docs)]
    DELETE,
    #[allow(missing_docs)]
    OPTIONS,
    #[allow(missing_docs)]
    HEAD,
}

impl Method {
    /// The method as it appears on the request line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GET => "GET",
            Self::POST => "POST",
            Self::PUT => "PUT",
            Self::PATCH => "PATCH",
            Self::DELETE => "DELETE",
            Self::OPTIONS => "OPTIONS",
            Self::HEAD => "HEAD",
        }
    }
}

impl TryFrom<&[u8]> for Method {
    type Error = &'static str;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        match value {
            GET => Ok(Self::GET),
            POST => Ok(Self::POST),
            PUT => Ok(Self::PUT),
            PATCH => Ok(Self::PATCH),
            DELETE => Ok(Self::DELETE),
            OPTIONS => Ok(Self::OPTIONS),
            HEAD => Ok(Self::HEAD),
            _ => Err("unknown http method"),
        }
    }
}

/// Request contains the details of the request parsed from bytes read from the client
#[non_exhaustive]
#[derive(Debug)]
pub struct Request<'a> {
    /// Method (GET, POST etc) parsed from the request
    pub method: Method,
    /// URL path without the query string e.g. `/index.html`
    pub path: &'a str,
    /// Query string following the `?` if any, e.g. `foo=bar`
    pub query: Option<&'a str>,
    /// Host extracted from the host header
    pub host: &'a str,
    /// Content-Type extracted from the Content-Type header where present
    pub content_type: Option<&'a str>,
    /// User agent extracted from the User-Agent header where present
    pub user_agent: Option<&'a str>,
    /// Value of the Upgrade header where present
    pub upgrade: Option<&'a str>,
    /// Content length extracted from the Content-Length header if present else 0
    pub content_length: usize,
    pub(crate) body: Option<&'a [u8]>,
    pub(crate) header_slice: Option<&'a [u8]>,
    pub(crate) consumed: usize,
}

impl<'a> Request<'a> {
    /// Parse a request from the start of `data`.  Bytes after the request (a pipelined request)
    /// are left alone, [`Request::consumed`] reports where this one ended.
    pub fn parse(data: &'a [u8]) -> Result<Self, RequestError> {
        let Some(head_len) = data
            .windows(HEAD_END.len())
            .position(|w| w == HEAD_END)
            .map(|p| p + HEAD_END.len())
        else {
            return Err(RequestError::Incomplete(None));
        };

        // only the head needs to be text, bodies are handed over as bytes
        let head = &data[..head_len];
        if str::from_utf8(head).is_err() {
            return Err(RequestError::ProtocolError(
                "http request is not valid utf8",
            ));
        }

        let mut req = Request {
            method: Method::GET,
            path: "",
            query: None,
            host: "",
            content_type: None,
            user_agent: None,
            upgrade: None,
            content_length: 0,
            header_slice: None,
            body: None,
            consumed: head_len,
        };

        let mut lines = head[..head_len - 2]
            .split(|b| *b == LF)
            .map(|line| line.strip_suffix(&[CR]).unwrap_or(line))
            .filter(|line| !line.is_empty());

        match lines.next() {
            Some(line) => req.parse_request_line(line)?,
            None => return Err(RequestError::ProtocolError("malformed HTTP request")),
        }

        for line in lines {
            req.parse_header_line(line)?;
        }

        if let Some(first_header) = head.iter().position(|b| *b == LF).map(|p| p + 1)
            && first_header < head_len - 2
        {
            req.header_slice = Some(&head[first_header..head_len - 2]);
        }

        if req.content_length > 0 {
            req.body = data.get(head_len..head_len + req.content_length);
            if req.body.is_none() {
                return Err(RequestError::Incomplete(Some(req.content_length)));
            }
            req.consumed += req.content_length;
        }

        if req.path.is_empty() {
            return Err(RequestError::ProtocolError("malformed HTTP request"));
        }

        Ok(req)
    }

    fn parse_request_line(&mut self, data: &'a [u8]) -> Result<(), RequestError> {
        for (i, word) in data.splitn(3, |b: &u8| *b == SP).enumerate() {
            match i {
                0 => match Method::try_from(word) {
                    Ok(m) => self.method = m,
                    Err(e) => return Err(RequestError::ProtocolError(e)),
                },
                1 => {
                    // head was checked for utf8 above
                    let uri = str::from_utf8(word).unwrap_or("");
                    match uri.split_once('?') {
                        Some((path, query)) => {
                            self.path = path;
                            self.query = Some(query);
                        }
                        None => self.path = uri,
                    }
                }
                _ => {}
            };
        }

        Ok(())
    }

    fn parse_header_line(&mut self, data: &'a [u8]) -> Result<(), RequestError> {
        match Self::resolve_header(data)? {
            Some(RequestHeader::ContentLength(l)) => self.content_length = l,
            Some(RequestHeader::Host(s)) => self.host = s,
            Some(RequestHeader::ContentType(s)) => self.content_type = Some(s),
            Some(RequestHeader::UserAgent(s)) => self.user_agent = Some(s),
            Some(RequestHeader::Upgrade(s)) => self.upgrade = Some(s),
            Some(RequestHeader::TransferEncoding(_)) => {
                return Err(RequestError::ProtocolError(
                    "chunked request bodies are not supported",
                ));
            }
            _ => {}
        }

        Ok(())
    }

    fn resolve_header(data: &'a [u8]) -> Result<Option<RequestHeader<'a>>, RequestError> {
        let Some(split) = data.iter().position(|b| *b == COLON) else {
            return Err(RequestError::ProtocolError("malformed http header"));
        };

        let header = str::from_utf8(&data[..split]).unwrap_or("").trim();
        let value = str::from_utf8(&data[split + 1..]).unwrap_or("").trim();

        match RequestHeader::try_from((header, value)) {
            Ok(h) => Ok(Some(h)),
            Err(e) => Err(RequestError::ProtocolError(e)),
        }
    }

    /// Search the portion of the original byte slice that contained headers for a header matching
    /// the provided variant.
    /// Note: A number of header values are extracted during the initial parse which should be used
    /// in favor of this method which requires a scan of the original headers each call.
    pub fn get_header(&self, header: RequestHeader<'_>) -> Option<RequestHeader<'a>> {
        let data = self.header_slice?;

        for line in data.split(|b| *b == LF) {
            let line = line.strip_suffix(&[CR]).unwrap_or(line);
            let Ok(Some(h)) = Self::resolve_header(line) else {
                continue;
            };
            match (header, h) {
                (RequestHeader::Other(key1, _), RequestHeader::Other(key2, _))
                    if key1.eq_ignore_ascii_case(key2) =>
                {
                    return Some(h);
                }
                (RequestHeader::Other(_, _), RequestHeader::Other(_, _)) => {}
                (h1, h2) if discriminant(&h1) == discriminant(&h2) => {
                    return Some(h);
                }
                _ => {}
            };
        }

        None
    }

    /// Returns a reference to the request body bytes if any.
    pub fn get_body(&self) -> Option<&'a [u8]> {
        self.body
    }

    /// Number of bytes of the receive buffer this request occupies, head and body.
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// True when the client asked to switch this connection to the websocket protocol.
    pub fn is_websocket_upgrade(&self) -> bool {
        self.upgrade
            .is_some_and(|u| u.eq_ignore_ascii_case("websocket"))
    }

    /// Raw (still url encoded) value of the named variable in an
    /// `application/x-www-form-urlencoded` body.  Names are matched case insensitively, the first
    /// occurrence wins.
    pub fn form_var(&self, name: &str) -> Option<&'a str> {
        let body = str::from_utf8(self.body?).ok()?;
        form_var(body, name)
    }

    /// Raw value of the named variable in the query string.
    pub fn query_var(&self, name: &str) -> Option<&'a str> {
        form_var(self.query?, name)
    }
}

fn form_var<'a>(encoded: &'a str, name: &str) -> Option<&'a str> {
    encoded
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value)
}
