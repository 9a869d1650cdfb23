//! One-shot HTTP client used by the console's test command.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Errors from [`get`].
#[derive(Debug, PartialEq)]
pub enum ClientError {
    /// The URL is not of the form `http://host[:port][/path]`
    Url(&'static str),
    /// Nobody answered at the address
    Connect,
    /// The exchange broke off
    Io,
}

/// The parts of an `http://` URL the client needs.
#[derive(Debug, PartialEq)]
pub struct Url<'a> {
    #[allow(missing_docs)]
    pub host: &'a str,
    #[allow(missing_docs)]
    pub port: u16,
    /// Path and query, `/` if the URL has none
    pub path: &'a str,
}

/// Split an `http://host[:port][/path]` URL.  The scheme may be left out.
pub fn parse_url(url: &str) -> Result<Url<'_>, ClientError> {
    let rest = match url.split_once("://") {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("http") => rest,
        Some(_) => return Err(ClientError::Url("only http is supported")),
        None => url,
    };

    let (authority, path) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, "/"),
    };

    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => (
            host,
            port.parse::<u16>()
                .map_err(|_| ClientError::Url("invalid port"))?,
        ),
        None => (authority, 80),
    };

    if host.is_empty() {
        return Err(ClientError::Url("missing host"));
    }

    Ok(Url { host, port, path })
}

/// Fetch `url` with a single `GET`, returning the raw reply, status line and headers included.
pub async fn get(url: &str) -> Result<String, ClientError> {
    let url = parse_url(url)?;

    let mut stream = TcpStream::connect((url.host, url.port)).await.map_err(|e| {
        debug!("connect to {}:{} failed: {}", url.host, url.port, e);
        ClientError::Connect
    })?;

    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        url.path, url.host
    );
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|_| ClientError::Io)?;

    let mut reply = Vec::new();
    stream
        .read_to_end(&mut reply)
        .await
        .map_err(|_| ClientError::Io)?;

    Ok(String::from_utf8_lossy(&reply).into_owned())
}

#[cfg(test)]
mod tests {
    use core::time::Duration;

    use super::*;
    use crate::demo::hello::HelloDispatcher;
    use crate::platform::TokioClock;
    use crate::reactor::Reactor;
    use crate::server::TcpEventSource;

    #[test]
    fn test_parse_url() {
        assert_eq!(
            parse_url("http://192.168.1.10:8000/get_cpu_usage"),
            Ok(Url {
                host: "192.168.1.10",
                port: 8000,
                path: "/get_cpu_usage"
            })
        );
        assert_eq!(
            parse_url("example.com"),
            Ok(Url {
                host: "example.com",
                port: 80,
                path: "/"
            })
        );
        assert!(matches!(parse_url("https://x/"), Err(ClientError::Url(_))));
        assert!(matches!(parse_url("http://x:http/"), Err(ClientError::Url(_))));
        assert!(matches!(parse_url("http:///path"), Err(ClientError::Url(_))));
    }

    #[tokio::test]
    async fn test_get_against_hello_server() {
        let source = TcpEventSource::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/probe", source.local_addr());
        let mut reactor = Reactor::new(source, HelloDispatcher, (), TokioClock::default())
            .with_wait(Duration::from_millis(20));

        let reply = tokio::select! {
            e = reactor.run() => panic!("source failed: {:?}", e),
            r = get(&url) => r.unwrap(),
        };

        assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(reply.ends_with("You asked for /probe\r\n"));
    }

    #[tokio::test]
    async fn test_get_connection_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        assert_eq!(
            get(&format!("http://{}/", addr)).await,
            Err(ClientError::Connect)
        );
    }
}
