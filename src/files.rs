//! Static documents served from a document root.

use alloc::string::String;
use alloc::vec::Vec;

use crate::header::ResponseHeader;
use crate::request::{Method, Request};
use crate::response::{Responder, ResponderError, StatusCode};
use crate::roster::Outbox;
use crate::ssi;

const INDEX_FILES: [&str; 2] = ["index.html", "index.shtml"];

/// Where documents come from.
pub trait DocumentRoot {
    /// True if the root itself is present.  Serving from a missing root is a startup error.
    fn exists(&self) -> bool;

    /// Contents of the document at `path`, relative to the root and without a leading `/`.
    fn load(&self, path: &str) -> Option<Vec<u8>>;
}

/// Documents held in memory, for hosts without a filesystem and for tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryRoot {
    files: Vec<(String, Vec<u8>)>,
}

impl MemoryRoot {
    #[allow(missing_docs)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a document.
    pub fn with_file(mut self, path: &str, contents: &[u8]) -> Self {
        self.files
            .push((String::from(path.trim_start_matches('/')), contents.to_vec()));
        self
    }
}

impl DocumentRoot for MemoryRoot {
    fn exists(&self) -> bool {
        true
    }

    fn load(&self, path: &str) -> Option<Vec<u8>> {
        self.files
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, c)| c.clone())
    }
}

#[cfg(feature = "std")]
pub use self::fs::FsRoot;

#[cfg(feature = "std")]
mod fs {
    use std::path::PathBuf;
    use std::vec::Vec;

    use super::DocumentRoot;

    /// A directory on the host filesystem.
    #[derive(Debug, Clone)]
    pub struct FsRoot {
        dir: PathBuf,
    }

    impl FsRoot {
        #[allow(missing_docs)]
        pub fn new(dir: impl Into<PathBuf>) -> Self {
            Self { dir: dir.into() }
        }
    }

    impl DocumentRoot for FsRoot {
        fn exists(&self) -> bool {
            self.dir.is_dir()
        }

        fn load(&self, path: &str) -> Option<Vec<u8>> {
            let file = self.dir.join(path);
            if !file.is_file() {
                return None;
            }
            std::fs::read(file).ok()
        }
    }
}

/// Content type for a document, by file extension.
pub fn content_type(path: &str) -> &'static str {
    let ext = path.rsplit_once('.').map(|(_, e)| e).unwrap_or("");
    match ext {
        _ if ext.eq_ignore_ascii_case("html") || ext.eq_ignore_ascii_case("htm") => "text/html",
        _ if ext.eq_ignore_ascii_case("shtml") => "text/html",
        _ if ext.eq_ignore_ascii_case("css") => "text/css",
        _ if ext.eq_ignore_ascii_case("js") => "application/javascript",
        _ if ext.eq_ignore_ascii_case("json") => "application/json",
        _ if ext.eq_ignore_ascii_case("txt") => "text/plain",
        _ if ext.eq_ignore_ascii_case("png") => "image/png",
        _ if ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg") => "image/jpeg",
        _ if ext.eq_ignore_ascii_case("gif") => "image/gif",
        _ if ext.eq_ignore_ascii_case("svg") => "image/svg+xml",
        _ if ext.eq_ignore_ascii_case("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}

fn is_shtml(path: &str) -> bool {
    path.rsplit_once('.')
        .is_some_and(|(_, e)| e.eq_ignore_ascii_case("shtml"))
}

/// Respond to `req` with the document it names.  A path ending in `/` serves `index.html`, or
/// failing that `index.shtml`, from that directory.  `.shtml` documents have their includes
/// expanded through `include`.  Methods other than GET and HEAD get `405`, missing documents and
/// paths trying to leave the root get `404`.  The body is queued whole, however large.
pub async fn serve<R, F>(
    root: &R,
    req: &Request<'_>,
    out: &mut Outbox,
    include: F,
) -> Result<(), ResponderError>
where
    R: DocumentRoot,
    F: FnMut(&str, &mut String),
{
    if !matches!(req.method, Method::GET | Method::HEAD) {
        return Responder::new(out)
            .with_status(StatusCode::MethodNotAllowed)
            .await?
            .with_body(b"Method Not Allowed")
            .await;
    }

    let rel = req.path.trim_start_matches('/');
    let found = if rel.split('/').any(|seg| seg == "..") {
        None
    } else if rel.is_empty() || rel.ends_with('/') {
        INDEX_FILES.iter().find_map(|index| {
            let mut candidate = String::from(rel);
            candidate.push_str(index);
            root.load(&candidate).map(|c| (candidate, c))
        })
    } else {
        root.load(rel).map(|c| (String::from(rel), c))
    };

    let Some((path, contents)) = found else {
        debug!("no document for {}", req.path);
        return Responder::new(out)
            .with_status(StatusCode::NotFound)
            .await?
            .with_body(b"Not Found")
            .await;
    };

    let body = if is_shtml(&path) {
        let mut expanded = Vec::with_capacity(contents.len());
        ssi::expand(&contents, &mut expanded, include);
        expanded
    } else {
        contents
    };

    Responder::new(&mut *out)
        .with_header(ResponseHeader::ContentType(content_type(&path)))
        .await?
        .with_header(ResponseHeader::ContentLength(body.len()))
        .await?
        .no_body()
        .await?;

    if req.method == Method::HEAD {
        return Ok(());
    }

    out.push_body(body)
        .map_err(|_| ResponderError::NetworkError)
}
