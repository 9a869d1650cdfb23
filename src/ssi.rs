//! Server side includes.  Documents ending in `.shtml` may contain `<!--#call NAME -->`
//! directives which are replaced by whatever the include hook writes for `NAME`.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

const CALL_OPEN: &str = "<!--#call ";
const CALL_CLOSE: &str = "-->";

/// Displays the wrapped text with `<`, `>`, `&`, `"` and `'` replaced by character references,
/// so it shows up as literal text when embedded in HTML.
pub struct HtmlEscaped<'a>(pub &'a str);

impl fmt::Display for HtmlEscaped<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut rest = self.0;
        while let Some(pos) = rest.find(['<', '>', '&', '"', '\'']) {
            f.write_str(&rest[..pos])?;
            let entity = match rest.as_bytes()[pos] {
                b'<' => "&lt;",
                b'>' => "&gt;",
                b'&' => "&amp;",
                b'"' => "&quot;",
                _ => "&#39;",
            };
            f.write_str(entity)?;
            rest = &rest[pos + 1..];
        }
        f.write_str(rest)
    }
}

/// `text` escaped for HTML.
pub fn escape_html(text: &str) -> String {
    use core::fmt::Write;

    let mut out = String::with_capacity(text.len());
    let _ = write!(out, "{}", HtmlEscaped(text));
    out
}

/// Copy `template` into `out`, replacing every `<!--#call NAME -->` directive with the text the
/// `include` hook produces for `NAME`.  Other comments and an unterminated directive are copied
/// unchanged.
pub fn expand<F>(template: &[u8], out: &mut Vec<u8>, mut include: F)
where
    F: FnMut(&str, &mut String),
{
    let open = CALL_OPEN.as_bytes();
    let close = CALL_CLOSE.as_bytes();
    let mut rest = template;
    let mut scratch = String::new();

    while let Some(start) = find(rest, open) {
        let after = &rest[start + open.len()..];
        let Some(end) = find(after, close) else {
            break;
        };

        out.extend_from_slice(&rest[..start]);

        match str::from_utf8(&after[..end]) {
            Ok(name) => {
                scratch.clear();
                include(name.trim(), &mut scratch);
                out.extend_from_slice(scratch.as_bytes());
            }
            Err(_) => debug!("ssi directive name is not utf8, dropped"),
        }

        rest = &after[end + close.len()..];
    }

    out.extend_from_slice(rest);
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
