//! A "connected device" control panel: two settings editable through a form and shown through
//! server side includes, a CPU usage endpoint and a once a second push of memory use to every
//! websocket client.

use alloc::string::String;
use core::fmt::Write as _;

use crate::ascii::{AsciiInt, url_decode_into, utf8_prefix};
use crate::dispatch::{Dispatcher, HandlerError};
use crate::event::{ConnId, Event};
use crate::files::{self, DocumentRoot};
use crate::platform::SystemInfo;
use crate::request::Request;
use crate::response::{Responder, StatusCode};
use crate::roster::Roster;
use crate::ssi::HtmlEscaped;

/// Longest value a setting holds, in bytes.  Longer input is cut at the last whole character
/// that fits.
pub const SETTING_CAPACITY: usize = 99;

/// Name of the periodic memory push.
pub const PUSH_TIMER: &str = "push";

type Setting = heapless::String<SETTING_CAPACITY>;

/// The panel's settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    #[allow(missing_docs)]
    pub setting1: Setting,
    #[allow(missing_docs)]
    pub setting2: Setting,
}

impl Default for Settings {
    fn default() -> Self {
        let mut settings = Self {
            setting1: Setting::new(),
            setting2: Setting::new(),
        };
        let _ = settings.setting1.push_str("value1");
        let _ = settings.setting2.push_str("value2");
        settings
    }
}

impl Settings {
    /// Store a url encoded form value.  A missing value empties the setting.  Returns false if
    /// the decoded value had to be truncated.
    fn store(setting: &mut Setting, encoded: Option<&str>) -> bool {
        let mut decoded = heapless::Vec::<u8, SETTING_CAPACITY>::new();
        let complete = url_decode_into(encoded.unwrap_or(""), &mut decoded);

        setting.clear();
        let text = utf8_prefix(&decoded);
        let _ = setting.push_str(text);

        complete && text.len() == decoded.len()
    }

    /// Update both settings from a `setting1=..&setting2=..` form body.
    pub fn update_from(&mut self, req: &Request<'_>) {
        if !Self::store(&mut self.setting1, req.form_var("setting1")) {
            warn!("setting1 truncated to {} bytes", self.setting1.len());
        }
        if !Self::store(&mut self.setting2, req.form_var("setting2")) {
            warn!("setting2 truncated to {} bytes", self.setting2.len());
        }
    }

    /// Include hook for `.shtml` documents.  Unknown names produce nothing.
    pub fn include(&self, name: &str, out: &mut String) {
        let value = match name {
            "setting1" => &self.setting1,
            "setting2" => &self.setting2,
            _ => return,
        };
        let _ = write!(out, "{}", HtmlEscaped(value.as_str()));
    }
}

/// Dispatcher of the control panel.
pub struct DeviceDispatcher<R, I> {
    root: R,
    info: I,
}

impl<R: DocumentRoot, I: SystemInfo> DeviceDispatcher<R, I> {
    /// Serve documents from `root` and report figures from `info`.
    pub fn new(root: R, info: I) -> Self {
        Self { root, info }
    }

    async fn save(
        &self,
        settings: &mut Settings,
        id: ConnId,
        req: &Request<'_>,
        roster: &mut Roster,
    ) -> Result<(), HandlerError> {
        settings.update_from(req);

        let out = roster.writer(id).ok_or("connection gone")?;
        Responder::new(out).redirect(StatusCode::Found, "/").await?;

        Ok(())
    }

    async fn cpu_usage(&self, id: ConnId, roster: &mut Roster) -> Result<(), HandlerError> {
        let cpu = self.info.cpu_usage();

        let mut json = heapless::String::<48>::new();
        write!(json, "{{ \"result\": {:.6} }}", cpu.as_f32())
            .map_err(|_| HandlerError::CustomError("cpu usage json overflow"))?;

        let out = roster.writer(id).ok_or("connection gone")?;
        Responder::new(out)
            .with_status(StatusCode::OK)
            .await?
            .chunked()
            .await?
            .chunk(json.as_bytes())
            .await?
            .finish()
            .await?;

        Ok(())
    }

    fn push_memory(&self, roster: &mut Roster) {
        let memory = self.info.memory();
        let used = AsciiInt::from(memory.used as u64);
        let sent = roster.broadcast_text(None, used.as_str().as_bytes());
        trace!("pushed memory use to {} clients", sent);
    }
}

impl<R: DocumentRoot, I: SystemInfo> Dispatcher for DeviceDispatcher<R, I> {
    type State = Settings;

    async fn dispatch(
        &self,
        settings: &mut Settings,
        event: Event<'_>,
        roster: &mut Roster,
    ) -> Result<(), HandlerError> {
        match event {
            Event::Request(id, req) => match req.path {
                "/save" => self.save(settings, id, req, roster).await,
                "/get_cpu_usage" => self.cpu_usage(id, roster).await,
                _ => {
                    let out = roster.writer(id).ok_or("connection gone")?;
                    files::serve(&self.root, req, out, |name, buf| settings.include(name, buf))
                        .await?;
                    Ok(())
                }
            },
            Event::Timer(PUSH_TIMER) => {
                self.push_memory(roster);
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(feature = "std")]
pub use self::host::{DeviceConfig, run};

#[cfg(feature = "std")]
mod host {
    use std::path::PathBuf;
    use std::string::String;

    use core::time::Duration;

    use super::{DeviceDispatcher, PUSH_TIMER, Settings};
    use crate::event::SourceError;
    use crate::files::{DocumentRoot, FsRoot};
    use crate::platform::{HostInfo, TokioClock};
    use crate::reactor::Reactor;
    use crate::server::TcpEventSource;

    /// Startup configuration of the control panel.
    #[derive(Debug, Clone)]
    pub struct DeviceConfig {
        /// Address to listen on
        pub listen: String,
        /// Directory documents are served from, must exist
        pub web_root: PathBuf,
        /// Longest a poll may wait for network activity
        pub poll_wait: Duration,
        /// Pause between loop iterations
        pub idle: Duration,
        /// Period of the memory push in milliseconds
        pub push_period_ms: u64,
    }

    impl Default for DeviceConfig {
        fn default() -> Self {
            Self {
                listen: String::from("0.0.0.0:8000"),
                web_root: PathBuf::from("web_root"),
                poll_wait: Duration::from_millis(1000),
                idle: Duration::ZERO,
                push_period_ms: 1000,
            }
        }
    }

    /// Run the control panel until its event source fails.  A missing document root or a port
    /// that cannot be bound ends it straight away.
    pub async fn run(config: DeviceConfig) -> SourceError {
        let root = FsRoot::new(&config.web_root);
        if !root.exists() {
            error!("Cannot find web_root directory, exiting...");
            return SourceError::DocumentRoot;
        }

        let source = match TcpEventSource::bind(&config.listen).await {
            Ok(source) => source,
            Err(e) => {
                error!("Cannot bind to {}", config.listen);
                return e;
            }
        };
        info!("Starting web server on {}", config.listen);

        let dispatcher = DeviceDispatcher::new(root, HostInfo::default());
        let mut reactor = Reactor::new(source, dispatcher, Settings::default(), TokioClock::default())
            .with_wait(config.poll_wait)
            .with_idle(config.idle)
            .every(PUSH_TIMER, config.push_period_ms);

        reactor.run().await
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use std::string::String;

    use super::*;
    use crate::files::MemoryRoot;
    use crate::platform::{CpuUsage, FixedInfo, MemoryInfo};

    fn dispatcher() -> DeviceDispatcher<MemoryRoot, FixedInfo> {
        let root = MemoryRoot::new().with_file(
            "index.shtml",
            b"<input value=\"<!--#call setting1 -->\"><!--#call setting2 --><!--#call nope -->",
        );
        let info = FixedInfo {
            memory: MemoryInfo {
                total: 65536,
                used: 12345,
                max_used: 20000,
            },
            cpu: CpuUsage {
                major: 12,
                minor: 5,
            },
        };
        DeviceDispatcher::new(root, info)
    }

    async fn request(
        dispatcher: &DeviceDispatcher<MemoryRoot, FixedInfo>,
        settings: &mut Settings,
        raw: &[u8],
    ) -> String {
        let mut roster = Roster::default();
        let id = roster.open("127.0.0.1:4000", 0);
        let req = Request::parse(raw).unwrap();
        dispatcher
            .dispatch(settings, Event::Request(id, &req), &mut roster)
            .await
            .unwrap();
        String::from_utf8(roster.get(id).unwrap().outbox.as_slice().to_vec()).unwrap()
    }

    fn save_request(body: &str) -> std::vec::Vec<u8> {
        std::format!(
            "POST /save HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        )
        .into_bytes()
    }

    #[tokio::test]
    async fn test_save_redirects_and_stores() {
        let d = dispatcher();
        let mut settings = Settings::default();

        let reply = request(&d, &mut settings, &save_request("setting1=a+b%21&setting2=x")).await;
        assert_eq!(
            reply,
            "HTTP/1.1 302 Found\r\nLocation: /\r\nContent-Length: 0\r\n\r\n"
        );
        assert_eq!(settings.setting1.as_str(), "a b!");
        assert_eq!(settings.setting2.as_str(), "x");

        // a field missing from the form empties the setting
        request(&d, &mut settings, &save_request("setting2=y")).await;
        assert_eq!(settings.setting1.as_str(), "");
        assert_eq!(settings.setting2.as_str(), "y");
    }

    #[tokio::test]
    async fn test_save_truncates_to_capacity() {
        let d = dispatcher();
        for len in [0usize, 1, 98, 99, 100, 250] {
            let mut settings = Settings::default();
            let value = "s".repeat(len);
            let body = std::format!("setting1={}&setting2={}", value, value);
            request(&d, &mut settings, &save_request(&body)).await;

            let expected = len.min(SETTING_CAPACITY);
            assert_eq!(settings.setting1.as_str(), &value[..expected]);
            assert_eq!(settings.setting2.len(), expected);
        }

        // a multibyte character straddling the limit is dropped whole
        let mut settings = Settings::default();
        let body = std::format!("setting1={}%C3%A9", "s".repeat(98));
        request(&d, &mut settings, &save_request(&body)).await;
        assert_eq!(settings.setting1.as_str(), "s".repeat(98));
    }

    #[tokio::test]
    async fn test_cpu_usage_is_chunked_json() {
        let d = dispatcher();
        let mut settings = Settings::default();
        let reply = request(&d, &mut settings, b"GET /get_cpu_usage HTTP/1.1\r\n\r\n").await;

        let expected = "HTTP/1.1 200 OK\r
Transfer-Encoding: chunked\r
\r
17\r
{ \"result\": 12.050000 }\r
0\r
\r
";
        assert_eq!(reply, expected, "oops, got:\n{}", reply);
    }

    #[tokio::test]
    async fn test_includes_are_escaped() {
        let d = dispatcher();
        let mut settings = Settings::default();
        request(
            &d,
            &mut settings,
            &save_request("setting1=%3Cb%3E%22hi%22&setting2=fish+%26+chips"),
        )
        .await;

        let reply = request(&d, &mut settings, b"GET / HTTP/1.1\r\n\r\n").await;
        assert!(
            reply.ends_with("<input value=\"&lt;b&gt;&quot;hi&quot;\">fish &amp; chips"),
            "oops, got:\n{}",
            reply
        );
    }

    #[tokio::test]
    async fn test_push_reaches_websocket_clients_only() {
        let d = dispatcher();
        let mut settings = Settings::default();
        let mut roster = Roster::default();
        let listener = roster.open_listener("0.0.0.0:8000", 0);
        let plain = roster.open("10.0.0.1:1", 0);
        let ws = roster.open("10.0.0.2:1", 0);
        roster.get_mut(ws).unwrap().flags.websocket = true;

        d.dispatch(&mut settings, Event::Timer(PUSH_TIMER), &mut roster)
            .await
            .unwrap();

        assert_eq!(
            roster.get(ws).unwrap().outbox.as_slice(),
            b"\x81\x0512345"
        );
        assert!(roster.get(plain).unwrap().outbox.is_empty());
        assert!(roster.get(listener).unwrap().outbox.is_empty());
    }
}
