//! Line oriented operator console.  Starts the demos, each on a thread of its own, and runs
//! throwaway HTTP test sessions.
//!
//! | command | effect |
//! |---|---|
//! | `mg_demo_cc4` | start the connected device demo |
//! | `mg_demo_wc` | start the websocket chat demo |
//! | `mg http s` | start the HTTP test server |
//! | `mg http c <url>` | fetch `url` once and print the reply |
//! | `help` | list commands |
//!
//! A demo runs until the process exits, starting it again only prints a notice.  There is at most
//! one test session, every `mg` command ends the previous one first.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use tokio::sync::oneshot;

use crate::client;
use crate::demo::chat::{self, ChatConfig};
use crate::demo::device::{self, DeviceConfig};
use crate::demo::hello::{HelloConfig, HelloDispatcher};
use crate::platform::{ManagerLock, TokioClock};
use crate::reactor::Reactor;
use crate::server::TcpEventSource;

/// Where console text goes, one line per call.
pub type Output = Arc<dyn Fn(&str) + Send + Sync>;

/// Overrides the device demo's document root.
pub const ENV_WEB_ROOT: &str = "EVENTLITE_WEB_ROOT";
/// Overrides the HTTP test server's port.
pub const ENV_TEST_PORT: &str = "EVENTLITE_TEST_PORT";

const MG_HTTP_USAGE: &str =
    "mg http <s:server|c:client <url>>       - start http `server` or http `client url` test";

const COMMANDS: [(&str, &str); 4] = [
    ("mg_demo_cc4", "start eventlite demo: connected device 4"),
    ("mg_demo_wc", "start eventlite demo: websocket chat"),
    ("mg", "eventlite test"),
    ("help", "list commands"),
];

struct Session {
    shutdown: oneshot::Sender<()>,
    thread: JoinHandle<()>,
}

/// The console.  Cheap to share between threads behind an `Arc`.
pub struct Console {
    out: Output,
    device: DeviceConfig,
    chat: ChatConfig,
    hello: HelloConfig,
    exit_on_fatal: bool,
    device_started: AtomicBool,
    chat_started: AtomicBool,
    session: ManagerLock<Option<Session>>,
}

impl Console {
    /// A console with default demo configurations writing to `out`.
    pub fn new(out: Output) -> Self {
        Self {
            out,
            device: DeviceConfig::default(),
            chat: ChatConfig::default(),
            hello: HelloConfig::default(),
            exit_on_fatal: false,
            device_started: AtomicBool::new(false),
            chat_started: AtomicBool::new(false),
            session: ManagerLock::new(None),
        }
    }

    /// Like [`Console::new`] with [`ENV_WEB_ROOT`] and [`ENV_TEST_PORT`] applied.
    pub fn from_env(out: Output) -> Self {
        let mut console = Self::new(out);

        if let Some(root) = std::env::var_os(ENV_WEB_ROOT) {
            console.device.web_root = PathBuf::from(root);
        }
        if let Ok(port) = std::env::var(ENV_TEST_PORT) {
            match port.parse() {
                Ok(port) => console.hello.port = port,
                Err(_) => warn!("ignoring {}={}, not a port number", ENV_TEST_PORT, port),
            }
        }

        console
    }

    /// Replace the device demo configuration.
    pub fn with_device(mut self, config: DeviceConfig) -> Self {
        self.device = config;
        self
    }

    /// Replace the chat demo configuration.
    pub fn with_chat(mut self, config: ChatConfig) -> Self {
        self.chat = config;
        self
    }

    /// Replace the HTTP test server configuration.
    pub fn with_hello(mut self, config: HelloConfig) -> Self {
        self.hello = config;
        self
    }

    /// End the process when a demo cannot start or its event source fails.
    pub fn exit_on_fatal(mut self, exit: bool) -> Self {
        self.exit_on_fatal = exit;
        self
    }

    fn print(&self, line: &str) {
        (self.out)(line);
    }

    /// Run one command line.
    pub fn execute(&self, line: &str) {
        let args: Vec<&str> = line.split_whitespace().collect();
        let Some(&command) = args.first() else {
            return;
        };

        match command {
            "mg_demo_cc4" => self.start_device(),
            "mg_demo_wc" => self.start_chat(),
            "mg" => self.mg(&args[1..]),
            "help" => {
                for (name, about) in COMMANDS {
                    self.print(&format!("{:<16}- {}", name, about));
                }
            }
            _ => self.print(&format!("{}: command not found.", command)),
        }
    }

    fn start_device(&self) {
        if self
            .device_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.print("already start eventlite demo: connected device 4");
            return;
        }

        let config = self.device.clone();
        let exit = self.exit_on_fatal;
        if !self.spawn("mg_demo_cc4", move || {
            if let Some(e) = block_on(device::run(config)) {
                fatal(exit, e);
            }
        }) {
            self.device_started.store(false, Ordering::Release);
        }
    }

    fn start_chat(&self) {
        if self
            .chat_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.print("already start eventlite demo: websocket chat");
            return;
        }

        let config = self.chat.clone();
        let exit = self.exit_on_fatal;
        let out = self.out.clone();
        if !self.spawn("mg_demo_wc", move || {
            if let Some(e) = block_on(chat::run(config, move |line: &str| out(line))) {
                fatal(exit, e);
            }
        }) {
            self.chat_started.store(false, Ordering::Release);
        }
    }

    fn spawn<F: FnOnce() + Send + 'static>(&self, name: &str, body: F) -> bool {
        match thread::Builder::new().name(name.into()).spawn(body) {
            Ok(_) => true,
            Err(e) => {
                warn!("spawning {} failed: {}", name, e);
                self.print("Warning: NO memory.");
                false
            }
        }
    }

    fn usage(&self) {
        self.print("Usage:");
        self.print(MG_HTTP_USAGE);
        self.print("");
    }

    fn mg(&self, args: &[&str]) {
        let Some(&operator) = args.first() else {
            self.usage();
            return;
        };

        let mut session = self.session.lock();
        if let Some(last) = session.take() {
            let _ = last.shutdown.send(());
            if last.thread.join().is_err() {
                warn!("test session thread panicked");
            }
        }

        match (operator, args.get(1).copied(), args.get(2).copied()) {
            ("http", Some("s"), _) => *session = self.http_server(),
            ("http", Some("c"), Some(url)) => *session = self.http_client(url),
            ("http", _, _) => self.print(&format!("Usage: {}.", MG_HTTP_USAGE)),
            _ => self.usage(),
        }
    }

    fn http_server(&self) -> Option<Session> {
        let listener = match std::net::TcpListener::bind(("0.0.0.0", self.hello.port)) {
            Ok(listener) => listener,
            Err(e) => {
                self.print(&format!("Failed to create listener: {}", e));
                return None;
            }
        };
        if let Ok(addr) = listener.local_addr() {
            self.print(&format!("Server address: http://{}/", addr));
        }

        let config = self.hello;
        let (shutdown, stop) = oneshot::channel();
        let thread = self.spawn_session(move || {
            let _ = block_on(async move {
                let source = match TcpEventSource::from_std(listener) {
                    Ok(source) => source,
                    Err(e) => {
                        error!("test server failed: {:?}", e);
                        return;
                    }
                };
                let mut reactor =
                    Reactor::new(source, HelloDispatcher, (), TokioClock::default())
                        .with_wait(config.poll_wait)
                        .with_idle(config.idle);

                tokio::select! {
                    _ = reactor.run() => {}
                    _ = stop => debug!("test server stopped"),
                }
            });
        })?;

        Some(Session { shutdown, thread })
    }

    fn http_client(&self, url: &str) -> Option<Session> {
        self.print(&format!("Http client request url: {}", url));

        let url = url.to_owned();
        let out = self.out.clone();
        let (shutdown, stop) = oneshot::channel();
        let thread = self.spawn_session(move || {
            let _ = block_on(async move {
                tokio::select! {
                    reply = client::get(&url) => match reply {
                        Ok(text) => out(&text),
                        Err(e) => out(&format!("Http client error: {:?}", e)),
                    },
                    _ = stop => {}
                }
                out("session close");
            });
        })?;

        Some(Session { shutdown, thread })
    }

    fn spawn_session<F: FnOnce() + Send + 'static>(&self, body: F) -> Option<JoinHandle<()>> {
        match thread::Builder::new().name("mg_test_poll".into()).spawn(body) {
            Ok(thread) => Some(thread),
            Err(e) => {
                warn!("spawning test session failed: {}", e);
                self.print("Warning: NO memory.");
                None
            }
        }
    }
}

impl Drop for Console {
    fn drop(&mut self) {
        if let Some(last) = self.session.lock().take() {
            let _ = last.shutdown.send(());
            let _ = last.thread.join();
        }
    }
}

/// Drive `fut` to completion on a current thread runtime of the calling thread.
fn block_on<F: Future>(fut: F) -> Option<F::Output> {
    match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => Some(rt.block_on(fut)),
        Err(e) => {
            error!("runtime setup failed: {}", e);
            None
        }
    }
}

fn fatal(exit: bool, e: crate::event::SourceError) {
    error!("demo stopped: {:?}", e);
    if exit {
        std::process::exit(1);
    }
}
