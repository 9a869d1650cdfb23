//! Interactive console for the eventlite demos.  Reads commands from stdin, one per line.
//!
//! Log verbosity follows `RUST_LOG`, `info` when unset.

use std::io::BufRead;
use std::sync::Arc;

use eventlite::console::Console;
use tracing_subscriber::EnvFilter;

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();

    let console = Console::from_env(Arc::new(|line: &str| println!("{}", line))).exit_on_fatal(true);
    console.execute("help");

    for line in std::io::stdin().lock().lines() {
        match line {
            Ok(line) => console.execute(line.trim()),
            Err(e) => {
                eprintln!("stdin: {}", e);
                break;
            }
        }
    }
}
