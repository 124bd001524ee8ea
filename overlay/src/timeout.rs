//! The handshake-timeout watchdog mentioned in the concurrency model: the
//! carrier exposes no read/write deadlines (Open Question iii), so bounding
//! how long a stalled handshake can block a caller means racing the
//! handshake itself against a timer on its own thread.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// Runs `f` on a new thread and waits up to `timeout` for it to finish.
/// `f` keeps running to completion even if this returns `TimedOut` first —
/// there is no way to cancel a blocking read/write mid-flight — but the
/// caller treats the underlying channel as lost and tears it down.
pub fn run_with_timeout<T, F>(timeout: Duration, f: F) -> Result<T, TimedOut>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(f());
    });
    rx.recv_timeout(timeout).map_err(|_| TimedOut)
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct TimedOut;

impl std::fmt::Display for TimedOut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("handshake timed out")
    }
}

impl std::error::Error for TimedOut {}
