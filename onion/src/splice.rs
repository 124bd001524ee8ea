//! Component G: copy bytes between two duplex endpoints until either side
//! closes, propagating half-close in both directions.
//!
//! A splice is driven as two independent directions rather than as one
//! "two-endpoint" abstraction, because the reader and writer on each side
//! are frequently different concrete types (a plain `TcpStream` on the
//! exit's target side, a cipher-wrapped carrier channel on the circuit
//! side) with no common owning type to hand around.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::thread;
use tracing::{debug, warn};

const COPY_BUFFER_SIZE: usize = 8192;

/// Half-close capability for a splice destination. Implemented for the
/// handful of writer types a splice ever targets.
pub trait HalfClose {
    fn shutdown_write(&self) -> io::Result<()>;
}

impl HalfClose for TcpStream {
    fn shutdown_write(&self) -> io::Result<()> {
        self.shutdown(std::net::Shutdown::Write)
    }
}

impl HalfClose for Box<dyn carrier::Channel> {
    fn shutdown_write(&self) -> io::Result<()> {
        carrier::Channel::shutdown_write(self.as_ref())
    }
}

impl<S: HalfClose> HalfClose for scrambler::EncryptedWriter<S> {
    fn shutdown_write(&self) -> io::Result<()> {
        self.get_ref().shutdown_write()
    }
}

fn copy_until_eof(label: &'static str, mut reader: impl Read, mut writer: impl Write + HalfClose) {
    let mut buf = [0u8; COPY_BUFFER_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(error) => {
                warn!(direction = label, %error, "splice read failed");
                break;
            }
        };
        if let Err(error) = writer.write_all(&buf[..n]) {
            warn!(direction = label, %error, "splice write failed");
            break;
        }
    }
    debug!(direction = label, "splice direction drained");
    let _ = writer.shutdown_write();
}

/// Runs both directions of a splice to completion and blocks until both
/// have drained. One direction runs on a spawned thread, the other on the
/// calling thread; whichever finishes first half-closes its destination,
/// and the caller is expected to fully close both endpoints once this
/// returns (it does not own either endpoint, only the reader/writer views
/// onto them).
pub fn splice_bidirectional<R1, W1, R2, W2>(r1: R1, w1: W1, r2: R2, w2: W2)
where
    R1: Read + Send + 'static,
    W1: Write + HalfClose + Send + 'static,
    R2: Read + Send + 'static,
    W2: Write + HalfClose + Send + 'static,
{
    let forward = thread::Builder::new()
        .name("splice-fwd".into())
        .spawn(move || copy_until_eof("forward", r1, w1))
        .expect("failed to spawn splice thread");

    copy_until_eof("reverse", r2, w2);

    if forward.join().is_err() {
        warn!("forward splice thread panicked");
    }
}
