//! A multi-hop onion-routing TCP forwarder built on top of a multiplexed,
//! authenticated carrier transport.
//!
//! This crate is a thin facade: the actual components live in their own
//! crates so each can be depended on independently —
//! [`wire`] for the binary framing, [`scrambler`] for the parallel-ECDH
//! handshake and stream cipher, [`carrier`] for the transport traits a
//! deployment's multiplexed connection manager must implement, [`onion`]
//! for per-hop routing and splicing, and [`overlay`] for the originator-side
//! `dial`/`resolve` API built on top of all four.

pub use carrier::{CarrierClient, CarrierError, Channel, ClientSelector, Handle, InboundChannel};
pub use onion::{CircuitKind, HopRouter, RelayError};
pub use overlay::{dial, resolve, Connection, OverlayConfig, OverlayError, ResolveError};
pub use scrambler::ScramblerError;
pub use wire::WireError;

#[cfg(test)]
mod tests {
    use super::*;
    use carrier::testing::{FixedSelector, LoopbackClient, LoopbackServer};
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::thread;
    use tracing::info;

    fn spawn_echo_server() -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 256];
                loop {
                    match stream.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        });
        addr
    }

    /// Smoke test for the facade itself: dials through a real `HopRouter`
    /// using only the re-exported names, with a subscriber installed so the
    /// crates' own `tracing` calls actually run instead of going nowhere.
    #[test]
    fn facade_dials_through_one_hop() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        info!("starting facade smoke test");

        let echo_addr = spawn_echo_server();
        let carrier_server = LoopbackServer::bind().unwrap();
        let carrier_addr = carrier_server.local_addr().unwrap();

        let router = HopRouter::new(Arc::new(FixedSelector(None)), CircuitKind::Connect);
        let router_thread = thread::spawn(move || {
            let inbound = carrier_server.accept_one().unwrap();
            router.handle(Box::new(inbound)).unwrap();
        });

        let selector = FixedSelector(Some(Arc::new(LoopbackClient::new(carrier_addr))));
        let config = OverlayConfig { level: 1, ..OverlayConfig::default() };

        let mut connection = dial(&config, &selector, "tcp", &echo_addr.to_string()).unwrap();
        connection.write_all(b"ping\n").unwrap();
        let mut buf = [0u8; 5];
        connection.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping\n");

        drop(connection);
        router_thread.join().unwrap();
    }
}
