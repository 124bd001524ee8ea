//! Component D: for every inbound `connrequestv2` channel, decide whether
//! this hop forwards one step further down the chain or is the exit that
//! performs the real TCP connect, then keep the circuit's bytes moving
//! until either side is done with it.

use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;

use tracing::{info, warn};

use carrier::{ClientSelector, InboundChannel, CONNECT_CHANNEL_KIND, RESOLVE_CHANNEL_KIND};
use scrambler::LayeredStream;
use wire::{ConnectRequest, HostnameQuery, ResolveResponse, StatusByte, TargetHeader};

use crate::error::RelayError;
use crate::splice::splice_bidirectional;

/// Decrypts bytes read from `inner` with one `LayeredStream` before handing
/// them onward — exactly the transform an intermediate applies to each
/// direction it forwards, without re-encrypting under its own key.
struct DecryptingReader<C> {
    inner: C,
    stream: LayeredStream,
}

impl<C: Read> Read for DecryptingReader<C> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.stream.xor_in_place(&mut buf[..n]);
        Ok(n)
    }
}

/// Distinguishes the two circuit purposes a chain can carry. Intermediates
/// treat both identically (opaque byte forwarding); only the exit's
/// behavior, and the channel kind re-opened at each hop, differs.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CircuitKind {
    Connect,
    Resolve,
}

impl CircuitKind {
    fn channel_kind(self) -> &'static str {
        match self {
            CircuitKind::Connect => CONNECT_CHANNEL_KIND,
            CircuitKind::Resolve => RESOLVE_CHANNEL_KIND,
        }
    }
}

pub struct HopRouter {
    selector: Arc<dyn ClientSelector>,
    kind: CircuitKind,
}

impl HopRouter {
    pub fn new(selector: Arc<dyn ClientSelector>, kind: CircuitKind) -> Self {
        HopRouter { selector, kind }
    }

    /// Handles one inbound channel to completion. Blocks until the circuit
    /// this channel belongs to finishes; callers run one of these per
    /// inbound channel, typically on its own thread.
    pub fn handle(&self, inbound: Box<dyn InboundChannel>) -> Result<(), RelayError> {
        let request = ConnectRequest::read(&mut &inbound.extra_data()[..])?;

        if request.is_exit() {
            self.run_exit(inbound)
        } else {
            self.run_intermediate(inbound, request)
        }
    }

    fn run_intermediate(&self, inbound: Box<dyn InboundChannel>, request: ConnectRequest) -> Result<(), RelayError> {
        let next = request.advance();

        let handle = match self.selector.select_client() {
            Some(handle) => handle,
            None => {
                let _ = inbound.reject("no-client", "no downstream carrier client available");
                return Err(RelayError::NoClient);
            }
        };

        let mut payload = Vec::with_capacity(ConnectRequest::SIZE);
        next.write(&mut payload)?;
        let (mut server_channel, mut request_stream) = handle.open(self.kind.channel_kind(), &payload)?;
        request_stream.drain_and_discard()?;

        let mut client_channel = inbound.accept()?;

        let streams = scrambler::intermediate(&mut client_channel, &mut server_channel)?;

        let client_closer = client_channel.try_clone()?;
        let server_closer = server_channel.try_clone()?;
        let client_for_upstream = client_channel.try_clone()?;
        let server_for_upstream = server_channel.try_clone()?;

        let downstream_reader = DecryptingReader { inner: client_channel, stream: streams.client_to_server };
        let downstream_writer = server_channel;
        let upstream_reader = DecryptingReader { inner: server_for_upstream, stream: streams.server_to_client };
        let upstream_writer = client_for_upstream;

        info!(hotness = next.hotness, level = next.level, "relaying circuit one hop further");
        splice_bidirectional(downstream_reader, downstream_writer, upstream_reader, upstream_writer);

        let _ = client_closer.close();
        let _ = server_closer.close();
        Ok(())
    }

    fn run_exit(&self, inbound: Box<dyn InboundChannel>) -> Result<(), RelayError> {
        match self.kind {
            CircuitKind::Connect => self.run_exit_connect(inbound),
            CircuitKind::Resolve => self.run_exit_resolve(inbound),
        }
    }

    fn run_exit_connect(&self, inbound: Box<dyn InboundChannel>) -> Result<(), RelayError> {
        let channel = inbound.accept()?;
        let mut duplex = scrambler::terminate(channel)?;
        let target = TargetHeader::read(&mut duplex)?;

        let socket_addr = match target.socket_addr() {
            Ok(addr) => addr,
            Err(error) => {
                warn!(%error, "exit received an unroutable target header");
                StatusByte::Fail.write(&mut duplex)?;
                let _ = duplex.into_inner().close();
                return Ok(());
            }
        };

        let tcp = match TcpStream::connect(socket_addr) {
            Ok(tcp) => tcp,
            Err(error) => {
                warn!(%error, %socket_addr, "exit dial failed");
                StatusByte::Fail.write(&mut duplex)?;
                let _ = duplex.into_inner().close();
                return Ok(());
            }
        };

        StatusByte::Ok.write(&mut duplex)?;
        info!(%socket_addr, "exit connected, splicing circuit to target");

        let channel_closer = duplex.get_ref().try_clone()?;
        let (enc_reader, enc_writer) = duplex.split_with(|c| c.try_clone())?;

        let tcp_closer = tcp.try_clone()?;
        let tcp_reader = tcp.try_clone()?;
        let tcp_writer = tcp;

        splice_bidirectional(enc_reader, tcp_writer, tcp_reader, enc_writer);

        let _ = channel_closer.close();
        let _ = tcp_closer.shutdown(std::net::Shutdown::Both);
        Ok(())
    }

    /// A resolve circuit is a single request/response over the encrypted
    /// duplex, not a data-plane splice: one `HostnameQuery` in, one
    /// `ResolveResponse` out, then the channel closes.
    fn run_exit_resolve(&self, inbound: Box<dyn InboundChannel>) -> Result<(), RelayError> {
        let channel = inbound.accept()?;
        let mut duplex = scrambler::terminate(channel)?;
        let query = HostnameQuery::read(&mut duplex)?;

        let response = match (query.name.as_str(), 0u16).to_socket_addrs() {
            Ok(mut addrs) => match addrs.next() {
                Some(addr) => ResolveResponse::Found(addr.ip()),
                None => ResolveResponse::NotFound,
            },
            Err(_) => ResolveResponse::NetworkError,
        };

        info!(name = %query.name, ?response, "exit answered resolve request");
        response.write(&mut duplex)?;
        let _ = duplex.into_inner().close();
        Ok(())
    }
}
