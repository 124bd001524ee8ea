//! The three-parallel-ECDH scrambling handshake (component C): `initiate`,
//! `intermediate` and `terminate` drive the client, relay and exit roles
//! respectively. All three exchange fixed-width `wire::CryptoRecord`s with no
//! extra framing, matching the act-based shape of a classic three-message
//! Noise handshake, except the "acts" here are records of three group
//! elements rather than a single ephemeral key.

use std::io::{self, Read, Write};

use rand_core::OsRng;
use thiserror::Error;
use tracing::{debug, warn};
use wire::{CryptoRecord, WireError, GROUP_ELEMENT_SIZE};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::cipher::{
    KeyStream, LayeredStream, DIRECTION_CLIENT_TO_SERVER, DIRECTION_SERVER_TO_CLIENT,
};

#[derive(Debug, Error)]
pub enum ScramblerError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("wire framing error: {0}")]
    Wire(#[from] WireError),
    #[error("scalar multiplication produced a degenerate (low-order) shared secret")]
    DegenerateSharedSecret,
}

/// A reader half wrapped with one `LayeredStream`, used for the symmetric
/// duplex returned to an initiator or an endpoint. Writers are handled the
/// same way but need a scratch buffer since `Write::write` takes `&[u8]`.
pub struct EncryptedDuplex<S> {
    inner: S,
    read_stream: LayeredStream,
    write_stream: LayeredStream,
    scratch: Vec<u8>,
}

impl<S: Read + Write> EncryptedDuplex<S> {
    fn new(inner: S, read_stream: LayeredStream, write_stream: LayeredStream) -> Self {
        EncryptedDuplex { inner, read_stream, write_stream, scratch: Vec::new() }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Splits a duplex into an independently owned reader and writer, for
    /// callers that need to drive the two directions from separate threads
    /// (every relay hop does, once bulk splicing starts). `clone_inner`
    /// produces a second handle onto the same underlying channel — e.g.
    /// `TcpStream::try_clone` or `carrier::Channel::try_clone` — which the
    /// writer half takes over while the reader half keeps the original.
    pub fn split_with<F>(self, clone_inner: F) -> io::Result<(EncryptedReader<S>, EncryptedWriter<S>)>
    where
        F: FnOnce(&S) -> io::Result<S>,
    {
        let write_handle = clone_inner(&self.inner)?;
        Ok((
            EncryptedReader { inner: self.inner, stream: self.read_stream },
            EncryptedWriter { inner: write_handle, stream: self.write_stream, scratch: Vec::new() },
        ))
    }
}

/// The read half of a split [`EncryptedDuplex`].
pub struct EncryptedReader<S> {
    inner: S,
    stream: LayeredStream,
}

impl<S: Read> Read for EncryptedReader<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.stream.xor_in_place(&mut buf[..n]);
        Ok(n)
    }
}

/// The write half of a split [`EncryptedDuplex`].
pub struct EncryptedWriter<S> {
    inner: S,
    stream: LayeredStream,
    scratch: Vec<u8>,
}

impl<S: Write> Write for EncryptedWriter<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.scratch.clear();
        self.scratch.extend_from_slice(buf);
        self.stream.xor_in_place(&mut self.scratch);
        self.inner.write_all(&self.scratch)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<S> EncryptedWriter<S> {
    pub fn get_ref(&self) -> &S {
        &self.inner
    }
}

impl<S: Read> Read for EncryptedDuplex<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.read_stream.xor_in_place(&mut buf[..n]);
        Ok(n)
    }
}

impl<S: Write> Write for EncryptedDuplex<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.scratch.clear();
        self.scratch.extend_from_slice(buf);
        self.write_stream.xor_in_place(&mut self.scratch);
        self.inner.write_all(&self.scratch)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Generates a fresh scalar, rejecting it only if the derived base-point
/// public key would be degenerate. X25519's Montgomery ladder always
/// produces *some* output for scalar multiplication against valid points, so
/// the meaningful rejection happens at `diffie_hellman` time via
/// `was_contributory`; base-point multiplication here can't itself fail, but
/// we keep the loop shape from the original three-parallel-ECDH handshake in
/// case a future group choice needs it.
fn fresh_scalar() -> (StaticSecret, PublicKey) {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);
    (secret, public)
}

fn scalar_mult(secret: &StaticSecret, point: &[u8; GROUP_ELEMENT_SIZE]) -> Result<[u8; 32], ScramblerError> {
    let shared = secret.diffie_hellman(&PublicKey::from(*point));
    if !shared.was_contributory() {
        warn!("scalar multiplication produced a degenerate shared secret, rejecting handshake");
        return Err(ScramblerError::DegenerateSharedSecret);
    }
    Ok(*shared.as_bytes())
}

fn directional_streams(keys: &[[u8; 32]]) -> (LayeredStream, LayeredStream) {
    let c2s = keys.iter().map(|k| KeyStream::new(k, DIRECTION_CLIENT_TO_SERVER)).collect();
    let s2c = keys.iter().map(|k| KeyStream::new(k, DIRECTION_SERVER_TO_CLIENT)).collect();
    (LayeredStream::new(c2s), LayeredStream::new(s2c))
}

/// Client-side role. Generates three fresh scalars, sends their base-point
/// public keys, reads the peer's reply record, and derives three session
/// keys by scalar-multiplying each returned slot with the matching private
/// scalar. Returns a duplex whose reads are decrypted with the
/// server-to-client stream and whose writes are encrypted with the
/// client-to-server stream.
pub fn initiate<S: Read + Write>(mut channel: S) -> Result<EncryptedDuplex<S>, ScramblerError> {
    let mut secrets = Vec::with_capacity(3);
    let mut record = CryptoRecord::zero();
    for slot in record.slots.iter_mut() {
        let (secret, public) = fresh_scalar();
        *slot = public.to_bytes();
        secrets.push(secret);
    }

    record.write(&mut channel)?;
    let reply = CryptoRecord::read(&mut channel)?;

    let mut keys = Vec::with_capacity(3);
    for (secret, slot) in secrets.iter().zip(reply.slots.iter()) {
        keys.push(scalar_mult(secret, slot)?);
    }

    let (c2s, s2c) = directional_streams(&keys);
    debug!("initiator handshake complete");
    Ok(EncryptedDuplex::new(channel, s2c, c2s))
}

/// Exit-side role, symmetric to `initiate`: reads the client's record first,
/// then replies with its own fresh base-point public keys, then derives
/// session keys the same way. Reads are decrypted with client-to-server,
/// writes encrypted with server-to-client.
pub fn terminate<S: Read + Write>(mut channel: S) -> Result<EncryptedDuplex<S>, ScramblerError> {
    let incoming = CryptoRecord::read(&mut channel)?;

    let mut secrets = Vec::with_capacity(3);
    let mut reply = CryptoRecord::zero();
    for slot in reply.slots.iter_mut() {
        let (secret, public) = fresh_scalar();
        *slot = public.to_bytes();
        secrets.push(secret);
    }
    reply.write(&mut channel)?;

    let mut keys = Vec::with_capacity(3);
    for (secret, slot) in secrets.iter().zip(incoming.slots.iter()) {
        keys.push(scalar_mult(secret, slot)?);
    }

    let (c2s, s2c) = directional_streams(&keys);
    debug!("terminator handshake complete");
    Ok(EncryptedDuplex::new(channel, c2s, s2c))
}

/// Both directional streams an intermediate needs to peel and re-apply
/// exactly its own layer of the onion cipher. Unlike the endpoint roles,
/// an intermediate never gets a full symmetric duplex: it only terminates
/// slots 0 and 1 of the handshake, and the bytes it forwards after
/// decrypting are *not* re-encrypted at this hop (see DESIGN.md).
pub struct IntermediateStreams {
    /// Decrypts bytes arriving from the client before they're forwarded
    /// (still enciphered under every other hop's layer) to the server.
    pub client_to_server: LayeredStream,
    /// Decrypts bytes arriving from the server before they're forwarded to
    /// the client.
    pub server_to_client: LayeredStream,
}

/// Relay role. `client` and `server` are the two carrier channels either
/// side of this hop. Must complete the downstream pass (read-client,
/// write-server) before starting the upstream pass (read-server,
/// write-client); doing it in the other order deadlocks a chain with more
/// than one intermediate.
pub fn intermediate<C: Read + Write, Sv: Read + Write>(
    client: &mut C,
    server: &mut Sv,
) -> Result<IntermediateStreams, ScramblerError> {
    let cltk = StaticSecret::random_from_rng(OsRng);
    let srvk = StaticSecret::random_from_rng(OsRng);
    let salt = StaticSecret::random_from_rng(OsRng);
    let salt2 = StaticSecret::random_from_rng(OsRng);

    // Downstream pass: [A, B, X] -> [B, C, X], scrambled.
    let mut record = CryptoRecord::read(client)?;
    let k0 = scalar_mult(&cltk, &record.slots[0])?;

    record.slots[0] = record.slots[1];
    record.slots[1] = PublicKey::from(&srvk).to_bytes();

    record.slots[0] = scalar_mult(&salt, &record.slots[0])?;
    record.slots[2] = scalar_mult(&salt2, &record.slots[2])?;

    record.write(server)?;

    // Upstream pass: [B', C, X'] -> [A, B, X], scrambled.
    let mut reply = CryptoRecord::read(server)?;
    let k1 = scalar_mult(&srvk, &reply.slots[1])?;

    reply.slots[1] = reply.slots[0];
    reply.slots[0] = PublicKey::from(&cltk).to_bytes();

    reply.slots[1] = scalar_mult(&salt, &reply.slots[1])?;
    reply.slots[2] = scalar_mult(&salt2, &reply.slots[2])?;

    reply.write(client)?;

    let keys = [k0, k1];
    let (c2s, s2c) = directional_streams(&keys);
    debug!("intermediate handshake complete");
    Ok(IntermediateStreams { client_to_server: c2s, server_to_client: s2c })
}
