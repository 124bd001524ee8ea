//! `KeyStream` and `LayeredStream`: the onion cipher primitives described as
//! components A and B. A `KeyStream` expands a session key into an infinite
//! pseudo-random byte sequence via SHAKE256; a `LayeredStream` XOR-chains
//! several of them together so that an endpoint holding N session keys and
//! an intermediate holding 2 of them can each apply exactly their share of
//! the overall cipher.

use sha3::digest::{ExtendableOutput, Update, XofReader};
use sha3::Shake256;
use std::fmt;

/// Read in blocks of at least this many bytes so that short writes on the
/// wrapped duplex don't force a fresh XOF squeeze per byte.
const BLOCK_SIZE: usize = 4096;

/// Sixteen-byte ASCII tags mixed into the SHAKE256 input so that the two
/// directions of one session, despite sharing the same underlying key,
/// never produce the same keystream.
pub const DIRECTION_CLIENT_TO_SERVER: &[u8; 16] = b"Client-to-Server";
pub const DIRECTION_SERVER_TO_CLIENT: &[u8; 16] = b"Server-to-Client";

/// A deterministic pseudo-random byte generator seeded by a session key.
/// Two `KeyStream`s seeded with the same key and direction tag produce
/// byte-identical output; this is what makes it usable as a stream cipher.
pub struct KeyStream {
    reader: Box<dyn XofReader + Send>,
    buf: [u8; BLOCK_SIZE],
    pos: usize,
    filled: usize,
}

impl fmt::Debug for KeyStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyStream").field("pos", &self.pos).finish_non_exhaustive()
    }
}

impl KeyStream {
    /// Seeds a keystream from `key` and a direction tag. `key` is the raw
    /// per-hop shared secret (see `wire::GROUP_ELEMENT_SIZE`); it is never
    /// reused directly as cipher material, only as SHAKE256 input.
    pub fn new(key: &[u8], direction: &[u8]) -> Self {
        let mut hasher = Shake256::default();
        hasher.update(key);
        hasher.update(direction);
        let reader: Box<dyn XofReader + Send> = Box::new(hasher.finalize_xof());
        KeyStream { reader, buf: [0u8; BLOCK_SIZE], pos: 0, filled: 0 }
    }

    fn refill(&mut self) {
        self.reader.read(&mut self.buf);
        self.pos = 0;
        self.filled = BLOCK_SIZE;
    }

    /// XORs `n` fresh keystream bytes into `buf` in place.
    pub fn xor_in_place(&mut self, buf: &mut [u8]) {
        for byte in buf.iter_mut() {
            if self.pos >= self.filled {
                self.refill();
            }
            *byte ^= self.buf[self.pos];
            self.pos += 1;
        }
    }
}

/// An ordered composition of `KeyStream`s. `xor_into` applies each stream in
/// turn so the result is `src XOR s1 XOR s2 XOR ... XOR sn`; because XOR is
/// associative and commutative only the *set* of keys, not their order,
/// needs to match on both sides, but by convention both sides use the same
/// order anyway.
pub struct LayeredStream {
    streams: Vec<KeyStream>,
}

impl LayeredStream {
    pub fn new(streams: Vec<KeyStream>) -> Self {
        LayeredStream { streams }
    }

    pub fn xor_into(&mut self, dst: &mut [u8], src: &[u8]) {
        dst.copy_from_slice(src);
        for stream in self.streams.iter_mut() {
            stream.xor_in_place(dst);
        }
    }

    pub fn xor_in_place(&mut self, buf: &mut [u8]) {
        for stream in self.streams.iter_mut() {
            stream.xor_in_place(buf);
        }
    }
}
