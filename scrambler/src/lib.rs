//! The onion cipher (components A and B) and the three-parallel-ECDH
//! scrambling handshake that seeds it (component C).
//!
//! Three roles drive the handshake: [`initiate`] for the client building the
//! circuit, [`intermediate`] for every relay hop in between, and
//! [`terminate`] for the exit hop. All three speak nothing but
//! `wire::CryptoRecord`s over whatever duplex channel the caller hands them.

pub mod cipher;
pub mod machine;

pub use cipher::{
    KeyStream, LayeredStream, DIRECTION_CLIENT_TO_SERVER, DIRECTION_SERVER_TO_CLIENT,
};
pub use machine::{
    initiate, intermediate, terminate, EncryptedDuplex, EncryptedReader, EncryptedWriter,
    IntermediateStreams, ScramblerError,
};
