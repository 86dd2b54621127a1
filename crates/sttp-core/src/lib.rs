//! STTP Protocol Engine
//!
//! The sequential two-times pad: a symmetric scheme that frames a byte
//! stream into fixed-size chests, each carrying an encrypted payload, an
//! integrity digest, and the freshly generated key for the next chest.
//!
//! # Wire format
//!
//! Per message: a 4-byte big-endian length header, then
//! `ceil(len / msg_capacity)` chests of `2 * L` bytes each for a key of
//! length `L`:
//!
//! ```text
//! [digest: 32][payload: L - 32][next key: L]
//! ```
//!
//! The digest and payload fields are XOR-encrypted with one pass over the
//! key; the next-key field reuses the same full pad a second time. Both
//! applications are deliberate properties of the scheme and are preserved
//! exactly.
//!
//! # Key lifecycle
//!
//! ```text
//! key file ──► KeyMaterial ──► Tunnel (send/receive) ──► rotated per chest
//!     ▲                                                        │
//!     └───────────────── save_keys / close ◄──────────────────┘
//! ```
//!
//! Each endpoint loads the same key pair; the first send or receive fixes
//! the endpoint's role and assigns the two keys to their lanes, which then
//! evolve independently. Persisting both buffers at session end lets the
//! ratchet continue on the next run. Divergent key state between endpoints
//! permanently desynchronizes a lane; there is no in-protocol recovery.
//!
//! # Scope
//!
//! This is a faithful engine for a non-standard scheme, not a hardened
//! protocol: no authenticated key exchange, no cross-session replay
//! protection beyond the key files, and no forward-secrecy guarantee
//! beyond the ratchet itself.

pub mod chest;
pub mod error;
pub mod key;
pub mod tunnel;

pub use chest::{Chest, ChestLayout};
pub use error::{KeyError, ReceiveError, SendError};
pub use key::{
    DEFAULT_LOCAL_KEY_PATH, DEFAULT_MSG_CAPACITY, DEFAULT_REMOTE_KEY_PATH, KeyMaterial,
    KeyMaterialBuilder, MAX_KEY_LEN,
};
pub use sttp_crypto::DIGEST_LEN;
pub use tunnel::{HEADER_LEN, Role, Tunnel, TunnelBuilder};
