//! STTP Cryptographic Primitives
//!
//! Building blocks for the sequential two-times pad: the SHA-256 chest
//! digest, XOR pad application, and key-material generation. Pure functions
//! with deterministic outputs, except [`fill_random`] which draws from the
//! operating system's CSPRNG.
//!
//! # Scheme
//!
//! Each chest on the wire is encrypted with the current key buffer treated
//! as a pad:
//!
//! ```text
//! key[0..32)   XOR digest field
//! key[32..L)   XOR payload field      (one combined pass, full key consumed)
//! key[0..L)    XOR next-key field     (same pad applied a second time)
//! ```
//!
//! The double application of the pad within a chest is the defining property
//! of the scheme, not an implementation accident. [`xor_split`] performs the
//! first pass, [`xor_in_place`] the second.

pub mod digest;
pub mod pad;

pub use digest::{DIGEST_LEN, digest};
pub use pad::{fill_random, xor_in_place, xor_split};
