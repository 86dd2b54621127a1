//! Chest wire frame: the fixed-size unit of the tunnel protocol.
//!
//! One chest on the wire is exactly `2 * L` bytes for a key of length `L`:
//!
//! ```text
//! [digest: 32][payload: L - 32][next key: L]
//! ```
//!
//! This is a pure data holder; the fields carry whatever bytes the engine
//! put in them (encrypted on the wire, plaintext after the engine's XOR
//! pass). Encryption and integrity checking live in the tunnel.

use bytes::{Buf, BufMut};
use sttp_crypto::DIGEST_LEN;

/// Field sizes of a chest, all derived from one key length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChestLayout {
    key_len: usize,
}

impl ChestLayout {
    /// Layout for a key of `key_len` bytes.
    pub fn for_key_len(key_len: usize) -> Self {
        debug_assert!(key_len > DIGEST_LEN, "key must exceed the digest length");
        Self { key_len }
    }

    /// Key length `L` (also the next-key field size).
    pub fn key_len(self) -> usize {
        self.key_len
    }

    /// Payload field size (`L - DIGEST_LEN`).
    pub fn msg_capacity(self) -> usize {
        self.key_len - DIGEST_LEN
    }

    /// Total chest size on the wire (`2 * L`).
    pub fn chest_size(self) -> usize {
        self.key_len * 2
    }
}

/// One chest: digest, payload, and next-key fields.
///
/// The engine reuses a single `Chest` as its scratch space across a whole
/// message, so on the last chest the payload tail keeps bytes from the
/// previous iteration. That stale tail is part of the wire format and is
/// never zeroed; the receiver discards it past the true message length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chest {
    /// Integrity tag over the full payload field
    pub digest: [u8; DIGEST_LEN],
    /// Message bytes, padded to the layout's capacity
    pub payload: Vec<u8>,
    /// Replacement key for the lane, as long as the key itself
    pub next_key: Vec<u8>,
}

impl Chest {
    /// An all-zero chest sized for `layout`, ready for engine scratch use.
    pub fn zeroed(layout: ChestLayout) -> Self {
        Self {
            digest: [0u8; DIGEST_LEN],
            payload: vec![0u8; layout.msg_capacity()],
            next_key: vec![0u8; layout.key_len()],
        }
    }

    /// Write the three fields to `dst` in wire order.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_slice(&self.digest);
        dst.put_slice(&self.payload);
        dst.put_slice(&self.next_key);
    }

    /// Read one chest from `src`.
    ///
    /// The caller guarantees `src` holds at least `layout.chest_size()`
    /// bytes; the engine bulk-reads a whole message's chests before
    /// deframing them.
    pub fn read_from(src: &mut impl Buf, layout: ChestLayout) -> Self {
        debug_assert!(src.remaining() >= layout.chest_size(), "caller must bulk-read full chests");

        let mut chest = Self::zeroed(layout);
        src.copy_to_slice(&mut chest.digest);
        src.copy_to_slice(&mut chest.payload);
        src.copy_to_slice(&mut chest.next_key);
        chest
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn layout_from_key_len() {
        let layout = ChestLayout::for_key_len(48);
        assert_eq!(layout.key_len(), 48);
        assert_eq!(layout.msg_capacity(), 16);
        assert_eq!(layout.chest_size(), 96);
    }

    #[test]
    fn encode_produces_wire_order() {
        let layout = ChestLayout::for_key_len(DIGEST_LEN + 2);
        let chest = Chest {
            digest: [0xAA; DIGEST_LEN],
            payload: vec![0xBB, 0xCC],
            next_key: vec![0xDD; DIGEST_LEN + 2],
        };

        let mut wire = Vec::new();
        chest.encode(&mut wire);

        assert_eq!(wire.len(), layout.chest_size());
        assert_eq!(&wire[..DIGEST_LEN], [0xAA; DIGEST_LEN]);
        assert_eq!(&wire[DIGEST_LEN..DIGEST_LEN + 2], [0xBB, 0xCC]);
        assert_eq!(&wire[DIGEST_LEN + 2..], vec![0xDD; DIGEST_LEN + 2]);
    }

    proptest! {
        #[test]
        fn prop_chest_round_trip(
            key_len in (DIGEST_LEN + 1)..256usize,
            seed in any::<u8>(),
        ) {
            let layout = ChestLayout::for_key_len(key_len);
            let chest = Chest {
                digest: [seed; DIGEST_LEN],
                payload: (0..layout.msg_capacity()).map(|i| (i as u8).wrapping_add(seed)).collect(),
                next_key: (0..layout.key_len()).map(|i| (i as u8) ^ seed).collect(),
            };

            let mut wire = Vec::new();
            chest.encode(&mut wire);
            prop_assert_eq!(wire.len(), layout.chest_size());

            let mut src = Bytes::from(wire);
            let parsed = Chest::read_from(&mut src, layout);
            prop_assert_eq!(parsed, chest);
            prop_assert_eq!(src.remaining(), 0);
        }
    }
}
