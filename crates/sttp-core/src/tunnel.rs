//! The STTP protocol engine.
//!
//! A `Tunnel` owns two [`KeyMaterial`] buffers and a blocking byte source,
//! byte sink, and diagnostic log sink. Outgoing messages are framed into
//! chests encrypted with the local key; incoming chests are validated and
//! decrypted with the remote key. Every processed chest replaces the lane's
//! key with the fresh key it carried, so the pad ratchets forward on both
//! sides in lockstep.
//!
//! Role assignment is implicit and happens exactly once: the first `send`
//! fixes this endpoint as the sender; the first `receive` swaps the two key
//! bindings instead, giving the two endpoints their independently evolving
//! lanes from identical key pairs.
//!
//! The engine is single-threaded and synchronous. `send` and `receive` run
//! to completion on the calling thread, blocking on I/O; no failure escapes
//! as a panic.

use std::{
    io::{self, Read, Write},
    time::{SystemTime, UNIX_EPOCH},
};

use bytes::{Bytes, BytesMut};
use sttp_crypto::{digest, fill_random, xor_in_place, xor_split};
use zeroize::Zeroizing;

use crate::{
    chest::{Chest, ChestLayout},
    error::{KeyError, ReceiveError, SendError},
    key::{DEFAULT_LOCAL_KEY_PATH, DEFAULT_REMOTE_KEY_PATH, KeyMaterial},
};

/// Size of the per-message length header on the wire.
pub const HEADER_LEN: usize = 4;

/// Which lane this endpoint settled into on first use.
///
/// Set exactly once; later calls never change it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    /// No send or receive has happened yet.
    #[default]
    Unset,
    /// First operation was a send; the local key encrypts outgoing chests.
    Sender,
    /// First operation was a receive; the key bindings were swapped once and
    /// the remote binding decrypts incoming chests.
    Receiver,
}

/// The protocol engine for one session.
///
/// Owns its two key buffers exclusively; rotation happens in place and is
/// order-dependent, so a `Tunnel` must never be shared between concurrent
/// actors. Run one engine per established connection.
pub struct Tunnel<R, W, L> {
    input: R,
    output: W,
    log: L,
    local: KeyMaterial,
    remote: KeyMaterial,
    role: Role,
}

/// Configures a [`Tunnel`] from its transport streams and key pair.
///
/// Keys not supplied explicitly are loaded from the well-known default
/// paths at build time.
pub struct TunnelBuilder<R, W, L> {
    input: R,
    output: W,
    log: L,
    local: Option<KeyMaterial>,
    remote: Option<KeyMaterial>,
}

impl<R: Read, W: Write, L: Write> TunnelBuilder<R, W, L> {
    /// Use `key` for the sending lane.
    pub fn local_key(mut self, key: KeyMaterial) -> Self {
        self.local = Some(key);
        self
    }

    /// Use `key` for the receiving lane.
    pub fn remote_key(mut self, key: KeyMaterial) -> Self {
        self.remote = Some(key);
        self
    }

    /// Finish configuration, loading any missing key from its default path.
    ///
    /// # Errors
    ///
    /// [`KeyError`] if a default key file is absent or invalid.
    pub fn build(self) -> Result<Tunnel<R, W, L>, KeyError> {
        let local = match self.local {
            Some(key) => key,
            None => KeyMaterial::load(DEFAULT_LOCAL_KEY_PATH)?,
        };
        let remote = match self.remote {
            Some(key) => key,
            None => KeyMaterial::load(DEFAULT_REMOTE_KEY_PATH)?,
        };

        Ok(Tunnel { input: self.input, output: self.output, log: self.log, local, remote, role: Role::Unset })
    }
}

impl<R: Read, W: Write, L: Write> Tunnel<R, W, L> {
    /// Start building a tunnel over the given transport streams.
    pub fn builder(input: R, output: W, log: L) -> TunnelBuilder<R, W, L> {
        TunnelBuilder { input, output, log, local: None, remote: None }
    }

    /// The lane this endpoint settled into, if any operation has run yet.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Key currently bound to the sending lane.
    pub fn local_key(&self) -> &KeyMaterial {
        &self.local
    }

    /// Key currently bound to the receiving lane.
    pub fn remote_key(&self) -> &KeyMaterial {
        &self.remote
    }

    /// Frame `message` into chests and write them to the output sink.
    ///
    /// Emits the 4-byte big-endian length header once, then
    /// `ceil(len / msg_capacity)` chests, flushing after each. An empty
    /// message sends the header alone. The local key rotates after every
    /// chest, whether or not its write succeeds; a transport failure is
    /// logged with progress counters and the key state is saved before
    /// returning.
    ///
    /// # Errors
    ///
    /// - [`SendError::MessageTooLarge`] if `message` exceeds the 4-byte
    ///   header bound (nothing is written, no key is consumed)
    /// - [`SendError::Io`] on transport write or flush failure
    pub fn send(&mut self, message: &[u8]) -> Result<(), SendError> {
        if self.role == Role::Unset {
            self.role = Role::Sender;
        }

        let Ok(msg_len) = u32::try_from(message.len()) else {
            return Err(SendError::MessageTooLarge { len: message.len(), max: u32::MAX });
        };

        let cap = self.local.msg_capacity();
        let layout = ChestLayout::for_key_len(self.local.len());
        let n_chests = message.len().div_ceil(cap);

        if let Err(source) = self.output.write_all(&msg_len.to_be_bytes()) {
            self.diagnose("length header write failed", 0, n_chests, 0, message.len());
            return Err(SendError::Io { chests_sent: 0, source });
        }
        if n_chests == 0 {
            if let Err(source) = self.output.flush() {
                self.diagnose("flush failed after header", 0, 0, 0, 0);
                return Err(SendError::Io { chests_sent: 0, source });
            }
            return Ok(());
        }

        // One Chest doubles as the scratch space for the whole message. The
        // payload buffer is not cleared between chests: the final chest's
        // tail past the message remainder keeps the previous iteration's
        // bytes, and that stale tail is part of the wire format.
        let mut scratch = Chest::zeroed(layout);
        let mut next_key = Zeroizing::new(vec![0u8; layout.key_len()]);
        let mut frame = BytesMut::with_capacity(layout.chest_size());
        let mut sent = 0usize;

        for chest_index in 0..n_chests {
            let take = cap.min(message.len() - sent);
            scratch.payload[..take].copy_from_slice(&message[sent..sent + take]);

            scratch.digest = digest(&scratch.payload);
            fill_random(&mut next_key);
            scratch.next_key.copy_from_slice(&next_key);

            // One pad pass over digest+payload, then the same pad in full
            // over the next key.
            xor_split(self.local.bytes(), &mut scratch.digest, &mut scratch.payload);
            xor_in_place(self.local.bytes(), &mut scratch.next_key);

            // The ratchet advances before the write: a failed chest still
            // consumed this key.
            self.local.rotate(&next_key);
            sent += take;

            frame.clear();
            scratch.encode(&mut frame);

            let written = self.output.write_all(&frame).and_then(|()| self.output.flush());
            if let Err(source) = written {
                self.diagnose("chest write failed", chest_index + 1, n_chests, sent, message.len());
                return Err(SendError::Io { chests_sent: chest_index, source });
            }
        }

        tracing::debug!(chests = n_chests, bytes = message.len(), "message sent");
        Ok(())
    }

    /// Read one message from the input source, validating and decrypting
    /// chest by chest.
    ///
    /// The remote key rotates only after a chest passes its integrity
    /// check, so an aborted receive leaves the lane resumable from the last
    /// validated chest. No partial message is ever returned.
    ///
    /// # Errors
    ///
    /// - [`ReceiveError::Io`] on a short read of the header or chest data
    /// - [`ReceiveError::Corrupted`] if any chest's digest does not match
    ///   its payload (tampering, noise, or a desynchronized key)
    pub fn receive(&mut self) -> Result<Vec<u8>, ReceiveError> {
        if self.role == Role::Unset {
            std::mem::swap(&mut self.local, &mut self.remote);
            self.role = Role::Receiver;
        }

        let mut header = [0u8; HEADER_LEN];
        if let Err(source) = self.input.read_exact(&mut header) {
            self.diagnose("length header read failed", 0, 0, 0, 0);
            return Err(ReceiveError::Io { source });
        }
        let msg_len = u32::from_be_bytes(header) as usize;

        let cap = self.remote.msg_capacity();
        let layout = ChestLayout::for_key_len(self.remote.len());
        let n_chests = msg_len.div_ceil(cap);

        let Some(wire_len) = n_chests.checked_mul(layout.chest_size()) else {
            self.diagnose("chest data length overflows", 0, n_chests, 0, msg_len);
            return Err(ReceiveError::Io {
                source: io::Error::new(io::ErrorKind::InvalidData, "chest data length overflows"),
            });
        };

        let mut wire = vec![0u8; wire_len];
        if let Err(source) = self.input.read_exact(&mut wire) {
            self.diagnose("chest data read failed", 0, n_chests, 0, msg_len);
            return Err(ReceiveError::Io { source });
        }
        let mut wire = Bytes::from(wire);

        let mut message = vec![0u8; msg_len];
        let mut copied = 0usize;

        for chest_index in 0..n_chests {
            let mut chest = Chest::read_from(&mut wire, layout);

            xor_split(self.remote.bytes(), &mut chest.digest, &mut chest.payload);
            xor_in_place(self.remote.bytes(), &mut chest.next_key);

            if chest.digest != digest(&chest.payload) {
                self.diagnose(
                    "integrity check failed: corrupted data or wrong key",
                    chest_index + 1,
                    n_chests,
                    copied,
                    msg_len,
                );
                return Err(ReceiveError::Corrupted { chest: chest_index + 1, total: n_chests });
            }

            // Only a validated chest advances the lane.
            self.remote.rotate(&chest.next_key);

            let take = cap.min(msg_len - copied);
            message[copied..copied + take].copy_from_slice(&chest.payload[..take]);
            copied += take;
        }

        tracing::debug!(chests = n_chests, bytes = msg_len, "message received");
        Ok(message)
    }

    /// Persist both keys to their files, in lane order.
    ///
    /// The first-receive swap is undone here: whichever buffer was loaded
    /// as "mine" returns to the local key file, and likewise for the
    /// remote. Before any role is fixed there is nothing to persist and the
    /// call succeeds trivially. I/O failure is non-fatal and reported as
    /// `false`.
    pub fn save_keys(&mut self) -> bool {
        let result = match self.role {
            Role::Unset => Ok(()),
            Role::Sender => KeyMaterial::pack_pair(&mut self.local, &mut self.remote),
            Role::Receiver => KeyMaterial::pack_pair(&mut self.remote, &mut self.local),
        };

        if let Err(error) = &result {
            tracing::warn!(%error, "key state save failed");
        }
        result.is_ok()
    }

    /// Save keys, flush the output and log sinks, and drop the streams.
    ///
    /// Returns `false` if the save or any flush failed; never panics.
    pub fn close(mut self) -> bool {
        let saved = self.save_keys();
        let output_ok = self.output.flush().is_ok();
        let log_ok = self.log.flush().is_ok();

        saved && output_ok && log_ok
    }

    /// Dismantle the tunnel and hand the streams back without saving keys.
    ///
    /// The explicit-abandon exit: callers that keep the streams alive take
    /// over responsibility for key-state persistence.
    pub fn into_parts(self) -> (R, W, L) {
        (self.input, self.output, self.log)
    }

    /// Write one structured diagnostic record to the log sink.
    ///
    /// Runs on every I/O or integrity failure, before the error returns.
    /// Saves key state first and reports the outcome; never exposes key
    /// bytes; swallows log-sink failures.
    fn diagnose(
        &mut self,
        issue: &str,
        chest: usize,
        chest_total: usize,
        byte: usize,
        byte_total: usize,
    ) {
        let keys_saved = self.save_keys();
        let timestamp =
            SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |elapsed| elapsed.as_secs());

        tracing::warn!(chest, chest_total, byte, byte_total, keys_saved, "{issue}");

        let _ = writeln!(self.log, "------------------------------------------------------------");
        let _ = writeln!(self.log, "{issue}");
        let _ = writeln!(self.log, "time:       {timestamp}");
        let _ = writeln!(self.log, "keys saved: {}", if keys_saved { "yes" } else { "no" });
        let _ = writeln!(self.log, "chests:     {chest}/{chest_total}");
        let _ = writeln!(self.log, "bytes:      {byte}/{byte_total}");
        let _ = self.log.flush();
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn test_key(capacity: usize, fill: u8) -> KeyMaterial {
        KeyMaterial::from_bytes(vec![fill; capacity + sttp_crypto::DIGEST_LEN]).unwrap()
    }

    /// Key with a backing file, so failure-path key saves stay in `dir`.
    fn backed_key(dir: &tempfile::TempDir, name: &str, capacity: usize, fill: u8) -> KeyMaterial {
        let mut key = test_key(capacity, fill);
        key.save_as(dir.path().join(name)).unwrap();
        key
    }

    fn sender_tunnel(
        wire: &mut Vec<u8>,
        cap: usize,
    ) -> Tunnel<io::Empty, &mut Vec<u8>, io::Sink> {
        Tunnel::builder(io::empty(), wire, io::sink())
            .local_key(test_key(cap, 0x11))
            .remote_key(test_key(cap, 0x22))
            .build()
            .unwrap()
    }

    #[test]
    fn first_send_fixes_sender_role() {
        let mut wire = Vec::new();
        let mut tunnel = sender_tunnel(&mut wire, 16);

        assert_eq!(tunnel.role(), Role::Unset);
        tunnel.send(b"hello").unwrap();
        assert_eq!(tunnel.role(), Role::Sender);
        // Key bindings were not swapped.
        assert_eq!(tunnel.remote_key().bytes(), vec![0x22; 48].as_slice());
    }

    #[test]
    fn first_receive_swaps_key_bindings() {
        let mut tunnel = Tunnel::builder(Cursor::new(vec![0u8; HEADER_LEN]), io::sink(), io::sink())
            .local_key(test_key(16, 0x11))
            .remote_key(test_key(16, 0x22))
            .build()
            .unwrap();

        // Zero-length message: header only, no chests to validate.
        let message = tunnel.receive().unwrap();
        assert!(message.is_empty());
        assert_eq!(tunnel.role(), Role::Receiver);
        assert_eq!(tunnel.remote_key().bytes(), vec![0x11; 48].as_slice());
        assert_eq!(tunnel.local_key().bytes(), vec![0x22; 48].as_slice());
    }

    #[test]
    fn empty_message_sends_header_only() {
        let mut wire = Vec::new();
        let mut tunnel = sender_tunnel(&mut wire, 16);
        tunnel.send(b"").unwrap();

        assert_eq!(wire, vec![0, 0, 0, 0]);
    }

    #[test]
    fn wire_size_matches_chest_count() {
        // cap 16 => L = 48, chest = 96; 20 bytes => 2 chests => 4 + 192.
        let mut wire = Vec::new();
        let mut tunnel = sender_tunnel(&mut wire, 16);
        tunnel.send(&[0xABu8; 20]).unwrap();

        assert_eq!(wire.len(), 196);
        assert_eq!(&wire[..HEADER_LEN], 20u32.to_be_bytes());
    }

    #[test]
    fn exact_multiple_produces_no_stray_chest() {
        let mut wire = Vec::new();
        let mut tunnel = sender_tunnel(&mut wire, 16);
        tunnel.send(&[0x5Au8; 32]).unwrap();

        assert_eq!(wire.len(), HEADER_LEN + 2 * 96);
    }

    #[test]
    fn send_rotates_local_key_per_chest() {
        let mut wire = Vec::new();
        let mut tunnel = sender_tunnel(&mut wire, 16);
        let original = tunnel.local_key().bytes().to_vec();

        tunnel.send(&[7u8; 40]).unwrap();

        assert_ne!(tunnel.local_key().bytes(), original.as_slice());
    }

    #[test]
    fn short_header_read_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut tunnel = Tunnel::builder(Cursor::new(vec![0u8; 2]), io::sink(), io::sink())
            .local_key(backed_key(&dir, "local.key", 16, 0x11))
            .remote_key(backed_key(&dir, "remote.key", 16, 0x22))
            .build()
            .unwrap();

        assert!(matches!(tunnel.receive(), Err(ReceiveError::Io { .. })));
    }

    #[test]
    fn truncated_chest_data_is_io_error() {
        // Header claims 5 bytes but only half a chest follows.
        let mut wire = 5u32.to_be_bytes().to_vec();
        wire.extend_from_slice(&[0u8; 40]);

        let dir = tempfile::tempdir().unwrap();
        let mut tunnel = Tunnel::builder(Cursor::new(wire), io::sink(), io::sink())
            .local_key(backed_key(&dir, "local.key", 16, 0x11))
            .remote_key(backed_key(&dir, "remote.key", 16, 0x22))
            .build()
            .unwrap();

        assert!(matches!(tunnel.receive(), Err(ReceiveError::Io { .. })));
    }

    #[test]
    fn save_keys_before_any_role_is_trivially_true() {
        let mut wire = Vec::new();
        let mut tunnel = sender_tunnel(&mut wire, 16);
        assert!(tunnel.save_keys());
    }

    #[test]
    fn diagnostics_reach_the_log_sink() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = Vec::new();
        {
            let mut tunnel = Tunnel::builder(Cursor::new(Vec::new()), io::sink(), &mut log)
                .local_key(backed_key(&dir, "local.key", 16, 0x11))
                .remote_key(backed_key(&dir, "remote.key", 16, 0x22))
                .build()
                .unwrap();

            // Empty input: header read fails and must leave a record.
            assert!(tunnel.receive().is_err());
        }

        let record = String::from_utf8(log).unwrap();
        assert!(record.contains("length header read failed"));
        assert!(record.contains("keys saved:"));
        assert!(record.contains("chests:     0/0"));
    }
}
