//! XOR pad application and key-material generation.

use rand::RngCore;
use rand::rngs::OsRng;

/// XOR `buf` in place with the full pad.
///
/// Used for the next-key field, which consumes the pad a second time after
/// [`xor_split`] has already spent it on the digest and payload fields.
/// XOR is self-inverse, so the same call decrypts.
pub fn xor_in_place(pad: &[u8], buf: &mut [u8]) {
    debug_assert_eq!(pad.len(), buf.len(), "pad and buffer must have equal length");

    for (byte, pad_byte) in buf.iter_mut().zip(pad) {
        *byte ^= pad_byte;
    }
}

/// XOR two adjacent fields in place with a single pass over the pad.
///
/// `head` takes pad bytes `[0, head.len())` and `tail` the remainder; the
/// two fields together consume the pad exactly. This is the digest+payload
/// application of a chest.
pub fn xor_split(pad: &[u8], head: &mut [u8], tail: &mut [u8]) {
    debug_assert_eq!(
        pad.len(),
        head.len() + tail.len(),
        "head and tail must consume the pad exactly"
    );

    let (pad_head, pad_tail) = pad.split_at(head.len());
    for (byte, pad_byte) in head.iter_mut().zip(pad_head) {
        *byte ^= pad_byte;
    }
    for (byte, pad_byte) in tail.iter_mut().zip(pad_tail) {
        *byte ^= pad_byte;
    }
}

/// Fill `buf` with bytes from the operating system's CSPRNG.
pub fn fill_random(buf: &mut [u8]) {
    OsRng.fill_bytes(buf);
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn xor_is_self_inverse() {
        let pad = [0xA5u8; 16];
        let original = *b"sixteen byte msg";

        let mut buf = original;
        xor_in_place(&pad, &mut buf);
        assert_ne!(buf, original);

        xor_in_place(&pad, &mut buf);
        assert_eq!(buf, original);
    }

    #[test]
    fn xor_split_matches_single_pass() {
        let pad: Vec<u8> = (0..48).collect();
        let mut whole = [0x42u8; 48];
        let mut head = [0x42u8; 32];
        let mut tail = [0x42u8; 16];

        xor_in_place(&pad, &mut whole);
        xor_split(&pad, &mut head, &mut tail);

        assert_eq!(&whole[..32], head);
        assert_eq!(&whole[32..], tail);
    }

    #[test]
    fn fill_random_produces_distinct_buffers() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        fill_random(&mut a);
        fill_random(&mut b);
        assert_ne!(a, b, "two CSPRNG draws must not collide");
    }

    proptest! {
        #[test]
        fn prop_xor_round_trips(data in prop::collection::vec(any::<u8>(), 1..256)) {
            let mut pad = vec![0u8; data.len()];
            fill_random(&mut pad);

            let mut buf = data.clone();
            xor_in_place(&pad, &mut buf);
            xor_in_place(&pad, &mut buf);

            prop_assert_eq!(buf, data);
        }

        #[test]
        fn prop_split_application_consumes_full_pad(
            head_len in 1usize..64,
            tail_len in 1usize..64,
        ) {
            let mut pad = vec![0u8; head_len + tail_len];
            fill_random(&mut pad);

            let mut head = vec![0u8; head_len];
            let mut tail = vec![0u8; tail_len];
            xor_split(&pad, &mut head, &mut tail);

            // Zero input XOR pad == pad: both fields see their pad slice.
            prop_assert_eq!(&head[..], &pad[..head_len]);
            prop_assert_eq!(&tail[..], &pad[head_len..]);
        }
    }
}
