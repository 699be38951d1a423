//! A minimal from-scratch SHA-1 implementation.
//!
//! SHA-1 is cryptographically broken for collision resistance, but RFC 6455
//! mandates it for the handshake's accept-token derivation regardless, so
//! there is no substituting a different digest here.

const H0: u32 = 0x67452301;
const H1: u32 = 0xEFCDAB89;
const H2: u32 = 0x98BADCFE;
const H3: u32 = 0x10325476;
const H4: u32 = 0xC3D2E1F0;

/// Computes the SHA-1 digest of `message`, returning the 20-byte result.
pub fn hash(message: &[u8]) -> [u8; 20] {
    let (mut h0, mut h1, mut h2, mut h3, mut h4) = (H0, H1, H2, H3, H4);

    let padded = pad_message(message);

    for chunk in padded.chunks(64) {
        let schedule = build_schedule(chunk);

        let (mut a, mut b, mut c, mut d, mut e) = (h0, h1, h2, h3, h4);

        for (i, word) in schedule.iter().enumerate() {
            let (f, k) = match i {
                0..=19 => ((b & c) | ((!b) & d), 0x5A827999),
                20..=39 => (b ^ c ^ d, 0x6ED9EBA1),
                40..=59 => ((b & c) | (b & d) | (c & d), 0x8F1BBCDC),
                _ => (b ^ c ^ d, 0xCA62C1D6),
            };

            let temp = a
                .rotate_left(5)
                .wrapping_add(f)
                .wrapping_add(e)
                .wrapping_add(k)
                .wrapping_add(*word);
            e = d;
            d = c;
            c = b.rotate_left(30);
            b = a;
            a = temp;
        }

        h0 = h0.wrapping_add(a);
        h1 = h1.wrapping_add(b);
        h2 = h2.wrapping_add(c);
        h3 = h3.wrapping_add(d);
        h4 = h4.wrapping_add(e);
    }

    let mut digest = [0u8; 20];
    digest[0..4].copy_from_slice(&h0.to_be_bytes());
    digest[4..8].copy_from_slice(&h1.to_be_bytes());
    digest[8..12].copy_from_slice(&h2.to_be_bytes());
    digest[12..16].copy_from_slice(&h3.to_be_bytes());
    digest[16..20].copy_from_slice(&h4.to_be_bytes());
    digest
}

/// Pads `input` per the SHA-1 spec: a `1` bit, zero bits up to 448 mod 512,
/// then the original bit length as a big-endian u64.
fn pad_message(input: &[u8]) -> Vec<u8> {
    let mut bytes = input.to_vec();
    let original_bit_length = bytes.len() as u64 * 8;

    bytes.push(0x80);
    while (bytes.len() * 8) % 512 != 448 {
        bytes.push(0);
    }
    bytes.extend_from_slice(&original_bit_length.to_be_bytes());
    bytes
}

/// Expands one 512-bit chunk into the 80-word message schedule.
fn build_schedule(chunk: &[u8]) -> [u32; 80] {
    let mut schedule = [0u32; 80];

    for (i, block) in chunk.chunks(4).enumerate() {
        schedule[i] = u32::from_be_bytes([block[0], block[1], block[2], block[3]]);
    }

    for i in 16..80 {
        schedule[i] =
            (schedule[i - 3] ^ schedule[i - 8] ^ schedule[i - 14] ^ schedule[i - 16]).rotate_left(1);
    }

    schedule
}
