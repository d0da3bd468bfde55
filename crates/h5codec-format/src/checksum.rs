//! Metadata checksum: Bob Jenkins' lookup3 `hashlittle`.
//!
//! HDF5 protects B-tree v2 nodes and headers, fractal heap headers and
//! direct blocks, and other version-2 structures with this hash stored as a
//! little-endian u32 immediately after the covered bytes.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{FormatError, Result};

#[inline]
fn mix(a: &mut u32, b: &mut u32, c: &mut u32) {
    *a = a.wrapping_sub(*c); *a ^= c.rotate_left(4);  *c = c.wrapping_add(*b);
    *b = b.wrapping_sub(*a); *b ^= a.rotate_left(6);  *a = a.wrapping_add(*c);
    *c = c.wrapping_sub(*b); *c ^= b.rotate_left(8);  *b = b.wrapping_add(*a);
    *a = a.wrapping_sub(*c); *a ^= c.rotate_left(16); *c = c.wrapping_add(*b);
    *b = b.wrapping_sub(*a); *b ^= a.rotate_left(19); *a = a.wrapping_add(*c);
    *c = c.wrapping_sub(*b); *c ^= b.rotate_left(4);  *b = b.wrapping_add(*a);
}

#[inline]
fn final_mix(a: &mut u32, b: &mut u32, c: &mut u32) {
    *c ^= *b; *c = c.wrapping_sub(b.rotate_left(14));
    *a ^= *c; *a = a.wrapping_sub(c.rotate_left(11));
    *b ^= *a; *b = b.wrapping_sub(a.rotate_left(25));
    *c ^= *b; *c = c.wrapping_sub(b.rotate_left(16));
    *a ^= *c; *a = a.wrapping_sub(c.rotate_left(4));
    *b ^= *a; *b = b.wrapping_sub(a.rotate_left(14));
    *c ^= *b; *c = c.wrapping_sub(b.rotate_left(24));
}

/// `hashlittle(data, len, 0)`, matching `H5_checksum_lookup3`.
pub fn jenkins_lookup3(data: &[u8]) -> u32 {
    let init = 0xdead_beef_u32.wrapping_add(data.len() as u32);
    let (mut a, mut b, mut c) = (init, init, init);

    let mut rest = data;
    while rest.len() > 12 {
        a = a.wrapping_add(LittleEndian::read_u32(&rest[0..4]));
        b = b.wrapping_add(LittleEndian::read_u32(&rest[4..8]));
        c = c.wrapping_add(LittleEndian::read_u32(&rest[8..12]));
        mix(&mut a, &mut b, &mut c);
        rest = &rest[12..];
    }

    if rest.is_empty() {
        return c;
    }

    // Missing tail bytes contribute zero.
    let mut tail = [0u8; 12];
    tail[..rest.len()].copy_from_slice(rest);
    a = a.wrapping_add(LittleEndian::read_u32(&tail[0..4]));
    b = b.wrapping_add(LittleEndian::read_u32(&tail[4..8]));
    c = c.wrapping_add(LittleEndian::read_u32(&tail[8..12]));
    final_mix(&mut a, &mut b, &mut c);
    c
}

/// Check the u32 stored right after `data[..covered]`.
pub fn verify(data: &[u8], covered: usize, structure: &'static str) -> Result<()> {
    if covered + 4 > data.len() {
        return Err(FormatError::UnexpectedEof {
            expected: covered + 4,
            available: data.len(),
        });
    }
    let stored = LittleEndian::read_u32(&data[covered..covered + 4]);
    let computed = jenkins_lookup3(&data[..covered]);
    if stored != computed {
        return Err(FormatError::ChecksumMismatch {
            structure,
            stored,
            computed,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_initial_state() {
        assert_eq!(jenkins_lookup3(b""), 0xdead_beef);
    }

    #[test]
    fn lookup3_reference_vector() {
        // from the self-test in lookup3.c
        assert_eq!(jenkins_lookup3(b"Four score and seven years ago"), 0x1777_0551);
    }

    #[test]
    fn every_tail_length_differs() {
        let data: Vec<u8> = (1..=25).collect();
        let hashes: Vec<u32> = (0..=25).map(|n| jenkins_lookup3(&data[..n])).collect();
        for i in 0..hashes.len() {
            for j in i + 1..hashes.len() {
                assert_ne!(hashes[i], hashes[j], "lengths {i} and {j} collide");
            }
        }
    }

    #[test]
    fn verify_detects_flip() {
        let mut buf = b"BTLF\0\x0a some record bytes".to_vec();
        let covered = buf.len();
        let sum = jenkins_lookup3(&buf);
        buf.extend_from_slice(&sum.to_le_bytes());
        verify(&buf, covered, "leaf").unwrap();
        buf[3] ^= 1;
        assert!(matches!(
            verify(&buf, covered, "leaf"),
            Err(FormatError::ChecksumMismatch { structure: "leaf", .. })
        ));
    }
}
