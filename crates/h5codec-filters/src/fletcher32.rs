//! Fletcher-32 checksum (HDF5 filter id 3).
//!
//! Operates on big-endian 16-bit words with an odd trailing byte treated as
//! the high half of a final word. The checksum is appended little-endian.

/// Words summed between reductions.
const BLOCK_WORDS: usize = 360;

fn fold(sum: u64) -> u64 {
    (sum & 0xffff) + (sum >> 16)
}

/// Compute the HDF5 Fletcher-32 checksum of `data`.
pub fn checksum(data: &[u8]) -> u32 {
    let mut sum1: u64 = 0;
    let mut sum2: u64 = 0;

    for block in data.chunks(BLOCK_WORDS * 2) {
        let mut words = block.chunks_exact(2);
        for w in &mut words {
            sum1 += ((w[0] as u64) << 8) | w[1] as u64;
            sum2 += sum1;
        }
        if let [last] = words.remainder() {
            sum1 += (*last as u64) << 8;
            sum2 += sum1;
        }
        sum1 = fold(sum1);
        sum2 = fold(sum2);
    }

    sum1 = fold(sum1);
    sum2 = fold(sum2);
    ((sum2 as u32) << 16) | (sum1 as u32 & 0xffff)
}

/// Check the trailing checksum and return the payload without it.
///
/// Files written by early library versions store the checksum byte-reversed;
/// both forms are accepted.
pub fn verify(data: &[u8]) -> Result<&[u8], String> {
    if data.len() < 4 {
        return Err(format!(
            "fletcher32: {} bytes is too short to hold a checksum",
            data.len()
        ));
    }
    let (payload, tail) = data.split_at(data.len() - 4);
    let stored = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
    let computed = checksum(payload);
    if stored == computed || stored == computed.swap_bytes() {
        Ok(payload)
    } else {
        Err(format!(
            "fletcher32 mismatch: stored {stored:#010x}, computed {computed:#010x}"
        ))
    }
}

/// Return `data` with its checksum appended.
pub fn append(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 4);
    out.extend_from_slice(data);
    out.extend_from_slice(&checksum(data).to_le_bytes());
    out
}
