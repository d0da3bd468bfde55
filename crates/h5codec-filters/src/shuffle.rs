//! Byte shuffle (HDF5 filter id 2).
//!
//! Shuffled layout groups byte 0 of every element, then byte 1, and so on.
//! Bytes past the last whole element are carried over unchanged.

/// Group bytes by their position within each element.
pub fn shuffle(data: &[u8], element_size: usize) -> Vec<u8> {
    if element_size <= 1 || data.len() < element_size {
        return data.to_vec();
    }
    let count = data.len() / element_size;
    let body = count * element_size;
    let mut out = vec![0u8; data.len()];
    for i in 0..count {
        for j in 0..element_size {
            out[j * count + i] = data[i * element_size + j];
        }
    }
    out[body..].copy_from_slice(&data[body..]);
    out
}

/// Restore natural element order from shuffled bytes.
pub fn unshuffle(data: &[u8], element_size: usize) -> Vec<u8> {
    if element_size <= 1 || data.len() < element_size {
        return data.to_vec();
    }
    let count = data.len() / element_size;
    let body = count * element_size;
    let mut out = vec![0u8; data.len()];
    for j in 0..element_size {
        let plane = &data[j * count..(j + 1) * count];
        for (i, &b) in plane.iter().enumerate() {
            out[i * element_size + j] = b;
        }
    }
    out[body..].copy_from_slice(&data[body..]);
    out
}
