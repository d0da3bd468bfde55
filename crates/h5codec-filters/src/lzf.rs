//! LZF compression (HDF5 filter id 32000, as registered by h5py).
//!
//! The stream is a sequence of control bytes:
//!
//! - `000LLLLL`: a literal run of `L + 1` bytes follows (1..=32).
//! - `LLLooooo oooooooo`: a back-reference of length `L + 2` (3..=8) at
//!   backward distance `o + 1`.
//! - `111ooooo LLLLLLLL oooooooo`: a back-reference of length `L + 9`.
//!
//! The compressor hashes 3-byte sequences into a fixed table of 8192
//! buckets. Distances are limited to 13 bits, so a repeat further back than
//! that is emitted as literals.

/// log2 of the number of hash buckets.
const HASH_LOG: u32 = 13;
const HASH_SIZE: usize = 1 << HASH_LOG;

/// Longest literal run a single control byte can describe.
const MAX_LITERAL: usize = 1 << 5;

/// Back-references must satisfy `ip - ref - 1 < MAX_OFFSET`.
const MAX_OFFSET: usize = 1 << 13;

/// Longest match: 7 in the control byte plus 255 in the extra length byte, plus the bias of 2.
const MAX_MATCH: usize = (1 << 8) + (1 << 3);

#[inline]
fn hash(input: &[u8], pos: usize) -> usize {
    let v = ((input[pos] as u32) << 16) | ((input[pos + 1] as u32) << 8) | input[pos + 2] as u32;
    ((v >> (24 - HASH_LOG)).wrapping_sub(v.wrapping_mul(5)) as usize) & (HASH_SIZE - 1)
}

/// Accumulates literals behind a control byte that is patched once the run closes.
struct LiteralRun {
    ctrl_pos: usize,
    len: usize,
}

impl LiteralRun {
    fn open(out: &mut Vec<u8>) -> Self {
        out.push(0);
        LiteralRun {
            ctrl_pos: out.len() - 1,
            len: 0,
        }
    }

    fn push(&mut self, out: &mut Vec<u8>, byte: u8) {
        out.push(byte);
        self.len += 1;
        if self.len == MAX_LITERAL {
            self.close(out);
            *self = LiteralRun::open(out);
        }
    }

    /// Patch the control byte, or drop it when no literal was written.
    fn close(&self, out: &mut Vec<u8>) {
        if self.len == 0 {
            out.truncate(self.ctrl_pos);
        } else {
            out[self.ctrl_pos] = (self.len - 1) as u8;
        }
    }
}

/// Compress `input` into an LZF stream.
///
/// Always succeeds; incompressible input grows by at most one control byte
/// per 32 literals. An empty input produces an empty stream.
pub fn compress(input: &[u8]) -> Vec<u8> {
    let in_len = input.len();
    let mut out = Vec::with_capacity(in_len + in_len / MAX_LITERAL + 1);
    if in_len == 0 {
        return out;
    }

    let mut table = vec![0usize; HASH_SIZE];
    let mut run = LiteralRun::open(&mut out);
    let mut ip = 0usize;

    while ip + 2 < in_len {
        let h = hash(input, ip);
        let candidate = table[h];
        table[h] = ip;

        if candidate < ip {
            let distance = ip - candidate - 1;
            if distance < MAX_OFFSET && input[candidate..candidate + 3] == input[ip..ip + 3] {
                let limit = MAX_MATCH.min(in_len - ip);
                let mut len = 3;
                while len < limit && input[candidate + len] == input[ip + len] {
                    len += 1;
                }

                run.close(&mut out);
                let encoded = len - 2;
                let high = (distance >> 8) as u8;
                if encoded < 7 {
                    out.push(((encoded as u8) << 5) | high);
                } else {
                    out.push((7 << 5) | high);
                    out.push((encoded - 7) as u8);
                }
                out.push(distance as u8);

                for p in ip + 1..ip + len {
                    if p + 2 < in_len {
                        table[hash(input, p)] = p;
                    }
                }
                ip += len;
                run = LiteralRun::open(&mut out);
                continue;
            }
        }

        run.push(&mut out, input[ip]);
        ip += 1;
    }

    while ip < in_len {
        run.push(&mut out, input[ip]);
        ip += 1;
    }
    run.close(&mut out);
    out
}

/// Decompress an LZF stream.
///
/// When `max_output` is non-zero the output may not grow past it. Copies are
/// done byte by byte so overlapping back-references (distance shorter than
/// length) replicate the pattern.
pub fn decompress(input: &[u8], max_output: usize) -> Result<Vec<u8>, String> {
    let hint = if max_output > 0 { max_output } else { input.len() * 2 };
    let mut out = Vec::with_capacity(hint.min(input.len().saturating_mul(8) + 64));
    let mut ip = 0usize;

    while ip < input.len() {
        let ctrl = input[ip] as usize;
        ip += 1;

        if ctrl < MAX_LITERAL {
            let len = ctrl + 1;
            if ip + len > input.len() {
                return Err(format!(
                    "lzf: literal run of {len} bytes at {} runs past end of input ({})",
                    ip - 1,
                    input.len()
                ));
            }
            out.extend_from_slice(&input[ip..ip + len]);
            ip += len;
        } else {
            let mut len = ctrl >> 5;
            if len == 7 {
                let extra = *input
                    .get(ip)
                    .ok_or_else(|| "lzf: truncated back-reference length".to_string())?;
                len += extra as usize;
                ip += 1;
            }
            len += 2;

            let low = *input
                .get(ip)
                .ok_or_else(|| "lzf: truncated back-reference offset".to_string())?;
            ip += 1;
            let distance = ((ctrl & 0x1f) << 8) + low as usize + 1;
            if distance > out.len() {
                return Err(format!(
                    "lzf: back-reference distance {distance} exceeds {} decoded bytes",
                    out.len()
                ));
            }

            let start = out.len() - distance;
            for i in 0..len {
                let b = out[start + i];
                out.push(b);
            }
        }

        if max_output > 0 && out.len() > max_output {
            return Err(format!(
                "lzf: decoded output exceeds expected {max_output} bytes"
            ));
        }
    }

    Ok(out)
}
