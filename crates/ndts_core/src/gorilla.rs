//! Gorilla XOR compression for `f64` series.
//!
//! Each value is XORed against its predecessor. A zero XOR costs one bit;
//! a non-zero XOR is written either inside the previous leading/trailing
//! zero window (control `10`) or with a fresh 6-bit leading-zero count and
//! 6-bit meaningful-bit count (control `11`). The first value is stored
//! verbatim, and the first non-zero XOR always takes the new-window branch,
//! so the decoder never consults a window before one has been written.
//!
//! Lossless on finite doubles. The caller keeps the value count; the bit
//! stream itself is not length-framed.

use bitvec::prelude::*;

use crate::error::CodecError;

pub fn compress(values: &[f64]) -> Vec<u8> {
    let mut bits = BitVec::<u8, Msb0>::new();
    let Some((&first, rest)) = values.split_first() else {
        return Vec::new();
    };

    push_bits(&mut bits, first.to_bits(), 64);
    let mut prev = first.to_bits();
    // (leading zeros, trailing zeros) of the last explicitly framed XOR.
    let mut window: Option<(u32, u32)> = None;

    for &v in rest {
        let cur = v.to_bits();
        let xor = cur ^ prev;
        if xor == 0 {
            bits.push(false);
        } else {
            bits.push(true);
            let lz = xor.leading_zeros();
            let tz = xor.trailing_zeros();
            match window {
                Some((wl, wt)) if lz >= wl && tz >= wt => {
                    bits.push(false);
                    push_bits(&mut bits, xor >> wt, (64 - wl - wt) as usize);
                }
                _ => {
                    bits.push(true);
                    let meaningful = 64 - lz - tz;
                    push_bits(&mut bits, lz as u64, 6);
                    // A 6-bit field cannot hold 64; it wraps to 0 and the
                    // decoder maps 0 back to 64.
                    push_bits(&mut bits, (meaningful & 63) as u64, 6);
                    push_bits(&mut bits, xor >> tz, meaningful as usize);
                    window = Some((lz, tz));
                }
            }
        }
        prev = cur;
    }

    bits.into_vec()
}

pub fn decompress(bytes: &[u8], count: usize) -> Result<Vec<f64>, CodecError> {
    if count == 0 {
        return Ok(Vec::new());
    }

    let mut reader = BitReader::new(bytes.view_bits::<Msb0>());
    let mut out = Vec::with_capacity(count);

    let mut prev = reader.take(64)?;
    out.push(f64::from_bits(prev));
    let mut window: Option<(u32, u32)> = None;

    while out.len() < count {
        if !reader.take_bit()? {
            out.push(f64::from_bits(prev));
            continue;
        }
        let xor = if reader.take_bit()? {
            let lz = reader.take(6)? as u32;
            let mut meaningful = reader.take(6)? as u32;
            if meaningful == 0 {
                meaningful = 64;
            }
            if lz + meaningful > 64 {
                return Err(CodecError::Invalid(format!(
                    "window of {meaningful} bits with {lz} leading zeros exceeds 64"
                )));
            }
            let tz = 64 - lz - meaningful;
            window = Some((lz, tz));
            reader.take(meaningful as usize)? << tz
        } else {
            let Some((wl, wt)) = window else {
                return Err(CodecError::Invalid(
                    "window reuse before any window was defined".into(),
                ));
            };
            reader.take((64 - wl - wt) as usize)? << wt
        };
        prev ^= xor;
        out.push(f64::from_bits(prev));
    }

    Ok(out)
}

fn push_bits(bits: &mut BitVec<u8, Msb0>, value: u64, n: usize) {
    for i in (0..n).rev() {
        bits.push((value >> i) & 1 == 1);
    }
}

struct BitReader<'a> {
    bits: &'a BitSlice<u8, Msb0>,
    pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(bits: &'a BitSlice<u8, Msb0>) -> Self {
        BitReader { bits, pos: 0 }
    }

    fn take_bit(&mut self) -> Result<bool, CodecError> {
        if self.pos >= self.bits.len() {
            return Err(CodecError::Truncated(self.pos));
        }
        let b = self.bits[self.pos];
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, n: usize) -> Result<u64, CodecError> {
        if self.pos + n > self.bits.len() {
            return Err(CodecError::Truncated(self.pos));
        }
        let mut v = 0u64;
        for i in 0..n {
            v = (v << 1) | (self.bits[self.pos + i] as u64);
        }
        self.pos += n;
        Ok(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(values: &[f64]) {
        let encoded = compress(values);
        let decoded = decompress(&encoded, values.len()).unwrap();
        assert_eq!(decoded.len(), values.len());
        for (a, b) in values.iter().zip(&decoded) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn test_empty_and_single() {
        roundtrip(&[]);
        roundtrip(&[42.125]);
        assert!(compress(&[]).is_empty());
    }

    #[test]
    fn test_constant_series_is_one_bit_per_repeat() {
        let values = vec![101.5; 1000];
        let encoded = compress(&values);
        // 64 bits verbatim + 999 zero bits.
        assert_eq!(encoded.len(), (64usize + 999).div_ceil(8));
        roundtrip(&values);
    }

    #[test]
    fn test_first_nonzero_xor_takes_new_window_branch() {
        // Second value differs from the first, so the very first non-zero
        // XOR must carry the explicit 6+6 header.
        roundtrip(&[1.0, 2.0]);
        roundtrip(&[0.0, f64::MAX]);
    }

    #[test]
    fn test_mixed_signs_and_extremes() {
        roundtrip(&[
            0.0,
            -0.0,
            1.0,
            -1.0,
            f64::MIN_POSITIVE,
            f64::MAX,
            f64::MIN,
            123456789.987654321,
        ]);
    }

    #[test]
    fn test_close_like_walk_compresses_below_ninety_percent() {
        // 1000 close-like floats: 100 + cumulative small noise.
        let mut values = Vec::with_capacity(1000);
        let mut px = 100.0_f64;
        let mut state = 0x2545_F491_4F6C_DD1Du64;
        for _ in 0..1000 {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let noise = ((state % 2001) as f64 - 1000.0) / 100_000.0;
            px += noise;
            values.push(px);
        }
        let encoded = compress(&values);
        assert!(
            encoded.len() < 1000 * 8 * 9 / 10,
            "expected < 7200 bytes, got {}",
            encoded.len()
        );
        roundtrip(&values);
    }

    #[test]
    fn test_truncated_stream_is_an_error() {
        let encoded = compress(&[1.0, 2.0, 3.0]);
        assert!(decompress(&encoded[..encoded.len() - 1], 3).is_err());
        assert!(decompress(&[], 1).is_err());
    }

    #[test]
    fn test_full_width_xor() {
        // XOR with no leading and no trailing zeros: meaningful count 64,
        // encoded as 0 in the 6-bit field.
        let a = f64::from_bits(0x8000_0000_0000_0001);
        let b = f64::from_bits(0x0000_0000_0000_0000);
        roundtrip(&[a, b, a]);
    }
}
