//! Reed-Solomon codecs over GF(2^6) (primitive polynomial x^6 + x + 1) used
//! by the P25 link-control layers: RS(24,12,13), RS(24,16,9) and
//! RS(36,20,17). All three are shortenings of the (63, k) code with first
//! consecutive root alpha^1.
//!
//! Payloads are 6-bit "hexbits" packed MSB-first into byte buffers; the
//! public entry points read and write those bit buffers in place.

use crate::bits::{bin_to_hex, hex_to_bin};
use crate::{EdacError, EdacResult};

const GF_SIZE: usize = 64;
const GF_POLY: u16 = 0x43;
const N: usize = 63;

const fn build_alpha_to() -> [u8; GF_SIZE] {
    let mut table = [0u8; GF_SIZE];
    let mut v: u16 = 1;
    let mut i = 0;
    while i < GF_SIZE - 1 {
        table[i] = v as u8;
        v <<= 1;
        if v & 0x40 != 0 {
            v ^= GF_POLY;
        }
        i += 1;
    }
    // alpha^63 == alpha^0; the last slot is never indexed directly
    table[GF_SIZE - 1] = 1;
    table
}

const fn build_index_of(alpha_to: &[u8; GF_SIZE]) -> [u8; GF_SIZE] {
    let mut table = [0u8; GF_SIZE];
    let mut i = 0;
    while i < GF_SIZE - 1 {
        table[alpha_to[i] as usize] = i as u8;
        i += 1;
    }
    table
}

const ALPHA_TO: [u8; GF_SIZE] = build_alpha_to();
const INDEX_OF: [u8; GF_SIZE] = build_index_of(&ALPHA_TO);

#[inline]
fn gf_mul(a: u8, b: u8) -> u8 {
    if a == 0 || b == 0 {
        return 0;
    }
    let idx = (INDEX_OF[a as usize] as usize + INDEX_OF[b as usize] as usize) % (GF_SIZE - 1);
    ALPHA_TO[idx]
}

#[inline]
fn gf_inv(a: u8) -> u8 {
    debug_assert!(a != 0);
    ALPHA_TO[(GF_SIZE - 1 - INDEX_OF[a as usize] as usize) % (GF_SIZE - 1)]
}

/// One shortened (63, 63 - NROOTS) codec; `SYMS` transmitted symbols of
/// which the trailing NROOTS are parity.
struct Codec<const NROOTS: usize, const SYMS: usize> {
    genpoly: [u8; NROOTS],
}

impl<const NROOTS: usize, const SYMS: usize> Codec<NROOTS, SYMS> {
    fn new() -> Self {
        // g(x) = prod_{i=1..NROOTS} (x - alpha^i), monic; genpoly[j] holds
        // the coefficient of x^j
        let mut genpoly = [0u8; NROOTS];
        genpoly[0] = 1;
        let mut scratch = [0u8; NROOTS];

        for i in 1..=NROOTS {
            let root = ALPHA_TO[i % (GF_SIZE - 1)];
            scratch[..NROOTS].copy_from_slice(&genpoly);
            for j in (0..NROOTS).rev() {
                let mut v = gf_mul(scratch[j], root);
                if j > 0 {
                    v ^= scratch[j - 1];
                }
                genpoly[j] = v;
            }
        }

        Self { genpoly }
    }

    /// Systematic encode: fills the trailing NROOTS symbols with the
    /// remainder of data(x) * x^NROOTS divided by g(x).
    fn encode(&self, symbols: &mut [u8; SYMS]) {
        let k = SYMS - NROOTS;
        let mut parity = [0u8; NROOTS];

        for i in 0..k {
            let feedback = symbols[i] ^ parity[NROOTS - 1];
            for j in (1..NROOTS).rev() {
                parity[j] = parity[j - 1] ^ gf_mul(feedback, self.genpoly[j]);
            }
            parity[0] = gf_mul(feedback, self.genpoly[0]);
        }

        for j in 0..NROOTS {
            symbols[k + j] = parity[NROOTS - 1 - j];
        }
    }

    /// Berlekamp-Massey + Chien/Forney decode. Corrects up to NROOTS / 2
    /// symbol errors in place and returns the number corrected.
    fn decode(&self, symbols: &mut [u8; SYMS]) -> EdacResult<usize> {
        let pad = N - SYMS;

        // syndromes S_j = r(alpha^(j+1)), Horner over the full-length word
        // (leading pad symbols are zero and contribute nothing)
        let mut synd = [0u8; NROOTS];
        let mut all_zero = true;
        for (j, s) in synd.iter_mut().enumerate() {
            let a = ALPHA_TO[(j + 1) % (GF_SIZE - 1)];
            let mut acc = 0u8;
            for &sym in symbols.iter() {
                acc = gf_mul(acc, a) ^ sym;
            }
            *s = acc;
            if acc != 0 {
                all_zero = false;
            }
        }

        if all_zero {
            return Ok(0);
        }

        // Berlekamp-Massey
        let mut lambda = [0u8; GF_SIZE];
        let mut prev = [0u8; GF_SIZE];
        lambda[0] = 1;
        prev[0] = 1;
        let mut l = 0usize;
        let mut m = 1usize;
        let mut b = 1u8;

        for n in 0..NROOTS {
            let mut d = 0u8;
            for i in 0..=l {
                d ^= gf_mul(lambda[i], synd[n - i]);
            }

            if d == 0 {
                m += 1;
            } else if 2 * l <= n {
                let saved = lambda;
                let coef = gf_mul(d, gf_inv(b));
                for i in 0..NROOTS {
                    if i + m <= NROOTS {
                        lambda[i + m] ^= gf_mul(coef, prev[i]);
                    }
                }
                l = n + 1 - l;
                prev = saved;
                b = d;
                m = 1;
            } else {
                let coef = gf_mul(d, gf_inv(b));
                for i in 0..NROOTS {
                    if i + m <= NROOTS {
                        lambda[i + m] ^= gf_mul(coef, prev[i]);
                    }
                }
                m += 1;
            }
        }

        if l > NROOTS / 2 {
            return Err(EdacError::ReedSolomonUncorrectable);
        }

        // Chien search over the powers covered by the shortened word
        let mut root_powers = [0usize; GF_SIZE];
        let mut num_roots = 0usize;
        for power in 0..(N - pad) {
            // evaluate lambda at alpha^(-power)
            let inv_log = (GF_SIZE - 1 - power % (GF_SIZE - 1)) % (GF_SIZE - 1);
            let x = ALPHA_TO[inv_log];
            let mut acc = 0u8;
            for i in (0..=l).rev() {
                acc = gf_mul(acc, x) ^ lambda[i];
            }
            if acc == 0 {
                root_powers[num_roots] = power;
                num_roots += 1;
            }
        }

        if num_roots != l {
            return Err(EdacError::ReedSolomonUncorrectable);
        }

        // Omega(x) = S(x) * Lambda(x) mod x^NROOTS
        let mut omega = [0u8; GF_SIZE];
        for i in 0..NROOTS {
            let mut acc = 0u8;
            for j in 0..=i.min(l) {
                acc ^= gf_mul(lambda[j], synd[i - j]);
            }
            omega[i] = acc;
        }

        // Forney with FCR = 1: e = Omega(X^-1) / Lambda'(X^-1)
        for r in 0..num_roots {
            let power = root_powers[r];
            let inv_log = (GF_SIZE - 1 - power % (GF_SIZE - 1)) % (GF_SIZE - 1);
            let x_inv = ALPHA_TO[inv_log];

            let mut num = 0u8;
            for i in (0..NROOTS).rev() {
                num = gf_mul(num, x_inv) ^ omega[i];
            }

            let mut den = 0u8;
            let x_inv_sq = gf_mul(x_inv, x_inv);
            let mut term = 1u8;
            let mut i = 1;
            while i <= l {
                den ^= gf_mul(lambda[i], term);
                term = gf_mul(term, x_inv_sq);
                i += 2;
            }

            if den == 0 {
                return Err(EdacError::ReedSolomonUncorrectable);
            }

            let magnitude = gf_mul(num, gf_inv(den));
            let idx = N - 1 - power - pad;
            symbols[idx] ^= magnitude;
        }

        // re-verify: a word beyond the correction bound must not sneak
        // through as a miscorrection
        for j in 0..NROOTS {
            let a = ALPHA_TO[(j + 1) % (GF_SIZE - 1)];
            let mut acc = 0u8;
            for &sym in symbols.iter() {
                acc = gf_mul(acc, a) ^ sym;
            }
            if acc != 0 {
                return Err(EdacError::ReedSolomonUncorrectable);
            }
        }

        Ok(num_roots)
    }
}

fn read_hexbits<const SYMS: usize>(buf: &[u8]) -> [u8; SYMS] {
    let mut symbols = [0u8; SYMS];
    for (i, sym) in symbols.iter_mut().enumerate() {
        *sym = bin_to_hex(buf, i * 6);
    }
    symbols
}

fn write_hexbits(symbols: &[u8], buf: &mut [u8], count: usize) {
    for i in 0..count {
        hex_to_bin(symbols[i], buf, i * 6);
    }
}

/// Encodes RS (24,12,13); `data` carries 12 data hexbits and receives all 24.
pub fn encode_241213(data: &mut [u8]) {
    let codec: Codec<12, 24> = Codec::new();
    let mut symbols = read_hexbits::<24>(data);
    codec.encode(&mut symbols);
    write_hexbits(&symbols, data, 24);
}

/// Decodes RS (24,12,13), correcting up to 6 symbol errors. The 12 data
/// hexbits are written back into `data`.
pub fn decode_241213(data: &mut [u8]) -> EdacResult<usize> {
    let codec: Codec<12, 24> = Codec::new();
    let mut symbols = read_hexbits::<24>(data);
    let ec = codec.decode(&mut symbols)?;
    write_hexbits(&symbols, data, 12);
    Ok(ec)
}

/// Encodes RS (24,16,9).
pub fn encode_24169(data: &mut [u8]) {
    let codec: Codec<8, 24> = Codec::new();
    let mut symbols = read_hexbits::<24>(data);
    codec.encode(&mut symbols);
    write_hexbits(&symbols, data, 24);
}

/// Decodes RS (24,16,9), correcting up to 4 symbol errors.
pub fn decode_24169(data: &mut [u8]) -> EdacResult<usize> {
    let codec: Codec<8, 24> = Codec::new();
    let mut symbols = read_hexbits::<24>(data);
    let ec = codec.decode(&mut symbols)?;
    write_hexbits(&symbols, data, 16);
    Ok(ec)
}

/// Encodes RS (36,20,17).
pub fn encode_362017(data: &mut [u8]) {
    let codec: Codec<16, 36> = Codec::new();
    let mut symbols = read_hexbits::<36>(data);
    codec.encode(&mut symbols);
    write_hexbits(&symbols, data, 36);
}

/// Decodes RS (36,20,17), correcting up to 8 symbol errors.
pub fn decode_362017(data: &mut [u8]) -> EdacResult<usize> {
    let codec: Codec<16, 36> = Codec::new();
    let mut symbols = read_hexbits::<36>(data);
    let ec = codec.decode(&mut symbols)?;
    write_hexbits(&symbols, data, 20);
    Ok(ec)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill_hexbits(buf: &mut [u8], count: usize, seed: u8) {
        for i in 0..count {
            hex_to_bin(seed.wrapping_mul(i as u8 + 3) & 0x3F, buf, i * 6);
        }
    }

    #[test]
    fn gf_tables_are_consistent() {
        assert_eq!(ALPHA_TO[0], 1);
        assert_eq!(ALPHA_TO[1], 2);
        assert_eq!(ALPHA_TO[6], 0x03); // alpha^6 = alpha + 1
        for a in 1..64u8 {
            assert_eq!(gf_mul(a, gf_inv(a)), 1);
        }
    }

    #[test]
    fn rs_241213_round_trip_and_correction_bound() {
        let mut buf = [0u8; 18];
        fill_hexbits(&mut buf, 12, 7);
        let original: Vec<u8> = (0..12).map(|i| bin_to_hex(&buf, i * 6)).collect();

        encode_241213(&mut buf);

        // clean decode
        let mut clean = buf;
        assert_eq!(decode_241213(&mut clean).unwrap(), 0);
        for (i, &sym) in original.iter().enumerate() {
            assert_eq!(bin_to_hex(&clean, i * 6), sym);
        }

        // 6 symbol errors corrected
        let mut corrupted = buf;
        for i in [0usize, 3, 7, 13, 18, 23] {
            let sym = bin_to_hex(&corrupted, i * 6) ^ 0x15;
            hex_to_bin(sym, &mut corrupted, i * 6);
        }
        assert_eq!(decode_241213(&mut corrupted).unwrap(), 6);
        for (i, &sym) in original.iter().enumerate() {
            assert_eq!(bin_to_hex(&corrupted, i * 6), sym);
        }

        // 7 symbol errors rejected
        let mut corrupted = buf;
        for i in [0usize, 3, 7, 13, 18, 21, 23] {
            let sym = bin_to_hex(&corrupted, i * 6) ^ 0x2A;
            hex_to_bin(sym, &mut corrupted, i * 6);
        }
        assert!(decode_241213(&mut corrupted).is_err());
    }

    #[test]
    fn rs_24169_round_trip_and_correction_bound() {
        let mut buf = [0u8; 18];
        fill_hexbits(&mut buf, 16, 11);
        let original: Vec<u8> = (0..16).map(|i| bin_to_hex(&buf, i * 6)).collect();

        encode_24169(&mut buf);

        let mut corrupted = buf;
        for i in [1usize, 6, 14, 22] {
            let sym = bin_to_hex(&corrupted, i * 6) ^ 0x09;
            hex_to_bin(sym, &mut corrupted, i * 6);
        }
        assert_eq!(decode_24169(&mut corrupted).unwrap(), 4);
        for (i, &sym) in original.iter().enumerate() {
            assert_eq!(bin_to_hex(&corrupted, i * 6), sym);
        }

        let mut corrupted = buf;
        for i in [1usize, 6, 9, 14, 22] {
            let sym = bin_to_hex(&corrupted, i * 6) ^ 0x31;
            hex_to_bin(sym, &mut corrupted, i * 6);
        }
        assert!(decode_24169(&mut corrupted).is_err());
    }

    #[test]
    fn rs_362017_round_trip_and_correction_bound() {
        let mut buf = [0u8; 27];
        fill_hexbits(&mut buf, 20, 29);
        let original: Vec<u8> = (0..20).map(|i| bin_to_hex(&buf, i * 6)).collect();

        encode_362017(&mut buf);

        let mut corrupted = buf;
        for i in [0usize, 4, 9, 15, 20, 26, 30, 35] {
            let sym = bin_to_hex(&corrupted, i * 6) ^ 0x3F;
            hex_to_bin(sym, &mut corrupted, i * 6);
        }
        assert_eq!(decode_362017(&mut corrupted).unwrap(), 8);
        for (i, &sym) in original.iter().enumerate() {
            assert_eq!(bin_to_hex(&corrupted, i * 6), sym);
        }
    }
}
