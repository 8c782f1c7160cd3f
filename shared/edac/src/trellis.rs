//! Rate 3/4 and rate 1/2 trellis codecs (DMR rate 3/4 data, P25 TSBK /
//! PDU carriage). 98 dibits per burst, 4FSK constellation points, and a
//! heuristic repair pass that flips the failing constellation point and
//! retries with one position of backtrack.

use crate::bits::{read_bit, write_bit};
use crate::{EdacError, EdacResult};

const INTERLEAVE_TABLE: [usize; 98] = [
    0, 1, 8, 9, 16, 17, 24, 25, 32, 33, 40, 41, 48, 49, 56, 57, 64, 65, 72, 73, 80, 81, 88, 89,
    96, 97, 2, 3, 10, 11, 18, 19, 26, 27, 34, 35, 42, 43, 50, 51, 58, 59, 66, 67, 74, 75, 82, 83,
    90, 91, 4, 5, 12, 13, 20, 21, 28, 29, 36, 37, 44, 45, 52, 53, 60, 61, 68, 69, 76, 77, 84, 85,
    92, 93, 6, 7, 14, 15, 22, 23, 30, 31, 38, 39, 46, 47, 54, 55, 62, 63, 70, 71, 78, 79, 86, 87,
    94, 95,
];

const ENCODE_TABLE_34: [u8; 64] = [
    0, 8, 4, 12, 2, 10, 6, 14, 4, 12, 2, 10, 6, 14, 0, 8, 1, 9, 5, 13, 3, 11, 7, 15, 5, 13, 3, 11,
    7, 15, 1, 9, 3, 11, 7, 15, 1, 9, 5, 13, 7, 15, 1, 9, 5, 13, 3, 11, 2, 10, 6, 14, 0, 8, 4, 12,
    6, 14, 0, 8, 4, 12, 2, 10,
];

const ENCODE_TABLE_12: [u8; 16] = [0, 15, 12, 3, 4, 11, 8, 7, 13, 2, 1, 14, 9, 6, 5, 10];

/// Sentinel returned by the check passes when every position validated.
const CHECK_OK: usize = 999;

/// Dibit symbol values on the 4FSK constellation.
type Dibit = i8;

fn deinterleave(data: &[u8], skip_symbols: bool) -> [Dibit; 98] {
    let mut dibits = [0i8; 98];
    for i in 0..98 {
        let mut n = i * 2;
        if skip_symbols && n >= 98 {
            n += 68;
        }
        let b1 = read_bit(data, n);

        let mut n = i * 2 + 1;
        if skip_symbols && n >= 98 {
            n += 68;
        }
        let b2 = read_bit(data, n);

        let dibit = match (b1, b2) {
            (false, true) => 3,
            (false, false) => 1,
            (true, false) => -1,
            (true, true) => -3,
        };

        dibits[INTERLEAVE_TABLE[i]] = dibit;
    }
    dibits
}

fn interleave(dibits: &[Dibit; 98], data: &mut [u8], skip_symbols: bool) {
    for i in 0..98 {
        let (b1, b2) = match dibits[INTERLEAVE_TABLE[i]] {
            3 => (false, true),
            1 => (false, false),
            -1 => (true, false),
            _ => (true, true),
        };

        let mut n = i * 2;
        if skip_symbols && n >= 98 {
            n += 68;
        }
        write_bit(data, n, b1);

        let mut n = i * 2 + 1;
        if skip_symbols && n >= 98 {
            n += 68;
        }
        write_bit(data, n, b2);
    }
}

const CONSTELLATION: [(Dibit, Dibit); 16] = [
    (1, -1),
    (-1, -1),
    (3, -3),
    (-3, -3),
    (-3, -1),
    (3, -1),
    (-1, -3),
    (1, -3),
    (-3, 3),
    (3, 3),
    (-1, 1),
    (1, 1),
    (1, 3),
    (-1, 3),
    (3, 1),
    (-3, 1),
];

fn dibits_to_points(dibits: &[Dibit; 98]) -> [u8; 49] {
    let mut points = [0u8; 49];
    for i in 0..49 {
        let pair = (dibits[i * 2], dibits[i * 2 + 1]);
        for (p, &c) in CONSTELLATION.iter().enumerate() {
            if pair == c {
                points[i] = p as u8;
                break;
            }
        }
    }
    points
}

fn points_to_dibits(points: &[u8; 49]) -> [Dibit; 98] {
    let mut dibits = [0i8; 98];
    for i in 0..49 {
        let (d1, d2) = CONSTELLATION[points[i] as usize & 0x0F];
        dibits[i * 2] = d1;
        dibits[i * 2 + 1] = d2;
    }
    dibits
}

fn bits_to_tribits(payload: &[u8]) -> [u8; 49] {
    let mut tribits = [0u8; 49];
    for (i, t) in tribits.iter_mut().take(48).enumerate() {
        let n = i * 3;
        *t = (read_bit(payload, n) as u8) << 2
            | (read_bit(payload, n + 1) as u8) << 1
            | read_bit(payload, n + 2) as u8;
    }
    tribits
}

fn tribits_to_bits(tribits: &[u8; 49], payload: &mut [u8]) {
    for (i, &t) in tribits.iter().take(48).enumerate() {
        let n = i * 3;
        write_bit(payload, n, t & 0x04 != 0);
        write_bit(payload, n + 1, t & 0x02 != 0);
        write_bit(payload, n + 2, t & 0x01 != 0);
    }
}

fn bits_to_dibits(payload: &[u8]) -> [u8; 49] {
    let mut dibits = [0u8; 49];
    for (i, d) in dibits.iter_mut().take(48).enumerate() {
        let n = i * 2;
        *d = (read_bit(payload, n) as u8) << 1 | read_bit(payload, n + 1) as u8;
    }
    dibits
}

fn dibits_to_bits(dibits: &[u8; 49], payload: &mut [u8]) {
    for (i, &d) in dibits.iter().take(48).enumerate() {
        let n = i * 2;
        write_bit(payload, n, d & 0x02 != 0);
        write_bit(payload, n + 1, d & 0x01 != 0);
    }
}

/// Walks the rate 3/4 trellis; returns the first failing position or
/// `CHECK_OK`.
fn check_code_34(points: &[u8; 49], tribits: &mut [u8; 49]) -> usize {
    let mut state = 0usize;
    for i in 0..49 {
        tribits[i] = 9;
        for j in 0..8 {
            if points[i] == ENCODE_TABLE_34[state * 8 + j] {
                tribits[i] = j as u8;
                break;
            }
        }
        if tribits[i] == 9 {
            return i;
        }
        state = tribits[i] as usize;
    }
    if tribits[48] != 0 {
        return 48;
    }
    CHECK_OK
}

fn check_code_12(points: &[u8; 49], dibits: &mut [u8; 49]) -> usize {
    let mut state = 0usize;
    for i in 0..49 {
        dibits[i] = 5;
        for j in 0..4 {
            if points[i] == ENCODE_TABLE_12[state * 4 + j] {
                dibits[i] = j as u8;
                break;
            }
        }
        if dibits[i] == 5 {
            return i;
        }
        state = dibits[i] as usize;
    }
    if dibits[48] != 0 {
        return 48;
    }
    CHECK_OK
}

/// Tries every constellation value at the failing position, following the
/// furthest-progress candidate, for up to 20 rounds.
fn fix_code_34(points: &mut [u8; 49], mut fail_pos: usize, payload: &mut [u8]) -> bool {
    for _ in 0..20 {
        let mut best_pos = 0;
        let mut best_val = 0u8;

        for val in 0..16u8 {
            points[fail_pos] = val;

            let mut tribits = [0u8; 49];
            let pos = check_code_34(points, &mut tribits);
            if pos == CHECK_OK {
                tribits_to_bits(&tribits, payload);
                return true;
            }
            if pos > best_pos {
                best_pos = pos;
                best_val = val;
            }
        }

        points[fail_pos] = best_val;
        fail_pos = best_pos;
    }
    false
}

fn fix_code_12(points: &mut [u8; 49], mut fail_pos: usize, payload: &mut [u8]) -> bool {
    for _ in 0..20 {
        let mut best_pos = 0;
        let mut best_val = 0u8;

        for val in 0..16u8 {
            points[fail_pos] = val;

            let mut dibits = [0u8; 49];
            let pos = check_code_12(points, &mut dibits);
            if pos == CHECK_OK {
                dibits_to_bits(&dibits, payload);
                return true;
            }
            if pos > best_pos {
                best_pos = pos;
                best_val = val;
            }
        }

        points[fail_pos] = best_val;
        fail_pos = best_pos;
    }
    false
}

/// Decodes rate 3/4 trellis into an 18-byte payload.
pub fn decode34(data: &[u8], payload: &mut [u8], skip_symbols: bool) -> EdacResult<()> {
    let dibits = deinterleave(data, skip_symbols);
    let mut points = dibits_to_points(&dibits);

    let mut tribits = [0u8; 49];
    let fail_pos = check_code_34(&points, &mut tribits);
    if fail_pos == CHECK_OK {
        tribits_to_bits(&tribits, payload);
        return Ok(());
    }

    let save_points = points;
    if fix_code_34(&mut points, fail_pos, payload) {
        return Ok(());
    }
    if fail_pos == 0 {
        return Err(EdacError::TrellisUnrecoverable);
    }

    // backtrack one place for a last go
    let mut points = save_points;
    if fix_code_34(&mut points, fail_pos - 1, payload) {
        Ok(())
    } else {
        Err(EdacError::TrellisUnrecoverable)
    }
}

/// Encodes an 18-byte payload with rate 3/4 trellis.
pub fn encode34(payload: &[u8], data: &mut [u8], skip_symbols: bool) {
    let tribits = bits_to_tribits(payload);

    let mut points = [0u8; 49];
    let mut state = 0usize;
    for i in 0..49 {
        let tribit = tribits[i];
        points[i] = ENCODE_TABLE_34[state * 8 + tribit as usize];
        state = tribit as usize;
    }

    let dibits = points_to_dibits(&points);
    interleave(&dibits, data, skip_symbols);
}

/// Decodes rate 1/2 trellis into a 12-byte payload.
pub fn decode12(data: &[u8], payload: &mut [u8]) -> EdacResult<()> {
    let dibits = deinterleave(data, false);
    let mut points = dibits_to_points(&dibits);

    let mut out_dibits = [0u8; 49];
    let fail_pos = check_code_12(&points, &mut out_dibits);
    if fail_pos == CHECK_OK {
        dibits_to_bits(&out_dibits, payload);
        return Ok(());
    }

    let save_points = points;
    if fix_code_12(&mut points, fail_pos, payload) {
        return Ok(());
    }
    if fail_pos == 0 {
        return Err(EdacError::TrellisUnrecoverable);
    }

    let mut points = save_points;
    if fix_code_12(&mut points, fail_pos - 1, payload) {
        Ok(())
    } else {
        Err(EdacError::TrellisUnrecoverable)
    }
}

/// Encodes a 12-byte payload with rate 1/2 trellis.
pub fn encode12(payload: &[u8], data: &mut [u8]) {
    let dibits_in = bits_to_dibits(payload);

    let mut points = [0u8; 49];
    let mut state = 0usize;
    for i in 0..49 {
        let dibit = dibits_in[i];
        points[i] = ENCODE_TABLE_12[state * 4 + dibit as usize];
        state = dibit as usize;
    }

    let dibits = points_to_dibits(&points);
    interleave(&dibits, data, false);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate34_round_trip() {
        let mut payload = [0u8; 18];
        for (i, b) in payload.iter_mut().enumerate() {
            *b = (i as u8).wrapping_mul(29).wrapping_add(5);
        }

        let mut coded = [0u8; 25];
        encode34(&payload, &mut coded, false);

        let mut decoded = [0u8; 18];
        decode34(&coded, &mut decoded, false).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn rate34_skip_symbols_round_trip() {
        let payload = [0xDE; 18];
        let mut coded = [0u8; 34];
        encode34(&payload, &mut coded, true);

        let mut decoded = [0u8; 18];
        decode34(&coded, &mut decoded, true).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn rate12_round_trip() {
        let mut payload = [0u8; 12];
        for (i, b) in payload.iter_mut().enumerate() {
            *b = (i as u8).wrapping_mul(73).wrapping_add(11);
        }

        let mut coded = [0u8; 25];
        encode12(&payload, &mut coded);

        let mut decoded = [0u8; 12];
        decode12(&coded, &mut decoded).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn rate34_recovers_single_point_corruption() {
        let mut payload = [0u8; 18];
        for (i, b) in payload.iter_mut().enumerate() {
            *b = (i as u8).wrapping_mul(29).wrapping_add(5);
        }
        let mut coded = [0u8; 25];
        encode34(&payload, &mut coded, false);

        // corrupt the first constellation point into an invalid transition
        let mut corrupted = coded;
        corrupted[0] ^= 0x80;

        let mut decoded = [0u8; 18];
        decode34(&corrupted, &mut decoded, false).unwrap();
        assert_eq!(decoded, payload);
    }
}
