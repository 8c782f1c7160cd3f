//! Embedded link-control accumulator. Voice superframes deliver the LC in
//! four 32-bit LCSS fragments; the assembled 128 bits form a 16-column
//! interleave with Hamming(16,11,4) rows, a parity row and a 5-bit
//! checksum over the 72 LC bits.

use dv_edac::bits::{read_bit, write_bit};
use dv_edac::{crc, hamming};
use tracing::debug;

use super::lc::{LinkControl, LC_LENGTH_BYTES};
use super::Lcss;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    None,
    First,
    Second,
    Third,
}

pub struct EmbeddedData {
    raw: [bool; 128],
    state: State,
    data: [bool; 72],
    valid: bool,
}

impl Default for EmbeddedData {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddedData {
    pub fn new() -> Self {
        Self {
            raw: [false; 128],
            state: State::None,
            data: [false; 72],
            valid: false,
        }
    }

    /// Feeds one 32-bit fragment. Returns true once the full LC assembled
    /// and passed its checks (on the Last fragment).
    pub fn add_fragment(&mut self, fragment: &[u8; 4], lcss: Lcss) -> bool {
        let mut bits = [false; 32];
        for (i, b) in bits.iter_mut().enumerate() {
            *b = read_bit(fragment, i);
        }

        match lcss {
            Lcss::Single => {
                // single-fragment LCSS carries no embedded LC
            }
            Lcss::First => {
                self.state = State::First;
                self.valid = false;
                self.raw[0..32].copy_from_slice(&bits);
            }
            Lcss::Continuation => match self.state {
                State::First => {
                    self.raw[32..64].copy_from_slice(&bits);
                    self.state = State::Second;
                }
                State::Second => {
                    self.raw[64..96].copy_from_slice(&bits);
                    self.state = State::Third;
                }
                _ => {
                    self.state = State::None;
                    self.valid = false;
                }
            },
            Lcss::Last => {
                if self.state == State::Third {
                    self.raw[96..128].copy_from_slice(&bits);
                    self.process();
                } else {
                    self.state = State::None;
                    self.valid = false;
                }
            }
        }

        self.valid
    }

    fn process(&mut self) {
        // column deinterleave into 8 rows of 16
        let mut grid = [false; 128];
        let mut b = 0usize;
        for a in 0..128 {
            grid[b] = self.raw[a];
            b += 16;
            if b > 127 {
                b -= 127;
            }
        }

        // the first seven rows are Hamming(16,11,4)
        for row in 0..7 {
            let start = row * 16;
            let mut word = [false; 16];
            word.copy_from_slice(&grid[start..start + 16]);
            hamming::decode16114(&mut word);

            let mut check = word;
            hamming::encode16114(&mut check);
            if check != word {
                debug!("embedded LC failed Hamming row check");
                return;
            }
            grid[start..start + 16].copy_from_slice(&word);
        }

        // column parity row
        for col in 0..16 {
            let mut parity = false;
            for row in 0..8 {
                parity ^= grid[row * 16 + col];
            }
            if parity {
                debug!("embedded LC failed column parity");
                return;
            }
        }

        // extract the 72 LC bits
        let mut pos = 0usize;
        for a in 0..11 {
            self.data[pos] = grid[a];
            pos += 1;
        }
        for a in 16..27 {
            self.data[pos] = grid[a];
            pos += 1;
        }
        for row in 2..7 {
            for a in (row * 16)..(row * 16 + 10) {
                self.data[pos] = grid[a];
                pos += 1;
            }
        }

        // 5-bit checksum in bit 10 of rows 2..=6
        let mut crc_val = 0u32;
        for (i, &bit_pos) in [42usize, 58, 74, 90, 106].iter().enumerate() {
            if grid[bit_pos] {
                crc_val += 16 >> i;
            }
        }

        if !crc::check_five_bit(&self.data, crc_val) {
            debug!("embedded LC failed 5-bit checksum");
            return;
        }

        self.valid = true;
    }

    /// Loads an LC for transmission and builds the interleaved fragments.
    pub fn set_lc(&mut self, lc: &LinkControl) {
        let mut bytes = [0u8; LC_LENGTH_BYTES];
        lc.encode(&mut bytes);

        for i in 0..72 {
            self.data[i] = read_bit(&bytes, i);
        }
        let crc_val = crc::encode_five_bit(&self.data);

        let mut grid = [false; 128];
        let mut pos = 0usize;
        for a in 0..11 {
            grid[a] = self.data[pos];
            pos += 1;
        }
        for a in 16..27 {
            grid[a] = self.data[pos];
            pos += 1;
        }
        for row in 2..7 {
            for a in (row * 16)..(row * 16 + 10) {
                grid[a] = self.data[pos];
                pos += 1;
            }
        }

        for (i, &bit_pos) in [42usize, 58, 74, 90, 106].iter().enumerate() {
            grid[bit_pos] = (crc_val & (16 >> i)) != 0;
        }

        for row in 0..7 {
            let start = row * 16;
            let mut word = [false; 16];
            word.copy_from_slice(&grid[start..start + 16]);
            hamming::encode16114(&mut word);
            grid[start..start + 16].copy_from_slice(&word);
        }

        for col in 0..16 {
            let mut parity = false;
            for row in 0..7 {
                parity ^= grid[row * 16 + col];
            }
            grid[112 + col] = parity;
        }

        // column interleave back into fragment order
        let mut b = 0usize;
        for a in 0..128 {
            self.raw[a] = grid[b];
            b += 16;
            if b > 127 {
                b -= 127;
            }
        }

        self.state = State::Third;
        self.valid = true;
    }

    /// Returns fragment `n` (0..=3) of the interleaved embedded data.
    pub fn fragment(&self, n: usize) -> [u8; 4] {
        debug_assert!(n < 4);
        let mut out = [0u8; 4];
        for i in 0..32 {
            write_bit(&mut out, i, self.raw[n * 32 + i]);
        }
        out
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// The assembled link control, available once valid.
    pub fn link_control(&self) -> Option<LinkControl> {
        if !self.valid {
            return None;
        }
        let mut bytes = [0u8; LC_LENGTH_BYTES];
        for i in 0..72 {
            write_bit(&mut bytes, i, self.data[i]);
        }
        LinkControl::decode(&bytes)
    }

    pub fn reset(&mut self) {
        self.state = State::None;
        self.valid = false;
        self.raw = [false; 128];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_fragment_round_trip() {
        let lc = LinkControl::group(0x0A1B2C, 0x000064);

        let mut tx = EmbeddedData::new();
        tx.set_lc(&lc);

        let mut rx = EmbeddedData::new();
        assert!(!rx.add_fragment(&tx.fragment(0), Lcss::First));
        assert!(!rx.add_fragment(&tx.fragment(1), Lcss::Continuation));
        assert!(!rx.add_fragment(&tx.fragment(2), Lcss::Continuation));
        assert!(rx.add_fragment(&tx.fragment(3), Lcss::Last));

        assert_eq!(rx.link_control().unwrap(), lc);
    }

    #[test]
    fn out_of_order_fragments_reset() {
        let lc = LinkControl::group(1, 2);
        let mut tx = EmbeddedData::new();
        tx.set_lc(&lc);

        let mut rx = EmbeddedData::new();
        assert!(!rx.add_fragment(&tx.fragment(1), Lcss::Continuation));
        assert!(!rx.add_fragment(&tx.fragment(3), Lcss::Last));
        assert!(!rx.is_valid());
    }

    #[test]
    fn corrupted_fragment_fails_checksum() {
        let lc = LinkControl::group(0x123456, 0x000001);
        let mut tx = EmbeddedData::new();
        tx.set_lc(&lc);

        let mut rx = EmbeddedData::new();
        rx.add_fragment(&tx.fragment(0), Lcss::First);
        rx.add_fragment(&tx.fragment(1), Lcss::Continuation);

        let mut bad = tx.fragment(2);
        bad[0] ^= 0xFF;
        bad[2] ^= 0xFF;
        rx.add_fragment(&bad, Lcss::Continuation);
        assert!(!rx.add_fragment(&tx.fragment(3), Lcss::Last));
    }
}
