//! Short Hamming codes used by the BPTC matrix and the DMR embedded
//! signalling: (15,11,3), (13,9,3) and (16,11,4), all over bool arrays.
//!
//! Decoding matches the syndrome against the signature of every single-bit
//! error derived from the same parity equations, so a decode can only flip
//! a position the code actually protects.

struct Code<const K: usize, const P: usize> {
    /// `masks[j]` holds the data-bit indices feeding parity bit `K + j`.
    masks: [&'static [usize]; P],
}

impl<const K: usize, const P: usize> Code<K, P> {
    fn encode(&self, d: &mut [bool]) {
        for (j, mask) in self.masks.iter().enumerate() {
            d[K + j] = mask.iter().fold(false, |acc, &i| acc ^ d[i]);
        }
    }

    /// Corrects at most one bit. Returns true when a bit was flipped.
    fn decode(&self, d: &mut [bool]) -> bool {
        let mut syndrome = 0usize;
        for (j, mask) in self.masks.iter().enumerate() {
            let parity = mask.iter().fold(d[K + j], |acc, &i| acc ^ d[i]);
            if parity {
                syndrome |= 1 << j;
            }
        }

        if syndrome == 0 {
            return false;
        }

        // parity-bit error
        if syndrome.count_ones() == 1 {
            let j = syndrome.trailing_zeros() as usize;
            d[K + j] = !d[K + j];
            return true;
        }

        // data-bit error
        for i in 0..K {
            let mut signature = 0usize;
            for (j, mask) in self.masks.iter().enumerate() {
                if mask.contains(&i) {
                    signature |= 1 << j;
                }
            }
            if signature == syndrome {
                d[i] = !d[i];
                return true;
            }
        }

        false
    }
}

static H15113: Code<11, 4> = Code {
    masks: [
        &[0, 1, 2, 3, 4, 5, 6],
        &[0, 1, 2, 3, 7, 8, 9],
        &[0, 1, 4, 5, 7, 8, 10],
        &[0, 2, 4, 6, 7, 9, 10],
    ],
};

static H1393: Code<9, 4> = Code {
    masks: [
        &[0, 1, 3, 5, 6],
        &[0, 1, 2, 4, 6, 7],
        &[0, 1, 2, 3, 5, 7, 8],
        &[0, 2, 4, 5, 8],
    ],
};

static H16114: Code<11, 5> = Code {
    masks: [
        &[0, 1, 2, 3, 5, 7, 8],
        &[1, 2, 3, 4, 6, 8, 9],
        &[2, 3, 4, 5, 7, 9, 10],
        &[0, 1, 2, 4, 6, 7, 10],
        &[0, 2, 5, 6, 8, 9, 10],
    ],
};

pub fn encode15113(d: &mut [bool]) {
    debug_assert!(d.len() >= 15);
    H15113.encode(d);
}

pub fn decode15113(d: &mut [bool]) -> bool {
    debug_assert!(d.len() >= 15);
    H15113.decode(d)
}

pub fn encode1393(d: &mut [bool]) {
    debug_assert!(d.len() >= 13);
    H1393.encode(d);
}

pub fn decode1393(d: &mut [bool]) -> bool {
    debug_assert!(d.len() >= 13);
    H1393.decode(d)
}

pub fn encode16114(d: &mut [bool]) {
    debug_assert!(d.len() >= 16);
    H16114.encode(d);
}

pub fn decode16114(d: &mut [bool]) -> bool {
    debug_assert!(d.len() >= 16);
    H16114.decode(d)
}
