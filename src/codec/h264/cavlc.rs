//! CAVLC residual coding and the bitstream writer
//!
//! Context-adaptive variable-length coding of 4x4 residual blocks: the
//! coeff_token VLC is selected by the nC context (the mean of the left and
//! top neighbour blocks' non-zero counts), up to three trailing ±1 levels
//! are sign-coded, remaining levels use the adaptive suffix-length code,
//! and the zero runs are coded with total_zeros / run_before. The same
//! [`BitWriter`] provides the exp-Golomb codes (`ue`/`se`/`te`) used by
//! macroblock headers.

/// MSB-first bitstream writer
#[derive(Debug, Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    current: u8,
    filled: u8,
    bits_written: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        BitWriter::default()
    }

    /// Append one bit
    pub fn write_bit(&mut self, bit: bool) {
        self.current = (self.current << 1) | bit as u8;
        self.filled += 1;
        self.bits_written += 1;
        if self.filled == 8 {
            self.bytes.push(self.current);
            self.current = 0;
            self.filled = 0;
        }
    }

    /// Append the `count` low bits of `value`, most significant first
    pub fn write_bits(&mut self, value: u32, count: u8) {
        for i in (0..count).rev() {
            self.write_bit(value >> i & 1 != 0);
        }
    }

    /// Unsigned exp-Golomb
    pub fn write_ue(&mut self, value: u32) {
        let code = value + 1;
        let length = 32 - code.leading_zeros() as u8;
        self.write_bits(0, length - 1);
        self.write_bits(code, length);
    }

    /// Signed exp-Golomb: 0, 1, -1, 2, -2, ...
    pub fn write_se(&mut self, value: i32) {
        let mapped = if value > 0 {
            (value as u32) * 2 - 1
        } else {
            (-value as u32) * 2
        };
        self.write_ue(mapped);
    }

    /// Truncated exp-Golomb with the given range bound
    pub fn write_te(&mut self, value: u32, max: u32) {
        if max == 1 {
            self.write_bit(value == 0);
        } else {
            self.write_ue(value);
        }
    }

    /// Number of bits written so far
    pub fn bits_written(&self) -> usize {
        self.bits_written
    }

    /// Close the RBSP: stop bit plus zero padding to a byte boundary
    pub fn finish(mut self) -> Vec<u8> {
        self.write_bit(true);
        while self.filled != 0 {
            self.write_bit(false);
        }
        self.bytes
    }
}

/// (length, bits) pair of one VLC code
type Vlc = (u8, u16);

/// coeff_token codes indexed by `[trailing_ones][total_coeff]` for the
/// 0 <= nC < 2 context
const COEFF_TOKEN_VLC0: [[Vlc; 17]; 4] = [
    [
        (1, 1),
        (6, 5),
        (8, 7),
        (9, 7),
        (10, 7),
        (11, 7),
        (13, 15),
        (13, 11),
        (13, 8),
        (14, 15),
        (14, 11),
        (15, 15),
        (15, 11),
        (16, 15),
        (16, 11),
        (16, 7),
        (16, 4),
    ],
    [
        (0, 0),
        (2, 1),
        (6, 4),
        (8, 6),
        (9, 6),
        (10, 6),
        (11, 6),
        (13, 14),
        (13, 10),
        (14, 14),
        (14, 10),
        (15, 14),
        (15, 10),
        (15, 1),
        (16, 14),
        (16, 10),
        (16, 6),
    ],
    [
        (0, 0),
        (0, 0),
        (3, 1),
        (7, 5),
        (8, 5),
        (9, 5),
        (10, 5),
        (11, 5),
        (13, 13),
        (13, 9),
        (14, 13),
        (14, 9),
        (15, 13),
        (15, 9),
        (16, 13),
        (16, 9),
        (16, 5),
    ],
    [
        (0, 0),
        (0, 0),
        (0, 0),
        (5, 3),
        (6, 3),
        (7, 4),
        (8, 4),
        (9, 4),
        (10, 4),
        (11, 4),
        (13, 12),
        (14, 12),
        (14, 8),
        (15, 12),
        (15, 8),
        (16, 12),
        (16, 8),
    ],
];

/// coeff_token codes for the 2 <= nC < 4 context
const COEFF_TOKEN_VLC1: [[Vlc; 17]; 4] = [
    [
        (2, 3),
        (6, 11),
        (6, 7),
        (7, 7),
        (8, 7),
        (8, 4),
        (9, 7),
        (11, 15),
        (11, 11),
        (12, 15),
        (12, 11),
        (12, 8),
        (13, 15),
        (13, 11),
        (13, 8),
        (14, 13),
        (14, 9),
    ],
    [
        (0, 0),
        (2, 2),
        (5, 7),
        (6, 10),
        (6, 6),
        (7, 6),
        (8, 6),
        (9, 6),
        (11, 14),
        (11, 10),
        (12, 14),
        (12, 10),
        (13, 14),
        (13, 10),
        (14, 14),
        (14, 10),
        (14, 5),
    ],
    [
        (0, 0),
        (0, 0),
        (3, 3),
        (6, 9),
        (6, 5),
        (7, 5),
        (8, 5),
        (9, 5),
        (11, 13),
        (11, 9),
        (12, 13),
        (12, 9),
        (13, 13),
        (13, 9),
        (14, 7),
        (14, 6),
        (14, 1),
    ],
    [
        (0, 0),
        (0, 0),
        (0, 0),
        (4, 5),
        (4, 4),
        (5, 6),
        (6, 8),
        (6, 4),
        (7, 4),
        (9, 4),
        (11, 12),
        (11, 8),
        (12, 12),
        (13, 12),
        (13, 7),
        (14, 12),
        (14, 8),
    ],
];

/// coeff_token codes for the 4 <= nC < 8 context
const COEFF_TOKEN_VLC2: [[Vlc; 17]; 4] = [
    [
        (4, 15),
        (6, 15),
        (6, 11),
        (6, 8),
        (7, 15),
        (7, 11),
        (7, 9),
        (7, 8),
        (8, 15),
        (8, 11),
        (9, 15),
        (9, 11),
        (9, 8),
        (10, 13),
        (10, 9),
        (10, 5),
        (10, 1),
    ],
    [
        (0, 0),
        (4, 14),
        (5, 15),
        (5, 12),
        (5, 10),
        (5, 8),
        (6, 14),
        (6, 10),
        (7, 14),
        (8, 14),
        (8, 13),
        (9, 14),
        (9, 10),
        (10, 12),
        (10, 8),
        (10, 4),
        (10, 0),
    ],
    [
        (0, 0),
        (0, 0),
        (4, 13),
        (5, 14),
        (5, 11),
        (5, 9),
        (6, 13),
        (6, 9),
        (7, 13),
        (8, 10),
        (8, 12),
        (9, 13),
        (9, 9),
        (10, 11),
        (10, 7),
        (10, 3),
        (10, 2),
    ],
    [
        (0, 0),
        (0, 0),
        (0, 0),
        (4, 12),
        (4, 11),
        (4, 10),
        (4, 9),
        (4, 8),
        (5, 13),
        (6, 12),
        (7, 12),
        (8, 12),
        (9, 12),
        (10, 10),
        (10, 6),
        (10, 2),
        (10, 0),
    ],
];

/// total_zeros codes indexed by `[total_coeff - 1][total_zeros]`
const TOTAL_ZEROS: [[Vlc; 16]; 15] = [
    [
        (1, 1),
        (3, 3),
        (3, 2),
        (4, 3),
        (4, 2),
        (5, 3),
        (5, 2),
        (6, 3),
        (6, 2),
        (7, 3),
        (7, 2),
        (8, 3),
        (8, 2),
        (9, 3),
        (9, 2),
        (9, 1),
    ],
    [
        (3, 7),
        (3, 6),
        (3, 5),
        (3, 4),
        (3, 3),
        (4, 5),
        (4, 4),
        (4, 3),
        (4, 2),
        (5, 3),
        (5, 2),
        (6, 3),
        (6, 2),
        (6, 1),
        (6, 0),
        (0, 0),
    ],
    [
        (4, 5),
        (3, 7),
        (3, 6),
        (3, 5),
        (4, 4),
        (4, 3),
        (3, 4),
        (3, 3),
        (4, 2),
        (5, 3),
        (5, 2),
        (6, 1),
        (5, 1),
        (6, 0),
        (0, 0),
        (0, 0),
    ],
    [
        (5, 3),
        (3, 7),
        (4, 5),
        (4, 4),
        (3, 6),
        (4, 3),
        (3, 5),
        (4, 2),
        (3, 4),
        (5, 2),
        (5, 1),
        (5, 0),
        (6, 0),
        (0, 0),
        (0, 0),
        (0, 0),
    ],
    [
        (4, 5),
        (4, 4),
        (4, 3),
        (3, 7),
        (3, 6),
        (3, 5),
        (3, 4),
        (3, 3),
        (4, 2),
        (5, 1),
        (4, 1),
        (5, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
    ],
    [
        (6, 1),
        (5, 1),
        (3, 7),
        (3, 6),
        (3, 5),
        (3, 4),
        (3, 3),
        (3, 2),
        (4, 1),
        (6, 0),
        (5, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
    ],
    [
        (6, 1),
        (5, 1),
        (3, 5),
        (3, 4),
        (3, 3),
        (2, 3),
        (3, 2),
        (4, 1),
        (6, 0),
        (5, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
    ],
    [
        (6, 1),
        (4, 1),
        (5, 1),
        (3, 3),
        (2, 3),
        (2, 2),
        (3, 2),
        (5, 0),
        (6, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
    ],
    [
        (6, 1),
        (6, 0),
        (4, 1),
        (2, 3),
        (2, 2),
        (3, 1),
        (2, 1),
        (5, 1),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
    ],
    [
        (5, 1),
        (5, 0),
        (3, 1),
        (2, 3),
        (2, 2),
        (2, 1),
        (4, 1),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
    ],
    [
        (4, 0),
        (4, 1),
        (3, 1),
        (3, 2),
        (1, 1),
        (3, 3),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
    ],
    [
        (4, 0),
        (4, 1),
        (2, 1),
        (1, 1),
        (3, 1),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
    ],
    [
        (3, 0),
        (3, 1),
        (1, 1),
        (2, 1),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
    ],
    [
        (2, 0),
        (2, 1),
        (1, 1),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
    ],
    [
        (1, 0),
        (1, 1),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
        (0, 0),
    ],
];

/// run_before codes indexed by `[min(zeros_left, 7) - 1][run]`; runs past 6
/// with more than 6 zeros left fall back to the unary tail
const RUN_BEFORE: [[Vlc; 7]; 7] = [
    [(1, 1), (1, 0), (0, 0), (0, 0), (0, 0), (0, 0), (0, 0)],
    [(1, 1), (2, 1), (2, 0), (0, 0), (0, 0), (0, 0), (0, 0)],
    [(2, 3), (2, 2), (2, 1), (2, 0), (0, 0), (0, 0), (0, 0)],
    [(2, 3), (2, 2), (2, 1), (3, 1), (3, 0), (0, 0), (0, 0)],
    [(2, 3), (2, 2), (3, 3), (3, 2), (3, 1), (3, 0), (0, 0)],
    [(2, 3), (3, 0), (3, 1), (3, 3), (3, 2), (3, 5), (3, 4)],
    [(3, 7), (3, 6), (3, 5), (3, 4), (3, 3), (3, 2), (3, 1)],
];

/// Zigzag scan of a 4x4 block in raster order
pub const ZIGZAG_4X4: [usize; 16] = [0, 1, 4, 8, 5, 2, 3, 6, 9, 12, 13, 10, 7, 11, 14, 15];

/// Write the coeff_token for the given context
fn write_coeff_token(bw: &mut BitWriter, nc: i32, total_coeff: u8, trailing_ones: u8) {
    if nc >= 8 {
        // Fixed-length code: 6 bits, 4 for coeff count, 2 for trailing ones
        let code = if total_coeff == 0 {
            3
        } else {
            ((total_coeff as u32 - 1) << 2) | trailing_ones as u32
        };
        bw.write_bits(code, 6);
        return;
    }
    let table = match nc {
        0 | 1 => &COEFF_TOKEN_VLC0,
        2 | 3 => &COEFF_TOKEN_VLC1,
        _ => &COEFF_TOKEN_VLC2,
    };
    let (length, bits) = table[trailing_ones as usize][total_coeff as usize];
    bw.write_bits(bits as u32, length);
}

/// Encode one 4x4 residual block, given in zigzag order, into the
/// bitstream. `nc` is the context from the neighbouring blocks' non-zero
/// counts. Returns the block's total non-zero coefficient count.
pub fn write_block(bw: &mut BitWriter, zigzag: &[i32; 16], nc: i32) -> u8 {
    // Gather the non-zero levels in reverse scan order
    let mut levels: Vec<i32> = Vec::with_capacity(16);
    let mut runs: Vec<u8> = Vec::with_capacity(16);
    let mut run = 0u8;
    let mut total_zeros = 0u8;
    let mut seen_coeff = false;
    for &coeff in zigzag.iter().rev() {
        if coeff == 0 {
            if seen_coeff {
                run += 1;
                total_zeros += 1;
            }
        } else {
            if seen_coeff {
                runs.push(run);
            }
            levels.push(coeff);
            run = 0;
            seen_coeff = true;
        }
    }
    if seen_coeff {
        runs.push(run);
    }

    let total_coeff = levels.len() as u8;
    // Trailing ones: up to three +-1 levels at the end of the scan
    let trailing_ones = levels
        .iter()
        .take(3)
        .take_while(|l| l.abs() == 1)
        .count() as u8;

    write_coeff_token(bw, nc, total_coeff, trailing_ones);
    if total_coeff == 0 {
        return 0;
    }

    // Trailing one signs, reverse scan order
    for level in levels.iter().take(trailing_ones as usize) {
        bw.write_bit(*level < 0);
    }

    // Remaining levels with adaptive suffix length
    let mut suffix_length = if total_coeff > 10 && trailing_ones < 3 {
        1
    } else {
        0
    };
    for (i, &level) in levels.iter().enumerate().skip(trailing_ones as usize) {
        // Levels below the trailing-one threshold shift down by one
        // magnitude step when the block started with fewer than 3 ones
        let mut code = if level > 0 {
            (level as u32) * 2 - 2
        } else {
            (-level as u32) * 2 - 1
        };
        if i == trailing_ones as usize && trailing_ones < 3 {
            code = code.saturating_sub(2);
        }

        write_level(bw, code, suffix_length);

        if suffix_length == 0 {
            suffix_length = 1;
        }
        if level.unsigned_abs() > (3 << (suffix_length - 1)) && suffix_length < 6 {
            suffix_length += 1;
        }
    }

    // Zero-run information
    if total_coeff < 16 {
        let (length, bits) = TOTAL_ZEROS[total_coeff as usize - 1][total_zeros as usize];
        bw.write_bits(bits as u32, length);
    }
    let mut zeros_left = total_zeros;
    for (i, &run) in runs.iter().enumerate() {
        if zeros_left == 0 || i + 1 == runs.len() {
            break;
        }
        write_run_before(bw, run, zeros_left);
        zeros_left -= run;
    }

    total_coeff
}

/// Level prefix/suffix code
fn write_level(bw: &mut BitWriter, code: u32, suffix_length: u8) {
    if suffix_length == 0 {
        if code < 14 {
            // Unary prefix
            bw.write_bits(1, code as u8 + 1);
        } else if code < 30 {
            bw.write_bits(1, 15);
            bw.write_bits(code - 14, 4);
        } else {
            bw.write_bits(1, 16);
            bw.write_bits(code - 30, 12);
        }
    } else {
        let prefix = code >> suffix_length;
        if prefix < 15 {
            bw.write_bits(1, prefix as u8 + 1);
            bw.write_bits(code & ((1 << suffix_length) - 1), suffix_length);
        } else {
            bw.write_bits(1, 16);
            bw.write_bits(code - (15 << suffix_length), 12);
        }
    }
}

fn write_run_before(bw: &mut BitWriter, run: u8, zeros_left: u8) {
    let zl = zeros_left.min(7) as usize;
    if run < 7 {
        let (length, bits) = RUN_BEFORE[zl - 1][run as usize];
        bw.write_bits(bits as u32, length);
    } else {
        // Unary tail for runs past 6
        bw.write_bits(0, 3);
        bw.write_bits(1, run - 7 + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bits_of(bw: BitWriter) -> Vec<u8> {
        bw.finish()
    }

    #[test]
    fn test_bit_writer_packs_msb_first() {
        let mut bw = BitWriter::new();
        bw.write_bits(0b1011, 4);
        assert_eq!(bw.bits_written(), 4);
        let bytes = bits_of(bw);
        // 1011 + stop bit 1 + padding 000
        assert_eq!(bytes, vec![0b1011_1000]);
    }

    #[test]
    fn test_exp_golomb_ue() {
        // 0 -> 1, 1 -> 010, 2 -> 011, 3 -> 00100
        let mut bw = BitWriter::new();
        bw.write_ue(0);
        assert_eq!(bw.bits_written(), 1);

        let mut bw = BitWriter::new();
        bw.write_ue(1);
        assert_eq!(bw.bits_written(), 3);

        let mut bw = BitWriter::new();
        bw.write_ue(3);
        assert_eq!(bw.bits_written(), 5);
        assert_eq!(bits_of(bw), vec![0b00100_1_00]);
    }

    #[test]
    fn test_exp_golomb_se() {
        // 1 -> ue(1) = 010, -1 -> ue(2) = 011
        let mut bw = BitWriter::new();
        bw.write_se(1);
        bw.write_se(-1);
        assert_eq!(bw.bits_written(), 6);
        assert_eq!(bits_of(bw), vec![0b010_011_1_0]);
    }

    #[test]
    fn test_coeff_token_empty_block() {
        // nC 0, no coefficients: single "1" bit
        let mut bw = BitWriter::new();
        let count = write_block(&mut bw, &[0; 16], 0);
        assert_eq!(count, 0);
        assert_eq!(bw.bits_written(), 1);
    }

    #[test]
    fn test_coeff_token_single_trailing_one() {
        // One coefficient of +-1: coeff_token "01" (2 bits) + sign bit +
        // total_zeros
        let mut zigzag = [0i32; 16];
        zigzag[0] = 1;
        let mut bw = BitWriter::new();
        let count = write_block(&mut bw, &zigzag, 0);
        assert_eq!(count, 1);
        // 2 (token) + 1 (sign) + 1 (total_zeros = 0 for tc=1 is "1")
        assert_eq!(bw.bits_written(), 4);
    }

    #[test]
    fn test_block_nonzero_count_reported() {
        let mut zigzag = [0i32; 16];
        zigzag[0] = 4;
        zigzag[1] = -2;
        zigzag[2] = 1;
        let mut bw = BitWriter::new();
        let count = write_block(&mut bw, &zigzag, 0);
        assert_eq!(count, 3);
        assert!(bw.bits_written() > 0);
    }

    #[test]
    fn test_fixed_length_token_for_high_nc() {
        let mut bw = BitWriter::new();
        write_coeff_token(&mut bw, 8, 0, 0);
        assert_eq!(bw.bits_written(), 6);
        assert_eq!(bits_of(bw), vec![0b000011_1_0]);
    }

    #[test]
    fn test_zigzag_scan_is_a_permutation() {
        let mut seen = [false; 16];
        for &index in &ZIGZAG_4X4 {
            assert!(!seen[index]);
            seen[index] = true;
        }
    }
}
