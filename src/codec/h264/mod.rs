//! H.264 / AVC macroblock encode path
//!
//! Native implementation of the per-macroblock encode pipeline: intra 4x4
//! prediction with immediate reconstruction, inter 16x16 motion-vector
//! prediction, the 4x4 integer transform with quantization, CAVLC residual
//! entropy coding, pluggable rate control, and the in-loop deblocking
//! filter. Macroblocks encode in raster order, threading an
//! [`EncodingContext`] forward; entropy coding of residuals is deferred to
//! a second pass once the macroblock's coded-block pattern is known.

pub mod cavlc;
pub mod deblock;
pub mod encoder;
pub mod rate;

pub use cavlc::BitWriter;
pub use encoder::{EncodingContext, MacroblockEncoder};
pub use rate::{ConstantQpRate, FeedbackRate, FixedBitrateRate, RateControl, SliceType};

/// Macroblock coding type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MbType {
    /// Intra, 4x4 prediction
    I4x4,
    /// Intra, 16x16 prediction
    I16x16,
    /// Inter, one 16x16 partition
    P16x16,
}

impl MbType {
    pub fn is_intra(self) -> bool {
        matches!(self, MbType::I4x4 | MbType::I16x16)
    }
}

/// One encoded macroblock: the reconstructed pixels plus the per-4x4-block
/// state later macroblocks and the deblocking filter need. Blocks are
/// indexed 0-15 in the standard's scan order.
#[derive(Debug, Clone)]
pub struct EncodedMb {
    pub mb_type: MbType,
    pub qp: u8,
    /// Reconstructed luma, 16x16 raster order
    pub pixels: [u8; 256],
    /// Non-zero coefficient count per 4x4 block
    pub nc: [u8; 16],
    /// Motion vector x components per 4x4 block, quarter-pel
    pub mx: [i16; 16],
    /// Motion vector y components per 4x4 block, quarter-pel
    pub my: [i16; 16],
}

impl EncodedMb {
    pub fn new(mb_type: MbType, qp: u8) -> Self {
        EncodedMb {
            mb_type,
            qp,
            pixels: [0; 256],
            nc: [0; 16],
            mx: [0; 16],
            my: [0; 16],
        }
    }
}

/// Motion-vector predictor: the component-wise median of the causal
/// neighbours A (left), B (above) and C (above-right), with D (above-left)
/// standing in for an unavailable C.
///
/// Edge rules, in order:
/// - C unavailable: C is replaced by D (value, reference and availability).
/// - Only A available (B and C both unavailable): the predictor is A.
/// - Exactly one neighbour references the current picture (`*_ref == 0`):
///   that neighbour short-circuits the median.
///
/// `a`, `b`, `c`, `d` are one vector component; `ar` .. `dr` the reference
/// indices relative to the current reference (0 = same).
#[allow(clippy::too_many_arguments)]
pub fn median(
    a: i32,
    ar: i32,
    b: i32,
    br: i32,
    c: i32,
    cr: i32,
    d: i32,
    dr: i32,
    a_avail: bool,
    b_avail: bool,
    c_avail: bool,
    d_avail: bool,
) -> i32 {
    let (mut a, mut ar) = (a, ar);
    let (mut b, mut br) = (b, br);
    let (mut c, mut cr, mut c_avail) = (c, cr, c_avail);

    if !c_avail {
        c = d;
        cr = dr;
        c_avail = d_avail;
    }

    if a_avail && !b_avail && !c_avail {
        b = a;
        br = ar;
        c = a;
        cr = ar;
    }

    if !a_avail {
        a = 0;
        ar = -1;
    }
    if !b_avail {
        b = 0;
        br = -1;
    }
    if !c_avail {
        c = 0;
        cr = -1;
    }

    if ar == 0 && br != 0 && cr != 0 {
        return a;
    } else if br == 0 && ar != 0 && cr != 0 {
        return b;
    } else if cr == 0 && ar != 0 && br != 0 {
        return c;
    }

    a + b + c - a.min(b.min(c)) - a.max(b.max(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_all_available_same_ref() {
        // Plain 3-way median
        assert_eq!(
            median(1, 0, 5, 0, 3, 0, 9, 0, true, true, true, true),
            3
        );
        assert_eq!(
            median(-4, 0, 2, 0, 2, 0, 0, 0, true, true, true, true),
            2
        );
    }

    #[test]
    fn test_median_only_a_available() {
        // B, C and D unavailable: predictor is A regardless of refs
        assert_eq!(
            median(7, 0, 99, 0, 99, 0, 99, 0, true, false, false, false),
            7
        );
        assert_eq!(
            median(-3, 1, 0, 0, 0, 0, 0, 0, true, false, false, false),
            -3
        );
    }

    #[test]
    fn test_median_c_replaced_by_d() {
        // C unavailable, D available: D participates as C
        assert_eq!(
            median(1, 0, 5, 0, 99, 0, 3, 0, true, true, false, true),
            3
        );
    }

    #[test]
    fn test_median_c_substitution_with_single_ref_rule() {
        // The concrete case from the contract: aAvb, !bAvb, !cAvb, dAvb,
        // d = 7. C becomes D (available), so the A-only rule does not
        // apply; with only A's reference current, A short-circuits.
        assert_eq!(
            median(2, 0, 0, 0, 0, 0, 7, 1, true, false, false, true),
            2
        );
        // Same shape, but D also references the current picture: the
        // unavailable B is zeroed and the median runs over (a, 0, d)
        assert_eq!(
            median(2, 0, 0, 0, 0, 0, 7, 0, true, false, false, true),
            2
        );
    }

    #[test]
    fn test_median_single_matching_reference_wins() {
        // Only B references the current picture
        assert_eq!(
            median(10, 1, 4, 0, 8, 2, 0, 0, true, true, true, true),
            4
        );
        // Only C does
        assert_eq!(
            median(10, 1, 8, 2, 6, 0, 0, 0, true, true, true, true),
            6
        );
    }
}
