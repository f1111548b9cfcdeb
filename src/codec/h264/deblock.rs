//! In-loop deblocking filter
//!
//! Filters run per 4-sample edge group. A boundary strength of 0-4 is
//! selected from the intra/coefficient/motion discontinuity rules; strength
//! 4 applies the strong filter, strengths 1-3 the standard clipped tap.
//! Thresholds come from the QP-indexed alpha/beta tables, clipping from the
//! tc0 table; chroma derives its QP through a mapping table distinct from
//! luma.

/// Alpha threshold per indexA
const ALPHA: [i32; 52] = [
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 4, 4, 5, 6, 7, 8, 9, 10, 12, 13, 15, 17, 20,
    22, 25, 28, 32, 36, 40, 45, 50, 56, 63, 71, 80, 90, 101, 113, 127, 144, 162, 182, 203, 226,
    255, 255,
];

/// Beta threshold per indexB
const BETA: [i32; 52] = [
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 6, 6, 7, 7, 8,
    8, 9, 9, 10, 10, 11, 11, 12, 12, 13, 13, 14, 14, 15, 15, 16, 16, 17, 17, 18, 18,
];

/// Clipping bound per boundary strength (1-3) and indexA
const TC0: [[i32; 52]; 3] = [
    [
        0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 1, 1, 1, 1, 1,
        1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 4, 4, 4, 5, 6, 6, 7, 8, 9, 10, 11, 13,
    ],
    [
        0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 1, 1, 1, 1, 2, 2, 2,
        2, 3, 3, 3, 4, 4, 5, 6, 6, 7, 8, 8, 10, 11, 12, 13, 15, 17, 19, 21, 23, 25,
    ],
    [
        0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3,
        4, 4, 4, 5, 6, 6, 7, 8, 9, 10, 11, 13, 14, 16, 18, 20, 23, 25, 27, 30, 33, 36,
    ],
];

/// Chroma QP derived from luma QP
const CHROMA_QP: [u8; 52] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25,
    26, 27, 28, 29, 29, 30, 31, 32, 32, 33, 34, 34, 35, 35, 36, 36, 37, 37, 37, 38, 38, 38, 39,
    39, 39, 39,
];

/// Map a luma QP to the chroma QP used for chroma edge thresholds
pub fn chroma_qp(luma_qp: u8) -> u8 {
    CHROMA_QP[luma_qp.min(51) as usize]
}

/// Select the boundary strength for one edge between blocks p and q.
///
/// Rules, first match wins: intra on a macroblock edge is 4, intra inside
/// a macroblock 3, residual coefficients on either side 2, a reference
/// mismatch or a motion-vector component differing by a full sample
/// (4 quarter-pel units) is 1, everything else 0.
#[allow(clippy::too_many_arguments)]
pub fn boundary_strength(
    p_intra: bool,
    q_intra: bool,
    macroblock_edge: bool,
    p_coeffs: bool,
    q_coeffs: bool,
    p_mv: (i16, i16),
    q_mv: (i16, i16),
    p_ref: i32,
    q_ref: i32,
) -> u8 {
    if p_intra || q_intra {
        return if macroblock_edge { 4 } else { 3 };
    }
    if p_coeffs || q_coeffs {
        return 2;
    }
    if p_ref != q_ref
        || (p_mv.0 - q_mv.0).abs() >= 4
        || (p_mv.1 - q_mv.1).abs() >= 4
    {
        return 1;
    }
    0
}

/// One 4-sample edge group: p3..p0 left/above of the edge, q0..q3 right/
/// below. Filters one line of the group in place.
///
/// `samples` holds `[p3, p2, p1, p0, q0, q1, q2, q3]`.
pub fn filter_luma_edge(samples: &mut [i32; 8], bs: u8, qp: u8, offset_a: i8, offset_b: i8) {
    if bs == 0 {
        return;
    }
    let index_a = (qp as i32 + offset_a as i32).clamp(0, 51) as usize;
    let index_b = (qp as i32 + offset_b as i32).clamp(0, 51) as usize;
    let alpha = ALPHA[index_a];
    let beta = BETA[index_b];

    let (p2, p1, p0, q0, q1, q2) = (
        samples[1], samples[2], samples[3], samples[4], samples[5], samples[6],
    );

    // The filter only runs across real discontinuities that are small
    // enough to be blocking artifacts rather than image content
    if (p0 - q0).abs() >= alpha || (p1 - p0).abs() >= beta || (q1 - q0).abs() >= beta {
        return;
    }

    let ap = (p2 - p0).abs();
    let aq = (q2 - q0).abs();

    if bs == 4 {
        let strong_threshold = (alpha >> 2) + 2;
        if (p0 - q0).abs() < strong_threshold {
            if ap < beta {
                let p3 = samples[0];
                samples[3] = (p2 + 2 * p1 + 2 * p0 + 2 * q0 + q1 + 4) >> 3;
                samples[2] = (p2 + p1 + p0 + q0 + 2) >> 2;
                samples[1] = (2 * p3 + 3 * p2 + p1 + p0 + q0 + 4) >> 3;
            } else {
                samples[3] = (2 * p1 + p0 + q1 + 2) >> 2;
            }
            if aq < beta {
                let q3 = samples[7];
                samples[4] = (q2 + 2 * q1 + 2 * q0 + 2 * p0 + p1 + 4) >> 3;
                samples[5] = (q2 + q1 + q0 + p0 + 2) >> 2;
                samples[6] = (2 * q3 + 3 * q2 + q1 + q0 + p0 + 4) >> 3;
            } else {
                samples[4] = (2 * q1 + q0 + p1 + 2) >> 2;
            }
        } else {
            samples[3] = (2 * p1 + p0 + q1 + 2) >> 2;
            samples[4] = (2 * q1 + q0 + p1 + 2) >> 2;
        }
        return;
    }

    // Standard filter with clipping
    let tc0 = TC0[bs as usize - 1][index_a];
    let tc = tc0 + (ap < beta) as i32 + (aq < beta) as i32;

    let delta = (((q0 - p0) * 4 + (p1 - q1) + 4) >> 3).clamp(-tc, tc);
    samples[3] = (p0 + delta).clamp(0, 255);
    samples[4] = (q0 - delta).clamp(0, 255);

    if ap < beta {
        let d = ((p2 + ((p0 + q0 + 1) >> 1) - 2 * p1) >> 1).clamp(-tc0, tc0);
        samples[2] = p1 + d;
    }
    if aq < beta {
        let d = ((q2 + ((p0 + q0 + 1) >> 1) - 2 * q1) >> 1).clamp(-tc0, tc0);
        samples[5] = q1 + d;
    }
}

/// Chroma variant: only p0/q0 move, never p1/q1, and the clipping bound is
/// always `tc0 + 1`
pub fn filter_chroma_edge(samples: &mut [i32; 8], bs: u8, luma_qp: u8, offset_a: i8, offset_b: i8) {
    if bs == 0 {
        return;
    }
    let qp = chroma_qp(luma_qp);
    let index_a = (qp as i32 + offset_a as i32).clamp(0, 51) as usize;
    let index_b = (qp as i32 + offset_b as i32).clamp(0, 51) as usize;
    let alpha = ALPHA[index_a];
    let beta = BETA[index_b];

    let (p1, p0, q0, q1) = (samples[2], samples[3], samples[4], samples[5]);
    if (p0 - q0).abs() >= alpha || (p1 - p0).abs() >= beta || (q1 - q0).abs() >= beta {
        return;
    }

    if bs == 4 {
        samples[3] = (2 * p1 + p0 + q1 + 2) >> 2;
        samples[4] = (2 * q1 + q0 + p1 + 2) >> 2;
        return;
    }

    let tc = TC0[bs as usize - 1][index_a] + 1;
    let delta = (((q0 - p0) * 4 + (p1 - q1) + 4) >> 3).clamp(-tc, tc);
    samples[3] = (p0 + delta).clamp(0, 255);
    samples[4] = (q0 - delta).clamp(0, 255);
}
