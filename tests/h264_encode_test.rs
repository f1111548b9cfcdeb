//! H.264 macroblock encode path integration tests
//!
//! Drives the macroblock encoder over a whole small frame with rate
//! control attached, and runs the deblocking filter across the
//! reconstructed macroblock edges.

use avpipe::codec::h264::deblock::{boundary_strength, filter_luma_edge};
use avpipe::codec::h264::{
    BitWriter, ConstantQpRate, EncodedMb, EncodingContext, FixedBitrateRate, MacroblockEncoder,
    RateControl, SliceType,
};

const MB_COLS: usize = 4;
const MB_ROWS: usize = 3;

/// Extract one 16x16 macroblock from a luma frame
fn macroblock(frame: &[u8], width: usize, mb_x: usize, mb_y: usize) -> [u8; 256] {
    let mut block = [0u8; 256];
    for y in 0..16 {
        let row = (mb_y * 16 + y) * width + mb_x * 16;
        block[y * 16..y * 16 + 16].copy_from_slice(&frame[row..row + 16]);
    }
    block
}

/// Synthetic gradient frame
fn gradient_frame(width: usize, height: usize) -> Vec<u8> {
    let mut frame = vec![0u8; width * height];
    for y in 0..height {
        for x in 0..width {
            frame[y * width + x] = ((x * 2 + y * 3) % 256) as u8;
        }
    }
    frame
}

#[test]
fn test_full_frame_intra_encode() {
    let width = MB_COLS * 16;
    let height = MB_ROWS * 16;
    let frame = gradient_frame(width, height);

    let mut rc = ConstantQpRate::new(24);
    let qp = rc.start_picture(MB_COLS * MB_ROWS, 100_000, SliceType::I);
    assert_eq!(qp, 24);

    let mut ctx = EncodingContext::new(MB_COLS, MB_ROWS);
    let mut bw = BitWriter::new();
    let mut reconstruction: Vec<EncodedMb> = Vec::new();

    for mb_y in 0..MB_ROWS {
        for mb_x in 0..MB_COLS {
            assert_eq!(ctx.mb_x, mb_x);
            assert_eq!(ctx.mb_y, mb_y);

            let delta = rc.init_qp_delta(mb_x, mb_y);
            let mb_qp = (qp as i32 + delta).clamp(0, 51) as u8;
            let source = macroblock(&frame, width, mb_x, mb_y);

            let before = bw.bits_written();
            let encoded = MacroblockEncoder::encode_intra_4x4(&mut ctx, &source, mb_qp, &mut bw);
            rc.accept(bw.bits_written() - before);

            // Reconstruction stays within quantizer reach of the source
            for i in 0..256 {
                let error = (encoded.pixels[i] as i32 - source[i] as i32).abs();
                assert!(error <= 32, "mb ({},{}) pixel {}: error {}", mb_x, mb_y, i, error);
            }
            reconstruction.push(encoded);
        }
    }

    // The context walked the whole frame
    assert_eq!(ctx.mb_y, MB_ROWS);
    assert!(bw.bits_written() > 0);

    // Every macroblock recorded a QP
    assert!(reconstruction.iter().all(|mb| mb.qp == 24));
}

#[test]
fn test_rate_control_steers_qp_over_a_picture() {
    let width = MB_COLS * 16;
    let frame = gradient_frame(width, 16);

    let mut rc = FixedBitrateRate::new(30);
    // A starved budget forces the QP upward as macroblocks overshoot
    let base_qp = rc.start_picture(MB_COLS, 40, SliceType::P);

    let mut ctx = EncodingContext::new(MB_COLS, 1);
    let mut bw = BitWriter::new();
    let mut qp = base_qp;
    let mut raised = false;
    for mb_x in 0..MB_COLS {
        let delta = rc.init_qp_delta(mb_x, 0);
        qp = (qp as i32 + delta).clamp(0, 51) as u8;
        if delta > 0 {
            raised = true;
        }
        let source = macroblock(&frame, width, mb_x, 0);
        let before = bw.bits_written();
        MacroblockEncoder::encode_intra_4x4(&mut ctx, &source, qp, &mut bw);
        rc.accept(bw.bits_written() - before);
    }
    assert!(raised, "rate control never raised the QP on a starved budget");
}

#[test]
fn test_deblocking_across_reconstructed_edge() {
    let width = 2 * 16;
    let frame = gradient_frame(width, 16);

    let mut ctx = EncodingContext::new(2, 1);
    let mut bw = BitWriter::new();
    let left = MacroblockEncoder::encode_intra_4x4(
        &mut ctx,
        &macroblock(&frame, width, 0, 0),
        28,
        &mut bw,
    );
    let right = MacroblockEncoder::encode_intra_4x4(
        &mut ctx,
        &macroblock(&frame, width, 1, 0),
        28,
        &mut bw,
    );

    // Vertical macroblock edge between the two: intra + macroblock edge
    // selects the strong filter
    let bs = boundary_strength(
        true,
        true,
        true,
        false,
        false,
        (0, 0),
        (0, 0),
        0,
        0,
    );
    assert_eq!(bs, 4);

    // Filter each row's 4-sample edge group in place
    for y in 0..16 {
        let mut samples = [
            left.pixels[y * 16 + 12] as i32,
            left.pixels[y * 16 + 13] as i32,
            left.pixels[y * 16 + 14] as i32,
            left.pixels[y * 16 + 15] as i32,
            right.pixels[y * 16] as i32,
            right.pixels[y * 16 + 1] as i32,
            right.pixels[y * 16 + 2] as i32,
            right.pixels[y * 16 + 3] as i32,
        ];
        let before = samples;
        filter_luma_edge(&mut samples, bs, 28, 0, 0);
        // Samples stay in pixel range and move only within the filter's
        // reach
        for (i, sample) in samples.iter().enumerate() {
            assert!((0..=255).contains(sample));
            assert!((sample - before[i]).abs() <= 16);
        }
    }
}
