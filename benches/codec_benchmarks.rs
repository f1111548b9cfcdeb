//! Codec performance benchmarks
//!
//! Benchmarks for the ANIM delta decoder and the H.264 transform/entropy
//! kernels.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use avpipe::codec::anim::{
    delta::{AnimDeltaDecoder, Leniency},
    BitmapImage,
};
use avpipe::codec::h264::cavlc::{write_block, BitWriter};
use avpipe::codec::h264::encoder::{
    dequantize, forward_transform_4x4, inverse_transform_4x4, quantize,
};
use avpipe::format::anim::{BIT_XOR, OP_BYTE_VERTICAL};

/// Byte-vertical XOR delta touching every column of a 320x200 plane
fn dense_delta_payload(width: u32, height: u32) -> Vec<u8> {
    let bytes_per_row = ((width as usize + 15) / 16) * 2;
    let mut payload = Vec::new();
    payload.extend_from_slice(&64u32.to_be_bytes());
    payload.extend_from_slice(&[0u8; 15 * 4]);
    for col in 0..bytes_per_row {
        payload.push(1); // one op per column
        payload.push(0); // repeat run
        payload.push(height as u8); // whole column
        payload.push((col % 255) as u8);
    }
    payload
}

fn bench_anim_delta(c: &mut Criterion) {
    let width = 320u32;
    let height = 200u32;
    let payload = dense_delta_payload(width, height);
    let mut bitmap = BitmapImage::new(width, height, 1);
    let mut decoder = AnimDeltaDecoder::new(Leniency::Strict);

    let mut group = c.benchmark_group("anim_delta");
    group.throughput(Throughput::Bytes(payload.len() as u64));
    group.bench_function("byte_vertical_xor_320x200", |b| {
        b.iter(|| {
            decoder
                .decode(
                    OP_BYTE_VERTICAL,
                    BIT_XOR,
                    black_box(&payload),
                    &mut bitmap,
                )
                .unwrap()
        })
    });
    group.finish();
}

fn bench_h264_transform(c: &mut Criterion) {
    let mut block = [0i32; 16];
    for (i, value) in block.iter_mut().enumerate() {
        *value = (i as i32 * 13) % 64 - 32;
    }

    c.bench_function("h264_transform_quant_roundtrip", |b| {
        b.iter(|| {
            let mut work = black_box(block);
            forward_transform_4x4(&mut work);
            quantize(&mut work, 26, true);
            dequantize(&mut work, 26);
            inverse_transform_4x4(&mut work);
            work
        })
    });
}

fn bench_h264_cavlc(c: &mut Criterion) {
    let mut zigzag = [0i32; 16];
    zigzag[0] = 9;
    zigzag[1] = -4;
    zigzag[2] = 2;
    zigzag[3] = 1;
    zigzag[5] = -1;

    c.bench_function("h264_cavlc_block", |b| {
        b.iter(|| {
            let mut bw = BitWriter::new();
            write_block(&mut bw, black_box(&zigzag), 1);
            bw.finish()
        })
    });
}

criterion_group!(
    benches,
    bench_anim_delta,
    bench_h264_transform,
    bench_h264_cavlc
);
criterion_main!(benches);
