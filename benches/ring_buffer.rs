use bytes::{Bytes, BytesMut};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rtp_audio_link::audio::frame_ring;
use rtp_audio_link::network::jitter::JitterBuffer;
use rtp_audio_link::network::rtp::{parse_packet, RtpHeader};

fn bench_ring_write_read(c: &mut Criterion) {
    let (mut producer, mut consumer) = frame_ring::<i16>(2880, 2);
    let frame = vec![1000i16; 960 * 2];
    let mut out = vec![0i16; 960 * 2];

    c.bench_function("ring_write_read_960x2", |b| {
        b.iter(|| {
            producer.write(black_box(&frame));
            consumer.read(black_box(&mut out))
        })
    });
}

fn bench_ring_underflow(c: &mut Criterion) {
    let (_producer, mut consumer) = frame_ring::<f32>(2880, 1);
    let mut out = vec![0f32; 960];

    c.bench_function("ring_read_underflow_960", |b| {
        b.iter(|| consumer.read(black_box(&mut out)))
    });
}

fn bench_jitter_insert_pop(c: &mut Criterion) {
    let payload = Bytes::from_static(&[0u8; 160]);

    c.bench_function("jitter_insert_pop", |b| {
        let mut jitter = JitterBuffer::new(256);
        let mut offset = 0i64;
        b.iter(|| {
            jitter.insert(offset, payload.clone());
            jitter.insert(offset + 160, payload.clone());
            let popped = jitter.pop_due(black_box(offset + 160));
            offset += 320;
            popped
        })
    });
}

fn bench_rtp_parse(c: &mut Criterion) {
    let mut buf = BytesMut::with_capacity(200);
    RtpHeader::new(120, 4242, 160_000, 0xdead_beef).write(&mut buf);
    buf.extend_from_slice(&[0u8; 160]);
    let packet = buf.freeze();

    c.bench_function("rtp_parse_packet", |b| {
        b.iter(|| parse_packet(black_box(packet.clone())))
    });
}

criterion_group!(
    benches,
    bench_ring_write_read,
    bench_ring_underflow,
    bench_jitter_insert_pop,
    bench_rtp_parse
);
criterion_main!(benches);
