use binrw::io::Cursor;
use binrw::{BinRead, BinWrite};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use purespice::wire::header::{build_packet, MiniHeader};

fn benchmark_header_serialization(c: &mut Criterion) {
    let header = MiniHeader::new(101, 1024);

    c.bench_function("serialize MiniHeader", |b| {
        b.iter(|| {
            let mut cursor = Cursor::new(Vec::new());
            black_box(header).write_le(&mut cursor).unwrap();
            cursor.into_inner()
        });
    });

    let mut cursor = Cursor::new(Vec::new());
    header.write_le(&mut cursor).unwrap();
    let serialized = cursor.into_inner();

    c.bench_function("deserialize MiniHeader", |b| {
        b.iter(|| {
            let mut cursor = Cursor::new(black_box(&serialized));
            let _: MiniHeader = MiniHeader::read_le(&mut cursor).unwrap();
        });
    });
}

fn benchmark_build_packet(c: &mut Criterion) {
    let payload = vec![0xABu8; 4096];
    c.bench_function("build_packet 4KiB payload", |b| {
        b.iter(|| build_packet(black_box(42), black_box(&payload)));
    });
}

fn benchmark_motion_packetisation(c: &mut Criterion) {
    use purespice::mouse::packetize_motion;
    c.bench_function("packetize_motion large delta", |b| {
        b.iter(|| packetize_motion(black_box(12_345), black_box(-6_789)));
    });
}

criterion_group!(
    benches,
    benchmark_header_serialization,
    benchmark_build_packet,
    benchmark_motion_packetisation,
);
criterion_main!(benches);
