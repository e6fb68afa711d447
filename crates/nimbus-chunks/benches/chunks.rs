use nimbus_chunks::{FrameAligner, PartCoalescer};

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

/// Re-align odd-sized reads into 64 KiB frames
#[divan::bench(args = [65536, 1048576, 10485760])]
fn align_frames(bencher: divan::Bencher, size: usize) {
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            let mut aligner = FrameAligner::new(65536).unwrap();
            let mut frames = 0usize;
            for read in divan::black_box(&data).chunks(8191) {
                frames += aligner.push(read).len();
            }
            (frames, aligner.finish())
        });
}

#[divan::bench(args = [65536, 1048576, 10485760])]
fn coalesce_parts(bencher: divan::Bencher, size: usize) {
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            let mut parts = PartCoalescer::new(4).unwrap();
            let mut emitted = 0usize;
            for frame in divan::black_box(&data).chunks(65536 + 17) {
                emitted += usize::from(parts.push_frame(frame).is_some());
            }
            emitted + usize::from(parts.finish().is_some())
        });
}

fn main() {
    divan::main();
}
