//! Journal write and read benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use quire_core::journal::{decode_record, encode_record};
use quire_core::{Journal, JournalConfig, JournalReader, Loggable, PageNum, TransactionId};
use tempfile::TempDir;

/// Deterministic page image of the given size.
fn page_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

fn update(size: usize) -> Loggable {
    Loggable::UpdatePage {
        txn: TransactionId::new(1),
        page: PageNum::new(42),
        offset: 0,
        before: page_data(size),
        after: page_data(size),
    }
}

fn open_journal(temp_dir: &TempDir) -> Journal {
    let config = JournalConfig::new(temp_dir.path()).max_size(16 * 1024 * 1024);
    let journal = Journal::open(config).unwrap();
    journal.switch_files().unwrap();
    journal
}

/// Benchmark buffered appends without flushing.
fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("journal_append");

    for size in [64, 256, 1024, 4096].iter() {
        group.throughput(Throughput::Bytes(*size as u64 * 2));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let temp_dir = TempDir::new().unwrap();
            let journal = open_journal(&temp_dir);
            let loggable = update(size);

            b.iter(|| {
                let lsn = journal.append(black_box(&loggable)).unwrap();
                black_box(lsn);
            });
            journal.flush(false, true).unwrap();
        });
    }

    group.finish();
}

/// Benchmark a commit-style append followed by an fsync'd flush.
fn bench_append_sync(c: &mut Criterion) {
    let mut group = c.benchmark_group("journal_append_sync");

    // fsync dominates; keep the sample small
    group.sample_size(20);

    for size in [256, 4096].iter() {
        group.throughput(Throughput::Bytes(*size as u64 * 2));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let temp_dir = TempDir::new().unwrap();
            let journal = open_journal(&temp_dir);
            let loggable = update(size);

            b.iter(|| {
                journal.append(black_box(&loggable)).unwrap();
                journal.flush(true, true).unwrap();
            });
        });
    }

    group.finish();
}

/// Benchmark sequential reading of a whole journal file.
fn bench_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("journal_read");

    for count in [100, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let temp_dir = TempDir::new().unwrap();
            let journal = open_journal(&temp_dir);
            let number = journal.current_file_number().unwrap();
            let loggable = update(256);
            for _ in 0..count {
                journal.append(&loggable).unwrap();
            }
            journal.flush(true, false).unwrap();

            b.iter(|| {
                let reader = JournalReader::open(journal.dir(), number).unwrap();
                let read = reader.map(|entry| entry.unwrap()).count();
                black_box(read);
            });
        });
    }

    group.finish();
}

/// Benchmark record encoding and decoding.
fn bench_record_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_codec");

    for size in [64, 1024].iter() {
        let loggable = update(*size);
        let record = encode_record(&loggable).unwrap();
        group.throughput(Throughput::Bytes(record.len() as u64));

        group.bench_with_input(BenchmarkId::new("encode", size), &loggable, |b, loggable| {
            b.iter(|| black_box(encode_record(black_box(loggable)).unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("decode", size), &record, |b, record| {
            b.iter(|| black_box(decode_record(black_box(record), 6).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_append,
    bench_append_sync,
    bench_read,
    bench_record_codec,
);
criterion_main!(benches);
