//! Permutation write and scan throughput across row counts.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use sparql_core::permutation::{Permutation, PermutationWriter, PermutationWriterConfig, ScanRange, Snapshot};
use sparql_core::value::Id;
use sparql_core::CancellationToken;

fn make_sorted_rows(n: u64, num_subjects: u64) -> Vec<Vec<Id>> {
    let mut rows = Vec::with_capacity(n as usize);
    for i in 0..n {
        let subject = i % num_subjects;
        rows.push(vec![Id::from_int(subject as i64), Id::from_int((i % 50) as i64), Id::from_int(i as i64), Id::from_int(0)]);
    }
    rows.sort_by(|a, b| a[0].compare_without_local_vocab(&b[0]).then(a[1].compare_without_local_vocab(&b[1])));
    rows
}

fn bench_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("permutation_write");
    for &size in &[1_000u64, 10_000, 100_000] {
        let rows = make_sorted_rows(size, 200);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                let tmp = tempfile::tempdir().expect("tempdir");
                let data_path = tmp.path().join("bench.index.spo");
                let meta_path = tmp.path().join("bench.index.spo.meta");
                let mut writer = PermutationWriter::create(&data_path, PermutationWriterConfig::new(4)).expect("create");
                writer.push_rows(&rows).expect("push_rows");
                writer.finish(&meta_path).expect("finish")
            });
        });
    }
    group.finish();
}

fn bench_scan(c: &mut Criterion) {
    let tmp = tempfile::tempdir().expect("tempdir");
    let data_path = tmp.path().join("scan.index.spo");
    let meta_path = tmp.path().join("scan.index.spo.meta");
    let rows = make_sorted_rows(100_000, 200);
    let mut writer = PermutationWriter::create(&data_path, PermutationWriterConfig::new(4)).expect("create");
    writer.push_rows(&rows).expect("push_rows");
    writer.finish(&meta_path).expect("finish");

    let permutation = Permutation::load(data_path, meta_path, true).expect("load");
    let cancellation = CancellationToken::no_deadline();

    c.bench_function("permutation_scan_one_relation", |b| {
        b.iter(|| {
            let range = ScanRange::exact(Id::from_int(42));
            permutation.scan(&range, &cancellation, &Snapshot).expect("scan")
        });
    });
}

criterion_group!(benches, bench_write, bench_scan);
criterion_main!(benches);
