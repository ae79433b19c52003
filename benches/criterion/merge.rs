use std::{collections::HashMap, sync::Arc};

use arrow::{
    array::{Int64Array, StringArray},
    datatypes::{DataType, Field, Schema},
};
use bytes::Bytes;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use portion_scan::{
    blob::{encode_column_chunk, BlobId, BlobRange},
    columns::IndexInfo,
    key::SortKey,
    metadata::{ColumnRecord, PortionInfo, ReadMetadata, ReadMetadataBuilder},
    mvcc::Snapshot,
    NoopObserver, PlainReader, ReadOptions,
};

const RNG_SEED: u64 = 3;
const ROWS_PER_PORTION: usize = 4096;

fn key(key: i64) -> SortKey {
    SortKey::from_columns(
        Arc::new(Schema::new(vec![Field::new("k", DataType::Int64, false)])),
        vec![Arc::new(Int64Array::from(vec![key]))],
    )
    .unwrap()
}

/// `portions` overlapping portions over one key space, each a different
/// version.
fn build(portions: usize) -> (ReadMetadata, HashMap<BlobRange, Bytes>) {
    let schema = Arc::new(Schema::new(vec![
        Field::new("k", DataType::Int64, false),
        Field::new("v", DataType::Utf8, true),
    ]));
    let index = Arc::new(IndexInfo::new(schema.clone()));
    let mut rng = fastrand::Rng::with_seed(RNG_SEED);
    let mut blobs = HashMap::new();
    let mut infos = Vec::new();

    for portion in 0..portions {
        let mut keys: Vec<i64> = (0..ROWS_PER_PORTION)
            .map(|_| rng.i64(0..(ROWS_PER_PORTION * portions) as i64))
            .collect();
        keys.sort_unstable();
        keys.dedup();
        let values: Vec<String> = keys.iter().map(|k| format!("{portion}-{k}")).collect();
        let columns: [Arc<dyn arrow::array::Array>; 2] = [
            Arc::new(Int64Array::from(keys.clone())),
            Arc::new(StringArray::from(values)),
        ];

        let blob = BlobId::new();
        let mut info = PortionInfo::new(
            portion as u64,
            Snapshot::new(portion as u64 + 1, 0),
            keys.len(),
            key(keys[0]),
            key(keys[keys.len() - 1]),
        );
        let mut offset = 0;
        for (pos, column) in columns.into_iter().enumerate() {
            let data = encode_column_chunk(&schema.fields()[pos], column).unwrap();
            let range = BlobRange::new(blob, offset, data.len() as u64);
            offset += data.len() as u64;
            blobs.insert(range, data);
            info = info.with_record(ColumnRecord::new(index.column_ids()[pos], 0, range));
        }
        infos.push(info);
    }

    let metadata = ReadMetadataBuilder::new(index.clone(), vec![index.column_ids()[0]])
        .portions(infos)
        .build()
        .unwrap();
    (metadata, blobs)
}

fn scan(metadata: &Arc<ReadMetadata>, blobs: &HashMap<BlobRange, Bytes>) -> usize {
    let options = ReadOptions::default().observer(Arc::new(NoopObserver));
    let mut reader = PlainReader::try_new(metadata.clone(), options).unwrap();
    let mut rows = 0;
    while !reader.is_finished() {
        if let Some(range) = reader.extract_next_blob().unwrap() {
            reader.add_data(&range, blobs[&range].clone()).unwrap();
        }
        for result in reader.extract_ready_results(8192).unwrap() {
            rows += result.records_count();
        }
    }
    rows
}

fn merge_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");

    for portions in [1, 4, 16] {
        let (metadata, blobs) = build(portions);
        let metadata = Arc::new(metadata);
        group.bench_with_input(
            BenchmarkId::new("overlapping_portions", portions),
            &portions,
            |b, _| b.iter(|| scan(&metadata, &blobs)),
        );
    }

    group.finish();
}

criterion_group!(benches, merge_scan);
criterion_main!(benches);
