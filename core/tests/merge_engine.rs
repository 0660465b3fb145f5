//! End-to-end merge scenarios over real segment files.

use std::cmp::Ordering;
use std::sync::Arc;

use quern_common::compression::CompressionType;
use quern_common::storage::{FileSystem, LocalFileSystem};

use quern_core::heap::FnComparer;
use quern_core::merge::{
    BytewiseRawComparer, DiskInputOptions, MergeHelper, MergeInput, MergeOptions,
};
use quern_core::records::{BinaryRecordWriter, Record, RecordWriter};

fn fs() -> Arc<dyn FileSystem> {
    Arc::new(LocalFileSystem::new())
}

fn write_segment<T: Record>(
    path: &std::path::Path,
    records: &[T],
    store: &DiskInputOptions,
) {
    let fs = fs();
    let mut writer = BinaryRecordWriter::<T>::new(
        fs.create(path).unwrap(),
        store.buffer_size,
        store.compression,
        store.checksum,
    )
    .unwrap();
    for record in records {
        writer.write_record(record).unwrap();
    }
    writer.finish().unwrap();
}

#[test]
fn test_pair_segments_merge_in_key_order() {
    let dir = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let store = DiskInputOptions::default();

    // Three sorted runs of (key, payload) pairs plus one in-memory run.
    let runs: Vec<Vec<(u64, String)>> = vec![
        (0..40).step_by(4).map(|k| (k, format!("a{k}"))).collect(),
        (1..40).step_by(4).map(|k| (k, format!("b{k}"))).collect(),
        (2..40).step_by(4).map(|k| (k, format!("c{k}"))).collect(),
    ];
    let mut inputs = Vec::new();
    for (index, run) in runs.iter().enumerate() {
        let path = dir.path().join(format!("run{index}"));
        write_segment(&path, run, &store);
        inputs.push(MergeInput::disk(path, store.clone()));
    }
    let memory_run: Vec<(u64, String)> =
        (3..40).step_by(4).map(|k| (k, format!("m{k}"))).collect();
    let expected = runs.iter().map(Vec::len).sum::<usize>() + memory_run.len();
    inputs.push(MergeInput::memory(memory_run));

    let options = MergeOptions::with_comparer(
        scratch.path(),
        Arc::new(FnComparer(|a: &(u64, String), b: &(u64, String)| {
            a.0.cmp(&b.0)
        })),
    );
    let helper = MergeHelper::new(fs(), options).unwrap();
    let counters = helper.counters();

    let mut previous: Option<u64> = None;
    let mut count = 0;
    for record in helper.merge(inputs).unwrap() {
        let (key, _) = record.unwrap().into_value().unwrap();
        if let Some(previous) = previous {
            assert!(previous <= key);
        }
        previous = Some(key);
        count += 1;
    }
    assert_eq!(count, expected);
    assert_eq!(counters.progress(), 1.0);
}

#[test]
fn test_bounded_fan_in_with_compressed_intermediates() {
    let dir = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let store = DiskInputOptions::default();

    let segments = 7;
    let per_segment = 200i64;
    let mut inputs = Vec::new();
    for index in 0..segments {
        let records: Vec<i64> = (0..per_segment)
            .map(|value| value * segments as i64 + index as i64)
            .collect();
        let path = dir.path().join(format!("seg{index}"));
        write_segment(&path, &records, &store);
        inputs.push(MergeInput::disk(path, store.clone()));
    }

    let intermediate = DiskInputOptions {
        compression: CompressionType::Lz4,
        checksum: true,
        ..DiskInputOptions::default()
    };
    let options = MergeOptions::<i64>::new(scratch.path())
        .max_disk_inputs_per_pass(3)
        .intermediate(intermediate);
    let helper = MergeHelper::new(fs(), options).unwrap();
    let counters = helper.counters();

    let merged: Vec<i64> = helper
        .merge(inputs)
        .unwrap()
        .map(|record| record.unwrap().into_value().unwrap())
        .collect();
    assert_eq!(
        merged,
        (0..segments as i64 * per_segment).collect::<Vec<i64>>()
    );
    // Seven runs at fan-in 3: two intermediate passes, then the final pass.
    assert_eq!(counters.merge_passes(), 3);

    // Every intermediate scratch file was removed once the merge finished.
    assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
}

#[test]
fn test_raw_and_typed_merges_produce_identical_output() {
    let dir = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let store = DiskInputOptions::default();

    // Fixed-width big-endian keys make the encoded form order-preserving.
    let make_inputs = || -> Vec<MergeInput<Vec<u8>>> {
        (0..4)
            .map(|index| {
                MergeInput::disk(dir.path().join(format!("keys{index}")), store.clone())
            })
            .collect()
    };
    for index in 0..4u64 {
        let records: Vec<Vec<u8>> = (0..100u64)
            .map(|value| (value * 4 + index).to_be_bytes().to_vec())
            .collect();
        write_segment(&dir.path().join(format!("keys{index}")), &records, &store);
    }

    let typed_options = MergeOptions::<Vec<u8>>::new(scratch.path()).file_prefix("typed_");
    let typed_result = MergeHelper::new(fs(), typed_options)
        .unwrap()
        .merge(make_inputs())
        .unwrap();
    assert!(!typed_result.is_raw());
    let typed: Vec<Vec<u8>> = typed_result
        .map(|record| record.unwrap().into_value().unwrap())
        .collect();

    let raw_options = MergeOptions::<Vec<u8>>::new(scratch.path())
        .file_prefix("raw_")
        .raw_comparer(Arc::new(BytewiseRawComparer));
    let raw_result = MergeHelper::new(fs(), raw_options)
        .unwrap()
        .merge(make_inputs())
        .unwrap();
    assert!(raw_result.is_raw());
    let raw: Vec<Vec<u8>> = raw_result
        .map(|record| record.unwrap().into_value().unwrap())
        .collect();

    assert_eq!(typed, raw);
    assert_eq!(typed.len(), 400);
}

#[test]
fn test_empty_segments_do_not_disturb_the_merge() {
    let dir = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let store = DiskInputOptions::default();

    write_segment::<i64>(&dir.path().join("empty"), &[], &store);
    write_segment(&dir.path().join("full"), &[1i64, 2, 3], &store);

    let helper = MergeHelper::new(
        fs(),
        MergeOptions::<i64>::new(scratch.path()),
    )
    .unwrap();
    let merged: Vec<i64> = helper
        .merge(vec![
            MergeInput::disk(dir.path().join("empty"), store.clone()),
            MergeInput::disk(dir.path().join("full"), store.clone()),
            MergeInput::memory(Vec::new()),
        ])
        .unwrap()
        .map(|record| record.unwrap().into_value().unwrap())
        .collect();
    assert_eq!(merged, vec![1, 2, 3]);
}

#[test]
fn test_partially_consumed_merge_can_be_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let store = DiskInputOptions::default();

    for index in 0..3 {
        let records: Vec<i64> = (0..1000).map(|value| value * 3 + index).collect();
        write_segment(&dir.path().join(format!("seg{index}")), &records, &store);
    }
    let inputs: Vec<MergeInput<i64>> = (0..3)
        .map(|index| MergeInput::disk(dir.path().join(format!("seg{index}")), store.clone()))
        .collect();

    let helper = MergeHelper::new(fs(), MergeOptions::<i64>::new(scratch.path())).unwrap();
    let mut result = helper.merge(inputs).unwrap();
    for expected in 0..5i64 {
        let record = result.next().unwrap().unwrap();
        assert_eq!(record.into_value().unwrap(), expected);
    }
    // Dropping mid-stream releases the open segment readers.
    drop(result);
}

#[test]
fn test_comparer_controls_merge_direction() {
    let dir = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let store = DiskInputOptions::default();

    // Runs sorted descending merge correctly under a reversed comparer.
    write_segment(&dir.path().join("a"), &[9i64, 5, 1], &store);
    write_segment(&dir.path().join("b"), &[8i64, 4, 2], &store);

    let options = MergeOptions::with_comparer(
        scratch.path(),
        Arc::new(FnComparer(|a: &i64, b: &i64| match b.cmp(a) {
            Ordering::Equal => Ordering::Equal,
            other => other,
        })),
    );
    let helper = MergeHelper::new(fs(), options).unwrap();
    let merged: Vec<i64> = helper
        .merge(vec![
            MergeInput::disk(dir.path().join("a"), store.clone()),
            MergeInput::disk(dir.path().join("b"), store.clone()),
        ])
        .unwrap()
        .map(|record| record.unwrap().into_value().unwrap())
        .collect();
    assert_eq!(merged, vec![9, 8, 5, 4, 2, 1]);
}
