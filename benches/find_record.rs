extern crate criterion;

use bureau_sstable::sstable::{SsTable, SsTableOpenOptions, SsTableReader};
use bytes::Bytes;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use random_string::generate_rng;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::path::PathBuf;

const KEY_COUNT: usize = 20_000;
const CHARSET: &str = "1234567890_-abcdefghigklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

#[derive(Debug, Clone)]
enum Position {
    Start,
    Mid,
    End,
    Missing,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Position::Start => write!(f, "_at_the_start"),
            Position::Mid => write!(f, "_at_the_mid"),
            Position::End => write!(f, "_at_the_end"),
            Position::Missing => write!(f, "_missing"),
        }
    }
}

struct BenchCase {
    // Keeps the storages alive for the reader.
    _table: SsTable,
    reader: SsTableReader,
    keys: Vec<Bytes>,
}

impl BenchCase {
    fn key_at(&self, position: &Position) -> Bytes {
        let at = match position {
            Position::Start => 0.1,
            Position::Mid => 0.5,
            Position::End => 0.9,
            Position::Missing => return Bytes::from("~ not in the table"),
        };

        self.keys[(self.keys.len() as f64 * at) as usize].clone()
    }
}

fn generate_table(len_rng: Range<usize>, index_block_size: usize, dir: Option<&PathBuf>) -> BenchCase {
    assert!(len_rng.start > 0, "Key should be longer then 0");

    let mut entries = BTreeMap::new();
    while entries.len() < KEY_COUNT {
        entries.insert(
            generate_rng(len_rng.clone(), CHARSET),
            generate_rng(len_rng.clone(), CHARSET),
        );
    }

    let options = SsTableOpenOptions::default()
        .with_in_memory(dir.is_none())
        .with_index_block_size(index_block_size);
    let mut table = match dir {
        Some(dir) => SsTable::new(dir, options),
        None => SsTable::new("", options),
    };

    let mut writer = table.new_writer().unwrap();
    for (key, value) in &entries {
        writer.write(key.as_bytes(), value.as_bytes(), false).unwrap();
    }
    writer.commit().unwrap();

    let reader = table.new_reader().unwrap();

    BenchCase {
        _table: table,
        reader,
        keys: entries.into_keys().map(Bytes::from).collect(),
    }
}

fn find_record(c: &mut Criterion, index_block_size: usize, dir: Option<&PathBuf>) {
    let storage = if dir.is_some() { "file" } else { "memory" };
    let mut group = c.benchmark_group(format!(
        "find record in {}, index block {}B",
        storage, index_block_size
    ));

    group.warm_up_time(std::time::Duration::from_millis(250));

    let mut case = generate_table(6..60, index_block_size, dir);

    for position in [Position::Start, Position::Mid, Position::End, Position::Missing] {
        let key = case.key_at(&position);

        group.bench_with_input(BenchmarkId::new("find_record", &position), &key, |b, key| {
            b.iter(|| case.reader.find_record(key).unwrap());
        });
    }
}

fn small_index_blocks(c: &mut Criterion) {
    find_record(c, 1024, None);
}

fn default_index_blocks(c: &mut Criterion) {
    find_record(c, 4 * 1024, None);
}

fn file_storage(c: &mut Criterion) {
    let dir = std::env::temp_dir().join(format!("bureau-sstable-bench-{}", uuid::Uuid::now_v7()));
    std::fs::create_dir_all(&dir).unwrap();

    find_record(c, 4 * 1024, Some(&dir));

    std::fs::remove_dir_all(dir).unwrap();
}

criterion_group!(
    find_records,
    small_index_blocks,
    default_index_blocks,
    file_storage
);

criterion_main!(find_records);
