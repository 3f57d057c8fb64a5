use crate::{Options, Store};
use std::fs;
use std::path::Path;

/// Options with a small rollover threshold so tests can force multiple
/// segments cheaply. 1 KiB is the smallest accepted value.
pub fn small_opts() -> Options {
    Options::new().segment_threshold_bytes(1024)
}

pub fn open_small(dir: &Path) -> Store {
    Store::open(dir, small_opts()).unwrap()
}

fn count_files_with_ext(dir: &Path, ext: &str) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|s| s.to_str())
                .map(|s| s == ext)
                .unwrap_or(false)
        })
        .count()
}

pub fn count_data_files(dir: &Path) -> usize {
    count_files_with_ext(dir, "data")
}

pub fn count_hint_files(dir: &Path) -> usize {
    count_files_with_ext(dir, "hint")
}

/// Total bytes across all `.data` files in `dir`.
pub fn total_data_bytes(dir: &Path) -> u64 {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|s| s.to_str())
                .map(|s| s == "data")
                .unwrap_or(false)
        })
        .map(|e| e.metadata().unwrap().len())
        .sum()
}

/// Whether `needle` occurs anywhere in any `.data` file in `dir`.
pub fn data_files_contain(dir: &Path, needle: &[u8]) -> bool {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|s| s.to_str())
                .map(|s| s == "data")
                .unwrap_or(false)
        })
        .any(|e| {
            let data = fs::read(e.path()).unwrap();
            data.windows(needle.len()).any(|w| w == needle)
        })
}
