//! External merge engine: bounded fan-in, multi-pass k-way merging of
//! sorted segments with an optional raw (no-deserialization) fast path.

pub mod input;
pub mod merger;

pub use input::{DiskInputOptions, MergeInput};
pub use merger::{
    BytewiseRawComparer, MergeCounters, MergeHelper, MergeOptions, MergeResult,
    MergeResultReader, MergeResultRecord, MergingReader, RawComparer,
};
