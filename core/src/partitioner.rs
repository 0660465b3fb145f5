//! Partitioners for routing records to downstream tasks.
//!
//! The hash partitioner maps a record to `(hash & 0x7FFFFFFF) % partitions`,
//! with the hash supplied by a pluggable [`EqualityComparer`] so a stage can
//! install a key-extraction comparer without changing the partitioner itself.
//! The pre-partitioned variant is used by push-style writers that already
//! know the destination partition per record and only need the partitioner
//! abstraction to satisfy the multi-writer interface.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Equality and hashing strategy for partitioning decisions.
pub trait EqualityComparer<T>: Send + Sync {
    fn equals(&self, a: &T, b: &T) -> bool;
    fn hash(&self, value: &T) -> u64;
}

/// Comparer delegating to the type's own `Eq`/`Hash`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultEqualityComparer;

impl<T: Hash + Eq> EqualityComparer<T> for DefaultEqualityComparer {
    fn equals(&self, a: &T, b: &T) -> bool {
        a == b
    }

    fn hash(&self, value: &T) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }
}

/// Maps a record to an integer partition number in `[0, partitions)`.
pub trait Partitioner<T>: Send {
    /// The configured partition count.
    fn partitions(&self) -> usize;

    /// Change the partition count.
    fn set_partitions(&mut self, partitions: usize);

    /// The partition `value` routes to. Always in `[0, partitions)`.
    fn partition(&self, value: &T) -> usize;
}

/// Partitioner that hashes the record through an [`EqualityComparer`].
pub struct HashPartitioner<T, E = DefaultEqualityComparer> {
    partitions: usize,
    comparer: E,
    _phantom: PhantomData<fn(&T)>,
}

impl<T: Hash + Eq> HashPartitioner<T, DefaultEqualityComparer> {
    pub fn new(partitions: usize) -> Self {
        Self::with_comparer(partitions, DefaultEqualityComparer)
    }
}

impl<T, E: EqualityComparer<T>> HashPartitioner<T, E> {
    pub fn with_comparer(partitions: usize, comparer: E) -> Self {
        assert!(partitions > 0, "partition count must be positive");
        Self {
            partitions,
            comparer,
            _phantom: PhantomData,
        }
    }
}

impl<T, E: EqualityComparer<T>> Partitioner<T> for HashPartitioner<T, E> {
    fn partitions(&self) -> usize {
        self.partitions
    }

    fn set_partitions(&mut self, partitions: usize) {
        assert!(partitions > 0, "partition count must be positive");
        self.partitions = partitions;
    }

    fn partition(&self, value: &T) -> usize {
        ((self.comparer.hash(value) as u32) & 0x7FFF_FFFF) as usize % self.partitions
    }
}

/// Partitioner that ignores the record and returns an externally set
/// "current partition".
pub struct PrepartitionedPartitioner<T> {
    partitions: usize,
    current: usize,
    _phantom: PhantomData<fn(&T)>,
}

impl<T> PrepartitionedPartitioner<T> {
    pub fn new(partitions: usize) -> Self {
        assert!(partitions > 0, "partition count must be positive");
        Self {
            partitions,
            current: 0,
            _phantom: PhantomData,
        }
    }

    /// Set the partition returned for every record until the next call.
    pub fn set_current_partition(&mut self, partition: usize) {
        assert!(
            partition < self.partitions,
            "current partition {partition} out of range 0..{}",
            self.partitions
        );
        self.current = partition;
    }

    pub fn current_partition(&self) -> usize {
        self.current
    }
}

impl<T: Send> Partitioner<T> for PrepartitionedPartitioner<T> {
    fn partitions(&self) -> usize {
        self.partitions
    }

    fn set_partitions(&mut self, partitions: usize) {
        assert!(partitions > 0, "partition count must be positive");
        self.partitions = partitions;
        if self.current >= partitions {
            self.current = 0;
        }
    }

    fn partition(&self, _value: &T) -> usize {
        self.current
    }
}
