//! Inputs to a merge: sorted record segments on disk or in memory.

use std::path::PathBuf;
use std::sync::Arc;

use quern_common::compression::CompressionType;
use quern_common::storage::FileSystem;

use crate::error::{EngineError, Result};
use crate::records::{
    BinaryRecordReader, DEFAULT_BUFFER_SIZE, RawRecord, RawRecordReader, Record, RecordReader,
    VecRecordReader,
};

/// How a disk-resident segment is stored.
#[derive(Debug, Clone)]
pub struct DiskInputOptions {
    pub buffer_size: usize,
    pub compression: CompressionType,
    pub checksum: bool,
}

impl Default for DiskInputOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            compression: CompressionType::None,
            checksum: false,
        }
    }
}

/// A handle to one sorted segment of records.
///
/// Segments are opened lazily when the merge begins and closed as each is
/// exhausted. Disk segments support raw reads; a typed memory segment does
/// not (its records were never serialized), while a raw memory segment does.
pub enum MergeInput<T: Record> {
    Disk {
        path: PathBuf,
        /// Uncompressed data length when known; drives progress fractions
        /// for compressed segments.
        uncompressed_len: Option<u64>,
        options: DiskInputOptions,
    },
    Memory {
        records: Vec<T>,
    },
    RawMemory {
        records: Vec<RawRecord>,
    },
}

impl<T: Record> MergeInput<T> {
    pub fn disk(path: impl Into<PathBuf>, options: DiskInputOptions) -> Self {
        Self::Disk {
            path: path.into(),
            uncompressed_len: None,
            options,
        }
    }

    pub fn memory(records: Vec<T>) -> Self {
        Self::Memory { records }
    }

    /// Whether this segment can produce undecoded records.
    pub fn supports_raw(&self) -> bool {
        !matches!(self, Self::Memory { .. })
    }

    pub fn is_disk(&self) -> bool {
        matches!(self, Self::Disk { .. })
    }

    /// Open a typed reader over the segment.
    pub fn open_typed(self, fs: &Arc<dyn FileSystem>) -> Result<Box<dyn RecordReader<T>>> {
        match self {
            Self::Disk {
                path,
                uncompressed_len,
                options,
            } => {
                let stream = fs.open_read(&path)?;
                let len = match options.compression {
                    CompressionType::None => Some(stream.len),
                    _ => uncompressed_len,
                };
                Ok(Box::new(BinaryRecordReader::new(
                    stream.stream,
                    options.buffer_size,
                    options.compression,
                    options.checksum,
                    len,
                )?))
            }
            Self::Memory { records } => Ok(Box::new(VecRecordReader::new(records))),
            Self::RawMemory { records } => {
                let decoded = records
                    .iter()
                    .map(|raw| raw.decode::<T>())
                    .collect::<Result<Vec<T>>>()?;
                Ok(Box::new(VecRecordReader::new(decoded)))
            }
        }
    }

    /// Open a raw reader over the segment. Fails for typed memory segments.
    pub fn open_raw(self, fs: &Arc<dyn FileSystem>) -> Result<Box<dyn RecordReader<RawRecord>>> {
        match self {
            Self::Disk {
                path,
                uncompressed_len,
                options,
            } => {
                let stream = fs.open_read(&path)?;
                let len = match options.compression {
                    CompressionType::None => Some(stream.len),
                    _ => uncompressed_len,
                };
                Ok(Box::new(RawRecordReader::new(
                    stream.stream,
                    options.buffer_size,
                    options.compression,
                    options.checksum,
                    len,
                )?))
            }
            Self::RawMemory { records } => Ok(Box::new(VecRecordReader::new(records))),
            Self::Memory { .. } => Err(EngineError::merge(
                "typed memory segment does not support raw reads",
            )),
        }
    }
}
