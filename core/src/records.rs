//! Record readers and writers.
//!
//! Records cross process boundaries as length-prefixed bincode frames:
//! `[u32 LE payload length][payload][u32 LE crc32]?`, with the trailing
//! checksum present only when the writer was configured with checksumming
//! enabled. The whole stream may additionally be wrapped in a compression
//! adapter. The same frame format carries both typed records and raw
//! (undecoded) records, which is what makes the merge engine's raw fast path
//! possible: an intermediate pass can move frames without touching bincode.

use std::io::{BufReader, BufWriter, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use quern_common::compression::{CompressionType, FinishWrite, compress_writer, decompress_reader};

use crate::error::{EngineError, Result};

/// Default buffer size for segment readers and writers.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Marker for types that can travel through channels and merge segments.
pub trait Record: bincode::Encode + bincode::Decode<()> + Send + 'static {}

impl<T> Record for T where T: bincode::Encode + bincode::Decode<()> + Send + 'static {}

/// Pull-based source of records.
pub trait RecordReader<T>: Send {
    /// The next record, or `None` at end of stream.
    fn read_record(&mut self) -> Result<Option<T>>;

    /// Fraction of the input consumed so far, in `[0, 1]`.
    fn progress(&self) -> f32;

    fn records_read(&self) -> u64;

    fn bytes_read(&self) -> u64;
}

/// Sink for records.
pub trait RecordWriter<T>: Send {
    fn write_record(&mut self, record: &T) -> Result<()>;

    fn records_written(&self) -> u64;

    fn bytes_written(&self) -> u64;

    /// Flush buffered frames and finalize compression framing. Must be
    /// called before the output is considered durable.
    fn finish(&mut self) -> Result<()>;
}

/// An undecoded record: the frame payload as written by the producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    bytes: Vec<u8>,
}

impl RawRecord {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Encode a typed record into its raw frame payload.
    pub fn from_value<T: Record>(value: &T) -> Result<Self> {
        let bytes = bincode::encode_to_vec(value, bincode::config::standard())?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Decode the payload into its typed form.
    pub fn decode<T: Record>(&self) -> Result<T> {
        let (value, consumed) =
            bincode::decode_from_slice(&self.bytes, bincode::config::standard())?;
        if consumed != self.bytes.len() {
            return Err(EngineError::merge(format!(
                "raw record has {} trailing bytes after decode",
                self.bytes.len() - consumed
            )));
        }
        Ok(value)
    }
}

/// Shared counters a reader/writer exposes to the progress loop.
#[derive(Debug, Default)]
pub struct IoCounters {
    pub records: AtomicU64,
    pub bytes: AtomicU64,
}

/// Low-level frame writer shared by the typed and raw writers.
struct FrameWriter {
    buffered: Option<BufWriter<Box<dyn FinishWrite>>>,
    checksum: bool,
    counters: Arc<IoCounters>,
}

impl FrameWriter {
    fn new(
        sink: Box<dyn Write + Send>,
        buffer_size: usize,
        compression: CompressionType,
        checksum: bool,
    ) -> Result<Self> {
        let compressed = compress_writer(sink, compression)?;
        Ok(Self {
            buffered: Some(BufWriter::with_capacity(buffer_size.max(1), compressed)),
            checksum,
            counters: Arc::new(IoCounters::default()),
        })
    }

    fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        let buffered = self
            .buffered
            .as_mut()
            .ok_or_else(|| EngineError::invalid_operation("write after finish"))?;
        let len = u32::try_from(payload.len())
            .map_err(|_| EngineError::io("record larger than 4 GiB"))?;
        buffered.write_all(&len.to_le_bytes())?;
        buffered.write_all(payload)?;
        let mut frame_len = 4 + payload.len() as u64;
        if self.checksum {
            let mut hasher = crc32fast::Hasher::new();
            hasher.update(payload);
            buffered.write_all(&hasher.finalize().to_le_bytes())?;
            frame_len += 4;
        }
        self.counters.records.fetch_add(1, Ordering::Relaxed);
        self.counters.bytes.fetch_add(frame_len, Ordering::Relaxed);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(mut buffered) = self.buffered.take() {
            buffered.flush()?;
            let sink = buffered
                .into_inner()
                .map_err(|e| EngineError::io(format!("flush on finish failed: {}", e.error())))?;
            sink.finish()?;
        }
        Ok(())
    }
}

/// Low-level frame reader shared by the typed and raw readers.
struct FrameReader {
    source: BufReader<Box<dyn Read + Send>>,
    checksum: bool,
    counters: Arc<IoCounters>,
    /// Uncompressed stream length, when known. Drives the progress fraction.
    uncompressed_len: Option<u64>,
    finished: bool,
}

impl FrameReader {
    fn new(
        source: Box<dyn Read + Send>,
        buffer_size: usize,
        compression: CompressionType,
        checksum: bool,
        uncompressed_len: Option<u64>,
    ) -> Result<Self> {
        let decompressed = decompress_reader(source, compression)?;
        Ok(Self {
            source: BufReader::with_capacity(buffer_size.max(1), decompressed),
            checksum,
            counters: Arc::new(IoCounters::default()),
            uncompressed_len,
            finished: false,
        })
    }

    fn read_frame(&mut self) -> Result<Option<Vec<u8>>> {
        if self.finished {
            return Ok(None);
        }
        // End of stream is only clean on a frame boundary: zero header bytes
        // mean the previous frame was the last, while a partial header means
        // the producer was cut off mid-frame.
        let mut header = [0u8; 4];
        let mut filled = 0;
        while filled < header.len() {
            match self.source.read(&mut header[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        if filled == 0 {
            self.finished = true;
            return Ok(None);
        }
        if filled < header.len() {
            return Err(EngineError::merge(format!(
                "truncated frame header: {filled} of 4 bytes"
            )));
        }
        let len = u32::from_le_bytes(header) as usize;
        let mut payload = vec![0u8; len];
        self.source
            .read_exact(&mut payload)
            .map_err(|e| EngineError::merge(format!("truncated record frame: {e}")))?;
        let mut frame_len = 4 + len as u64;
        if self.checksum {
            let mut stored = [0u8; 4];
            self.source
                .read_exact(&mut stored)
                .map_err(|e| EngineError::merge(format!("truncated record checksum: {e}")))?;
            let mut hasher = crc32fast::Hasher::new();
            hasher.update(&payload);
            if hasher.finalize() != u32::from_le_bytes(stored) {
                return Err(EngineError::merge("record checksum mismatch"));
            }
            frame_len += 4;
        }
        self.counters.records.fetch_add(1, Ordering::Relaxed);
        self.counters.bytes.fetch_add(frame_len, Ordering::Relaxed);
        Ok(Some(payload))
    }

    fn progress(&self) -> f32 {
        match self.uncompressed_len {
            Some(len) if len > 0 => {
                let read = self.counters.bytes.load(Ordering::Relaxed) as f64;
                (read / len as f64).min(1.0) as f32
            }
            _ => {
                if self.finished {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

/// Writer producing typed bincode frames.
pub struct BinaryRecordWriter<T: Record> {
    frames: FrameWriter,
    finished: bool,
    _phantom: std::marker::PhantomData<fn(&T)>,
}

impl<T: Record> BinaryRecordWriter<T> {
    pub fn new(
        sink: Box<dyn Write + Send>,
        buffer_size: usize,
        compression: CompressionType,
        checksum: bool,
    ) -> Result<Self> {
        Ok(Self {
            frames: FrameWriter::new(sink, buffer_size, compression, checksum)?,
            finished: false,
            _phantom: std::marker::PhantomData,
        })
    }
}

impl<T: Record> RecordWriter<T> for BinaryRecordWriter<T> {
    fn write_record(&mut self, record: &T) -> Result<()> {
        if self.finished {
            return Err(EngineError::invalid_operation("write after finish"));
        }
        let payload = bincode::encode_to_vec(record, bincode::config::standard())?;
        self.frames.write_frame(&payload)
    }

    fn records_written(&self) -> u64 {
        self.frames.counters.records.load(Ordering::Relaxed)
    }

    fn bytes_written(&self) -> u64 {
        self.frames.counters.bytes.load(Ordering::Relaxed)
    }

    fn finish(&mut self) -> Result<()> {
        if !self.finished {
            self.frames.finish()?;
            self.finished = true;
        }
        Ok(())
    }
}

/// Writer that moves raw frames without re-encoding.
pub struct RawRecordWriter {
    frames: FrameWriter,
    finished: bool,
}

impl RawRecordWriter {
    pub fn new(
        sink: Box<dyn Write + Send>,
        buffer_size: usize,
        compression: CompressionType,
        checksum: bool,
    ) -> Result<Self> {
        Ok(Self {
            frames: FrameWriter::new(sink, buffer_size, compression, checksum)?,
            finished: false,
        })
    }
}

impl RecordWriter<RawRecord> for RawRecordWriter {
    fn write_record(&mut self, record: &RawRecord) -> Result<()> {
        if self.finished {
            return Err(EngineError::invalid_operation("write after finish"));
        }
        self.frames.write_frame(record.as_bytes())
    }

    fn records_written(&self) -> u64 {
        self.frames.counters.records.load(Ordering::Relaxed)
    }

    fn bytes_written(&self) -> u64 {
        self.frames.counters.bytes.load(Ordering::Relaxed)
    }

    fn finish(&mut self) -> Result<()> {
        if !self.finished {
            self.frames.finish()?;
            self.finished = true;
        }
        Ok(())
    }
}

/// Reader producing typed records from bincode frames.
pub struct BinaryRecordReader<T: Record> {
    frames: FrameReader,
    _phantom: std::marker::PhantomData<fn() -> T>,
}

impl<T: Record> BinaryRecordReader<T> {
    pub fn new(
        source: Box<dyn Read + Send>,
        buffer_size: usize,
        compression: CompressionType,
        checksum: bool,
        uncompressed_len: Option<u64>,
    ) -> Result<Self> {
        Ok(Self {
            frames: FrameReader::new(source, buffer_size, compression, checksum, uncompressed_len)?,
            _phantom: std::marker::PhantomData,
        })
    }
}

impl<T: Record> RecordReader<T> for BinaryRecordReader<T> {
    fn read_record(&mut self) -> Result<Option<T>> {
        match self.frames.read_frame()? {
            Some(payload) => Ok(Some(RawRecord::new(payload).decode()?)),
            None => Ok(None),
        }
    }

    fn progress(&self) -> f32 {
        self.frames.progress()
    }

    fn records_read(&self) -> u64 {
        self.frames.counters.records.load(Ordering::Relaxed)
    }

    fn bytes_read(&self) -> u64 {
        self.frames.counters.bytes.load(Ordering::Relaxed)
    }
}

/// Reader yielding undecoded frame payloads.
pub struct RawRecordReader {
    frames: FrameReader,
}

impl RawRecordReader {
    pub fn new(
        source: Box<dyn Read + Send>,
        buffer_size: usize,
        compression: CompressionType,
        checksum: bool,
        uncompressed_len: Option<u64>,
    ) -> Result<Self> {
        Ok(Self {
            frames: FrameReader::new(source, buffer_size, compression, checksum, uncompressed_len)?,
        })
    }
}

impl RecordReader<RawRecord> for RawRecordReader {
    fn read_record(&mut self) -> Result<Option<RawRecord>> {
        Ok(self.frames.read_frame()?.map(RawRecord::new))
    }

    fn progress(&self) -> f32 {
        self.frames.progress()
    }

    fn records_read(&self) -> u64 {
        self.frames.counters.records.load(Ordering::Relaxed)
    }

    fn bytes_read(&self) -> u64 {
        self.frames.counters.bytes.load(Ordering::Relaxed)
    }
}

/// In-memory reader over an owned record list. Backs memory-resident merge
/// segments and tests; performs no I/O accounting.
pub struct VecRecordReader<T> {
    records: std::vec::IntoIter<T>,
    total: usize,
    read: u64,
}

impl<T> VecRecordReader<T> {
    pub fn new(records: Vec<T>) -> Self {
        let total = records.len();
        Self {
            records: records.into_iter(),
            total,
            read: 0,
        }
    }
}

impl<T: Send> RecordReader<T> for VecRecordReader<T> {
    fn read_record(&mut self) -> Result<Option<T>> {
        let next = self.records.next();
        if next.is_some() {
            self.read += 1;
        }
        Ok(next)
    }

    fn progress(&self) -> f32 {
        if self.total == 0 {
            1.0
        } else {
            self.read as f32 / self.total as f32
        }
    }

    fn records_read(&self) -> u64 {
        self.read
    }

    fn bytes_read(&self) -> u64 {
        0
    }
}

/// Writer collecting records into memory. Test and pipeline plumbing.
#[derive(Default)]
pub struct VecRecordWriter<T> {
    pub records: Vec<T>,
}

impl<T> VecRecordWriter<T> {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }
}

impl<T: Clone + Send> RecordWriter<T> for VecRecordWriter<T> {
    fn write_record(&mut self, record: &T) -> Result<()> {
        self.records.push(record.clone());
        Ok(())
    }

    fn records_written(&self) -> u64 {
        self.records.len() as u64
    }

    fn bytes_written(&self) -> u64 {
        0
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_segment(
        values: &[i64],
        compression: CompressionType,
        checksum: bool,
    ) -> Vec<u8> {
        let buffer = Arc::new(std::sync::Mutex::new(Vec::new()));

        struct Sink(Arc<std::sync::Mutex<Vec<u8>>>);
        impl Write for Sink {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let mut writer = BinaryRecordWriter::<i64>::new(
            Box::new(Sink(buffer.clone())),
            1024,
            compression,
            checksum,
        )
        .unwrap();
        for value in values {
            writer.write_record(value).unwrap();
        }
        writer.finish().unwrap();
        let out = buffer.lock().unwrap().clone();
        out
    }

    fn read_segment(
        bytes: Vec<u8>,
        compression: CompressionType,
        checksum: bool,
    ) -> Vec<i64> {
        let mut reader = BinaryRecordReader::<i64>::new(
            Box::new(std::io::Cursor::new(bytes)),
            1024,
            compression,
            checksum,
            None,
        )
        .unwrap();
        let mut out = Vec::new();
        while let Some(value) = reader.read_record().unwrap() {
            out.push(value);
        }
        out
    }

    #[test]
    fn test_frame_round_trip_plain() {
        let values: Vec<i64> = (0..100).collect();
        let bytes = write_segment(&values, CompressionType::None, false);
        assert_eq!(read_segment(bytes, CompressionType::None, false), values);
    }

    #[test]
    fn test_frame_round_trip_compressed_and_checksummed() {
        let values: Vec<i64> = (0..1000).rev().collect();
        let bytes = write_segment(&values, CompressionType::Lz4, true);
        assert_eq!(read_segment(bytes, CompressionType::Lz4, true), values);
    }

    #[test]
    fn test_checksum_mismatch_is_fatal() {
        let values: Vec<i64> = (0..10).collect();
        let mut bytes = write_segment(&values, CompressionType::None, true);
        // Flip a payload byte in the middle of the stream.
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;

        let mut reader = BinaryRecordReader::<i64>::new(
            Box::new(std::io::Cursor::new(bytes)),
            1024,
            CompressionType::None,
            true,
            None,
        )
        .unwrap();
        let mut failed = false;
        loop {
            match reader.read_record() {
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(e) => {
                    assert!(matches!(e, EngineError::Merge { .. }));
                    failed = true;
                    break;
                }
            }
        }
        assert!(failed, "corruption must surface as a merge error");
    }

    #[test]
    fn test_truncated_frame_is_fatal() {
        let values: Vec<i64> = (0..10).collect();
        let mut bytes = write_segment(&values, CompressionType::None, false);
        bytes.truncate(bytes.len() - 3);

        let mut reader = BinaryRecordReader::<i64>::new(
            Box::new(std::io::Cursor::new(bytes)),
            1024,
            CompressionType::None,
            false,
            None,
        )
        .unwrap();
        let mut last = Ok(Some(0));
        loop {
            last = reader.read_record();
            match &last {
                Ok(Some(_)) => continue,
                _ => break,
            }
        }
        assert!(last.is_err());
    }

    #[test]
    fn test_stray_bytes_after_last_frame_are_fatal() {
        let values: Vec<i64> = (0..10).collect();
        let mut bytes = write_segment(&values, CompressionType::None, false);
        // Two stray bytes: not enough for another frame header.
        bytes.extend_from_slice(&[0xAB, 0xCD]);

        let mut reader = BinaryRecordReader::<i64>::new(
            Box::new(std::io::Cursor::new(bytes)),
            1024,
            CompressionType::None,
            false,
            None,
        )
        .unwrap();
        let mut read = 0;
        let last = loop {
            match reader.read_record() {
                Ok(Some(_)) => read += 1,
                other => break other,
            }
        };
        assert_eq!(read, values.len());
        assert!(matches!(last, Err(EngineError::Merge { .. })));
    }

    #[test]
    fn test_raw_passthrough_preserves_payloads() {
        let values: Vec<i64> = vec![3, 1, 4, 1, 5];
        let bytes = write_segment(&values, CompressionType::None, false);

        let mut raw_reader = RawRecordReader::new(
            Box::new(std::io::Cursor::new(bytes)),
            1024,
            CompressionType::None,
            false,
            None,
        )
        .unwrap();

        let buffer = Arc::new(std::sync::Mutex::new(Vec::new()));
        struct Sink(Arc<std::sync::Mutex<Vec<u8>>>);
        impl Write for Sink {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }
        let mut raw_writer = RawRecordWriter::new(
            Box::new(Sink(buffer.clone())),
            1024,
            CompressionType::None,
            false,
        )
        .unwrap();

        while let Some(raw) = raw_reader.read_record().unwrap() {
            assert_eq!(raw.decode::<i64>().unwrap(), values[raw_writer.records_written() as usize]);
            raw_writer.write_record(&raw).unwrap();
        }
        raw_writer.finish().unwrap();

        let copied = buffer.lock().unwrap().clone();
        assert_eq!(read_segment(copied, CompressionType::None, false), values);
    }

    #[test]
    fn test_vec_reader_progress() {
        let mut reader = VecRecordReader::new(vec![1, 2, 3, 4]);
        assert_eq!(reader.progress(), 0.0);
        reader.read_record().unwrap();
        reader.read_record().unwrap();
        assert_eq!(reader.progress(), 0.5);
    }
}
