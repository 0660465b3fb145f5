//! Compression abstraction for spilled record streams.
//!
//! This module provides a unified interface over the supported compression
//! algorithms (zstd, lz4, snappy). Intermediate merge-pass files are written
//! and read as streams, so the surface here is `Read`/`Write` adapters rather
//! than whole-buffer calls.

use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CommonError, Result};

/// Compression applied to a byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CompressionType {
    /// No compression.
    #[default]
    None,
    /// Zstd - high performance with excellent compression ratio.
    Zstd,
    /// LZ4 - extremely fast compression and decompression.
    Lz4,
    /// Snappy - balanced compression ratio and speed.
    Snappy,
}

impl CompressionType {
    /// Get the default compression level for this algorithm.
    pub fn default_level(&self) -> i32 {
        match self {
            CompressionType::Zstd => 3,
            _ => 0,
        }
    }

    /// Check if this algorithm supports compression levels.
    pub fn supports_levels(&self) -> bool {
        matches!(self, CompressionType::Zstd)
    }
}

impl fmt::Display for CompressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompressionType::None => "None",
            CompressionType::Zstd => "Zstd",
            CompressionType::Lz4 => "Lz4",
            CompressionType::Snappy => "Snappy",
        };
        f.write_str(name)
    }
}

impl FromStr for CompressionType {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(CompressionType::None),
            "zstd" => Ok(CompressionType::Zstd),
            "lz4" => Ok(CompressionType::Lz4),
            "snappy" => Ok(CompressionType::Snappy),
            other => Err(CommonError::configuration_error(format!(
                "Unknown compression type: {other}"
            ))),
        }
    }
}

/// A write stream that must be explicitly finished so the compressor can
/// flush its trailing frame. Dropping without `finish` may truncate output.
pub trait FinishWrite: Write + Send {
    /// Flush all buffered data and write any end-of-stream framing.
    fn finish(self: Box<Self>) -> Result<()>;
}

struct PlainWriter<W: Write + Send>(W);

impl<W: Write + Send> Write for PlainWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

impl<W: Write + Send> FinishWrite for PlainWriter<W> {
    fn finish(mut self: Box<Self>) -> Result<()> {
        self.0.flush()?;
        Ok(())
    }
}

struct ZstdWriter<W: Write + Send>(zstd::stream::write::Encoder<'static, W>);

impl<W: Write + Send> Write for ZstdWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

impl<W: Write + Send> FinishWrite for ZstdWriter<W> {
    fn finish(self: Box<Self>) -> Result<()> {
        let mut inner = self
            .0
            .finish()
            .map_err(|e| CommonError::compression_error_with_source("zstd finish failed", e))?;
        inner.flush()?;
        Ok(())
    }
}

struct Lz4Writer<W: Write + Send>(lz4_flex::frame::FrameEncoder<W>);

impl<W: Write + Send> Write for Lz4Writer<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

impl<W: Write + Send> FinishWrite for Lz4Writer<W> {
    fn finish(self: Box<Self>) -> Result<()> {
        let mut inner = self
            .0
            .finish()
            .map_err(|e| CommonError::compression_error_with_source("lz4 finish failed", e))?;
        inner.flush()?;
        Ok(())
    }
}

struct SnappyWriter<W: Write + Send>(snap::write::FrameEncoder<W>);

impl<W: Write + Send> Write for SnappyWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

impl<W: Write + Send> FinishWrite for SnappyWriter<W> {
    fn finish(self: Box<Self>) -> Result<()> {
        let mut inner = self.0.into_inner().map_err(|e| {
            CommonError::compression_error_with_source("snappy finish failed", e.into_error())
        })?;
        inner.flush()?;
        Ok(())
    }
}

/// Wrap a raw byte sink with the requested compression.
pub fn compress_writer(
    sink: Box<dyn Write + Send>,
    compression: CompressionType,
) -> Result<Box<dyn FinishWrite>> {
    match compression {
        CompressionType::None => Ok(Box::new(PlainWriter(sink))),
        CompressionType::Zstd => {
            let encoder =
                zstd::stream::write::Encoder::new(sink, compression.default_level()).map_err(
                    |e| CommonError::compression_error_with_source("zstd encoder creation", e),
                )?;
            Ok(Box::new(ZstdWriter(encoder)))
        }
        CompressionType::Lz4 => Ok(Box::new(Lz4Writer(lz4_flex::frame::FrameEncoder::new(
            sink,
        )))),
        CompressionType::Snappy => {
            Ok(Box::new(SnappyWriter(snap::write::FrameEncoder::new(sink))))
        }
    }
}

/// Wrap a raw byte source with the matching decompressor.
pub fn decompress_reader(
    source: Box<dyn Read + Send>,
    compression: CompressionType,
) -> Result<Box<dyn Read + Send>> {
    match compression {
        CompressionType::None => Ok(source),
        CompressionType::Zstd => {
            let decoder = zstd::stream::read::Decoder::new(source).map_err(|e| {
                CommonError::compression_error_with_source("zstd decoder creation", e)
            })?;
            Ok(Box::new(decoder))
        }
        CompressionType::Lz4 => Ok(Box::new(lz4_flex::frame::FrameDecoder::new(source))),
        CompressionType::Snappy => Ok(Box::new(snap::read::FrameDecoder::new(source))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(compression: CompressionType) {
        let payload: Vec<u8> = (0..10_000u32).flat_map(|v| v.to_le_bytes()).collect();

        let buffer: Vec<u8> = Vec::new();
        let shared = std::sync::Arc::new(std::sync::Mutex::new(buffer));

        struct SharedSink(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);
        impl Write for SharedSink {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let mut writer =
            compress_writer(Box::new(SharedSink(shared.clone())), compression).unwrap();
        writer.write_all(&payload).unwrap();
        writer.finish().unwrap();

        let compressed = shared.lock().unwrap().clone();
        let mut reader =
            decompress_reader(Box::new(std::io::Cursor::new(compressed)), compression).unwrap();
        let mut decoded = Vec::new();
        reader.read_to_end(&mut decoded).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_round_trip_none() {
        round_trip(CompressionType::None);
    }

    #[test]
    fn test_round_trip_zstd() {
        round_trip(CompressionType::Zstd);
    }

    #[test]
    fn test_round_trip_lz4() {
        round_trip(CompressionType::Lz4);
    }

    #[test]
    fn test_round_trip_snappy() {
        round_trip(CompressionType::Snappy);
    }

    #[test]
    fn test_parse_compression_type() {
        assert_eq!(
            "zstd".parse::<CompressionType>().unwrap(),
            CompressionType::Zstd
        );
        assert_eq!(
            "None".parse::<CompressionType>().unwrap(),
            CompressionType::None
        );
        assert!("gzip".parse::<CompressionType>().is_err());
    }
}
