//! Common utilities and abstractions for the quern project.
//!
//! This crate provides the error type, the compression abstraction used for
//! spilled record streams, and the narrow file-system collaborator contract.

pub mod compression;
pub mod error;
pub mod storage;

pub use compression::{CompressionType, FinishWrite, compress_writer, decompress_reader};
pub use error::{CommonError, Result};
pub use storage::{FileStream, FileSystem, LocalFileSystem, combine, file_name};
