//! # Utility Modules
//!
//! Supporting utilities for compression, encryption, logging and metrics.
//!
//! ## Components
//! - **Compression**: zlib with a decompressed-size bound and exact-length check
//! - **Crypto**: AES-128/CFB8 cipher state construction
//! - **Logging**: Structured logging configuration
//! - **Metrics**: Thread-safe observability counters
//!
//! ## Security
//! - Declared decompressed sizes are bounded before allocation
//! - Decompression never produces more than the declared length plus one byte

pub mod compression;
pub mod crypto;
pub mod logging;
pub mod metrics;
