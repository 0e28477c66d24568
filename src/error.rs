// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Error type shared by all generation stages.

use std::path::Path;

/// Every failure a stage can report. None of them are recovered from:
/// the CLI prints the message and exits with a non-zero status.
#[derive(Debug)]
pub enum Error {
    /// Model metadata disagrees with the static layer description.
    ContractViolation(String),
    /// A coordinate or layer expected in a lookup table was never recorded.
    MissingKey(String),
    /// An output encoding or mode outside the recognized set.
    UnsupportedFormat(String),
    /// Malformed text in an input file, with the file and 1-based line.
    Parse { file: String, line: usize, msg: String },
    /// Filesystem failure, with the offending path.
    Io(String),
    /// JSON/TOML (de)serialization failure.
    Serde(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn io(path: &Path, e: std::io::Error) -> Self {
        Error::Io(format!("{}: {}", path.display(), e))
    }

    pub fn json(path: &Path, e: serde_json::Error) -> Self {
        Error::Serde(format!("{}: {}", path.display(), e))
    }

    pub fn parse(path: &Path, line: usize, msg: impl Into<String>) -> Self {
        Error::Parse {
            file: path.display().to_string(),
            line,
            msg: msg.into(),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::ContractViolation(msg) => write!(f, "contract violation: {}", msg),
            Error::MissingKey(key) => write!(f, "missing key: {}", key),
            Error::UnsupportedFormat(fmt) => write!(f, "unsupported format: {}", fmt),
            Error::Parse { file, line, msg } => {
                write!(f, "parse error at {}:{}: {}", file, line, msg)
            }
            Error::Io(msg) => write!(f, "I/O error: {}", msg),
            Error::Serde(msg) => write!(f, "serialization error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}
