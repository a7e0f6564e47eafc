/*
    flux2imd

    Copyright 2026 The flux2imd Contributors

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    src/error.rs

    Top-level error type for the crate. Per-sector and per-track decode
    defects are *not* represented here - those are recovered locally as
    status flags on `Sector`/`Track` and reported through the log sink. Only
    failures that abort an entire file or the whole process are errors.
*/
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Flux2ImdError {
    #[error("an I/O error occurred reading the flux container: {0}")]
    IoError(String),
    #[error("the input extension or container format is not supported")]
    UnsupportedContainer,
    #[error("the flux stream was truncated or ended unexpectedly")]
    TruncatedStream,
    #[error("the container header is invalid or corrupt")]
    InvalidHeader,
    #[error("the disk format could not be auto-detected")]
    UnrecognizedFormat,
    #[error("memory allocation failed")]
    AllocationFailure,
    #[error("the disk geometry is not supported (e.g. two-sided hard-sector, bad hard-sector count)")]
    UnsupportedGeometry,
}

impl From<std::io::Error> for Flux2ImdError {
    fn from(err: std::io::Error) -> Self {
        Flux2ImdError::IoError(err.to_string())
    }
}

impl From<binrw::Error> for Flux2ImdError {
    fn from(err: binrw::Error) -> Self {
        Flux2ImdError::IoError(err.to_string())
    }
}

#[cfg(feature = "zip")]
impl From<zip::result::ZipError> for Flux2ImdError {
    fn from(err: zip::result::ZipError) -> Self {
        Flux2ImdError::IoError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Flux2ImdError>;
