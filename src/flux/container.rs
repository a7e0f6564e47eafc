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

    src/flux/container.rs

    `.zip` containers of KryoFlux streams, treated strictly as a byte
    provider per spec.md SS1/SS6: each `.raw` entry whose filename ends in
    `CC.H.raw` (two-digit cylinder, one-digit head) is extracted and placed
    at that (cylinder, head) coordinate; non-`.raw` entries are skipped.
*/
#![cfg(feature = "zip")]

use crate::chs::DiskCh;
use crate::error::{Flux2ImdError, Result};
use regex::Regex;
use std::io::{Cursor, Read};
use std::sync::OnceLock;

/// One `.raw` member extracted from a KryoFlux zip, with its parsed
/// cylinder/head coordinate.
pub struct ZipStreamMember {
    pub ch: DiskCh,
    pub name: String,
    pub data: Vec<u8>,
}

const MAX_MEMBER_BYTES: u64 = 50_000_000;

fn ch_suffix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(\d{2})\.(\d)\.raw$").expect("static regex is valid"))
}

/// Parse the `CC.H` coordinate suffix from a KryoFlux stream filename.
pub fn parse_ch_suffix(name: &str) -> Option<DiskCh> {
    let caps = ch_suffix_re().captures(name)?;
    let cylinder: u16 = caps[1].parse().ok()?;
    let head: u8 = caps[2].parse().ok()?;
    Some(DiskCh::new(cylinder, head))
}

/// Extract every `*CC.H.raw` member from a zip byte buffer, in archive
/// order. Non-`.raw` entries are silently skipped, matching spec.md SS6.
pub fn extract_kryoflux_members(zip_bytes: &[u8]) -> Result<Vec<ZipStreamMember>> {
    let cursor = Cursor::new(zip_bytes);
    let mut archive = zip::ZipArchive::new(cursor).map_err(|_| Flux2ImdError::InvalidHeader)?;

    let mut members = Vec::new();
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).map_err(|_| Flux2ImdError::InvalidHeader)?;
        let name = file.name().to_string();
        if !name.to_lowercase().ends_with(".raw") {
            continue;
        }
        let Some(ch) = parse_ch_suffix(&name)
        else {
            log::warn!(
                "container::extract_kryoflux_members(): skipping unrecognised member name {}",
                name
            );
            continue;
        };
        if file.size() > MAX_MEMBER_BYTES {
            return Err(Flux2ImdError::AllocationFailure);
        }
        let mut data = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut data)?;
        members.push(ZipStreamMember { ch, name, data });
    }
    Ok(members)
}

/// True if the given byte buffer looks like a PKZIP container, per the
/// local file header signature.
pub fn detect_zip(bytes: &[u8]) -> bool {
    bytes.len() >= 4 && &bytes[0..4] == b"PK\x03\x04"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_standard_kryoflux_name() {
        assert_eq!(parse_ch_suffix("disk00.0.raw"), Some(DiskCh::new(0, 0)));
        assert_eq!(parse_ch_suffix("disk39.1.raw"), Some(DiskCh::new(39, 1)));
        assert_eq!(parse_ch_suffix("path/to/disk05.0.RAW"), Some(DiskCh::new(5, 0)));
    }

    #[test]
    fn rejects_non_raw_and_malformed_names() {
        assert!(parse_ch_suffix("readme.txt").is_none());
        assert!(parse_ch_suffix("disk.raw").is_none());
        assert!(parse_ch_suffix("disk0.0.raw").is_none());
    }
}
