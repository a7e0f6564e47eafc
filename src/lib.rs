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
*/

//! # flux2imd
//!
//! flux2imd recovers vintage 8-inch and 5.25-inch floppy disk images from raw
//! magnetic flux captures. It reads KryoFlux stream sets (bare `.raw` files
//! or a `.zip` of them) and SuperCard Pro `.scp` captures, recovers the
//! read-clock with a digital phase-locked loop modeled on the slot-based
//! design of U.S. Patent 4,808,884, identifies address marks and sector
//! bodies across a range of FM/MFM/M2FM/hard-sector encodings, reconciles
//! duplicate and defective sector copies across revolutions, and writes the
//! result out as ImageDisk (`.imd`) or flat sector-dump (`.img`) files.
//!
//! The pipeline stages, in order:
//!
//! 1. [`flux`] - normalises a container's raw bytes into a [`flux::FluxStream`].
//! 2. [`dpll`] - recovers the bitcell clock from flux intervals.
//! 3. [`format`] - the static table of supported disk format descriptors.
//! 4. [`pattern`] - matches address marks against the rolling pattern register.
//! 5. [`detect`] - auto-selects a format when none is pinned.
//! 6. [`decode`] - CRC validation and sector-body framing.
//! 7. [`track`] - assembles one track's sectors from matched markers.
//! 8. [`disk`] - the in-memory `Disk`/`Track`/`Sector` model.
//! 9. [`image_writer`] - serialises a `Disk` to `.imd`/`.img`.
//!
//! [`log_sink`] wraps the [`log`] facade with per-container-member context so
//! a multi-track run's log reads as a structured defect report rather than
//! an undifferentiated stream of messages.

pub mod chs;
pub mod decode;
pub mod detect;
pub mod disk;
pub mod dpll;
pub mod error;
pub mod flux;
pub mod format;
pub mod image_writer;
pub mod log_sink;
pub mod pattern;
pub mod track;

pub use error::{Flux2ImdError, Result};

use chs::DiskCh;
use disk::{Disk, Track};
use format::FormatDescriptor;

/// Decode a single track's flux stream into an assembled [`Track`], per
/// spec.md SS4.4/SS4.6. `pinned` overrides auto-detection (the CLI's `-g`
/// flag); `hard_sector_count`, when given, routes straight to the
/// hard-sector probe table instead of soft-sector pattern matching.
pub fn decode_track(
    stream: &flux::FluxStream,
    ch: DiskCh,
    pinned: Option<&'static FormatDescriptor>,
    hard_sector_count: Option<u8>,
) -> Result<(Track, &'static FormatDescriptor)> {
    let format = pinned
        .or_else(|| hard_sector_count.and_then(detect::hard_sector_probe))
        .or_else(|| detect::detect_soft_sector_format(stream))
        .ok_or(Flux2ImdError::UnrecognizedFormat)?;
    Ok((track::assemble_track(stream, format, ch), format))
}

/// Decode a whole SuperCard Pro capture into an assembled [`Disk`], per
/// spec.md SS4.1/SS4.6. The first track to decode successfully pins the
/// format for every subsequent track on the disk, so later tracks don't
/// each re-run detection independently.
pub fn decode_scp_disk(bytes: &[u8], pinned: Option<&'static FormatDescriptor>) -> Result<Disk> {
    use binrw::BinRead;
    let mut cur = std::io::Cursor::new(bytes);
    let header = flux::scp::ScpFileHeader::read(&mut cur)?;
    let two_sided = header.heads == 0;

    let mut format = pinned;
    let mut disk: Option<Disk> = None;

    for track_index in header.start_track..=header.end_track {
        let stream = match flux::scp::ingest_track(bytes, track_index as usize) {
            Ok(stream) => stream,
            Err(err) => {
                log::warn!("decode_scp_disk(): track {} failed to ingest: {}", track_index, err);
                continue;
            }
        };
        let cylinder = (track_index as u16) / if two_sided { 2 } else { 1 };
        let head = if two_sided { track_index % 2 } else { 0 };
        let ch = DiskCh::new(cylinder, head);

        match decode_track(&stream, ch, format, None) {
            Ok((track, resolved)) => {
                format.get_or_insert(resolved);
                disk.get_or_insert_with(|| Disk::new(resolved)).tracks.push(track);
            }
            Err(err) => log::warn!("decode_scp_disk(): {}: {}", ch, err),
        }
    }

    disk.ok_or(Flux2ImdError::UnrecognizedFormat)
}

/// Decode a KryoFlux stream set shipped as a `.zip` of per-track `.raw`
/// files into an assembled [`Disk`], per spec.md SS4.1/SS4.6/SS6.
#[cfg(feature = "zip")]
pub fn decode_kryoflux_zip_disk(zip_bytes: &[u8], pinned: Option<&'static FormatDescriptor>) -> Result<Disk> {
    let members = flux::container::extract_kryoflux_members(zip_bytes)?;
    let mut format = pinned;
    let mut disk: Option<Disk> = None;

    for member in members {
        let stream = match flux::kryoflux::ingest(&member.data) {
            Ok(stream) => stream,
            Err(err) => {
                log::warn!("decode_kryoflux_zip_disk(): {}: failed to ingest: {}", member.name, err);
                continue;
            }
        };
        match decode_track(&stream, member.ch, format, None) {
            Ok((track, resolved)) => {
                format.get_or_insert(resolved);
                disk.get_or_insert_with(|| Disk::new(resolved)).tracks.push(track);
            }
            Err(err) => log::warn!("decode_kryoflux_zip_disk(): {}: {}", member.ch, err),
        }
    }

    disk.ok_or(Flux2ImdError::UnrecognizedFormat)
}

/// Decode a single bare KryoFlux `.raw` stream for one already-known track
/// coordinate, used when the CLI is pointed at an individual stream file
/// rather than a whole set.
pub fn decode_kryoflux_raw_track(
    raw: &[u8],
    ch: DiskCh,
    pinned: Option<&'static FormatDescriptor>,
    hard_sector_count: Option<u8>,
) -> Result<(Track, &'static FormatDescriptor)> {
    let stream = flux::kryoflux::ingest(raw)?;
    decode_track(&stream, ch, pinned, hard_sector_count)
}
