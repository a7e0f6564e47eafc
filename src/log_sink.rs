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

    src/log_sink.rs

    Logging (C9), per spec.md SS4.8: every message flux2imd emits goes
    through the `log` facade like the rest of the crate, but decode-time
    defects are additionally addressed to the specific container member
    they came from (a KryoFlux stream set has one member per track), so a
    multi-file run's log doesn't read as an undifferentiated wall of text.
*/
use crate::chs::DiskCh;
use crate::disk::{Disk, SectorStatus, TrackStatus};

/// A hierarchical logging context, e.g. `disk.scp[c:12 h:0]`, prefixed to
/// every message passed through it.
#[derive(Debug, Clone)]
pub struct LogSink {
    prefix: String,
}

impl LogSink {
    pub fn new(file_name: &str) -> Self {
        LogSink { prefix: file_name.to_string() }
    }

    pub fn with_member(&self, member: impl std::fmt::Display) -> Self {
        LogSink { prefix: format!("{}[{}]", self.prefix, member) }
    }

    pub fn with_track(&self, ch: DiskCh) -> Self {
        self.with_member(ch)
    }

    pub fn debug(&self, msg: &str) {
        log::debug!("{}: {}", self.prefix, msg);
    }

    pub fn warn(&self, msg: &str) {
        log::warn!("{}: {}", self.prefix, msg);
    }

    pub fn error(&self, msg: &str) {
        log::error!("{}: {}", self.prefix, msg);
    }

    /// Log an unrecoverable condition for this context and return the same
    /// message, for callers that need to both log and propagate a `String`
    /// into an error type.
    pub fn fatal(&self, msg: &str) -> String {
        log::error!("{}: FATAL: {}", self.prefix, msg);
        msg.to_string()
    }
}

/// Aggregate defect counts across every track of a decoded disk, per
/// spec.md SS4.8 "summary". Printed once at the end of processing a file so
/// the operator sees a single line of how much of the disk came back clean.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefectSummary {
    pub tracks_total: usize,
    pub tracks_bad_id: usize,
    pub tracks_fixed_id: usize,
    pub tracks_cylinder_mismatch: usize,
    pub tracks_side_mismatch: usize,
    pub sectors_total: usize,
    pub sectors_fixed: usize,
    pub sectors_idam_bad: usize,
    pub sectors_data_bad: usize,
}

impl DefectSummary {
    pub fn from_disk(disk: &Disk) -> Self {
        let mut summary = DefectSummary::default();
        for track in &disk.tracks {
            summary.tracks_total += 1;
            if track.status.contains(TrackStatus::BAD_ID) {
                summary.tracks_bad_id += 1;
            }
            if track.status.contains(TrackStatus::FIXED_ID) {
                summary.tracks_fixed_id += 1;
            }
            if track.status.contains(TrackStatus::CYL) || track.status.contains(TrackStatus::MCYL) {
                summary.tracks_cylinder_mismatch += 1;
            }
            if track.status.contains(TrackStatus::SIDE) || track.status.contains(TrackStatus::MSIDE) {
                summary.tracks_side_mismatch += 1;
            }
            for sector in track.slots.iter().filter(|s| s.id != crate::disk::UNKNOWN_SECTOR_ID) {
                summary.sectors_total += 1;
                if sector.status.contains(SectorStatus::FIXED) {
                    summary.sectors_fixed += 1;
                }
                if !sector.status.contains(SectorStatus::IDAM_GOOD) {
                    summary.sectors_idam_bad += 1;
                }
                if !sector.status.contains(SectorStatus::DATA_GOOD) {
                    summary.sectors_data_bad += 1;
                }
            }
        }
        summary
    }

    pub fn log(&self, sink: &LogSink) {
        sink.debug(&format!(
            "{}/{} tracks clean, {} sectors fixed, {} sectors with bad id CRC, {} sectors with bad data CRC",
            self.tracks_total - self.tracks_bad_id,
            self.tracks_total,
            self.sectors_fixed,
            self.sectors_idam_bad,
            self.sectors_data_bad,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chs::DiskCh;
    use crate::disk::Sector;
    use crate::format::find_format;

    #[test]
    fn sink_prefix_nests_with_member() {
        let sink = LogSink::new("disk.raw").with_track(DiskCh::new(3, 1));
        assert_eq!(sink.prefix, "disk.raw[[c:3 h:1]]");
    }

    #[test]
    fn summary_counts_bad_sectors() {
        let format = find_format("MFM8-DD").unwrap();
        let mut disk = Disk::new(format);
        let track = disk.track_mut(DiskCh::new(0, 0));
        track.slots.push(Sector::new(1, 0, 0, 0));
        let summary = DefectSummary::from_disk(&disk);
        assert_eq!(summary.sectors_total, 1);
        assert_eq!(summary.sectors_data_bad, 1);
    }
}
