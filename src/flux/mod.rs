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

    src/flux/mod.rs

    The Flux Store (C1): a normalised, in-memory representation of a single
    track's raw magnetic flux-transition stream, plus the KryoFlux and SCP
    ingestion routines that build one. Everything downstream (the DPLL,
    pattern matcher, decoder) consumes a `FluxStream` and knows nothing about
    the container it came from.
*/
pub mod container;
pub mod histogram;
pub mod kryoflux;
pub mod scp;

use crate::error::{Flux2ImdError, Result};

#[doc(hidden)]
#[macro_export]
macro_rules! format_us {
    ($value:expr) => {
        format!("{:.3}us", ($value) as f64 / 1000.0)
    };
}

/// The kind of boundary an index-table entry marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    /// Start of the first soft-sector revolution.
    SoData,
    /// End of the flux stream (sentinel; always the last index).
    EoData,
    /// Start of a soft-sector revolution other than the first.
    SsStart,
    /// A hard-sector slot boundary, carrying the slot number.
    HardSector(u8),
}

/// One entry in the flux stream's index table.
///
/// `pos` is the offset into `FluxStream::samples` of the first sample whose
/// timestamp is >= `ts` (per the invariant in spec.md SS3).
#[derive(Debug, Clone, Copy)]
pub struct FluxIndex {
    pub ts: i64,
    pub pos: usize,
    pub itype: IndexType,
}

/// A normalised flux stream for a single track: a monotonically increasing
/// (save for the EoData sentinel) array of nanosecond sample timestamps, plus
/// an index table marking revolution/hard-sector boundaries.
#[derive(Debug, Clone, Default)]
pub struct FluxStream {
    /// Sample timestamps in nanoseconds from an arbitrary epoch, strictly
    /// increasing.
    pub samples: Vec<i64>,
    pub index: Vec<FluxIndex>,
    /// Sample clock actually measured for this track (Hz), used by the DPLL
    /// to re-prime its nominal cell width against measured RPM.
    pub measured_rpm: f64,
}

impl FluxStream {
    pub fn new() -> Self {
        FluxStream::default()
    }

    /// Append a validated, already-converted-to-ns delta train. Internal to
    /// the ingestion routines; callers get a stream back via
    /// `kryoflux::ingest` / `scp::ingest`.
    pub(crate) fn push_sample(&mut self, ts_ns: i64) {
        self.samples.push(ts_ns);
    }

    pub(crate) fn push_index(&mut self, itype: IndexType) {
        let pos = self.samples.len();
        let ts = self.samples.last().copied().unwrap_or(0);
        self.index.push(FluxIndex { ts, pos, itype });
    }

    /// Validate the invariants from spec.md SS3: exactly one SoData at the
    /// head, one EoData at the tail, timestamps strictly increasing except
    /// at the EoData sentinel, and every index position points at the first
    /// sample whose timestamp is >= the index's own timestamp.
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.index.first().map(|i| i.itype), Some(IndexType::SoData)) {
            return Err(Flux2ImdError::InvalidHeader);
        }
        if !matches!(self.index.last().map(|i| i.itype), Some(IndexType::EoData)) {
            return Err(Flux2ImdError::InvalidHeader);
        }
        for w in self.samples.windows(2) {
            if w[1] <= w[0] {
                return Err(Flux2ImdError::InvalidHeader);
            }
        }
        for idx in &self.index {
            if idx.itype == IndexType::EoData {
                continue;
            }
            if idx.pos < self.samples.len() && self.samples[idx.pos] < idx.ts {
                return Err(Flux2ImdError::InvalidHeader);
            }
        }
        Ok(())
    }

    /// Returns the flux delta times (ns) between the sample at `start` and
    /// the following samples, up to (but not including) `end`.
    pub fn deltas(&self, start: usize, end: usize) -> FluxDeltaIter<'_> {
        FluxDeltaIter {
            samples: &self.samples,
            pos: start.max(1),
            end: end.min(self.samples.len()),
        }
    }

    /// Returns the index entry whose itype/ordinal matches `k`, per
    /// `seekIndex(k)` in spec.md SS4.1: the k'th non-sentinel index entry,
    /// or the EoData sentinel if `k` is out of range.
    pub fn seek_index(&self, k: usize) -> &FluxIndex {
        let real = self.index.iter().filter(|i| i.itype != IndexType::EoData).nth(k);
        real.unwrap_or_else(|| self.index.last().expect("flux stream always has an EoData sentinel"))
    }
}

/// An iterator over consecutive-sample deltas in nanoseconds, used by the
/// DPLL's per-bit algorithm and by the cell-width histogram estimator.
pub struct FluxDeltaIter<'a> {
    samples: &'a [i64],
    pos: usize,
    end: usize,
}

impl<'a> Iterator for FluxDeltaIter<'a> {
    type Item = i64;
    fn next(&mut self) -> Option<i64> {
        if self.pos >= self.end {
            return None;
        }
        let d = self.samples[self.pos] - self.samples[self.pos - 1];
        self.pos += 1;
        Some(d)
    }
}

/// Rescale a train of raw sample deltas so that a nominal 300 or 360 RPM
/// rotation ends at the same wall-clock time regardless of whether the
/// drive ran fast or slow, per spec.md SS4.1 "RPM calibration".
///
/// `measured_rpm` is `60.0 / revolution_seconds`; `nominal_rpm` is 300.0 for
/// 5.25in media (measured < 320) or 360.0 for 8in media.
pub fn rpm_scale_factor(measured_rpm: f64, nominal_rpm: f64) -> f64 {
    if measured_rpm <= 0.0 {
        1.0
    }
    else {
        nominal_rpm / measured_rpm
    }
}

pub fn nominal_rpm_for(measured_rpm: f64) -> f64 {
    if measured_rpm < 320.0 {
        300.0
    }
    else {
        360.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_stream() -> FluxStream {
        let mut fs = FluxStream::new();
        fs.push_index(IndexType::SoData);
        for ts in [100, 250, 420, 600, 900] {
            fs.push_sample(ts);
        }
        fs.push_index(IndexType::EoData);
        fs
    }

    #[test]
    fn validates_well_formed_stream() {
        let fs = sample_stream();
        assert!(fs.validate().is_ok());
    }

    #[test]
    fn rejects_non_increasing_samples() {
        let mut fs = sample_stream();
        fs.samples[2] = fs.samples[1];
        assert!(fs.validate().is_err());
    }

    #[test]
    fn deltas_are_consecutive_differences() {
        let fs = sample_stream();
        let d: Vec<i64> = fs.deltas(0, fs.samples.len()).collect();
        assert_eq!(d, vec![150, 170, 180, 300]);
    }

    #[test]
    fn nominal_rpm_buckets_by_measured_speed() {
        assert_eq!(nominal_rpm_for(300.2), 300.0);
        assert_eq!(nominal_rpm_for(360.1), 360.0);
        assert_eq!(nominal_rpm_for(319.9), 300.0);
        assert_eq!(nominal_rpm_for(320.0), 360.0);
    }
}
