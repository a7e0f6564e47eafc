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

    src/detect.rs

    The Encoding Detector (C5), per spec.md SS4.4. Runs when no format is
    pinned and the disk is soft-sectored; hard-sector disks take a fixed
    probe format determined by their sector count (16 or 32).
*/
use crate::dpll::Dpll;
use crate::flux::histogram::CellWidthHistogram;
use crate::flux::FluxStream;
use crate::format::{find_format, FormatDescriptor, MarkerKind};
use crate::pattern::match_pattern;

const DETECT_BYTE_LIMIT: usize = 1200;
const MTECH_EARLY_BYTE: usize = 50;
const HISTOGRAM_BUCKETS: usize = 64;

/// Estimate a trial format's cell width from the stream's own flux deltas
/// before retraining the DPLL against it, per spec.md SS4.1/SS4.4: a probe
/// primed with the disk's actual dominant cell width converges faster (and
/// on noisier captures, more reliably) than one primed purely from the
/// trial format's nominal rate. The histogram estimate is trusted only when
/// it falls within +/-50% of the trial's nominal cell width; outside that
/// band it's almost certainly looking at noise or the wrong family of
/// encoding, so the nominal value is kept instead.
fn seeded_cell_width(stream: &FluxStream, nominal_cell_ns: i64) -> i64 {
    let mut hist = CellWidthHistogram::new(HISTOGRAM_BUCKETS);
    for delta in stream.deltas(0, stream.samples.len()) {
        hist.record(delta);
    }
    let estimate = hist.estimate_cell_width_ns();
    if estimate > 0 && estimate * 2 > nominal_cell_ns && estimate * 2 < nominal_cell_ns * 3 {
        estimate
    }
    else {
        nominal_cell_ns
    }
}

/// Probe trial order for soft-sector detection: DD first, SD fallback,
/// chosen by measured RPM per spec.md SS4.4 (`RPM < 320 => 5.25in`).
fn probe_order(measured_rpm: f64) -> Vec<&'static str> {
    if measured_rpm < 320.0 {
        vec!["MFM5-DD", "FM8-PROBE"]
    }
    else {
        vec!["MFM8-PROBE", "FM8-PROBE", "M2FM8-INTEL-PROBE", "M2FM8-HP-PROBE", "TI-PROBE"]
    }
}

fn family_for(kind: MarkerKind) -> Option<&'static str> {
    match kind {
        MarkerKind::IndexAm | MarkerKind::Idam | MarkerKind::DataAm | MarkerKind::DeletedAm => Some("ibm"),
        MarkerKind::M2fmIndexAm | MarkerKind::M2fmIdam | MarkerKind::M2fmDataAm | MarkerKind::M2fmDeletedAm => {
            Some("m2fm-intel")
        }
        MarkerKind::HpIdam | MarkerKind::HpDataAm | MarkerKind::HpDeletedAm => Some("m2fm-hp"),
        MarkerKind::TiIdam | MarkerKind::TiDataAm => Some("ti"),
        MarkerKind::MtechSector => Some("mtech"),
        MarkerKind::NsiSector => Some("nsi"),
        _ => None,
    }
}

fn concrete_format_for_family(family: &str, trial: &FormatDescriptor) -> Option<&'static str> {
    match family {
        "ibm" if trial.sectors_per_track == 52 => Some("MFM8-DD"),
        "ibm" if trial.sectors_per_track == 16 => Some("MFM5-DD"),
        "ibm" => Some("FM8-SD"),
        "m2fm-intel" => Some("M2FM8-INTEL"),
        "m2fm-hp" => Some("M2FM8-HP"),
        "ti" => Some("TI"),
        "mtech" => Some("FM5H-MTECH"),
        "nsi" => Some("FM5H-NSI"),
        _ => None,
    }
}

/// Attempt one trial probe format against `stream`: retrain the DPLL and
/// call `match_pattern` repeatedly, tracking the first marker family seen
/// and returning the concrete format name on the *second* compatible
/// marker of that family, per spec.md SS4.4.
fn try_probe(stream: &FluxStream, trial_name: &str) -> Option<&'static str> {
    let trial = find_format(trial_name)?;
    let profiles = trial.adapt_profiles();
    let mut dpll = Dpll::new(seeded_cell_width(stream, trial.nominal_cell_ns));
    if !dpll.retrain(stream, &profiles, 0, stream.measured_rpm.max(1.0), crate::flux::nominal_rpm_for(stream.measured_rpm)) {
        return None;
    }

    let mut first_family: Option<&'static str> = None;
    let mut bytes_consumed = 0usize;
    while bytes_consumed < DETECT_BYTE_LIMIT {
        let Some(kind) = match_pattern(&mut dpll, &profiles, trial, DETECT_BYTE_LIMIT - bytes_consumed)
        else {
            break;
        };
        bytes_consumed += 16; // matchPattern consumes at least one marker-sized window per call.

        if matches!(kind, MarkerKind::MtechSector) && bytes_consumed <= MTECH_EARLY_BYTE {
            return Some("FM5H-MTECH");
        }
        if matches!(kind, MarkerKind::NsiSector) {
            return Some("FM5H-NSI");
        }

        let Some(family) = family_for(kind)
        else {
            continue;
        };

        match first_family {
            None => first_family = Some(family),
            Some(prev) if prev == family => {
                return concrete_format_for_family(family, trial);
            }
            Some(_) => {
                // A marker from a different family than the first one seen;
                // treat the probe as unreliable and keep scanning.
            }
        }
    }
    None
}

/// Auto-detect the soft-sector disk format, per spec.md SS4.4. Returns the
/// concrete format name, or `None` if no trial probe produced two
/// compatible markers within the byte budget.
pub fn detect_soft_sector_format(stream: &FluxStream) -> Option<&'static FormatDescriptor> {
    for trial_name in probe_order(stream.measured_rpm) {
        if let Some(name) = try_probe(stream, trial_name) {
            log::debug!("detect::detect_soft_sector_format(): selected {}", name);
            return find_format(name);
        }
    }
    log::warn!("detect::detect_soft_sector_format(): no format matched within byte budget");
    None
}

/// Hard-sector disks skip pattern-based probing entirely: the sector count
/// alone selects the probe format, per spec.md SS4.4.
pub fn hard_sector_probe(sector_count: u8) -> Option<&'static FormatDescriptor> {
    match sector_count {
        16 => find_format("FM5H-MTECH"),
        32 => find_format("FM8H-LSI"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hard_sector_probe_routes_16_and_32() {
        assert_eq!(hard_sector_probe(16).unwrap().name, "FM5H-MTECH");
        assert_eq!(hard_sector_probe(32).unwrap().name, "FM8H-LSI");
        assert!(hard_sector_probe(17).is_none());
    }

    #[test]
    fn probe_order_depends_on_measured_rpm() {
        assert_eq!(probe_order(300.0)[0], "MFM5-DD");
        assert_eq!(probe_order(360.0)[0], "MFM8-PROBE");
    }

    #[test]
    fn seeded_cell_width_falls_back_outside_trust_band() {
        let mut stream = FluxStream::new();
        // A handful of samples isn't enough to build a trustworthy
        // histogram; the estimate should come back 0 and get rejected.
        stream.push_sample(100);
        stream.push_sample(250);
        assert_eq!(seeded_cell_width(&stream, 4_000), 4_000);
    }

    #[test]
    fn seeded_cell_width_trusts_estimate_within_band() {
        let mut stream = FluxStream::new();
        let mut ts = 0i64;
        for _ in 0..200 {
            ts += 2_000;
            stream.push_sample(ts);
        }
        assert_eq!(seeded_cell_width(&stream, 2_000), 2_000);
    }
}
