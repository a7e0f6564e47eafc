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

    src/flux/kryoflux.rs

    KryoFlux `.raw` stream ingestion into a normalised `FluxStream`, per
    spec.md SS4.1.

    Byte codes 0x00-0x07 introduce a 2-byte FLUX2 sample, 0x08-0x0B are NOPs
    of length 1/2/3 or OVL16 (adds 0x10000 to the pending delta), 0x0C begins
    a 3-byte FLUX3 sample, 0x0D begins an out-of-band (OOB) block, and
    0x0E-0xFF are single-byte FLUX1 samples.

    Ingestion is two passes over the byte stream: pass 1 counts samples and
    records index events (and calibrates measured RPM from consecutive index
    pulses); pass 2 converts each accumulated delta into nanoseconds.
*/
use crate::error::{Flux2ImdError, Result};
use crate::flux::{nominal_rpm_for, rpm_scale_factor, FluxStream, IndexType};
use binrw::{binrw, BinRead};
use std::collections::HashMap;
use std::io::{Cursor, Read, Seek, SeekFrom};

/// KryoFlux's documented default master/sample/index clocks, used as a
/// fallback until a `KFInfo` block supplies the stream's actual values.
pub const DEFAULT_MCK: f64 = ((18_432_000.0 * 73.0) / 14.0) / 2.0;
pub const DEFAULT_SCK: f64 = DEFAULT_MCK / 2.0;
pub const DEFAULT_ICK: f64 = DEFAULT_MCK / 16.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OobKind {
    StreamInfo,
    Index,
    StreamEnd,
    KfInfo,
    Eof,
    Invalid(u8),
}

fn oob_kind(byte: u8) -> OobKind {
    match byte {
        0x00 => OobKind::Invalid(byte),
        0x01 => OobKind::StreamInfo,
        0x02 => OobKind::Index,
        0x03 => OobKind::StreamEnd,
        0x04 => OobKind::KfInfo,
        0x0D => OobKind::Eof,
        other => OobKind::Invalid(other),
    }
}

#[derive(Debug)]
#[binrw]
#[brw(little)]
struct OobHeader {
    kind: u8,
    size: u16,
}

#[derive(Debug)]
#[binrw]
#[brw(little)]
struct IndexPayload {
    stream_pos: u32,
    sample_counter: u32,
    index_counter: u32,
}

/// Parsed `KFInfo` `key=value` string, per spec.md SS4.1.
#[derive(Debug, Default, Clone)]
pub struct KfInfo {
    pub hard_sector_count: Option<u32>,
    pub sample_clock_hz: Option<f64>,
    pub index_clock_hz: Option<f64>,
    pub host_date: Option<String>,
    pub host_time: Option<String>,
}

fn parse_kfinfo(text: &str) -> KfInfo {
    let mut fields = HashMap::new();
    for pair in text.split(',') {
        if let Some((k, v)) = pair.split_once('=') {
            fields.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
    KfInfo {
        hard_sector_count: fields.get("hc").and_then(|v| v.parse().ok()),
        sample_clock_hz: fields.get("sck").and_then(|v| v.parse().ok()),
        index_clock_hz: fields.get("ick").and_then(|v| v.parse().ok()),
        host_date: fields.get("host_date").cloned(),
        host_time: fields.get("host_time").cloned(),
    }
}

/// One pending OOB event discovered while scanning the raw byte stream.
enum RawEvent {
    /// A flux sample delta in raw sample-clock ticks (pre-ns-conversion).
    Delta(u32),
    Index { sample_counter: u32, index_counter: u32 },
    KfInfo(KfInfo),
    Eof,
}

/// Walks the raw byte stream once, yielding a flat sequence of events. Both
/// ingestion passes drive off this single scanner so the byte grammar is
/// defined in exactly one place.
fn scan(raw: &[u8]) -> Result<Vec<RawEvent>> {
    let mut cur = Cursor::new(raw);
    let mut events = Vec::with_capacity(raw.len() / 2);
    let mut ovl: u32 = 0;

    loop {
        let mut code = [0u8; 1];
        match cur.read_exact(&mut code) {
            Ok(()) => {}
            Err(_) => break, // truncated stream with no trailing EOF block; treat as end.
        }
        let code = code[0];

        match code {
            0x00..=0x07 => {
                let mut b2 = [0u8; 1];
                cur.read_exact(&mut b2).map_err(|_| Flux2ImdError::TruncatedStream)?;
                let raw_delta = ((code as u32) << 8) | b2[0] as u32;
                events.push(RawEvent::Delta(ovl + raw_delta));
                ovl = 0;
            }
            0x08 => { /* NOP1 */ }
            0x09 => {
                cur.seek(SeekFrom::Current(1)).map_err(|_| Flux2ImdError::TruncatedStream)?;
            }
            0x0A => {
                cur.seek(SeekFrom::Current(2)).map_err(|_| Flux2ImdError::TruncatedStream)?;
            }
            0x0B => {
                ovl = ovl.saturating_add(0x1_0000);
            }
            0x0C => {
                let mut b = [0u8; 2];
                cur.read_exact(&mut b).map_err(|_| Flux2ImdError::TruncatedStream)?;
                let raw_delta = ((b[0] as u32) << 8) | b[1] as u32;
                events.push(RawEvent::Delta(ovl + raw_delta));
                ovl = 0;
            }
            0x0D => {
                let pos_before = cur.position();
                let hdr = match OobHeader::read(&mut cur) {
                    Ok(h) => h,
                    Err(_) => break,
                };
                match oob_kind(hdr.kind) {
                    OobKind::StreamInfo | OobKind::StreamEnd => {
                        cur.seek(SeekFrom::Current(hdr.size as i64))
                            .map_err(|_| Flux2ImdError::TruncatedStream)?;
                    }
                    OobKind::Index => {
                        let payload = IndexPayload::read(&mut cur)?;
                        events.push(RawEvent::Index {
                            sample_counter: payload.sample_counter,
                            index_counter: payload.index_counter,
                        });
                    }
                    OobKind::KfInfo => {
                        let mut buf = vec![0u8; hdr.size as usize];
                        cur.read_exact(&mut buf).map_err(|_| Flux2ImdError::TruncatedStream)?;
                        let text = String::from_utf8_lossy(&buf);
                        let text = text.trim_end_matches('\0');
                        events.push(RawEvent::KfInfo(parse_kfinfo(text)));
                    }
                    OobKind::Eof => {
                        events.push(RawEvent::Eof);
                        break;
                    }
                    OobKind::Invalid(b) => {
                        log::error!("kryoflux::scan(): invalid OOB block type 0x{:02X} at {}", b, pos_before);
                        break;
                    }
                }
            }
            _ => {
                // FLUX1: single byte sample, 0x0E..=0xFF.
                events.push(RawEvent::Delta(ovl + code as u32));
                ovl = 0;
            }
        }
    }
    Ok(events)
}

/// Ingest a KryoFlux `.raw` byte stream into a normalised `FluxStream`.
pub fn ingest(raw: &[u8]) -> Result<FluxStream> {
    let events = scan(raw)?;

    let mut sck = DEFAULT_SCK;
    let mut ick = DEFAULT_ICK;
    for ev in &events {
        if let RawEvent::KfInfo(info) = ev {
            if let Some(v) = info.sample_clock_hz {
                sck = v;
            }
            if let Some(v) = info.index_clock_hz {
                ick = v;
            }
        }
    }

    // Pass 1: compute measured RPM from consecutive index pulses, and
    // locate where each index event falls in the eventual sample sequence.
    let mut index_counters = Vec::new();
    let mut sample_ordinal = 0usize;
    let mut index_positions: Vec<(usize, u32, u32)> = Vec::new(); // (sample_ordinal, sample_counter, index_counter)
    for ev in &events {
        match ev {
            RawEvent::Delta(_) => sample_ordinal += 1,
            RawEvent::Index {
                sample_counter,
                index_counter,
            } => {
                index_counters.push(*index_counter);
                index_positions.push((sample_ordinal, *sample_counter, *index_counter));
            }
            _ => {}
        }
    }

    let mut measured_rpm = 300.0;
    if index_counters.len() >= 2 {
        let delta_ticks = index_counters[1].wrapping_sub(index_counters[0]) as f64;
        let rev_seconds = delta_ticks / ick;
        if rev_seconds > 0.0 {
            measured_rpm = 60.0 / rev_seconds;
        }
    }
    let nominal = nominal_rpm_for(measured_rpm);
    let mut scaler = rpm_scale_factor(measured_rpm, nominal) / sck;
    // scaler converts raw sample-clock ticks directly into seconds, rescaled
    // by the nominal/measured RPM ratio; ns conversion happens inline below.
    scaler *= 1.0e9;

    // Pass 2: build the normalised stream.
    let mut fs = FluxStream::new();
    fs.measured_rpm = measured_rpm;
    fs.push_index(IndexType::SoData);

    let mut acc_ns: i64 = 0;
    let mut next_index_ord = 0usize;
    let mut sample_ordinal = 0usize;
    let mut seen_first_index = false;

    for ev in &events {
        match ev {
            RawEvent::Delta(ticks) => {
                acc_ns += (*ticks as f64 * scaler).round() as i64;
                fs.push_sample(acc_ns);
                sample_ordinal += 1;
            }
            RawEvent::Index { .. } => {
                if next_index_ord < index_positions.len() && index_positions[next_index_ord].0 == sample_ordinal {
                    if seen_first_index {
                        fs.push_index(IndexType::SsStart);
                    }
                    seen_first_index = true;
                    next_index_ord += 1;
                }
            }
            RawEvent::KfInfo(_) | RawEvent::Eof => {}
        }
    }
    fs.push_index(IndexType::EoData);
    fs.validate()?;
    Ok(fs)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a minimal synthetic KryoFlux stream: a KFInfo block, an Index
    /// block, a handful of FLUX1 samples, another Index block, and an EOF
    /// OOB block.
    fn synth_stream() -> Vec<u8> {
        let mut buf = Vec::new();

        // KFInfo block: kind=0x04, size=len(text), then text.
        let text = b"sck=24027428.571,ick=3003428.571,hc=0,host_date=2024.01.01,host_time=00:00:00\0";
        buf.push(0x0D);
        buf.push(0x04);
        buf.extend_from_slice(&(text.len() as u16).to_le_bytes());
        buf.extend_from_slice(text);

        // Index block #1: kind=0x02, size=12 (payload only, 3x u32), payload.
        buf.push(0x0D);
        buf.push(0x02);
        buf.extend_from_slice(&12u16.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes()); // stream_pos (unused by ingest)
        buf.extend_from_slice(&0u32.to_le_bytes()); // sample_counter
        buf.extend_from_slice(&0u32.to_le_bytes()); // index_counter

        // A few FLUX1 samples (single byte >= 0x0E).
        for b in [0x20u8, 0x30, 0x40, 0x50] {
            buf.push(b);
        }

        // Index block #2, one revolution later: index_counter ~ 300rpm worth of ick ticks.
        let index_counter_2 = (3_003_428.571 * (60.0 / 300.0)) as u32;
        buf.push(0x0D);
        buf.push(0x02);
        buf.extend_from_slice(&12u16.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&index_counter_2.to_le_bytes());

        // EOF OOB block: kind=0x0D, size=0x0D (per KryoFlux convention the EOF
        // block's own "size" field repeats its kind byte).
        buf.push(0x0D);
        buf.push(0x0D);
        buf.extend_from_slice(&0x0Du16.to_le_bytes());

        buf
    }

    #[test]
    fn ingests_synthetic_stream_into_valid_flux() {
        let raw = synth_stream();
        let fs = ingest(&raw).expect("ingest should succeed");
        assert!(fs.validate().is_ok());
        assert_eq!(fs.samples.len(), 4);
        assert!((fs.measured_rpm - 300.0).abs() < 5.0);
    }

    #[test]
    fn samples_are_strictly_increasing() {
        let raw = synth_stream();
        let fs = ingest(&raw).unwrap();
        for w in fs.samples.windows(2) {
            assert!(w[1] > w[0]);
        }
    }
}
