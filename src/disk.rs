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

    src/disk.rs

    The data model assembled by the track manager (C7) and consumed by the
    image writer (C8): `Disk` owns one `Track` per physical cylinder/head,
    each `Track` owns a slot-indexed vector of `Sector`s, per spec.md SS3.
*/
use crate::chs::DiskCh;
use crate::decode::SuspectByte;
use crate::format::FormatDescriptor;
use bitflags::bitflags;

bitflags! {
    /// Per-sector status, per spec.md SS3 "Sector".
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SectorStatus: u8 {
        /// The IDAM's own CRC/checksum validated.
        const IDAM_GOOD = 0b0000_0001;
        /// The data block's CRC/checksum validated.
        const DATA_GOOD = 0b0000_0010;
        /// One or more suspect bytes were repaired by majority vote across
        /// duplicate copies.
        const FIXED     = 0b0000_0100;
    }
}

bitflags! {
    /// Per-track status, per spec.md SS3 "Track".
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TrackStatus: u8 {
        /// A sector's id byte was reconstructed by interleave search rather
        /// than read directly from an IDAM.
        const FIXED_ID = 0b0000_0001;
        /// At least one sector's id could not be determined at all.
        const BAD_ID   = 0b0000_0010;
        /// The IDAM cylinder byte disagreed with the track's physical
        /// cylinder.
        const CYL      = 0b0000_0100;
        /// Every IDAM cylinder byte disagreed the same way; recorded in the
        /// image's cylinder map rather than flagged per-sector.
        const MCYL      = 0b0000_1000;
        /// The IDAM head byte disagreed with the track's physical head.
        const SIDE     = 0b0001_0000;
        /// Every IDAM head byte disagreed the same way.
        const MSIDE    = 0b0010_0000;
        /// More candidate sectors were found than the format allows; excess
        /// sectors beyond `sectors_per_track` were dropped.
        const TOO_MANY = 0b0100_0000;
    }
}

/// One physical copy of a sector's id field and data body, captured during
/// a single revolution. Tracks may see several of these for one logical
/// sector slot across multiple revolutions; `track.rs` reconciles them.
#[derive(Debug, Clone)]
pub struct SectorCopy {
    pub id_field: Vec<SuspectByte>,
    pub data: Vec<SuspectByte>,
    pub idam_good: bool,
    pub data_good: bool,
}

/// A logical sector slot within a track, per spec.md SS3 "Sector". Holds
/// every physical copy seen across revolutions plus the reconciled best
/// version used for image output.
#[derive(Debug, Clone)]
pub struct Sector {
    pub id: u8,
    pub cylinder: u8,
    pub head: u8,
    pub size_code: u8,
    pub status: SectorStatus,
    pub copies: Vec<SectorCopy>,
    pub data: Vec<u8>,
    pub deleted: bool,
}

impl Sector {
    pub fn new(id: u8, cylinder: u8, head: u8, size_code: u8) -> Self {
        Sector {
            id,
            cylinder,
            head,
            size_code,
            status: SectorStatus::empty(),
            copies: Vec::new(),
            data: Vec::new(),
            deleted: false,
        }
    }

    pub fn add_copy(&mut self, copy: SectorCopy) {
        if copy.idam_good {
            self.status |= SectorStatus::IDAM_GOOD;
        }
        if copy.data_good {
            self.status |= SectorStatus::DATA_GOOD;
        }
        self.copies.push(copy);
    }

    /// Reconcile all copies of this sector's data body into a single best
    /// version, per spec.md SS4.6: prefer a copy whose data CRC validated;
    /// failing that, vote each byte position across all copies and flag the
    /// sector `FIXED` if any position required a majority decision among
    /// disagreeing bytes.
    pub fn reconcile(&mut self) {
        if let Some(good) = self.copies.iter().find(|c| c.data_good) {
            self.data = good.data.iter().map(|b| b.value).collect();
            return;
        }
        if self.copies.is_empty() {
            return;
        }
        let len = self.copies.iter().map(|c| c.data.len()).max().unwrap_or(0);
        let mut out = Vec::with_capacity(len);
        let mut any_fixed = false;
        for i in 0..len {
            let mut votes: Vec<u8> = Vec::new();
            for copy in &self.copies {
                if let Some(b) = copy.data.get(i) {
                    votes.push(b.value);
                }
            }
            let chosen = majority_byte(&votes);
            if votes.iter().any(|&v| v != chosen) {
                any_fixed = true;
            }
            out.push(chosen);
        }
        self.data = out;
        if any_fixed {
            self.status |= SectorStatus::FIXED;
        }
    }
}

fn majority_byte(votes: &[u8]) -> u8 {
    let mut counts: std::collections::HashMap<u8, usize> = std::collections::HashMap::new();
    for &v in votes {
        *counts.entry(v).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by_key(|&(_, count)| count)
        .map(|(value, _)| value)
        .unwrap_or(0)
}

/// Sentinel `Sector::id` meaning "no marker has resolved this physical slot
/// yet", per spec.md SS3 "Track" `slotToSector[slot] -> sectorId (0xFF =
/// unknown)".
pub const UNKNOWN_SECTOR_ID: u8 = 0xFF;

/// One physical track: a cylinder/head pair, the format that decoded it, and
/// its slot-ordered sector table, per spec.md SS3 "Track". `slots` is sized
/// to the format's `sectors_per_track` up front rather than grown by id
/// lookup, so a physical slot whose marker was never matched at all still
/// has a place to be filled in later by interleave reconstruction.
#[derive(Debug, Clone)]
pub struct Track {
    pub ch: DiskCh,
    pub format_name: &'static str,
    pub status: TrackStatus,
    /// Sector slots in physical rotational order. `id == UNKNOWN_SECTOR_ID`
    /// marks a slot no marker has resolved yet.
    pub slots: Vec<Sector>,
    pub cylinder_map: Option<u8>,
    pub head_map: Option<u8>,
}

impl Track {
    pub fn new(ch: DiskCh, format_name: &'static str, spt: usize) -> Self {
        Track {
            ch,
            format_name,
            status: TrackStatus::empty(),
            slots: (0..spt).map(|_| Sector::new(UNKNOWN_SECTOR_ID, 0, 0, 0)).collect(),
            cylinder_map: None,
            head_map: None,
        }
    }

    /// Find the slot already holding sector id `id`, or `None`.
    pub fn slot_for_id(&self, id: u8) -> Option<usize> {
        if id == UNKNOWN_SECTOR_ID {
            return None;
        }
        self.slots.iter().position(|s| s.id == id)
    }

    /// Mutable access to a slot by its physical rotational position, used
    /// while a track is being assembled: the caller tracks rotational
    /// position itself (spec.md SS4.6 "slot assignment"), the array no
    /// longer grows by id lookup.
    pub fn slot_mut(&mut self, slot_index: usize) -> Option<&mut Sector> {
        self.slots.get_mut(slot_index)
    }

    pub fn reconcile_all(&mut self) {
        for sector in &mut self.slots {
            sector.reconcile();
        }
    }

    pub fn sectors_in_id_order(&self) -> Vec<&Sector> {
        let mut v: Vec<&Sector> = self.slots.iter().filter(|s| s.id != UNKNOWN_SECTOR_ID).collect();
        v.sort_by_key(|s| s.id);
        v
    }
}

/// The complete assembled disk image: every decoded track plus the format
/// that was ultimately selected, per spec.md SS3 "Disk".
#[derive(Debug, Clone)]
pub struct Disk {
    pub format: &'static FormatDescriptor,
    pub tracks: Vec<Track>,
}

impl Disk {
    pub fn new(format: &'static FormatDescriptor) -> Self {
        Disk { format, tracks: Vec::new() }
    }

    pub fn track_mut(&mut self, ch: DiskCh) -> &mut Track {
        if !self.tracks.iter().any(|t| t.ch == ch) {
            self.tracks.push(Track::new(ch, self.format.name, self.format.sectors_per_track as usize));
        }
        let idx = self.tracks.iter().position(|t| t.ch == ch).expect("just inserted");
        &mut self.tracks[idx]
    }

    pub fn sorted_tracks(&self) -> Vec<&Track> {
        let mut v: Vec<&Track> = self.tracks.iter().collect();
        v.sort_by_key(|t| t.ch);
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suspect_bytes(data: &[u8]) -> Vec<SuspectByte> {
        data.iter().map(|&b| SuspectByte::new(b, false)).collect()
    }

    #[test]
    fn reconcile_prefers_crc_valid_copy() {
        let mut sector = Sector::new(1, 0, 0, 0);
        sector.add_copy(SectorCopy {
            id_field: vec![],
            data: suspect_bytes(&[0xAA, 0xBB]),
            idam_good: true,
            data_good: false,
        });
        sector.add_copy(SectorCopy {
            id_field: vec![],
            data: suspect_bytes(&[0x11, 0x22]),
            idam_good: true,
            data_good: true,
        });
        sector.reconcile();
        assert_eq!(sector.data, vec![0x11, 0x22]);
        assert!(sector.status.contains(SectorStatus::DATA_GOOD));
    }

    #[test]
    fn reconcile_votes_across_bad_copies_and_flags_fixed() {
        let mut sector = Sector::new(1, 0, 0, 0);
        sector.add_copy(SectorCopy { id_field: vec![], data: suspect_bytes(&[0x01, 0x02]), idam_good: true, data_good: false });
        sector.add_copy(SectorCopy { id_field: vec![], data: suspect_bytes(&[0x01, 0xFF]), idam_good: true, data_good: false });
        sector.add_copy(SectorCopy { id_field: vec![], data: suspect_bytes(&[0x01, 0x02]), idam_good: true, data_good: false });
        sector.reconcile();
        assert_eq!(sector.data, vec![0x01, 0x02]);
        assert!(sector.status.contains(SectorStatus::FIXED));
    }

    #[test]
    fn track_slots_start_unknown_and_are_addressable_by_position() {
        let mut track = Track::new(DiskCh::new(0, 0), "MFM8-DD", 4);
        assert_eq!(track.slots.len(), 4);
        assert!(track.slots.iter().all(|s| s.id == UNKNOWN_SECTOR_ID));

        let sector = track.slot_mut(2).unwrap();
        sector.id = 3;
        sector.status |= SectorStatus::IDAM_GOOD;
        assert_eq!(track.slot_for_id(3), Some(2));
        assert!(track.slots[2].status.contains(SectorStatus::IDAM_GOOD));
    }

    #[test]
    fn sectors_in_id_order_sorts_by_id_and_skips_unknown() {
        let mut track = Track::new(DiskCh::new(0, 0), "MFM8-DD", 3);
        track.slot_mut(0).unwrap().id = 5;
        track.slot_mut(1).unwrap().id = 1;
        // slot 2 stays UNKNOWN_SECTOR_ID.
        let ids: Vec<u8> = track.sectors_in_id_order().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 5]);
    }
}
