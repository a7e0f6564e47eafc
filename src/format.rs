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

    src/format.rs

    The Format Table (C3): a declarative, static table of supported disk
    formats, per spec.md SS4.3. Grouped by encoding; within a group the
    first entry is the "probe" format used by the detector (C5), subsequent
    entries are concrete formats.
*/
use crate::dpll::AdaptProfiles;
use bitflags::bitflags;

/// The base bitcell encoding, per spec.md glossary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum Encoding {
    Fm,
    Mfm,
    M2fmIntel,
    M2fmHp,
    Lsi,
    Zds,
    Mtech,
    Nsi,
    Ti,
}

bitflags! {
    /// `options` bitset from spec.md SS3 "Format Descriptor".
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FormatOptions: u16 {
        const BYTE_REVERSE  = 0b0000_0001;
        const BIT_INVERT    = 0b0000_0010;
        const AUTO_SIZE     = 0b0000_0100;
        const AUTO_SPACING  = 0b0000_1000;
        const ZDS_FLAVOUR   = 0b0001_0000;
        const LSI_FLAVOUR   = 0b0010_0000;
        const HP_FLAVOUR    = 0b0100_0000;
        const MTECH_FLAVOUR = 0b1000_0000;
        const NSI_FLAVOUR   = 0b0001_0000_0000;
        const TI_FLAVOUR    = 0b0010_0000_0000;
        /// Never produce IMD output for this format (ZDS, MTECH, TI, and any
        /// track marked BADID at assembly time).
        const NO_IMD        = 0b0100_0000_0000;
    }
}

/// Which CRC routine a format uses to validate IDAMs/data blocks, per
/// spec.md SS4.5. Kept as a closed enum (tagged-variant dispatch) rather
/// than a function pointer, per spec.md SS9.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcKind {
    /// CCITT CRC-16 (x^16+x^12+x^5+1), marker+payload, configurable init.
    Std,
    /// Same polynomial as `Std` but each input byte is bit-reversed first.
    Rev,
    /// Byte-sum of payload compared against a 16-bit little-endian trailer.
    Lsi,
    /// Bitwise CRC-16-IBM (x^16+x^15+x^2+1), trailer before a 2-byte postamble.
    Zds,
    /// 8-bit rotating add-with-carry.
    Mtech8,
    /// 8-bit XOR-rotate over payload excluding the leading marker byte.
    Nsi,
}

/// Tagged marker kinds recognised by the pattern matcher (C4), per
/// spec.md SS4.3. A single closed enum shared by the matcher and decoder so
/// they agree by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerKind {
    Gap,
    Sync,
    IndexAm,
    Idam,
    DataAm,
    DeletedAm,
    M2fmIndexAm,
    M2fmIdam,
    M2fmDataAm,
    M2fmDeletedAm,
    HpIdam,
    HpDataAm,
    HpDeletedAm,
    TiIdam,
    TiDataAm,
    LsiSector,
    ZdsSector,
    MtechSector,
    NsiSector,
}

/// One entry of a format's address-mark pattern table, per spec.md SS3
/// "Pattern Entry". `mask`/`match_bits` are evaluated against the DPLL's
/// rolling 64-bit pattern register.
#[derive(Debug, Clone, Copy)]
pub struct PatternEntry {
    pub mask: u64,
    pub match_bits: u64,
    pub kind: MarkerKind,
}

impl PatternEntry {
    pub const fn new(mask: u64, match_bits: u64, kind: MarkerKind) -> Self {
        PatternEntry { mask, match_bits, kind }
    }
}

/// A static per-encoding descriptor, per spec.md SS3 "Format Descriptor".
#[derive(Debug, Clone)]
pub struct FormatDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub sector_size: usize,
    pub first_sector_id: u8,
    pub sectors_per_track: u8,
    pub encoding: Encoding,
    pub options: FormatOptions,
    pub crc: CrcKind,
    pub crc_init: u16,
    pub patterns: &'static [PatternEntry],
    pub first_idam_offset: usize,
    pub first_data_offset: usize,
    pub nominal_spacing: usize,
    pub nominal_cell_ns: i64,
}

impl FormatDescriptor {
    pub fn adapt_profiles(&self) -> AdaptProfiles {
        // All encodings currently share the same [fast, medium, slow]
        // shape; formats that need different tolerances (notably the
        // hard-sector vendor encodings, whose preambles are longer) widen
        // the `count` fields here instead of carrying a distinct table.
        match self.encoding {
            Encoding::Lsi | Encoding::Zds | Encoding::Mtech | Encoding::Nsi => AdaptProfiles {
                stages: vec![
                    crate::dpll::ProfileTuning { divisor: 8, count: 32, tolerance_percent: 25.0 },
                    crate::dpll::ProfileTuning { divisor: 16, count: 96, tolerance_percent: 12.0 },
                    crate::dpll::ProfileTuning { divisor: 32, count: u32::MAX, tolerance_percent: 6.0 },
                ],
            },
            _ => AdaptProfiles::standard(),
        }
    }

    pub fn no_imd(&self) -> bool {
        self.options.contains(FormatOptions::NO_IMD)
    }
}

// ---------------------------------------------------------------------
// IBM FM / MFM pattern tables.
// ---------------------------------------------------------------------

const IBM_GAP_MASK: u64 = 0xFFFF_FFFF_FFFF_0000;

static IBM_FM_PATTERNS: &[PatternEntry] = &[
    PatternEntry::new(IBM_GAP_MASK, 0xAAAA_AAAA_AAAA_0000, MarkerKind::Sync),
    PatternEntry::new(0xFFFF_FFFF, 0xF77A_0000, MarkerKind::IndexAm),
    PatternEntry::new(0xFFFF_FFFF, 0xF57E_0000, MarkerKind::Idam),
    PatternEntry::new(0xFFFF_FFFF, 0xF56F_0000, MarkerKind::DataAm),
    PatternEntry::new(0xFFFF_FFFF, 0xF56A_0000, MarkerKind::DeletedAm),
];

static IBM_MFM_PATTERNS: &[PatternEntry] = &[
    PatternEntry::new(0xFFFF_FFFF_FFFF_0000, 0x4489_4489_4489_0000, MarkerKind::Sync),
    PatternEntry::new(0xFFFF_FFFF, 0x4489_FC00, MarkerKind::IndexAm),
    PatternEntry::new(0xFFFF_FFFF, 0x4489_FE00, MarkerKind::Idam),
    PatternEntry::new(0xFFFF_FFFF, 0x4489_FB00, MarkerKind::DataAm),
    PatternEntry::new(0xFFFF_FFFF, 0x4489_F800, MarkerKind::DeletedAm),
];

// M2FM (Intel) per spec.md SS8 scenario 4: INDEXAM 55 55 2A 52, IDAM 55 55 2A 54,
// DATAAM 55 55 2A 45.
static M2FM_INTEL_PATTERNS: &[PatternEntry] = &[
    PatternEntry::new(0xFFFF_FFFF, 0x5555_2A52, MarkerKind::M2fmIndexAm),
    PatternEntry::new(0xFFFF_FFFF, 0x5555_2A54, MarkerKind::M2fmIdam),
    PatternEntry::new(0xFFFF_FFFF, 0x5555_2A45, MarkerKind::M2fmDataAm),
    PatternEntry::new(0xFFFF_FFFF, 0x5555_2A48, MarkerKind::M2fmDeletedAm),
];

// M2FM (HP variant) uses a distinct sync nibble but the same marker shape;
// the underlying cause of the differing nibble is unspecified in the
// original sources (formats.c), so it is kept as its own table rather than
// derived from the Intel one.
static M2FM_HP_PATTERNS: &[PatternEntry] = &[
    PatternEntry::new(0xFFFF_FFFF, 0x5555_2A50, MarkerKind::HpIdam),
    PatternEntry::new(0xFFFF_FFFF, 0x5555_2A41, MarkerKind::HpDataAm),
    PatternEntry::new(0xFFFF_FFFF, 0x5555_2A44, MarkerKind::HpDeletedAm),
];

static TI_PATTERNS: &[PatternEntry] = &[
    PatternEntry::new(0xFFFF_FFFF, 0xFE00_0000, MarkerKind::TiIdam),
    PatternEntry::new(0xFFFF_FFFF, 0xFB00_0000, MarkerKind::TiDataAm),
];

// LSI and ZDS hard-sector sync patterns, per spec.md SS4.5. Both are
// evaluated per-slot during hard-sector track assembly rather than via the
// general matchPattern loop; the byte-0 mask wildcards the cylinder so the
// marker conflict table (track.rs) can detect when a slot matches both.
static LSI_PATTERNS: &[PatternEntry] = &[PatternEntry::new(0xFF00_0000, 0xFD00_0000, MarkerKind::LsiSector)];

/// LSI hard-sector id assignment, per spec.md SS4.5: `sectorId = (table[slot]
/// + cylinder * 8) % 32`, a fixed 32-entry interleave rather than a
/// sequential slot-to-id mapping.
pub static LSI_INTERLEAVE: [u8; 32] = [
    0, 11, 22, 1, 12, 23, 2, 13, 24, 3, 14, 25, 4, 15, 26, 5, 16, 27, 6, 17, 28, 7, 18, 29, 8, 19, 30, 9, 20, 31, 10, 21,
];

static ZDS_PATTERNS: &[PatternEntry] = &[PatternEntry::new(0x8000_0000, 0x8000_0000, MarkerKind::ZdsSector)];

// MTECH wildcards the cylinder field "due to track alignment problems" per
// spec.md SS9; the mask below leaves the cylinder byte open.
static MTECH_PATTERNS: &[PatternEntry] = &[PatternEntry::new(0xFF00_FFFF, 0xFF00_0000, MarkerKind::MtechSector)];

static NSI_PATTERNS: &[PatternEntry] = &[PatternEntry::new(0xFFFF_0000, 0xFA00_0000, MarkerKind::NsiSector)];

pub fn format_table() -> &'static [FormatDescriptor] {
    static TABLE: std::sync::OnceLock<Vec<FormatDescriptor>> = std::sync::OnceLock::new();
    TABLE.get_or_init(|| {
        vec![
            // --- FM group: probe first, then concrete formats. ---
            FormatDescriptor {
                name: "FM8-PROBE",
                description: "FM 8in probe format",
                sector_size: 128,
                first_sector_id: 1,
                sectors_per_track: 26,
                encoding: Encoding::Fm,
                options: FormatOptions::AUTO_SIZE | FormatOptions::AUTO_SPACING,
                crc: CrcKind::Std,
                crc_init: 0xFFFF,
                patterns: IBM_FM_PATTERNS,
                first_idam_offset: 0,
                first_data_offset: 0,
                nominal_spacing: 334,
                nominal_cell_ns: 4_000,
            },
            FormatDescriptor {
                name: "FM8-SD",
                description: "FM 8in single density, 26x128",
                sector_size: 128,
                first_sector_id: 1,
                sectors_per_track: 26,
                encoding: Encoding::Fm,
                options: FormatOptions::empty(),
                crc: CrcKind::Std,
                crc_init: 0xFFFF,
                patterns: IBM_FM_PATTERNS,
                first_idam_offset: 0,
                first_data_offset: 0,
                nominal_spacing: 334,
                nominal_cell_ns: 4_000,
            },
            // --- MFM group. ---
            FormatDescriptor {
                name: "MFM8-PROBE",
                description: "MFM 8in probe format",
                sector_size: 128,
                first_sector_id: 1,
                sectors_per_track: 52,
                encoding: Encoding::Mfm,
                options: FormatOptions::AUTO_SIZE | FormatOptions::AUTO_SPACING,
                crc: CrcKind::Std,
                crc_init: 0xFFFF,
                patterns: IBM_MFM_PATTERNS,
                first_idam_offset: 0,
                first_data_offset: 0,
                nominal_spacing: 167,
                nominal_cell_ns: 2_000,
            },
            FormatDescriptor {
                name: "MFM8-DD",
                description: "MFM 8in double density, 52x128",
                sector_size: 128,
                first_sector_id: 1,
                sectors_per_track: 52,
                encoding: Encoding::Mfm,
                options: FormatOptions::empty(),
                crc: CrcKind::Std,
                crc_init: 0xFFFF,
                patterns: IBM_MFM_PATTERNS,
                first_idam_offset: 0,
                first_data_offset: 0,
                nominal_spacing: 167,
                nominal_cell_ns: 2_000,
            },
            FormatDescriptor {
                name: "MFM5-DD",
                description: "MFM 5.25in double density, 16x256",
                sector_size: 256,
                first_sector_id: 1,
                sectors_per_track: 16,
                encoding: Encoding::Mfm,
                options: FormatOptions::empty(),
                crc: CrcKind::Std,
                crc_init: 0xFFFF,
                patterns: IBM_MFM_PATTERNS,
                first_idam_offset: 0,
                first_data_offset: 0,
                nominal_spacing: 384,
                nominal_cell_ns: 2_000,
            },
            // --- M2FM Intel group. ---
            FormatDescriptor {
                name: "M2FM8-INTEL-PROBE",
                description: "M2FM 8in Intel probe format",
                sector_size: 128,
                first_sector_id: 0,
                sectors_per_track: 52,
                encoding: Encoding::M2fmIntel,
                options: FormatOptions::AUTO_SIZE | FormatOptions::AUTO_SPACING,
                crc: CrcKind::Std,
                crc_init: 0xCDB4,
                patterns: M2FM_INTEL_PATTERNS,
                first_idam_offset: 0,
                first_data_offset: 0,
                nominal_spacing: 167,
                nominal_cell_ns: 2_000,
            },
            FormatDescriptor {
                name: "M2FM8-INTEL",
                description: "M2FM 8in Intel, 52x128",
                sector_size: 128,
                first_sector_id: 0,
                sectors_per_track: 52,
                encoding: Encoding::M2fmIntel,
                options: FormatOptions::empty(),
                crc: CrcKind::Std,
                crc_init: 0xCDB4,
                patterns: M2FM_INTEL_PATTERNS,
                first_idam_offset: 0,
                first_data_offset: 0,
                nominal_spacing: 167,
                nominal_cell_ns: 2_000,
            },
            // --- M2FM HP group. ---
            FormatDescriptor {
                name: "M2FM8-HP-PROBE",
                description: "M2FM 8in HP probe format",
                sector_size: 256,
                first_sector_id: 0,
                sectors_per_track: 30,
                encoding: Encoding::M2fmHp,
                options: FormatOptions::AUTO_SIZE | FormatOptions::AUTO_SPACING | FormatOptions::HP_FLAVOUR | FormatOptions::BYTE_REVERSE,
                crc: CrcKind::Rev,
                crc_init: 0x0000,
                patterns: M2FM_HP_PATTERNS,
                first_idam_offset: 0,
                first_data_offset: 0,
                nominal_spacing: 290,
                nominal_cell_ns: 2_000,
            },
            FormatDescriptor {
                name: "M2FM8-HP",
                description: "M2FM 8in HP, 30x256",
                sector_size: 256,
                first_sector_id: 0,
                sectors_per_track: 30,
                encoding: Encoding::M2fmHp,
                options: FormatOptions::HP_FLAVOUR | FormatOptions::BYTE_REVERSE,
                crc: CrcKind::Rev,
                crc_init: 0x0000,
                patterns: M2FM_HP_PATTERNS,
                first_idam_offset: 0,
                first_data_offset: 0,
                nominal_spacing: 290,
                nominal_cell_ns: 2_000,
            },
            // --- TI group. ---
            FormatDescriptor {
                name: "TI-PROBE",
                description: "TI 5.25in probe format",
                sector_size: 128,
                first_sector_id: 0,
                sectors_per_track: 18,
                encoding: Encoding::Ti,
                options: FormatOptions::AUTO_SIZE | FormatOptions::AUTO_SPACING | FormatOptions::TI_FLAVOUR,
                crc: CrcKind::Std,
                crc_init: 0xFFFF,
                patterns: TI_PATTERNS,
                first_idam_offset: 0,
                first_data_offset: 0,
                nominal_spacing: 334,
                nominal_cell_ns: 2_000,
            },
            FormatDescriptor {
                name: "TI",
                description: "TI 5.25in, 18x128",
                sector_size: 128,
                first_sector_id: 0,
                sectors_per_track: 18,
                encoding: Encoding::Ti,
                options: FormatOptions::TI_FLAVOUR | FormatOptions::NO_IMD,
                crc: CrcKind::Std,
                crc_init: 0xFFFF,
                patterns: TI_PATTERNS,
                first_idam_offset: 0,
                first_data_offset: 0,
                nominal_spacing: 334,
                nominal_cell_ns: 2_000,
            },
            // --- Hard-sector 8in ZDS. ---
            FormatDescriptor {
                name: "FM8H-ZDS",
                description: "ZDS hard-sectored 8in, 32x128",
                sector_size: 128,
                first_sector_id: 0,
                sectors_per_track: 32,
                encoding: Encoding::Zds,
                options: FormatOptions::ZDS_FLAVOUR | FormatOptions::NO_IMD,
                crc: CrcKind::Zds,
                crc_init: 0x0000,
                patterns: ZDS_PATTERNS,
                first_idam_offset: 0,
                first_data_offset: 0,
                nominal_spacing: 256,
                nominal_cell_ns: 4_000,
            },
            // --- Hard-sector 8in LSI. ---
            FormatDescriptor {
                name: "FM8H-LSI",
                description: "LSI hard-sectored 8in, 32x128",
                sector_size: 128,
                first_sector_id: 0,
                sectors_per_track: 32,
                encoding: Encoding::Lsi,
                options: FormatOptions::LSI_FLAVOUR,
                crc: CrcKind::Lsi,
                crc_init: 0x0000,
                patterns: LSI_PATTERNS,
                first_idam_offset: 0,
                first_data_offset: 0,
                nominal_spacing: 256,
                nominal_cell_ns: 4_000,
            },
            // --- Hard-sector 5.25in MTECH. ---
            FormatDescriptor {
                name: "FM5H-MTECH",
                description: "MTECH hard-sectored 5.25in, 16x256",
                sector_size: 256,
                first_sector_id: 0,
                sectors_per_track: 16,
                encoding: Encoding::Mtech,
                options: FormatOptions::MTECH_FLAVOUR | FormatOptions::NO_IMD,
                crc: CrcKind::Mtech8,
                crc_init: 0x00,
                patterns: MTECH_PATTERNS,
                first_idam_offset: 0,
                first_data_offset: 0,
                nominal_spacing: 384,
                nominal_cell_ns: 4_000,
            },
            // --- Hard-sector 5.25in NSI. ---
            FormatDescriptor {
                name: "FM5H-NSI",
                description: "NSI hard-sectored 5.25in, 16x256",
                sector_size: 256,
                first_sector_id: 0,
                sectors_per_track: 16,
                encoding: Encoding::Nsi,
                options: FormatOptions::NSI_FLAVOUR,
                crc: CrcKind::Nsi,
                crc_init: 0x00,
                patterns: NSI_PATTERNS,
                first_idam_offset: 0,
                first_data_offset: 0,
                nominal_spacing: 384,
                nominal_cell_ns: 4_000,
            },
        ]
    })
}

pub fn find_format(name: &str) -> Option<&'static FormatDescriptor> {
    format_table().iter().find(|f| f.name == name)
}

/// Formats sharing the same `encoding`, in table order (probe entry first).
pub fn formats_for_encoding(encoding: Encoding) -> impl Iterator<Item = &'static FormatDescriptor> {
    format_table().iter().filter(move |f| f.encoding == encoding)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_has_one_probe_per_group() {
        for enc in [
            Encoding::Fm,
            Encoding::Mfm,
            Encoding::M2fmIntel,
            Encoding::M2fmHp,
            Encoding::Ti,
        ] {
            let group: Vec<_> = formats_for_encoding(enc).collect();
            assert!(!group.is_empty(), "no formats for {:?}", enc);
            assert!(group[0].options.contains(FormatOptions::AUTO_SIZE), "first entry of {:?} must be the probe", enc);
        }
    }

    #[test]
    fn no_imd_flag_set_for_zds_mtech_ti() {
        assert!(find_format("FM8H-ZDS").unwrap().no_imd());
        assert!(find_format("FM5H-MTECH").unwrap().no_imd());
        assert!(find_format("TI").unwrap().no_imd());
        assert!(!find_format("MFM8-DD").unwrap().no_imd());
    }

    #[test]
    fn find_format_by_name() {
        let f = find_format("M2FM8-INTEL").expect("format exists");
        assert_eq!(f.sectors_per_track, 52);
        assert_eq!(f.sector_size, 128);
    }
}
