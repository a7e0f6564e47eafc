use flux2imd::chs::DiskCh;
use flux2imd::decode::SuspectByte;
use flux2imd::disk::{Disk, Sector, SectorCopy};
use flux2imd::format::find_format;
use flux2imd::image_writer::{write_img, write_imd, IMG_FILL_BYTE};

fn good_sector(id: u8, size_code: u8, fill: u8) -> Sector {
    let mut sector = Sector::new(id, 0, 0, size_code);
    let len = 128usize << size_code;
    sector.add_copy(SectorCopy {
        id_field: vec![],
        data: (0..len).map(|_| SuspectByte::new(fill, false)).collect(),
        idam_good: true,
        data_good: true,
    });
    sector.reconcile();
    sector
}

#[test]
fn writes_a_full_track_of_imd_and_img_for_a_clean_disk() {
    let format = find_format("MFM8-DD").unwrap();
    let mut disk = Disk::new(format);
    let track = disk.track_mut(DiskCh::new(0, 0));
    for id in 1..=5u8 {
        track.slots.push(good_sector(id, 0, id));
    }

    let mut imd = Vec::new();
    write_imd(&mut imd, &disk).unwrap();
    assert!(imd.starts_with(b"IMD 1.18: flux2imd"));
    // Banner + EOF byte + one 5-byte track header + sector map + per-sector
    // RLE records (2 bytes each, since every sector is uniform).
    assert!(imd.len() > 20);

    let mut img = Vec::new();
    write_img(&mut img, &disk).unwrap();
    assert_eq!(img.len(), 5 * 128);
    for (i, chunk) in img.chunks(128).enumerate() {
        assert!(chunk.iter().all(|&b| b == (i as u8 + 1)));
    }
}

#[test]
fn img_output_pads_unrecovered_sectors_with_fill_byte_and_keeps_order() {
    let format = find_format("MFM8-DD").unwrap();
    let mut disk = Disk::new(format);
    let track = disk.track_mut(DiskCh::new(0, 0));
    track.slots.push(good_sector(1, 0, 0xAA));
    track.slots.push(Sector::new(2, 0, 0, 0)); // never recovered

    let mut img = Vec::new();
    write_img(&mut img, &disk).unwrap();
    assert_eq!(img.len(), 256);
    assert!(img[..128].iter().all(|&b| b == 0xAA));
    assert!(img[128..].iter().all(|&b| b == IMG_FILL_BYTE));
}

#[test]
fn imd_skips_tracks_flagged_bad_id() {
    use flux2imd::disk::TrackStatus;
    let format = find_format("MFM8-DD").unwrap();
    let mut disk = Disk::new(format);
    let track = disk.track_mut(DiskCh::new(0, 0));
    track.slots.push(good_sector(1, 0, 1));
    track.status |= TrackStatus::BAD_ID;

    let mut imd = Vec::new();
    write_imd(&mut imd, &disk).unwrap();
    // Only the header banner and EOF byte remain; the lone track was skipped.
    assert_eq!(imd.len(), "IMD 1.18: flux2imd\r\n".len() + 1);
}
