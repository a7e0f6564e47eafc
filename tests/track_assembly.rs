use flux2imd::chs::DiskCh;
use flux2imd::disk::{TrackStatus, UNKNOWN_SECTOR_ID};
use flux2imd::flux::kryoflux::ingest;
use flux2imd::flux::FluxStream;
use flux2imd::format::find_format;
use flux2imd::{decode_track, Flux2ImdError};

/// A stream with no flux transitions at all: just the EOF OOB block, so
/// ingestion still produces a valid (empty) `FluxStream`.
fn empty_stream() -> FluxStream {
    let raw = [0x0Du8, 0x0D, 0x00, 0x00];
    ingest(&raw).expect("an eof-only stream should still ingest")
}

#[test]
fn a_stream_with_no_flux_transitions_yields_a_bad_id_track_not_a_panic() {
    let stream = empty_stream();
    let format = find_format("MFM8-DD").unwrap();
    let (track, resolved) = decode_track(&stream, DiskCh::new(0, 0), Some(format), None).unwrap();
    assert_eq!(resolved.name, "MFM8-DD");
    assert!(track.status.contains(TrackStatus::BAD_ID));
    assert!(track.slots.iter().all(|s| s.id == UNKNOWN_SECTOR_ID));
}

#[test]
fn hard_sector_count_pins_its_probe_format_regardless_of_stream_content() {
    let stream = empty_stream();
    let (track, resolved) = decode_track(&stream, DiskCh::new(0, 0), None, Some(16)).unwrap();
    assert_eq!(resolved.name, "FM5H-MTECH");
    assert!(track.status.contains(TrackStatus::BAD_ID));

    let (track32, resolved32) = decode_track(&stream, DiskCh::new(0, 0), None, Some(32)).unwrap();
    assert_eq!(resolved32.name, "FM8H-LSI");
    assert!(track32.status.contains(TrackStatus::BAD_ID));
}

#[test]
fn an_unpinned_unrecognisable_stream_reports_unrecognized_format() {
    let stream = empty_stream();
    let result = decode_track(&stream, DiskCh::new(0, 0), None, None);
    assert!(matches!(result, Err(Flux2ImdError::UnrecognizedFormat)));
}

#[test]
fn pinning_a_format_skips_detection_even_for_an_unreadable_stream() {
    // With a format pinned up front, decode_track never needs to call into
    // the detector at all, so an otherwise-undetectable stream still
    // resolves to the pinned format.
    let stream = empty_stream();
    let format = find_format("FM8-SD").unwrap();
    let (_, resolved) = decode_track(&stream, DiskCh::new(2, 1), Some(format), None).unwrap();
    assert_eq!(resolved.name, "FM8-SD");
}
