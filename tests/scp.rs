use flux2imd::flux::scp::{ingest_track, SCP_TRACK_COUNT};

fn synth_scp(samples: &[u16]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(b"SCP");
    buf.push(0x00); // version
    buf.push(0x00); // disk_type
    buf.push(1); // revolutions
    buf.push(0); // start_track
    buf.push(0); // end_track
    buf.push(0); // flags (not extended)
    buf.push(0); // bit_cell_width
    buf.push(0); // heads
    buf.push(0); // resolution -> 25ns/tick
    buf.extend_from_slice(&0u32.to_le_bytes()); // checksum

    let table_start = 0x10usize;
    let table_len = SCP_TRACK_COUNT * 4;
    let track_header_pos = table_start + table_len;
    buf.resize(table_start, 0);
    buf.extend_from_slice(&(track_header_pos as u32).to_le_bytes());
    buf.resize(track_header_pos, 0);

    buf.extend_from_slice(b"TRK");
    buf.push(0); // track_number

    let rev_table_pos = buf.len();
    let data_offset = 12;
    buf.extend_from_slice(&3_000_000u32.to_le_bytes()); // index_time
    buf.extend_from_slice(&(samples.len() as u32).to_le_bytes());
    buf.extend_from_slice(&(data_offset as u32).to_le_bytes());
    debug_assert_eq!(buf.len() - rev_table_pos, 12);

    for s in samples {
        buf.extend_from_slice(&s.to_be_bytes());
    }
    buf
}

#[test]
fn ingests_a_single_track_end_to_end() {
    let raw = synth_scp(&[80, 120, 160, 200, 240]);
    let stream = ingest_track(&raw, 0).expect("track should ingest");
    assert_eq!(stream.samples.len(), 5);
    assert!(stream.validate().is_ok());
}

#[test]
fn out_of_range_track_index_is_an_error() {
    let raw = synth_scp(&[80, 120]);
    assert!(ingest_track(&raw, 5).is_err());
}

#[test]
fn samples_scale_with_declared_resolution() {
    // resolution 0 means 25ns/tick; a run of identical counts should still
    // produce strictly increasing, evenly spaced samples.
    let raw = synth_scp(&[100, 100, 100]);
    let stream = ingest_track(&raw, 0).unwrap();
    let d1 = stream.samples[1] - stream.samples[0];
    let d2 = stream.samples[2] - stream.samples[1];
    assert_eq!(d1, d2);
}
