use flux2imd::dpll::{AdaptProfiles, BitResult, Dpll};
use flux2imd::flux::kryoflux::ingest;

fn synth_raw(deltas: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    for &d in deltas {
        buf.push(d); // FLUX1 single-byte sample (0x0E..=0xFF).
    }
    buf.push(0x0D); // OOB introducer
    buf.push(0x0D); // kind = Eof
    buf.extend_from_slice(&0u16.to_le_bytes());
    buf
}

#[test]
fn locks_onto_a_uniform_flux_train() {
    let raw = synth_raw(&[0x40; 64]);
    let stream = ingest(&raw).expect("stream should ingest");
    let cell_ns = stream.samples[1] - stream.samples[0];

    let mut dpll = Dpll::new(cell_ns);
    let profiles = AdaptProfiles::standard();
    assert!(dpll.retrain(&stream, &profiles, 0, stream.measured_rpm.max(1.0), stream.measured_rpm.max(1.0)));

    let mut bits = 0;
    loop {
        match dpll.get_bit(&profiles) {
            BitResult::Bit(_) => bits += 1,
            BitResult::EoData => break,
        }
        assert!(dpll.t >= dpll.t_min);
        assert!(dpll.t <= dpll.t_max);
    }
    // One flux transition per sample; the stream has 63 consumable deltas.
    assert_eq!(bits, stream.samples.len() - 1);
}

#[test]
fn retrain_fails_past_the_last_profile() {
    let raw = synth_raw(&[0x40, 0x40, 0x40]);
    let stream = ingest(&raw).unwrap();
    let mut dpll = Dpll::new(2000);
    let profiles = AdaptProfiles::standard();
    assert!(!dpll.retrain(&stream, &profiles, profiles.stages.len(), 300.0, 300.0));
}

#[test]
fn get_bit_reports_eodata_once_the_stream_is_exhausted() {
    let raw = synth_raw(&[0x40, 0x40, 0x40]);
    let stream = ingest(&raw).unwrap();
    let mut dpll = Dpll::new(2000);
    let profiles = AdaptProfiles::standard();
    dpll.retrain(&stream, &profiles, 0, 300.0, 300.0);
    let mut saw_eodata = false;
    for _ in 0..32 {
        if matches!(dpll.get_bit(&profiles), BitResult::EoData) {
            saw_eodata = true;
            break;
        }
    }
    assert!(saw_eodata);
}
