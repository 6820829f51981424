use gridbeat_core::{
    BarCount, OutputFormat, Session,
    automation::ParameterChange,
    encode_wav,
    fixtures::{demo_sample_store, demo_session},
    generate_parity_report,
    parity::{read_parity_report, write_parity_report},
    render_live_virtual, render_loop,
};

#[test]
fn live_and_offline_renders_are_bit_identical() {
    let session = demo_session();
    let format = OutputFormat::default();
    let samples = demo_sample_store(format.sample_rate);

    let offline = render_loop(&session, &samples, format);
    for block_frames in [64, 333, 512, 4_096] {
        let (live, _) = render_live_virtual(&session, &samples, format, block_frames);
        assert_eq!(live.frame_count(), offline.frame_count());
        assert_eq!(
            encode_wav(&live).expect("encode live"),
            encode_wav(&offline).expect("encode offline"),
            "block size {block_frames}"
        );
    }
}

#[test]
fn parity_holds_for_odd_tempo_and_rate() {
    let mut session = demo_session();
    session.bpm = 97.0;
    session.bars = BarCount::Two;
    session.pattern.set(1, 27, true);
    session
        .automation
        .record(27, 1, ParameterChange::EndTime(0.4));
    let format = OutputFormat {
        sample_rate: 44_100,
        channels: 1,
    };
    let samples = demo_sample_store(22_050);

    let report =
        generate_parity_report(&session, &samples, format, 256).expect("report should build");
    assert!(report.matches, "{report:?}");
    assert_eq!(report.offline_hash, report.live_hash);
    assert_eq!(report.total_steps, 32);
}

#[test]
fn report_counts_every_triggered_voice() {
    let session = demo_session();
    let format = OutputFormat::default();
    let report = generate_parity_report(
        &session,
        &demo_sample_store(format.sample_rate),
        format,
        512,
    )
    .expect("report should build");

    assert_eq!(report.schema_version, 1);
    assert_eq!(report.live_voice_count, report.active_cells);
    assert_eq!(report.frame_count, 96_000);
    assert_eq!(report.automation_entries, session.automation.len());
    assert_eq!(report.offline_hash.len(), 64);
}

#[test]
fn report_is_stable_and_round_trips_through_json() {
    let session = Session::default();
    let format = OutputFormat::default();
    let samples = demo_sample_store(format.sample_rate);
    let first = generate_parity_report(&session, &samples, format, 512).expect("first report");
    let second = generate_parity_report(&session, &samples, format, 128).expect("second report");
    assert_eq!(first, second);

    let temp_dir = tempfile::tempdir().expect("tempdir should work");
    let path = temp_dir.path().join("parity").join("report.json");
    write_parity_report(&path, &first).expect("write should succeed");
    let loaded = read_parity_report(&path).expect("read should succeed");
    assert_eq!(loaded, first);
}
