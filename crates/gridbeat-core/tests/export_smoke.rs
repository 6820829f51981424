use gridbeat_core::{
    BarCount, Engine, EngineError, OutputFormat, PcmBuffer, SampleStore, Session,
    fixtures::{demo_sample_store, demo_session},
    model::default_instruments,
};

fn single_hit_engine() -> Engine {
    let mut samples = SampleStore::new(5);
    samples.insert(0, PcmBuffer::mono(44_100, vec![0.5; 4_410]));
    let mut session = Session::new(default_instruments(), 120.0, BarCount::One);
    session.pattern.set(0, 0, true);
    Engine::new(
        session,
        samples,
        OutputFormat {
            sample_rate: 44_100,
            channels: 2,
        },
    )
}

#[test]
fn exported_loop_reads_back_with_a_standard_wav_reader() {
    let engine = single_hit_engine();
    let temp_dir = tempfile::tempdir().expect("tempdir should work");

    let path = engine
        .export_loop(temp_dir.path())
        .expect("export should succeed");
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .expect("utf-8 file name");
    assert!(file_name.starts_with("drum-loop-"));
    assert!(file_name.ends_with(".wav"));
    let millis = &file_name["drum-loop-".len()..file_name.len() - ".wav".len()];
    assert!(millis.parse::<i64>().is_ok(), "timestamp should be epoch millis");

    let mut reader = hound::WavReader::open(&path).expect("hound should parse export");
    let spec = reader.spec();
    assert_eq!(spec.channels, 2);
    assert_eq!(spec.sample_rate, 44_100);
    assert_eq!(spec.bits_per_sample, 16);
    assert_eq!(spec.sample_format, hound::SampleFormat::Int);

    let samples: Vec<i16> = reader
        .samples::<i16>()
        .collect::<Result<_, _>>()
        .expect("samples should decode");
    assert_eq!(samples.len(), 88_200 * 2);
    assert!(samples[..4_410 * 2].iter().all(|sample| *sample == 16_383));
    assert!(samples[4_410 * 2..].iter().all(|sample| *sample == 0));
    assert!(!engine.is_exporting());
}

#[test]
fn export_renders_at_unity_master_gain() {
    let mut engine = single_hit_engine();
    engine.set_master_volume(0.1);
    let temp_dir = tempfile::tempdir().expect("tempdir should work");

    let path = engine
        .export_loop(temp_dir.path())
        .expect("export should succeed");
    let mut reader = hound::WavReader::open(&path).expect("hound should parse export");
    let first = reader
        .samples::<i16>()
        .next()
        .expect("at least one sample")
        .expect("sample should decode");
    assert_eq!(first, 16_383);
}

#[test]
fn concurrent_export_is_rejected_without_queueing() {
    let engine = Engine::new(demo_session(), demo_sample_store(48_000), OutputFormat::default());
    let temp_dir = tempfile::tempdir().expect("tempdir should work");

    let job = engine
        .begin_export(temp_dir.path())
        .expect("first export should start");
    assert!(matches!(
        engine.export_loop(temp_dir.path()),
        Err(EngineError::ExportInProgress)
    ));

    let path = job
        .spawn()
        .join()
        .expect("export thread should not panic")
        .expect("export should succeed");
    assert!(path.is_file());
    assert!(!engine.is_exporting());

    let written = std::fs::read_dir(temp_dir.path())
        .expect("export dir should exist")
        .count();
    assert_eq!(written, 1);
}

#[test]
fn failed_export_clears_busy_flag_and_leaves_no_file() {
    let engine = single_hit_engine();
    let temp_dir = tempfile::tempdir().expect("tempdir should work");
    let blocker = temp_dir.path().join("exports");
    std::fs::write(&blocker, b"not a directory").expect("write should work");

    let result = engine.export_loop(&blocker);
    assert!(matches!(result, Err(EngineError::Io(_))));
    assert!(!engine.is_exporting());

    let entries = std::fs::read_dir(temp_dir.path())
        .expect("temp dir should exist")
        .count();
    assert_eq!(entries, 1);

    let retry_dir = temp_dir.path().join("retry");
    assert!(engine.export_loop(&retry_dir).is_ok());
}

#[test]
fn export_snapshot_ignores_later_edits() {
    let mut engine = single_hit_engine();
    let temp_dir = tempfile::tempdir().expect("tempdir should work");

    let job = engine
        .begin_export(temp_dir.path())
        .expect("export should start");
    engine.toggle_mute(0).expect("valid index");

    let path = job.run().expect("export should succeed");
    let mut reader = hound::WavReader::open(&path).expect("hound should parse export");
    let first = reader
        .samples::<i16>()
        .next()
        .expect("at least one sample")
        .expect("sample should decode");
    assert_eq!(first, 16_383);
}
