use fanout_pipeline::{
    CipherKey, CollectSink, Collaborators, Identity, IterSource, LetterTally, MapTransform,
    PipelineBuilder, PipelineError, ReaderSource, Result as PipelineResult, ShiftCipher, Sink,
    StageKind, Tally, Transform, WriterSink,
};
use crossbeam::channel::{bounded, Receiver};
use proptest::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Tally that only counts calls
#[derive(Default)]
struct CallCounter {
    inputs: AtomicUsize,
    outputs: AtomicUsize,
}

impl<T> Tally<T> for CallCounter {
    fn record_input(&self, _unit: &T) {
        self.inputs.fetch_add(1, Ordering::SeqCst);
    }

    fn record_output(&self, _unit: &T) {
        self.outputs.fetch_add(1, Ordering::SeqCst);
    }

    fn snapshot_counts(&self) -> PipelineResult<()> {
        Ok(())
    }
}

fn quiet_tally() -> Arc<LetterTally> {
    Arc::new(LetterTally::new(std::io::sink()))
}

fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_five_units_minimum_capacity() {
    let pipeline = PipelineBuilder::new()
        .input_capacity(2)
        .output_capacity(2)
        .build::<char>()
        .expect("Pipeline build failed");

    let sink = CollectSink::new();
    let tally = Arc::new(CallCounter::default());
    let running = pipeline
        .start(Collaborators::new(
            IterSource::new(vec!['a', 'b', 'c', 'd', 'e']),
            Identity,
            Arc::clone(&tally),
            sink.clone(),
        ))
        .expect("Pipeline start failed");

    running.wait().expect("Wait failed");

    assert_eq!(sink.items(), vec!['a', 'b', 'c', 'd', 'e']);
    assert_eq!(tally.inputs.load(Ordering::SeqCst), 5);
    assert_eq!(tally.outputs.load(Ordering::SeqCst), 5);
}

#[test]
fn test_transform_applied_in_order() {
    let pipeline = PipelineBuilder::new()
        .input_capacity(3)
        .output_capacity(2)
        .build::<u32>()
        .expect("Pipeline build failed");

    let sink = CollectSink::new();
    let running = pipeline
        .start(Collaborators::new(
            IterSource::new(0..2_000u32),
            MapTransform::new("square", |n: u32| n * n),
            Arc::new(CallCounter::default()),
            sink.clone(),
        ))
        .expect("Pipeline start failed");

    let report = running.wait().expect("Wait failed");

    let expected: Vec<u32> = (0..2_000u32).map(|n| n * n).collect();
    assert_eq!(sink.items(), expected);
    for stage in StageKind::ALL {
        assert_eq!(report.units(stage), 2_000, "{stage}");
    }
}

#[test]
fn test_empty_input_terminates() {
    let pipeline = PipelineBuilder::new().build::<u8>().expect("Pipeline build failed");
    let liveness = pipeline.liveness();
    let sink = CollectSink::new();

    let running = pipeline
        .start(Collaborators::new(
            IterSource::new(Vec::<u8>::new()),
            Identity,
            quiet_tally(),
            sink.clone(),
        ))
        .expect("Pipeline start failed");
    running.wait().expect("Wait failed");

    assert!(sink.is_empty());
    assert!(liveness.producer_finished());
    assert!(liveness.transform_finished());
}

#[test]
fn test_capacity_combinations_complete() {
    let input: Vec<u8> = (0..=255u8).cycle().take(600).collect();
    for (a, b) in [(2, 2), (2, 9), (9, 2), (3, 5), (64, 64)] {
        let pipeline = PipelineBuilder::new()
            .input_capacity(a)
            .output_capacity(b)
            .build::<u8>()
            .expect("Pipeline build failed");
        let sink = CollectSink::new();
        let running = pipeline
            .start(Collaborators::new(
                IterSource::new(input.clone()),
                Identity,
                quiet_tally(),
                sink.clone(),
            ))
            .expect("Pipeline start failed");
        running.wait().expect("Wait failed");
        assert_eq!(sink.items(), input, "capacities {a}/{b}");
    }
}

/// Blocks the first `record_input` call until released
struct GatedTally {
    gate: Receiver<()>,
    held: AtomicBool,
    inputs: AtomicUsize,
}

impl Tally<u32> for GatedTally {
    fn record_input(&self, _unit: &u32) {
        if !self.held.swap(true, Ordering::SeqCst) {
            let _ = self.gate.recv();
        }
        self.inputs.fetch_add(1, Ordering::SeqCst);
    }

    fn record_output(&self, _unit: &u32) {}

    fn snapshot_counts(&self) -> PipelineResult<()> {
        Ok(())
    }
}

#[test]
fn test_stalled_tally_bounds_sibling_progress() {
    let input_capacity = 3;
    let (release, gate) = bounded::<()>(1);
    let tally = Arc::new(GatedTally {
        gate,
        held: AtomicBool::new(false),
        inputs: AtomicUsize::new(0),
    });

    let pipeline = PipelineBuilder::new()
        .input_capacity(input_capacity)
        .output_capacity(2)
        .build::<u32>()
        .expect("Pipeline build failed");
    let sink = CollectSink::new();
    let running = pipeline
        .start(Collaborators::new(
            IterSource::new(0..50u32),
            Identity,
            Arc::clone(&tally),
            sink.clone(),
        ))
        .expect("Pipeline start failed");

    // TallyIn holds unit 0; the count role can still buffer `capacity` more,
    // and Transform/Emit carry all of them through.
    let reachable = input_capacity + 1;
    wait_for("emit to catch up", || sink.len() == reachable);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(sink.len(), reachable);
    assert_eq!(running.stage_metrics(StageKind::Acquire).unwrap().total_units(), reachable as u64);

    release.send(()).unwrap();
    running.wait().expect("Wait failed");

    assert_eq!(sink.items(), (0..50u32).collect::<Vec<_>>());
    assert_eq!(tally.inputs.load(Ordering::SeqCst), 50);
}

struct FailingSink {
    accepted: usize,
    limit: usize,
}

impl Sink<u8> for FailingSink {
    fn emit(&mut self, _unit: u8) -> PipelineResult<()> {
        if self.accepted == self.limit {
            return Err(PipelineError::StageError {
                stage: "emit".into(),
                message: "disk full".into(),
            });
        }
        self.accepted += 1;
        Ok(())
    }
}

#[test]
fn test_sink_failure_aborts_pipeline() {
    let pipeline = PipelineBuilder::new()
        .input_capacity(2)
        .output_capacity(2)
        .build::<u8>()
        .expect("Pipeline build failed");

    let running = pipeline
        .start(Collaborators::new(
            IterSource::new(vec![b'x'; 10_000]),
            Identity,
            quiet_tally(),
            FailingSink {
                accepted: 0,
                limit: 3,
            },
        ))
        .expect("Pipeline start failed");

    match running.wait() {
        Err(PipelineError::StageError { message, .. }) => assert_eq!(message, "disk full"),
        other => panic!("expected the sink's error, got {other:?}"),
    }
}

/// Yields a few bytes, then fails like a dropped connection
struct BrokenReader {
    left: usize,
}

impl std::io::Read for BrokenReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.left == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "peer went away",
            ));
        }
        let n = self.left.min(buf.len());
        buf[..n].fill(b'r');
        self.left -= n;
        Ok(n)
    }
}

#[test]
fn test_source_io_failure_names_acquire_stage() {
    let pipeline = PipelineBuilder::new()
        .input_capacity(2)
        .output_capacity(2)
        .build::<u8>()
        .expect("Pipeline build failed");

    let running = pipeline
        .start(Collaborators::new(
            ReaderSource::new(BrokenReader { left: 16 }),
            Identity,
            quiet_tally(),
            CollectSink::new(),
        ))
        .expect("Pipeline start failed");

    match running.wait() {
        Err(PipelineError::StageError { stage, message }) => {
            assert_eq!(stage, "acquire");
            assert!(message.contains("peer went away"), "{message}");
        }
        other => panic!("expected an acquire failure, got {other:?}"),
    }
}

struct PanickingTransform;

impl Transform<u8> for PanickingTransform {
    fn apply(&mut self, unit: u8) -> u8 {
        if unit == b'!' {
            panic!("cannot transform '!'");
        }
        unit
    }
}

#[test]
fn test_panicking_stage_reported_as_thread_error() {
    let pipeline = PipelineBuilder::new()
        .input_capacity(2)
        .output_capacity(2)
        .build::<u8>()
        .expect("Pipeline build failed");

    let mut input = vec![b'a'; 100];
    input.push(b'!');
    input.extend(vec![b'b'; 1_000]);

    let running = pipeline
        .start(Collaborators::new(
            IterSource::new(input),
            PanickingTransform,
            quiet_tally(),
            CollectSink::new(),
        ))
        .expect("Pipeline start failed");

    assert!(matches!(running.wait(), Err(PipelineError::ThreadError(_))));
}

#[test]
fn test_abort_from_control_stops_all_stages() {
    let (feed, units) = bounded::<u8>(0);
    let pipeline = PipelineBuilder::new().build::<u8>().expect("Pipeline build failed");
    let running = pipeline
        .start(Collaborators::new(
            IterSource::new(units.into_iter()),
            Identity,
            quiet_tally(),
            CollectSink::new(),
        ))
        .expect("Pipeline start failed");

    feed.send(b'a').unwrap();
    running.control().abort();
    // Unblocks Acquire if it is waiting on the channel.
    drop(feed);

    assert!(matches!(running.wait(), Err(PipelineError::Aborted)));
}

#[test]
fn test_cipher_file_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let input_path = dir.path().join("input.txt");
    let output_path = dir.path().join("output.txt");
    let log_path = dir.path().join("counts.log");
    std::fs::write(&input_path, b"Hello, World!\n").unwrap();

    let key = Arc::new(CipherKey::new(3));
    let tally = Arc::new(LetterTally::new(std::fs::File::create(&log_path).unwrap()));
    let pipeline = PipelineBuilder::new()
        .input_capacity(2)
        .output_capacity(3)
        .build::<u8>()
        .expect("Pipeline build failed");

    let running = pipeline
        .start(Collaborators::new(
            ReaderSource::open(&input_path).unwrap(),
            ShiftCipher::new(Arc::clone(&key)),
            Arc::clone(&tally),
            WriterSink::create(&output_path).unwrap(),
        ))
        .expect("Pipeline start failed");
    running.wait().expect("Wait failed");
    tally.snapshot_counts().unwrap();

    assert_eq!(std::fs::read(&output_path).unwrap(), b"Khoor, Zruog!\n");

    let counts = tally.counts();
    assert_eq!(counts.input.total, 14);
    assert_eq!(counts.output.total, 14);
    assert_eq!(counts.input.letter('l'), 3);
    assert_eq!(counts.output.letter('o'), 3);

    let log = std::fs::read_to_string(&log_path).unwrap();
    assert!(log.starts_with("Total input count with current key is 14\n"));
    assert!(log.contains("Total output count with current key is 14\n"));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_emit_sees_transformed_input_in_order(
        input in proptest::collection::vec(any::<u8>(), 0..400),
        input_capacity in 2usize..6,
        output_capacity in 2usize..6,
        shift in 1i32..26,
    ) {
        let pipeline = PipelineBuilder::new()
            .input_capacity(input_capacity)
            .output_capacity(output_capacity)
            .build::<u8>()
            .expect("Pipeline build failed");

        let key = Arc::new(CipherKey::new(shift));
        let tally = quiet_tally();
        let sink = CollectSink::new();
        let running = pipeline
            .start(Collaborators::new(
                IterSource::new(input.clone()),
                ShiftCipher::new(Arc::clone(&key)),
                Arc::clone(&tally),
                sink.clone(),
            ))
            .expect("Pipeline start failed");
        running.wait().expect("Wait failed");

        let expected: Vec<u8> = input
            .iter()
            .map(|&b| ShiftCipher::shift_byte(b, key.get()))
            .collect();
        prop_assert_eq!(sink.items(), expected);

        let counts = tally.counts();
        prop_assert_eq!(counts.input.total, input.len() as u64);
        prop_assert_eq!(counts.output.total, input.len() as u64);
    }
}
