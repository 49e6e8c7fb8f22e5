//! End-to-end stream pipeline behavior: sticky overlay boxes, multipart
//! framing, alert debounce, and fail-fast sources.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use sitewatch::detect::{ModelBox, RestrictedZoneDetector, StubModel};
use sitewatch::notify::{RecordingAlarmSink, RecordingSmsSender};
use sitewatch::storage::InMemoryAlertStore;
use sitewatch::{
    AlertDispatcher, AlertStore, BBox, DetectorSet, EffectRunner, Frame, HazardKind,
    StreamPipeline, StubSource,
};

const WIDTH: u32 = 320;
const HEIGHT: u32 = 160;

fn dispatcher_with_store() -> (Arc<AlertDispatcher>, Arc<Mutex<dyn AlertStore>>) {
    let store: Arc<Mutex<dyn AlertStore>> = Arc::new(Mutex::new(InMemoryAlertStore::new()));
    let dispatcher = Arc::new(AlertDispatcher::new(
        Arc::clone(&store),
        Arc::new(EffectRunner::spawn()),
        Arc::new(RecordingSmsSender::new()),
        Arc::new(RecordingAlarmSink::new()),
        Duration::from_secs(60),
        3,
    ));
    (dispatcher, store)
}

fn person_at(x1: i32, y1: i32) -> ModelBox {
    ModelBox {
        bbox: BBox::clamped(x1, y1, x1 + 40, y1 + 80, WIDTH, HEIGHT),
        class_id: 0,
        confidence: 0.9,
    }
}

/// Split a multipart body into its JPEG payloads, checking the framing
/// byte for byte.
fn split_segments(body: &[u8]) -> Vec<Vec<u8>> {
    let header = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
    let mut segments = Vec::new();
    let mut rest = body;
    while !rest.is_empty() {
        assert!(
            rest.starts_with(header),
            "segment does not start with the multipart header"
        );
        rest = &rest[header.len()..];
        // JPEG payload runs to the EOI marker; the trailing CRLF follows.
        let eoi = rest
            .windows(2)
            .position(|w| w == [0xFF, 0xD9])
            .expect("segment missing jpeg eoi");
        let (payload, tail) = rest.split_at(eoi + 2);
        segments.push(payload.to_vec());
        assert!(tail.starts_with(b"\r\n"), "segment missing trailing crlf");
        rest = &tail[2..];
    }
    segments
}

fn zone_pipeline(
    script: Vec<Vec<ModelBox>>,
    frames: Vec<Frame>,
    dispatcher: Arc<AlertDispatcher>,
) -> StreamPipeline {
    let mut model = StubModel::new();
    for response in script {
        model.push_response(response);
    }
    let mut detectors = DetectorSet::new();
    detectors.restricted_zone = Some(RestrictedZoneDetector::new(Box::new(model), true, None));

    StreamPipeline::new(
        Box::new(StubSource::new(frames)),
        detectors,
        dispatcher,
        1,
        WIDTH,
        HEIGHT,
        None,
    )
}

#[test]
fn boxes_stick_after_the_detector_stops_firing() {
    let (dispatcher, store) = dispatcher_with_store();
    let frames = vec![
        Frame::solid(WIDTH, HEIGHT, [90, 90, 90]),
        Frame::solid(WIDTH, HEIGHT, [90, 90, 90]),
        Frame::solid(WIDTH, HEIGHT, [90, 90, 90]),
    ];
    // The person is only seen on the first frame.
    let script = vec![vec![person_at(100, 40)], vec![], vec![]];
    let mut pipeline = zone_pipeline(script, frames, dispatcher);

    let mut sink = Vec::new();
    pipeline.run(&mut sink).expect("pipeline run");

    let segments = split_segments(&sink);
    assert_eq!(segments.len(), 3);
    // Identical input plus a sticky overlay means identical output.
    assert_eq!(segments[0], segments[1]);
    assert_eq!(segments[1], segments[2]);

    // The rendered box survives in the last frame.
    let last = Frame::from_jpeg(&segments[2]).expect("decode streamed jpeg");
    let [r, _, b] = last.pixel(100, 80);
    assert!(b > 150 && r < 120, "expected the zone box at x=100, got rgb with r={} b={}", r, b);

    let recent = store.lock().unwrap().recent(1, 10).expect("recent alerts");
    assert_eq!(recent.len(), 1, "three firing-window frames, one alert");
    assert_eq!(recent[0].alert_type, "restricted_zone");
    assert!(!recent[0].snapshot.is_empty());
}

#[test]
fn alerts_respect_the_debounce_window() {
    let (dispatcher, store) = dispatcher_with_store();
    let frame = Frame::solid(WIDTH, HEIGHT, [0, 0, 0]);

    assert!(dispatcher
        .report_at(HazardKind::RestrictedZone, 1, &frame, 1_000)
        .unwrap());
    assert!(!dispatcher
        .report_at(HazardKind::RestrictedZone, 1, &frame, 1_010)
        .unwrap());
    assert!(dispatcher
        .report_at(HazardKind::RestrictedZone, 1, &frame, 1_061)
        .unwrap());

    let recent = store.lock().unwrap().recent(1, 10).expect("recent alerts");
    assert_eq!(recent.len(), 2);
}

#[test]
fn input_frames_are_resized_to_the_working_resolution() {
    let (dispatcher, _store) = dispatcher_with_store();
    // Source frames come in at a different resolution.
    let frames = vec![Frame::solid(640, 480, [50, 50, 50])];
    let mut pipeline = zone_pipeline(vec![vec![]], frames, dispatcher);

    let mut sink = Vec::new();
    pipeline.run(&mut sink).expect("pipeline run");

    let segments = split_segments(&sink);
    let frame = Frame::from_jpeg(&segments[0]).expect("decode streamed jpeg");
    assert_eq!((frame.width(), frame.height()), (WIDTH, HEIGHT));
}

#[test]
fn mid_stream_read_failure_ends_the_stream_cleanly() {
    let (dispatcher, _store) = dispatcher_with_store();
    let frames = vec![
        Frame::solid(WIDTH, HEIGHT, [90, 90, 90]),
        Frame::solid(WIDTH, HEIGHT, [90, 90, 90]),
    ];
    let mut detectors = DetectorSet::new();
    detectors.restricted_zone = Some(RestrictedZoneDetector::new(
        Box::new(StubModel::new()),
        true,
        None,
    ));
    let mut pipeline = StreamPipeline::new(
        Box::new(StubSource::dropping_after(frames)),
        detectors,
        dispatcher,
        1,
        WIDTH,
        HEIGHT,
        None,
    );

    let mut sink = Vec::new();
    // A transport failure after connect is an end of stream, not an error.
    pipeline
        .run(&mut sink)
        .expect("read failure after connect must not surface");
    assert_eq!(split_segments(&sink).len(), 2, "frames before the drop still stream");
}

#[test]
fn unreachable_source_fails_before_streaming() {
    let (dispatcher, _store) = dispatcher_with_store();
    let mut detectors = DetectorSet::new();
    detectors.restricted_zone = Some(RestrictedZoneDetector::new(
        Box::new(StubModel::new()),
        true,
        None,
    ));
    let mut pipeline = StreamPipeline::new(
        Box::new(StubSource::unreachable()),
        detectors,
        dispatcher,
        1,
        WIDTH,
        HEIGHT,
        None,
    );

    let mut sink = Vec::new();
    assert!(pipeline.run(&mut sink).is_err());
    assert!(sink.is_empty(), "nothing may be written before connect succeeds");
}
