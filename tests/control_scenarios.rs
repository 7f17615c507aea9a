use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;

use rover_kernel::camera::{CameraConfig, V4l2Camera};
use rover_kernel::recording::{read_log, JpegFrameWriter};
use rover_kernel::{
    CommandTable, Components, ControlEvent, ControlLoop, DebouncePolicy, EdgeDetector,
    FrameSource, LoopConfig, MemoryTransport, MotionController, MotionLimits, MotionState,
    RecordingSession, ScriptedSampler, SessionState, TickOutcome, TransportSink,
};

type TestLoop = ControlLoop<TransportSink<MemoryTransport>>;

fn rover(root: &Path, keys: &[&str], policy: DebouncePolicy) -> TestLoop {
    let mut camera = V4l2Camera::new(CameraConfig {
        device: "stub://scenario".to_string(),
        width: 32,
        height: 16,
        ..CameraConfig::default()
    })
    .expect("stub camera");
    camera.connect().expect("connect stub camera");

    let components = Components {
        sampler: Box::new(ScriptedSampler::from_keys(keys).expect("script")),
        edges: EdgeDetector::new(&ControlEvent::ALL, policy),
        motion: MotionController::new(CommandTable::standard(0.1, 0.5), MotionLimits::default()),
        sink: TransportSink::new(MemoryTransport::new("scenario")),
        camera: Box::new(camera),
        session: RecordingSession::new(root, 0, Box::new(JpegFrameWriter::new())),
    };
    let config = LoopConfig {
        tick_interval: Duration::ZERO,
        ..LoopConfig::default()
    };
    ControlLoop::new(config, components)
}

/// Tick through the whole script, returning the motion state after each tick.
fn run_ticks(control: &mut TestLoop, ticks: usize) -> Result<Vec<MotionState>> {
    let mut states = Vec::with_capacity(ticks);
    for _ in 0..ticks {
        control.tick()?;
        states.push(control.motion().state());
    }
    Ok(states)
}

fn session_dirs(root: &Path) -> Result<Vec<String>> {
    let mut names: Vec<String> = fs::read_dir(root)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .collect();
    names.sort();
    Ok(names)
}

#[test]
fn up_up_record_record_flushes_one_frame() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    // Every script entry is a fresh tap; repeat policy acts on each one.
    let mut control = rover(tmp.path(), &["UP", "UP", "r", "r"], DebouncePolicy::Repeat);

    let mut speeds = Vec::new();
    let mut states = Vec::new();
    for _ in 0..4 {
        control.tick()?;
        speeds.push(control.motion().state().speed);
        states.push(control.session().state());
    }

    assert_eq!(speeds, vec![0.1, 0.2, 0.2, 0.2]);
    assert_eq!(
        states,
        vec![
            SessionState::Idle,
            SessionState::Idle,
            SessionState::Capturing,
            SessionState::Idle
        ]
    );
    let records = read_log(&tmp.path().join("img0/log_0.csv"))?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].frame_ref, "img0/image_0.jpg");
    assert_eq!((records[0].speed, records[0].angle), (0.2, 0.0));
    Ok(())
}

#[test]
fn rising_edge_needs_a_release_between_taps() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let keys = ["UP", "", "UP", "r", "", "r"];
    let mut control = rover(tmp.path(), &keys, DebouncePolicy::RisingEdge);

    let speeds: Vec<f32> = run_ticks(&mut control, keys.len())?
        .iter()
        .map(|s| s.speed)
        .collect();
    assert_eq!(speeds, vec![0.1, 0.1, 0.2, 0.2, 0.2, 0.2]);
    assert_eq!(read_log(&tmp.path().join("img0/log_0.csv"))?.len(), 2);
    Ok(())
}

#[test]
fn held_right_steers_once() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let keys = ["RIGHT"; 5];
    let mut control = rover(tmp.path(), &keys, DebouncePolicy::RisingEdge);
    let angles: Vec<f32> = run_ticks(&mut control, 5)?.iter().map(|s| s.angle).collect();
    assert_eq!(angles, vec![0.1; 5]);

    let tmp = tempfile::tempdir()?;
    let mut control = rover(tmp.path(), &keys, DebouncePolicy::Repeat);
    let last = run_ticks(&mut control, 5)?.last().copied().unwrap();
    assert!((last.angle - 0.5).abs() < 1e-5);
    Ok(())
}

#[test]
fn increments_saturate_at_the_limits() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut keys = vec!["UP"; 15];
    keys.extend(vec!["LEFT"; 15]);
    let mut control = rover(tmp.path(), &keys, DebouncePolicy::Repeat);

    for state in run_ticks(&mut control, keys.len())? {
        assert!(state.speed.abs() <= 1.0 && state.angle.abs() <= 1.0);
    }
    assert_eq!(control.motion().state(), MotionState::new(1.0, -1.0));
    Ok(())
}

#[test]
fn stop_zeroes_both_axes() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let keys = ["g", "RIGHT", "", "RIGHT", "s"];
    let mut control = rover(tmp.path(), &keys, DebouncePolicy::RisingEdge);
    let states = run_ticks(&mut control, keys.len())?;
    assert_eq!(states[3], MotionState::new(0.5, 0.2));
    assert_eq!(states[4], MotionState::STOPPED);
    Ok(())
}

#[test]
fn transport_receives_a_record_every_tick() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let keys = ["UP", "", "", "LEFT"];
    let mut control = rover(tmp.path(), &keys, DebouncePolicy::RisingEdge);
    run_ticks(&mut control, keys.len())?;
    assert_eq!(
        control.sink().transport().lines(),
        vec!["0.1,0", "0.1,0", "0.1,0", "0.1,-0.1"]
    );
    Ok(())
}

#[test]
fn quit_while_capturing_still_flushes() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut control = rover(tmp.path(), &["r", "UP", "", "k"], DebouncePolicy::RisingEdge);

    let stats = control.run()?;
    assert_eq!(stats.ticks, 4);
    assert_eq!(stats.sessions_completed, 1);
    assert_eq!(control.session().state(), SessionState::Idle);

    let session = tmp.path().join("img0");
    let raw = fs::read_to_string(session.join("log_0.csv"))?;
    assert!(raw.ends_with('\n'));
    let records = read_log(&session.join("log_0.csv"))?;
    assert_eq!(records.len(), 4);
    for (index, record) in records.iter().enumerate() {
        assert_eq!(record.frame_ref, format!("img0/image_{index}.jpg"));
        assert!(tmp.path().join(&record.frame_ref).is_file());
    }
    assert!(!session.join("log_0.csv.tmp").exists());
    assert_eq!(
        control.sink().transport().lines().last().map(String::as_str),
        Some("stop")
    );
    Ok(())
}

#[test]
fn sessions_get_distinct_directories() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let keys = ["r", "", "r", "", "r", "", "r", "", "r", "", "r", "k"];
    let mut control = rover(tmp.path(), &keys, DebouncePolicy::RisingEdge);
    let stats = control.run()?;

    assert_eq!(stats.sessions_completed, 3);
    assert_eq!(session_dirs(tmp.path())?, vec!["img0", "img1", "img2"]);
    for index in 0..3 {
        let log = tmp.path().join(format!("img{index}/log_{index}.csv"));
        assert_eq!(read_log(&log)?.len(), 2);
    }
    Ok(())
}

#[test]
fn numbering_continues_past_existing_sessions() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    for name in ["img0", "img1", "img3"] {
        fs::create_dir(tmp.path().join(name))?;
    }
    let keys = ["r", "", "r", "", "r", "", "r", "k"];
    let mut control = rover(tmp.path(), &keys, DebouncePolicy::RisingEdge);
    assert_eq!(control.run()?.sessions_completed, 2);

    assert_eq!(
        session_dirs(tmp.path())?,
        vec!["img0", "img1", "img2", "img3", "img4"]
    );
    assert_eq!(read_log(&tmp.path().join("img2/log_2.csv"))?.len(), 2);
    assert_eq!(read_log(&tmp.path().join("img4/log_4.csv"))?.len(), 2);
    assert!(!tmp.path().join("img3/log_3.csv").exists());
    Ok(())
}

#[test]
fn log_lines_match_the_command_at_capture() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let keys = ["r", "UP", "", "UP", "RIGHT", "r"];
    let mut control = rover(tmp.path(), &keys, DebouncePolicy::RisingEdge);
    let states = run_ticks(&mut control, keys.len())?;
    assert_eq!(control.stats().sessions_completed, 1);
    assert_eq!(control.stats().frames_recorded, 5);

    let records = read_log(&tmp.path().join("img0/log_0.csv"))?;
    assert_eq!(records.len(), 5);
    for (record, state) in records.iter().zip(&states) {
        assert_eq!((record.speed, record.angle), (state.speed, state.angle));
    }
    assert_eq!((records[4].speed, records[4].angle), (0.2, 0.1));
    Ok(())
}

#[test]
fn quit_returns_quit_outcome() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut control = rover(tmp.path(), &["", "k"], DebouncePolicy::RisingEdge);
    assert_eq!(control.tick()?, TickOutcome::Continue);
    assert_eq!(control.tick()?, TickOutcome::Quit);
    Ok(())
}
