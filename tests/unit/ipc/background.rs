use std::time::Instant;

use super::*;
use crate::foundation::error::ProtocolError;

const WAIT: Duration = Duration::from_secs(3);

fn fast_config() -> RenderConfig {
    RenderConfig {
        handshake_timeout_ms: 2_000,
        poll_interval_ms: 10,
        connect_attempts: 5,
        connect_retry_delay_ms: 5,
        ..RenderConfig::default()
    }
}

/// Play the supervisor side of the handshake by hand.
fn handshake(
    cfg: RenderConfig,
) -> (BackgroundProcessAgent, ProcessEndpoint, ProcessEndpoint, RenderAbort) {
    let mut out_listener = EndpointListener::bind_unique("unit_sup_out").unwrap();
    let address = out_listener.address().clone();
    let abort = RenderAbort::new();
    let agent_abort = abort.clone();
    let child = std::thread::spawn(move || BackgroundProcessAgent::start(&address, &cfg, agent_abort));

    let mut output = out_listener.accept_timeout(WAIT).unwrap().expect("agent connects");
    let LineEvent::Line(line) = output.poll_line(WAIT).unwrap() else {
        panic!("expected SERVER_CREATED");
    };
    let ControlMessage::ServerCreated(input_address) = line.parse::<ControlMessage>().unwrap() else {
        panic!("expected SERVER_CREATED, got {line}");
    };
    let input = ProcessEndpoint::connect(&EndpointAddress::from_wire(&input_address)).unwrap();
    let agent = child.join().unwrap();
    (agent, output, input, abort)
}

fn wait_for(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[test]
fn abort_message_requests_cancellation_and_ends_loop() {
    let (agent, _output, mut input, abort) = handshake(fast_config());
    assert!(agent.has_output_channel());
    assert!(agent.has_input_channel());
    assert!(agent.input_address().is_some());

    input.send(&ControlMessage::AbortRender).unwrap();
    assert!(wait_for(|| abort.is_requested()));
    assert!(wait_for(|| !agent.has_input_channel()));
    assert!(agent.shutdown().is_none());
}

#[test]
fn progress_reaches_the_supervisor_in_order() {
    let (agent, mut output, _input, _abort) = handshake(fast_config());
    assert!(agent.write_to_output_channel(&ControlMessage::RenderingStarted));
    assert!(agent.write_to_output_channel(&ControlMessage::FrameRendered(1)));
    assert!(agent.write_to_output_channel(&ControlMessage::Progress(50)));

    let mut lines = Vec::new();
    for _ in 0..3 {
        match output.poll_line(WAIT).unwrap() {
            LineEvent::Line(l) => lines.push(l),
            other => panic!("unexpected {other:?}"),
        }
    }
    assert_eq!(lines, vec!["RENDERING_STARTED", "FRAME_RENDERED:1", "PROGRESS:50"]);
    assert!(agent.shutdown().is_none());
}

#[test]
fn unknown_input_line_is_fatal_and_does_not_abort() {
    let (agent, _output, mut input, abort) = handshake(fast_config());
    input.send(&ControlMessage::Progress(3)).unwrap();
    assert!(wait_for(|| !agent.has_input_channel()));
    assert!(!abort.is_requested());

    let err = agent.shutdown().expect("loop error");
    assert!(matches!(
        err.as_protocol(),
        Some(ProtocolError::WrongChannel { .. })
    ));
}

#[test]
fn shutdown_stops_an_idle_loop() {
    let (agent, _output, _input, abort) = handshake(fast_config());
    let started = Instant::now();
    assert!(agent.shutdown().is_none());
    assert!(started.elapsed() < WAIT);
    assert!(!abort.is_requested());
}

#[test]
fn missing_supervisor_degrades_to_no_channels() {
    let cfg = RenderConfig {
        connect_attempts: 2,
        connect_retry_delay_ms: 1,
        ..fast_config()
    };
    let agent = BackgroundProcessAgent::start(
        &EndpointAddress::unique("unit_absent"),
        &cfg,
        RenderAbort::new(),
    );
    assert!(!agent.has_output_channel());
    assert!(!agent.has_input_channel());
    assert!(!agent.write_to_output_channel(&ControlMessage::FrameRendered(1)));
    assert!(agent.shutdown().is_none());
}

#[test]
fn supervisor_that_never_connects_back_disables_cancellation_only() {
    let cfg = RenderConfig {
        handshake_timeout_ms: 30,
        ..fast_config()
    };
    let mut out_listener = EndpointListener::bind_unique("unit_sup_half").unwrap();
    let address = out_listener.address().clone();
    let child =
        std::thread::spawn(move || BackgroundProcessAgent::start(&address, &cfg, RenderAbort::new()));
    let mut output = out_listener.accept_timeout(WAIT).unwrap().unwrap();

    let agent = child.join().unwrap();
    assert!(agent.has_output_channel());
    assert!(!agent.has_input_channel());
    assert!(agent.write_to_output_channel(&ControlMessage::FrameRendered(7)));

    // SERVER_CREATED first, then the frame.
    assert!(matches!(output.poll_line(WAIT).unwrap(), LineEvent::Line(l) if l.starts_with("SERVER_CREATED:")));
    assert_eq!(
        output.poll_line(WAIT).unwrap(),
        LineEvent::Line("FRAME_RENDERED:7".to_string())
    );
}
