use super::*;

#[test]
fn wire_lines_match_the_protocol_table() {
    assert_eq!(ControlMessage::FrameRendered(12).to_line(), "FRAME_RENDERED:12\n");
    assert_eq!(ControlMessage::Progress(40).to_line(), "PROGRESS:40\n");
    assert_eq!(
        ControlMessage::RenderingFinished.to_line(),
        "RENDERING_FINISHED\n"
    );
    assert_eq!(ControlMessage::RenderingStarted.to_line(), "RENDERING_STARTED\n");
    assert_eq!(
        ControlMessage::ServerCreated("/tmp/x.sock".to_string()).to_line(),
        "SERVER_CREATED:/tmp/x.sock\n"
    );
    assert_eq!(ControlMessage::AbortRender.to_line(), "ABORT_RENDER\n");
}

#[test]
fn parse_accepts_known_lines() {
    assert_eq!(
        "FRAME_RENDERED:-3".parse::<ControlMessage>().unwrap(),
        ControlMessage::FrameRendered(-3)
    );
    assert_eq!(
        "PROGRESS:100\r".parse::<ControlMessage>().unwrap(),
        ControlMessage::Progress(100)
    );
    assert_eq!(
        "SERVER_CREATED:/tmp/a b.sock"
            .parse::<ControlMessage>()
            .unwrap(),
        ControlMessage::ServerCreated("/tmp/a b.sock".to_string())
    );
}

#[test]
fn unknown_and_malformed_lines_are_fatal() {
    assert_eq!(
        "HELLO".parse::<ControlMessage>(),
        Err(ProtocolError::UnknownMessage("HELLO".to_string()))
    );
    assert_eq!(
        "".parse::<ControlMessage>(),
        Err(ProtocolError::UnknownMessage(String::new()))
    );
    assert!(matches!(
        "PROGRESS:101".parse::<ControlMessage>(),
        Err(ProtocolError::InvalidPayload { kind: "PROGRESS", .. })
    ));
    assert!(matches!(
        "FRAME_RENDERED:abc".parse::<ControlMessage>(),
        Err(ProtocolError::InvalidPayload {
            kind: "FRAME_RENDERED",
            ..
        })
    ));
    assert!(matches!(
        "SERVER_CREATED:".parse::<ControlMessage>(),
        Err(ProtocolError::InvalidPayload { .. })
    ));
    for padded in ["FRAME_RENDERED: 5", "FRAME_RENDERED:5 ", "FRAME_RENDERED:+5", "PROGRESS:\t40"] {
        assert!(
            matches!(
                padded.parse::<ControlMessage>(),
                Err(ProtocolError::InvalidPayload { .. })
            ),
            "{padded:?} accepted"
        );
    }
    assert_eq!(
        "FRAME_RENDERED:-3".parse::<ControlMessage>(),
        Ok(ControlMessage::FrameRendered(-3))
    );
    // No lenient prefix matching: trailing garbage after a bare keyword is unknown.
    assert!(matches!(
        "ABORT_RENDER now".parse::<ControlMessage>(),
        Err(ProtocolError::UnknownMessage(_))
    ));
}

#[test]
fn direction_is_enforced_per_channel() {
    assert_eq!(
        ControlMessage::parse_on("ABORT_RENDER", ChannelDirection::Input).unwrap(),
        ControlMessage::AbortRender
    );
    assert_eq!(
        ControlMessage::parse_on("ABORT_RENDER", ChannelDirection::Output),
        Err(ProtocolError::WrongChannel {
            kind: "ABORT_RENDER",
            channel: "output"
        })
    );
    assert!(ControlMessage::parse_on("PROGRESS:5", ChannelDirection::Input).is_err());
    assert!(ControlMessage::parse_on("PROGRESS:5", ChannelDirection::Output).is_ok());
}
