use super::*;

#[test]
fn display_prefixes_are_stable() {
    assert!(
        RenderLinkError::validation("x")
            .to_string()
            .contains("validation error:")
    );
    assert!(
        RenderLinkError::channel("x")
            .to_string()
            .contains("channel error:")
    );
    assert!(
        RenderLinkError::process("x")
            .to_string()
            .contains("process error:")
    );
    assert!(
        RenderLinkError::render("x")
            .to_string()
            .contains("render error:")
    );
    assert!(
        RenderLinkError::serde("x")
            .to_string()
            .contains("serialization error:")
    );
}

#[test]
fn protocol_errors_convert_and_stay_matchable() {
    let err: RenderLinkError = ProtocolError::UnknownMessage("HELLO".to_string()).into();
    assert!(err.to_string().contains("protocol error:"));
    assert!(err.to_string().contains("HELLO"));
    assert_eq!(
        err.as_protocol(),
        Some(&ProtocolError::UnknownMessage("HELLO".to_string()))
    );
    assert!(RenderLinkError::render("x").as_protocol().is_none());
}

#[test]
fn other_preserves_source() {
    let base = std::io::Error::other("boom");
    let err = RenderLinkError::Other(anyhow::Error::new(base));
    assert!(err.to_string().contains("boom"));
}
