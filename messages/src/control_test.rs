use super::*;
use crate::error::Code;
use serde_json::json;

#[test]
fn wire_shapes() {
    assert_eq!(
        serde_json::to_value(StreamControl::Value(json!({ "n": 1 }))).unwrap(),
        json!({ "value": { "n": 1 } })
    );
    assert_eq!(serde_json::to_value(StreamControl::End).unwrap(), json!({ "done": true }));
    assert_eq!(
        serde_json::to_value(StreamControl::Abort(TransportError::aborted("stop"))).unwrap(),
        json!({ "abort": { "code": "aborted", "message": "stop" } })
    );
}

#[test]
fn null_value_is_an_item() {
    assert_eq!(StreamControl::classify(json!({ "value": null })), Ok(StreamControl::Value(Value::Null)));
}

#[test]
fn done_must_be_true() {
    assert_eq!(StreamControl::classify(json!({ "done": true })), Ok(StreamControl::End));
    assert!(StreamControl::classify(json!({ "done": false })).is_err());
}

#[test]
fn abort_decodes_reason() {
    let control = StreamControl::classify(json!({ "abort": { "code": "deadline_exceeded", "message": "sink timeout" } }));
    assert_eq!(control, Ok(StreamControl::Abort(TransportError::deadline_exceeded("sink timeout"))));
}

#[test]
fn abort_with_unreadable_reason_is_still_an_abort() {
    let Ok(StreamControl::Abort(error)) = StreamControl::classify(json!({ "abort": 42 })) else {
        panic!("expected abort");
    };
    assert_eq!(error.code, Code::Aborted);
    assert_eq!(error.details, vec![json!(42)]);
}

#[test]
fn unknown_shapes_are_handed_back() {
    for raw in [json!(1), json!([]), json!({ "item": 1 })] {
        assert_eq!(StreamControl::classify(raw.clone()), Err(raw));
    }
}

#[test]
fn only_values_are_non_terminal() {
    assert!(!StreamControl::Value(json!(1)).is_terminal());
    assert!(StreamControl::End.is_terminal());
    assert!(StreamControl::Abort(TransportError::aborted("x")).is_terminal());
}
