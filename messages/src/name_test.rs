use super::*;

fn prefix(p: &str) -> ChannelPrefix {
    ChannelPrefix::new(p).unwrap()
}

#[test]
fn generated_name_has_prefix_label_and_id() {
    let name = ChannelName::generate(&prefix("app"), ChannelLabel::Transport);
    let expected = format!("app-TRANSPORT-{}", name.client_id());
    assert_eq!(name.as_str(), expected);
    assert_eq!(name.to_string(), expected);
}

#[test]
fn generated_names_are_unique() {
    let p = prefix("app");
    let a = ChannelName::generate(&p, ChannelLabel::Stream);
    let b = ChannelName::generate(&p, ChannelLabel::Stream);
    assert_ne!(a.client_id(), b.client_id());
}

#[test]
fn generated_names_contain_no_whitespace() {
    let name = ChannelName::generate(&prefix("app"), ChannelLabel::Transport);
    assert!(!name.as_str().chars().any(char::is_whitespace));
}

#[test]
fn parse_inverts_generate() {
    let p = prefix("app");
    for label in [ChannelLabel::Transport, ChannelLabel::Stream] {
        let name = ChannelName::generate(&p, label);
        let parsed = ChannelName::parse(&p, name.as_str()).unwrap();
        assert_eq!(parsed, name);
    }
}

#[test]
fn parse_literal_name() {
    let parsed = ChannelName::parse(&prefix("test"), "test-TRANSPORT-abc123").unwrap();
    assert_eq!(parsed.label(), ChannelLabel::Transport);
    assert_eq!(parsed.client_id().as_str(), "abc123");
}

#[test]
fn parse_keeps_dashes_inside_client_id() {
    let parsed = ChannelName::parse(&prefix("app"), "app-STREAM-a-b-c").unwrap();
    assert_eq!(parsed.label(), ChannelLabel::Stream);
    assert_eq!(parsed.client_id().as_str(), "a-b-c");
}

#[test]
fn parse_rejects_foreign_prefix() {
    assert!(ChannelName::parse(&prefix("app"), "other-TRANSPORT-abc").is_none());
}

#[test]
fn parse_rejects_prefix_that_extends_ours() {
    assert!(ChannelName::parse(&prefix("app"), "apple-TRANSPORT-abc").is_none());
    assert!(ChannelName::parse(&prefix("app"), "app-beta-TRANSPORT-abc").is_none());
}

#[test]
fn parse_rejects_unknown_label() {
    assert!(ChannelName::parse(&prefix("app"), "app-transport-abc").is_none());
    assert!(ChannelName::parse(&prefix("app"), "app-BOGUS-abc").is_none());
}

#[test]
fn parse_rejects_missing_or_empty_client_id() {
    let p = prefix("app");
    assert!(ChannelName::parse(&p, "app-TRANSPORT").is_none());
    assert!(ChannelName::parse(&p, "app-TRANSPORT-").is_none());
    assert!(ChannelName::parse(&p, "app-TRANSPORT-a b").is_none());
}

#[test]
fn prefix_rejects_empty_and_whitespace() {
    assert_eq!(ChannelPrefix::new(""), Err(NameError::EmptyPrefix));
    assert!(matches!(ChannelPrefix::new("my app"), Err(NameError::WhitespaceInPrefix(_))));
}
