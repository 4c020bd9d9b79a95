use super::*;

const RUNTIME: &str = "local-extension";

#[test]
fn own_extension_is_admitted() {
    assert_eq!(classify(&SenderInfo::extension(RUNTIME), RUNTIME), Some(OriginKind::Extension));
}

#[test]
fn foreign_extension_is_not() {
    assert_eq!(classify(&SenderInfo::extension("someone-else"), RUNTIME), None);
}

#[test]
fn https_tab_is_admitted() {
    assert_eq!(classify(&SenderInfo::tab("https://example.com", 3), RUNTIME), Some(OriginKind::Https));
}

#[test]
fn localhost_tab_is_admitted() {
    assert_eq!(
        classify(&SenderInfo::tab("http://localhost:5173", 3), RUNTIME),
        Some(OriginKind::Localhost)
    );
}

#[test]
fn plain_http_tab_is_not() {
    assert_eq!(classify(&SenderInfo::tab("http://example.com", 3), RUNTIME), None);
}

#[test]
fn subframes_are_not() {
    let sender = SenderInfo { frame_id: Some(2), ..SenderInfo::tab("https://example.com", 3) };
    assert_eq!(classify(&sender, RUNTIME), None);
}

#[test]
fn pages_without_a_tab_are_not() {
    let sender = SenderInfo { tab_id: None, ..SenderInfo::tab("https://example.com", 3) };
    assert_eq!(classify(&sender, RUNTIME), None);
}

#[test]
fn unparseable_origin_is_not() {
    assert_eq!(classify(&SenderInfo::tab("not a url", 3), RUNTIME), None);
    assert_eq!(classify(&SenderInfo { tab_id: Some(1), ..SenderInfo::default() }, RUNTIME), None);
}

#[test]
fn senders_match_on_origin_id_and_tab() {
    let a = SenderInfo::tab("https://example.com", 3);
    let same_tab_other_url = SenderInfo { url: Some("https://example.com/other".into()), ..a.clone() };
    let other_tab = SenderInfo::tab("https://example.com", 4);
    let other_origin = SenderInfo::tab("https://example.org", 3);

    assert!(senders_match(&a, &same_tab_other_url));
    assert!(!senders_match(&a, &other_tab));
    assert!(!senders_match(&a, &other_origin));
    assert!(!senders_match(&a, &SenderInfo::extension("x")));
}
