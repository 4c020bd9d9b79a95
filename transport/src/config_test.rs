use super::*;
use std::time::Duration;

#[test]
fn defaults() {
    let config = TransportConfig::default();
    assert_eq!(config.idle_timeout, Some(Duration::from_secs(20)));
    assert_eq!(config.request_timeout, None);
    assert_eq!(config.offer_timeout, Some(Duration::from_secs(20)));
}

#[test]
fn zero_disables_a_limit() {
    assert_eq!(limit(0), None);
    assert_eq!(limit(15), Some(Duration::from_millis(15)));

    let config = TransportConfig::default().with_idle_timeout(Some(Duration::ZERO));
    assert_eq!(config.idle_timeout, None);
}

#[test]
fn builders_override_fields() {
    let config = TransportConfig::default()
        .with_request_timeout(Some(Duration::from_millis(50)))
        .with_offer_timeout(None);
    assert_eq!(config.request_timeout, Some(Duration::from_millis(50)));
    assert_eq!(config.offer_timeout, None);
    assert_eq!(config.idle_timeout, Some(Duration::from_secs(20)));
}

#[test]
fn env_parse_falls_back_on_missing_or_garbage() {
    assert_eq!(env_parse("TRANSPORT_TEST_UNSET_KEY_2f9c", 7u64), 7);
    // SAFETY: this key is private to this test.
    unsafe { std::env::set_var("TRANSPORT_TEST_GARBAGE_KEY_2f9c", "soon") };
    assert_eq!(env_parse("TRANSPORT_TEST_GARBAGE_KEY_2f9c", 7u64), 7);
    // SAFETY: see above.
    unsafe { std::env::set_var("TRANSPORT_TEST_GARBAGE_KEY_2f9c", "250") };
    assert_eq!(env_parse("TRANSPORT_TEST_GARBAGE_KEY_2f9c", 7u64), 250);
}

#[tokio::test(start_paused = true)]
async fn expire_without_limit_never_fires() {
    let fired = tokio::time::timeout(Duration::from_secs(3600), expire(None)).await;
    assert!(fired.is_err());
}

#[tokio::test(start_paused = true)]
async fn expire_with_limit_fires() {
    let fired = tokio::time::timeout(Duration::from_secs(2), expire(Some(Duration::from_secs(1)))).await;
    assert!(fired.is_ok());
}
