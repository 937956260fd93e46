use draftsync_storage::StorageError;
use draftsync_sync::SyncError;
use std::time::Duration;

#[test]
fn statuses_are_classified() {
    assert_eq!(
        SyncError::from_status(429, "slow down"),
        SyncError::RateLimited { retry_after: None }
    );
    assert!(matches!(
        SyncError::from_status(408, "timeout"),
        SyncError::Server { status: 408, .. }
    ));
    assert!(matches!(
        SyncError::from_status(502, "bad gateway"),
        SyncError::Server { status: 502, .. }
    ));
    assert!(matches!(
        SyncError::from_status(404, "missing"),
        SyncError::Client { status: 404, .. }
    ));
    assert!(matches!(
        SyncError::from_status(302, "moved"),
        SyncError::Server { status: 302, .. }
    ));
}

#[test]
fn only_transient_errors_are_retryable() {
    assert!(SyncError::Network("reset".into()).is_retryable());
    assert!(SyncError::RateLimited { retry_after: None }.is_retryable());
    assert!(SyncError::from_status(503, "").is_retryable());
    assert!(!SyncError::from_status(400, "").is_retryable());
    assert!(!SyncError::Serialization("eof".into()).is_retryable());
    assert!(!SyncError::Storage("locked".into()).is_retryable());
    assert!(!SyncError::ChannelClosed.is_retryable());
}

#[test]
fn retry_after_and_status() {
    let limited = SyncError::RateLimited {
        retry_after: Some(Duration::from_secs(2)),
    };
    assert_eq!(limited.retry_after(), Some(Duration::from_secs(2)));
    assert_eq!(limited.status(), Some(429));
    assert_eq!(SyncError::from_status(500, "").retry_after(), None);
    assert_eq!(SyncError::Network("x".into()).status(), None);
}

#[test]
fn display_includes_status_and_message() {
    let err = SyncError::from_status(422, "content too large");
    assert_eq!(err.to_string(), "client error 422: content too large");
}

#[test]
fn conversions() {
    let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    assert!(matches!(SyncError::from(json_err), SyncError::Serialization(_)));

    let storage = SyncError::from(StorageError::InvalidData("disk full".into()));
    assert!(matches!(storage, SyncError::Storage(msg) if msg.contains("disk full")));
}
