use reposcan_common::{RepoKey, RepoScanError};

#[test]
fn test_invalid_repo_key_display() {
    let err = RepoKey::new("bad/user", "repo").unwrap_err();
    assert_eq!(err.to_string(), "invalid repository identifier: github.com/bad/user/repo");
}

#[test]
fn test_not_found_display() {
    let err = RepoScanError::NotFound("github.com/a/ghost".to_string());
    assert_eq!(err.to_string(), "not found: github.com/a/ghost");
}

#[test]
fn test_transient_display() {
    let err = RepoScanError::Transient("connection reset".to_string());
    assert_eq!(err.to_string(), "transient error: connection reset");
}

#[test]
fn test_lost_lock_display() {
    let err = RepoScanError::LostLock("github.com/a/b".to_string());
    assert_eq!(err.to_string(), "lock lost for github.com/a/b");
}

#[test]
fn test_internal_display() {
    let err = RepoScanError::Internal("invalid JSON document".to_string());
    assert_eq!(err.to_string(), "internal error: invalid JSON document");
}
