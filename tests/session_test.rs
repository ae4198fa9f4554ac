// tests/session_test.rs

//! Session state machine behaviour that holds without root privileges

use solbuild::{GlobalConfig, LockKind, Recipe, Session, SessionState};

#[test]
fn test_lifecycle_guards() {
    let mut session = Session::new(GlobalConfig::default());
    assert_eq!(session.state(), SessionState::New);

    // No recipe can be bound before a profile is configured
    assert!(session.set_recipe(Recipe::index_stub()).is_err());

    // No lock can be taken before a recipe exists
    assert!(session.acquire(LockKind::Overlay).is_err());

    // Builds can't start from New either
    assert!(session.run_build().is_err());
}

#[test]
fn test_configure_requires_known_profile() {
    let mut session = Session::new(GlobalConfig::default());
    let err = session
        .configure("definitely-not-a-real-profile")
        .unwrap_err();
    let message = err.to_string();
    assert!(
        message.contains("definitely-not-a-real-profile"),
        "error should name the profile: {message}"
    );
}

#[test]
fn test_teardown_from_any_state_leaves_no_mounts() {
    // Teardown on a never-started session must be a clean no-op
    let mut session = Session::new(GlobalConfig::default());
    session.teardown();
    assert_eq!(session.state(), SessionState::Done);

    // And must be idempotent
    session.teardown();
    assert_eq!(session.state(), SessionState::Done);
}

#[test]
fn test_cancellation_starts_false() {
    let session = Session::new(GlobalConfig::default());
    assert!(!session.is_cancelled());
}
