//! Unit tests for `AppError` display and conversions.

use session_runner::AppError;

#[test]
fn display_prefixes_identify_the_category() {
    let cases = [
        (AppError::Launch("no such image".into()), "launch: no such image"),
        (AppError::Protocol("malformed json".into()), "protocol: malformed json"),
        (AppError::AlreadyRunning("s1".into()), "already running: s1"),
        (AppError::InvalidState("runner is idle".into()), "invalid state: runner is idle"),
        (AppError::ControlTimeout("ctl-1".into()), "control timeout: ctl-1"),
        (AppError::UnexpectedExit("code 1".into()), "unexpected exit: code 1"),
        (AppError::NotFound("session s9".into()), "not found: session s9"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn toml_errors_become_config_errors() {
    let toml_err = toml::from_str::<toml::Value>("= broken").unwrap_err();
    let err: AppError = toml_err.into();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn io_errors_become_io_errors() {
    let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
    let err: AppError = io.into();
    assert!(matches!(err, AppError::Io(msg) if msg.contains("pipe closed")));
}

#[test]
fn errors_implement_std_error() {
    fn assert_error<E: std::error::Error + Send + Sync + 'static>(_: &E) {}
    assert_error(&AppError::Write("stdin closed".into()));
}
