use agent_relay::AppError;

#[test]
fn display_prefixes_each_variant() {
    let cases = [
        (AppError::Config("bad".into()), "config: bad"),
        (AppError::Io("disk".into()), "io: disk"),
        (AppError::Process("spawn".into()), "process: spawn"),
        (AppError::Agent("exit".into()), "agent: exit"),
        (AppError::Provider("gone".into()), "provider: gone"),
        (AppError::NotFound("s1".into()), "not found: s1"),
        (AppError::Http("bind".into()), "http: bind"),
    ];

    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn json_errors_map_to_config() {
    let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let app: AppError = err.into();
    assert!(matches!(app, AppError::Config(msg) if msg.starts_with("invalid json")));
}

#[test]
fn io_errors_map_to_io() {
    let err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
    let app: AppError = err.into();
    assert!(matches!(app, AppError::Io(msg) if msg.contains("missing")));
}

#[test]
fn app_error_is_std_error() {
    fn assert_error<E: std::error::Error>(_: &E) {}
    assert_error(&AppError::Http("x".into()));
}
