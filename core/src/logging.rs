//! Process-wide logger construction, in the style of the teacher's
//! `flux::logging` module: a `sloggers::Config` built from an inline TOML
//! literal. Unlike `flux::logging::init`, the logger is returned rather than
//! discarded, since every long-lived object in this crate takes a `Logger`
//! by value instead of reaching for a global.

use slog::Logger;
use sloggers::Config;

/// Build the default root logger: terminal drain, debug level, stderr.
pub fn root() -> Logger {
    let config: sloggers::LoggerConfig = serdeconv::from_toml_str(
        r#"
type = "terminal"
level = "debug"
destination = "stderr"
"#,
    )
    .expect("default logging config is well-formed");

    config.build_logger().expect("failed to build root logger")
}

/// A quiet logger for tests, so `cargo test -- --nocapture` isn't drowned
/// in debug noise from every queue push.
#[cfg(test)]
pub fn test_logger() -> Logger {
    slog::Logger::root(slog::Discard, slog::o!())
}
