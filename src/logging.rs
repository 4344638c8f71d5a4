use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

pub(crate) const LOG_ENV: &str = "GRIDBOT_LOG";

/// Where log lines go. One-shot console commands keep stdout for replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LogTarget {
    Stdout,
    Stderr,
}

pub(crate) fn make_writer(target: LogTarget) -> BoxMakeWriter {
    match target {
        LogTarget::Stdout => BoxMakeWriter::new(std::io::stdout),
        LogTarget::Stderr => BoxMakeWriter::new(std::io::stderr),
    }
}

pub(crate) fn parse_level(raw: &str) -> Option<Level> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}

/// `--verbose` wins, then `$GRIDBOT_LOG`, then info.
pub(crate) fn resolve_level(verbose: bool, env_value: Option<&str>) -> Level {
    if verbose {
        return Level::DEBUG;
    }
    env_value.and_then(parse_level).unwrap_or(Level::INFO)
}

pub(crate) fn init(verbose: bool, target: LogTarget) {
    let env_value = std::env::var(LOG_ENV).ok();
    let subscriber = FmtSubscriber::builder()
        .with_max_level(resolve_level(verbose, env_value.as_deref()))
        .with_writer(make_writer(target))
        .with_ansi(target == LogTarget::Stdout)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_targets_hand_out_writers() {
        use std::io::Write;
        use tracing_subscriber::fmt::MakeWriter;

        for target in [LogTarget::Stdout, LogTarget::Stderr] {
            let writers = make_writer(target);
            writers.make_writer().write_all(b"").unwrap();
        }
    }

    #[test]
    fn level_precedence() {
        assert_eq!(resolve_level(true, Some("error")), Level::DEBUG);
        assert_eq!(resolve_level(false, Some("WARN")), Level::WARN);
        assert_eq!(resolve_level(false, Some("chatty")), Level::INFO);
        assert_eq!(resolve_level(false, None), Level::INFO);
    }
}
