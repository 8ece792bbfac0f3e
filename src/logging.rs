//! Logging setup and redacting display wrappers.
//!
//! Topics are public relay identifiers but still link a user's sessions, so
//! log lines carry a shortened form. Keys never reach a log line.

use std::fmt;

use tracing_subscriber::EnvFilter;

use crate::crypto::Topic;

/// Installs a `tracing` subscriber writing to stderr.
///
/// `RUST_LOG` takes precedence; otherwise the level is `debug` when
/// `verbose` is set and `info` when not. Returns false if a global
/// subscriber was already installed.
pub fn init(verbose: bool) -> bool {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}

/// Displays the first eight characters of a topic.
pub struct ShortTopic<'a>(pub &'a Topic);

impl fmt::Display for ShortTopic<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let topic = self.0.as_str();
        match topic.get(..8) {
            Some(prefix) if topic.len() > 8 => write!(f, "{prefix}.."),
            _ => f.write_str(topic),
        }
    }
}

impl fmt::Debug for ShortTopic<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// A wrapper that redacts its contents when displayed.
pub struct Redacted<T>(pub T);

impl<T> fmt::Display for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl<T> fmt::Debug for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_topic_truncates() {
        let topic = Topic::new("0123456789abcdef");
        assert_eq!(ShortTopic(&topic).to_string(), "01234567..");
    }

    #[test]
    fn short_topic_keeps_short_values() {
        let topic = Topic::new("abc");
        assert_eq!(ShortTopic(&topic).to_string(), "abc");
        assert_eq!(format!("{:?}", ShortTopic(&topic)), "abc");
    }

    #[test]
    fn redacted_hides_value() {
        assert_eq!(Redacted("secret").to_string(), "[REDACTED]");
        assert_eq!(format!("{:?}", Redacted([1u8; 32])), "[REDACTED]");
    }

    #[test]
    fn init_twice_is_harmless() {
        let _ = init(false);
        assert!(!init(true));
    }
}
