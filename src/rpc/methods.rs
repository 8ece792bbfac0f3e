//! Static relay options per (method, direction).
//!
//! Callers never pick `ttl`, `tag`, or `prompt` themselves; every publish
//! looks them up here. A response uses its request's ttl, the request tag
//! plus one, and never prompts.

use std::time::Duration;

/// `wc_pairingDelete`
pub const WC_PAIRING_DELETE: &str = "wc_pairingDelete";
/// `wc_pairingPing`
pub const WC_PAIRING_PING: &str = "wc_pairingPing";
/// `wc_sessionPropose`
pub const WC_SESSION_PROPOSE: &str = "wc_sessionPropose";
/// `wc_sessionSettle`
pub const WC_SESSION_SETTLE: &str = "wc_sessionSettle";
/// `wc_sessionUpdate`
pub const WC_SESSION_UPDATE: &str = "wc_sessionUpdate";
/// `wc_sessionExtend`
pub const WC_SESSION_EXTEND: &str = "wc_sessionExtend";
/// `wc_sessionRequest`
pub const WC_SESSION_REQUEST: &str = "wc_sessionRequest";
/// `wc_sessionEvent`
pub const WC_SESSION_EVENT: &str = "wc_sessionEvent";
/// `wc_sessionDelete`
pub const WC_SESSION_DELETE: &str = "wc_sessionDelete";
/// `wc_sessionPing`
pub const WC_SESSION_PING: &str = "wc_sessionPing";

const DAY: u64 = 86_400;
const FIVE_MINUTES: u64 = 300;
const THIRTY_SECONDS: u64 = 30;

/// (method, ttl seconds, request tag, request prompt)
const TABLE: &[(&str, u64, u32, bool)] = &[
    (WC_PAIRING_DELETE, DAY, 1000, false),
    (WC_PAIRING_PING, THIRTY_SECONDS, 1002, false),
    (WC_SESSION_PROPOSE, FIVE_MINUTES, 1100, true),
    (WC_SESSION_SETTLE, FIVE_MINUTES, 1102, false),
    (WC_SESSION_UPDATE, DAY, 1104, false),
    (WC_SESSION_EXTEND, DAY, 1106, false),
    (WC_SESSION_REQUEST, FIVE_MINUTES, 1108, true),
    (WC_SESSION_EVENT, FIVE_MINUTES, 1110, true),
    (WC_SESSION_DELETE, DAY, 1112, false),
    (WC_SESSION_PING, THIRTY_SECONDS, 1114, false),
];

/// Whether a payload is a request or its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// An outbound or inbound request.
    Request,
    /// A response to a request.
    Response,
}

/// Relay options of one (method, direction) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodOptions {
    /// Relay retention in seconds; also the wait timeout for requests.
    pub ttl: u64,
    /// Relay message tag.
    pub tag: u32,
    /// Whether the relay should wake a suspended peer.
    pub prompt: bool,
}

impl MethodOptions {
    /// The ttl as a duration.
    #[must_use]
    pub const fn ttl_duration(&self) -> Duration {
        Duration::from_secs(self.ttl)
    }
}

/// Looks up the options of `method` in `direction`.
#[must_use]
pub fn options(method: &str, direction: Direction) -> Option<MethodOptions> {
    let &(_, ttl, tag, prompt) = TABLE.iter().find(|(name, ..)| *name == method)?;
    Some(match direction {
        Direction::Request => MethodOptions { ttl, tag, prompt },
        Direction::Response => MethodOptions {
            ttl,
            tag: tag + 1,
            prompt: false,
        },
    })
}

/// Returns true if `method` has a table entry.
#[must_use]
pub fn is_known(method: &str) -> bool {
    TABLE.iter().any(|(name, ..)| *name == method)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ping_options() {
        assert_eq!(
            options(WC_SESSION_PING, Direction::Request),
            Some(MethodOptions {
                ttl: 30,
                tag: 1114,
                prompt: false
            })
        );
        assert_eq!(
            options(WC_SESSION_PING, Direction::Response),
            Some(MethodOptions {
                ttl: 30,
                tag: 1115,
                prompt: false
            })
        );
    }

    #[test]
    fn propose_prompts_but_its_response_does_not() {
        let request = options(WC_SESSION_PROPOSE, Direction::Request).unwrap();
        let response = options(WC_SESSION_PROPOSE, Direction::Response).unwrap();
        assert!(request.prompt);
        assert!(!response.prompt);
        assert_eq!((request.tag, response.tag), (1100, 1101));
        assert_eq!(request.ttl_duration(), Duration::from_secs(300));
    }

    #[test]
    fn response_tags_are_odd_and_unique() {
        let mut tags: Vec<u32> = TABLE
            .iter()
            .flat_map(|(method, ..)| {
                [Direction::Request, Direction::Response]
                    .map(|d| options(method, d).unwrap().tag)
            })
            .collect();
        let count = tags.len();
        tags.sort_unstable();
        tags.dedup();
        assert_eq!(tags.len(), count);
    }

    #[test]
    fn unknown_method_has_no_options() {
        assert!(options("eth_sign", Direction::Request).is_none());
        assert!(!is_known("eth_sign"));
        assert!(is_known(WC_SESSION_SETTLE));
    }
}
