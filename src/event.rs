//! Call event types and the extension filter

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Display format for event timestamps: sortable, second precision.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Call event kinds recognized by the monitor.
///
/// Variant names are the wire names (e.g. `DialBegin` arrives as
/// `Event: DialBegin`). Anything else on the wire is discarded before an
/// event is built; [`Other`](Self::Other) exists for events synthesized by
/// callers rather than parsed off the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum CallEventKind {
    /// A call started ringing
    DialBegin,
    /// A call ended
    Hangup,
    /// Two channels were joined
    Bridge,
    /// Not one of the monitored kinds
    Other,
}

impl CallEventKind {
    /// Parse a kind from its wire name. Exact match; the switch emits
    /// canonical capitalization.
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "DialBegin" => Some(CallEventKind::DialBegin),
            "Hangup" => Some(CallEventKind::Hangup),
            "Bridge" => Some(CallEventKind::Bridge),
            _ => None,
        }
    }
}

impl fmt::Display for CallEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallEventKind::DialBegin => "DialBegin",
            CallEventKind::Hangup => "Hangup",
            CallEventKind::Bridge => "Bridge",
            CallEventKind::Other => "Other",
        };
        f.write_str(name)
    }
}

impl FromStr for CallEventKind {
    type Err = ParseCallEventKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_wire(s).ok_or_else(|| ParseCallEventKindError(s.to_string()))
    }
}

/// Error returned when parsing an unrecognized event kind string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseCallEventKindError(pub String);

impl fmt::Display for ParseCallEventKindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown call event kind: {}", self.0)
    }
}

impl std::error::Error for ParseCallEventKindError {}

/// One call event, live off the wire or synthesized in demo mode.
///
/// Fields mirror the switch's payload and may be empty when the switch
/// omitted them. The timestamp is assigned when the event is built, not
/// when the call happened on the switch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallEvent {
    /// What happened
    pub kind: CallEventKind,
    /// Calling party number
    pub caller_id: String,
    /// Called party number
    pub destination: String,
    /// Switch channel carrying the call (e.g. `SIP/trunk-0000004f`)
    pub channel: String,
    /// Switch-assigned call identifier
    pub unique_id: String,
    /// When the monitor saw the event
    pub timestamp: DateTime<Local>,
}

impl CallEvent {
    /// Whether this event concerns the given extension.
    ///
    /// True when the extension is the called or calling party, or appears in
    /// the channel name (covers `SIP/5000-...` style local legs). An empty
    /// extension matches nothing, so an unconfigured agent publishes nothing.
    pub fn concerns(&self, extension: &str) -> bool {
        if extension.is_empty() {
            return false;
        }
        self.destination == extension
            || self.caller_id == extension
            || self
                .channel
                .contains(extension)
    }

    /// Timestamp rendered in the fixed display format.
    pub fn timestamp_display(&self) -> String {
        self.timestamp
            .format(TIMESTAMP_FORMAT)
            .to_string()
    }
}

impl fmt::Display for CallEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} -> {} on {}",
            self.kind, self.caller_id, self.destination, self.channel
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_event(caller_id: &str, destination: &str, channel: &str) -> CallEvent {
        CallEvent {
            kind: CallEventKind::DialBegin,
            caller_id: caller_id.to_string(),
            destination: destination.to_string(),
            channel: channel.to_string(),
            unique_id: "1234567".to_string(),
            timestamp: Local::now(),
        }
    }

    #[test]
    fn test_kind_from_wire_exact_match() {
        assert_eq!(
            CallEventKind::from_wire("DialBegin"),
            Some(CallEventKind::DialBegin)
        );
        assert_eq!(CallEventKind::from_wire("Hangup"), Some(CallEventKind::Hangup));
        assert_eq!(CallEventKind::from_wire("Bridge"), Some(CallEventKind::Bridge));
        // Wire names are canonical; no case folding
        assert_eq!(CallEventKind::from_wire("DIALBEGIN"), None);
        assert_eq!(CallEventKind::from_wire("Newchannel"), None);
        assert_eq!(CallEventKind::from_wire(""), None);
    }

    #[test]
    fn test_kind_round_trips_through_display() {
        for kind in [
            CallEventKind::DialBegin,
            CallEventKind::Hangup,
            CallEventKind::Bridge,
        ] {
            let parsed: CallEventKind = kind
                .to_string()
                .parse()
                .unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn test_concerns_matches_destination() {
        let event = make_event("0612345678", "5000", "SIP/trunk-00000001");
        assert!(event.concerns("5000"));
    }

    #[test]
    fn test_concerns_matches_caller() {
        let event = make_event("5000", "0612345678", "SIP/trunk-00000001");
        assert!(event.concerns("5000"));
    }

    #[test]
    fn test_concerns_matches_channel_substring() {
        let event = make_event("0612345678", "0201234567", "SIP/5000-0000004f");
        assert!(event.concerns("5000"));
    }

    #[test]
    fn test_concerns_rejects_unrelated_event() {
        let event = make_event("0612345678", "5001", "SIP/trunk-00000001");
        assert!(!event.concerns("5000"));
    }

    #[test]
    fn test_concerns_empty_extension_matches_nothing() {
        let event = make_event("0612345678", "", "SIP/trunk-00000001");
        assert!(!event.concerns(""));
    }

    #[test]
    fn test_timestamp_display_format() {
        let event = make_event("0612345678", "5000", "SIP/trunk-00000001");
        let rendered = event.timestamp_display();
        // 2024-01-31 09:05:00 shape: datey prefix, colon-separated time
        assert_eq!(rendered.len(), 19);
        assert_eq!(&rendered[4..5], "-");
        assert_eq!(&rendered[13..14], ":");
    }
}
