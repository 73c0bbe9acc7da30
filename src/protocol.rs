//! Manager-interface protocol parsing and action serialization

use crate::{
    buffer::ReadBuffer,
    constants::{
        AUTH_ACCEPTED_MARKER, BLOCK_TERMINATOR, FIELD_CALLER_ID_NUM, FIELD_CHANNEL,
        FIELD_DEST_CALLER_ID_NUM, FIELD_EVENT, FIELD_SEPARATOR, FIELD_UNIQUE_ID, LINE_TERMINATOR,
    },
    error::{ListenerError, ListenerResult},
    event::{CallEvent, CallEventKind},
};
use chrono::Local;
use std::collections::HashMap;
use tracing::trace;

/// One blank-line-terminated block of `Key: Value` lines.
///
/// Everything the manager interface sends is a block: the greeting banner
/// plus login response, action responses, and events. The raw text is kept
/// alongside the parsed fields because the login check is a substring match
/// over the whole block.
#[derive(Debug, Clone)]
pub(crate) struct AmiBlock {
    raw: String,
    fields: HashMap<String, String>,
}

impl AmiBlock {
    fn parse(raw: String) -> Self {
        let mut fields = HashMap::new();
        for line in raw.split(LINE_TERMINATOR) {
            // Split at the first separator; later separators belong to the
            // value. Lines without one (banner, continuations) are skipped.
            if let Some((key, value)) = line.split_once(FIELD_SEPARATOR) {
                let key = key
                    .trim()
                    .to_string();
                let value = value
                    .trim()
                    .to_string();
                fields.insert(key, value);
            }
        }
        Self { raw, fields }
    }

    /// Field value, or `None` when the block has no such field.
    /// Duplicate fields resolve to the last occurrence.
    pub(crate) fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|s| s.as_str())
    }

    fn field_or_empty(&self, name: &str) -> String {
        self.field(name)
            .unwrap_or_default()
            .to_string()
    }

    /// Raw block text, untouched by field parsing.
    pub(crate) fn text(&self) -> &str {
        &self.raw
    }

    /// Whether this block announces a successful login.
    pub(crate) fn is_auth_accepted(&self) -> bool {
        self.raw
            .contains(AUTH_ACCEPTED_MARKER)
    }

    /// Build a call event when the block is one of the monitored kinds.
    ///
    /// Every other block (responses, unmonitored events) carries nothing the
    /// monitor wants and yields `None`. Missing payload fields come back as
    /// empty strings; the timestamp is the moment of parsing.
    pub(crate) fn to_call_event(&self) -> Option<CallEvent> {
        let kind = CallEventKind::from_wire(self.field(FIELD_EVENT)?)?;
        Some(CallEvent {
            kind,
            caller_id: self.field_or_empty(FIELD_CALLER_ID_NUM),
            destination: self.field_or_empty(FIELD_DEST_CALLER_ID_NUM),
            channel: self.field_or_empty(FIELD_CHANNEL),
            unique_id: self.field_or_empty(FIELD_UNIQUE_ID),
            timestamp: Local::now(),
        })
    }
}

/// Streaming block parser.
///
/// Bytes go in through [`add_data`](Self::add_data); complete blocks come
/// out of [`next_block`](Self::next_block) once their terminator is fully
/// buffered. A block split across any number of reads assembles correctly.
pub(crate) struct AmiParser {
    buffer: ReadBuffer,
}

impl AmiParser {
    pub(crate) fn new() -> Self {
        Self {
            buffer: ReadBuffer::new(),
        }
    }

    /// Add raw socket data to the parser buffer.
    pub(crate) fn add_data(&mut self, data: &[u8]) -> ListenerResult<()> {
        self.buffer
            .extend_from_slice(data);
        self.buffer
            .check_size_limits()?;
        Ok(())
    }

    /// Slice the next complete block off the buffer, if one is there.
    pub(crate) fn next_block(&mut self) -> Option<AmiBlock> {
        let block_data = self
            .buffer
            .extract_until_pattern(BLOCK_TERMINATOR.as_bytes())?;
        // Compact buffer to free consumed block data
        self.buffer
            .compact();

        // The interface is ASCII in practice; anything else is carried
        // through lossily rather than killing the session.
        let raw = String::from_utf8_lossy(&block_data).into_owned();
        trace!("Sliced block of {} bytes", raw.len());
        Some(AmiBlock::parse(raw))
    }
}

impl Default for AmiParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Render the login action for the given credentials.
///
/// `subscribe` controls the `Events` line: a monitoring session turns the
/// event mask on, the one-shot connection probe leaves the line out.
pub(crate) fn login_action(
    username: &str,
    secret: &str,
    subscribe: bool,
) -> ListenerResult<String> {
    validate_credential("username", username)?;
    validate_credential("secret", secret)?;

    let mut action = String::new();
    action.push_str("Action: Login");
    action.push_str(LINE_TERMINATOR);
    action.push_str("Username: ");
    action.push_str(username);
    action.push_str(LINE_TERMINATOR);
    action.push_str("Secret: ");
    action.push_str(secret);
    action.push_str(LINE_TERMINATOR);
    if subscribe {
        action.push_str("Events: on");
        action.push_str(LINE_TERMINATOR);
    }
    action.push_str(LINE_TERMINATOR);
    Ok(action)
}

/// Actions are line-oriented; a line break inside a credential would let a
/// crafted value inject extra action lines.
fn validate_credential(what: &str, value: &str) -> ListenerResult<()> {
    if value.contains('\r') || value.contains('\n') {
        return Err(ListenerError::auth_failed(format!(
            "{} must not contain line breaks",
            what
        )));
    }
    Ok(())
}
