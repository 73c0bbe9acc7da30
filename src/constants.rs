//! Protocol constants and configuration values

/// Default Asterisk Manager Interface (AMI) port
pub const DEFAULT_AMI_PORT: u16 = 5038;

/// Socket buffer size for reading from TCP stream - AMI blocks are small
pub const SOCKET_BUF_SIZE: usize = 4096;

/// Maximum single event block size (64KB)
/// No legitimate AMI event comes close; a larger "block" means the blank-line
/// terminator was lost and the stream is desynced.
pub const MAX_BLOCK_SIZE: usize = 64 * 1024;

/// Maximum total buffer size (256KB) - safety limit to prevent runaway memory
pub const MAX_BUFFER_SIZE: usize = 256 * 1024;

/// Protocol message terminators
pub const BLOCK_TERMINATOR: &str = "\r\n\r\n";
pub const LINE_TERMINATOR: &str = "\r\n";

/// Separator between a field name and its value within a block line
pub const FIELD_SEPARATOR: &str = ": ";

/// Event payload field names read by the monitor
pub const FIELD_EVENT: &str = "Event";
pub const FIELD_CALLER_ID_NUM: &str = "CallerIDNum";
pub const FIELD_DEST_CALLER_ID_NUM: &str = "DestCallerIDNum";
pub const FIELD_CHANNEL: &str = "Channel";
pub const FIELD_UNIQUE_ID: &str = "Uniqueid";

/// Substring marking a successful login in the first response block
pub const AUTH_ACCEPTED_MARKER: &str = "Authentication accepted";

/// TCP connect timeout for monitoring sessions, in seconds
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// TCP connect timeout for the one-shot connection probe, in seconds
pub const PROBE_TIMEOUT_SECS: u64 = 5;

/// Poll timeout for the streaming read loop, in seconds
/// Bounds how long a stop request waits for the reader to notice it.
pub const READ_POLL_TIMEOUT_SECS: u64 = 2;

/// Delay between reconnection attempts, in seconds
pub const RETRY_DELAY_SECS: u64 = 5;

/// Demo event cadence bounds, in seconds (inclusive)
pub const DEMO_INTERVAL_MIN_SECS: u64 = 10;
pub const DEMO_INTERVAL_MAX_SECS: u64 = 30;

/// Default delay before the status file is cleared after a call record
/// is written, in seconds
pub const DEFAULT_AUTO_CLEAR_SECS: u64 = 3;

/// Maximum number of queued notifications before dropping
pub const MAX_NOTICE_QUEUE_SIZE: usize = 256;
