//! Call-event monitor for an Asterisk-style PBX manager interface
//!
//! This crate watches a telephone switch for call activity on a single
//! extension and mirrors the current call into a small status file that a
//! desktop CRM polls. It connects to the manager interface over TCP, logs in,
//! filters the event stream down to one extension, and writes an XML-ish
//! call record whenever a call starts. The record is cleared when the call
//! hangs up, or automatically a few seconds after it was written.
//!
//! # Architecture
//!
//! The library uses a split handle/stream design:
//! - [`CallListener`] (Clone + Send) — start and stop the engine from any task
//! - [`ListenerEventStream`] — receive call events, state changes, and errors
//!
//! The engine itself is a background task. Connection loss, login rejection,
//! and file errors are reported on the stream and never stop it: the engine
//! retries on a fixed delay until [`CallListener::stop`] is called.
//!
//! # Demo mode
//!
//! When the PBX is disabled in the configuration (or no host is set), the
//! engine generates plausible synthetic call traffic instead of connecting
//! anywhere, on the same notice and status-file paths as live traffic.
//!
//! # Example
//!
//! ```rust,no_run
//! use callwatch::{CallListener, ListenerConfig, ListenerEvent};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), callwatch::ConfigError> {
//!     let config = ListenerConfig::load_or_default(Path::new("callwatch.toml"))?;
//!
//!     let (listener, mut notices) = CallListener::new();
//!     listener.start(config);
//!
//!     while let Some(notice) = notices.recv().await {
//!         match notice {
//!             ListenerEvent::Call(event) => println!("{}", event),
//!             ListenerEvent::StatusChanged(state) => println!("listener is {}", state),
//!             ListenerEvent::Error(err) => eprintln!("error: {}", err),
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! A configuration file looks like this; every key is optional:
//!
//! ```toml
//! [pbx]
//! host = "192.168.1.10"
//! port = 5038
//! username = "monitor"
//! secret = "change-me"
//! enabled = true
//!
//! [agent]
//! extension = "5000"
//! status_file = "data/CaCallstatus.dat"
//! auto_clear_delay = 3
//! ```

pub mod config;
pub mod connection;
pub mod constants;
pub mod error;
pub mod event;
pub mod listener;

pub(crate) mod buffer;
pub(crate) mod callstatus;
pub(crate) mod demo;
pub(crate) mod protocol;

pub use config::{AgentConfig, ConfigError, ListenerConfig, PbxConfig, DEFAULT_STATUS_FILE};
pub use connection::probe_connection;
pub use constants::DEFAULT_AMI_PORT;
pub use error::{ListenerError, ListenerResult};
pub use event::{CallEvent, CallEventKind};
pub use listener::{CallListener, ListenerEvent, ListenerEventStream, ListenerState};
