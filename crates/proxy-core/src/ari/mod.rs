//! Asterisk REST Interface surface used by the proxy
//!
//! - [`events`]: typed view over the event stream
//! - [`rest`]: REST calls executed on behalf of dialogues
//! - [`stream`]: sources of the per-application event stream

pub mod events;
pub mod rest;
pub mod stream;

pub use events::{AriEvent, Bridge, Channel, EventPayload, LiveRecording, Playback};
pub use rest::{AriRequest, AriResponse, AriRestClient, HttpAriClient, Method};
pub use stream::{ConnectionState, EventSource, ManualEventSource, StreamItem, WebSocketEventSource};
