//! Swarm peer protocol.
//!
//! Every bidirectional stream carries exactly one request and one response:
//! - Peer sends: one JSON control object
//! - Responder answers: a JSON control reply or raw chunk bytes, then
//!   finishes the stream
//!
//! ## Messages
//!
//! ```text
//! Request:  {"type":"hello"}
//! Response: {"type":"ok"}
//!
//! Request:  {"type":"request_chunk","model_id":"<id>","rev":"<rev>","length":<n>}
//! Response: <raw chunk bytes>
//!
//! Request:  not json
//! Response: {"type":"error","code":"bad_json"}
//!
//! Request:  {"type":"ping"}
//! Response: {"type":"error","code":"bad_type"}
//! ```
//!
//! `length` is optional. A stream the peer finishes without sending anything
//! is closed without a response.

pub mod handler;
pub mod parser;

pub use handler::StreamDispatcher;
