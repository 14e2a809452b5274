//! Wire format for the stasis remote-control protocol.
//!
//! Every message is a single-line JSON object carried in one UTF-8 text frame.
//! Three shapes exist:
//!
//! - [`Register`]: sent by the agent once, right after the connection opens
//! - [`Command`]: sent by the controller to suspend or resume applications
//! - [`Response`]: sent by the agent after every command, rejected or not
//!
//! Decoding is deliberately lenient about missing fields (they default to the
//! empty string) but strict about the outer shape: anything that is not a
//! JSON object is a [`ProtocolError`]. The connection layer turns that error
//! into a [`Response::invalid_format`] reply instead of tearing anything down.
//!
//! There is no versioning, compression or fragmentation; the transport
//! delivers whole frames.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod errors;
pub mod frame;
pub mod message;

pub use errors::{ProtocolError, Result};
pub use frame::{CloseReason, Frame};
pub use message::{Command, Register, Response, Status};
