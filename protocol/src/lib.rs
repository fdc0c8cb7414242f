//! I/O free building blocks of the instrument control layer.
//!
//! Every SCPI string sent to an instrument is produced in this crate, as is every reply parser.
//! The transports and instrument wrappers live in the `ate` crate.

pub mod error;
pub mod identity;
pub mod oscope;
pub mod psu;
pub mod scpi;

pub use crate::error::{Error, ProtocolError, Result, TransportError};
pub use crate::identity::{Identity, IdentityField};
pub use crate::scpi::{ScpiRequest, ScpiResponse};
