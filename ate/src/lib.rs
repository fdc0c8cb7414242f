//! Control layer for SCPI bench instruments.
//!
//! A [`bus::Bus`] opens resources and hands out [`transport::Transport`]s. An
//! [`instrument::Instrument`] owns one of these connections and knows the instrument's identity.
//! [`psu::PowerSupply`] and [`oscope::Oscope`] add the device specific command sets on top.

#[macro_use]
extern crate dlopen_derive;

pub mod address;
pub mod bus;
pub mod cli;
pub mod instrument;
pub mod logger;
pub mod oscope;
pub mod psu;
pub mod sim;
pub mod transport;

pub use ate_protocol as protocol;
pub use ate_protocol::{Error, Identity, ProtocolError, TransportError};

pub type Result<T> = std::result::Result<T, Error>;
