//! Instruments reached through the vendor VISA library, loaded at runtime.
pub use asynced::VisaTransport;
pub use visa_sys::{VisaError, VisaLibrary, VisaResult};

mod asynced;
mod visa_sys;
