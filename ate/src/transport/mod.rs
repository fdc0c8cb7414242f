//! Connections to a single instrument.
//!
//! A transport only moves SCPI messages; it does not know which instrument is on the other end.
use async_trait::async_trait;

use crate::protocol::{ScpiRequest, ScpiResponse};
use crate::Error;

pub mod socket;
pub mod visa;

#[async_trait]
pub trait Transport: Send {
    async fn request(&mut self, req: ScpiRequest) -> crate::Result<ScpiResponse>;

    /// Release the connection. Requests after closing fail.
    async fn close(&mut self) -> crate::Result<()>;

    async fn write(&mut self, msg: &str) -> crate::Result<()> {
        log::debug!("write: {}", msg);
        match self.request(ScpiRequest::Write(msg.to_string())).await? {
            ScpiResponse::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn read(&mut self) -> crate::Result<String> {
        match self.request(ScpiRequest::ReadString).await? {
            ScpiResponse::String(x) => Ok(x),
            other => Err(unexpected(other)),
        }
    }

    async fn read_raw(&mut self) -> crate::Result<Vec<u8>> {
        match self.request(ScpiRequest::ReadRaw).await? {
            ScpiResponse::Binary(x) => Ok(x),
            other => Err(unexpected(other)),
        }
    }

    async fn query(&mut self, msg: &str) -> crate::Result<String> {
        log::debug!("query: {}", msg);
        let ret = match self.request(ScpiRequest::QueryString(msg.to_string())).await? {
            ScpiResponse::String(x) => x,
            other => return Err(unexpected(other)),
        };
        log::debug!("reply: {}", ret);
        Ok(ret)
    }
}

fn unexpected(response: ScpiResponse) -> Error {
    Error::internal(anyhow::anyhow!("Invalid response for request: {:?}", response))
}

/// Append the line termination to `msg` unless it is already there.
pub(crate) fn terminate(mut msg: String) -> String {
    if !msg.ends_with(crate::protocol::scpi::DEFAULT_TERMINATION) {
        msg.push_str(crate::protocol::scpi::DEFAULT_TERMINATION);
    }
    msg
}
