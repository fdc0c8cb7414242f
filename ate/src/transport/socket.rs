//! SCPI over a raw TCP socket (`TCPIP0::<host>::<port>::SOCKET`), usually port 5025.
//!
//! Raw sockets have no end-of-message indicator. Text replies end at the line feed, binary replies
//! are IEEE 488.2 definite length blocks whose header tells us how much to read.
use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};

use super::{terminate, Transport};
use crate::protocol::scpi::strip_termination;
use crate::protocol::{ScpiRequest, ScpiResponse};
use crate::Error;

const TERM: u8 = b'\n';

pub struct SocketTransport<T = BufStream<TcpStream>> {
    stream: Option<T>,
    timeout: Duration,
}

impl SocketTransport {
    pub async fn connect(
        host: &str,
        port: u16,
        connection_timeout: Duration,
    ) -> crate::Result<Self> {
        let addr = format!("{}:{}", host, port);
        let fut = TcpStream::connect(addr.clone());
        let stream = match timeout(connection_timeout, fut).await {
            Ok(Ok(x)) => x,
            Ok(Err(x)) => return Err(Error::transport(x)),
            Err(_) => {
                return Err(Error::transport(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "Connection timed out",
                )))
            }
        };
        stream.set_nodelay(true).map_err(Error::transport)?;
        log::debug!("Connected to {}", addr);
        Ok(Self::new(BufStream::new(stream), connection_timeout))
    }
}

impl<T: AsyncBufRead + AsyncWrite + Unpin + Send> SocketTransport<T> {
    pub fn new(stream: T, timeout: Duration) -> Self {
        Self {
            stream: Some(stream),
            timeout,
        }
    }
}

#[async_trait]
impl<T: AsyncBufRead + AsyncWrite + Unpin + Send> Transport for SocketTransport<T> {
    async fn request(&mut self, req: ScpiRequest) -> crate::Result<ScpiResponse> {
        let duration = self.timeout;
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
        match timeout(duration, handle(stream, req)).await {
            Ok(x) => x,
            Err(_) => Err(Error::protocol_timeout()),
        }
    }

    async fn close(&mut self) -> crate::Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await.map_err(Error::transport)?;
        }
        Ok(())
    }
}

async fn handle<T: AsyncBufRead + AsyncWrite + Unpin>(
    stream: &mut T,
    req: ScpiRequest,
) -> crate::Result<ScpiResponse> {
    match req {
        ScpiRequest::Write(msg) => {
            write_line(stream, msg).await?;
            Ok(ScpiResponse::Done)
        }
        ScpiRequest::QueryString(msg) => {
            write_line(stream, msg).await?;
            read_line(stream).await.map(ScpiResponse::String)
        }
        ScpiRequest::ReadString => read_line(stream).await.map(ScpiResponse::String),
        ScpiRequest::ReadRaw => read_block(stream).await.map(ScpiResponse::Binary),
    }
}

async fn write_line<T: AsyncWrite + Unpin>(stream: &mut T, msg: String) -> crate::Result<()> {
    let msg = terminate(msg);
    stream.write_all(msg.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_line<T: AsyncBufRead + Unpin>(stream: &mut T) -> crate::Result<String> {
    let mut ret = Vec::new();
    let n = stream.read_until(TERM, &mut ret).await?;
    if n == 0 {
        return Err(Error::transport(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "Connection closed by instrument",
        )));
    }
    let ret = String::from_utf8(ret)
        .map_err(|_| Error::unexpected_response("Reply is not valid UTF-8"))?;
    Ok(strip_termination(&ret).to_string())
}

/// Read one reply verbatim, including block header and termination.
async fn read_block<T: AsyncBufRead + Unpin>(stream: &mut T) -> crate::Result<Vec<u8>> {
    let first = stream.read_u8().await?;
    let mut ret = vec![first];
    if first != b'#' {
        stream.read_until(TERM, &mut ret).await?;
        return Ok(ret);
    }
    let digits = stream.read_u8().await?;
    ret.push(digits);
    let digits = (digits as char).to_digit(10).ok_or_else(Error::invalid_binary_header)? as usize;
    if digits == 0 {
        // indefinite length block, runs until the termination
        stream.read_until(TERM, &mut ret).await?;
        return Ok(ret);
    }
    let mut length = vec![0; digits];
    stream.read_exact(&mut length).await?;
    ret.extend_from_slice(&length);
    let length: usize = String::from_utf8(length)
        .ok()
        .and_then(|x| x.parse().ok())
        .ok_or_else(Error::invalid_binary_header)?;
    let mut data = vec![0; length];
    stream.read_exact(&mut data).await?;
    ret.extend_from_slice(&data);
    let buffered = stream.fill_buf().await?;
    if buffered.first() == Some(&TERM) {
        stream.consume(1);
        ret.push(TERM);
    }
    Ok(ret)
}
