use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::oneshot;

use super::visa_sys::{Session, VisaLibrary};
use crate::protocol::{ScpiRequest, ScpiResponse};
use crate::transport::Transport;
use crate::Error;

/// VISA session driven from a dedicated thread, since all VISA calls block.
pub struct VisaTransport {
    tx: Option<mpsc::Sender<Msg>>,
    addr: String,
}

enum Msg {
    Scpi {
        request: ScpiRequest,
        reply: oneshot::Sender<crate::Result<ScpiResponse>>,
    },
    Close {
        reply: oneshot::Sender<crate::Result<()>>,
    },
}

impl VisaTransport {
    pub async fn open<T: Into<String>>(
        lib: Arc<VisaLibrary>,
        addr: T,
        timeout: Duration,
    ) -> crate::Result<Self> {
        let addr = addr.into();
        let (tx, rx) = mpsc::channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let thread_addr = addr.clone();
        thread::spawn(move || {
            let mut session = match Session::open(lib, &thread_addr, timeout) {
                Ok(session) => {
                    let _ = ready_tx.send(Ok(()));
                    session
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };
            while let Ok(msg) = rx.recv() {
                match msg {
                    Msg::Scpi { request, reply } => {
                        let _ = reply.send(session.handle_scpi(request));
                    }
                    Msg::Close { reply } => {
                        let _ = reply.send(session.close());
                        break;
                    }
                }
            }
            log::debug!("VISA session to {} ended", session.addr());
        });

        ready_rx.await.map_err(|_| Error::internal(anyhow!("VISA thread died")))??;
        Ok(Self { tx: Some(tx), addr })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl Transport for VisaTransport {
    async fn request(&mut self, request: ScpiRequest) -> crate::Result<ScpiResponse> {
        let (reply, rx) = oneshot::channel();
        {
            let tx = self.tx.as_ref().ok_or(Error::NotConnected)?;
            tx.send(Msg::Scpi { request, reply })
                .map_err(|_| Error::internal(anyhow!("Disconnected")))?;
        }
        rx.await.map_err(|_| Error::internal(anyhow!("Disconnected")))?
    }

    async fn close(&mut self) -> crate::Result<()> {
        let tx = match self.tx.take() {
            Some(tx) => tx,
            None => return Ok(()),
        };
        let (reply, rx) = oneshot::channel();
        if tx.send(Msg::Close { reply }).is_err() {
            return Ok(());
        }
        rx.await.map_err(|_| Error::internal(anyhow!("Disconnected")))?
    }
}
