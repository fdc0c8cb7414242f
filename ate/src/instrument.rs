//! A handle to one instrument on the bus.
use std::time::Duration;

use anyhow::anyhow;

use crate::bus::Bus;
use crate::transport::Transport;
use crate::{Error, Identity};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

const IDN: &str = "*IDN?";

/// Owns at most one connection. Opening again replaces the previous connection.
pub struct Instrument {
    resource: Option<String>,
    transport: Option<Box<dyn Transport>>,
    id: Option<Identity>,
    timeout: Duration,
}

impl Instrument {
    pub fn new(resource: Option<String>) -> Self {
        Self {
            resource,
            transport: None,
            id: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Connect to `resource`, or to the resource given at construction, and read the identity.
    pub async fn open(
        &mut self,
        bus: &dyn Bus,
        resource: Option<&str>,
    ) -> crate::Result<&Identity> {
        let resource = match resource {
            Some(x) => x.to_string(),
            None => self
                .resource
                .clone()
                .ok_or_else(|| Error::argument(anyhow!("No resource to open")))?,
        };
        self.close().await?;

        let mut transport = bus.open(&resource, self.timeout).await?;
        let reply = match transport.query(IDN).await {
            Ok(x) => x,
            Err(err) => {
                if let Err(close_err) = transport.close().await {
                    log::warn!("Closing {} failed: {}", resource, close_err);
                }
                return Err(err);
            }
        };
        let id = Identity::parse(&reply);
        log::info!("Opened {}: {}", resource, id);

        self.resource = Some(resource);
        self.transport = Some(transport);
        Ok(self.id.get_or_insert(id))
    }

    pub async fn close(&mut self) -> crate::Result<()> {
        self.id = None;
        if let Some(mut transport) = self.transport.take() {
            if let Some(resource) = &self.resource {
                log::info!("Closing {}", resource);
            }
            transport.close().await?;
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    /// Identity reported by the instrument when it was opened.
    pub fn id(&self) -> Option<&Identity> {
        self.id.as_ref()
    }

    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn transport(&mut self) -> crate::Result<&mut Box<dyn Transport>> {
        self.transport.as_mut().ok_or(Error::NotConnected)
    }

    pub async fn write(&mut self, msg: &str) -> crate::Result<()> {
        self.transport()?.write(msg).await
    }

    pub async fn read(&mut self) -> crate::Result<String> {
        self.transport()?.read().await
    }

    pub async fn read_raw(&mut self) -> crate::Result<Vec<u8>> {
        self.transport()?.read_raw().await
    }

    pub async fn query(&mut self, msg: &str) -> crate::Result<String> {
        self.transport()?.query(msg).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::IdentityField;
    use crate::sim::{SimBus, SimInstrument};

    #[tokio::test]
    async fn open_reads_identity() {
        let bus = SimBus::new().with("SIM::A", SimInstrument::new("ACME,PSU-9,SN42,1.2.3"));
        let mut instr = Instrument::new(Some("SIM::A".to_string()));
        let id = instr.open(&bus, None).await.unwrap();
        assert_eq!(id.get(IdentityField::Manufacturer), Some("ACME"));
        assert_eq!(id.get(IdentityField::Model), Some("PSU-9"));
        assert_eq!(id.get(IdentityField::SerialNumber), Some("SN42"));
        assert_eq!(id.get(IdentityField::FirmwareVersion), Some("1.2.3"));
        assert!(instr.is_open());
    }

    #[tokio::test]
    async fn short_identity_is_partial() {
        let bus = SimBus::new().with("SIM::A", SimInstrument::new("ACME,PSU-9"));
        let mut instr = Instrument::new(None);
        let id = instr.open(&bus, Some("SIM::A")).await.unwrap();
        assert_eq!(id.len(), 2);
        assert_eq!(id.get(IdentityField::SerialNumber), None);
        assert_eq!(instr.resource(), Some("SIM::A"));
    }

    #[tokio::test]
    async fn open_replaces_connection() {
        let a = SimInstrument::new("ACME,A,1,1");
        let b = SimInstrument::new("ACME,B,2,1");
        let bus = SimBus::new().with("SIM::A", a.clone()).with("SIM::B", b.clone());
        let mut instr = Instrument::new(None);
        instr.open(&bus, Some("SIM::A")).await.unwrap();
        assert_eq!(a.open_sessions(), 1);

        instr.open(&bus, Some("SIM::B")).await.unwrap();
        assert_eq!(a.open_sessions(), 0);
        assert_eq!(b.open_sessions(), 1);
        assert_eq!(instr.id().and_then(|x| x.get(IdentityField::Model)), Some("B"));

        instr.close().await.unwrap();
        assert_eq!(b.open_sessions(), 0);
        assert!(instr.id().is_none());
        // closing twice is fine
        instr.close().await.unwrap();
    }

    #[tokio::test]
    async fn closed_handle_is_not_connected() {
        let mut instr = Instrument::new(None);
        assert!(matches!(instr.write("*RST").await, Err(Error::NotConnected)));
        assert!(matches!(instr.query("*IDN?").await, Err(Error::NotConnected)));
        assert!(matches!(instr.open(&SimBus::new(), None).await, Err(Error::Argument(_))));
    }
}
