use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::spawn_blocking;

use crate::address::Address;
use crate::instrument::DEFAULT_TIMEOUT;
use crate::transport::socket::SocketTransport;
use crate::transport::visa::{VisaLibrary, VisaTransport};
use crate::transport::Transport;
use crate::Error;

/// Environment variable naming the VISA shared library to load.
pub const VISA_LIBRARY_ENV: &str = "ATE_VISA_LIBRARY";

/// VISA search expression used to enumerate instruments.
const FIND_ALL_INSTRUMENTS: &str = "?*::INSTR";

/// Enumerates resources and opens connections to them.
///
/// Created explicitly at process start and passed to every [`crate::instrument::Instrument::open`].
#[async_trait]
pub trait Bus: Send + Sync {
    async fn list_resources(&self) -> crate::Result<Vec<String>>;

    async fn open(&self, resource: &str, timeout: Duration) -> crate::Result<Box<dyn Transport>>;
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT.as_millis() as u64
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BusOptions {
    /// VISA shared library. Falls back to the platform default if unset.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub visa_library: Option<PathBuf>,
    /// Session timeout applied to every instrument opened by the tools.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for BusOptions {
    fn default() -> Self {
        Self {
            visa_library: None,
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl BusOptions {
    pub fn from_env() -> Self {
        Self {
            visa_library: env::var_os(VISA_LIBRARY_ENV).map(PathBuf::from),
            ..Default::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// The bus of a real lab setup: raw SCPI sockets natively, everything else through VISA.
pub struct ResourceManager {
    visa: Option<Arc<VisaLibrary>>,
}

impl ResourceManager {
    /// Load the VISA library.
    ///
    /// An explicitly configured library that fails to load is an error. If only the platform
    /// default is missing, the manager still serves socket resources.
    pub fn new(options: &BusOptions) -> crate::Result<Self> {
        let visa = match &options.visa_library {
            Some(path) => Some(Arc::new(VisaLibrary::load(path)?)),
            None => match VisaLibrary::load(&VisaLibrary::default_path()) {
                Ok(lib) => Some(Arc::new(lib)),
                Err(err) => {
                    log::warn!("VISA not available, only socket resources can be opened: {}", err);
                    None
                }
            },
        };
        Ok(Self { visa })
    }

    /// A manager without VISA, serving socket resources only.
    pub fn sockets_only() -> Self {
        Self { visa: None }
    }

    pub fn has_visa(&self) -> bool {
        self.visa.is_some()
    }

    fn visa(&self) -> crate::Result<Arc<VisaLibrary>> {
        self.visa
            .clone()
            .ok_or_else(|| Error::transport(anyhow!("VISA library not loaded")))
    }
}

#[async_trait]
impl Bus for ResourceManager {
    async fn list_resources(&self) -> crate::Result<Vec<String>> {
        let lib = match &self.visa {
            Some(lib) => lib.clone(),
            None => return Ok(Vec::new()),
        };
        spawn_blocking(move || lib.find_resources(FIND_ALL_INSTRUMENTS))
            .await
            .map_err(Error::internal)?
    }

    async fn open(&self, resource: &str, timeout: Duration) -> crate::Result<Box<dyn Transport>> {
        log::debug!("Opening {}", resource);
        match Address::parse(resource)? {
            Address::Socket { host, port } => {
                let transport = SocketTransport::connect(&host, port, timeout).await?;
                Ok(Box::new(transport))
            }
            Address::Visa { resource } => {
                let transport = VisaTransport::open(self.visa()?, resource, timeout).await?;
                Ok(Box::new(transport))
            }
            Address::Sim { name } => Err(Error::argument(anyhow!(
                "Simulated instrument `{}` requires the simulated bus",
                name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn open_socket_resource_without_visa() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut stream = BufReader::new(stream);
            let mut line = String::new();
            stream.read_line(&mut line).await.unwrap();
            assert_eq!(line, "*IDN?\n");
            stream.get_mut().write_all(b"ACME,SCOPE,1,2\n").await.unwrap();
        });

        let bus = ResourceManager::sockets_only();
        let resource = format!("TCPIP0::127.0.0.1::{}::SOCKET", port);
        let mut transport = bus.open(&resource, Duration::from_secs(1)).await.unwrap();
        assert_eq!(transport.query("*IDN?").await.unwrap(), "ACME,SCOPE,1,2");
        server.await.unwrap();
    }

    #[test]
    fn options_default_timeout() {
        let options: BusOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options.timeout(), Duration::from_millis(5000));
        assert!(options.visa_library.is_none());
    }

    #[tokio::test]
    async fn visa_resources_need_the_library() {
        let bus = ResourceManager::sockets_only();
        assert!(!bus.has_visa());
        assert!(bus.list_resources().await.unwrap().is_empty());
        let err = bus
            .open("USB0::0x2A8D::0x1797::CN57096245::0::INSTR", Duration::from_secs(1))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Transport(_)));
        assert!(matches!(
            bus.open("SIM::PSU", Duration::from_secs(1)).await.err().unwrap(),
            Error::Argument(_)
        ));
    }
}
