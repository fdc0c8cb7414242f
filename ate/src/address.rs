use std::fmt;
use std::fmt::{Display, Formatter};

use anyhow::anyhow;

use crate::Error;

/// Where a resource string is routed to.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum Address {
    /// Handed to the VISA library unchanged.
    Visa { resource: String },
    /// Raw SCPI socket, served without VISA.
    Socket { host: String, port: u16 },
    /// In-process simulated instrument.
    Sim { name: String },
}

impl Address {
    pub fn parse(addr: &str) -> crate::Result<Self> {
        let splits: Vec<_> = addr.split("::").collect();
        if splits.len() < 2 {
            return Err(Error::argument(anyhow!("Invalid resource address: `{}`", addr)));
        }
        let kind = splits[0].to_lowercase();

        if kind == "sim" {
            // sim::psu
            Ok(Address::Sim {
                name: splits[1..].join("::"),
            })
        } else if kind.starts_with("tcpip")
            && splits[splits.len() - 1].eq_ignore_ascii_case("socket")
        {
            // TCPIP0::192.168.0.10::5025::SOCKET
            if splits.len() != 4 {
                return Err(Error::argument(anyhow!("Invalid socket address: `{}`", addr)));
            }
            let port: u16 = splits[2]
                .parse()
                .map_err(|_| Error::argument(anyhow!("Invalid port in `{}`", addr)))?;
            Ok(Address::Socket {
                host: splits[1].to_string(),
                port,
            })
        } else {
            Ok(Address::Visa {
                resource: addr.to_string(),
            })
        }
    }
}

/// Resources with less than three `::` separated parts are serial ports or aliases, not
/// instruments.
pub fn is_instrument_resource(resource: &str) -> bool {
    resource.split("::").count() > 2
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Address::Visa { resource } => f.write_str(resource),
            Address::Socket { host, port } => write!(f, "TCPIP0::{}::{}::SOCKET", host, port),
            Address::Sim { name } => write!(f, "SIM::{}", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_socket() {
        let addr = Address::parse("TCPIP0::192.168.1.10::5025::SOCKET").unwrap();
        match addr {
            Address::Socket { host, port } => {
                assert_eq!(host, "192.168.1.10");
                assert_eq!(port, 5025);
            }
            _ => panic!(),
        }
        assert!(Address::parse("TCPIP0::192.168.1.10::notaport::SOCKET").is_err());
    }

    #[test]
    fn parse_visa() {
        let addr = Address::parse("USB0::0x2A8D::0x1797::CN57096245::0::INSTR").unwrap();
        match addr {
            Address::Visa { resource } => {
                assert_eq!(resource, "USB0::0x2A8D::0x1797::CN57096245::0::INSTR")
            }
            _ => panic!(),
        }
        let addr = Address::parse("TCPIP0::192.168.1.10::inst0::INSTR").unwrap();
        assert!(matches!(addr, Address::Visa { .. }));
    }

    #[test]
    fn parse_sim() {
        let addr = Address::parse("SIM::PSU").unwrap();
        assert_eq!(addr, Address::Sim { name: "PSU".to_string() });
        assert_eq!(addr.to_string(), "SIM::PSU");
    }

    #[test]
    fn reject_garbage() {
        assert!(Address::parse("foobar").is_err());
    }

    #[test]
    fn filter_serial_ports() {
        assert!(!is_instrument_resource("ASRL1::INSTR"));
        assert!(is_instrument_resource("GPIB0::12::INSTR"));
    }
}
