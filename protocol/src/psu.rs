//! SCPI command set of multi-channel bench supplies (SPD3303 style).
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use crate::scpi::format_plain;

/// Quantity read back or measured on an output channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Quantity {
    Voltage,
    Current,
    Power,
}

impl Quantity {
    fn keyword(&self) -> &'static str {
        match self {
            Quantity::Voltage => "VOLTAGE",
            Quantity::Current => "CURRENT",
            Quantity::Power => "POWER",
        }
    }
}

/// How the two main channels of the supply are coupled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tracking {
    Independent,
    Series,
    Parallel,
}

impl Tracking {
    fn code(&self) -> u8 {
        match self {
            Tracking::Independent => 0,
            Tracking::Series => 1,
            Tracking::Parallel => 2,
        }
    }

    /// Coupled modes drive a second channel which is logged alongside the first one.
    pub fn is_coupled(&self) -> bool {
        !matches!(self, Tracking::Independent)
    }
}

impl Default for Tracking {
    fn default() -> Self {
        Tracking::Independent
    }
}

impl FromStr for Tracking {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "independent" | "0" => Ok(Tracking::Independent),
            "series" | "1" => Ok(Tracking::Series),
            "parallel" | "2" => Ok(Tracking::Parallel),
            _ => Err(crate::Error::argument(anyhow::anyhow!(
                "Invalid tracking mode `{}`",
                s
            ))),
        }
    }
}

impl Display for Tracking {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tracking::Independent => "independent",
            Tracking::Series => "series",
            Tracking::Parallel => "parallel",
        };
        f.write_str(name)
    }
}

pub fn select_channel(ch: u8) -> String {
    format!("CH{}", ch)
}

pub fn set_voltage(ch: u8, volts: f64) -> String {
    format!("CH{}:VOLTAGE {}", ch, format_plain(volts))
}

pub fn set_current(ch: u8, amps: f64) -> String {
    format!("CH{}:CURRENT {}", ch, format_plain(amps))
}

/// Query the programmed limit of `quantity`. Power has no setpoint and is only measured.
pub fn setpoint(ch: u8, quantity: Quantity) -> String {
    format!("CH{}:{}?", ch, quantity.keyword())
}

pub fn measure(ch: u8, quantity: Quantity) -> String {
    format!("MEASURE:{}? CH{}", quantity.keyword(), ch)
}

pub fn output(ch: u8, enable: bool) -> String {
    format!("OUTPUT CH{},{}", ch, if enable { "ON" } else { "OFF" })
}

pub fn tracking(mode: Tracking) -> String {
    format!("OUTPUT:TRACK {}", mode.code())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setpoints_keep_plain_decimals() {
        assert_eq!(set_voltage(1, 24.0), "CH1:VOLTAGE 24");
        assert_eq!(set_voltage(2, 3.3), "CH2:VOLTAGE 3.3");
        assert_eq!(set_current(1, 1.5), "CH1:CURRENT 1.5");
    }

    #[test]
    fn queries() {
        assert_eq!(select_channel(2), "CH2");
        assert_eq!(setpoint(1, Quantity::Voltage), "CH1:VOLTAGE?");
        assert_eq!(setpoint(3, Quantity::Current), "CH3:CURRENT?");
        assert_eq!(measure(1, Quantity::Voltage), "MEASURE:VOLTAGE? CH1");
        assert_eq!(measure(2, Quantity::Power), "MEASURE:POWER? CH2");
    }

    #[test]
    fn outputs() {
        assert_eq!(output(1, true), "OUTPUT CH1,ON");
        assert_eq!(output(3, false), "OUTPUT CH3,OFF");
        assert_eq!(tracking(Tracking::Series), "OUTPUT:TRACK 1");
        assert_eq!(tracking(Tracking::Parallel), "OUTPUT:TRACK 2");
    }

    #[test]
    fn parse_tracking() {
        assert_eq!("Series".parse::<Tracking>().unwrap(), Tracking::Series);
        assert_eq!("0".parse::<Tracking>().unwrap(), Tracking::Independent);
        assert!("diagonal".parse::<Tracking>().is_err());
        assert!(Tracking::Parallel.is_coupled());
        assert!(!Tracking::default().is_coupled());
    }
}
