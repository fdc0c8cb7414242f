//! Programmable multi-channel bench supply.
use std::ops::{Deref, DerefMut, RangeInclusive};

use crate::bus::Bus;
use crate::instrument::Instrument;
use crate::Identity;
use crate::protocol::psu::{self, Quantity, Tracking};
use crate::protocol::scpi::parse_number;

/// Channels of a three channel supply such as the SPD3303.
pub const DEFAULT_CHANNELS: RangeInclusive<u8> = 1..=3;

/// Voltage, current and power measured on one channel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Reading {
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
}

pub struct PowerSupply {
    inner: Instrument,
    channels: RangeInclusive<u8>,
}

impl PowerSupply {
    pub fn new(inner: Instrument) -> Self {
        Self::with_channels(inner, DEFAULT_CHANNELS)
    }

    pub fn with_channels(inner: Instrument, channels: RangeInclusive<u8>) -> Self {
        Self { inner, channels }
    }

    pub fn channels(&self) -> RangeInclusive<u8> {
        self.channels.clone()
    }

    /// Open `resource` like [`Instrument::open`]. A supply that is already open has its outputs
    /// switched off before the old connection is replaced.
    pub async fn open(
        &mut self,
        bus: &dyn Bus,
        resource: Option<&str>,
    ) -> crate::Result<&Identity> {
        self.close().await?;
        self.inner.open(bus, resource).await
    }

    async fn query_number(&mut self, msg: &str) -> crate::Result<f64> {
        let reply = self.inner.query(msg).await?;
        parse_number(&reply)
    }

    pub async fn channel_select(&mut self, ch: u8) -> crate::Result<()> {
        self.inner.write(&psu::select_channel(ch)).await
    }

    pub async fn set_voltage(&mut self, ch: u8, volts: f64) -> crate::Result<()> {
        self.inner.write(&psu::set_voltage(ch, volts)).await
    }

    pub async fn set_current(&mut self, ch: u8, amps: f64) -> crate::Result<()> {
        self.inner.write(&psu::set_current(ch, amps)).await
    }

    /// Programmed voltage limit.
    pub async fn voltage(&mut self, ch: u8) -> crate::Result<f64> {
        self.query_number(&psu::setpoint(ch, Quantity::Voltage)).await
    }

    /// Programmed current limit.
    pub async fn current(&mut self, ch: u8) -> crate::Result<f64> {
        self.query_number(&psu::setpoint(ch, Quantity::Current)).await
    }

    pub async fn measure_voltage(&mut self, ch: u8) -> crate::Result<f64> {
        self.query_number(&psu::measure(ch, Quantity::Voltage)).await
    }

    pub async fn measure_current(&mut self, ch: u8) -> crate::Result<f64> {
        self.query_number(&psu::measure(ch, Quantity::Current)).await
    }

    pub async fn measure_power(&mut self, ch: u8) -> crate::Result<f64> {
        self.query_number(&psu::measure(ch, Quantity::Power)).await
    }

    pub async fn measure(&mut self, ch: u8) -> crate::Result<Reading> {
        Ok(Reading {
            voltage: self.measure_voltage(ch).await?,
            current: self.measure_current(ch).await?,
            power: self.measure_power(ch).await?,
        })
    }

    pub async fn set_output(&mut self, ch: u8, enable: bool) -> crate::Result<()> {
        self.inner.write(&psu::output(ch, enable)).await
    }

    pub async fn enable_output(&mut self, ch: u8) -> crate::Result<()> {
        self.set_output(ch, true).await
    }

    pub async fn disable_output(&mut self, ch: u8) -> crate::Result<()> {
        self.set_output(ch, false).await
    }

    pub async fn set_tracking(&mut self, mode: Tracking) -> crate::Result<()> {
        self.inner.write(&psu::tracking(mode)).await
    }

    /// Switch off every output, then close the connection.
    ///
    /// All channels are visited even if some of them fail. The first error is returned.
    pub async fn close(&mut self) -> crate::Result<()> {
        if !self.inner.is_open() {
            return Ok(());
        }
        let mut result = Ok(());
        for ch in self.channels.clone() {
            if let Err(err) = self.disable_output(ch).await {
                log::warn!("Could not disable output CH{}: {}", ch, err);
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        let closed = self.inner.close().await;
        result.and(closed)
    }
}

impl Deref for PowerSupply {
    type Target = Instrument;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for PowerSupply {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimBus, SimInstrument};

    async fn open_sim() -> (SimInstrument, PowerSupply) {
        let sim = SimInstrument::power_supply();
        let bus = SimBus::new().with("SIM::PSU", sim.clone());
        let mut psu = PowerSupply::new(Instrument::new(Some("SIM::PSU".to_string())));
        psu.open(&bus, None).await.unwrap();
        sim.clear_writes();
        (sim, psu)
    }

    #[tokio::test]
    async fn close_disables_all_channels() {
        let (sim, mut psu) = open_sim().await;
        psu.close().await.unwrap();
        assert_eq!(
            sim.writes(),
            vec!["OUTPUT CH1,OFF", "OUTPUT CH2,OFF", "OUTPUT CH3,OFF"]
        );
        assert!(!psu.is_open());
        assert_eq!(sim.open_sessions(), 0);
    }

    #[tokio::test]
    async fn setpoints_round_trip() {
        let (sim, mut psu) = open_sim().await;
        psu.set_voltage(1, 24.0).await.unwrap();
        psu.set_current(1, 1.5).await.unwrap();
        assert_eq!(psu.voltage(1).await.unwrap(), 24.0);
        assert_eq!(psu.current(1).await.unwrap(), 1.5);
        assert_eq!(sim.writes()[0], "CH1:VOLTAGE 24");
        assert_eq!(sim.writes()[1], "CH1:CURRENT 1.5");
    }

    #[tokio::test]
    async fn measurements_are_numbers() {
        let (sim, mut psu) = open_sim().await;
        psu.set_voltage(2, 5.0).await.unwrap();
        psu.set_current(2, 0.5).await.unwrap();
        psu.enable_output(2).await.unwrap();
        assert!(sim.output_enabled(2));
        let reading = psu.measure(2).await.unwrap();
        assert_eq!(
            reading,
            Reading {
                voltage: 5.0,
                current: 0.5,
                power: 2.5
            }
        );
        psu.close().await.unwrap();
        assert!(!sim.output_enabled(2));
    }

    #[tokio::test]
    async fn tracking_and_channel_select() {
        let (sim, mut psu) = open_sim().await;
        psu.channel_select(2).await.unwrap();
        psu.set_tracking(Tracking::Parallel).await.unwrap();
        assert_eq!(sim.writes(), vec!["CH2", "OUTPUT:TRACK 2"]);
    }

    #[tokio::test]
    async fn reopen_switches_old_supply_off() {
        let a = SimInstrument::power_supply();
        let b = SimInstrument::power_supply();
        let bus = SimBus::new().with("SIM::A", a.clone()).with("SIM::B", b.clone());
        let mut psu = PowerSupply::new(Instrument::new(None));
        psu.open(&bus, Some("SIM::A")).await.unwrap();
        psu.enable_output(1).await.unwrap();
        assert!(a.output_enabled(1));

        psu.open(&bus, Some("SIM::B")).await.unwrap();
        assert!(!a.output_enabled(1));
        assert_eq!(a.open_sessions(), 0);
        assert!(a.writes().ends_with(&[
            "OUTPUT CH1,OFF".to_string(),
            "OUTPUT CH2,OFF".to_string(),
            "OUTPUT CH3,OFF".to_string()
        ]));
        assert_eq!(b.open_sessions(), 1);
        assert_eq!(psu.resource(), Some("SIM::B"));
    }

    #[tokio::test]
    async fn close_on_closed_supply_sends_nothing() {
        let mut psu = PowerSupply::new(Instrument::new(None));
        psu.close().await.unwrap();
    }
}
