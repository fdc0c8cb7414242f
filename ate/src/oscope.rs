//! Oscilloscope control.
//!
//! [`Oscilloscope`] is the capability set the tools rely on, [`Oscope`] implements it for
//! InfiniiVision style scopes on top of an [`Instrument`].
use std::io;
use std::ops::{Deref, DerefMut};
use std::path::Path;

use async_trait::async_trait;

use crate::instrument::Instrument;
use crate::protocol::oscope::{
    self, AcquisitionSetup, ChannelSetup, Preamble, Timebase, TriggerSetup,
};
use crate::protocol::scpi::block_payload;
use crate::Error;

#[async_trait]
pub trait Oscilloscope: Send {
    /// Restore factory settings, clear the status registers and stop acquiring.
    async fn reset(&mut self) -> crate::Result<()>;

    async fn configure_timebase(&mut self, timebase: &Timebase) -> crate::Result<()>;

    async fn configure_channel(&mut self, channel: &ChannelSetup) -> crate::Result<()>;

    async fn configure_trigger(&mut self, trigger: &TriggerSetup) -> crate::Result<()>;

    /// Set the acquisition type and digitize the configured channel.
    async fn configure_acquisition(&mut self, acquisition: &AcquisitionSetup) -> crate::Result<()>;

    /// Store a PNG of the display at `path`. Returns the number of bytes written.
    async fn capture_screenshot(&mut self, path: &Path) -> crate::Result<usize>;

    async fn run(&mut self) -> crate::Result<()>;

    async fn single(&mut self) -> crate::Result<()>;

    async fn stop(&mut self) -> crate::Result<()>;

    async fn read_preamble(&mut self, channel: u8) -> crate::Result<Preamble>;

    async fn read_waveform(&mut self, channel: u8) -> crate::Result<Waveform>;
}

/// Samples of one channel together with the scaling needed to place them in time.
#[derive(Clone, Debug, PartialEq)]
pub struct Waveform {
    pub preamble: Preamble,
    pub volts: Vec<f64>,
}

impl Waveform {
    /// `(time in seconds, volts)` of each sample.
    pub fn samples(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.volts
            .iter()
            .enumerate()
            .map(move |(i, v)| (self.preamble.time_of(i), *v))
    }

    /// Write at most [`CSV_MAX_POINTS`] samples as `Time (ms)`, `Voltage (V)` rows.
    pub fn write_csv<W: io::Write>(&self, writer: &mut csv::Writer<W>) -> crate::Result<usize> {
        let to_err = |err: csv::Error| Error::transport(anyhow::Error::new(err));
        writer.write_record(&CSV_HEADER).map_err(to_err)?;
        let mut count = 0;
        for (t, v) in self.samples().take(CSV_MAX_POINTS) {
            writer
                .write_record(&[(t * 1e3).to_string(), v.to_string()])
                .map_err(to_err)?;
            count += 1;
        }
        writer.flush()?;
        Ok(count)
    }
}

pub const CSV_HEADER: [&str; 2] = ["Time (ms)", "Voltage (V)"];

/// Number of samples in one screen of an InfiniiVision waveform readout.
pub const CSV_MAX_POINTS: usize = 1000;

pub struct Oscope {
    inner: Instrument,
}

impl Oscope {
    pub fn new(inner: Instrument) -> Self {
        Self { inner }
    }

    async fn write_all(&mut self, commands: Vec<String>) -> crate::Result<()> {
        for cmd in commands {
            self.inner.write(&cmd).await?;
        }
        Ok(())
    }

    async fn select_waveform(&mut self, channel: u8) -> crate::Result<()> {
        self.inner.write(&oscope::waveform_source(channel)).await?;
        self.inner.write(oscope::WAVEFORM_FORMAT_ASCII).await
    }
}

#[async_trait]
impl Oscilloscope for Oscope {
    async fn reset(&mut self) -> crate::Result<()> {
        for cmd in oscope::RESET.iter() {
            self.inner.write(cmd).await?;
        }
        self.stop().await
    }

    async fn configure_timebase(&mut self, timebase: &Timebase) -> crate::Result<()> {
        self.write_all(timebase.commands()).await
    }

    async fn configure_channel(&mut self, channel: &ChannelSetup) -> crate::Result<()> {
        self.write_all(channel.commands()).await
    }

    async fn configure_trigger(&mut self, trigger: &TriggerSetup) -> crate::Result<()> {
        self.write_all(trigger.commands()).await
    }

    async fn configure_acquisition(&mut self, acquisition: &AcquisitionSetup) -> crate::Result<()> {
        self.write_all(acquisition.commands()).await
    }

    async fn capture_screenshot(&mut self, path: &Path) -> crate::Result<usize> {
        self.inner.write(oscope::SCREENSHOT).await?;
        let data = self.inner.read_raw().await?;
        tokio::fs::write(path, &data).await?;
        log::info!("Wrote {} bytes to {}", data.len(), path.display());
        Ok(data.len())
    }

    async fn run(&mut self) -> crate::Result<()> {
        self.inner.write(oscope::RUN).await
    }

    async fn single(&mut self) -> crate::Result<()> {
        self.inner.write(oscope::SINGLE).await
    }

    async fn stop(&mut self) -> crate::Result<()> {
        self.inner.write(oscope::STOP).await
    }

    async fn read_preamble(&mut self, channel: u8) -> crate::Result<Preamble> {
        self.select_waveform(channel).await?;
        let reply = self.inner.query(oscope::WAVEFORM_PREAMBLE).await?;
        Preamble::parse(&reply)
    }

    async fn read_waveform(&mut self, channel: u8) -> crate::Result<Waveform> {
        let preamble = self.read_preamble(channel).await?;
        self.inner.write(oscope::WAVEFORM_DATA).await?;
        let data = self.inner.read_raw().await?;
        let payload = block_payload(&data)?;
        let payload = std::str::from_utf8(payload)
            .map_err(|_| Error::unexpected_response("Waveform data is not ASCII"))?;
        let volts = oscope::parse_ascii_waveform(payload)?;
        log::debug!("Read {} samples from CHANNEL{}", volts.len(), channel);
        Ok(Waveform { preamble, volts })
    }
}

impl Deref for Oscope {
    type Target = Instrument;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for Oscope {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::oscope::{Slope, SweepMode};
    use crate::sim::{SimBus, SimInstrument};

    async fn open_sim(sim: SimInstrument) -> Oscope {
        let bus = SimBus::new().with("SIM::SCOPE", sim.clone());
        let mut scope = Oscope::new(Instrument::new(None));
        scope.open(&bus, Some("SIM::SCOPE")).await.unwrap();
        sim.clear_writes();
        scope
    }

    #[tokio::test]
    async fn screenshot_is_written_verbatim() {
        let data: Vec<u8> = (0..=255).cycle().take(4321).collect();
        let sim = SimInstrument::oscilloscope().with_screenshot(data.clone());
        let mut scope = open_sim(sim.clone()).await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("screen.png");
        let written = scope.capture_screenshot(&path).await.unwrap();
        assert_eq!(written, 4321);
        assert_eq!(std::fs::read(&path).unwrap(), data);
        assert_eq!(sim.writes(), vec![":DISPLAY:DATA? PNG, SCREEN, COLOR"]);
    }

    #[tokio::test]
    async fn setup_sequence() {
        let sim = SimInstrument::oscilloscope();
        let mut scope = open_sim(sim.clone()).await;
        scope.reset().await.unwrap();
        scope
            .configure_timebase(&Timebase {
                range: 0.005,
                delay: 0.0,
            })
            .await
            .unwrap();
        scope.configure_channel(&ChannelSetup::default()).await.unwrap();
        scope
            .configure_trigger(&TriggerSetup {
                sweep: SweepMode::Normal,
                level: 1.5,
                slope: Slope::Positive,
            })
            .await
            .unwrap();
        scope.configure_acquisition(&AcquisitionSetup::default()).await.unwrap();
        scope.single().await.unwrap();
        assert_eq!(
            sim.writes(),
            vec![
                "*RST",
                "*CLS",
                ":STOP",
                ":TIMEBASE:MODE MAIN",
                ":TIMEBASE:RANGE 5.000000e-03",
                ":TIMEBASE:DELAY 0.000000e+00",
                ":CHANNEL1:PROBE 10",
                ":CHANNEL1:RANGE 4.000000e+00",
                ":CHANNEL1:OFFSET 1.500000e+00",
                ":TRIGGER:SWEEP NORMAL",
                ":TRIGGER:LEVEL 1.5",
                ":TRIGGER:SLOPE POSITIVE",
                ":ACQUIRE:TYPE NORMAL",
                ":ACQUIRE:COMPLETE 100",
                ":DIGITIZE CHANNEL1",
                ":SINGLE",
            ]
        );
    }

    #[tokio::test]
    async fn waveform_readout() {
        let sim = SimInstrument::oscilloscope().with_waveform(1e-3, -2e-3, vec![0.5, 1.0, -0.25]);
        let mut scope = open_sim(sim.clone()).await;
        let waveform = scope.read_waveform(2).await.unwrap();
        assert_eq!(waveform.preamble.points, 3);
        assert_eq!(waveform.volts, vec![0.5, 1.0, -0.25]);
        let times: Vec<_> = waveform.samples().map(|(t, _)| t).collect();
        assert!((times[0] + 2e-3).abs() < 1e-12);
        assert!((times[2] - 0.0).abs() < 1e-12);
        assert_eq!(&sim.writes()[..2], &[":WAVEFORM:SOURCE CHANNEL2", ":WAVEFORM:FORMAT ASCII"]);
    }

    #[test]
    fn waveform_csv_is_in_milliseconds() {
        let preamble =
            Preamble::parse("+4,+0,+1200,+1,+1.00000E-06,-5.00000E-04,+0,+1,+0,+0").unwrap();
        let waveform = Waveform {
            preamble,
            volts: vec![0.25; 1200],
        };
        let mut writer = csv::Writer::from_writer(Vec::new());
        assert_eq!(waveform.write_csv(&mut writer).unwrap(), 1000);

        let data = writer.into_inner().unwrap();
        let mut reader = csv::Reader::from_reader(data.as_slice());
        assert_eq!(reader.headers().unwrap(), vec!["Time (ms)", "Voltage (V)"]);
        let rows: Vec<csv::StringRecord> = reader.records().map(|x| x.unwrap()).collect();
        assert_eq!(rows.len(), 1000);
        let first: f64 = rows[0][0].parse().unwrap();
        let second: f64 = rows[1][0].parse().unwrap();
        assert!((first + 0.5).abs() < 1e-9);
        assert!((second - first - 1e-3).abs() < 1e-9);
        assert_eq!(&rows[999][1], "0.25");
    }
}
