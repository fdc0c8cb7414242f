//! Periodic measurement logging of a power supply to CSV.
use std::future::Future;
use std::io;
use std::time::{Duration, Instant};

use tokio::time::interval;

use crate::protocol::psu::Tracking;
use crate::psu::PowerSupply;
use crate::Error;

pub const TIME_COLUMN: &str = "Time(s)";
pub const MEASUREMENT_COLUMNS: [&str; 3] = ["Voltage (V)", "Current (A)", "Power (W)"];

/// Column names for a log of `channels` channels.
pub fn header(channels: usize) -> Vec<&'static str> {
    let mut ret = vec![TIME_COLUMN];
    for _ in 0..channels {
        ret.extend_from_slice(&MEASUREMENT_COLUMNS);
    }
    ret
}

#[derive(Clone, Debug)]
pub struct PollOptions {
    pub channels: Vec<u8>,
    pub interval: Duration,
    /// Stop after this many rows. Runs until stopped otherwise.
    pub samples: Option<usize>,
}

impl PollOptions {
    /// Channel 1, plus channel 2 when the supply couples it to channel 1.
    pub fn for_tracking(tracking: Tracking, interval: Duration, samples: Option<usize>) -> Self {
        let channels = if tracking.is_coupled() { vec![1, 2] } else { vec![1] };
        Self {
            channels,
            interval,
            samples,
        }
    }
}

fn csv_error(err: csv::Error) -> Error {
    Error::transport(anyhow::Error::new(err))
}

/// Measure every `options.interval` and append a row to `writer` until the sample count is reached
/// or `stop` completes. Returns the number of rows written.
///
/// The header is written first. Each row is flushed right away so the log survives an abort.
pub async fn poll<W, F>(
    psu: &mut PowerSupply,
    writer: &mut csv::Writer<W>,
    options: &PollOptions,
    stop: F,
) -> crate::Result<usize>
where
    W: io::Write,
    F: Future<Output = ()>,
{
    writer
        .write_record(header(options.channels.len()))
        .map_err(csv_error)?;
    writer.flush()?;

    let start = Instant::now();
    let mut ticker = interval(options.interval);
    tokio::pin!(stop);

    let mut count = 0;
    loop {
        if options.samples.map_or(false, |n| count >= n) {
            break;
        }
        tokio::select! {
            biased;
            _ = &mut stop => {
                log::info!("Logging stopped after {} samples", count);
                break;
            }
            _ = ticker.tick() => {}
        }
        let mut row = vec![format!("{:.6}", start.elapsed().as_secs_f64())];
        for ch in &options.channels {
            let reading = psu.measure(*ch).await?;
            row.push(reading.voltage.to_string());
            row.push(reading.current.to_string());
            row.push(reading.power.to_string());
        }
        log::debug!("{}", row.join(", "));
        writer.write_record(&row).map_err(csv_error)?;
        writer.flush()?;
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::Instrument;
    use crate::sim::{SimBus, SimInstrument};

    async fn open_sim() -> PowerSupply {
        let bus = SimBus::new().with("SIM::PSU", SimInstrument::power_supply());
        let mut psu = PowerSupply::new(Instrument::new(None));
        psu.open(&bus, Some("SIM::PSU")).await.unwrap();
        psu.set_voltage(1, 12.0).await.unwrap();
        psu.set_current(1, 0.25).await.unwrap();
        psu.enable_output(1).await.unwrap();
        psu
    }

    #[test]
    fn coupled_header_repeats_measurements() {
        assert_eq!(header(1), vec!["Time(s)", "Voltage (V)", "Current (A)", "Power (W)"]);
        assert_eq!(header(2).len(), 7);
        assert_eq!(&header(2)[4..], &MEASUREMENT_COLUMNS);
    }

    #[tokio::test]
    async fn three_samples() {
        let mut psu = open_sim().await;
        let options =
            PollOptions::for_tracking(Tracking::Independent, Duration::from_millis(10), Some(3));
        let mut writer = csv::Writer::from_writer(Vec::new());
        let count = poll(&mut psu, &mut writer, &options, std::future::pending())
            .await
            .unwrap();
        assert_eq!(count, 3);

        let data = writer.into_inner().unwrap();
        let mut reader = csv::Reader::from_reader(data.as_slice());
        assert_eq!(
            reader.headers().unwrap(),
            vec!["Time(s)", "Voltage (V)", "Current (A)", "Power (W)"]
        );
        let rows: Vec<csv::StringRecord> = reader.records().map(|x| x.unwrap()).collect();
        assert_eq!(rows.len(), 3);
        let times: Vec<f64> = rows.iter().map(|x| x[0].parse().unwrap()).collect();
        assert!(times.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(&rows[0][1], "12");
        assert_eq!(&rows[0][3], "3");
    }

    #[tokio::test]
    async fn stop_ends_logging() {
        let mut psu = open_sim().await;
        let options = PollOptions::for_tracking(Tracking::Series, Duration::from_millis(10), None);
        let mut writer = csv::Writer::from_writer(Vec::new());
        let count = poll(&mut psu, &mut writer, &options, async {})
            .await
            .unwrap();
        assert_eq!(count, 0);
        let data = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert_eq!(data.lines().count(), 1);
    }
}
