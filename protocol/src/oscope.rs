//! SCPI command set of InfiniiVision-style oscilloscopes.
use std::fmt::{self, Display, Formatter};

use crate::scpi::{format_float, format_sci, parse_number};
use crate::Error;

pub const RESET: [&str; 2] = ["*RST", "*CLS"];
pub const RUN: &str = ":RUN";
pub const SINGLE: &str = ":SINGLE";
pub const STOP: &str = ":STOP";
pub const SCREENSHOT: &str = ":DISPLAY:DATA? PNG, SCREEN, COLOR";
pub const WAVEFORM_FORMAT_ASCII: &str = ":WAVEFORM:FORMAT ASCII";
pub const WAVEFORM_PREAMBLE: &str = ":WAVEFORM:PREAMBLE?";
pub const WAVEFORM_DATA: &str = ":WAVEFORM:DATA?";

/// Number of averages the scope must complete before a digitize returns.
const ACQUIRE_COMPLETE: u32 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SweepMode {
    Auto,
    Normal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slope {
    Positive,
    Negative,
    Either,
    Alternate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquisitionType {
    Normal,
    Average,
    HResolution,
    Peak,
}

impl Display for SweepMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SweepMode::Auto => "AUTO",
            SweepMode::Normal => "NORMAL",
        })
    }
}

impl Display for Slope {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Slope::Positive => "POSITIVE",
            Slope::Negative => "NEGATIVE",
            Slope::Either => "EITHER",
            Slope::Alternate => "ALTERNATE",
        })
    }
}

impl Display for AcquisitionType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AcquisitionType::Normal => "NORMAL",
            AcquisitionType::Average => "AVERAGE",
            AcquisitionType::HResolution => "HRESOLUTION",
            AcquisitionType::Peak => "PEAK",
        })
    }
}

/// Horizontal settings: full-screen time range and trigger delay, in seconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Timebase {
    pub range: f64,
    pub delay: f64,
}

impl Default for Timebase {
    fn default() -> Self {
        Self {
            range: 1e-3,
            delay: 0.0,
        }
    }
}

impl Timebase {
    pub fn commands(&self) -> Vec<String> {
        vec![
            ":TIMEBASE:MODE MAIN".to_string(),
            format!(":TIMEBASE:RANGE {}", format_sci(self.range)),
            format!(":TIMEBASE:DELAY {}", format_sci(self.delay)),
        ]
    }
}

/// Vertical settings of an input channel. Range and offset are in volts at the probe tip.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChannelSetup {
    pub channel: u8,
    pub probe_gain: u32,
    pub range: f64,
    pub offset: f64,
}

impl Default for ChannelSetup {
    fn default() -> Self {
        Self {
            channel: 1,
            probe_gain: 10,
            range: 4.0,
            offset: 1.5,
        }
    }
}

impl ChannelSetup {
    pub fn commands(&self) -> Vec<String> {
        let n = self.channel;
        vec![
            format!(":CHANNEL{}:PROBE {}", n, self.probe_gain),
            format!(":CHANNEL{}:RANGE {}", n, format_sci(self.range)),
            format!(":CHANNEL{}:OFFSET {}", n, format_sci(self.offset)),
        ]
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TriggerSetup {
    pub sweep: SweepMode,
    pub level: f64,
    pub slope: Slope,
}

impl Default for TriggerSetup {
    fn default() -> Self {
        Self {
            sweep: SweepMode::Normal,
            level: 1.0,
            slope: Slope::Positive,
        }
    }
}

impl TriggerSetup {
    pub fn commands(&self) -> Vec<String> {
        vec![
            format!(":TRIGGER:SWEEP {}", self.sweep),
            format!(":TRIGGER:LEVEL {}", format_float(self.level)),
            format!(":TRIGGER:SLOPE {}", self.slope),
        ]
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AcquisitionSetup {
    pub kind: AcquisitionType,
    pub channel: u8,
}

impl Default for AcquisitionSetup {
    fn default() -> Self {
        Self {
            kind: AcquisitionType::Normal,
            channel: 1,
        }
    }
}

impl AcquisitionSetup {
    pub fn commands(&self) -> Vec<String> {
        vec![
            format!(":ACQUIRE:TYPE {}", self.kind),
            format!(":ACQUIRE:COMPLETE {}", ACQUIRE_COMPLETE),
            format!(":DIGITIZE CHANNEL{}", self.channel),
        ]
    }
}

pub fn waveform_source(channel: u8) -> String {
    format!(":WAVEFORM:SOURCE CHANNEL{}", channel)
}

/// Scaling information returned by `:WAVEFORM:PREAMBLE?`.
#[derive(Clone, Debug, PartialEq)]
pub struct Preamble {
    pub format: u32,
    pub kind: u32,
    pub points: u32,
    pub count: u32,
    pub xincrement: f64,
    pub xorigin: f64,
    pub xreference: f64,
    pub yincrement: f64,
    pub yorigin: f64,
    pub yreference: f64,
}

impl Preamble {
    pub fn parse(reply: &str) -> crate::Result<Self> {
        let fields: Vec<&str> = reply.trim().split(',').collect();
        if fields.len() != 10 {
            return Err(Error::unexpected_response(reply.trim()));
        }
        let mut values = Vec::with_capacity(10);
        for field in fields {
            values.push(parse_number(field)?);
        }
        Ok(Self {
            format: values[0] as u32,
            kind: values[1] as u32,
            points: values[2] as u32,
            count: values[3] as u32,
            xincrement: values[4],
            xorigin: values[5],
            xreference: values[6],
            yincrement: values[7],
            yorigin: values[8],
            yreference: values[9],
        })
    }

    /// Time in seconds of sample `index`.
    pub fn time_of(&self, index: usize) -> f64 {
        index as f64 * self.xincrement + self.xorigin
    }
}

/// Parse the payload of an ASCII waveform block into volts.
pub fn parse_ascii_waveform(payload: &str) -> crate::Result<Vec<f64>> {
    payload
        .split(',')
        .map(str::trim)
        .filter(|x| !x.is_empty())
        .map(parse_number)
        .collect()
}
