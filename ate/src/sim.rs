//! In-process instruments for running the tools and tests without hardware.
//!
//! A [`SimInstrument`] understands just enough of the supply and oscilloscope command sets to
//! behave like the real thing: setpoints are remembered and echoed back, measurements follow the
//! setpoints while the output is on, and display/waveform queries return canned data. Every
//! message written to it is recorded for inspection.
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::bus::Bus;
use crate::protocol::oscope;
use crate::protocol::scpi::format_sci;
use crate::protocol::{ScpiRequest, ScpiResponse};
use crate::transport::Transport;
use crate::Error;

const PSU_IDN: &str = "Siglent Technologies,SPD3303X-E,SPD3XIDD4R0001,1.01.01.02.07R2,V3.0";
const SCOPE_IDN: &str = "KEYSIGHT TECHNOLOGIES,DSO-X 1102G,CN57096245,02.12.2021071625";

/// Smallest valid PNG: signature, header of a 1x1 image, data and end chunks.
const PLACEHOLDER_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4,
    0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE,
    0x42, 0x60, 0x82,
];

#[derive(Default)]
struct State {
    idn: String,
    writes: Vec<String>,
    settings: HashMap<String, String>,
    outputs: HashMap<u8, bool>,
    pending: VecDeque<Vec<u8>>,
    screenshot: Vec<u8>,
    xincrement: f64,
    xorigin: f64,
    waveform: Vec<f64>,
    open_sessions: usize,
}

/// Handle to a simulated instrument. Clones share the same state.
#[derive(Clone, Default)]
pub struct SimInstrument {
    state: Arc<Mutex<State>>,
}

impl SimInstrument {
    pub fn new<T: Into<String>>(idn: T) -> Self {
        let ret = Self::default();
        ret.lock().idn = idn.into();
        ret
    }

    pub fn power_supply() -> Self {
        Self::new(PSU_IDN)
    }

    /// An oscilloscope showing one period of a 1 kHz sine over a 5 ms window.
    pub fn oscilloscope() -> Self {
        let xincrement = 5e-6;
        let waveform = (0..1000)
            .map(|i| 1.5 + (2.0 * std::f64::consts::PI * 1e3 * i as f64 * xincrement).sin())
            .collect();
        Self::new(SCOPE_IDN)
            .with_screenshot(PLACEHOLDER_PNG.to_vec())
            .with_waveform(xincrement, -2.5e-3, waveform)
    }

    pub fn with_screenshot(self, data: Vec<u8>) -> Self {
        self.lock().screenshot = data;
        self
    }

    pub fn with_waveform(self, xincrement: f64, xorigin: f64, volts: Vec<f64>) -> Self {
        {
            let mut state = self.lock();
            state.xincrement = xincrement;
            state.xorigin = xorigin;
            state.waveform = volts;
        }
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(x) => x,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// All messages written so far, in order, without termination.
    pub fn writes(&self) -> Vec<String> {
        self.lock().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }

    pub fn output_enabled(&self, ch: u8) -> bool {
        self.lock().outputs.get(&ch).copied().unwrap_or(false)
    }

    pub fn setting(&self, key: &str) -> Option<String> {
        self.lock().settings.get(key).cloned()
    }

    /// Number of transports currently connected to this instrument.
    pub fn open_sessions(&self) -> usize {
        self.lock().open_sessions
    }

    fn setpoint(state: &State, key: &str) -> f64 {
        state
            .settings
            .get(key)
            .and_then(|x| x.parse().ok())
            .unwrap_or(0.0)
    }

    fn measure(state: &State, quantity: &str, channel: &str) -> f64 {
        let ch: u8 = channel.trim_start_matches("CH").parse().unwrap_or(0);
        if !state.outputs.get(&ch).copied().unwrap_or(false) {
            return 0.0;
        }
        let volts = Self::setpoint(state, &format!("{}:VOLTAGE", channel));
        let amps = Self::setpoint(state, &format!("{}:CURRENT", channel));
        match quantity {
            "VOLTAGE" => volts,
            "CURRENT" => amps,
            _ => volts * amps,
        }
    }

    fn answer(state: &State, msg: &str) -> Option<Vec<u8>> {
        if msg == "*IDN?" {
            return Some(state.idn.clone().into_bytes());
        }
        if msg == oscope::SCREENSHOT {
            return Some(state.screenshot.clone());
        }
        if msg == oscope::WAVEFORM_PREAMBLE {
            let points = state.waveform.len();
            let preamble = format!(
                "+4,+0,+{},+1,{},{},+0,+4.00000E-02,+0.00000E+00,+128",
                points,
                format_sci(state.xincrement),
                format_sci(state.xorigin)
            );
            return Some(preamble.into_bytes());
        }
        if msg == oscope::WAVEFORM_DATA {
            let payload: Vec<_> = state.waveform.iter().map(|x| format_sci(*x)).collect();
            let payload = payload.join(",");
            return Some(format!("#8{:08}{}\n", payload.len(), payload).into_bytes());
        }
        if let Some(channel) = msg.strip_prefix("MEASURE:") {
            let (quantity, channel) = channel.split_once("? ")?;
            return Some(format!("{:.3}", Self::measure(state, quantity, channel)).into_bytes());
        }
        if let Some(key) = msg.strip_suffix('?') {
            return Some(Self::setpoint(state, key).to_string().into_bytes());
        }
        None
    }

    fn handle_write(&self, msg: &str) {
        let msg = msg.trim_end_matches('\n');
        let mut state = self.lock();
        state.writes.push(msg.to_string());

        if msg.contains('?') {
            if let Some(reply) = Self::answer(&state, msg) {
                state.pending.push_back(reply);
            }
            return;
        }
        if let Some(args) = msg.strip_prefix("OUTPUT CH") {
            if let Some((ch, onoff)) = args.split_once(',') {
                if let Ok(ch) = ch.parse::<u8>() {
                    state.outputs.insert(ch, onoff == "ON");
                }
            }
            return;
        }
        if let Some((key, value)) = msg.split_once(' ') {
            state.settings.insert(key.to_string(), value.to_string());
        }
    }

    fn read(&self) -> crate::Result<Vec<u8>> {
        // a real instrument would stay silent until the bus times out
        self.lock().pending.pop_front().ok_or_else(Error::protocol_timeout)
    }
}

/// One connection to a [`SimInstrument`].
pub struct SimTransport {
    instrument: Option<SimInstrument>,
}

impl SimTransport {
    pub fn connect(instrument: SimInstrument) -> Self {
        instrument.lock().open_sessions += 1;
        Self {
            instrument: Some(instrument),
        }
    }
}

#[async_trait]
impl Transport for SimTransport {
    async fn request(&mut self, req: ScpiRequest) -> crate::Result<ScpiResponse> {
        let instrument = self.instrument.as_ref().ok_or(Error::NotConnected)?;
        match req {
            ScpiRequest::Write(msg) => {
                instrument.handle_write(&msg);
                Ok(ScpiResponse::Done)
            }
            ScpiRequest::QueryString(msg) => {
                instrument.handle_write(&msg);
                read_string(instrument).map(ScpiResponse::String)
            }
            ScpiRequest::ReadString => read_string(instrument).map(ScpiResponse::String),
            ScpiRequest::ReadRaw => instrument.read().map(ScpiResponse::Binary),
        }
    }

    async fn close(&mut self) -> crate::Result<()> {
        if let Some(instrument) = self.instrument.take() {
            instrument.lock().open_sessions -= 1;
        }
        Ok(())
    }
}

impl Drop for SimTransport {
    fn drop(&mut self) {
        if let Some(instrument) = self.instrument.take() {
            instrument.lock().open_sessions -= 1;
        }
    }
}

fn read_string(instrument: &SimInstrument) -> crate::Result<String> {
    let data = instrument.read()?;
    String::from_utf8(data).map_err(|_| Error::unexpected_response("Reply is not valid UTF-8"))
}

/// A bus populated with simulated instruments, keyed by resource string.
#[derive(Clone, Default)]
pub struct SimBus {
    instruments: Arc<Mutex<BTreeMap<String, SimInstrument>>>,
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, resource: &str, instrument: SimInstrument) -> Self {
        self.insert(resource, instrument);
        self
    }

    pub fn insert(&self, resource: &str, instrument: SimInstrument) {
        if let Ok(mut instruments) = self.instruments.lock() {
            instruments.insert(resource.to_string(), instrument);
        }
    }

    pub fn get(&self, resource: &str) -> Option<SimInstrument> {
        self.instruments.lock().ok()?.get(resource).cloned()
    }
}

#[async_trait]
impl Bus for SimBus {
    async fn list_resources(&self) -> crate::Result<Vec<String>> {
        let instruments = self
            .instruments
            .lock()
            .map_err(|_| Error::internal(anyhow::anyhow!("Simulated bus poisoned")))?;
        Ok(instruments.keys().cloned().collect())
    }

    async fn open(&self, resource: &str, _timeout: Duration) -> crate::Result<Box<dyn Transport>> {
        let instrument = self.get(resource).ok_or_else(|| {
            Error::transport(io::Error::new(
                io::ErrorKind::NotFound,
                format!("No simulated instrument at `{}`", resource),
            ))
        })?;
        Ok(Box::new(SimTransport::connect(instrument)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn setpoints_are_echoed() {
        let sim = SimInstrument::power_supply();
        let mut transport = SimTransport::connect(sim.clone());
        transport.write("CH1:VOLTAGE 12.5").await.unwrap();
        assert_eq!(transport.query("CH1:VOLTAGE?").await.unwrap(), "12.5");
        assert_eq!(sim.setting("CH1:VOLTAGE").as_deref(), Some("12.5"));
    }

    #[tokio::test]
    async fn measurements_follow_output_state() {
        let sim = SimInstrument::power_supply();
        let mut transport = SimTransport::connect(sim.clone());
        transport.write("CH2:VOLTAGE 5").await.unwrap();
        transport.write("CH2:CURRENT 0.5").await.unwrap();
        assert_eq!(transport.query("MEASURE:POWER? CH2").await.unwrap(), "0.000");
        transport.write("OUTPUT CH2,ON").await.unwrap();
        assert!(sim.output_enabled(2));
        assert_eq!(transport.query("MEASURE:POWER? CH2").await.unwrap(), "2.500");
        assert_eq!(transport.query("MEASURE:VOLTAGE? CH2").await.unwrap(), "5.000");
    }

    #[tokio::test]
    async fn unanswered_read_times_out() {
        let mut transport = SimTransport::connect(SimInstrument::power_supply());
        assert!(transport.read().await.unwrap_err().is_timeout());
    }

    #[tokio::test]
    async fn bus_tracks_sessions() {
        let sim = SimInstrument::power_supply();
        let bus = SimBus::new().with("SIM::PSU", sim.clone());
        assert_eq!(bus.list_resources().await.unwrap(), vec!["SIM::PSU"]);

        let mut transport = bus.open("SIM::PSU", Duration::from_secs(1)).await.unwrap();
        assert_eq!(sim.open_sessions(), 1);
        transport.close().await.unwrap();
        assert_eq!(sim.open_sessions(), 0);
        drop(transport);
        assert_eq!(sim.open_sessions(), 0);

        assert!(bus.open("SIM::NOPE", Duration::from_secs(1)).await.is_err());
    }
}
