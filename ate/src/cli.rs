//! Plumbing shared by the command line tools.
use std::path::PathBuf;
use std::time::Duration;

use anyhow::anyhow;
use clap::{Arg, ArgMatches, Command};
use env_logger::Env;

use crate::address::is_instrument_resource;
use crate::bus::{Bus, BusOptions, ResourceManager};
use crate::instrument::Instrument;
use crate::sim::{SimBus, SimInstrument};
use crate::Error;

pub const SIM_PSU: &str = "SIM::PSU::INSTR";
pub const SIM_SCOPE: &str = "SIM::SCOPE::INSTR";

pub fn init_logging(verbose: bool) {
    if verbose {
        env_logger::Builder::from_env(Env::default().default_filter_or("ate=debug")).init();
    } else {
        env_logger::init();
    }
}

/// Add the arguments every tool understands.
pub fn common_args(cmd: Command<'static>) -> Command<'static> {
    cmd.arg(
        Arg::new("resource")
            .long("resource")
            .short('r')
            .takes_value(true)
            .help("Instrument to open. Defaults to the first one found."),
    )
    .arg(
        Arg::new("simulate")
            .long("simulate")
            .help("Talk to simulated instruments instead of hardware"),
    )
    .arg(
        Arg::new("visa-library")
            .long("visa-library")
            .takes_value(true)
            .help("Path to the VISA shared library"),
    )
    .arg(
        Arg::new("timeout")
            .long("timeout")
            .takes_value(true)
            .default_value("5000")
            .help("Instrument timeout in milliseconds"),
    )
    .arg(Arg::new("verbose").long("verbose").short('v').help("Log verbose output"))
}

/// The simulated lab: one supply and one oscilloscope.
pub fn simulated_bus() -> SimBus {
    SimBus::new()
        .with(SIM_PSU, SimInstrument::power_supply())
        .with(SIM_SCOPE, SimInstrument::oscilloscope())
}

pub fn bus_options(matches: &ArgMatches) -> crate::Result<BusOptions> {
    let mut options = BusOptions::from_env();
    if let Some(path) = matches.value_of("visa-library") {
        options.visa_library = Some(PathBuf::from(path));
    }
    if let Some(timeout) = matches.value_of("timeout") {
        options.timeout_ms = timeout
            .parse()
            .map_err(|_| Error::argument(anyhow!("Cannot parse `{}` as a timeout", timeout)))?;
    }
    Ok(options)
}

/// Bus and resource selection derived from the common arguments.
pub struct Session {
    pub bus: Box<dyn Bus>,
    pub resource: Option<String>,
    pub timeout: Duration,
    simulated: bool,
}

impl Session {
    pub fn from_matches(matches: &ArgMatches) -> crate::Result<Self> {
        let options = bus_options(matches)?;
        let simulated = matches.is_present("simulate");
        let bus: Box<dyn Bus> = if simulated {
            Box::new(simulated_bus())
        } else {
            Box::new(ResourceManager::new(&options)?)
        };
        Ok(Self {
            bus,
            resource: matches.value_of("resource").map(|x| x.to_string()),
            timeout: options.timeout(),
            simulated,
        })
    }

    pub fn is_simulated(&self) -> bool {
        self.simulated
    }

    /// The requested resource, or a sensible default: `sim_default` when simulating, the first
    /// instrument on the bus otherwise.
    pub async fn pick_resource(&self, sim_default: &str) -> crate::Result<String> {
        if let Some(resource) = &self.resource {
            return Ok(resource.clone());
        }
        if self.simulated {
            return Ok(sim_default.to_string());
        }
        let resources = self.bus.list_resources().await?;
        let ret = resources
            .into_iter()
            .find(|x| is_instrument_resource(x))
            .ok_or_else(|| Error::argument(anyhow!("No instrument found")))?;
        log::info!("Using {}", ret);
        Ok(ret)
    }

    /// Open the selected instrument.
    pub async fn open(&self, sim_default: &str) -> crate::Result<Instrument> {
        let resource = self.pick_resource(sim_default).await?;
        let mut ret = Instrument::new(Some(resource)).with_timeout(self.timeout);
        ret.open(self.bus.as_ref(), None).await?;
        Ok(ret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> ArgMatches {
        common_args(Command::new("test")).get_matches_from(args)
    }

    #[test]
    fn timeout_flag() {
        let matches = parse(&["test", "--timeout", "250"]);
        assert_eq!(bus_options(&matches).unwrap().timeout(), Duration::from_millis(250));
        let matches = parse(&["test", "--timeout", "soon"]);
        assert!(matches!(bus_options(&matches), Err(Error::Argument(_))));
    }

    #[tokio::test]
    async fn simulated_session() {
        let session = Session::from_matches(&parse(&["test", "--simulate"])).unwrap();
        assert!(session.is_simulated());
        assert_eq!(session.pick_resource(SIM_SCOPE).await.unwrap(), SIM_SCOPE);

        let instr = session.open(SIM_PSU).await.unwrap();
        let model = instr.id().and_then(|x| x.model.clone());
        assert_eq!(model.as_deref(), Some("SPD3303X-E"));
    }

    #[tokio::test]
    async fn explicit_resource_wins() {
        let matches = parse(&["test", "--simulate", "-r", "SIM::SCOPE"]);
        let session = Session::from_matches(&matches).unwrap();
        assert_eq!(session.pick_resource(SIM_PSU).await.unwrap(), "SIM::SCOPE");
    }
}
