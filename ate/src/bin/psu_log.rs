use std::fs::File;
use std::process::exit;
use std::time::Duration;

use anyhow::anyhow;
use clap::{crate_version, Arg, ArgMatches, Command};
use tokio::runtime::Runtime;

use ate::cli::{self, Session, SIM_PSU};
use ate::logger::{self, PollOptions};
use ate::protocol::psu::Tracking;
use ate::psu::PowerSupply;

fn main() {
    let cmd = Command::new("psu-log")
        .version(crate_version!())
        .about("Switch on a power supply and log its measurements to CSV")
        .arg(
            Arg::new("voltage")
                .long("voltage")
                .takes_value(true)
                .required(true)
                .help("Voltage limit in V"),
        )
        .arg(
            Arg::new("current")
                .long("current")
                .takes_value(true)
                .required(true)
                .help("Current limit in A"),
        )
        .arg(
            Arg::new("tracking")
                .long("tracking")
                .takes_value(true)
                .default_value("independent")
                .help("Channel coupling: independent, series or parallel"),
        )
        .arg(
            Arg::new("interval")
                .long("interval")
                .takes_value(true)
                .default_value("1.0")
                .help("Seconds between samples"),
        )
        .arg(
            Arg::new("samples")
                .long("samples")
                .takes_value(true)
                .help("Stop after this many samples. Runs until Ctrl-C otherwise."),
        )
        .arg(
            Arg::new("filename")
                .long("filename")
                .takes_value(true)
                .default_value("psu_log.csv")
                .help("CSV file to write"),
        );
    let matches = cli::common_args(cmd).get_matches();
    cli::init_logging(matches.is_present("verbose"));

    let rt = match Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("Cannot start runtime: {}", err);
            exit(1);
        }
    };
    if let Err(err) = rt.block_on(run(&matches)) {
        eprintln!("{:#}", err);
        exit(1);
    }
}

fn parse_arg<T: std::str::FromStr>(matches: &ArgMatches, name: &str) -> anyhow::Result<Option<T>> {
    match matches.value_of(name) {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("Cannot parse `{}` as {}", value, name)),
        None => Ok(None),
    }
}

fn required_arg<T: std::str::FromStr>(matches: &ArgMatches, name: &str) -> anyhow::Result<T> {
    parse_arg(matches, name)?.ok_or_else(|| anyhow!("Missing argument {}", name))
}

async fn run(matches: &ArgMatches) -> anyhow::Result<()> {
    let voltage: f64 = required_arg(matches, "voltage")?;
    let current: f64 = required_arg(matches, "current")?;
    let tracking: Tracking = required_arg(matches, "tracking")?;
    let interval: f64 = required_arg(matches, "interval")?;
    if !interval.is_finite() || interval <= 0.0 {
        return Err(anyhow!("Interval must be positive"));
    }
    let samples: Option<usize> = parse_arg(matches, "samples")?;
    let filename: String = required_arg(matches, "filename")?;

    let session = Session::from_matches(matches)?;
    let mut psu = PowerSupply::new(session.open(SIM_PSU).await?);
    if let Some(id) = psu.id() {
        println!("*IDN? {}", id);
    }

    let options = PollOptions::for_tracking(tracking, Duration::from_secs_f64(interval), samples);
    let result = log_to_file(&mut psu, voltage, current, tracking, &options, &filename).await;
    // outputs go off whatever happened above
    let closed = psu.close().await;
    let rows = result?;
    closed?;
    println!("Wrote {} samples to {}", rows, filename);
    Ok(())
}

async fn log_to_file(
    psu: &mut PowerSupply,
    voltage: f64,
    current: f64,
    tracking: Tracking,
    options: &PollOptions,
    filename: &str,
) -> anyhow::Result<usize> {
    psu.set_tracking(tracking).await?;
    for ch in &options.channels {
        psu.set_voltage(*ch, voltage).await?;
        psu.set_current(*ch, current).await?;
        psu.enable_output(*ch).await?;
    }

    let mut writer = csv::Writer::from_writer(File::create(filename)?);
    let stop = async {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("Interrupted, stopping.");
        }
    };
    Ok(logger::poll(psu, &mut writer, options, stop).await?)
}
