use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::exit;

use anyhow::anyhow;
use chrono::Utc;
use clap::{crate_version, Arg, ArgMatches, Command};
use tokio::runtime::Runtime;

use ate::cli::{self, Session, SIM_SCOPE};
use ate::oscope::{Oscilloscope, Oscope};

/// Channel read out by `--format csv`.
const CHANNEL: u8 = 1;

fn main() {
    let cmd = Command::new("scopeshot")
        .version(crate_version!())
        .about("Take a screenshot of an oscilloscope or read out its waveform")
        .arg(
            Arg::new("filename")
                .long("filename")
                .short('n')
                .takes_value(true)
                .help("Output file without extension. Defaults to a UTC timestamp."),
        )
        .arg(
            Arg::new("format")
                .long("format")
                .short('f')
                .takes_value(true)
                .possible_values(["png", "csv"])
                .ignore_case(true)
                .default_value("png")
                .help("png for a screenshot, csv for the waveform of channel 1"),
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

fn output_path(matches: &ArgMatches, format: &str) -> PathBuf {
    let stem = match matches.value_of("filename") {
        Some(x) => x.to_string(),
        None => format!("scope_{}", Utc::now().format("%m-%d-%y_%H-%M-%S")),
    };
    PathBuf::from(format!("{}.{}", stem, format))
}

async fn run(matches: &ArgMatches) -> anyhow::Result<()> {
    let format = matches
        .value_of("format")
        .ok_or_else(|| anyhow!("Missing format"))?
        .to_lowercase();
    let path = output_path(matches, &format);

    let session = Session::from_matches(matches)?;
    let mut scope = Oscope::new(session.open(SIM_SCOPE).await?);
    if let Some(id) = scope.id() {
        println!("*IDN? {}", id);
    }

    let result = capture(&mut scope, &format, &path).await;
    scope.close().await?;
    result
}

async fn capture(scope: &mut Oscope, format: &str, path: &Path) -> anyhow::Result<()> {
    match format {
        "png" => {
            let size = scope.capture_screenshot(path).await?;
            println!("Saved {} bytes to {}", size, path.display());
        }
        "csv" => {
            let waveform = scope.read_waveform(CHANNEL).await?;
            let mut writer = csv::Writer::from_writer(File::create(path)?);
            let rows = waveform.write_csv(&mut writer)?;
            println!("Saved {} samples to {}", rows, path.display());
        }
        other => return Err(anyhow!("Unsupported format `{}`", other)),
    }
    Ok(())
}
