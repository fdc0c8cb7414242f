use std::path::Path;
use std::process::exit;
use std::time::Duration;

use clap::{crate_version, Arg, ArgMatches, Command};
use tokio::runtime::Runtime;
use tokio::time::sleep;

use ate::cli::{self, Session, SIM_SCOPE};
use ate::oscope::{Oscilloscope, Oscope};
use ate::protocol::oscope::{
    AcquisitionSetup, ChannelSetup, Slope, SweepMode, Timebase, TriggerSetup,
};

fn main() {
    let cmd = Command::new("scope-demo")
        .version(crate_version!())
        .about("Set up an oscilloscope for a 1.5 V trigger on channel 1 and save a screenshot")
        .arg(
            Arg::new("filename")
                .long("filename")
                .short('n')
                .takes_value(true)
                .default_value("scope_demo.png")
                .help("Screenshot file"),
        )
        .arg(
            Arg::new("wait")
                .long("wait")
                .takes_value(true)
                .default_value("1.0")
                .help("Seconds to acquire before stopping"),
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

async fn run(matches: &ArgMatches) -> anyhow::Result<()> {
    let wait: f64 = matches.value_of("wait").unwrap_or("1.0").parse()?;
    if !wait.is_finite() || wait < 0.0 {
        return Err(anyhow::anyhow!("Invalid wait time {}", wait));
    }
    let path = Path::new(matches.value_of("filename").unwrap_or("scope_demo.png"));

    let session = Session::from_matches(matches)?;
    let mut scope = Oscope::new(session.open(SIM_SCOPE).await?);
    if let Some(id) = scope.id() {
        println!("*IDN? {}", id);
    }

    let result = demo(&mut scope, Duration::from_secs_f64(wait), path).await;
    scope.close().await?;
    result
}

async fn demo(scope: &mut Oscope, wait: Duration, path: &Path) -> anyhow::Result<()> {
    scope.reset().await?;
    scope
        .configure_timebase(&Timebase {
            range: 5e-3,
            delay: 0.0,
        })
        .await?;
    scope.configure_channel(&ChannelSetup::default()).await?;
    scope
        .configure_trigger(&TriggerSetup {
            sweep: SweepMode::Normal,
            level: 1.5,
            slope: Slope::Positive,
        })
        .await?;
    scope.configure_acquisition(&AcquisitionSetup::default()).await?;
    scope.run().await?;
    sleep(wait).await;
    scope.stop().await?;
    let size = scope.capture_screenshot(path).await?;
    println!("Saved {} bytes to {}", size, path.display());
    Ok(())
}
