use std::process::exit;

use clap::{crate_version, Arg, ArgMatches, Command};
use tokio::runtime::Runtime;

use ate::address::is_instrument_resource;
use ate::cli::{self, Session};
use ate::instrument::Instrument;
use ate::Identity;

fn main() {
    let cmd = Command::new("ate-list")
        .version(crate_version!())
        .about("List the instruments on the bus and print their identity")
        .arg(Arg::new("json").long("json").help("Print the result as JSON"));
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
    let session = Session::from_matches(matches)?;
    let resources = match &session.resource {
        Some(resource) => vec![resource.clone()],
        None => session.bus.list_resources().await?,
    };

    let mut found: Vec<(String, Identity)> = Vec::new();
    for resource in resources.into_iter().filter(|x| is_instrument_resource(x)) {
        let mut instr = Instrument::new(Some(resource.clone())).with_timeout(session.timeout);
        match instr.open(session.bus.as_ref(), None).await {
            Ok(id) => found.push((resource, id.clone())),
            Err(err) => {
                log::warn!("Cannot open {}: {}", resource, err);
                continue;
            }
        }
        instr.close().await?;
    }

    if matches.is_present("json") {
        let map: serde_json::Map<String, serde_json::Value> = found
            .into_iter()
            .map(|(resource, id)| Ok((resource, serde_json::to_value(id)?)))
            .collect::<serde_json::Result<_>>()?;
        println!("{}", serde_json::to_string_pretty(&map)?);
        return Ok(());
    }
    if found.is_empty() {
        println!("No instruments found.");
    }
    for (resource, id) in found {
        println!("{}", resource);
        for (key, value) in id.entries() {
            println!("    {}: {}", key, value);
        }
    }
    Ok(())
}
