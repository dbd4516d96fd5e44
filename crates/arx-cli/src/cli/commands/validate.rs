use arx_core::{sink_from_settings, Settings};

use super::super::args::ValidateArgs;
use super::builder;
use crate::exit_codes::{CONFIG_ERROR, RUN_FAILED, SUCCESS};

pub(crate) async fn run(args: ValidateArgs) -> anyhow::Result<i32> {
    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("settings: {e}");
            return Ok(CONFIG_ERROR);
        }
    };
    let (scenario, target) = builder::load_scenario(&args.file, &settings)?;
    builder::load_catalog(&settings)?;
    println!(
        "scenario {} ok (digest {}), target {} at {}",
        scenario.id, scenario.digest, target.id, target.base_url
    );
    println!("prompt catalog ok");

    if let Err(e) = settings.validate() {
        eprintln!("settings: {e}");
        return Ok(CONFIG_ERROR);
    }
    println!("settings ok");

    if args.offline {
        return Ok(SUCCESS);
    }
    match sink_from_settings(&settings)? {
        Some(sink) => match sink.test_connection().await {
            Ok(()) => println!("sink {} reachable", sink.sink_name()),
            Err(e) => {
                eprintln!("sink {}: {e}", sink.sink_name());
                return Ok(RUN_FAILED);
            }
        },
        None => println!("findings export disabled"),
    }
    Ok(SUCCESS)
}
