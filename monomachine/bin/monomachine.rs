use std::sync::Arc;

use clap::FromArgMatches;
use monomachine::{
    cli::{AnsiStyles, DriverCatalog, MachineArgs, MachineSubcommand},
    dispatch::{Dispatcher, HostListing, LifecycleAction},
    drivers::{BuiltinDrivers, DriverFactory, FlagValue},
    host::{FileHostStore, HostState},
    provision::{init_registry, ProvisionerRegistry},
    utils::{get_monomachine_home_path, machine_cert_dir},
    MachineError, MachineResult,
};
use tracing_subscriber::{fmt, EnvFilter};

//--------------------------------------------------------------------------------------------------
// Functions: main
//--------------------------------------------------------------------------------------------------

#[tokio::main]
async fn main() -> MachineResult<()> {
    // A .env file may provide driver options such as credentials
    dotenvy::dotenv().ok();

    let home = get_monomachine_home_path();
    let drivers = Arc::new(BuiltinDrivers::new(&home));
    let catalog = DriverCatalog::from_factory(drivers.as_ref())?;

    let mut command = catalog.command();
    let matches = command.get_matches_mut();
    let args = MachineArgs::from_arg_matches(&matches).unwrap_or_else(|e| e.exit());

    let filter = if args.verbose {
        EnvFilter::new("monomachine=debug,machutils=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,russh=warn"))
    };

    fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_level(true)
        .with_env_filter(filter)
        .init();

    let Some(subcommand) = args.subcommand else {
        command.print_help()?;
        return Ok(());
    };

    init_registry(ProvisionerRegistry::with_defaults())?;

    let dispatcher = Dispatcher::builder()
        .store(Arc::new(FileHostStore::new(&home)))
        .drivers(drivers.clone())
        .build();

    match subcommand {
        MachineSubcommand::Create { name, args } => {
            tracing::trace!("creating host: name={name}, driver={}", args.driver);
            let create_matches = matches
                .subcommand_matches("create")
                .ok_or_else(|| MachineError::InvalidConfig("missing create arguments".into()))?;
            let driver_options = catalog.resolve(&args.driver, create_matches)?;
            let options = args.host_options(machine_cert_dir(&home, &name));

            dispatcher
                .prepare_host(&name, &args.driver, &driver_options, options)
                .await?;
            run_batch(&dispatcher, LifecycleAction::Create, vec![name]).await?;
        }
        MachineSubcommand::Start { names } => {
            run_batch(&dispatcher, LifecycleAction::Start, names).await?
        }
        MachineSubcommand::Stop { names } => {
            run_batch(&dispatcher, LifecycleAction::Stop, names).await?
        }
        MachineSubcommand::Restart { names } => {
            run_batch(&dispatcher, LifecycleAction::Restart, names).await?
        }
        MachineSubcommand::Kill { names } => {
            run_batch(&dispatcher, LifecycleAction::Kill, names).await?
        }
        MachineSubcommand::Remove { names } => {
            run_batch(&dispatcher, LifecycleAction::Remove, names).await?
        }
        MachineSubcommand::Upgrade { names } => {
            run_batch(&dispatcher, LifecycleAction::Upgrade, names).await?
        }
        MachineSubcommand::Provision { names } => {
            run_batch(&dispatcher, LifecycleAction::Provision, names).await?
        }
        MachineSubcommand::RegenerateCerts { ca, names } => {
            run_batch(&dispatcher, LifecycleAction::RegenerateCerts { ca }, names).await?
        }
        MachineSubcommand::List { json } => {
            let listings = dispatcher.list().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&listings)?);
            } else {
                print_listings(&listings);
            }
        }
        MachineSubcommand::Inspect { name } => {
            let host = dispatcher.store().load(&name).await?;
            println!("{}", serde_json::to_string_pretty(&host)?);
        }
        MachineSubcommand::Status { name } => println!("{}", dispatcher.state(&name).await?),
        MachineSubcommand::Ip { name } => println!("{}", dispatcher.ip(&name).await?),
        MachineSubcommand::Url { name } => println!("{}", dispatcher.url(&name).await?),
        MachineSubcommand::Drivers => print_drivers(drivers.as_ref())?,
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Functions: *
//--------------------------------------------------------------------------------------------------

async fn run_batch(
    dispatcher: &Dispatcher,
    action: LifecycleAction,
    names: Vec<String>,
) -> MachineResult<()> {
    let report = dispatcher.run(action, &names).await;
    for name in report.succeeded() {
        println!("{}: {action} {}", name.literal(), "done".valid());
    }
    Ok(report.into_result()?)
}

fn print_listings(listings: &[HostListing]) {
    println!(
        "{}",
        format!("{:<20} {:<15} {:<10} {:<30} {}", "NAME", "DRIVER", "STATE", "URL", "ERRORS")
            .header()
    );

    for listing in listings {
        let state = format!("{:<10}", listing.state.to_string());
        let state = match listing.state {
            HostState::Running => state.valid(),
            HostState::Error | HostState::Timeout => state.error(),
            _ => state,
        };

        println!(
            "{} {:<15} {} {:<30} {}",
            format!("{:<20}", listing.name).literal(),
            listing.driver_name,
            state,
            listing.url,
            listing.error.as_deref().unwrap_or_default().error()
        );
    }
}

fn print_drivers(drivers: &dyn DriverFactory) -> MachineResult<()> {
    for name in drivers.driver_names() {
        println!("{}", name.header());

        for flag in drivers.new_driver(&name, "")?.create_flags() {
            let default = match &flag.default {
                FlagValue::Bool(value) => value.to_string(),
                FlagValue::Int(value) => value.to_string(),
                FlagValue::StringSlice(values) => values.join(","),
                FlagValue::String(value) => value.clone(),
            };

            println!(
                "  {:<40} {} [{}] (default: {default})",
                flag.name.literal(),
                flag.usage,
                flag.env_var.as_deref().unwrap_or("-"),
            );
        }
    }
    Ok(())
}
