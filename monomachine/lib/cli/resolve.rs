use clap::{
    builder::BoolishValueParser, parser::ValueSource, value_parser, Arg, ArgAction, ArgMatches,
    Command, CommandFactory,
};

use crate::{
    drivers::{CreateFlag, DriverFactory, DriverOptions, FlagKind, FlagValue},
    MachineError, MachineResult,
};

use super::MachineArgs;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const DRIVER_OPTIONS_HEADING: &str = "Driver options";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The create flags of every driver a factory knows, by driver name.
#[derive(Debug, Clone, Default)]
pub struct DriverCatalog {
    drivers: Vec<(String, Vec<CreateFlag>)>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl DriverCatalog {
    /// Collects the create flags of every driver in `factory`.
    pub fn from_factory(factory: &dyn DriverFactory) -> MachineResult<Self> {
        let mut drivers = Vec::new();
        for name in factory.driver_names() {
            let flags = factory.new_driver(&name, "")?.create_flags();
            drivers.push((name, flags));
        }
        Ok(Self { drivers })
    }

    /// Adds a driver and its flags.
    pub fn with_driver(mut self, name: impl Into<String>, flags: Vec<CreateFlag>) -> Self {
        self.drivers.push((name.into(), flags));
        self
    }

    /// The flags of one driver.
    pub fn flags(&self, driver: &str) -> Option<&[CreateFlag]> {
        self.drivers
            .iter()
            .find(|(name, _)| name == driver)
            .map(|(_, flags)| flags.as_slice())
    }

    /// The full command line, with every driver's flags added to `create`.
    pub fn command(&self) -> Command {
        let flags: Vec<&CreateFlag> = self.drivers.iter().flat_map(|(_, f)| f).collect();
        MachineArgs::command().mut_subcommand("create", |create| {
            create.args(flags.into_iter().map(driver_arg))
        })
    }

    /// Resolves the options of `driver` from the `create` matches of [`DriverCatalog::command`].
    ///
    /// A flag given on the command line wins over its environment variable, which wins over its
    /// default. Flags of other drivers given on the command line are rejected.
    pub fn resolve(&self, driver: &str, matches: &ArgMatches) -> MachineResult<DriverOptions> {
        let flags = self
            .flags(driver)
            .ok_or_else(|| MachineError::InvalidConfig(format!("unknown driver: {driver}")))?;

        let foreign = self
            .drivers
            .iter()
            .filter(|(name, _)| name != driver)
            .flat_map(|(_, flags)| flags);
        for flag in foreign {
            if matches.value_source(&flag.name) == Some(ValueSource::CommandLine) {
                return Err(MachineError::InvalidConfig(format!(
                    "--{} is not an option of the {driver} driver",
                    flag.name
                )));
            }
        }

        driver_options_from_matches(flags, matches)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Reads the values of `flags` from matches of a command carrying their arguments.
pub fn driver_options_from_matches(
    flags: &[CreateFlag],
    matches: &ArgMatches,
) -> MachineResult<DriverOptions> {
    let mut options = DriverOptions::new();
    for flag in flags {
        let name = flag.name.as_str();
        let value = match flag.default.kind() {
            FlagKind::Bool => matches
                .try_get_one::<bool>(name)
                .map(|value| FlagValue::Bool(value.copied().unwrap_or_default())),
            FlagKind::Int => matches.try_get_one::<i64>(name).map(|value| {
                value
                    .copied()
                    .map(FlagValue::Int)
                    .unwrap_or_else(|| flag.default.clone())
            }),
            FlagKind::StringSlice => matches.try_get_many::<String>(name).map(|values| {
                FlagValue::StringSlice(
                    values
                        .into_iter()
                        .flatten()
                        .map(|value| value.trim())
                        .filter(|value| !value.is_empty())
                        .map(String::from)
                        .collect(),
                )
            }),
            FlagKind::String => matches.try_get_one::<String>(name).map(|value| {
                value
                    .cloned()
                    .map(FlagValue::String)
                    .unwrap_or_else(|| flag.default.clone())
            }),
        }
        .map_err(|e| MachineError::InvalidConfig(format!("driver option {name}: {e}")))?;

        if matches.value_source(name) == Some(ValueSource::EnvVariable) {
            tracing::debug!("{name} taken from the environment");
        }

        options.set(name, value);
    }

    Ok(options)
}

/// The `--<name>` argument of a create flag.
///
/// It falls back to the flag's environment variable and then to its default. String slices are
/// repeatable and split on commas; other flags keep the last value given.
fn driver_arg(flag: &CreateFlag) -> Arg {
    let mut arg = Arg::new(flag.name.clone())
        .long(flag.name.clone())
        .help(flag.usage.clone())
        .help_heading(DRIVER_OPTIONS_HEADING);

    if let Some(env_var) = &flag.env_var {
        arg = arg.env(env_var.clone());
    }

    match &flag.default {
        FlagValue::Bool(_) => arg
            .action(ArgAction::SetTrue)
            .value_parser(BoolishValueParser::new())
            .overrides_with(flag.name.clone()),
        FlagValue::Int(default) => arg
            .value_parser(value_parser!(i64))
            .default_value(default.to_string())
            .overrides_with(flag.name.clone()),
        FlagValue::StringSlice(_) => arg
            .action(ArgAction::Append)
            .value_delimiter(',')
            .value_parser(value_parser!(String)),
        FlagValue::String(default) => {
            let arg = arg
                .value_parser(value_parser!(String))
                .overrides_with(flag.name.clone());
            if default.is_empty() {
                arg
            } else {
                arg.default_value(default.clone())
            }
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use clap::FromArgMatches;
    use serial_test::serial;

    use super::*;
    use crate::{cli::MachineSubcommand, drivers::BuiltinDrivers};

    const CPU_COUNT_VAR: &str = "MONOMACHINE_TEST_CPU_COUNT";
    const USERNAME_VAR: &str = "MONOMACHINE_TEST_USERNAME";
    const NETWORK_VAR: &str = "MONOMACHINE_TEST_NETWORK";
    const NO_CACHE_VAR: &str = "MONOMACHINE_TEST_NO_CACHE";

    fn catalog() -> DriverCatalog {
        DriverCatalog::default()
            .with_driver(
                "vmwarevsphere",
                vec![
                    CreateFlag::int("vmwarevsphere-cpu-count", CPU_COUNT_VAR, "CPUs", 2),
                    CreateFlag::string("vmwarevsphere-username", USERNAME_VAR, "User", ""),
                    CreateFlag::string("vmwarevsphere-folder", "", "Folder", "vms"),
                    CreateFlag::string_slice("vmwarevsphere-network", NETWORK_VAR, "Networks"),
                    CreateFlag::bool("vmwarevsphere-no-cache", NO_CACHE_VAR, "Skip the cache"),
                ],
            )
            .with_driver(
                "generic",
                vec![CreateFlag::string("generic-ip-address", "", "Address", "")],
            )
    }

    fn clear_env() {
        for var in [CPU_COUNT_VAR, USERNAME_VAR, NETWORK_VAR, NO_CACHE_VAR] {
            std::env::remove_var(var);
        }
    }

    fn resolve(catalog: &DriverCatalog, argv: &[&str]) -> anyhow::Result<DriverOptions> {
        let matches = catalog
            .command()
            .try_get_matches_from(["monomachine", "create"].iter().chain(argv))?;
        let create = matches
            .subcommand_matches("create")
            .ok_or_else(|| anyhow::anyhow!("no create matches"))?;
        Ok(catalog.resolve("vmwarevsphere", create)?)
    }

    #[test]
    #[serial]
    fn test_precedence_command_line_env_default() -> anyhow::Result<()> {
        clear_env();
        std::env::set_var(CPU_COUNT_VAR, "8");
        std::env::set_var(USERNAME_VAR, "admin");
        std::env::set_var(NETWORK_VAR, "a, b");
        std::env::set_var(NO_CACHE_VAR, "yes");

        let options = resolve(
            &catalog(),
            &[
                "--vmwarevsphere-cpu-count",
                "4",
                "--vmwarevsphere-cpu-count",
                "6",
                "dev",
            ],
        );
        clear_env();
        let options = options?;

        assert_eq!(options.get_int("vmwarevsphere-cpu-count")?, 6);
        assert_eq!(options.get_string("vmwarevsphere-username")?, "admin");
        assert_eq!(options.get_string("vmwarevsphere-folder")?, "vms");
        assert_eq!(
            options.get_string_slice("vmwarevsphere-network")?,
            vec!["a", "b"]
        );
        assert!(options.get_bool("vmwarevsphere-no-cache")?);
        Ok(())
    }

    #[test]
    #[serial]
    fn test_defaults_without_command_line_or_env() -> anyhow::Result<()> {
        clear_env();
        let options = resolve(&catalog(), &["dev"])?;

        assert_eq!(options.get_int("vmwarevsphere-cpu-count")?, 2);
        assert_eq!(options.get_string("vmwarevsphere-username")?, "");
        assert!(options.get_string_slice("vmwarevsphere-network")?.is_empty());
        assert!(!options.get_bool("vmwarevsphere-no-cache")?);
        assert!(!options.contains("generic-ip-address"));
        Ok(())
    }

    #[test]
    #[serial]
    fn test_repeated_slice_accumulates_over_env() -> anyhow::Result<()> {
        clear_env();
        std::env::set_var(NETWORK_VAR, "ignored");
        let options = resolve(
            &catalog(),
            &[
                "--vmwarevsphere-network",
                "VM Network",
                "--vmwarevsphere-network",
                "storage",
                "--vmwarevsphere-no-cache",
                "dev",
            ],
        );
        clear_env();
        let options = options?;

        assert_eq!(
            options.get_string_slice("vmwarevsphere-network")?,
            vec!["VM Network", "storage"]
        );
        assert!(options.get_bool("vmwarevsphere-no-cache")?);
        Ok(())
    }

    #[test]
    #[serial]
    fn test_rejects_malformed_unknown_and_foreign_options() {
        clear_env();
        assert!(resolve(&catalog(), &["--vmwarevsphere-cpu-count", "many", "dev"]).is_err());
        assert!(resolve(&catalog(), &["--cpu", "2", "dev"]).is_err());

        let result = resolve(&catalog(), &["--generic-ip-address", "10.0.0.5", "dev"]);
        let message = result.err().map(|e| e.to_string()).unwrap_or_default();
        assert!(message.contains("--generic-ip-address is not an option"), "{message}");
    }

    #[test]
    fn test_create_args_parse_alongside_driver_options() -> anyhow::Result<()> {
        let matches = catalog().command().try_get_matches_from([
            "monomachine",
            "create",
            "-d",
            "generic",
            "--generic-ip-address",
            "10.0.0.5",
            "--engine-port",
            "3376",
            "dev",
        ])?;

        let args = MachineArgs::from_arg_matches(&matches)?;
        let Some(MachineSubcommand::Create { name, args }) = args.subcommand else {
            anyhow::bail!("expected create");
        };
        assert_eq!(name, "dev");
        assert_eq!(args.driver, "generic");
        assert_eq!(args.engine_port, 3376);

        let create = matches
            .subcommand_matches("create")
            .ok_or_else(|| anyhow::anyhow!("no create matches"))?;
        let options = catalog().resolve("generic", create)?;
        assert_eq!(options.get_string("generic-ip-address")?, "10.0.0.5");
        Ok(())
    }

    #[test]
    fn test_builtin_driver_flags_fit_the_command_line() -> anyhow::Result<()> {
        let home = tempfile::tempdir()?;
        let catalog = DriverCatalog::from_factory(&BuiltinDrivers::new(home.path()))?;
        assert!(catalog.flags("generic").is_some());
        assert!(catalog.flags("vmwarevsphere").is_some());
        catalog.command().debug_assert();
        Ok(())
    }
}
