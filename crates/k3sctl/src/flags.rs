//! Provider-specific command-line flags
//!
//! Each provider declares its own credential and option flags. The CLI
//! looks for `--provider` before parsing and grafts that provider's flags
//! onto the cluster subcommands.

use clap::parser::ValueSource;
use clap::{Arg, ArgMatches, Command};
use cluster_orchestration::{FlagSpec, Provider};
use serde_json::{Map, Value};

/// Subcommands that accept provider flags
pub const PROVIDER_SUBCOMMANDS: &[&str] = &["create", "join", "delete"];

/// Value of `--provider` in raw arguments, if any
pub fn provider_from_args<I, S>(args: I) -> Option<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        let arg = arg.as_ref();
        if arg == "--provider" || arg == "-p" {
            return args.next().map(|v| v.as_ref().to_string());
        }
        let attached = arg
            .strip_prefix("--provider=")
            .or_else(|| arg.strip_prefix("-p="))
            .or_else(|| arg.strip_prefix("-p"));
        if let Some(value) = attached {
            return Some(value.to_string());
        }
    }
    None
}

fn to_arg(flag: &FlagSpec) -> Arg {
    let mut arg = Arg::new(flag.name.clone())
        .long(flag.name.clone())
        .help(flag.usage.clone())
        .value_name("VALUE");
    if let Some(env) = &flag.env {
        arg = arg.env(env.clone());
    }
    if let Some(default) = &flag.default {
        arg = arg.default_value(default.clone());
    }
    arg
}

/// Every flag the provider accepts, credentials first
pub fn provider_flags(provider: &dyn Provider) -> Vec<FlagSpec> {
    let mut flags = provider.credential_flags();
    flags.extend(provider.option_flags());
    flags
}

/// Add the provider's flags to the cluster subcommands
pub fn augment(command: Command, provider: &dyn Provider) -> Command {
    let args: Vec<Arg> = provider_flags(provider).iter().map(to_arg).collect();
    let example = format!("Example:\n  {}", provider.usage_example());

    PROVIDER_SUBCOMMANDS
        .iter()
        .fold(command, |command, name| {
            let args = args.clone();
            command.mut_subcommand(*name, move |sub| sub.args(args))
        })
        .mut_subcommand("create", move |sub| sub.after_help(example))
}

/// Flag values set on the command line or through the environment.
/// Defaults are left to the provider.
pub fn collect(matches: &ArgMatches, flags: &[FlagSpec]) -> Map<String, Value> {
    let mut options = Map::new();
    for flag in flags {
        // unknown ids are an error here, not a panic
        let Ok(Some(value)) = matches.try_get_one::<String>(&flag.name) else {
            continue;
        };
        if matches.value_source(&flag.name) != Some(ValueSource::DefaultValue) {
            options.insert(flag.name.clone(), Value::String(value.clone()));
        }
    }
    options
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_orchestration::provider::{DemoCloud, DemoProvider};

    fn command() -> Command {
        Command::new("k3sctl")
            .subcommand(Command::new("create").arg(Arg::new("provider").long("provider")))
            .subcommand(Command::new("join").arg(Arg::new("provider").long("provider")))
            .subcommand(Command::new("delete").arg(Arg::new("provider").long("provider")))
            .subcommand(Command::new("list"))
    }

    #[test]
    fn test_provider_from_args() {
        assert_eq!(
            provider_from_args(["k3sctl", "create", "--provider", "demo"]).as_deref(),
            Some("demo")
        );
        assert_eq!(
            provider_from_args(["k3sctl", "delete", "--provider=native"]).as_deref(),
            Some("native")
        );
        assert_eq!(provider_from_args(["k3sctl", "list"]), None);
    }

    #[test]
    fn test_provider_attached_to_short_flag() {
        assert_eq!(
            provider_from_args(["k3sctl", "create", "-pdemo"]).as_deref(),
            Some("demo")
        );
        assert_eq!(
            provider_from_args(["k3sctl", "create", "-p=native", "--name", "x"]).as_deref(),
            Some("native")
        );
        assert_eq!(
            provider_from_args(["k3sctl", "create", "-p", "demo"]).as_deref(),
            Some("demo")
        );
    }

    #[test]
    fn test_collect_ignores_flags_the_command_lacks() {
        let provider = DemoProvider::new(DemoCloud::new());
        let matches = command().get_matches_from(["k3sctl", "create", "--provider", "demo"]);
        let (_, sub) = matches.subcommand().unwrap();

        assert!(collect(sub, &provider_flags(&provider)).is_empty());
    }

    #[test]
    fn test_provider_flags_are_parsed() {
        let provider = DemoProvider::new(DemoCloud::new());
        let command = augment(command(), &provider);

        let matches = command.get_matches_from([
            "k3sctl",
            "create",
            "--provider",
            "demo",
            "--region",
            "eu-1",
            "--max-instances",
            "3",
        ]);
        let (_, sub) = matches.subcommand().unwrap();
        let options = collect(sub, &provider_flags(&provider));

        assert_eq!(options["region"], Value::from("eu-1"));
        assert_eq!(options["max-instances"], Value::from("3"));
        // defaults stay with the provider
        assert!(!options.contains_key("instance-type"));
    }

    #[test]
    fn test_other_subcommands_are_untouched() {
        let provider = DemoProvider::new(DemoCloud::new());
        let command = augment(command(), &provider);
        let result = command.try_get_matches_from(["k3sctl", "list", "--region", "eu-1"]);
        assert!(result.is_err());
    }
}
