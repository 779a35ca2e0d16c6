use clap::{Parser, Subcommand};

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "keeper",
    about = "Inspect and manage stored accounts and their secrets",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// Optional subcommand; defaults to listing accounts when absent.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List account groups.
    List,
    /// Create an account and print its group.
    Create {
        manager: String,
        protocol: String,
        /// Connection parameter as name=value; repeatable.
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
    /// Set an attribute (secret parameters go to the secret backend).
    Set {
        group: String,
        key: String,
        value: String,
    },
    /// Print an attribute, wherever it is stored.
    Get { group: String, key: String },
    /// Remove an account and its secrets.
    Remove { group: String },
    /// Print the non-secret contents of every account.
    Dump {
        /// Emit JSON instead of key-file text.
        #[arg(long)]
        json: bool,
    },
    /// Check that the account file loads and the secret backend answers.
    Health,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version and exit.
    Version,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected name=value, got {raw:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_list_when_missing_subcommand() {
        let cli = Cli::try_parse_from(["keeper"]).expect("parse should succeed");
        assert_eq!(cli.command, None);
    }

    #[test]
    fn parses_create_with_params() {
        let cli = Cli::try_parse_from([
            "keeper",
            "create",
            "fakecm",
            "fakeprotocol",
            "--param",
            "account=dontdivert@example.com",
            "--param",
            "password=a=b",
        ])
        .expect("parse should succeed");
        assert_eq!(
            cli.command,
            Some(Command::Create {
                manager: "fakecm".into(),
                protocol: "fakeprotocol".into(),
                params: vec![
                    ("account".into(), "dontdivert@example.com".into()),
                    ("password".into(), "a=b".into()),
                ],
            })
        );
    }

    #[test]
    fn rejects_param_without_name() {
        let err = Cli::try_parse_from(["keeper", "create", "cm", "proto", "--param", "=x"])
            .expect_err("should reject");
        assert!(err.to_string().contains("expected name=value"));
    }

    #[test]
    fn parses_get_subcommand() {
        let cli = Cli::try_parse_from([
            "keeper",
            "get",
            "fakecm/fakeprotocol/dontdivert_40example_2ecom0",
            "param-password",
        ])
        .expect("parse should succeed");
        assert_eq!(
            cli.command,
            Some(Command::Get {
                group: "fakecm/fakeprotocol/dontdivert_40example_2ecom0".into(),
                key: "param-password".into(),
            })
        );
    }

    #[test]
    fn parses_dump_json_and_config_init() {
        let cli = Cli::try_parse_from(["keeper", "dump", "--json"]).expect("parse");
        assert_eq!(cli.command, Some(Command::Dump { json: true }));
        let cli = Cli::try_parse_from(["keeper", "config", "init"]).expect("parse");
        assert_eq!(cli.command, Some(Command::Config(ConfigCommand::Init)));
    }
}
