mod cli;
mod config;
mod storage;

use std::collections::BTreeMap;

use crate::cli::{Command, ConfigCommand};
use clap::Parser;
use color_eyre::Result;
use keeper_core::{AccountGroup, Value};
use keeper_registry::AccountRegistry;
use keeper_storage::{keyfile, Groups};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load()?;
    match cli.command.unwrap_or(Command::List) {
        Command::Version => print_version(),
        Command::Config(ConfigCommand::Init) => init_config(&config)?,
        command => {
            let registry = storage::registry_from_config(&config).await?;
            let output = run(&registry, command).await?;
            if !output.is_empty() {
                println!("{output}");
            }
        }
    }

    Ok(())
}

fn init_tracing() {
    // Logs go to stderr so command output stays scriptable.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("keeper {}", env!("CARGO_PKG_VERSION"));
}

fn init_config(config: &config::Config) -> Result<()> {
    let path = config::write_default_if_missing(config)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}

/// Execute a registry-backed command and return what it prints.
async fn run(registry: &AccountRegistry, command: Command) -> Result<String> {
    let output = match command {
        Command::List => registry
            .list_accounts()
            .await
            .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n"),
        Command::Create {
            manager,
            protocol,
            params,
        } => {
            let params: BTreeMap<String, Value> = params
                .into_iter()
                .map(|(name, value)| (name, Value::String(value)))
                .collect();
            registry
                .create_account(&manager, &protocol, params)
                .await
                .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?
                .to_string()
        }
        Command::Set { group, key, value } => {
            let group = parse_group(&group)?;
            registry
                .set_property(&group, &key, value)
                .await
                .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;
            String::new()
        }
        Command::Get { group, key } => {
            let group = parse_group(&group)?;
            registry
                .get_property(&group, &key)
                .await
                .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?
        }
        Command::Remove { group } => {
            let group = parse_group(&group)?;
            registry
                .remove_account(&group)
                .await
                .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;
            String::new()
        }
        Command::Dump { json } => {
            let groups = visible_groups(registry).await?;
            if json {
                let named: BTreeMap<String, _> = groups
                    .into_iter()
                    .map(|(group, entries)| (group.to_string(), entries))
                    .collect();
                serde_json::to_string_pretty(&named)?
            } else {
                keyfile::serialize(&groups).trim_end().to_string()
            }
        }
        Command::Health => {
            registry
                .check_backend()
                .await
                .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;
            format!(
                "Accounts: {} ok\nSecrets ({}): ok",
                registry.store().path().map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?.display(),
                registry.backend_name()
            )
        }
        Command::Version | Command::Config(_) => String::new(),
    };
    Ok(output)
}

fn parse_group(raw: &str) -> Result<AccountGroup> {
    raw.parse()
        .map_err(|e: keeper_core::KeeperError| color_eyre::eyre::eyre!(e.to_string()))
}

/// Live accounts with secret parameters stripped.
async fn visible_groups(registry: &AccountRegistry) -> Result<Groups> {
    let mut groups = Groups::new();
    let accounts = registry
        .list_accounts()
        .await
        .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;
    for group in accounts {
        let entries = registry
            .store()
            .group_entries(&group)
            .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?
            .into_iter()
            .filter(|(key, _)| !registry.config().is_secret_key(key))
            .collect();
        groups.insert(group, entries);
    }
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage;

    const GROUP: &str = "fakecm/fakeprotocol/joe_40example_2ecom0";

    fn create(params: &[(&str, &str)]) -> Command {
        Command::Create {
            manager: "fakecm".into(),
            protocol: "fakeprotocol".into(),
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[tokio::test]
    async fn create_then_list_and_get() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = storage::test_registry(dir.path()).await;

        let group = run(
            &registry,
            create(&[("account", "joe@example.com"), ("password", "secrecy")]),
        )
        .await
        .expect("create");
        assert_eq!(group, GROUP);

        let listed = run(&registry, Command::List).await.expect("list");
        assert_eq!(listed, GROUP);

        let password = run(
            &registry,
            Command::Get {
                group: GROUP.into(),
                key: "param-password".into(),
            },
        )
        .await
        .expect("get");
        assert_eq!(password, "secrecy");
    }

    #[tokio::test]
    async fn dump_hides_secrets() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = storage::test_registry(dir.path()).await;
        run(
            &registry,
            create(&[("account", "joe@example.com"), ("password", "secrecy")]),
        )
        .await
        .expect("create");
        run(
            &registry,
            Command::Set {
                group: GROUP.into(),
                key: "DisplayName".into(),
                value: "Work account".into(),
            },
        )
        .await
        .expect("set");

        let text = run(&registry, Command::Dump { json: false })
            .await
            .expect("dump");
        assert!(text.starts_with(&format!("[{GROUP}]")), "{text}");
        assert!(text.contains("DisplayName=Work account"));
        assert!(!text.contains("secrecy"));

        let json = run(&registry, Command::Dump { json: true })
            .await
            .expect("dump json");
        let parsed: BTreeMap<String, BTreeMap<String, String>> =
            serde_json::from_str(&json).expect("valid json");
        assert_eq!(parsed[GROUP]["param-account"], "joe@example.com");
        assert!(!parsed[GROUP].contains_key("param-password"));
    }

    #[tokio::test]
    async fn remove_unknown_group_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = storage::test_registry(dir.path()).await;
        let err = run(
            &registry,
            Command::Remove {
                group: GROUP.into(),
            },
        )
        .await
        .expect_err("unknown group");
        assert!(err.to_string().contains("unknown account group"), "{err}");

        let err = run(
            &registry,
            Command::Get {
                group: "not-a-group".into(),
                key: "manager".into(),
            },
        )
        .await
        .expect_err("malformed group");
        assert!(!err.to_string().is_empty());
    }

    #[tokio::test]
    async fn health_check_leaves_no_account_behind() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = storage::test_registry(dir.path()).await;
        let report = run(&registry, Command::Health).await.expect("health");
        assert!(report.contains("Secrets (plaintext): ok"), "{report}");
        assert!(registry.store().snapshot().expect("snapshot").is_empty());
    }
}
