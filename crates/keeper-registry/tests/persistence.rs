use std::{collections::BTreeMap, fs, path::Path, sync::Arc};

use keeper_core::{secret::SecretBackend, AccountGroup, KeeperError, Value};
use keeper_registry::{AccountRegistry, RegistryConfig};
use keeper_storage::{
    backend::{KeyringBackend, PlaintextBackend},
    keyfile,
    secret_service::InMemorySecretService,
    AttributeStore, ACCOUNTS_FILE,
};

const GROUP: &str = "fakecm/fakeprotocol/dontdivert_40example_2ecom0";

#[derive(Clone)]
enum Backend {
    Plaintext,
    Keyring(InMemorySecretService),
}

impl Backend {
    fn keyring() -> Self {
        Backend::Keyring(InMemorySecretService::new())
    }

    fn uses_keyring(&self) -> bool {
        matches!(self, Backend::Keyring(_))
    }
}

/// Open the account directory the way the daemon does at start-up.
async fn start(dir: &Path, backend: &Backend) -> AccountRegistry {
    let store = AttributeStore::open_in(dir).expect("load account file");
    let secrets: Arc<dyn SecretBackend> = match backend {
        Backend::Plaintext => Arc::new(PlaintextBackend::new(store.clone())),
        Backend::Keyring(service) => Arc::new(KeyringBackend::new(
            Arc::new(service.clone()),
            "keeper-test",
        )),
    };
    AccountRegistry::open(store, secrets, RegistryConfig::default())
        .await
        .expect("open registry")
}

fn read_keyfile(dir: &Path) -> BTreeMap<AccountGroup, BTreeMap<String, String>> {
    let text = fs::read_to_string(dir.join(ACCOUNTS_FILE)).unwrap_or_default();
    keyfile::parse(&text).expect("account file parses")
}

fn work_params() -> BTreeMap<String, Value> {
    [
        ("account", Value::from("dontdivert@example.com")),
        ("password", Value::from("secrecy")),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

async fn account_survives_restart(backend: Backend) {
    let dir = tempfile::tempdir().expect("tempdir");
    let group: AccountGroup = GROUP.parse().expect("group");

    let registry = start(dir.path(), &backend).await;
    assert!(registry.list_accounts().await.expect("list").is_empty());

    let created = registry
        .create_account("fakecm", "fakeprotocol", work_params())
        .await
        .expect("create");
    assert_eq!(created, group);

    registry
        .set_property(&group, "DisplayName", "Work account")
        .await
        .expect("DisplayName");
    registry
        .set_property(&group, "Icon", "im-jabber")
        .await
        .expect("Icon");
    registry
        .set_property(&group, "Nickname", "Joe Bloggs")
        .await
        .expect("Nickname");

    // Daemon dies; only what reached disk (or the keyring) is left.
    drop(registry);

    let kf = read_keyfile(dir.path());
    let section = kf.get(&group).expect("group section present");
    assert_eq!(section["manager"], "fakecm");
    assert_eq!(section["protocol"], "fakeprotocol");
    assert_eq!(section["param-account"], "dontdivert@example.com");
    assert_eq!(section["DisplayName"], "Work account");
    assert_eq!(section["Icon"], "im-jabber");
    assert_eq!(section["Nickname"], "Joe Bloggs");
    if backend.uses_keyring() {
        assert!(!section.contains_key("param-password"), "{section:?}");
        let raw = fs::read_to_string(dir.path().join(ACCOUNTS_FILE)).expect("read");
        assert!(!raw.contains("secrecy"));
    } else {
        assert_eq!(section["param-password"], "secrecy");
    }

    let registry = start(dir.path(), &backend).await;
    assert_eq!(
        registry
            .get_secret_param(&group, "param-password")
            .await
            .expect("password readable whatever the backend"),
        "secrecy"
    );
    assert_eq!(registry.list_accounts().await.expect("list"), vec![group.clone()]);

    registry.remove_account(&group).await.expect("remove");
    drop(registry);

    assert!(!read_keyfile(dir.path()).contains_key(&group));
    if let Backend::Keyring(service) = &backend {
        assert!(service.values().is_empty(), "secret left behind");
    }

    let registry = start(dir.path(), &backend).await;
    assert!(registry.list_accounts().await.expect("list").is_empty());
    let err = registry
        .get_secret_param(&group, "param-password")
        .await
        .expect_err("removed");
    assert!(matches!(err, KeeperError::UnknownGroup { .. }));
}

#[tokio::test]
async fn plaintext_account_survives_restart() {
    account_survives_restart(Backend::Plaintext).await;
}

#[tokio::test]
async fn keyring_account_survives_restart() {
    account_survives_restart(Backend::keyring()).await;
}

#[tokio::test]
async fn secrets_never_reach_the_file_with_keyring() {
    let dir = tempfile::tempdir().expect("tempdir");
    let backend = Backend::keyring();
    let registry = start(dir.path(), &backend).await;

    let group = registry
        .create_account("fakecm", "fakeprotocol", work_params())
        .await
        .expect("create");
    registry
        .set_property(&group, "param-password", "rotated-1")
        .await
        .expect("rotate");
    let mut other = work_params();
    other.insert("account".into(), Value::from("second@example.com"));
    other.insert("password".into(), Value::from("rotated-2"));
    let second = registry
        .create_account("fakecm", "fakeprotocol", other)
        .await
        .expect("create second");
    registry.remove_account(&group).await.expect("remove first");

    let raw = fs::read_to_string(dir.path().join(ACCOUNTS_FILE)).expect("read");
    for secret in ["secrecy", "rotated-1", "rotated-2"] {
        assert!(!raw.contains(secret), "{secret} leaked into {raw}");
    }
    assert_eq!(
        registry
            .get_secret_param(&second, "param-password")
            .await
            .expect("second password"),
        "rotated-2"
    );
}

#[tokio::test]
async fn interrupted_removal_is_finished_on_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let service = InMemorySecretService::new();
    let backend = Backend::Keyring(service.clone());
    let registry = start(dir.path(), &backend).await;
    let group = registry
        .create_account("fakecm", "fakeprotocol", work_params())
        .await
        .expect("create");

    service.set_available(false);
    let err = registry
        .remove_account(&group)
        .await
        .expect_err("keyring offline");
    assert!(matches!(err, KeeperError::PartialRemoval { .. }));
    drop(registry);

    service.set_available(true);
    let registry = start(dir.path(), &backend).await;
    assert!(registry.list_accounts().await.expect("list").is_empty());
    assert!(!read_keyfile(dir.path()).contains_key(&group));
    assert!(service.values().is_empty());
}

#[tokio::test]
async fn corrupt_account_file_is_fatal() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join(ACCOUNTS_FILE), "[fakecm/fakeprotocol\nmanager=fakecm\n")
        .expect("write");

    let err = AttributeStore::open_in(dir.path()).expect_err("corrupt");
    assert!(matches!(err, KeeperError::CorruptStore { line: 1, .. }));
}
