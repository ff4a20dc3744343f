//! End-to-end pool lifecycle against a temporary store and host root, with
//! the host seams replaced by the in-crate doubles.

use phpool_core::{Collaborators, CoreError, ManagerConfig, PoolManager};
use phpool_provider::mock::{MockInstaller, MockSupervisor, MockUsers};
use phpool_provider::{Supervisor, SupervisorError};
use phpool_schema::{OsFamily, PoolSettings, ProviderKind, SettingsOverrides, Status};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Barrier, Mutex};
use std::time::Duration;

struct Harness {
    dir: tempfile::TempDir,
    manager: PoolManager,
    supervisor: Arc<MockSupervisor>,
    installer: Arc<MockInstaller>,
}

fn harness(os: OsFamily) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = Arc::new(MockSupervisor::new());
    let installer = Arc::new(MockInstaller::new());
    let manager = open(dir.path(), os, &supervisor, &installer);
    Harness {
        dir,
        manager,
        supervisor,
        installer,
    }
}

fn open(
    root: &Path,
    os: OsFamily,
    supervisor: &Arc<MockSupervisor>,
    installer: &Arc<MockInstaller>,
) -> PoolManager {
    PoolManager::new(
        ManagerConfig {
            store_root: root.join("state"),
            host_root: root.join("host"),
            os_family: os,
            default_provider: ProviderKind::Remi,
        },
        Collaborators {
            users: Arc::new(
                MockUsers::new()
                    .with_user("alice")
                    .with_user("bob")
                    .with_user_in_group("carol", "staff"),
            ),
            supervisor: supervisor.clone(),
            installer: installer.clone(),
        },
    )
    .unwrap()
}

impl Harness {
    fn host(&self, logical: &str) -> PathBuf {
        self.manager.host_path(Path::new(logical))
    }

    fn pools_table(&self) -> PathBuf {
        self.dir.path().join("state/store/registry/pools")
    }

    /// Make every pool row write fail with an I/O error.
    fn break_pools_table(&self) {
        fs::remove_dir_all(self.pools_table()).unwrap();
        fs::write(self.pools_table(), "not a directory").unwrap();
    }

    fn repair_pools_table(&self) {
        fs::remove_file(self.pools_table()).unwrap();
        fs::create_dir_all(self.pools_table()).unwrap();
    }
}

/// Succeeds on every reload, but once armed parks the next one until released.
#[derive(Default)]
struct GatedSupervisor {
    gate: Mutex<Option<(mpsc::Sender<()>, mpsc::Receiver<()>)>>,
}

impl GatedSupervisor {
    /// Returns a receiver that fires when a reload parks, and the sender that
    /// releases it.
    fn arm(&self) -> (mpsc::Receiver<()>, mpsc::Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        *self.gate.lock().unwrap() = Some((entered_tx, release_rx));
        (entered_rx, release_tx)
    }
}

impl Supervisor for GatedSupervisor {
    fn reload(&self, _service: &str) -> Result<(), SupervisorError> {
        let gate = self.gate.lock().unwrap().take();
        if let Some((entered, release)) = gate {
            entered.send(()).unwrap();
            release.recv().unwrap();
        }
        Ok(())
    }
}

fn set(pairs: &[&str]) -> SettingsOverrides {
    let mut o = SettingsOverrides::default();
    for p in pairs {
        o.set_assignment(p).unwrap();
    }
    o
}

#[test]
fn alice_on_rhel() {
    let h = harness(OsFamily::Rhel);
    let pool = h.manager.create_pool("alice", "8.2", Some("remi")).unwrap();

    assert_eq!(pool.username, "alice");
    assert_eq!(pool.group, "alice");
    assert_eq!(pool.provider, ProviderKind::Remi);
    assert_eq!(pool.status, Status::Active);
    assert_eq!(
        pool.config_path,
        PathBuf::from("/etc/opt/remi/php82/php-fpm.d/alice.conf")
    );
    assert_eq!(
        pool.socket_path,
        PathBuf::from("/var/opt/remi/php82/run/php-fpm/alice.sock")
    );

    let conf = fs::read_to_string(h.host("/etc/opt/remi/php82/php-fpm.d/alice.conf")).unwrap();
    assert!(conf.starts_with("[alice]\n"));
    assert!(conf.contains("listen = /var/opt/remi/php82/run/php-fpm/alice.sock\n"));
    assert!(conf.contains("pm.max_children = 50\n"));
    assert!(h.host("/var/opt/remi/php82/run/php-fpm").is_dir());

    assert_eq!(h.supervisor.reloads(), ["php82-php-fpm"]);
    let versions = h.manager.list_runtime_versions().unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].version.to_string(), "8.2");
    assert_eq!(versions[0].provider, ProviderKind::Remi);
    assert_eq!(h.manager.get_pool("alice").unwrap(), pool);
}

#[test]
fn alice_on_debian_uses_ondrej_layout() {
    let h = harness(OsFamily::Debian);
    h.manager.create_pool("alice", "8.1", None).unwrap();
    assert!(h.host("/etc/php/8.1/fpm/pool.d/alice.conf").is_file());
    assert_eq!(h.supervisor.reloads(), ["php8.1-fpm"]);
}

#[test]
fn carol_gets_her_primary_group() {
    let h = harness(OsFamily::Rhel);
    let pool = h.manager.create_pool("carol", "8.3", Some("lsphp")).unwrap();
    assert_eq!(pool.group, "staff");
    let conf = fs::read_to_string(h.host("/usr/local/lsws/conf/carol-8.3.conf")).unwrap();
    assert!(conf.contains("group = staff\n"));
    assert!(conf.contains("listen = /tmp/lsphp83-carol.sock\n"));
    assert_eq!(h.supervisor.reloads(), ["lsws"]);
}

#[test]
fn bob_with_unknown_version_leaves_nothing_behind() {
    let h = harness(OsFamily::Rhel);
    let err = h.manager.create_pool("bob", "9.9", Some("remi")).unwrap_err();
    assert!(matches!(err, CoreError::InvalidVersion { .. }), "{err}");
    assert!(!h.host("/etc/opt/remi/php99/php-fpm.d/bob.conf").exists());
    assert!(h.manager.list_pools().unwrap().is_empty());
    assert!(h.manager.list_runtime_versions().unwrap().is_empty());
    assert!(h.supervisor.reloads().is_empty());
}

#[test]
fn validation_errors() {
    let h = harness(OsFamily::Rhel);
    assert!(matches!(
        h.manager.create_pool("mallory", "8.2", None),
        Err(CoreError::UnknownUser(u)) if u == "mallory"
    ));
    assert!(matches!(
        h.manager.create_pool("alice", "8.2", Some("ondrej")),
        Err(CoreError::InvalidProvider(p)) if p == "ondrej"
    ));
    assert!(matches!(
        h.manager.create_pool("alice", "eight", None),
        Err(CoreError::InvalidVersion { .. })
    ));
    assert!(matches!(
        h.manager.create_pool("alice", "7.3", None),
        Err(CoreError::InvalidVersion { .. })
    ));
    assert!(matches!(
        h.manager.create_pool("../root", "8.2", None),
        Err(CoreError::Schema(_))
    ));
    assert!(matches!(
        h.manager
            .create_pool_with("alice", "8.2", None, &set(&["max_children=0"])),
        Err(CoreError::Schema(_))
    ));
    assert!(h.manager.list_pools().unwrap().is_empty());
    assert!(h.supervisor.reloads().is_empty());
}

#[test]
fn second_create_for_same_user_is_rejected() {
    let h = harness(OsFamily::Rhel);
    h.manager.create_pool("alice", "8.2", None).unwrap();
    let err = h
        .manager
        .create_pool("alice", "8.1", Some("lsphp"))
        .unwrap_err();
    assert!(matches!(err, CoreError::PoolAlreadyExists { .. }));
    assert!(!h.host("/usr/local/lsws/conf/alice-8.1.conf").exists());
    assert_eq!(h.manager.list_pools().unwrap().len(), 1);
}

#[test]
fn existing_file_is_never_overwritten() {
    let h = harness(OsFamily::Rhel);
    let path = h.host("/etc/opt/remi/php82/php-fpm.d/alice.conf");
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "; hand written\n").unwrap();

    let err = h.manager.create_pool("alice", "8.2", None).unwrap_err();
    assert!(matches!(err, CoreError::PoolAlreadyExists { path: Some(_), .. }));
    assert_eq!(fs::read_to_string(&path).unwrap(), "; hand written\n");
    assert!(h.manager.list_pools().unwrap().is_empty());
}

#[test]
fn registry_failure_rolls_back_the_file() {
    let h = harness(OsFamily::Rhel);
    h.break_pools_table();

    let err = h.manager.create_pool("alice", "8.2", None).unwrap_err();
    assert!(matches!(err, CoreError::Registry(_)), "{err}");
    assert!(!err.is_committed());
    assert!(!h.host("/etc/opt/remi/php82/php-fpm.d/alice.conf").exists());
    assert!(h.supervisor.reloads().is_empty());

    h.repair_pools_table();
    assert!(h.manager.list_pools().unwrap().is_empty());
    let journal = fs::read_dir(h.dir.path().join("state/store/wal")).unwrap().count();
    assert_eq!(journal, 0);

    // nothing left over blocks a retry
    h.manager.create_pool("alice", "8.2", None).unwrap();
}

#[test]
fn concurrent_creates_have_one_winner() {
    for _ in 0..5 {
        let h = Arc::new(harness(OsFamily::Rhel));
        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = [("8.2", "remi"), ("8.2", "remi")]
            .into_iter()
            .map(|(v, p)| {
                let h = Arc::clone(&h);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    h.manager.create_pool("alice", v, Some(p))
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|t| t.join().unwrap()).collect();

        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1, "{results:?}");
        for r in &results {
            if let Err(e) = r {
                assert!(
                    matches!(e, CoreError::PoolAlreadyExists { .. } | CoreError::Registry(_)),
                    "{e}"
                );
            }
        }
        let winner = results.into_iter().find_map(Result::ok).unwrap();
        assert_eq!(h.manager.list_pools().unwrap(), vec![winner]);
        assert!(h
            .host("/etc/opt/remi/php82/php-fpm.d/alice.conf")
            .is_file());
    }
}

#[test]
fn concurrent_creates_across_providers_have_one_winner() {
    let h = Arc::new(harness(OsFamily::Rhel));
    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = ["remi", "lsphp"]
        .into_iter()
        .map(|p| {
            let h = Arc::clone(&h);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                h.manager.create_pool("bob", "8.2", Some(p))
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|t| t.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);

    // the loser's file, if it got that far, was removed
    let pool = h.manager.get_pool("bob").unwrap();
    let (mine, other) = match pool.provider {
        ProviderKind::Remi => (
            "/etc/opt/remi/php82/php-fpm.d/bob.conf",
            "/usr/local/lsws/conf/bob-8.2.conf",
        ),
        _ => (
            "/usr/local/lsws/conf/bob-8.2.conf",
            "/etc/opt/remi/php82/php-fpm.d/bob.conf",
        ),
    };
    assert!(h.host(mine).is_file());
    assert!(!h.host(other).exists());
}

#[test]
fn delete_and_reconfigure_of_one_pool_never_interleave() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = Arc::new(GatedSupervisor::default());
    let manager = Arc::new(
        PoolManager::new(
            ManagerConfig {
                store_root: dir.path().join("state"),
                host_root: dir.path().join("host"),
                os_family: OsFamily::Rhel,
                default_provider: ProviderKind::Remi,
            },
            Collaborators {
                users: Arc::new(MockUsers::new().with_user("alice")),
                supervisor: supervisor.clone(),
                installer: Arc::new(MockInstaller::new()),
            },
        )
        .unwrap(),
    );
    manager.create_pool("alice", "8.2", None).unwrap();
    let conf = manager.host_path(Path::new("/etc/opt/remi/php82/php-fpm.d/alice.conf"));

    let (entered, release) = supervisor.arm();
    let deleter = {
        let manager = Arc::clone(&manager);
        std::thread::spawn(move || manager.delete_pool("alice"))
    };
    // delete has removed the file and is parked in its reload
    entered.recv().unwrap();
    let reconfigurer = {
        let manager = Arc::clone(&manager);
        std::thread::spawn(move || manager.reconfigure_pool("alice", &set(&["max_children=80"])))
    };
    std::thread::sleep(Duration::from_millis(100));
    release.send(()).unwrap();

    deleter.join().unwrap().unwrap();
    let reconfigured = reconfigurer.join().unwrap();
    assert!(
        matches!(reconfigured, Err(CoreError::PoolNotFound(_))),
        "{reconfigured:?}"
    );
    assert!(matches!(
        manager.get_pool("alice"),
        Err(CoreError::PoolNotFound(_))
    ));
    assert!(!conf.exists());
    assert!(manager.check_pools().unwrap().is_clean());
}

#[test]
fn delete_removes_everything() {
    let h = harness(OsFamily::Rhel);
    h.manager.create_pool("alice", "8.2", None).unwrap();
    let removed = h.manager.delete_pool("alice").unwrap();
    assert_eq!(removed.username, "alice");
    assert!(!h.host("/etc/opt/remi/php82/php-fpm.d/alice.conf").exists());
    assert!(matches!(
        h.manager.get_pool("alice"),
        Err(CoreError::PoolNotFound(_))
    ));
    assert_eq!(h.supervisor.reloads(), ["php82-php-fpm", "php82-php-fpm"]);
    // the runtime stays registered
    assert_eq!(h.manager.list_runtime_versions().unwrap().len(), 1);
}

#[test]
fn delete_tolerates_missing_file() {
    let h = harness(OsFamily::Rhel);
    h.manager.create_pool("alice", "8.2", None).unwrap();
    fs::remove_file(h.host("/etc/opt/remi/php82/php-fpm.d/alice.conf")).unwrap();

    h.manager.delete_pool("alice").unwrap();
    assert!(h.manager.list_pools().unwrap().is_empty());
}

#[test]
fn delete_unknown_pool() {
    let h = harness(OsFamily::Rhel);
    assert!(matches!(
        h.manager.delete_pool("alice"),
        Err(CoreError::PoolNotFound(u)) if u == "alice"
    ));
}

#[test]
fn reconfigure_preserves_unset_fields() {
    let h = harness(OsFamily::Rhel);
    h.manager.create_pool("alice", "8.2", None).unwrap();
    h.manager
        .reconfigure_pool("alice", &set(&["memory_limit=256M"]))
        .unwrap();
    let pool = h
        .manager
        .reconfigure_pool("alice", &set(&["max_children=80"]))
        .unwrap();

    assert_eq!(pool.settings.memory_limit, "256M");
    assert_eq!(pool.settings.max_children, 80);
    assert_eq!(
        pool.settings.max_requests,
        PoolSettings::default().max_requests
    );
    let conf = fs::read_to_string(h.host("/etc/opt/remi/php82/php-fpm.d/alice.conf")).unwrap();
    assert!(conf.contains("php_admin_value[memory_limit] = 256M\n"));
    assert!(conf.contains("pm.max_children = 80\n"));
    assert_eq!(h.manager.get_pool("alice").unwrap().settings, pool.settings);
    assert_eq!(h.supervisor.reloads().len(), 3);
}

#[test]
fn reconfigure_rejects_invalid_settings_before_writing() {
    let h = harness(OsFamily::Rhel);
    h.manager.create_pool("alice", "8.2", None).unwrap();
    let path = h.host("/etc/opt/remi/php82/php-fpm.d/alice.conf");
    let before = fs::read_to_string(&path).unwrap();

    let err = h
        .manager
        .reconfigure_pool("alice", &set(&["start_servers=40"]))
        .unwrap_err();
    assert!(matches!(err, CoreError::Schema(_)), "{err}");
    assert_eq!(fs::read_to_string(&path).unwrap(), before);
}

#[test]
fn reload_failure_is_reported_as_committed() {
    let h = harness(OsFamily::Rhel);
    h.supervisor.set_failing(true);

    let err = h.manager.create_pool("alice", "8.2", None).unwrap_err();
    assert!(err.is_committed());
    assert!(matches!(err, CoreError::Reload { ref service, .. } if service == "php82-php-fpm"));
    assert!(h.manager.get_pool("alice").is_ok());
    assert!(h.host("/etc/opt/remi/php82/php-fpm.d/alice.conf").is_file());

    let err = h
        .manager
        .reconfigure_pool("alice", &set(&["memory_limit=256M"]))
        .unwrap_err();
    assert!(err.is_committed());
    let conf = fs::read_to_string(h.host("/etc/opt/remi/php82/php-fpm.d/alice.conf")).unwrap();
    assert!(conf.contains("256M"));

    let err = h.manager.delete_pool("alice").unwrap_err();
    assert!(err.is_committed());
    assert!(h.manager.list_pools().unwrap().is_empty());
}

#[test]
fn doctor_reports_missing_configuration() {
    let h = harness(OsFamily::Rhel);
    h.manager.create_pool("alice", "8.2", None).unwrap();
    h.manager.create_pool("bob", "8.2", None).unwrap();
    assert!(h.manager.check_pools().unwrap().is_clean());

    fs::remove_file(h.host("/etc/opt/remi/php82/php-fpm.d/bob.conf")).unwrap();
    let report = h.manager.check_pools().unwrap();
    assert_eq!(report.pools_checked, 2);
    assert_eq!(report.drift.len(), 1);
    assert_eq!(report.drift[0].username, "bob");
    // report only
    assert_eq!(h.manager.list_pools().unwrap().len(), 2);
}

#[test]
fn runtime_operations() {
    let h = harness(OsFamily::Rhel);
    let row = h.manager.install_runtime(Some("lsphp"), "8.1").unwrap();
    assert_eq!(row.provider, ProviderKind::LiteSpeed);
    assert_eq!(h.installer.plans().len(), 1);

    let (kind, installed) = h.manager.list_installed_runtimes(Some("lsphp")).unwrap();
    assert_eq!(kind, ProviderKind::LiteSpeed);
    assert_eq!(installed.len(), 1);

    let (kind, catalog) = h.manager.list_available_runtimes(None).unwrap();
    assert_eq!(kind, ProviderKind::Remi);
    assert!(!catalog.versions.is_empty());

    assert!(matches!(
        h.manager.install_runtime(Some("docker"), "8.2"),
        Err(CoreError::NotImplemented { .. })
    ));
    assert!(matches!(
        h.manager.list_installed_runtimes(Some("alt-php")),
        Err(CoreError::NotImplemented { .. })
    ));
    assert!(matches!(
        h.manager.list_available_runtimes(Some("nope")),
        Err(CoreError::UnknownProvider(_))
    ));
}

#[test]
fn install_failure_is_fatal_only_to_install() {
    let h = harness(OsFamily::Debian);
    h.installer
        .fail_with("install packages", "E: Unable to locate package php8.3-fpm");
    assert!(matches!(
        h.manager.install_runtime(None, "8.3"),
        Err(CoreError::Install { .. })
    ));
    // pools do not go through the installer
    h.manager.create_pool("alice", "8.3", None).unwrap();
    // nor does version validation query the package manager
    assert_eq!(h.installer.query_count(), 0);
}

#[test]
fn pools_survive_reopen() {
    let h = harness(OsFamily::Rhel);
    h.manager.create_pool("alice", "8.2", None).unwrap();
    let reopened = open(h.dir.path(), OsFamily::Rhel, &h.supervisor, &h.installer);
    assert_eq!(reopened.list_pools().unwrap().len(), 1);
}
