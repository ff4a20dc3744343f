//! Deterministic doubles for the host seams: user database, supervisor and
//! package installer. None of them touch the host.

use crate::host::{UserInfo, UserLookup};
use crate::installer::{InstallOutcome, InstallPlan, PackageInstaller, PackageQuery};
use crate::supervisor::Supervisor;
use crate::{HostError, SupervisorError};
use phpool_schema::{GroupName, Username};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory user database. Accounts get sequential uids from 1000 and a
/// primary group named after the user unless one is given.
#[derive(Debug, Default)]
pub struct MockUsers {
    users: Mutex<BTreeMap<String, UserInfo>>,
}

impl MockUsers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`MockUsers::add`]. Panics on an invalid name.
    #[must_use]
    pub fn with_user(self, name: &str) -> Self {
        self.add(name, name);
        self
    }

    #[must_use]
    pub fn with_user_in_group(self, name: &str, group: &str) -> Self {
        self.add(name, group);
        self
    }

    pub fn add(&self, name: &str, group: &str) {
        let mut users = lock(&self.users);
        let id = 1000 + u32::try_from(users.len()).unwrap_or(u32::MAX - 1000);
        let info = UserInfo {
            name: Username::parse(name).unwrap_or_else(|e| panic!("mock user: {e}")),
            uid: id,
            gid: id,
            primary_group: GroupName::parse(group).unwrap_or_else(|e| panic!("mock group: {e}")),
        };
        users.insert(name.to_owned(), info);
    }

    pub fn remove(&self, name: &str) {
        lock(&self.users).remove(name);
    }
}

impl UserLookup for MockUsers {
    fn lookup(&self, username: &Username) -> Result<Option<UserInfo>, HostError> {
        Ok(lock(&self.users).get(username.as_str()).cloned())
    }
}

/// Records every reload; optionally fails them.
#[derive(Debug, Default)]
pub struct MockSupervisor {
    reloads: Mutex<Vec<String>>,
    failing: Mutex<bool>,
}

impl MockSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// A supervisor whose reloads all fail.
    #[must_use]
    pub fn failing() -> Self {
        let s = Self::default();
        s.set_failing(true);
        s
    }

    pub fn set_failing(&self, failing: bool) {
        *lock(&self.failing) = failing;
    }

    /// Services reloaded so far, in order, including failed attempts.
    pub fn reloads(&self) -> Vec<String> {
        lock(&self.reloads).clone()
    }
}

impl Supervisor for MockSupervisor {
    fn reload(&self, service: &str) -> Result<(), SupervisorError> {
        lock(&self.reloads).push(service.to_owned());
        if *lock(&self.failing) {
            return Err(SupervisorError::Failed {
                service: service.to_owned(),
                command: format!("systemctl reload {service}"),
                status: "exit status: 1".to_owned(),
                stderr: format!("Unit {service}.service not loaded."),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct InstallerState {
    plans: Vec<InstallPlan>,
    failure: Option<(String, String)>,
    installed: Vec<String>,
    available: Vec<String>,
    queries_fail: bool,
    queries: usize,
}

/// Records install plans instead of running them. Package queries answer from
/// configurable lists, filtered by the query pattern.
#[derive(Debug, Default)]
pub struct MockInstaller {
    state: Mutex<InstallerState>,
}

impl MockInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every plan handed to `install`, including failed ones.
    pub fn plans(&self) -> Vec<InstallPlan> {
        lock(&self.state).plans.clone()
    }

    /// Make every subsequent install fail at `step`.
    pub fn fail_with(&self, step: &str, message: &str) {
        lock(&self.state).failure = Some((step.to_owned(), message.to_owned()));
    }

    pub fn set_installed(&self, packages: &[&str]) {
        lock(&self.state).installed = packages.iter().map(|p| (*p).to_owned()).collect();
    }

    pub fn set_available(&self, packages: &[&str]) {
        lock(&self.state).available = packages.iter().map(|p| (*p).to_owned()).collect();
    }

    /// Make package queries fail as if the package manager were unreachable.
    pub fn fail_queries(&self) {
        lock(&self.state).queries_fail = true;
    }

    /// Package queries answered so far, failed ones included.
    pub fn query_count(&self) -> usize {
        lock(&self.state).queries
    }

    fn query(&self, query: &PackageQuery, available: bool) -> Result<Vec<String>, HostError> {
        let mut state = lock(&self.state);
        state.queries += 1;
        if state.queries_fail {
            return Err(HostError::CommandFailed {
                command: format!("mock query {}", query.pattern),
                message: "package manager unavailable".to_owned(),
            });
        }
        let names = if available {
            &state.available
        } else {
            &state.installed
        };
        Ok(names.iter().filter(|n| query.matches(n)).cloned().collect())
    }
}

impl PackageInstaller for MockInstaller {
    fn install(&self, plan: &InstallPlan) -> InstallOutcome {
        let mut state = lock(&self.state);
        state.plans.push(plan.clone());
        match &state.failure {
            Some((step, message)) => InstallOutcome::Failed {
                step: step.clone(),
                message: message.clone(),
            },
            None => InstallOutcome::Installed {
                message: format!("mock install of PHP {} via {}", plan.version, plan.provider),
            },
        }
    }

    fn installed_packages(&self, query: &PackageQuery) -> Result<Vec<String>, HostError> {
        self.query(query, false)
    }

    fn available_packages(&self, query: &PackageQuery) -> Result<Vec<String>, HostError> {
        self.query(query, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phpool_schema::OsFamily;

    #[test]
    fn users_are_sequential() {
        let users = MockUsers::new().with_user("alice").with_user_in_group("bob", "staff");
        let alice = users.lookup(&Username::parse("alice").unwrap()).unwrap().unwrap();
        let bob = users.lookup(&Username::parse("bob").unwrap()).unwrap().unwrap();
        assert_eq!(alice.uid, 1000);
        assert_eq!(alice.primary_group, "alice");
        assert_eq!(bob.uid, 1001);
        assert_eq!(bob.primary_group, "staff");
        users.remove("bob");
        assert!(users
            .lookup(&Username::parse("bob").unwrap())
            .unwrap()
            .is_none());
    }

    #[test]
    fn supervisor_records_and_fails() {
        let s = MockSupervisor::new();
        s.reload("lsws").unwrap();
        s.set_failing(true);
        assert!(s.reload("php82-php-fpm").is_err());
        assert_eq!(s.reloads(), ["lsws", "php82-php-fpm"]);
        assert!(MockSupervisor::failing().reload("x").is_err());
    }

    #[test]
    fn installer_filters_by_pattern() {
        let i = MockInstaller::new();
        i.set_installed(&["php82-php-fpm", "php82-php-cli", "nginx"]);
        let q = PackageQuery::new(OsFamily::Rhel, "php*-php-fpm");
        assert_eq!(i.installed_packages(&q).unwrap(), ["php82-php-fpm"]);
        assert!(i.available_packages(&q).unwrap().is_empty());
        i.fail_queries();
        assert!(i.installed_packages(&q).is_err());
        assert_eq!(i.query_count(), 3);
    }
}
