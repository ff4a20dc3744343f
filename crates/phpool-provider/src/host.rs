use crate::HostError;
use phpool_schema::{GroupName, OsFamily, Username};
use serde::Serialize;
use std::ffi::{CStr, CString};
use std::path::Path;
use std::process::Command;
use tracing::debug;

/// A system account as seen by the pool manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserInfo {
    pub name: Username,
    pub uid: u32,
    pub gid: u32,
    pub primary_group: GroupName,
}

pub trait UserLookup: Send + Sync {
    /// `Ok(None)` when no such account exists.
    fn lookup(&self, username: &Username) -> Result<Option<UserInfo>, HostError>;
}

/// Reads the host user and group databases (NSS) through libc.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemUsers;

impl SystemUsers {
    pub fn new() -> Self {
        Self
    }
}

const MAX_NSS_BUF: usize = 1 << 20;

#[allow(unsafe_code)]
fn getpwnam(name: &str) -> Result<Option<(u32, u32)>, HostError> {
    let cname = CString::new(name).map_err(|e| HostError::UserDatabase {
        name: name.to_owned(),
        reason: e.to_string(),
    })?;
    let mut buf: Vec<libc::c_char> = vec![0; 1024];
    loop {
        // SAFETY: passwd is plain data; getpwnam_r fills it and points its
        // string fields into `buf`, which outlives every read below.
        let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
        let mut result: *mut libc::passwd = std::ptr::null_mut();
        let rc = unsafe {
            libc::getpwnam_r(
                cname.as_ptr(),
                &mut pwd,
                buf.as_mut_ptr(),
                buf.len(),
                &mut result,
            )
        };
        if rc == libc::ERANGE && buf.len() < MAX_NSS_BUF {
            buf.resize(buf.len() * 2, 0);
            continue;
        }
        if rc != 0 {
            return Err(HostError::UserDatabase {
                name: name.to_owned(),
                reason: std::io::Error::from_raw_os_error(rc).to_string(),
            });
        }
        if result.is_null() {
            return Ok(None);
        }
        return Ok(Some((pwd.pw_uid, pwd.pw_gid)));
    }
}

#[allow(unsafe_code)]
fn getgrgid(gid: u32) -> Result<Option<String>, HostError> {
    let mut buf: Vec<libc::c_char> = vec![0; 1024];
    loop {
        // SAFETY: as in getpwnam; gr_name points into `buf`.
        let mut grp: libc::group = unsafe { std::mem::zeroed() };
        let mut result: *mut libc::group = std::ptr::null_mut();
        let rc = unsafe {
            libc::getgrgid_r(gid, &mut grp, buf.as_mut_ptr(), buf.len(), &mut result)
        };
        if rc == libc::ERANGE && buf.len() < MAX_NSS_BUF {
            buf.resize(buf.len() * 2, 0);
            continue;
        }
        if rc != 0 {
            return Err(HostError::UserDatabase {
                name: format!("gid {gid}"),
                reason: std::io::Error::from_raw_os_error(rc).to_string(),
            });
        }
        if result.is_null() || grp.gr_name.is_null() {
            return Ok(None);
        }
        let name = unsafe { CStr::from_ptr(grp.gr_name) };
        return Ok(Some(name.to_string_lossy().into_owned()));
    }
}

impl UserLookup for SystemUsers {
    fn lookup(&self, username: &Username) -> Result<Option<UserInfo>, HostError> {
        let Some((uid, gid)) = getpwnam(username)? else {
            debug!("no passwd entry for {username}");
            return Ok(None);
        };
        let group = getgrgid(gid)?.ok_or_else(|| HostError::UserDatabase {
            name: username.to_string(),
            reason: format!("primary group {gid} has no group entry"),
        })?;
        let primary_group = GroupName::parse(group).map_err(|e| HostError::UserDatabase {
            name: username.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Some(UserInfo {
            name: username.clone(),
            uid,
            gid,
            primary_group,
        }))
    }
}

pub(crate) fn command_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn family_from_distro_id(id: &str) -> Option<OsFamily> {
    let id = id.trim().to_ascii_lowercase();
    if ["redhat", "centos", "rocky", "alma", "fedora", "oracle"]
        .iter()
        .any(|d| id.contains(d))
    {
        return Some(OsFamily::Rhel);
    }
    if ["debian", "ubuntu"].iter().any(|d| id.contains(d)) {
        return Some(OsFamily::Debian);
    }
    None
}

/// Probe the host OS family under `root`: `/etc/redhat-release`, then
/// `/etc/debian_version`, then `lsb_release -is`. Defaults to RHEL.
pub fn detect_os_family_in(root: &Path) -> OsFamily {
    if root.join("etc/redhat-release").exists() {
        return OsFamily::Rhel;
    }
    if root.join("etc/debian_version").exists() {
        return OsFamily::Debian;
    }
    if root == Path::new("/") {
        if let Ok(out) = Command::new("lsb_release").arg("-is").output() {
            if out.status.success() {
                if let Some(f) = family_from_distro_id(&String::from_utf8_lossy(&out.stdout)) {
                    return f;
                }
            }
        }
    }
    debug!("could not determine OS family, assuming rhel");
    OsFamily::Rhel
}

pub fn detect_os_family() -> OsFamily {
    detect_os_family_in(Path::new("/"))
}
