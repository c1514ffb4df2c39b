//! Account lookups and dropping root
//!
//! The listener binds its sockets as root and then switches to an
//! unprivileged account. The resolver stays privileged but hands its socket
//! to a group the listener belongs to.

use nix::unistd::{self, Gid, Group, Uid, User};

use crate::error::PrivilegeError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
}

fn check_name(name: &str) -> Result<(), PrivilegeError> {
    if name.is_empty() || name.contains('\0') {
        return Err(PrivilegeError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Look up a user in the system account database.
///
/// # Errors
///
/// Returns [`PrivilegeError::UnknownUser`] if no such account exists.
pub fn lookup_user(name: &str) -> Result<Account, PrivilegeError> {
    check_name(name)?;
    let user = User::from_name(name)
        .map_err(|source| PrivilegeError::Lookup {
            name: name.to_string(),
            source,
        })?
        .ok_or_else(|| PrivilegeError::UnknownUser(name.to_string()))?;

    Ok(Account {
        name: user.name,
        uid: user.uid.as_raw(),
        gid: user.gid.as_raw(),
    })
}

/// Look up a group id by name.
///
/// # Errors
///
/// Returns [`PrivilegeError::UnknownGroup`] if no such group exists.
pub fn lookup_group(name: &str) -> Result<u32, PrivilegeError> {
    check_name(name)?;
    let group = Group::from_name(name)
        .map_err(|source| PrivilegeError::Lookup {
            name: name.to_string(),
            source,
        })?
        .ok_or_else(|| PrivilegeError::UnknownGroup(name.to_string()))?;

    Ok(group.gid.as_raw())
}

/// Permanently switch to `user`, and to `group` or the user's primary group.
///
/// Running as the target account already is accepted, so the listener can be
/// started unprivileged.
///
/// # Errors
///
/// Returns an error if the accounts cannot be resolved, the process is not
/// allowed to switch, or root could be regained afterwards.
pub fn drop_privileges(user: &str, group: Option<&str>) -> Result<Account, PrivilegeError> {
    let mut account = lookup_user(user)?;
    if let Some(group) = group {
        account.gid = lookup_group(group)?;
    }

    let current = unistd::geteuid();
    if !current.is_root() {
        if current.as_raw() == account.uid {
            return Ok(account);
        }
        return Err(PrivilegeError::NotPermitted {
            current: current.as_raw(),
            target: account.uid,
        });
    }

    let gid = Gid::from_raw(account.gid);
    let uid = Uid::from_raw(account.uid);
    unistd::setgroups(&[gid]).map_err(|source| PrivilegeError::Call {
        call: "setgroups",
        source,
    })?;
    unistd::setgid(gid).map_err(|source| PrivilegeError::Call {
        call: "setgid",
        source,
    })?;
    unistd::setuid(uid).map_err(|source| PrivilegeError::Call {
        call: "setuid",
        source,
    })?;

    if !uid.is_root() && unistd::setuid(Uid::from_raw(0)).is_ok() {
        return Err(PrivilegeError::Regained);
    }

    Ok(account)
}
