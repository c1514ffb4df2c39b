//! On-disk mail host fixture
//!
//! Builds a throwaway control directory, `users/assign` and `passwd` files
//! and home directories so the resolver can be exercised exactly as it runs
//! in production.

#![allow(dead_code)]

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, SystemTime},
};

use postern_resolver::{
    ConfigStore, FsDotFileStore, MemoryUserSource, Resolver, ResolverConfig, UserSource,
    UserSourceConfig,
};
use tempfile::TempDir;

pub struct MailHost {
    root: TempDir,
    passwd: Vec<String>,
    next_uid: u32,
}

impl MailHost {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("control")).unwrap();
        fs::create_dir_all(root.path().join("alias")).unwrap();

        Self {
            root,
            passwd: Vec::new(),
            next_uid: 1000,
        }
    }

    pub fn control_dir(&self) -> PathBuf {
        self.root.path().join("control")
    }

    pub fn alias_home(&self) -> PathBuf {
        self.root.path().join("alias")
    }

    pub fn home(&self, user: &str) -> PathBuf {
        self.root.path().join("home").join(user)
    }

    /// Write a control file with a modification time in the future, so that
    /// rewriting it within the same second still registers as a change.
    pub fn control(&self, name: &str, content: &str) -> &Self {
        write_later(&self.control_dir().join(name), content);
        self
    }

    pub fn user(&mut self, name: &str) -> &mut Self {
        let home = self.home(name);
        fs::create_dir_all(&home).unwrap();
        self.passwd.push(format!(
            "{name}:x:{uid}:100::{home}:/bin/sh",
            uid = self.next_uid,
            home = home.display()
        ));
        self.next_uid += 1;
        fs::write(self.passwd_path(), self.passwd.join("\n") + "\n").unwrap();
        self
    }

    pub fn dotfile(&self, home: &Path, file: &str, content: &str) -> &Self {
        fs::write(home.join(file), content).unwrap();
        self
    }

    pub fn passwd_path(&self) -> PathBuf {
        self.root.path().join("passwd")
    }

    pub fn assign_path(&self) -> PathBuf {
        self.root.path().join("assign")
    }

    /// Write `users/assign` entries, followed by the terminating `.` line.
    pub fn assign(&self, entries: &[String]) -> &Self {
        let mut content = entries.join("\n");
        content.push_str("\n.\n");
        write_later(&self.assign_path(), &content);
        self
    }

    pub fn settings(&self) -> ResolverConfig {
        ResolverConfig {
            control_dir: self.control_dir(),
            users: vec![
                UserSourceConfig::Assign {
                    path: self.assign_path(),
                },
                UserSourceConfig::Passwd {
                    path: self.passwd_path(),
                },
            ],
            alias_home: Some(self.alias_home()),
            backend_timeout_ms: 200,
            ..ResolverConfig::default()
        }
    }

    pub fn resolver(&self) -> Resolver {
        Resolver::from_config(self.settings()).unwrap()
    }

    /// A resolver that also consults `extra` after the assign and passwd
    /// files.
    pub fn resolver_with(&self, extra: Arc<MemoryUserSource>) -> Resolver {
        let extra: Vec<Arc<dyn UserSource>> = vec![extra];
        let store = ConfigStore::open_with(self.settings(), extra).unwrap();
        Resolver::new(Arc::new(store), Arc::new(FsDotFileStore)).unwrap()
    }
}

pub fn write_later(path: &Path, content: &str) {
    let previous = fs::metadata(path).and_then(|m| m.modified()).ok();
    fs::write(path, content).unwrap();

    let mut stamp = SystemTime::now() + Duration::from_secs(60);
    if let Some(previous) = previous {
        stamp = stamp.max(previous + Duration::from_secs(1));
    }
    fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(stamp)
        .unwrap();
}
