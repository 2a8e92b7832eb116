//! Shared fixture: a temp project with a real git repository, an ignored
//! state directory, and one initial commit.
#![allow(dead_code)]

use std::path::Path;
use std::process::Command;

use keel::AtomicStateManager;
use keel::StateCoordinator;
use keel::config::EngineConfig;
use keel_git::Git;
use tempfile::TempDir;

pub struct TestProject {
    // Held for its Drop; the directory lives as long as the fixture.
    _temp_dir: TempDir,
    pub git: Git,
}

impl TestProject {
    /// A fresh project: `git init`, identity config, `.gao-dev/` ignored,
    /// one initial commit.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("create temp dir");
        let root = temp_dir.path().to_path_buf();

        for args in [
            vec!["init"],
            vec!["config", "user.name", "Test User"],
            vec!["config", "user.email", "test@example.com"],
            vec!["config", "commit.gpgsign", "false"],
        ] {
            let status = Command::new("git")
                .args(&args)
                .current_dir(&root)
                .output()
                .expect("run git");
            assert!(status.status.success(), "git {args:?} failed");
        }

        std::fs::write(root.join(".gitignore"), ".gao-dev/\n").expect("write .gitignore");
        std::fs::write(root.join("README.md"), "# Test Project\n").expect("write README");

        let git = Git::new(&root);
        git.add_all().expect("git add");
        git.commit("Initial commit", false).expect("initial commit");

        Self {
            _temp_dir: temp_dir,
            git,
        }
    }

    pub fn root(&self) -> &Path {
        self.git.root()
    }

    /// An atomic manager over this project with default configuration.
    pub fn manager(&self) -> AtomicStateManager {
        AtomicStateManager::with_config(self.root().to_path_buf(), &EngineConfig::default())
            .expect("open atomic manager")
    }

    /// A coordinator over this project's state database.
    pub fn coordinator(&self) -> StateCoordinator {
        StateCoordinator::open(self.root().join(".gao-dev/documents.db"))
            .expect("open coordinator")
    }

    /// Write a file (creating parents) and commit everything dirty.
    pub fn commit_file(&self, rel_path: &str, content: &str, message: &str) {
        let full = self.root().join(rel_path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).expect("create parent dirs");
        }
        std::fs::write(&full, content).expect("write file");
        self.git.add_all().expect("git add");
        self.git.commit(message, false).expect("git commit");
    }

    /// Number of commits reachable from HEAD but not from `since`.
    pub fn commits_since(&self, since: &str) -> usize {
        let output = Command::new("git")
            .args(["rev-list", "--count", &format!("{since}..HEAD")])
            .current_dir(self.root())
            .output()
            .expect("git rev-list");
        String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse()
            .expect("parse commit count")
    }

    /// Subject of the most recent commit.
    pub fn last_commit_subject(&self) -> String {
        let output = Command::new("git")
            .args(["log", "-1", "--format=%s"])
            .current_dir(self.root())
            .output()
            .expect("git log");
        String::from_utf8_lossy(&output.stdout).trim().to_owned()
    }
}
