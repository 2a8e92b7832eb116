//! End-to-end tests for divergence detection and repair.

mod common;

use std::process::Command;

use common::TestProject;
use keel::ConsistencyEngine;
use keel::atomic::CreateStory;
use keel::model::StoryStatus;
use keel::services::{NewEpic, NewStory};

#[test]
fn clean_project_has_no_issues() {
    let project = TestProject::new();
    let coordinator = project.coordinator();
    let engine = ConsistencyEngine::new(project.root(), &coordinator);

    let report = engine.check().unwrap();
    assert!(!report.has_issues(), "{report:?}");
}

#[test]
fn deleted_story_file_is_detected_and_repaired() {
    let project = TestProject::new();
    let manager = project.manager();
    manager
        .coordinator()
        .create_epic(&NewEpic::new(1, "Auth"))
        .unwrap();
    manager
        .create_story(&CreateStory {
            story: NewStory::new(1, 1, "Login"),
            file_path: None,
            content: "# Story 1.1: Login\n".to_owned(),
            auto_update_epic: false,
            commit_message: None,
        })
        .unwrap();

    // Delete the story file outside the manager, committing the deletion.
    Command::new("git")
        .args(["rm", "docs/stories/story-1.1.md"])
        .current_dir(project.root())
        .output()
        .unwrap();
    project.git.commit("remove story file out of band", false).unwrap();

    let coordinator = project.coordinator();
    let engine = ConsistencyEngine::new(project.root(), &coordinator);
    let report = engine.check().unwrap();
    assert_eq!(report.orphaned_records.len(), 1, "{report:?}");
    assert!(report.uncommitted_changes.is_empty());

    let summary = engine.repair(&report, true).unwrap();
    assert_eq!(summary.repaired, 1);
    assert_eq!(summary.failed, 0);

    // The orphan row is gone and the repair is committed.
    assert!(coordinator.stories.get(1, 1).unwrap().is_none());
    assert!(
        project
            .last_commit_subject()
            .starts_with("chore(consistency): repair"),
        "{}",
        project.last_commit_subject()
    );

    // check → repair → check converges.
    let after = engine.check().unwrap();
    assert!(!after.has_issues(), "{after:?}");
}

#[test]
fn unregistered_file_is_registered_with_inferred_state() {
    let project = TestProject::new();
    project.commit_file(
        "docs/stories/story-2.1.md",
        "# Story 2.1: Password reset\n",
        "feat(story-2.1): complete password reset",
    );

    let coordinator = project.coordinator();
    let engine = ConsistencyEngine::new(project.root(), &coordinator);
    let report = engine.check().unwrap();
    assert_eq!(report.unregistered_files.len(), 1);

    engine.repair(&report, true).unwrap();

    let story = coordinator.stories.get(2, 1).unwrap().unwrap();
    assert_eq!(story.title, "Password reset");
    assert_eq!(story.status, StoryStatus::Completed, "status inferred from git");
}

#[test]
fn state_mismatch_is_updated_to_git_inferred_state() {
    let project = TestProject::new();
    project.commit_file(
        "docs/stories/story-3.1.md",
        "# Story 3.1: Search\n",
        "chore(story-3.1): wip",
    );

    let coordinator = project.coordinator();
    // Register the story with a status that disagrees with git history.
    coordinator
        .create_story(
            &NewStory {
                metadata: serde_json::json!({"file_path": "docs/stories/story-3.1.md"}),
                ..NewStory::new(3, 1, "Search")
            },
            false,
        )
        .unwrap();

    let engine = ConsistencyEngine::new(project.root(), &coordinator);
    let report = engine.check().unwrap();
    assert_eq!(report.state_mismatches.len(), 1);
    let mismatch = &report.state_mismatches[0];
    assert_eq!(mismatch.db_state, Some(StoryStatus::Pending));
    assert_eq!(mismatch.git_state, Some(StoryStatus::InProgress));

    engine.repair(&report, false).unwrap();
    let story = coordinator.stories.get(3, 1).unwrap().unwrap();
    assert_eq!(story.status, StoryStatus::InProgress);
}

#[test]
fn uncommitted_changes_are_warned_never_repaired() {
    let project = TestProject::new();
    let coordinator = project.coordinator();
    std::fs::write(project.root().join("scratch.md"), "wip").unwrap();

    let engine = ConsistencyEngine::new(project.root(), &coordinator);
    let report = engine.check().unwrap();
    assert_eq!(report.uncommitted_changes.len(), 1);
    assert!(report.has_issues());
    assert_eq!(report.repairable_issues().count(), 0);

    // Repair is a no-op that succeeds without creating a commit.
    let head_before = project.git.head_revision().unwrap();
    let summary = engine.repair(&report, true).unwrap();
    assert_eq!(summary.repaired, 0);
    assert_eq!(project.git.head_revision().unwrap(), head_before);
    assert!(project.root().join("scratch.md").exists());
}
