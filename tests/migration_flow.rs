//! End-to-end tests for the four-phase migration with git-inferred story
//! states.

mod common;

use common::TestProject;
use keel::MigrationEngine;
use keel::migration::MIGRATION_BRANCH;
use keel::model::StoryStatus;

fn seed_legacy_project(project: &TestProject) {
    project.commit_file(
        "docs/epics/epic-1.md",
        "# Epic 1: JWT Authentication\n\n**Status**: in_progress\n**Total Stories**: 3\n",
        "docs: add epic 1",
    );
    project.commit_file(
        "docs/stories/story-1.1.md",
        "# Story 1.1: Login form\n\n**Priority**: P1\n",
        "docs: initial stories",
    );
    project.commit_file(
        "docs/stories/story-1.2.md",
        "# Story 1.2: Session refresh\n\n**Owner**: amelia\n",
        "chore(story-1.2): wip",
    );
    project.commit_file(
        "docs/stories/story-1.3.md",
        "# Story 1.3: JWT signing\n\n**Estimate**: 6 hours\n",
        "feat(story-1.3): complete JWT",
    );
}

#[test]
fn migration_backfills_with_git_inferred_state() {
    let project = TestProject::new();
    seed_legacy_project(&project);
    let original_head = project.git.head_revision().unwrap();

    let coordinator = project.coordinator();
    let engine = MigrationEngine::new(project.root(), &coordinator);
    let result = engine.migrate(true, false);

    assert!(result.success, "migration failed: {:?}", result.error);
    assert_eq!(result.phase_completed, 4);
    assert_eq!(result.epics_count, 1);
    assert_eq!(result.stories_count, 3);

    // Git-inferred statuses: neutral message → pending, chore/wip →
    // in_progress, feat/complete → completed.
    let expectations = [
        (1, StoryStatus::Pending),
        (2, StoryStatus::InProgress),
        (3, StoryStatus::Completed),
    ];
    for (story_num, expected) in expectations {
        let story = coordinator.stories.get(1, story_num).unwrap().unwrap();
        assert_eq!(story.status, expected, "story 1.{story_num}");
    }

    // The epic came from its file.
    let epic = coordinator.epics.get(1).unwrap().unwrap();
    assert_eq!(epic.title, "JWT Authentication");
    assert_eq!(epic.total_stories, 3);

    // Four checkpoint commits on the migration branch.
    assert_eq!(project.git.current_branch().unwrap(), MIGRATION_BRANCH);
    assert_eq!(project.commits_since(&original_head), 4);
    assert_eq!(result.checkpoints.len(), 5, "original + four phases");
}

#[test]
fn migration_is_idempotent() {
    let project = TestProject::new();
    seed_legacy_project(&project);

    let coordinator = project.coordinator();
    let engine = MigrationEngine::new(project.root(), &coordinator);
    assert!(engine.migrate(false, false).success);

    // A second run detects existing rows and migrates nothing new.
    let second = engine.migrate(false, false);
    assert!(second.success, "second run failed: {:?}", second.error);
    assert_eq!(second.epics_count, 0);
    assert_eq!(second.stories_count, 0);

    assert_eq!(coordinator.stories.list().unwrap().len(), 3);
    assert_eq!(coordinator.epics.list().unwrap().len(), 1);
}

#[test]
fn migration_auto_merge_returns_to_original_branch() {
    let project = TestProject::new();
    seed_legacy_project(&project);
    let branch_before = project.git.current_branch().unwrap();

    let coordinator = project.coordinator();
    let engine = MigrationEngine::new(project.root(), &coordinator);
    let result = engine.migrate(true, true);

    assert!(result.success, "migration failed: {:?}", result.error);
    assert_eq!(project.git.current_branch().unwrap(), branch_before);
    assert!(result.summary.contains("merged"));
}

#[test]
fn dirty_tree_fails_preflight_without_rollback_damage() {
    let project = TestProject::new();
    seed_legacy_project(&project);
    std::fs::write(project.root().join("scratch.md"), "dirty").unwrap();
    let head_before = project.git.head_revision().unwrap();

    let coordinator = project.coordinator();
    let engine = MigrationEngine::new(project.root(), &coordinator);
    let result = engine.migrate(true, false);

    assert!(!result.success);
    assert_eq!(result.phase_completed, 0);
    assert_eq!(project.git.head_revision().unwrap(), head_before);
    // Nothing was backfilled.
    assert!(coordinator.stories.list().unwrap().is_empty());
}

#[test]
fn plan_reports_discoverable_files() {
    let project = TestProject::new();
    seed_legacy_project(&project);

    let coordinator = project.coordinator();
    let engine = MigrationEngine::new(project.root(), &coordinator);
    let plan = engine.plan().unwrap();

    assert_eq!(plan.epic_files.len(), 1);
    assert_eq!(plan.story_files.len(), 3);
}
