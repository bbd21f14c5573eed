//! Direct-mode runs: in-place application and one combined diff

use pretty_assertions::assert_eq;
use sqlport_core::{MigrationConfig, MigrationPipeline, Mode, RunOutcome, Workspace};
use sqlport_patch::RewriteProposal;
use sqlport_test_utils::{
    java_source, sql_finding, BuildCall, InMemoryWorkspace, Op, ScriptedBuildChecker,
    StaticOracle,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DB2: &str = "\"SELECT * FROM T FETCH FIRST 5 ROWS ONLY\"";
const PG: &str = "\"SELECT * FROM T LIMIT 5\"";

fn oracle_for(files: &[&str]) -> StaticOracle {
    files.iter().fold(StaticOracle::new(), |oracle, file| {
        oracle.with_proposals(
            &format!("{file}#Dao.find"),
            vec![RewriteProposal::for_block("FIND_L3", PG)],
        )
    })
}

#[tokio::test]
async fn direct_mode_writes_combined_diff() {
    let files = ["src/A.java", "src/B.java"];
    let workspace = files.iter().fold(InMemoryWorkspace::new("main"), |ws, f| {
        ws.with_file(f, &java_source(DB2))
    });
    let checker = ScriptedBuildChecker::passing();
    let out = tempfile::tempdir().unwrap();

    let pipeline = MigrationPipeline::new(
        MigrationConfig::new()
            .with_mode(Mode::Direct)
            .with_output_dir(out.path()),
        workspace.clone(),
        Arc::new(checker.clone()),
    );
    let findings = files
        .iter()
        .map(|f| sql_finding(f, "find", 3, 7, DB2))
        .collect();
    let tasks = pipeline.build_tasks(findings);
    let report = pipeline
        .run_with_oracle(tasks, &oracle_for(&files))
        .await
        .unwrap();

    let combined = out.path().join("migration.diff");
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.applied_patches, 2);
    assert_eq!(
        report.changed_files,
        vec![PathBuf::from("src/A.java"), PathBuf::from("src/B.java")]
    );
    assert_eq!(
        report.summary,
        format!("Applied 2 patch(es); output written to {}", combined.display())
    );
    assert_eq!(report.output, Some(combined.clone()));

    let doc = std::fs::read_to_string(&combined).unwrap();
    assert!(doc.contains("diff --git a/src/A.java b/src/A.java"));
    assert!(doc.contains("diff --git a/src/B.java b/src/B.java"));
    assert!(doc.contains(&format!("+    q({PG});")));

    // edits stay in the working tree; nothing is branched or built
    assert_eq!(workspace.file("src/A.java"), Some(java_source(PG)));
    assert!(workspace.is_dirty());
    assert!(!workspace.ops().contains(&Op::CreateBranch));
    assert!(!workspace.ops().contains(&Op::Commit));
    assert!(checker.calls().is_empty());
    assert!(report.attempts.is_empty());
}

#[tokio::test]
async fn direct_mode_with_final_check_builds_patched_tree() {
    let workspace = InMemoryWorkspace::new("main").with_file("src/A.java", &java_source(DB2));
    let checker = ScriptedBuildChecker::passing().fail_full().observing(&workspace);
    let out = tempfile::tempdir().unwrap();

    let pipeline = MigrationPipeline::new(
        MigrationConfig::new()
            .with_mode(Mode::Direct)
            .with_final_full_check(true)
            .with_output_dir(out.path()),
        workspace,
        Arc::new(checker.clone()),
    );
    let tasks = pipeline.build_tasks(vec![sql_finding("src/A.java", "find", 3, 7, DB2)]);
    let report = pipeline
        .run_with_oracle(tasks, &oracle_for(&["src/A.java"]))
        .await
        .unwrap();

    assert_eq!(checker.calls(), vec![BuildCall::Full]);
    assert_eq!(checker.full_builds()[0].tree[Path::new("src/A.java")], java_source(PG));
    assert!(report.final_build.is_some_and(|v| !v.passed()));
}

#[tokio::test]
async fn identity_proposals_produce_no_output_file() {
    let workspace = InMemoryWorkspace::new("main").with_file("src/A.java", &java_source(DB2));
    let out = tempfile::tempdir().unwrap();

    let pipeline = MigrationPipeline::new(
        MigrationConfig::new()
            .with_mode(Mode::Direct)
            .with_output_dir(out.path()),
        workspace.clone(),
        Arc::new(ScriptedBuildChecker::passing()),
    );
    let tasks = pipeline.build_tasks(vec![sql_finding("src/A.java", "find", 3, 7, DB2)]);
    let oracle = StaticOracle::new().with_proposals(
        "src/A.java#Dao.find",
        vec![RewriteProposal::for_block("FIND_L3", DB2)],
    );
    let report = pipeline.run_with_oracle(tasks, &oracle).await.unwrap();

    assert_eq!(report.applied_patches, 0);
    assert_eq!(report.summary, "No patches were applied.");
    assert_eq!(report.output, None);
    assert!(!out.path().join("migration.diff").exists());
    assert!(!workspace.ops().contains(&Op::Write));
    assert!(!workspace.is_dirty());
}

#[tokio::test]
async fn unreadable_file_is_reported_and_others_continue() {
    let workspace = InMemoryWorkspace::new("main").with_file("src/B.java", &java_source(DB2));
    let out = tempfile::tempdir().unwrap();

    let pipeline = MigrationPipeline::new(
        MigrationConfig::new()
            .with_mode(Mode::Direct)
            .with_output_dir(out.path()),
        workspace.clone(),
        Arc::new(ScriptedBuildChecker::passing()),
    );
    // src/A.java has a finding but is absent from the tree
    let tasks = pipeline.build_tasks(vec![
        sql_finding("src/A.java", "find", 3, 7, DB2),
        sql_finding("src/B.java", "find", 3, 7, DB2),
    ]);
    let report = pipeline
        .run_with_oracle(tasks, &oracle_for(&["src/A.java", "src/B.java"]))
        .await
        .unwrap();

    assert_eq!(report.changed_files, vec![PathBuf::from("src/B.java")]);
    assert_eq!(report.applied_patches, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].file, PathBuf::from("src/A.java"));
    assert!(report.failures[0].reason.contains("src/A.java"));
    assert_eq!(workspace.file("src/B.java"), Some(java_source(PG)));
}

#[tokio::test]
async fn identity_proposal_on_locally_modified_file_is_not_a_patch() {
    let workspace = InMemoryWorkspace::new("main").with_file("src/A.java", &java_source(DB2));
    // a local edit unrelated to the migration
    let edited = format!("// local edit\n{}", java_source(DB2));
    let mut local = workspace.clone();
    local.write(Path::new("src/A.java"), &edited).await.unwrap();
    let out = tempfile::tempdir().unwrap();

    let pipeline = MigrationPipeline::new(
        MigrationConfig::new()
            .with_mode(Mode::Direct)
            .with_output_dir(out.path()),
        workspace.clone(),
        Arc::new(ScriptedBuildChecker::passing()),
    );
    let tasks = pipeline.build_tasks(vec![sql_finding("src/A.java", "find", 4, 7, DB2)]);
    let oracle = StaticOracle::new().with_proposals(
        "src/A.java#Dao.find",
        vec![RewriteProposal::for_block("FIND_L4", DB2)],
    );
    let report = pipeline.run_with_oracle(tasks, &oracle).await.unwrap();

    assert_eq!(report.resolved_proposals, 1);
    assert_eq!(report.applied_patches, 0);
    assert!(report.changed_files.is_empty());
    assert!(!workspace.ops().contains(&Op::Diff));
    assert_eq!(workspace.file("src/A.java"), Some(edited));
}
