//! Pipeline lifecycle integration tests.
//!
//! These tests load configurations the way the command line does and run
//! them over a temporary batch folder with a mock executor.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use pagebatch_core::{
    audit_stage, load_config_from_str, ocr_check::AUDIT_STAGE, testing::MockExecutor, ItemKind,
    Pipeline, PipelineError, TemplateMode,
};

fn batch_tree(root: &Path, issues: usize, pages: usize) {
    for issue in 1..=issues {
        for page in 1..=pages {
            let dir = root.join(format!("issue{issue}/{page}"));
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("OBJ.tif"), b"master").unwrap();
            fs::write(dir.join("MODS.xml"), b"<mods/>").unwrap();
        }
    }
}

#[test]
fn test_example_profile_is_valid() {
    let config = load_config_from_str(include_str!("../../../pipeline.example.toml"))
        .expect("example profile should load");
    pagebatch_core::validate_config(&config).expect("example profile should validate");

    let names: Vec<&str> = config.stages.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["tn", "jp2", "jpg", "large_jpg", "ocr", "techmd", "cleanup", "ocr-check"]
    );
    assert_eq!(config.stage("ocr").unwrap().mode, TemplateMode::Shell);

    // a directory item is the page itself; {itemDir} would be its issue
    for stage in config.stages.iter().filter(|s| s.items == ItemKind::Dirs) {
        assert!(
            !stage.template.contains("{itemDir}"),
            "stage {} addresses the issue directory",
            stage.name
        );
    }
}

#[tokio::test]
async fn test_pipeline_runs_each_stage_over_its_items() {
    let root = tempfile::tempdir().unwrap();
    batch_tree(root.path(), 2, 3);

    let config = load_config_from_str(
        r#"
        [engine]
        concurrency = 3

        [[stages]]
        name = "tn"
        template = "convert -resize 256x256 {itemPath} {itemDir}/TN.jpg"

        [[stages]]
        name = "mods"
        pattern = "MODS.xml"
        template = "xmllint --noout {itemPath}"

        [[stages]]
        name = "cleanup"
        items = "dirs"
        template = "rm -f {itemPath}/tesseract-output.txt"
        "#,
    )
    .unwrap();

    let executor = Arc::new(MockExecutor::new());
    let mut pipeline = Pipeline::new(config, Arc::clone(&executor)).unwrap();
    let report = pipeline.run(root.path(), &[]).await.unwrap();

    assert!(report.all_acceptable());
    assert_eq!(report.stages.len(), 3);
    for stage in &report.stages {
        assert_eq!(stage.summary.total, 6, "stage {}", stage.name);
    }

    let executions = executor.recorded_executions();
    let tn = &executions[0].task.command;
    assert_eq!(tn.program, "convert");
    assert!(tn.args[2].ends_with("OBJ.tif"));
    assert!(tn.args[3].ends_with("TN.jpg"));
    assert!(executions[6].task.item.ends_with("MODS.xml"));
    for cleanup in &executions[12..] {
        let page = Path::new(&cleanup.task.item);
        assert!(page.join("OBJ.tif").exists(), "{} is not a page", page.display());
        assert_eq!(
            cleanup.task.command.args[1],
            format!("{}/tesseract-output.txt", cleanup.task.item)
        );
    }
}

#[tokio::test]
async fn test_audit_stage_halts_on_textless_pages() {
    let root = tempfile::tempdir().unwrap();
    batch_tree(root.path(), 1, 10);

    let mut config = load_config_from_str("[engine]\nconcurrency = 4\n").unwrap();
    config.stages = vec![audit_stage("/usr/local/bin/pagebatch")];

    // two pages of ten are textless: 20% is over the limit
    let executor = Arc::new(MockExecutor::new());
    for page in [3, 8] {
        let dir = root.path().join(format!("issue1/{page}"));
        executor.fail_item(dir.to_string_lossy());
    }

    let mut pipeline = Pipeline::new(config, Arc::clone(&executor)).unwrap();
    let report = pipeline.run(root.path(), &[]).await.unwrap();

    assert_eq!(report.halted_at.as_deref(), Some(AUDIT_STAGE));
    let audit = report.stage(AUDIT_STAGE).unwrap();
    assert_eq!(audit.summary.total, 10);
    assert_eq!(audit.verdict.ratio, Some(0.2));

    // each page directory is checked once, by its own path
    let executions = executor.recorded_executions();
    let mut checked: Vec<String> = executions
        .iter()
        .map(|e| {
            let command = &e.task.command;
            assert_eq!(command.program, "/usr/local/bin/pagebatch");
            assert_eq!(command.args[0], "check-page");
            assert_eq!(command.args[1], e.task.item);
            command.args[1].clone()
        })
        .collect();
    checked.sort();
    let mut pages: Vec<String> = (1..=10)
        .map(|page| root.path().join(format!("issue1/{page}")).to_string_lossy().into_owned())
        .collect();
    pages.sort();
    assert_eq!(checked, pages);
}

#[tokio::test]
async fn test_negative_concurrency_rejected_before_running() {
    let root = tempfile::tempdir().unwrap();
    batch_tree(root.path(), 1, 1);

    let config = load_config_from_str(
        "[engine]\nconcurrency = -1\n\n[[stages]]\nname = \"tn\"\ntemplate = \"true\"\n",
    )
    .unwrap();

    let result = Pipeline::new(config, Arc::new(MockExecutor::new()));
    assert!(matches!(result, Err(PipelineError::Config(_))));
}
