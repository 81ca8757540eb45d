use std::io::Write;

use buildorch::config::{CommandConfig, load_and_validate};
use buildorch::errors::BuildError;
use buildorch::types::CleanFlags;
use buildorch_test_utils::builders::{ConfigFileBuilder, TaskConfigBuilder};
use tempfile::NamedTempFile;

fn plan(text: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{text}").unwrap();
    file
}

#[test]
fn defaults_fill_in_missing_sections() {
    let file = plan(
        r#"
[[task]]
name = "zlib"
build = ["make"]
"#,
    );
    let cfg = load_and_validate(file.path()).unwrap();
    let core = cfg.core_config();

    assert!(core.phases.clean && core.phases.fetch && core.phases.build);
    assert!(core.clean.is_empty());
    assert!(core.max_jobs >= 1);
    assert_eq!(core.poll_interval.as_millis(), 50);
    assert!(cfg.task[0].enabled);
}

#[test]
fn start_from_scratch_sets_every_flag() {
    let file = plan(
        r#"
[clean]
new = true

[[task]]
name = "zlib"
"#,
    );
    let cfg = load_and_validate(file.path()).unwrap();
    assert_eq!(cfg.core_config().clean, CleanFlags::ALL);
}

#[test]
fn structured_commands_and_children_parse() {
    let file = plan(
        r#"
[[task]]
name = "libs"

[[task.children]]
name = "a"
build = [{ program = "make", args = ["-C", "a"], success_codes = [0, 2], terminate_on_interrupt = true }]

[[task.children]]
name = "b"
build = ["make -C b"]
"#,
    );
    let cfg = load_and_validate(file.path()).unwrap();
    let group = &cfg.task[0];
    assert!(group.is_group());
    match &group.children[0].build[0] {
        CommandConfig::Exec(exec) => {
            assert_eq!(exec.args, vec!["-C", "a"]);
            assert_eq!(exec.success_codes, vec![0, 2]);
            assert!(exec.terminate_on_interrupt);
            assert!(!exec.allow_failure);
        }
        other => panic!("expected a structured command, got {other:?}"),
    }
}

#[test]
fn toml_syntax_errors_are_structured() {
    let file = plan("[[task]\nname = ");
    assert!(matches!(
        load_and_validate(file.path()),
        Err(BuildError::TomlError(_))
    ));
}

#[test]
fn patches_without_source_path_are_rejected() {
    let file = plan(
        r#"
[[task]]
name = "zlib"
patches = ["fix.patch"]
"#,
    );
    match load_and_validate(file.path()) {
        Err(BuildError::ConfigError(msg)) => assert!(msg.contains("source_path")),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn builder_produces_a_valid_plan() {
    let cfg = ConfigFileBuilder::new()
        .with_task(TaskConfigBuilder::new("zlib").alias("z").build_step("make").build())
        .with_task(
            TaskConfigBuilder::new("libs")
                .child(TaskConfigBuilder::new("a").build_step("true").build())
                .build(),
        )
        .build();
    assert_eq!(cfg.task.len(), 2);
    assert_eq!(cfg.global.max_jobs, 2);
}

#[test]
#[should_panic(expected = "Failed to build valid config")]
fn builder_rejects_duplicate_aliases() {
    ConfigFileBuilder::new()
        .with_task(TaskConfigBuilder::new("zlib").alias("common").build())
        .with_task(TaskConfigBuilder::new("png").alias("COMMON").build())
        .build();
}
