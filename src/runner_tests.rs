use super::*;
use crate::migrator::{MigrationMetadata, Migrator};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

/// History stand-in with a fixed migration listing.
struct FakeHistory {
    migrations: Vec<String>,
    records: Vec<(String, String, String, Option<u128>)>,
    save_calls: Cell<usize>,
    fail_save: bool,
}

impl FakeHistory {
    fn new(migrations: &[&str]) -> Self {
        Self {
            migrations: migrations.iter().map(|name| name.to_string()).collect(),
            records: Vec::new(),
            save_calls: Cell::new(0),
            fail_save: false,
        }
    }

    fn with_applied(mut self, filename: &str) -> Self {
        self.records.push((
            filename.to_string(),
            "state".to_string(),
            filename.to_string(),
            Some(1),
        ));
        self
    }

    fn failing_save(mut self) -> Self {
        self.fail_save = true;
        self
    }

    fn recorded(&self) -> Vec<&str> {
        self.records.iter().map(|(name, ..)| name.as_str()).collect()
    }
}

impl MigrationHistory for FakeHistory {
    fn already_applied(&self, filename: &str) -> bool {
        self.records.iter().any(|(name, ..)| name == filename)
    }

    fn unapplied_migrations(&self) -> Vec<String> {
        self.migrations
            .iter()
            .filter(|name| !self.already_applied(name))
            .cloned()
            .collect()
    }

    fn history_length(&self) -> usize {
        self.records.len()
    }

    fn add_record(&mut self, filename: &str, kind: &str, name: &str, applied_at: Option<u128>) {
        self.records.push((
            filename.to_string(),
            kind.to_string(),
            name.to_string(),
            applied_at,
        ));
    }

    fn save(&self, _ctx: &ExecContext) -> Result<()> {
        self.save_calls.set(self.save_calls.get() + 1);
        if self.fail_save {
            return Err(Error::io(
                "write history.json",
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "disk is read-only"),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Behavior {
    Succeed,
    FailConstruction,
    FailRun,
    Panic,
}

type EventLog = Rc<RefCell<Vec<String>>>;

/// Factory whose migrators log `"<op> <filename>"` and behave per file.
struct FakeFactory {
    behaviors: BTreeMap<String, Behavior>,
    log: EventLog,
}

impl FakeFactory {
    fn new() -> Self {
        Self {
            behaviors: BTreeMap::new(),
            log: EventLog::default(),
        }
    }

    fn with(mut self, filename: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(filename.to_string(), behavior);
        self
    }

    fn events(&self) -> Vec<String> {
        self.log.borrow().clone()
    }
}

struct FakeMigrator {
    filename: String,
    behavior: Behavior,
    metadata: MigrationMetadata,
    log: EventLog,
}

impl FakeMigrator {
    fn run(&self, op: &str) -> Result<()> {
        self.log
            .borrow_mut()
            .push(format!("{op} {}", self.filename));
        match self.behavior {
            Behavior::Succeed | Behavior::FailConstruction => Ok(()),
            Behavior::FailRun => Err(Error::CommandFailed {
                command: "terraform state push".to_string(),
                status: "exit status: 1".to_string(),
                stderr: format!("Error: cannot {op} {}", self.filename),
            }),
            Behavior::Panic => panic!("migrator blew up on {}", self.filename),
        }
    }
}

impl Migrator for FakeMigrator {
    fn plan(&self, _ctx: &ExecContext) -> Result<()> {
        self.run("plan")
    }

    fn apply(&self, _ctx: &ExecContext) -> Result<()> {
        self.run("apply")
    }

    fn metadata(&self) -> &MigrationMetadata {
        &self.metadata
    }
}

impl MigratorFactory for FakeFactory {
    fn new_migrator(
        &self,
        filename: &str,
        _config: &MigrateConfig,
        _option: &MigratorOption,
    ) -> Result<Box<dyn Migrator>> {
        self.log.borrow_mut().push(format!("new {filename}"));
        let behavior = self
            .behaviors
            .get(filename)
            .copied()
            .unwrap_or(Behavior::Succeed);
        if behavior == Behavior::FailConstruction {
            return Err(Error::Construction {
                filename: filename.to_string(),
                reason: "unknown migration type \"bogus\"".to_string(),
            });
        }
        Ok(Box::new(FakeMigrator {
            filename: filename.to_string(),
            behavior,
            metadata: MigrationMetadata {
                kind: "state".to_string(),
                name: format!("name of {filename}"),
            },
            log: self.log.clone(),
        }))
    }
}

fn runner(
    filename: Option<&str>,
    history: FakeHistory,
    factory: FakeFactory,
) -> HistoryRunner<FakeHistory, FakeFactory> {
    HistoryRunner::new(
        filename.map(str::to_string),
        MigrateConfig::default(),
        MigratorOption::default(),
        history,
        factory,
    )
}

fn ctx() -> ExecContext {
    ExecContext::background()
}

#[test]
fn apply_file_records_metadata_and_saves() {
    let mut runner = runner(Some("a.json"), FakeHistory::new(&["a.json"]), FakeFactory::new());
    runner.apply(&ctx()).expect("apply");
    let history = runner.history();
    assert_eq!(
        history.records,
        vec![(
            "a.json".to_string(),
            "state".to_string(),
            "name of a.json".to_string(),
            None
        )]
    );
    assert_eq!(history.save_calls.get(), 1);
}

#[test]
fn apply_already_applied_file_has_no_side_effects() {
    let history = FakeHistory::new(&["a.json"]).with_applied("a.json");
    let mut runner = runner(Some("a.json"), history, FakeFactory::new());
    let err = runner.apply(&ctx()).expect_err("already applied");
    assert!(
        matches!(&err, Error::AlreadyApplied { filename } if filename == "a.json"),
        "{err}"
    );
    assert!(runner.factory.events().is_empty());
    assert_eq!(runner.history().history_length(), 1);
    assert_eq!(runner.history().save_calls.get(), 0);
}

#[test]
fn plan_already_applied_file_has_no_side_effects() {
    let history = FakeHistory::new(&["a.json"]).with_applied("a.json");
    let runner = runner(Some("a.json"), history, FakeFactory::new());
    let err = runner.plan(&ctx()).expect_err("already applied");
    assert!(matches!(err, Error::AlreadyApplied { .. }));
    assert!(runner.factory.events().is_empty());
    assert_eq!(runner.history().save_calls.get(), 0);
}

#[test]
fn apply_file_failure_records_nothing_and_skips_save() {
    let factory = FakeFactory::new().with("a.json", Behavior::FailRun);
    let mut runner = runner(Some("a.json"), FakeHistory::new(&["a.json"]), factory);
    let err = runner.apply(&ctx()).expect_err("apply fails");
    assert!(matches!(err, Error::CommandFailed { .. }));
    assert!(runner.history().records.is_empty());
    assert_eq!(runner.history().save_calls.get(), 0);
}

#[test]
fn construction_failure_propagates_unchanged() {
    let factory = FakeFactory::new().with("a.json", Behavior::FailConstruction);
    let mut runner = runner(Some("a.json"), FakeHistory::new(&["a.json"]), factory);
    let err = runner.apply(&ctx()).expect_err("construction fails");
    assert!(matches!(err, Error::Construction { .. }));
    assert_eq!(runner.history().save_calls.get(), 0);
}

#[test]
fn apply_dir_follows_history_order_without_sorting() {
    let history = FakeHistory::new(&["c.json", "a.json", "b.json"]);
    let mut runner = runner(None, history, FakeFactory::new());
    runner.apply(&ctx()).expect("apply all");
    assert_eq!(
        runner.factory.events(),
        vec![
            "new c.json",
            "apply c.json",
            "new a.json",
            "apply a.json",
            "new b.json",
            "apply b.json",
        ]
    );
    assert_eq!(runner.history().recorded(), vec!["c.json", "a.json", "b.json"]);
    assert_eq!(runner.history().save_calls.get(), 1);
}

#[test]
fn apply_dir_stops_at_first_failure_and_saves_earlier_records() {
    let factory = FakeFactory::new().with("b.json", Behavior::FailRun);
    let history = FakeHistory::new(&["a.json", "b.json", "c.json"]);
    let mut runner = runner(None, history, factory);
    let err = runner.apply(&ctx()).expect_err("b fails");
    assert!(err.to_string().contains("b.json"), "{err}");
    assert_eq!(
        runner.factory.events(),
        vec!["new a.json", "apply a.json", "new b.json", "apply b.json"]
    );
    assert_eq!(runner.history().recorded(), vec!["a.json"]);
    assert_eq!(runner.history().save_calls.get(), 1);
}

#[test]
fn apply_dir_skips_applied_files() {
    let history = FakeHistory::new(&["a.json", "b.json"]).with_applied("a.json");
    let mut runner = runner(None, history, FakeFactory::new());
    runner.apply(&ctx()).expect("apply");
    assert_eq!(runner.factory.events(), vec!["new b.json", "apply b.json"]);
}

#[test]
fn apply_dir_with_nothing_unapplied_never_saves() {
    let history = FakeHistory::new(&["a.json"]).with_applied("a.json");
    let mut runner = runner(None, history, FakeFactory::new());
    runner.apply(&ctx()).expect("no-op apply");
    assert!(runner.factory.events().is_empty());
    assert_eq!(runner.history().save_calls.get(), 0);

    let mut empty = self::runner(None, FakeHistory::new(&[]), FakeFactory::new());
    empty.apply(&ctx()).expect("empty dir");
    assert_eq!(empty.history().save_calls.get(), 0);
}

#[test]
fn save_failure_after_success_is_reported() {
    let history = FakeHistory::new(&["a.json"]).failing_save();
    let mut runner = runner(None, history, FakeFactory::new());
    let err = runner.apply(&ctx()).expect_err("save fails");
    assert!(matches!(err, Error::HistorySave { .. }), "{err}");
    assert!(err.is_history_inconsistent());
    let text = err.to_string();
    assert!(text.contains("apply succeeded"), "{text}");
    assert!(text.contains("disk is read-only"), "{text}");
}

#[test]
fn save_failure_after_apply_failure_keeps_both_errors() {
    let factory = FakeFactory::new().with("b.json", Behavior::FailRun);
    let history = FakeHistory::new(&["a.json", "b.json"]).failing_save();
    let mut runner = runner(None, history, factory);
    let err = runner.apply(&ctx()).expect_err("both fail");
    assert!(matches!(err, Error::HistorySaveAfterFailure { .. }), "{err}");
    let text = err.to_string();
    assert!(text.contains("disk is read-only"), "{text}");
    assert!(text.contains("cannot apply b.json"), "{text}");
}

#[test]
fn save_failure_is_irrelevant_when_nothing_changed() {
    let factory = FakeFactory::new().with("a.json", Behavior::FailRun);
    let history = FakeHistory::new(&["a.json"]).failing_save();
    let mut runner = runner(None, history, factory);
    let err = runner.apply(&ctx()).expect_err("apply fails");
    assert!(matches!(err, Error::CommandFailed { .. }));
    assert_eq!(runner.history().save_calls.get(), 0);
}

#[test]
fn panicking_migrator_still_saves_history() {
    let factory = FakeFactory::new().with("b.json", Behavior::Panic);
    let history = FakeHistory::new(&["a.json", "b.json", "c.json"]);
    let mut runner = runner(None, history, factory);
    let result = panic::catch_unwind(AssertUnwindSafe(|| runner.apply(&ctx())));
    assert!(result.is_err(), "panic should be resumed");
    assert_eq!(runner.history().recorded(), vec!["a.json"]);
    assert_eq!(runner.history().save_calls.get(), 1);
    assert!(!runner
        .factory
        .events()
        .iter()
        .any(|event| event.ends_with("c.json")));
}

#[test]
fn panic_with_failed_save_reports_both() {
    let factory = FakeFactory::new().with("b.json", Behavior::Panic);
    let history = FakeHistory::new(&["a.json", "b.json"]).failing_save();
    let mut runner = runner(None, history, factory);
    let payload = panic::catch_unwind(AssertUnwindSafe(|| runner.apply(&ctx())))
        .expect_err("panic should be resumed");
    let message = payload
        .downcast_ref::<String>()
        .expect("string panic payload");
    assert!(message.contains("migrator blew up on b.json"), "{message}");
    assert!(message.contains("failed to save history"), "{message}");
    assert!(message.contains("disk is read-only"), "{message}");
    assert_eq!(runner.history().save_calls.get(), 1);
}

#[test]
fn cancelled_context_stops_directory_batch() {
    let token = crate::context::CancellationToken::new();
    token.cancel();
    let ctx = ExecContext::background().with_token(token);
    let mut runner = runner(None, FakeHistory::new(&["a.json"]), FakeFactory::new());
    let err = runner.apply(&ctx).expect_err("cancelled");
    assert!(matches!(err, Error::Cancelled { .. }));
    assert!(runner.factory.events().is_empty());
}

#[test]
fn plan_dir_runs_in_order_and_stops_at_failure() {
    let factory = FakeFactory::new().with("b.json", Behavior::FailRun);
    let history = FakeHistory::new(&["a.json", "b.json", "c.json"]);
    let runner = runner(None, history, factory);
    runner.plan(&ctx()).expect_err("b fails");
    assert_eq!(
        runner.factory.events(),
        vec!["new a.json", "plan a.json", "new b.json", "plan b.json"]
    );
    assert!(runner.history().records.is_empty());
    assert_eq!(runner.history().save_calls.get(), 0);
}

#[test]
fn plan_dir_with_nothing_unapplied_builds_nothing() {
    let history = FakeHistory::new(&["a.json"]).with_applied("a.json");
    let runner = runner(None, history, FakeFactory::new());
    runner.plan(&ctx()).expect("no-op plan");
    assert!(runner.factory.events().is_empty());

    let empty = self::runner(None, FakeHistory::new(&[]), FakeFactory::new());
    empty.plan(&ctx()).expect("empty dir");
    assert!(empty.factory.events().is_empty());
    assert_eq!(empty.history().save_calls.get(), 0);
}

#[test]
fn cancelled_context_stops_plan_dir() {
    let token = crate::context::CancellationToken::new();
    token.cancel();
    let ctx = ExecContext::background().with_token(token);
    let runner = runner(None, FakeHistory::new(&["a.json", "b.json"]), FakeFactory::new());
    let err = runner.plan(&ctx).expect_err("cancelled");
    assert!(matches!(&err, Error::Cancelled { command } if command == "plan a.json"), "{err}");
    assert!(runner.factory.events().is_empty());
}

#[test]
fn plan_file_never_records() {
    let runner = runner(Some("a.json"), FakeHistory::new(&["a.json"]), FakeFactory::new());
    runner.plan(&ctx()).expect("plan");
    assert_eq!(runner.factory.events(), vec!["new a.json", "plan a.json"]);
    assert!(runner.history().records.is_empty());
}

#[test]
fn compose_keeps_original_error_when_save_succeeds() {
    let original = Err(Error::AlreadyApplied {
        filename: "a.json".to_string(),
    });
    let composed = compose_apply_result(original, Some(Ok(())));
    assert!(matches!(composed, Err(Error::AlreadyApplied { .. })));
    assert!(compose_apply_result(Ok(()), None).is_ok());
}

#[test]
fn from_config_reads_local_history() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(
        dir.path().join("a.json"),
        r#"{"migration": {"type": "state", "name": "a", "actions": ["rm null_resource.a"]}}"#,
    )
    .expect("write migration");
    let history_path = dir.path().join(".tfmig_history.json");
    std::fs::write(
        &history_path,
        r#"{"schema_version": 1, "records": {"a.json": {"type": "state", "name": "a"}}}"#,
    )
    .expect("write history");
    let config = MigrateConfig {
        migration_dir: dir.path().to_path_buf(),
        history: crate::config::HistoryConfig {
            storage: crate::history::StorageConfig::Local { path: history_path },
        },
        ..MigrateConfig::default()
    };
    let mut runner = HistoryRunner::from_config(
        &ctx(),
        Some("a.json".to_string()),
        config,
        MigratorOption::default(),
    )
    .expect("build runner");
    let err = runner.apply(&ctx()).expect_err("already applied");
    assert!(matches!(err, Error::AlreadyApplied { .. }));
}
