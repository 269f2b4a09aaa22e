//! Scenario runner – execute scripted command flows from YAML files.

use crate::engine::Engine;
use crate::protocol::{Command, CommandPayload, ErrorCode, EventKind};
use crate::types::*;
use std::time::{Duration, Instant};

/// Load a scenario from a YAML string.
pub fn load_scenario(yaml: &str) -> Result<Scenario, String> {
    serde_yaml::from_str(yaml).map_err(|e| format!("failed to parse scenario YAML: {}", e))
}

/// Run the steps in order against one engine, each to its terminal event.
pub async fn run_scenario(scenario: &Scenario, engine: &Engine) -> ScenarioResult {
    let started = Instant::now();
    let mut events = engine.subscribe();
    let mut step_results = Vec::with_capacity(scenario.steps.len());
    let mut overall = Status::Pass;

    for (i, step) in scenario.steps.iter().enumerate() {
        let task_id = step.task_id.unwrap_or(i as u64 + 1);
        let step_started = Instant::now();
        let mut result = StepResult {
            task_id,
            command: step.command.name().to_string(),
            status: Status::Pass,
            outcome: Outcome::Pass,
            terminal: None,
            error: None,
            events: 0,
            timing_ms: 0,
        };

        if let CommandPayload::Cancel { task_id: target } = step.command {
            // Cancel starts no task; it only matters whether the target was live.
            // A dead target is not forwarded: its not-found event would be
            // addressed to an id a later step may reuse.
            if engine.active_tasks().contains(&target) {
                engine.submit(Command::new(task_id, step.command.clone()));
            } else {
                result.outcome = Outcome::Error;
                result.error = Some(ErrorInfo {
                    code: ErrorCode::TaskNotFound,
                    message: format!("task {} not found", target),
                });
            }
        } else {
            match engine.handle(Command::new(task_id, step.command.clone())) {
                Err(e) => {
                    result.outcome = Outcome::Error;
                    result.error = Some(ErrorInfo {
                        code: e.error_code(),
                        message: e.to_string(),
                    });
                }
                Ok(()) => {
                    let timeout = Duration::from_millis(step.timeout_ms);
                    match tokio::time::timeout(timeout, events.collect_task(task_id)).await {
                        Ok(seen) => {
                            result.events = seen.len();
                            match seen.last().map(|e| e.kind.clone()) {
                                Some(EventKind::Error { message, code }) => {
                                    result.outcome = Outcome::Error;
                                    result.error = Some(ErrorInfo {
                                        code: code.unwrap_or(ErrorCode::InternalError),
                                        message: message.clone(),
                                    });
                                    result.terminal = Some(EventKind::Error { message, code });
                                }
                                Some(kind) if kind.is_terminal() => result.terminal = Some(kind),
                                _ => {
                                    result.outcome = Outcome::Error;
                                    result.status = Status::Error;
                                    result.error = Some(ErrorInfo {
                                        code: ErrorCode::InternalError,
                                        message: "event stream closed before the task finished"
                                            .into(),
                                    });
                                }
                            }
                        }
                        Err(_) => {
                            tracing::warn!(step = i, task_id, timeout_ms = step.timeout_ms, "scenario step timed out");
                            engine.submit(Command::new(
                                task_id,
                                CommandPayload::Cancel { task_id },
                            ));
                            result.outcome = Outcome::Error;
                            result.status = Status::Error;
                            result.error = Some(ErrorInfo {
                                code: ErrorCode::InternalError,
                                message: format!("timed out after {} ms", step.timeout_ms),
                            });
                        }
                    }
                }
            }
        }

        if result.status == Status::Pass && result.outcome != step.expect {
            tracing::warn!(
                step = i,
                expected = ?step.expect,
                actual = ?result.outcome,
                "scenario step outcome mismatch"
            );
            result.status = Status::Fail;
        }
        match result.status {
            Status::Pass => {}
            Status::Fail if overall == Status::Pass => overall = Status::Fail,
            Status::Fail => {}
            Status::Error => overall = Status::Error,
        }
        result.timing_ms = step_started.elapsed().as_millis() as u64;
        step_results.push(result);
    }

    ScenarioResult {
        name: scenario.name.clone(),
        overall_status: overall,
        step_results,
        timing_ms: started.elapsed().as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    #[test]
    fn test_parse_scenario() {
        let yaml = r#"
name: basic test
steps:
  - command: { type: execute_sql, sql: "SELECT 1 AS num" }
  - command: { type: import_file, path: "missing.csv", format: delimited-text }
    expect: error
    task_id: 40
    timeout_ms: 5000
  - command: { type: cancel, task_id: 99 }
    expect: error
"#;
        let s = load_scenario(yaml).expect("should parse");
        assert_eq!(s.name.as_deref(), Some("basic test"));
        assert_eq!(s.steps.len(), 3);
        assert_eq!(s.steps[1].task_id, Some(40));
        assert_eq!(s.steps[1].expect, Outcome::Error);
        assert_eq!(s.steps[2].command, CommandPayload::Cancel { task_id: 99 });
    }

    #[test]
    fn test_bad_yaml() {
        let err = load_scenario("steps: [{command: {type: drop_everything}}]").unwrap_err();
        assert!(err.starts_with("failed to parse scenario YAML"));
    }

    #[tokio::test]
    async fn test_run_scenario_expectations() {
        let yaml = r#"
name: mixed
steps:
  - command: { type: execute_sql, sql: "CREATE TABLE t AS SELECT * FROM range(5)" }
  - command: { type: execute_sql, sql: "SELECT count(*) AS n FROM t" }
  - command: { type: execute_sql, sql: "SELECT * FROM missing_table" }
    expect: error
  - command: { type: cancel, task_id: 1234 }
    expect: error
"#;
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let result = run_scenario(&load_scenario(yaml).unwrap(), &engine).await;

        assert_eq!(result.overall_status, Status::Pass, "{result:#?}");
        assert_eq!(result.step_results.len(), 4);
        let count = &result.step_results[1];
        assert_eq!(count.task_id, 2);
        assert_eq!(count.events, 2);
        match &count.terminal {
            Some(EventKind::Finished { preview, .. }) => {
                assert_eq!(preview, &vec![serde_json::json!({"n": 5})]);
            }
            other => panic!("unexpected {other:?}"),
        }
        let failed = &result.step_results[2];
        assert_eq!(failed.error.as_ref().map(|e| e.code), Some(ErrorCode::SqlError));
    }

    #[tokio::test]
    async fn test_unexpected_outcome_fails_scenario() {
        let yaml = r#"
steps:
  - command: { type: execute_sql, sql: "SELECT 1" }
    expect: error
"#;
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let result = run_scenario(&load_scenario(yaml).unwrap(), &engine).await;
        assert_eq!(result.overall_status, Status::Fail);
        assert_eq!(result.step_results[0].status, Status::Fail);
        assert_eq!(result.step_results[0].outcome, Outcome::Pass);
    }
}
