// ABOUTME: Integration tests for the workflow execution engine
// ABOUTME: Covers flow directives, composites, error handling, events, suspension and concurrency limits

use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use skein::engine::{ErrorType, TaskStatus, WorkflowEngine, WorkflowStatus};
use skein::events::{CloudEvent, EventBus, MemoryEventBroker};
use skein::parser::ProcessKind;

mod common;
use common::{
    assert_completed, task_status, RecordingCallHandler, StubProcessRunner, TestWorkflowBuilder,
};

fn engine_with_broker() -> (WorkflowEngine, Arc<MemoryEventBroker>) {
    let broker = Arc::new(MemoryEventBroker::new());
    let engine = WorkflowEngine::new()
        .with_event_bus(broker.clone())
        .with_event_correlator(broker.clone());
    (engine, broker)
}

#[tokio::test]
async fn test_do_runs_children_in_order_with_chained_input() {
    let workflow = TestWorkflowBuilder::new("sequence")
        .with_task("first", "set:\n  trail: a")
        .with_task("second", "set:\n  trail: '{{input.trail}}b'")
        .with_task("third", "set:\n  trail: '{{input.trail}}c'")
        .build();

    let result = WorkflowEngine::new()
        .execute_workflow(workflow, json!({}))
        .await
        .unwrap();

    assert_completed(&result);
    assert_eq!(result.output, Some(json!({"trail": "abc"})));

    let paths: Vec<&str> = result.tasks.iter().map(|t| t.path.as_str()).collect();
    assert_eq!(paths, vec!["/", "/do/0/first", "/do/1/second", "/do/2/third"]);

    let first = result.get_task_result("/do/0/first").unwrap();
    let third = result.get_task_result("/do/2/third").unwrap();
    assert!(first.ended_at.unwrap() <= third.started_at.unwrap());
    assert_eq!(result.summary.completed_tasks, 4);
}

#[tokio::test]
async fn test_exit_stops_the_sequence() {
    let workflow = TestWorkflowBuilder::new("early_exit")
        .add_set_task("a", "1")
        .with_task("b", "set: 2\nthen: exit")
        .add_set_task("c", "3")
        .build();

    let result = WorkflowEngine::new()
        .execute_workflow(workflow, json!(null))
        .await
        .unwrap();

    assert_completed(&result);
    assert_eq!(result.output, Some(json!(2)));
    assert!(result.get_task_result("/do/2/c").is_none());
}

#[tokio::test]
async fn test_goto_skips_ahead() {
    let workflow = TestWorkflowBuilder::new("jump")
        .with_task("start", "set:\n  step: start\nthen: finish")
        .add_set_task("skipped", "'never'")
        .with_task("finish", "set:\n  from: '{{input.step}}'")
        .build();

    let result = WorkflowEngine::new()
        .execute_workflow(workflow, json!({}))
        .await
        .unwrap();

    assert_completed(&result);
    assert_eq!(result.output, Some(json!({"from": "start"})));
    assert!(result.get_task_result("/do/1/skipped").is_none());
    assert!(result.get_task_result("/do/1/finish").is_some());
}

#[tokio::test]
async fn test_if_false_skips_task() {
    let workflow = TestWorkflowBuilder::new("conditional")
        .with_task("maybe", "if: '{{input.enabled}}'\nset:\n  ran: true")
        .build();

    let result = WorkflowEngine::new()
        .execute_workflow(workflow, json!({"enabled": false}))
        .await
        .unwrap();

    assert_completed(&result);
    assert_eq!(task_status(&result, "/do/0/maybe").as_deref(), Some("skipped"));
    assert_eq!(result.output, Some(json!({"enabled": false})));
    assert_eq!(result.summary.skipped_tasks, 1);
}

#[tokio::test]
async fn test_input_output_and_export_transforms() {
    let workflow = TestWorkflowBuilder::new("transforms")
        .with_task(
            "pick",
            "input:\n  from: '{{input.order}}'\nset:\n  id: '{{input.id}}'\n  noise: 1\noutput:\n  as:\n    id: '{{input.id}}'\nexport:\n  as:\n    last: '{{input.id}}'",
        )
        .with_task("read", "set:\n  seen: '{{context.last}}'")
        .build();

    let result = WorkflowEngine::new()
        .execute_workflow(workflow, json!({"order": {"id": 9}}))
        .await
        .unwrap();

    assert_completed(&result);
    assert_eq!(result.output, Some(json!({"seen": 9})));
}

#[tokio::test]
async fn test_fork_joins_branch_outputs_by_name() {
    let workflow = TestWorkflowBuilder::new("fan_out")
        .with_task(
            "split",
            "fork:\n  branches:\n    - left:\n        set: 1\n    - right:\n        set: 2",
        )
        .build();

    let result = WorkflowEngine::new()
        .execute_workflow(workflow, json!(null))
        .await
        .unwrap();

    assert_completed(&result);
    assert_eq!(result.output, Some(json!({"left": 1, "right": 2})));
    assert!(result.get_task_result("/do/0/split/fork/0/left").is_some());
    assert!(result.get_task_result("/do/0/split/fork/1/right").is_some());
}

#[tokio::test]
async fn test_competing_fork_first_completion_wins() {
    let workflow = TestWorkflowBuilder::new("race")
        .with_task(
            "race",
            "fork:\n  compete: true\n  branches:\n    - fast:\n        set: winner\n    - slow:\n        wait: 1s",
        )
        .build();

    let started = std::time::Instant::now();
    let result = WorkflowEngine::new()
        .execute_workflow(workflow, json!(null))
        .await
        .unwrap();

    assert_completed(&result);
    assert_eq!(result.output, Some(json!("winner")));
    assert!(started.elapsed() < Duration::from_millis(900));
    assert_eq!(
        task_status(&result, "/do/0/race/fork/1/slow").as_deref(),
        Some("cancelled")
    );
}

#[tokio::test]
async fn test_fork_fault_cancels_siblings() {
    let workflow = TestWorkflowBuilder::new("fork_fault")
        .with_task(
            "split",
            "fork:\n  branches:\n    - bad:\n        raise:\n          error:\n            type: runtime\n            status: 500\n            detail: branch failed\n    - slow:\n        wait: 1s",
        )
        .build();

    let result = WorkflowEngine::new()
        .execute_workflow(workflow, json!(null))
        .await
        .unwrap();

    assert_eq!(result.status, WorkflowStatus::Faulted);
    let error = result.error.clone().unwrap();
    assert!(error.is(ErrorType::Runtime));
    assert_eq!(error.instance.as_deref(), Some("/do/0/split/fork/0/bad"));
    assert_eq!(
        task_status(&result, "/do/0/split/fork/1/slow").as_deref(),
        Some("cancelled")
    );
    assert_eq!(task_status(&result, "/do/0/split").as_deref(), Some("faulted"));
}

#[tokio::test]
async fn test_fork_join_leaves_out_skipped_branches() {
    let workflow = TestWorkflowBuilder::new("partial_join")
        .with_task(
            "split",
            "fork:\n  branches:\n    - skipped:\n        if: '{{input.never}}'\n        set: 1\n    - ran:\n        set: 2",
        )
        .build();

    let result = WorkflowEngine::new()
        .execute_workflow(workflow, json!({}))
        .await
        .unwrap();

    assert_completed(&result);
    assert_eq!(result.output, Some(json!({"ran": 2})));
    assert_eq!(
        task_status(&result, "/do/0/split/fork/0/skipped").as_deref(),
        Some("skipped")
    );
    assert_eq!(
        task_status(&result, "/do/0/split/fork/1/ran").as_deref(),
        Some("completed")
    );
}

#[tokio::test]
async fn test_switch_selects_single_case() {
    let workflow = TestWorkflowBuilder::new("route")
        .with_task(
            "route",
            "switch:\n  - big:\n      when: '{{gt input.value 10}}'\n      then: large\n  - fallback:\n      then: small",
        )
        .with_task("large", "set: large\nthen: end")
        .with_task("small", "set: small")
        .build();

    let engine = WorkflowEngine::new();
    let big = engine
        .execute_workflow(workflow.clone(), json!({"value": 50}))
        .await
        .unwrap();
    assert_eq!(big.output, Some(json!("large")));

    let small = engine
        .execute_workflow(workflow, json!({"value": 1}))
        .await
        .unwrap();
    assert_eq!(small.output, Some(json!("small")));
}

#[tokio::test]
async fn test_switch_with_two_matches_faults() {
    let workflow = TestWorkflowBuilder::new("ambiguous")
        .with_task(
            "route",
            "switch:\n  - above_one:\n      when: '{{gt input.value 1}}'\n  - above_zero:\n      when: '{{gt input.value 0}}'",
        )
        .build();

    let result = WorkflowEngine::new()
        .execute_workflow(workflow, json!({"value": 5}))
        .await
        .unwrap();

    assert_eq!(result.status, WorkflowStatus::Faulted);
    let error = result.error.unwrap();
    assert!(error.is(ErrorType::Configuration));
    let detail = error.detail.unwrap();
    assert!(detail.contains("above_one"));
    assert!(detail.contains("above_zero"));
}

#[tokio::test]
async fn test_for_iterates_with_item_and_index() {
    let workflow = TestWorkflowBuilder::new("loop")
        .with_task(
            "loop",
            "for:\n  each: n\n  in: '{{input.items}}'\ndo:\n  - record:\n      set:\n        value: '{{n}}'\n        position: '{{index}}'",
        )
        .build();

    let result = WorkflowEngine::new()
        .execute_workflow(workflow, json!({"items": [1, 2, 3]}))
        .await
        .unwrap();

    assert_completed(&result);
    assert_eq!(result.output, Some(json!({"value": 3, "position": 2})));
    for index in 0..3 {
        let path = format!("/do/0/loop/for/{}/do", index);
        assert_eq!(task_status(&result, &path).as_deref(), Some("completed"));
    }
    assert!(result
        .get_task_result("/do/0/loop/for/0/do/do/0/record")
        .is_some());
}

#[tokio::test]
async fn test_for_stops_when_while_guard_fails() {
    let workflow = TestWorkflowBuilder::new("guarded_loop")
        .with_task(
            "loop",
            "for:\n  in: '{{input.items}}'\nwhile: '{{lt index 2}}'\ndo:\n  - record:\n      set:\n        value: '{{item}}'",
        )
        .build();

    let result = WorkflowEngine::new()
        .execute_workflow(workflow, json!({"items": [1, 2, 3, 4]}))
        .await
        .unwrap();

    assert_completed(&result);
    assert_eq!(result.output, Some(json!({"value": 2})));
    assert!(result.get_task_result("/do/0/loop/for/2/do").is_none());
}

#[tokio::test]
async fn test_for_over_empty_collection_passes_input_through() {
    let workflow = TestWorkflowBuilder::new("empty_loop")
        .with_task(
            "loop",
            "for:\n  in: '{{input.items}}'\ndo:\n  - record:\n      set: 1",
        )
        .build();

    let result = WorkflowEngine::new()
        .execute_workflow(workflow, json!({"items": []}))
        .await
        .unwrap();

    assert_completed(&result);
    assert_eq!(result.output, Some(json!({"items": []})));
}

#[tokio::test]
async fn test_for_body_end_finishes_the_workflow() {
    let workflow = TestWorkflowBuilder::new("loop_end")
        .with_task(
            "loop",
            "for:\n  in: '{{input.items}}'\ndo:\n  - stop:\n      set: '{{item}}'\n      then: end",
        )
        .add_set_task("after", "never")
        .build();

    let result = WorkflowEngine::new()
        .execute_workflow(workflow, json!({"items": [1, 2, 3]}))
        .await
        .unwrap();

    assert_completed(&result);
    assert_eq!(result.output, Some(json!(1)));
    assert!(result.get_task_result("/do/0/loop/for/1/do").is_none());
    assert!(result.get_task_result("/do/1/after").is_none());
}

#[tokio::test]
async fn test_for_body_cannot_jump_to_named_task() {
    let workflow = TestWorkflowBuilder::new("loop_goto")
        .with_task(
            "loop",
            "for:\n  in: '{{input.items}}'\ndo:\n  - jump:\n      set: 1\n      then: after",
        )
        .add_set_task("after", "2")
        .build();

    let result = WorkflowEngine::new()
        .execute_workflow(workflow, json!({"items": [1, 2]}))
        .await
        .unwrap();

    assert_eq!(result.status, WorkflowStatus::Faulted);
    let error = result.error.clone().unwrap();
    assert!(error.is(ErrorType::Configuration));
    assert!(error.detail.unwrap().contains("named task from within a loop"));
    assert_eq!(error.instance.as_deref(), Some("/do/0/loop"));
    assert!(result.get_task_result("/do/0/loop/for/1/do").is_none());
    assert!(result.get_task_result("/do/1/after").is_none());
}

#[tokio::test]
async fn test_try_catches_and_runs_handler() {
    let workflow = TestWorkflowBuilder::new("recover")
        .with_task(
            "guarded",
            "try:\n  - fail:\n      raise:\n        error:\n          type: validation\n          status: 422\ncatch:\n  errors:\n    with:\n      status: 422\n  as: problem\n  do:\n    - recover:\n        set:\n          recovered: '{{problem.status}}'",
        )
        .build();

    let result = WorkflowEngine::new()
        .execute_workflow(workflow, json!(null))
        .await
        .unwrap();

    assert_completed(&result);
    assert_eq!(result.output, Some(json!({"recovered": 422})));
    assert_eq!(
        task_status(&result, "/do/0/guarded/try").as_deref(),
        Some("faulted")
    );
    assert_eq!(
        task_status(&result, "/do/0/guarded/catch/do").as_deref(),
        Some("completed")
    );
}

#[tokio::test]
async fn test_try_passes_unmatched_errors_through_unchanged() {
    let workflow = TestWorkflowBuilder::new("pass_through")
        .with_task(
            "guarded",
            "try:\n  - fail:\n      raise:\n        error:\n          type: runtime\n          status: 500\n          detail: boom\ncatch:\n  errors:\n    with:\n      type: timeout",
        )
        .build();

    let result = WorkflowEngine::new()
        .execute_workflow(workflow, json!(null))
        .await
        .unwrap();

    assert_eq!(result.status, WorkflowStatus::Faulted);
    let inner = result
        .get_task_result("/do/0/guarded/try/do/0/fail")
        .and_then(|t| t.error.clone())
        .unwrap();
    let outer = result.error.unwrap();
    assert_eq!(outer, inner);
    assert_eq!(outer.detail.as_deref(), Some("boom"));
}

#[tokio::test]
async fn test_try_without_handler_or_retry_swallows_error() {
    let workflow = TestWorkflowBuilder::new("swallow")
        .with_task(
            "guarded",
            "try:\n  - fail:\n      raise:\n        error:\n          type: runtime\n          status: 500\ncatch:\n  errors:\n    with:\n      status: 500\nthen: after",
        )
        .add_set_task("skipped_over", "never")
        .with_task("after", "set:\n  previous: '{{input}}'")
        .build();

    let result = WorkflowEngine::new()
        .execute_workflow(workflow, json!({"ignored": true}))
        .await
        .unwrap();

    assert_completed(&result);
    assert_eq!(result.output, Some(json!({"previous": null})));
    assert_eq!(task_status(&result, "/do/0/guarded").as_deref(), Some("completed"));
    assert!(result.get_task_result("/do/1/skipped_over").is_none());
    assert_eq!(task_status(&result, "/do/1/after").as_deref(), Some("completed"));
}

#[tokio::test]
async fn test_catch_when_guard_selects_errors() {
    let guarded = |status: u16| {
        TestWorkflowBuilder::new("catch_when")
            .with_task(
                "guarded",
                &format!(
                    "try:\n  - fail:\n      raise:\n        error:\n          type: communication\n          status: {}\ncatch:\n  when: '{{{{eq error.status 503}}}}'",
                    status
                ),
            )
            .build()
    };
    let engine = WorkflowEngine::new();

    let caught = engine.execute_workflow(guarded(503), json!(null)).await.unwrap();
    assert_completed(&caught);
    assert_eq!(caught.output, Some(json!(null)));

    let passed = engine.execute_workflow(guarded(500), json!(null)).await.unwrap();
    assert_eq!(passed.status, WorkflowStatus::Faulted);
    assert_eq!(passed.error.unwrap().status, 500);
}

#[tokio::test]
async fn test_catch_except_when_guard_rejects_errors() {
    let workflow = TestWorkflowBuilder::new("catch_except")
        .with_task(
            "guarded",
            "try:\n  - fail:\n      raise:\n        error:\n          type: runtime\n          status: 500\n          detail: fatal\ncatch:\n  exceptWhen: '{{eq error.detail \"fatal\"}}'\n  do:\n    - recover:\n        set: recovered",
        )
        .build();

    let result = WorkflowEngine::new()
        .execute_workflow(workflow, json!(null))
        .await
        .unwrap();

    assert_eq!(result.status, WorkflowStatus::Faulted);
    assert_eq!(result.error.clone().unwrap().detail.as_deref(), Some("fatal"));
    assert!(result.get_task_result("/do/0/guarded/catch/do").is_none());
}

#[tokio::test]
async fn test_retry_exhaustion_records_every_attempt() {
    let handler = Arc::new(RecordingCallHandler::new().failing(10));
    let engine = WorkflowEngine::new().with_call_handler("flaky", handler.clone());
    let workflow = TestWorkflowBuilder::new("retries")
        .with_task(
            "guarded",
            "try:\n  - flaky:\n      call: flaky\ncatch:\n  errors:\n    with:\n      type: communication\n  retry:\n    delay: 10ms\n    limit:\n      attempt:\n        count: 2",
        )
        .build();

    let result = engine.execute_workflow(workflow, json!(null)).await.unwrap();

    assert_eq!(result.status, WorkflowStatus::Faulted);
    assert_eq!(result.error.as_ref().map(|e| e.status), Some(503));
    assert_eq!(handler.call_count(), 3);

    let guarded = result.get_task_result("/do/0/guarded").unwrap();
    assert_eq!(guarded.retries, 2);
    assert_eq!(guarded.status, TaskStatus::Faulted);
    for path in ["/do/0/guarded/try", "/do/0/guarded/retry/0", "/do/0/guarded/retry/1"] {
        assert_eq!(task_status(&result, path).as_deref(), Some("faulted"), "{}", path);
    }
    assert!(result.get_task_result("/do/0/guarded/retry/2").is_none());
}

#[tokio::test]
async fn test_retry_recovers_after_transient_failure() {
    let handler = Arc::new(RecordingCallHandler::new().failing(1));
    let engine = WorkflowEngine::new().with_call_handler("flaky", handler.clone());
    let workflow = TestWorkflowBuilder::new("transient")
        .with_task(
            "guarded",
            "try:\n  - flaky:\n      call: flaky\n      with:\n        attempt: ok\ncatch:\n  retry:\n    delay: 5ms\n    limit:\n      attempt:\n        count: 3",
        )
        .build();

    let result = engine.execute_workflow(workflow, json!(null)).await.unwrap();

    assert_completed(&result);
    assert_eq!(result.output, Some(json!({"attempt": "ok"})));
    assert_eq!(result.get_task_result("/do/0/guarded").unwrap().retries, 1);
    assert_eq!(
        task_status(&result, "/do/0/guarded/retry/0").as_deref(),
        Some("completed")
    );
}

#[tokio::test]
async fn test_retry_guards_skip_straight_to_handler() {
    for guard in [
        "when: '{{eq error.status 429}}'",
        "exceptWhen: '{{eq error.status 503}}'",
    ] {
        let handler = Arc::new(RecordingCallHandler::new().failing(10));
        let engine = WorkflowEngine::new().with_call_handler("flaky", handler.clone());
        let workflow = TestWorkflowBuilder::new("retry_guard")
            .with_task(
                "guarded",
                &format!(
                    "try:\n  - flaky:\n      call: flaky\ncatch:\n  retry:\n    {}\n    delay: 5ms\n    limit:\n      attempt:\n        count: 3\n  do:\n    - recover:\n        set: handled",
                    guard
                ),
            )
            .build();

        let result = engine.execute_workflow(workflow, json!(null)).await.unwrap();

        assert_completed(&result);
        assert_eq!(result.output, Some(json!("handled")), "{}", guard);
        assert_eq!(handler.call_count(), 1, "{}", guard);
        assert_eq!(result.get_task_result("/do/0/guarded").unwrap().retries, 0);
        assert!(result.get_task_result("/do/0/guarded/retry/0").is_none());
    }
}

#[tokio::test]
async fn test_retry_stops_after_attempt_duration() {
    let handler = Arc::new(RecordingCallHandler::new().failing(100));
    let engine = WorkflowEngine::new().with_call_handler("flaky", handler.clone());
    let workflow = TestWorkflowBuilder::new("retry_window")
        .with_task(
            "guarded",
            "try:\n  - flaky:\n      call: flaky\ncatch:\n  retry:\n    delay: 50ms\n    limit:\n      attempt:\n        duration: 120ms",
        )
        .build();

    let started = std::time::Instant::now();
    let result = engine.execute_workflow(workflow, json!(null)).await.unwrap();

    assert_eq!(result.status, WorkflowStatus::Faulted);
    assert!(started.elapsed() < Duration::from_secs(2));
    let calls = handler.call_count();
    assert!((2..=5).contains(&calls), "unexpected call count {}", calls);
    let guarded = result.get_task_result("/do/0/guarded").unwrap();
    assert_eq!(guarded.retries, calls - 1);
}

#[tokio::test]
async fn test_raise_by_reference() {
    let workflow = TestWorkflowBuilder::new("conflict")
        .with_error(
            "conflict",
            "type: https://example.com/errors/conflict\nstatus: 409\ntitle: Order conflict",
        )
        .with_task("reject", "raise:\n  error: conflict")
        .build();

    let result = WorkflowEngine::new()
        .execute_workflow(workflow, json!(null))
        .await
        .unwrap();

    assert_eq!(result.status, WorkflowStatus::Faulted);
    let error = result.error.unwrap();
    assert_eq!(error.status, 409);
    assert_eq!(error.title, "Order conflict");
    assert_eq!(error.type_, "https://example.com/errors/conflict");
    assert_eq!(error.instance.as_deref(), Some("/do/0/reject"));
}

#[tokio::test]
async fn test_timeout_faults_slow_task() {
    let workflow = TestWorkflowBuilder::new("deadline")
        .with_task("slow", "wait: 2s\ntimeout:\n  after: 50ms")
        .build();

    let result = WorkflowEngine::new()
        .execute_workflow(workflow, json!(null))
        .await
        .unwrap();

    assert_eq!(result.status, WorkflowStatus::Faulted);
    let error = result.error.unwrap();
    assert!(error.is(ErrorType::Timeout));
    assert_eq!(error.status, 408);
    assert_eq!(error.instance.as_deref(), Some("/do/0/slow"));
}

#[tokio::test]
async fn test_emit_publishes_event() {
    let (engine, broker) = engine_with_broker();
    let workflow = TestWorkflowBuilder::new("notify")
        .with_task(
            "announce",
            "emit:\n  event:\n    with:\n      source: urn:test\n      type: order.created\n      data:\n        id: '{{input.id}}'",
        )
        .build();

    let result = engine.execute_workflow(workflow, json!({"id": 7})).await.unwrap();

    assert_completed(&result);
    let published = broker.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].type_, "order.created");
    assert_eq!(published[0].data, Some(json!({"id": 7})));
    assert_eq!(result.output.unwrap()["type"], "order.created");
}

#[tokio::test]
async fn test_listen_waits_for_single_event() {
    let (engine, broker) = engine_with_broker();
    let workflow = TestWorkflowBuilder::new("await_payment")
        .with_task(
            "payment",
            "listen:\n  to:\n    one:\n      with:\n        type: payment.settled",
        )
        .build();

    let run = engine.start(Arc::new(workflow), json!(null)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(run.root().status().await, TaskStatus::Running);

    broker
        .publish(CloudEvent::new("urn:test", "payment.settled").with_data(json!({"amount": 10})))
        .await
        .unwrap();

    let result = run.wait().await.unwrap();
    assert_completed(&result);
    assert_eq!(result.output, Some(json!({"amount": 10})));
}

#[tokio::test]
async fn test_listen_stream_runs_handler_per_event() {
    let (engine, broker) = engine_with_broker();
    for id in [1, 2] {
        broker
            .publish(CloudEvent::new("urn:test", "order.placed").with_data(json!({"id": id})))
            .await
            .unwrap();
    }
    broker
        .publish(CloudEvent::new("urn:test", "order.ignored"))
        .await
        .unwrap();
    broker.close();

    let workflow = TestWorkflowBuilder::new("orders")
        .with_task(
            "orders",
            "listen:\n  to:\n    any:\n      - with:\n          type: order.placed\nforeach:\n  item: order\n  do:\n    - record:\n        set:\n          id: '{{order.id}}'",
        )
        .build();

    let result = engine.execute_workflow(workflow, json!(null)).await.unwrap();

    assert_completed(&result);
    assert_eq!(broker.acknowledged(), vec![1, 2]);
    for offset in [1, 2] {
        let path = format!("/do/0/orders/foreach/{}", offset);
        assert_eq!(task_status(&result, &path).as_deref(), Some("completed"));
    }
    assert!(result.get_task_result("/do/0/orders/foreach/3").is_none());
}

#[tokio::test]
async fn test_listen_fault_cancels_running_handlers() {
    let (engine, broker) = engine_with_broker();
    broker
        .publish(
            CloudEvent::new("urn:test", "order.placed").with_data(json!({"id": 1, "tags": ["a"]})),
        )
        .await
        .unwrap();
    broker
        .publish(CloudEvent::new("urn:test", "order.placed").with_data(json!({"id": 2})))
        .await
        .unwrap();

    let workflow = TestWorkflowBuilder::new("orders")
        .with_task(
            "orders",
            "listen:\n  to:\n    any:\n      - with:\n          type: order.placed\nforeach:\n  output:\n    as:\n      id: '{{input.id}}'\n      tags: '{{join input.tags}}'\n  do:\n    - hold:\n        wait: 1s",
        )
        .build();

    let started = std::time::Instant::now();
    let result = engine.execute_workflow(workflow, json!(null)).await.unwrap();

    assert_eq!(result.status, WorkflowStatus::Faulted);
    assert!(result.error.clone().unwrap().is(ErrorType::Expression));
    assert!(started.elapsed() < Duration::from_millis(900));
    assert_eq!(
        task_status(&result, "/do/0/orders/foreach/1").as_deref(),
        Some("cancelled")
    );
    assert!(result.get_task_result("/do/0/orders/foreach/2").is_none());
    assert_eq!(broker.acknowledged(), vec![1]);
}

#[tokio::test]
async fn test_call_handler_receives_evaluated_arguments() {
    let handler = Arc::new(RecordingCallHandler::new());
    let engine = WorkflowEngine::new().with_call_handler("greeter", handler.clone());
    let workflow = TestWorkflowBuilder::new("greet")
        .with_task("hello", "call: greeter\nwith:\n  greeting: 'hi {{input.name}}'")
        .build();

    let result = engine
        .execute_workflow(workflow, json!({"name": "Ada"}))
        .await
        .unwrap();

    assert_completed(&result);
    assert_eq!(result.output, Some(json!({"greeting": "hi Ada"})));
    assert_eq!(handler.calls.lock().unwrap().clone(), vec![json!({"greeting": "hi Ada"})]);
}

#[tokio::test]
async fn test_call_runs_custom_function() {
    let handler = Arc::new(RecordingCallHandler::new());
    let engine = WorkflowEngine::new().with_call_handler("echo", handler.clone());
    let workflow = TestWorkflowBuilder::new("functions")
        .with_function("lookup", "call: echo\nwith:\n  looked_up: '{{input.n}}'")
        .with_task("x", "call: lookup\nwith:\n  n: 4")
        .build();

    let result = engine.execute_workflow(workflow, json!(null)).await.unwrap();

    assert_completed(&result);
    assert_eq!(result.output, Some(json!({"looked_up": 4})));
    assert_eq!(handler.call_count(), 1);
    assert_eq!(
        task_status(&result, "/do/0/x/function").as_deref(),
        Some("completed")
    );
}

#[tokio::test]
async fn test_call_to_unknown_function_faults() {
    let workflow = TestWorkflowBuilder::new("missing")
        .with_task("x", "call: nothing_here")
        .build();

    let result = WorkflowEngine::new()
        .execute_workflow(workflow, json!(null))
        .await
        .unwrap();

    assert_eq!(result.status, WorkflowStatus::Faulted);
    assert!(result.error.unwrap().is(ErrorType::Validation));
}

#[tokio::test]
async fn test_run_returns_parsed_stdout() {
    let runner = Arc::new(StubProcessRunner::new(0, "{\"ok\": true}\n", ""));
    let engine = WorkflowEngine::new().with_process_runner(ProcessKind::Shell, runner.clone());
    let workflow = TestWorkflowBuilder::new("process")
        .with_task("check", "run:\n  shell:\n    command: '{{input.tool}}'")
        .build();

    let result = engine
        .execute_workflow(workflow, json!({"tool": "checker"}))
        .await
        .unwrap();

    assert_completed(&result);
    assert_eq!(result.output, Some(json!({"ok": true})));
    assert_eq!(runner.runs.lock().unwrap()[0], json!({"command": "checker"}));
}

#[tokio::test]
async fn test_run_faults_on_non_zero_exit() {
    let runner = Arc::new(StubProcessRunner::new(2, "", "boom"));
    let engine = WorkflowEngine::new().with_process_runner(ProcessKind::Shell, runner);
    let workflow = TestWorkflowBuilder::new("failing_process")
        .with_task("check", "run:\n  shell:\n    command: fail")
        .build();

    let result = engine.execute_workflow(workflow, json!(null)).await.unwrap();

    assert_eq!(result.status, WorkflowStatus::Faulted);
    let error = result.error.unwrap();
    assert!(error.is(ErrorType::Runtime));
    let detail = error.detail.unwrap();
    assert!(detail.contains("code 2"));
    assert!(detail.contains("boom"));
}

#[tokio::test]
async fn test_run_shell_process() {
    let workflow = TestWorkflowBuilder::new("shell")
        .with_task("echo", "run:\n  shell:\n    command: echo\n    args: ['hello']")
        .build();

    let result = WorkflowEngine::new()
        .execute_workflow(workflow, json!(null))
        .await
        .unwrap();

    assert_completed(&result);
    assert_eq!(result.output, Some(json!("hello")));
}

#[tokio::test]
async fn test_suspend_and_resume_same_run() {
    let workflow = TestWorkflowBuilder::new("pausable")
        .add_set_task("before", "1")
        .with_task("pause", "wait: 200ms")
        .with_task("after", "set:\n  done: true")
        .build();

    let engine = WorkflowEngine::new();
    let run = engine.start(Arc::new(workflow), json!(null)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    run.suspend().await.unwrap();
    let suspended = run.wait().await.unwrap();
    assert_eq!(suspended.status, WorkflowStatus::Suspended);
    assert_eq!(task_status(&suspended, "/do/0/before").as_deref(), Some("completed"));
    assert_eq!(task_status(&suspended, "/do/1/pause").as_deref(), Some("suspended"));
    assert!(suspended.get_task_result("/do/2/after").is_none());

    run.resume().await.unwrap();
    let result = run.wait().await.unwrap();
    assert_completed(&result);
    assert_eq!(result.output, Some(json!({"done": true})));
    assert_eq!(
        result.tasks.iter().filter(|t| t.path == "/do/0/before").count(),
        1
    );
}

#[tokio::test]
async fn test_engine_resumes_suspended_instance() {
    let workflow = Arc::new(
        TestWorkflowBuilder::new("restartable")
            .add_set_task("before", "1")
            .with_task("pause", "wait: 200ms")
            .with_task("after", "set:\n  done: true")
            .build(),
    );

    let engine = WorkflowEngine::new();
    let run = engine.start(Arc::clone(&workflow), json!(null)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    run.suspend().await.unwrap();

    let resumed = engine
        .resume(Arc::clone(&workflow), run.instance_id())
        .await
        .unwrap();
    assert_eq!(resumed.instance_id(), run.instance_id());

    let result = resumed.wait().await.unwrap();
    assert_completed(&result);
    assert_eq!(result.output, Some(json!({"done": true})));
}

#[tokio::test]
async fn test_resume_unknown_instance_fails() {
    let workflow = Arc::new(TestWorkflowBuilder::new("ghost").add_set_task("a", "1").build());
    assert!(WorkflowEngine::new()
        .resume(workflow, "no-such-instance")
        .await
        .is_err());
}

#[tokio::test]
async fn test_cancel_running_workflow() {
    let workflow = TestWorkflowBuilder::new("cancellable")
        .with_task("pause", "wait: 5s")
        .build();

    let run = WorkflowEngine::new()
        .start(Arc::new(workflow), json!(null))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    run.cancel().await.unwrap();

    let result = run.wait().await.unwrap();
    assert_eq!(result.status, WorkflowStatus::Cancelled);
    assert_eq!(task_status(&result, "/do/0/pause").as_deref(), Some("cancelled"));
}

#[tokio::test]
async fn test_concurrency_limit_serializes_calls() {
    let handler = Arc::new(RecordingCallHandler::new().with_delay(Duration::from_millis(30)));
    let engine = WorkflowEngine::new()
        .with_call_handler("slow", handler.clone())
        .with_max_concurrent_tasks(1);
    let workflow = TestWorkflowBuilder::new("limited")
        .with_task(
            "all",
            "fork:\n  branches:\n    - a:\n        call: slow\n    - b:\n        call: slow\n    - c:\n        call: slow",
        )
        .build();

    let result = engine.execute_workflow(workflow, json!(null)).await.unwrap();

    assert_completed(&result);
    assert_eq!(handler.call_count(), 3);
    assert_eq!(handler.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_concurrent_workflows_are_isolated() {
    let engine = Arc::new(WorkflowEngine::new());
    let workflow = TestWorkflowBuilder::new("parallel_runs")
        .with_task("echo", "set:\n  who: '{{input.who}}'")
        .build();

    let mut handles = Vec::new();
    for who in ["a", "b", "c"] {
        let engine = Arc::clone(&engine);
        let workflow = workflow.clone();
        handles.push(tokio::spawn(async move {
            engine.execute_workflow(workflow, json!({"who": who})).await
        }));
    }

    let mut ids = Vec::new();
    for (handle, who) in handles.into_iter().zip(["a", "b", "c"]) {
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.output, Some(json!({"who": who})));
        ids.push(result.instance_id);
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 3);
}
