//! Tests for script execution.

use super::*;
use crate::context::Context;
use crate::error::EffectError;
use crate::events::EventKind;
use crate::parser::parse;
use crate::test_support::TemplateDir;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn math_registry() -> FunctionRegistry {
    let mut registry = FunctionRegistry::new();
    registry.register("add", |args: &[Value]| {
        let sum: i64 = args.iter().filter_map(Value::as_i64).sum();
        Ok(json!(sum))
    });
    registry.register("fail", |_: &[Value]| Err("division by zero".to_string()));
    registry
}

fn model(src: &str) -> ExecutionModel {
    model_with(src, math_registry())
}

fn model_with(src: &str, registry: FunctionRegistry) -> ExecutionModel {
    ExecutionModel::new(Arc::new(parse(src).unwrap()), Arc::new(registry))
}

fn completed(outcome: StepOutcome) -> ExecutionState {
    match outcome {
        StepOutcome::Completed(state) => state,
        other => panic!("expected completion, got {:?}", other),
    }
}

fn suspended(outcome: StepOutcome) -> RunRequest {
    match outcome {
        StepOutcome::Suspended(request) => request,
        other => panic!("expected suspension, got {:?}", other),
    }
}

fn failed(outcome: StepOutcome) -> EffectError {
    match outcome {
        StepOutcome::Failed(err) => err,
        other => panic!("expected failure, got {:?}", other),
    }
}

fn respond(text: &str) -> Option<Resume> {
    Some(Resume::Response(AgentResponse::new(text)))
}

// ============================================================================
// Effects
// ============================================================================

#[test]
fn test_function_call_result_reaches_prose() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let mut registry = FunctionRegistry::new();
    registry.register("add", move |args: &[Value]| {
        counter.fetch_add(1, Ordering::SeqCst);
        let sum: i64 = args.iter().filter_map(Value::as_i64).sum();
        Ok(json!(sum))
    });

    let src = "from math import add\n@effect func add(12, 12) => result\n<<${result}>>";
    let state = completed(model_with(src, registry).step(None));

    assert_eq!(state.buffer, ["24\n"]);
    assert_eq!(state.variables["result"], json!(24));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_function_call_without_target_discards_result() {
    let src = "from math import add\n@effect func add(1, 2)";
    let state = completed(model(src).step(None));
    assert!(state.variables.is_empty());
    assert!(state.buffer.is_empty());
}

#[test]
fn test_function_arguments_see_loop_bindings_and_state() {
    let src = "from math import add\n\
               @state total = 0\n\
               for i in range(1, 4):\n    \
                   @effect func add(total, i) => total\n\
               <<${total}>>";
    let state = completed(model(src).step(None));
    assert_eq!(state.buffer, ["6\n"]);
}

#[test]
fn test_state_assign_overwrites() {
    let src = "@state mode = \"draft\"\n@state mode = \"final\"\n@state missing = nothing";
    let state = completed(model(src).step(None));
    assert_eq!(state.variables["mode"], json!("final"));
    assert_eq!(state.variables["missing"], Value::Null);
}

#[test]
fn test_context_clear_keeps_variables() {
    let src = "@state keep = \"kept\"\n<<before>>\n@effect tool search\n@effect clear context";
    let state = completed(model(src).step(None));

    assert!(state.buffer.is_empty());
    assert_eq!(state.variables["keep"], json!("kept"));
    assert_eq!(state.tools, ["search"]);
}

#[test]
fn test_tool_clear_keeps_buffer_and_variables() {
    let src = "@state keep = 1\n@effect tools search, fetch\n<<prompt>>\n@effect clear tools";
    let state = completed(model(src).step(None));

    assert!(state.tools.is_empty());
    assert_eq!(state.buffer, ["prompt\n"]);
    assert_eq!(state.variables["keep"], json!(1));
}

#[test]
fn test_tool_registration_is_idempotent() {
    let src = "@effect tool search\n@effect tools search, fetch";
    let state = completed(model(src).step(None));
    assert_eq!(state.tools, ["search", "fetch"]);
}

#[test]
fn test_control_flow_gates_effects() {
    let src = "if premium:\n    @effect tool search\n    <<premium>>\nelse:\n    <<basic>>";
    let ctx = Context::from_json(json!({"premium": true})).unwrap();
    let state = completed(model(src).with_context(&ctx).step(None));
    assert_eq!(state.tools, ["search"]);
    assert_eq!(state.buffer, ["premium\n"]);

    let ctx = Context::from_json(json!({"premium": false})).unwrap();
    let state = completed(model(src).with_context(&ctx).step(None));
    assert!(state.tools.is_empty());
    assert_eq!(state.buffer, ["basic\n"]);
}

#[test]
fn test_persistent_variables_shadow_context() {
    let src = "<<${name}>>\n@state name = \"from state\"\n<<${name}>>";
    let ctx = Context::from_json(json!({"name": "from context"})).unwrap();
    let state = completed(model(src).with_context(&ctx).step(None));
    assert_eq!(state.buffer, ["from context\n", "from state\n"]);
}

#[test]
fn test_include_renders_into_buffer() {
    let dir = TemplateDir::new();
    dir.write("persona.mg", "<<You are ${role}.>>");
    let src = "@state role = \"a reviewer\"\n[[ persona ]]";
    let state = completed(model(src).with_base_dir(dir.path()).step(None));
    assert_eq!(state.buffer, ["You are a reviewer.\n"]);
}

// ============================================================================
// Function resolution
// ============================================================================

#[test]
fn test_unimported_function_fails_at_use() {
    let mut model = model("@state before = 1\n@effect func add(1, 2) => r\n@state after = 2");
    let err = failed(model.step(None));

    assert_eq!(err, EffectError::UnknownFunction("add".into()));
    assert_eq!(model.status(), Status::Failed);
    assert_eq!(model.get_variable("before"), Some(&json!(1)));
    assert_eq!(model.get_variable("after"), None);
}

#[test]
fn test_import_of_unknown_name_fails_only_when_called() {
    let src = "from math import mul\n<<imported>>\n@effect func mul(2, 3) => r";
    let mut model = model(src);
    let err = failed(model.step(None));

    assert_eq!(
        err,
        EffectError::RegistryMiss {
            name: "mul".into(),
            module: "math".into()
        }
    );
    assert_eq!(model.state().buffer, ["imported\n"]);
}

#[test]
fn test_module_qualified_registry_entry() {
    let mut registry = math_registry();
    registry.register("text.add", |_: &[Value]| Ok(json!("concatenated")));

    let src = "from text import add\n@effect func add(1, 2) => r";
    let state = completed(model_with(src, registry).step(None));
    assert_eq!(state.variables["r"], json!("concatenated"));
}

#[test]
fn test_function_failure_is_reported() {
    let src = "import fail\n@effect func fail() => r";
    let err = failed(model(src).step(None));
    assert_eq!(
        err,
        EffectError::FunctionFailed {
            name: "fail".into(),
            message: "division by zero".into()
        }
    );
}

#[test]
fn test_evaluation_error_fails_the_step() {
    let mut model = model("<<one>>\nfor x in flag: <<${x}>>\n<<never>>");
    let ctx = Context::from_json(json!({"flag": 3})).unwrap();
    model = model.with_context(&ctx);

    let err = failed(model.step(None));
    assert!(matches!(err, EffectError::Eval(_)));
    assert_eq!(model.state().buffer, ["one\n"]);
}

// ============================================================================
// Suspension
// ============================================================================

#[test]
fn test_run_suspends_and_resumes() {
    let src = "@effect tool search\n<<Find a recipe.>>\n@effect run\n<<You said: ${last_result}>>";
    let mut model = model(src);

    let request = suspended(model.step(None));
    assert_eq!(model.status(), Status::Suspended);
    assert_eq!(request.turn, 0);
    assert_eq!(request.tools, ["search"]);
    assert_eq!(request.prompt(), "Find a recipe.\n");

    let state = completed(model.step(respond("pasta")));
    assert_eq!(state.turn, 1);
    assert_eq!(state.variables["last_result"], json!("pasta"));
    assert_eq!(state.buffer, ["Find a recipe.\n", "pasta", "You said: pasta\n"]);
    // The tool set survives the run.
    assert_eq!(state.tools, ["search"]);
}

#[test]
fn test_custom_last_result_variable() {
    let mut model = model("@effect run\n<<${answer}>>").with_last_result_variable("answer");
    suspended(model.step(None));
    let state = completed(model.step(respond("42")));
    assert_eq!(state.buffer, ["42", "42\n"]);
    assert!(!state.variables.contains_key("last_result"));
}

#[test]
fn test_run_inside_loop_resumes_mid_iteration() {
    let src = "for i in range(2):\n    <<ask ${i}>>\n    @effect run\n    <<got ${last_result}>>";
    let mut model = model(src);

    let first = suspended(model.step(None));
    assert_eq!(first.buffer, ["ask 0\n"]);

    let second = suspended(model.step(respond("A")));
    assert_eq!(second.turn, 1);
    assert_eq!(second.buffer, ["ask 0\n", "A", "got A\n", "ask 1\n"]);

    let state = completed(model.step(respond("B")));
    assert_eq!(state.turn, 2);
    assert_eq!(state.buffer.last().unwrap(), "got B\n");
}

#[test]
fn test_failed_run_keeps_committed_state() {
    let src = "from math import add\n@effect func add(2, 3) => sum\n@effect run\n@state after = 1";
    let mut model = model(src);
    suspended(model.step(None));

    let err = failed(model.step(Some(Resume::Failed("agent timed out".into()))));
    assert_eq!(err, EffectError::RunFailed("agent timed out".into()));
    assert_eq!(model.status(), Status::Failed);
    assert_eq!(model.get_variable("sum"), Some(&json!(5)));
    assert_eq!(model.get_variable("after"), None);
    assert_eq!(model.state().turn, 0);
}

#[test]
fn test_cancelled_run_fails() {
    let mut model = model("@state x = 1\n@effect run");
    suspended(model.step(None));

    assert_eq!(failed(model.step(Some(Resume::Cancelled))), EffectError::Cancelled);
    assert_eq!(model.status(), Status::Failed);
    assert_eq!(model.get_variable("x"), Some(&json!(1)));
}

#[test]
fn test_retry_after_failed_run_suspends_again() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let mut registry = FunctionRegistry::new();
    registry.register("add", move |args: &[Value]| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(json!(args.iter().filter_map(Value::as_i64).sum::<i64>()))
    });
    let src = "from math import add\n@effect func add(2, 3) => sum\n<<ask>>\n@effect run\n@state after = 1";
    let mut model = model_with(src, registry);

    let first = suspended(model.step(None));
    failed(model.step(Some(Resume::Failed("agent timed out".into()))));

    let again = suspended(model.retry());
    assert_eq!(again, first);
    assert_eq!(model.status(), Status::Suspended);

    let state = completed(model.step(respond("answer")));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(state.variables["sum"], json!(5));
    assert_eq!(state.variables["after"], json!(1));
    assert_eq!(state.buffer_text(), "ask\nanswer");
    assert_eq!(state.turn, 1);
}

#[test]
fn test_retry_after_cancel_inside_loop() {
    let mut model = model("for i in range(2):\n    <<q${i}>>\n    @effect run");
    suspended(model.step(None));
    let second = suspended(model.step(respond("a0")));
    assert_eq!(failed(model.step(Some(Resume::Cancelled))), EffectError::Cancelled);

    assert_eq!(suspended(model.retry()), second);
    let state = completed(model.step(respond("a1")));
    assert_eq!(state.buffer_text(), "q0\na0q1\na1");
}

#[test]
fn test_retry_reenters_failed_segment_with_its_bindings() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let mut registry = FunctionRegistry::new();
    registry.register("add", move |args: &[Value]| {
        // The second call (x == 1) fails once.
        if counter.fetch_add(1, Ordering::SeqCst) == 1 {
            return Err("service unavailable".to_string());
        }
        Ok(json!(args.iter().filter_map(Value::as_i64).sum::<i64>()))
    });
    let src = "from math import add\nfor x in range(3):\n    @effect func add(x, 10) => y\n    <<${y} >>";
    let mut model = model_with(src, registry);

    let err = failed(model.step(None));
    assert!(matches!(err, EffectError::FunctionFailed { .. }));
    assert_eq!(model.state().buffer, ["10 \n"]);

    let state = completed(model.retry());
    assert_eq!(state.buffer_text(), "10 \n11 \n12 \n");
    assert_eq!(calls.load(Ordering::SeqCst), 4);

    let retries = model
        .events()
        .iter()
        .filter(|e| e.kind == EventKind::Retry)
        .count();
    assert_eq!(retries, 1);
}

#[test]
fn test_retry_requires_a_failed_model() {
    let mut model = model("<<hello>>");
    assert!(matches!(failed(model.retry()), EffectError::InvalidStep(_)));
    assert_eq!(model.status(), Status::Ready);

    completed(model.step(None));
    assert!(matches!(failed(model.retry()), EffectError::InvalidStep(_)));
    assert_eq!(model.status(), Status::Completed);
}

#[test]
fn test_step_misuse_leaves_model_unchanged() {
    let mut model = model("<<hello>>\n@effect run");

    let err = failed(model.step(respond("too early")));
    assert!(matches!(err, EffectError::InvalidStep(_)));
    assert_eq!(model.status(), Status::Ready);
    assert!(model.state().buffer.is_empty());

    suspended(model.step(None));
    let err = failed(model.step(None));
    assert!(matches!(err, EffectError::InvalidStep(_)));
    assert_eq!(model.status(), Status::Suspended);

    completed(model.step(respond("done")));
    let err = failed(model.step(None));
    assert_eq!(
        err,
        EffectError::InvalidStep("the model has already completed".into())
    );
    assert_eq!(model.status(), Status::Completed);
}

#[test]
fn test_resume_from_saved_state() {
    let mut first = model("@state topic = \"rust\"\n<<Tell me about ${topic}.>>\n@effect run");
    suspended(first.step(None));
    completed(first.step(respond("It is a language.")));
    let saved = first.into_state();

    let ctx = Context::from_json(json!({"turn": saved.turn})).unwrap();
    let mut second = model("<<Previously: ${last_result} (${topic}, turn ${turn})>>")
        .with_context(&ctx)
        .with_state(saved);
    let state = completed(second.step(None));

    assert_eq!(state.turn, 1);
    assert_eq!(
        state.buffer.last().unwrap(),
        "Previously: It is a language. (rust, turn 1)\n"
    );
}

// ============================================================================
// Agent tool calls
// ============================================================================

#[test]
fn test_variable_accessors_while_suspended() {
    let mut model = model("@state plan = \"draft\"\n@effect run\n<<${plan}>>");
    suspended(model.step(None));

    let value = model
        .invoke_tool("get_variable", vec![json!("plan")])
        .unwrap();
    assert_eq!(value, json!("draft"));

    model
        .invoke_tool("set_variable", vec![json!("plan"), json!("final")])
        .unwrap();
    assert_eq!(model.state().pending_tool_calls.len(), 2);

    let state = completed(model.step(respond("ok")));
    assert_eq!(state.buffer.last().unwrap(), "final\n");
    assert!(state.pending_tool_calls.is_empty());
}

#[test]
fn test_registered_tools_call_the_registry() {
    let src = "from math import add\n@effect tool add\n@effect run";
    let mut model = model(src);
    suspended(model.step(None));

    let sum = model.invoke_tool("add", vec![json!(4), json!(5)]).unwrap();
    assert_eq!(sum, json!(9));
    assert_eq!(
        model.state().pending_tool_calls,
        [ToolCall {
            name: "add".into(),
            args: vec![json!(4), json!(5)],
            result: json!(9)
        }]
    );

    let err = model.invoke_tool("fail", vec![]).unwrap_err();
    assert_eq!(err, EffectError::UnknownTool("fail".into()));
    // A rejected call changes nothing.
    assert_eq!(model.status(), Status::Suspended);
    assert_eq!(model.state().pending_tool_calls.len(), 1);
}

#[test]
fn test_tools_only_while_suspended() {
    let mut model = model("<<hi>>");
    let err = model
        .invoke_tool("get_variable", vec![json!("x")])
        .unwrap_err();
    assert!(matches!(err, EffectError::InvalidStep(_)));
}

// ============================================================================
// Stepping and events
// ============================================================================

#[test]
fn test_advance_executes_one_segment_at_a_time() {
    let mut model = model("<<one>>\n@effect clear context\n<<two>>");

    assert_eq!(model.advance().unwrap(), Progress::Advanced);
    assert_eq!(model.state().buffer, ["one\n"]);
    assert_eq!(model.status(), Status::Running);

    assert_eq!(model.advance().unwrap(), Progress::Advanced);
    assert!(model.state().buffer.is_empty());

    assert_eq!(model.advance().unwrap(), Progress::Advanced);
    assert_eq!(model.advance().unwrap(), Progress::Completed);
    assert_eq!(model.state().buffer, ["two\n"]);
}

#[test]
fn test_events_follow_execution_order() {
    let src = "from math import add\n@effect func add(1, 2) => r\n<<${r}>>\n@effect run";
    let mut model = model(src);
    suspended(model.step(None));
    completed(model.step(respond("fine")));

    let kinds: Vec<EventKind> = model.events().iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        [
            EventKind::Import,
            EventKind::FunctionCall,
            EventKind::Prose,
            EventKind::Run,
            EventKind::Resume,
            EventKind::Completed,
        ]
    );
    assert_eq!(model.events()[4].turn, 1);

    let drained = model.take_events();
    assert_eq!(drained.len(), 6);
    assert!(model.events().is_empty());
}

#[test]
fn test_failure_is_recorded() {
    let mut model = model("@effect func nope()");
    failed(model.step(None));

    let last = model.events().last().unwrap();
    assert_eq!(last.kind, EventKind::Failed);
    assert!(last.details["error"].as_str().unwrap().contains("nope"));
}
