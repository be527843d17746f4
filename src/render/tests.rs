//! Tests for rendering.

use super::*;
use crate::parser::parse;
use crate::test_support::TemplateDir;
use serde_json::{Value, json};

fn render_str(src: &str, ctx: Value) -> Result<String, RenderError> {
    let template = parse(src).unwrap();
    let ctx = Context::from_json(ctx).unwrap();
    render(&template.ast, &ctx, Path::new("."))
}

fn ok(src: &str, ctx: Value) -> String {
    render_str(src, ctx).unwrap()
}

// ============================================================================
// Text and interpolation
// ============================================================================

#[test]
fn test_plain_text() {
    assert_eq!(ok("<<Hello, world!>>", json!({})), "Hello, world!\n");
}

#[test]
fn test_variables_are_substituted() {
    let out = ok(
        "<<${greeting}, ${name}! Your age is ${age}.>>",
        json!({"greeting": "Hi", "name": "Bob", "age": 25}),
    );
    assert_eq!(out, "Hi, Bob! Your age is 25.\n");
}

#[test]
fn test_dotted_and_indexed_paths() {
    let ctx = json!({"user": {"profile": {"name": "Dana"}}, "items": ["x", "y"]});
    assert_eq!(ok("<<${user.profile.name} ${items.1}>>", ctx), "Dana y\n");
}

#[test]
fn test_missing_variable_renders_empty() {
    assert_eq!(ok("<<Hello, ${name}!>>", json!({})), "Hello, !\n");
}

#[test]
fn test_strict_mode_rejects_missing_variable() {
    let template = parse("<<Hello, ${name}!>>").unwrap();
    let renderer = Renderer::new(RenderOptions {
        strict_variables: true,
        ..RenderOptions::default()
    });
    let err = renderer
        .render(&template.ast, &Context::new(), Path::new("."))
        .unwrap_err();
    assert_eq!(err, RenderError::Eval(EvalError::Absent("name".into())));

    // Explicit null is a value, not an absence.
    let ctx = Context::from_json(json!({"name": null})).unwrap();
    assert_eq!(
        renderer.render(&template.ast, &ctx, Path::new(".")).unwrap(),
        "Hello, !\n"
    );
}

#[test]
fn test_value_stringification() {
    let ctx = json!({"t": true, "n": null, "f": 19.99, "l": [1, "a"], "m": {"k": "v"}});
    assert_eq!(
        ok("<<${t}|${n}|${f}|${l}|${m}>>", ctx),
        "true||19.99|[1,\"a\"]|{\"k\":\"v\"}\n"
    );
}

// ============================================================================
// Conditionals
// ============================================================================

#[test]
fn test_inline_if_else() {
    let src = "if subscribed: <<Thanks, ${name}!>> else: <<Please subscribe.>>";
    assert_eq!(ok(src, json!({"subscribed": true, "name": "Dana"})), "Thanks, Dana!");
    assert_eq!(ok(src, json!({"subscribed": false})), "Please subscribe.");
}

#[test]
fn test_if_else_blocks() {
    let src = "if logged_in:\n    <<Welcome back!>>\nelse:\n    <<Please log in.>>";
    assert_eq!(ok(src, json!({"logged_in": false})), "Please log in.\n");
    assert_eq!(ok(src, json!({"logged_in": true})), "Welcome back!\n");
}

#[test]
fn test_elif_chain_stops_at_first_truthy() {
    let src = "if a:\n    <<first>>\nelif b:\n    <<second>>\nelif c:\n    <<third>>\nelse:\n    <<fourth>>";
    let out = ok(src, json!({"a": false, "b": true, "c": true}));
    assert_eq!(out, "second\n");
}

#[test]
fn test_first_truthy_branch_short_circuits_errors() {
    // The second condition would be an ordering error if evaluated.
    let src = "if ok:\n    <<fine>>\nelif name > 3:\n    <<never>>";
    assert_eq!(ok(src, json!({"ok": true, "name": "x"})), "fine\n");

    let err = render_str(src, json!({"ok": false, "name": "x"})).unwrap_err();
    assert!(matches!(err, RenderError::Eval(EvalError::TypeMismatch { .. })));
}

#[test]
fn test_comparisons_in_conditions() {
    let src = "if count >= 10: <<many>> else: <<few>>";
    assert_eq!(ok(src, json!({"count": 10})), "many");
    assert_eq!(ok(src, json!({"count": 9.5})), "few");

    let src = "if status != \"active\": <<inactive>>";
    assert_eq!(ok(src, json!({"status": "pending"})), "inactive");
    assert_eq!(ok(src, json!({"status": "active"})), "");

    let src = "if user.role == other.role: <<same>>";
    assert_eq!(
        ok(src, json!({"user": {"role": "admin"}, "other": {"role": "admin"}})),
        "same"
    );
}

#[test]
fn test_nested_conditionals() {
    let src = "if outer:\n    <<Outer>>\n    if inner:\n        <<Inner>>";
    assert_eq!(ok(src, json!({"outer": true, "inner": true})), "Outer\nInner\n");
    assert_eq!(ok(src, json!({"outer": true, "inner": false})), "Outer\n");
    assert_eq!(ok(src, json!({"outer": false, "inner": true})), "");
}

// ============================================================================
// Loops
// ============================================================================

#[test]
fn test_for_loop() {
    let src = "for item in items:\n    <<- ${item}>>";
    assert_eq!(ok(src, json!({"items": ["a", "b", "c"]})), "- a\n- b\n- c\n");
}

#[test]
fn test_nested_loops_are_outer_major() {
    let src = "for item in items: for n in subs: <<${item}-${n}>>";
    let out = ok(src, json!({"items": ["a", "b"], "subs": [1, 2]}));
    assert_eq!(out, "a-1a-2b-1b-2");
}

#[test]
fn test_range_loop() {
    assert_eq!(ok("for i in range(0, 10, 2): <<${i} >>", json!({})), "0 2 4 6 8 ");
    assert_eq!(ok("for i in range(5, 0): <<${i}>>", json!({})), "");
    assert_eq!(ok("for i in range(3, 0, -1): <<${i}>>", json!({})), "321");
}

#[test]
fn test_zero_step_range_fails() {
    let err = render_str("for i in range(x, y, 0): <<${i}>>", json!({"x": 1, "y": 5})).unwrap_err();
    assert_eq!(err, RenderError::Eval(EvalError::ZeroStep));
}

#[test]
fn test_loop_variable_shadows_and_does_not_leak() {
    let src = "for name in names: <<${name},>>\n<<after: ${name}>>";
    let out = ok(src, json!({"names": ["x", "y"], "name": "outer"}));
    assert_eq!(out, "x,y,after: outer\n");
}

#[test]
fn test_loop_over_mapping_keys() {
    let src = "for key in config: <<${key};>>";
    assert_eq!(ok(src, json!({"config": {"b": 1, "a": 2}})), "b;a;");
}

#[test]
fn test_loop_over_missing_value_is_empty() {
    assert_eq!(ok("for x in nothing: <<${x}>>", json!({})), "");
}

#[test]
fn test_failure_returns_no_partial_output() {
    let src = "<<start>>\nfor x in flag: <<${x}>>";
    let err = render_str(src, json!({"flag": true})).unwrap_err();
    assert_eq!(err, RenderError::Eval(EvalError::NotIterable("boolean")));
}

#[test]
fn test_rendering_is_deterministic() {
    let src = "for k in m: <<${k}=${m}>>\n<<${l}>>";
    let ctx = json!({"m": {"z": 1, "a": [1, 2]}, "l": [{"x": null}]});
    let first = ok(src, ctx.clone());
    for _ in 0..5 {
        assert_eq!(ok(src, ctx.clone()), first);
    }
}

#[test]
fn test_script_directives_are_skipped() {
    let src = "@state x = 1\n@effect run\n<<text>>";
    assert_eq!(ok(src, json!({})), "text\n");
}

// ============================================================================
// Includes
// ============================================================================

#[test]
fn test_include_with_parameters() {
    let dir = TemplateDir::new();
    dir.write("greeting.mg", "<<Hello, ${who}!>>");
    let template = parse(r#"[[ greeting who="World" ]]"#).unwrap();

    let out = render(&template.ast, &Context::new(), dir.path()).unwrap();
    assert_eq!(out, "Hello, World!\n");
}

#[test]
fn test_include_sees_caller_scope_without_writing_to_it() {
    let dir = TemplateDir::new();
    dir.write("item.mg", "<<${prefix}${item}>>");
    let template = parse("for item in items:\n    [[ item prefix=\"* \" ]]\n<<${prefix}>>").unwrap();
    let ctx = Context::from_json(json!({"items": ["a", "b"]})).unwrap();

    let out = render(&template.ast, &ctx, dir.path()).unwrap();
    assert_eq!(out, "* a\n* b\n\n");
}

#[test]
fn test_nested_include_resolves_relative_to_including_file() {
    let dir = TemplateDir::new();
    dir.write("main.mg", "[[ parts/section ]]");
    dir.write("parts/section.mg", "<<section:>>\n[[ footer ]]");
    dir.write("parts/footer.mg", "<<footer>>");
    // A footer beside main.mg must not be picked up.
    dir.write("footer.mg", "<<wrong footer>>");

    let out = Renderer::default()
        .render_file(&dir.path().join("main.mg"), &Context::new())
        .unwrap();
    assert_eq!(out, "section:\nfooter\n");
}

#[test]
fn test_missing_include() {
    let dir = TemplateDir::new();
    let template = parse("<<before>>\n[[ missing ]]").unwrap();
    let err = render(&template.ast, &Context::new(), dir.path()).unwrap_err();
    assert!(matches!(err, RenderError::IncludeNotFound { .. }));
}

#[test]
fn test_self_include_is_a_cycle() {
    let dir = TemplateDir::new();
    let a = dir.write("a.mg", "<<a>>\n[[ a ]]");

    let err = Renderer::default().render_file(&a, &Context::new()).unwrap_err();
    assert_eq!(err, RenderError::IncludeCycle { chain: vec![a.clone(), a] });
}

#[test]
fn test_mutual_include_is_a_cycle() {
    let dir = TemplateDir::new();
    let a = dir.write("a.mg", "[[ b ]]");
    let b = dir.write("b.mg", "[[ a ]]");

    let err = Renderer::default().render_file(&a, &Context::new()).unwrap_err();
    assert_eq!(
        err,
        RenderError::IncludeCycle {
            chain: vec![a.clone(), b, a]
        }
    );
    assert!(err.to_string().contains("a.mg -> "));
}

#[test]
fn test_diamond_include_parses_shared_file_once() {
    let dir = TemplateDir::new();
    let a = dir.write("a.mg", "[[ b ]]\n[[ c ]]");
    dir.write("b.mg", "<<b>>\n[[ d ]]");
    dir.write("c.mg", "<<c>>\n[[ d ]]");
    dir.write("d.mg", "<<d>>");

    let renderer = Renderer::default();
    let out = renderer.render_file(&a, &Context::new()).unwrap();
    assert_eq!(out, "b\nd\nc\nd\n");
    // a, b, c and d each parsed exactly once.
    assert_eq!(renderer.cache().parse_count(), 4);

    renderer.render_file(&a, &Context::new()).unwrap();
    assert_eq!(renderer.cache().parse_count(), 4);
}

#[test]
fn test_shared_cache_across_renderers() {
    let dir = TemplateDir::new();
    let page = dir.write("page.mg", "[[ d ]]");
    dir.write("d.mg", "<<d>>");

    let cache = Arc::new(TemplateCache::new());
    let first = Renderer::with_cache(Arc::clone(&cache), RenderOptions::default());
    let second = Renderer::with_cache(Arc::clone(&cache), RenderOptions::default());
    first.render_file(&page, &Context::new()).unwrap();
    second.render_file(&page, &Context::new()).unwrap();
    assert_eq!(cache.parse_count(), 2);
}

#[test]
fn test_dynamic_include() {
    let dir = TemplateDir::new();
    dir.write("layouts/wide.mg", "<<wide layout>>");
    let template = parse("[[ ${layout} ]]").unwrap();
    let ctx = Context::from_json(json!({"layout": "layouts/wide"})).unwrap();

    let out = render(&template.ast, &ctx, dir.path()).unwrap();
    assert_eq!(out, "wide layout\n");
}
