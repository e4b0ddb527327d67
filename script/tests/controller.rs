use std::{collections::BTreeMap, sync::Arc};

use serde_json::json;
use vitrine_descriptor::Fqn;
use vitrine_script::{
    CompileOptions, Controller, Error, Limits, Value, compile, try_compile,
};

fn fqn() -> Fqn {
    Fqn::new("system.cards.value-card").unwrap()
}

fn no_modules() -> BTreeMap<String, Arc<str>> {
    BTreeMap::new()
}

fn ctx(settings: serde_json::Value) -> Value {
    Value::from_json(&json!({
        "settings": settings,
        "data": [],
        "latestData": [],
        "isEdit": false,
    }))
}

#[test]
fn hooks_populate_the_receiver() {
    let source = r#"
        self.onInit = function () {
            self.value = self.ctx.settings.start + 1;
        };
        self.onResize = () => { self.resized = (self.resized || 0) + 1; };
    "#;
    let mut controller = compile(source, &fqn(), &no_modules(), &CompileOptions::default());
    assert!(!controller.is_inert());

    controller.attach_context(ctx(json!({ "start": 1 })));
    controller.on_init().unwrap();
    controller.on_resize().unwrap();
    controller.on_resize().unwrap();
    controller.on_destroy().unwrap();

    assert_eq!(controller.property("value"), Some(json!(2)));
    assert_eq!(controller.property("resized"), Some(json!(2)));
    assert_eq!(controller.property("ctx.settings.start"), Some(json!(1)));
    assert_eq!(controller.property("missing"), None);
}

#[test]
fn ctx_parameter_follows_the_attached_context() {
    let source = "self.onInit = function () { self.title = ctx.settings.title; };";
    let mut controller = compile(source, &fqn(), &no_modules(), &CompileOptions::default());
    controller.attach_context(ctx(json!({ "title": "Temperature" })));
    controller.on_init().unwrap();
    assert_eq!(controller.property("title"), Some(json!("Temperature")));
}

#[test]
fn top_level_throw_yields_inert_controller() {
    let source = "self.onInit = function () {}; throw new Error('boom');";
    let err = try_compile(source, &fqn(), &no_modules(), &CompileOptions::default())
        .err()
        .unwrap();
    assert!(matches!(&err, Error::Runtime { message, .. } if message == "Error: boom"), "{err}");

    let mut controller = compile(source, &fqn(), &no_modules(), &CompileOptions::default());
    assert!(controller.is_inert());
    controller.attach_context(ctx(json!({})));
    controller.on_init().unwrap();
    controller.on_data_updated().unwrap();
    controller.on_edit_mode_changed(true).unwrap();
    assert!(controller.action_sources().is_empty());
    assert_eq!(controller.property("anything"), None);
}

#[test]
fn throwing_a_plain_value_is_reported_as_throw() {
    let err = try_compile("throw 'nope';", &fqn(), &no_modules(), &CompileOptions::default())
        .err()
        .unwrap();
    assert!(matches!(&err, Error::Throw { message, .. } if message == "nope"), "{err}");
}

#[test]
fn syntax_error_reports_line_and_column() {
    let source = "self.onInit = function () {\n  var = 3;\n};";
    let err = try_compile(source, &fqn(), &no_modules(), &CompileOptions::default())
        .err()
        .unwrap();
    match err {
        Error::Syntax { line, column, .. } => assert_eq!((line, column), (2, 7)),
        other => panic!("expected a syntax error, got {other}"),
    }
}

#[test]
fn unbounded_loop_exhausts_fuel() {
    let options = CompileOptions {
        limits: Limits {
            fuel: 10_000,
            ..Limits::default()
        },
        ..CompileOptions::default()
    };
    let err = try_compile("while (true) {}", &fqn(), &no_modules(), &options)
        .err()
        .unwrap();
    assert!(matches!(err, Error::FuelExhausted { budget: 10_000 }), "{err}");
}

#[test]
fn each_hook_call_gets_a_fresh_budget() {
    let options = CompileOptions {
        limits: Limits {
            fuel: 2_000,
            ..Limits::default()
        },
        ..CompileOptions::default()
    };
    let source = r#"
        self.onDataUpdated = function () {
            var total = 0;
            for (var i = 0; i < 600; i++) { total += i; }
            self.total = total;
        };
    "#;
    let mut controller = compile(source, &fqn(), &no_modules(), &options);
    controller.on_data_updated().unwrap();
    controller.on_data_updated().unwrap();
    assert_eq!(controller.property("total"), Some(json!(179_700)));
}

#[test]
fn hook_errors_are_returned_not_fatal() {
    let source = r#"
        self.onDataUpdated = function () { self.ctx.nothing.here(); };
        self.onEditModeChanged = function (isEdit) { self.editing = isEdit; };
    "#;
    let mut controller = compile(source, &fqn(), &no_modules(), &CompileOptions::default());
    controller.attach_context(ctx(json!({})));
    let err = controller.on_data_updated().unwrap_err();
    assert!(matches!(err, Error::Runtime { .. }), "{err}");

    controller.on_edit_mode_changed(true).unwrap();
    assert_eq!(controller.property("editing"), Some(json!(true)));
}

#[test]
fn modules_bind_to_their_alias() {
    let mut modules = BTreeMap::new();
    modules.insert(
        "helpers".to_string(),
        Arc::from("exports.twice = function (x) { return x * 2; };"),
    );
    modules.insert(
        "meta".to_string(),
        Arc::from("module.exports = { name: 'formatter' };"),
    );
    let source = r#"
        self.onInit = function () {
            self.n = helpers.twice(21);
            self.name = meta.name;
        };
    "#;
    let mut controller = compile(source, &fqn(), &modules, &CompileOptions::default());
    controller.on_init().unwrap();
    assert_eq!(controller.property("n"), Some(json!(42)));
    assert_eq!(controller.property("name"), Some(json!("formatter")));
}

#[test]
fn broken_module_is_reported_by_alias() {
    let mut modules = BTreeMap::new();
    modules.insert("broken".to_string(), Arc::from("throw new TypeError('bad');"));
    let err = try_compile("", &fqn(), &modules, &CompileOptions::default())
        .err()
        .unwrap();
    assert!(
        matches!(&err, Error::Module { alias, message } if alias == "broken" && message == "TypeError: bad"),
        "{err}"
    );
}

#[test]
fn metadata_accessors_read_script_declarations() {
    let source = r#"
        self.actionSources = function () {
            return {
                rowClick: { name: 'On row click', multiple: false },
                headerButton: { name: 'Header button', multiple: true, hasShowCondition: true },
            };
        };
        self.typeParameters = function () {
            return { maxDatasources: 1, dataKeysOptional: true };
        };
        self.getSettingsForm = function () {
            return [{ id: 'title', name: 'Title', type: 'text', default: 'Value' }];
        };
        self.useCustomDatasources = function () { return true; };
    "#;
    let mut controller = compile(source, &fqn(), &no_modules(), &CompileOptions::default());

    let sources = controller.action_sources();
    assert_eq!(sources.len(), 2);
    assert_eq!(sources["rowClick"].name, "On row click");
    assert!(sources["headerButton"].multiple);
    assert!(sources["headerButton"].has_show_condition);

    let params = controller.type_parameters();
    assert_eq!(params.get("maxDatasources"), Some(&json!(1)));

    let form = controller.settings_form();
    assert_eq!(form.len(), 1);
    assert_eq!(form[0].id, "title");
    assert_eq!(form[0].default, Some(json!("Value")));

    assert!(controller.data_key_settings_form().is_empty());
    assert!(controller.use_custom_datasources());
}

#[test]
fn utilities_are_installed_on_the_context() {
    let source = r#"
        self.onInit = function () {
            var color = self.ctx.tinycolor('#ff0000');
            self.hex = color.toHexString();
            self.year = self.ctx.moment(0).year();
            self.hasJquery = self.ctx.$ !== undefined;
        };
    "#;
    let mut controller = compile(source, &fqn(), &no_modules(), &CompileOptions::default());
    let context = ctx(json!({}));
    controller.inject_utilities(&context);
    controller.attach_context(context);
    controller.on_init().unwrap();
    assert_eq!(controller.property("hex"), Some(json!("#ff0000")));
    assert_eq!(controller.property("year"), Some(json!(1970)));
    assert_eq!(controller.property("hasJquery"), Some(json!(false)));
}

fn limited(max_array_len: usize, max_string_len: usize) -> CompileOptions {
    CompileOptions {
        limits: Limits {
            max_array_len,
            max_string_len,
            ..Limits::default()
        },
        ..CompileOptions::default()
    }
}

#[test]
fn huge_allocations_throw_range_errors() {
    for source in [
        "'a'.repeat(1e19);",
        "new Array(1e19);",
        "Array(4e9);",
        "var a = []; a.length = 1e19;",
        "var a = []; a[1e9] = 1;",
        "'x'.padStart(1e19);",
        "'x'.padEnd(2e9, 'ab');",
        "Array.from({ length: 1e19 });",
    ] {
        let err = try_compile(source, &fqn(), &no_modules(), &CompileOptions::default())
            .err()
            .unwrap_or_else(|| panic!("{source} compiled"));
        assert!(
            matches!(&err, Error::Runtime { message, .. } if message.starts_with("RangeError")),
            "{source}: {err}"
        );
        let controller = compile(source, &fqn(), &no_modules(), &CompileOptions::default());
        assert!(controller.is_inert(), "{source}");
    }
}

#[test]
fn growth_stops_at_the_configured_caps() {
    let source = r#"
        var errors = [];
        function attempt(f) {
            try { f(); errors.push('none'); } catch (e) { errors.push(e.name); }
        }
        attempt(function () { var a = []; for (var i = 0; i < 200; i++) { a.push(i); } });
        attempt(function () { var a = []; for (var i = 0; i < 200; i++) { a.unshift(i); } });
        attempt(function () { var a = [1]; while (true) { a = a.concat(a); } });
        attempt(function () { var a = [1]; while (true) { a = [...a, ...a]; } });
        attempt(function () { var s = 'ab'; while (true) { s = s + s; } });
        attempt(function () { var s = 'x'; while (true) { s = `${s}${s}`; } });
        attempt(function () { 'abc'.repeat(400); });
        attempt(function () { 'aaaa'.replaceAll('a', 'b'.repeat(300)); });
        attempt(function () {
            var a = [];
            for (var i = 0; i < 99; i++) { a.push('0123456789ab'); }
            a.join('--');
        });
        attempt(function () { JSON.stringify(['x'.repeat(600), 'y'.repeat(600)]); });
        attempt(function () { 'x'.padEnd(1001); });
        self.errors = errors.join(',');
        self.atCap = 'a'.repeat(1000).length + new Array(100).length;
    "#;
    let controller = try_compile(source, &fqn(), &no_modules(), &limited(100, 1_000)).unwrap();
    let expected = vec!["RangeError"; 11].join(",");
    assert_eq!(controller.property("errors"), Some(json!(expected)));
    assert_eq!(controller.property("atCap"), Some(json!(1_100)));
}

#[test]
fn cyclic_arrays_print_without_recursing() {
    let source = r#"
        var a = [1];
        a.push(a);
        self.text = '' + a;
        self.nested = `${[a, 2]}`;
        self.string = String(a);
        try { JSON.stringify(a); } catch (e) { self.json = e.name; }
        console.log(a);
    "#;
    let controller = try_compile(source, &fqn(), &no_modules(), &CompileOptions::default()).unwrap();
    assert_eq!(controller.property("text"), Some(json!("1,")));
    assert_eq!(controller.property("nested"), Some(json!("1,,2")));
    assert_eq!(controller.property("string"), Some(json!("1,")));
    assert_eq!(controller.property("json"), Some(json!("TypeError")));
}

#[test]
fn deeply_nested_source_is_a_syntax_error() {
    let depth = 5_000;
    for source in [
        format!("self.x = {}1{};", "(".repeat(depth), ")".repeat(depth)),
        format!("self.x = {}{};", "[".repeat(depth), "]".repeat(depth)),
        format!("self.x = 1{};", " + 1".repeat(depth)),
    ] {
        let err = try_compile(&source, &fqn(), &no_modules(), &CompileOptions::default())
            .err()
            .unwrap();
        assert!(
            matches!(&err, Error::Syntax { message, .. } if message.contains("nesting")),
            "{err}"
        );
        assert!(compile(&source, &fqn(), &no_modules(), &CompileOptions::default()).is_inert());
    }
}

#[test]
fn deep_evaluation_is_fatal() {
    let source = r#"
        function depth(n) { return n == 0 ? 0 : 1 + depth(n - 1); }
        try { self.value = depth(40); } catch (e) { self.caught = true; }
    "#;
    let controller = try_compile(source, &fqn(), &no_modules(), &CompileOptions::default()).unwrap();
    assert_eq!(controller.property("value"), Some(json!(40)));

    let options = CompileOptions {
        limits: Limits {
            max_nesting: 64,
            ..Limits::default()
        },
        ..CompileOptions::default()
    };
    let err = try_compile(source, &fqn(), &no_modules(), &options).err().unwrap();
    assert!(matches!(err, Error::NestingExceeded { limit: 64 }), "{err}");
}
