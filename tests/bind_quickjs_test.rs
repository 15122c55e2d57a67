use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use switchyard::{BindError, Bindable, BridgeConfig, EvalError, MethodTable, QuickJsEngine, Window};

#[derive(Debug, Default, Serialize)]
struct Counter {
    value: i64,
}

impl Bindable for Counter {
    fn register(methods: &mut MethodTable<Self>) {
        methods
            .method("Add", |counter: &mut Counter, n: i64| counter.value += n)
            .method("Reset", |counter: &mut Counter| counter.value = 0);
    }
}

#[derive(Debug, Default, Serialize)]
struct Calculator {
    sum: f64,
    labels: BTreeMap<String, Vec<Point>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Point {
    x: i32,
    y: i32,
}

impl Bindable for Calculator {
    fn register(methods: &mut MethodTable<Self>) {
        methods
            .method("Foo", |calc: &mut Calculator, a: i64, b: f64| calc.sum = a as f64 + b)
            .method("Label", |calc: &mut Calculator, labels: BTreeMap<String, Vec<Point>>| {
                calc.labels.extend(labels);
            });
    }
}

#[derive(Debug, Default, Serialize)]
struct Notes {
    title: String,
}

impl Bindable for Notes {
    fn register(methods: &mut MethodTable<Self>) {
        methods.method("Retitle", |notes: &mut Notes, title: String| notes.title = title);
    }
}

fn window() -> Window<QuickJsEngine> {
    Window::quickjs(BridgeConfig::default()).expect("window")
}

fn eval_i64(window: &Window<QuickJsEngine>, script: &str) -> i64 {
    window
        .engine()
        .eval_with(script, "bind_quickjs_test.js")
        .expect("script result")
}

fn eval_string(window: &Window<QuickJsEngine>, script: &str) -> String {
    window
        .engine()
        .eval_with(script, "bind_quickjs_test.js")
        .expect("script result")
}

#[test]
fn counter_add_round_trips_through_script() {
    let mut window = window();
    let counter = Arc::new(Mutex::new(Counter::default()));
    window.bind("counter", Arc::clone(&counter)).expect("bind");

    assert_eq!(eval_i64(&window, "counter.data.value"), 0);
    assert_eq!(eval_string(&window, "typeof counter.add"), "function");
    assert_eq!(eval_string(&window, "typeof counter.reset"), "function");

    window.evaluate("counter.add(5);").expect("call stub");
    // Invokes are routed by the loop, not while the script runs.
    assert_eq!(counter.lock().unwrap().value, 0);

    assert_eq!(window.run_until_idle(), 1);
    assert_eq!(counter.lock().unwrap().value, 5);
    assert_eq!(eval_i64(&window, "counter.data.value"), 5);
}

#[test]
fn render_hook_sees_every_sync() {
    let mut window = window();
    let counter = Arc::new(Mutex::new(Counter::default()));
    window.bind("counter", Arc::clone(&counter)).expect("bind");

    window
        .evaluate(
            r#"
            var rendered = [];
            counter.render = function(state) { rendered.push(state.value); };
            counter.add(2);
            counter.add(3);
            counter.reset();
            "#,
        )
        .expect("script");
    assert_eq!(window.run_until_idle(), 3);
    assert_eq!(eval_string(&window, "rendered.join(',')"), "2,5,0");
}

#[test]
fn host_side_changes_are_pushed_by_sync_fn() {
    let window = window();
    let counter = Arc::new(Mutex::new(Counter::default()));
    let sync = window.bind("counter", Arc::clone(&counter)).expect("bind");

    counter.lock().unwrap().value = 41;
    assert_eq!(eval_i64(&window, "counter.data.value"), 0);
    sync.sync(&window).expect("sync");
    assert_eq!(eval_i64(&window, "counter.data.value"), 41);
}

#[test]
fn params_are_decoded_into_declared_types() {
    let mut window = window();
    let calc = Arc::new(Mutex::new(Calculator::default()));
    window.bind("calc", Arc::clone(&calc)).expect("bind");

    window
        .evaluate(r#"calc.foo(3, 4.5); calc.label({origin: [{x: 0, y: 0}], corner: [{x: 2, y: -1}]});"#)
        .expect("script");
    assert_eq!(window.run_until_idle(), 2);

    let calc = calc.lock().unwrap();
    assert_eq!(calc.sum, 7.5);
    assert_eq!(calc.labels["origin"], vec![Point { x: 0, y: 0 }]);
    assert_eq!(calc.labels["corner"], vec![Point { x: 2, y: -1 }]);
}

#[test]
fn bad_invokes_are_dropped_without_faulting() {
    let mut window = window();
    let calc = Arc::new(Mutex::new(Calculator::default()));
    window.bind("calc", Arc::clone(&calc)).expect("bind");

    window
        .evaluate(
            r#"
            window.external.invoke(JSON.stringify({scope: "wrong", method: "Foo", params: [3, 4.5]}));
            window.external.invoke(JSON.stringify({scope: "calc", method: "Foo", params: [3]}));
            window.external.invoke(JSON.stringify({scope: "calc", method: "Foo", params: ["3", 4.5]}));
            window.external.invoke(JSON.stringify({scope: "calc", method: "Nope", params: []}));
            window.external.invoke("{not json");
            calc.foo(1);
            "#,
        )
        .expect("script");
    assert_eq!(window.run_until_idle(), 6);
    assert_eq!(calc.lock().unwrap().sum, 0.0);

    assert!(!window.route_invoke(r#"{"scope":"wrong","method":"Foo","params":[3,4.5]}"#));
    assert!(window.route_invoke(r#"{"scope":"calc","method":"Foo","params":[3,4.5]}"#));
    assert_eq!(calc.lock().unwrap().sum, 7.5);
}

#[test]
fn large_state_survives_json_parse_escaping() {
    let config = BridgeConfig {
        json_parse_threshold: 16,
        ..BridgeConfig::default()
    };
    let mut window = Window::quickjs(config).expect("window");
    let notes = Arc::new(Mutex::new(Notes::default()));
    window.bind("notes", Arc::clone(&notes)).expect("bind");

    let title = "it's a \\path\\ with \"quotes\" and a \u{2028} separator";
    let payload = serde_json::json!({"scope": "notes", "method": "Retitle", "params": [title]});
    assert!(window.route_invoke(&payload.to_string()));
    assert_eq!(window.run_until_idle(), 0);

    assert_eq!(notes.lock().unwrap().title, title);
    assert_eq!(eval_string(&window, "notes.data.title"), title);
}

#[test]
fn configured_channel_is_used_by_stubs() {
    let config = BridgeConfig {
        invoke_channel: "host.bridge.post".to_string(),
        ..BridgeConfig::default()
    };
    let mut window = Window::quickjs(config).expect("window");
    let counter = Arc::new(Mutex::new(Counter::default()));
    window.bind("counter", Arc::clone(&counter)).expect("bind");

    assert_eq!(eval_string(&window, "typeof host.bridge.post"), "function");
    window.evaluate("counter.add(7);").expect("script");
    window.run_until_idle();
    assert_eq!(counter.lock().unwrap().value, 7);
}

#[test]
fn non_composites_cannot_be_bound() {
    #[derive(Serialize)]
    struct Scores(Vec<i64>);

    impl Bindable for Scores {
        fn register(methods: &mut MethodTable<Self>) {
            methods.method("Push", |scores: &mut Scores, n: i64| scores.0.push(n));
        }
    }

    let window = window();
    let err = window
        .bind("scores", Arc::new(Mutex::new(Scores(vec![1]))))
        .unwrap_err();
    assert!(matches!(err, BindError::NotBindable(_)));

    let absent: Option<Counter> = None;
    let err = window.bind("absent", Arc::new(Mutex::new(absent))).unwrap_err();
    assert!(matches!(err, BindError::NotBindable(_)));
    assert!(window.binding_names().is_empty());
}

#[test]
fn existing_namespace_object_is_kept() {
    let mut window = window();
    window
        .evaluate("var counter = {render: function(s) { globalThis.seen = s.value; }, keep: 1};")
        .expect("predefine namespace");

    let counter = Arc::new(Mutex::new(Counter { value: 3 }));
    window.bind("counter", Arc::clone(&counter)).expect("bind");

    assert_eq!(eval_i64(&window, "counter.keep"), 1);
    assert_eq!(eval_i64(&window, "seen"), 3);
    assert_eq!(eval_string(&window, "typeof counter.add"), "function");

    window.evaluate("counter.add(4);").expect("call stub");
    window.run_until_idle();
    assert_eq!(eval_i64(&window, "seen"), 7);
    assert_eq!(eval_i64(&window, "counter.keep"), 1);
}

#[test]
fn unit_struct_services_can_be_bound() {
    #[derive(Serialize)]
    struct Service;

    static PINGS: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

    impl Bindable for Service {
        fn register(methods: &mut MethodTable<Self>) {
            methods.method("Ping", |_: &mut Service| {
                PINGS.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            });
        }
    }

    let mut window = window();
    window.bind("service", Arc::new(Mutex::new(Service))).expect("bind");
    assert_eq!(eval_string(&window, "typeof service.ping"), "function");
    assert_eq!(eval_string(&window, "String(service.data)"), "null");

    window.evaluate("service.ping();").expect("call stub");
    window.run_until_idle();
    assert_eq!(PINGS.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[test]
fn script_exceptions_surface_as_eval_errors() {
    let window = window();
    let err = window
        .evaluate("throw new Error('boom');")
        .unwrap_err();
    match err {
        EvalError::Script(message) => assert!(message.contains("boom"), "{message}"),
        other => panic!("unexpected error: {other}"),
    }
}
