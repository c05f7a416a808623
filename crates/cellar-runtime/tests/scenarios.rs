//! End-to-end behavior of the runtime through its public API.

use std::sync::atomic::{AtomicUsize, Ordering};

use cellar_runtime::action::deferred::RESOURCE;
use cellar_runtime::{
    Bounce, Frame, Heap, HeapConfig, Kind, Materialized, ParamSpec, Result, RuntimeError, TypeSet,
    Value,
};

fn integers() -> TypeSet {
    TypeSet::of(&[Kind::Integer])
}

#[test]
fn frozen_text_refuses_mutation() {
    let mut heap = Heap::new(HeapConfig::small());
    let text = heap.make_text("cat");

    heap.freeze(&text).unwrap();

    assert_eq!(heap.append_text(&text, "s"), Err(RuntimeError::FrozenSeries));
    assert_eq!(heap.clear(&text), Err(RuntimeError::FrozenSeries));
    assert_eq!(heap.text_of(&text).unwrap(), "cat");
    assert!(heap.is_frozen(&text));
}

static ADD1_CALLS: AtomicUsize = AtomicUsize::new(0);

fn add1(frame: &mut Frame<'_>) -> Result<Bounce> {
    ADD1_CALLS.fetch_add(1, Ordering::SeqCst);
    let n = frame.arg(0).as_integer()?;
    Ok(Bounce::Out(Value::integer(n + 1)))
}

#[test]
fn add1_checks_its_argument_before_running() {
    let mut heap = Heap::new(HeapConfig::small());
    let spec = [ParamSpec::normal("n", integers())];
    let action = heap.register_native("add1", &spec, add1).unwrap();

    let out = heap.invoke(&action, &[Value::integer(41)]).unwrap();
    assert_eq!(out.as_integer().unwrap(), 42);
    assert_eq!(ADD1_CALLS.load(Ordering::SeqCst), 1);

    let text = heap.make_text("x");
    let live = heap.live_nodes();

    assert_eq!(
        heap.invoke(&action, &[text]),
        Err(RuntimeError::ArgType {
            action: "add1".into(),
            param: "n".into(),
            found: Kind::Text,
        })
    );

    assert_eq!(ADD1_CALLS.load(Ordering::SeqCst), 1);
    assert_eq!(heap.live_nodes(), live);
    assert_eq!(heap.depth(), 0);
}

fn increment(frame: &mut Frame<'_>) -> Result<Bounce> {
    let n = frame.arg(0).as_integer()?;
    Ok(Bounce::Out(Value::integer(n + 1)))
}

fn answer(_: &mut Frame<'_>) -> Result<Bounce> {
    Ok(Bounce::Out(Value::integer(1)))
}

fn other_answer(_: &mut Frame<'_>) -> Result<Bounce> {
    Ok(Bounce::Out(Value::integer(2)))
}

#[test]
fn dispatcher_replacement_is_seen_through_every_reference() {
    let mut heap = Heap::new(HeapConfig::small());
    let x = heap.make_action(&[], answer, 0, "answer");
    let y = x.copied();

    heap.lib_define("answer", &x).unwrap();
    let z = heap.lib_get("answer").unwrap();

    heap.replace_dispatcher(&x, other_answer).unwrap();

    for reference in [&x, &y, &z] {
        let out = heap.invoke(reference, &[]).unwrap();
        assert_eq!(out.as_integer().unwrap(), 2);
    }
}

static CLEANED: AtomicUsize = AtomicUsize::new(0);

fn count_cleanup(_: Box<dyn std::any::Any>) {
    CLEANED.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn guarded_values_survive_collection() {
    let mut heap = Heap::new(HeapConfig::small());
    let handle = heap.make_handle(Box::new(7u32), Some(count_cleanup));
    let holder = heap.make_block(&[handle]);

    {
        let mut scope = heap.guard_value(&holder);
        scope.recycle();
        scope.recycle();

        assert_eq!(CLEANED.load(Ordering::SeqCst), 0);
        let inner = scope.at(&holder, 0).unwrap();
        assert_eq!(*scope.handle_data::<u32>(&inner).unwrap(), 7);
    }

    assert_eq!(heap.recycle(), 2);
    assert_eq!(CLEANED.load(Ordering::SeqCst), 1);
}

static MATERIALIZED: AtomicUsize = AtomicUsize::new(0);

fn greet(frame: &mut Frame<'_>) -> Result<Bounce> {
    let greeting = frame.resource::<String>(RESOURCE).clone();
    let name = frame.arg(0);
    let name = frame.heap().text_of(&name)?;

    let out = frame.heap().make_text(&format!("{greeting}, {name}"));
    Ok(Bounce::Out(out))
}

fn compile_greeting(link_name: &str, source: &str) -> Result<Materialized> {
    MATERIALIZED.fetch_add(1, Ordering::SeqCst);
    let greeting = format!("{source} from {link_name}");
    Ok(Materialized::new(greet).with_resource(Box::new(greeting), None))
}

#[test]
fn deferred_natives_materialize_once() {
    let mut heap = Heap::new(HeapConfig::small());
    let spec = [ParamSpec::normal("name", TypeSet::of(&[Kind::Text]))];
    let action = heap.make_deferred_native("greet", &spec, "tcc", "hello", compile_greeting);
    heap.lib_define("greet", &action).unwrap();

    for name in ["ada", "bob", "cy"] {
        let name = heap.make_text(name);
        let out = heap.invoke(&action, &[name.copied()]).unwrap();
        let expected = format!("hello from tcc, {}", heap.text_of(&name).unwrap());
        assert_eq!(heap.text_of(&out).unwrap(), expected);
        heap.recycle();
    }

    assert_eq!(MATERIALIZED.load(Ordering::SeqCst), 1);
}

#[test]
#[should_panic(expected = "internal consistency failure")]
fn released_resources_are_fatal_to_dispatch() {
    let mut heap = Heap::new(HeapConfig::small());
    let spec = [ParamSpec::normal("name", TypeSet::of(&[Kind::Text]))];
    let action = heap.make_deferred_native("greet", &spec, "tcc", "hello", compile_greeting);

    let name = heap.make_text("ada");
    heap.invoke(&action, &[name.copied()]).unwrap();

    let resource = heap.detail(&action, RESOURCE).unwrap();
    heap.release(resource.node().unwrap());

    let _ = heap.invoke(&action, &[name]);
}

#[test]
fn interpreted_bodies_resolve_against_their_frame() {
    let mut heap = Heap::new(HeapConfig::small());
    let a = heap.word("a");
    let b = heap.word("b");
    let body = heap.make_block(&[a, b]);

    let spec = [
        ParamSpec::normal("a", integers()),
        ParamSpec::normal("b", integers()),
    ];
    let action = heap.make_interpreted("pair", &spec, &body).unwrap();

    let first = heap.invoke(&action, &[Value::integer(1), Value::integer(2)]).unwrap();
    let second = heap.invoke(&action, &[Value::integer(3), Value::integer(4)]).unwrap();

    let mut scope = heap.guard_value(&first);
    let mut scope = scope.guard_value(&second);
    scope.recycle();

    let mut results = Vec::new();
    for block in [&first, &second] {
        for word in scope.values_of(block).unwrap() {
            results.push(scope.get_var(&word).unwrap().as_integer().unwrap());
        }
    }

    assert_eq!(results, [1, 2, 3, 4]);

    let words = scope.values_of(&first).unwrap();
    scope.set_var(&words[0], &Value::integer(10)).unwrap();
    assert_eq!(scope.get_var(&words[0]).unwrap().as_integer().unwrap(), 10);
}

#[test]
fn overflowing_mark_queue_still_marks_everything() {
    let mut config = HeapConfig::small();
    config.mark_queue_limit = 2;

    let mut heap = Heap::new(config);
    let mut chain = heap.make_block(&[]);
    for n in 0..50 {
        let leaf = heap.make_block(&[Value::integer(n)]);
        chain = heap.make_block(&[Value::integer(n), chain, leaf]);
    }
    heap.lib_define("chain", &chain).unwrap();

    for _ in 0..10 {
        heap.make_text("garbage");
    }

    assert_eq!(heap.recycle(), 10);
    assert!(heap.gc_stats().overflow_fallbacks >= 1);

    let mut cursor = heap.lib_get("chain").unwrap();
    let mut depth = 0;
    while heap.length_of(&cursor).unwrap() == 3 {
        cursor = heap.at(&cursor, 1).unwrap();
        depth += 1;
    }
    assert_eq!(depth, 50);
}

#[test]
fn automatic_collection_runs_at_call_boundaries() {
    let mut config = HeapConfig::small();
    config.ballast = 4096;

    let mut heap = Heap::new(config);
    let spec = [ParamSpec::normal("n", integers())];
    let action = heap.register_native("increment", &spec, increment).unwrap();

    for _ in 0..64 {
        heap.make_text("temporary text long enough to need its own data block");
    }
    assert!(heap.gc_pending());

    let out = heap.invoke(&action, &[Value::integer(1)]).unwrap();
    assert_eq!(out.as_integer().unwrap(), 2);
    assert!(!heap.gc_pending());
    assert_eq!(heap.gc_stats().freed_last, 64);
}
