use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use super::*;
use crate::capability::{Catalog, CapabilityBindings};
use crate::env::build_environment;

fn empty_env() -> Environment {
    build_environment(CapabilityBindings::new())
}

fn catalog_env() -> Environment {
    let mut catalog = Catalog::new();
    catalog
        .add_json_str(
            "cities",
            r#"[{"name": "Oslo", "pop": 700}, {"name": "Bergen", "pop": 285}]"#,
        )
        .unwrap();
    let bindings = CapabilityBindings::new()
        .with("pl", Arc::new(catalog))
        .unwrap();
    build_environment(bindings)
}

fn eval_in(env: &Environment, source: &str) -> Result<Evaluation, EvalError> {
    let program = parse(source).unwrap();
    evaluate(&program, env, Meter::unlimited())
}

fn run(source: &str) -> Evaluation {
    eval_in(&empty_env(), source).unwrap()
}

fn result_of(source: &str) -> Value {
    run(source).output.expect("script did not bind result")
}

fn runtime_error(source: &str) -> RuntimeError {
    match eval_in(&empty_env(), source) {
        Err(EvalError::Runtime(e)) => e,
        other => panic!("expected runtime error, got {:?}", other),
    }
}

fn ints(values: &[i64]) -> Value {
    Value::List(values.iter().map(|i| Value::Int(*i)).collect())
}

fn s(text: &str) -> Value {
    Value::Str(text.to_string())
}

#[test]
fn test_empty_program_binds_nothing() {
    let evaluation = run("");
    assert_eq!(evaluation.output, None);
    assert!(evaluation.bindings.is_empty());
    assert!(evaluation.printed.is_empty());
}

#[test]
fn test_arithmetic_follows_floor_semantics() {
    assert_eq!(
        result_of("result = [7 // 2, -7 // 2, 7 % -3, -7 % 3, 2 ** 10]"),
        ints(&[3, -4, -2, 2, 1024])
    );
    assert_eq!(result_of("result = 7 / 2"), Value::Float(3.5));
    assert_eq!(result_of("result = 1 + 2 * 3 - 4"), Value::Int(3));
}

#[test]
fn test_integer_overflow_raises() {
    let err = runtime_error("x = 9223372036854775807\ny = x + 1");
    assert_eq!(err.kind, ErrorKind::Overflow);
    assert_eq!(err.line, 2);
}

#[test]
fn test_zero_division_is_catchable() {
    let source = "
try:
    x = 1 / 0
except ZeroDivisionError as e:
    result = str(e)
";
    assert_eq!(result_of(source), s("division by zero"));
    assert!(!run(source).bindings.contains_key("e"));
}

#[test]
fn test_uncaught_error_carries_kind_and_line() {
    let err = runtime_error("a = 1\nb = [1, 2]\nc = b[5]");
    assert_eq!(err.kind, ErrorKind::Index);
    assert_eq!(err.line, 3);
    assert_eq!(err.message, "list index out of range");
}

#[test]
fn test_name_error_for_unknown_and_denied_names() {
    for name in ["open", "eval", "getattr", "globals", "result"] {
        let err = runtime_error(&format!("x = {}", name));
        assert_eq!(err.kind, ErrorKind::Name, "{}", name);
        assert_eq!(err.message, format!("name '{}' is not defined", name));
    }
}

#[test]
fn test_control_flow() {
    let source = "
total = 0
for i in range(10):
    if i % 2 == 0:
        continue
    if i > 7:
        break
    total += i
else:
    total = -1
n = 0
while n < 3:
    n += 1
else:
    n *= 10
result = (total, n)
";
    assert_eq!(
        result_of(source),
        Value::Tuple(vec![Value::Int(16), Value::Int(30)])
    );
}

#[test]
fn test_tuple_unpacking_and_chained_assignment() {
    let evaluation = run("a, (b, c) = 1, [2, 3]\nx = y = 'same'\nresult = a + b + c");
    assert_eq!(evaluation.output, Some(Value::Int(6)));
    assert_eq!(evaluation.bindings.get("x"), Some(&s("same")));
    assert_eq!(evaluation.bindings.get("y"), Some(&s("same")));

    let err = runtime_error("a, b = [1, 2, 3]");
    assert_eq!(err.kind, ErrorKind::Value);
    assert_eq!(err.message, "too many values to unpack (expected 2)");
}

#[test]
fn test_comprehensions_do_not_leak_targets() {
    let source = "
squares = [x * x for x in range(5) if x != 2]
pairs = {k: v for k, v in zip(['a', 'b'], [1, 2])}
result = (squares, pairs)
";
    let evaluation = run(source);
    assert_eq!(
        evaluation.output,
        Some(Value::Tuple(vec![
            ints(&[0, 1, 9, 16]),
            Value::Dict(vec![(s("a"), Value::Int(1)), (s("b"), Value::Int(2))]),
        ]))
    );
    assert!(!evaluation.bindings.contains_key("x"));
    assert!(!evaluation.bindings.contains_key("k"));
}

#[test]
fn test_generator_argument_is_eager() {
    assert_eq!(
        result_of("result = sum(x for x in range(101))"),
        Value::Int(5050)
    );
}

#[test]
fn test_string_methods() {
    let source = "
words = '  Hello, World  '.strip().lower().split(', ')
result = '-'.join(words).upper().replace('O', '0')
";
    assert_eq!(result_of(source), s("HELL0-W0RLD"));
    assert_eq!(
        result_of("result = 'a b  c'.split()"),
        Value::List(vec![s("a"), s("b"), s("c")])
    );
    assert_eq!(result_of("result = 'abcabc'.find('c')"), Value::Int(2));
    assert_eq!(result_of("result = 'abcabc'.rfind('z')"), Value::Int(-1));
    assert_eq!(result_of("result = '7'.zfill(3)"), s("007"));
}

#[test]
fn test_formatting() {
    assert_eq!(
        result_of("name = 'pi'\nresult = f'{name}={3.14159:.2f}'"),
        s("pi=3.14")
    );
    assert_eq!(
        result_of("result = '{} and {x}'.format(1, x='two')"),
        s("1 and two")
    );
    assert_eq!(result_of("result = '%s has %d' % ('list', 3)"), s("list has 3"));
}

#[test]
fn test_list_and_dict_methods() {
    let source = "
items = [3, 1, 2]
items.append(5)
items.sort(reverse=True)
last = items.pop()
counts = {}
for w in ['a', 'b', 'a']:
    counts[w] = counts.get(w, 0) + 1
result = (items, last, counts, sorted(counts.keys()))
";
    assert_eq!(
        result_of(source),
        Value::Tuple(vec![
            ints(&[5, 3, 2]),
            Value::Int(1),
            Value::Dict(vec![(s("a"), Value::Int(2)), (s("b"), Value::Int(1))]),
            Value::List(vec![s("a"), s("b")]),
        ])
    );
}

#[test]
fn test_list_aliasing_is_preserved() {
    assert_eq!(
        result_of("a = [1]\nb = a\nb += [2]\nresult = a"),
        ints(&[1, 2])
    );
}

#[test]
fn test_sorted_with_key_is_stable() {
    assert_eq!(
        result_of("result = sorted([3, 1, 2], reverse=True)"),
        ints(&[3, 2, 1])
    );
    assert_eq!(
        result_of("result = sorted(['bb', 'a', 'cc', 'd'], key=len)"),
        Value::List(vec![s("a"), s("d"), s("bb"), s("cc")])
    );
    assert_eq!(
        result_of("result = sorted(['bb', 'a', 'cc', 'd'], key=len, reverse=True)"),
        Value::List(vec![s("bb"), s("cc"), s("a"), s("d")])
    );

    let err = runtime_error("x = sorted([1, 'a'])");
    assert_eq!(err.kind, ErrorKind::Type);
}

#[test]
fn test_builtins() {
    assert_eq!(result_of("result = int('0x1f', 16)"), Value::Int(31));
    assert_eq!(result_of("result = int(' 1_000 ')"), Value::Int(1000));
    assert_eq!(result_of("result = round(2.5)"), Value::Int(2));
    assert_eq!(result_of("result = round(1234, -2)"), Value::Int(1200));
    assert_eq!(result_of("result = pow(3, 4, 5)"), Value::Int(1));
    assert_eq!(result_of("result = max([4, 9, 2])"), Value::Int(9));
    assert_eq!(result_of("result = min([], default=0)"), Value::Int(0));
    assert_eq!(
        result_of("result = list(enumerate('ab', 1))"),
        Value::List(vec![
            Value::Tuple(vec![Value::Int(1), s("a")]),
            Value::Tuple(vec![Value::Int(2), s("b")]),
        ])
    );
    assert_eq!(result_of("result = hex(255)"), s("0xff"));

    let err = runtime_error("x = int('abc')");
    assert_eq!(err.kind, ErrorKind::Value);
    assert_eq!(err.message, "invalid literal for int() with base 10: 'abc'");
}

#[test]
fn test_print_is_captured() {
    let evaluation = run("print('a', 1, sep='-')\nprint('done', end='')");
    assert_eq!(evaluation.printed, "a-1\ndone");
}

#[test]
fn test_raise_and_reraise() {
    let err = runtime_error("raise ValueError('bad input')");
    assert_eq!(err.kind, ErrorKind::Value);
    assert_eq!(err.message, "bad input");

    let source = "
log = []
try:
    try:
        raise KeyError('k')
    except KeyError:
        log.append('inner')
        raise
except LookupError:
    log.append('outer')
finally:
    log.append('finally')
result = log
";
    assert_eq!(
        result_of(source),
        Value::List(vec![s("inner"), s("outer"), s("finally")])
    );
}

#[test]
fn test_assert_failure() {
    let err = runtime_error("assert 1 == 2, 'math broke'");
    assert_eq!(err.kind, ErrorKind::Assertion);
    assert_eq!(err.message, "math broke");
}

#[test]
fn test_definitions_are_unsupported_at_runtime() {
    let err = runtime_error("def f():\n    pass");
    assert_eq!(err.kind, ErrorKind::Unsupported);
    assert_eq!(err.message, "FunctionDef is not supported in sandboxed code");
}

#[test]
fn test_bindings_skip_callables_and_capabilities() {
    let evaluation = eval_in(
        &catalog_env(),
        "import polars as pl2\nf = len\nn = 3\nresult = n",
    )
    .unwrap();
    assert_eq!(evaluation.output, Some(Value::Int(3)));
    assert_eq!(evaluation.bindings.len(), 1);
    assert_eq!(evaluation.bindings.get("n"), Some(&Value::Int(3)));
}

#[test]
fn test_capability_calls() {
    let source = "
names = pl.column('cities', 'name')
result = (names, pl.sum('cities', 'pop'), pl.count('cities'))
";
    let evaluation = eval_in(&catalog_env(), source).unwrap();
    assert_eq!(
        evaluation.output,
        Some(Value::Tuple(vec![
            Value::List(vec![s("Oslo"), s("Bergen")]),
            Value::Float(985.0),
            Value::Int(2),
        ]))
    );
}

#[test]
fn test_capability_errors_are_categorised() {
    match eval_in(&catalog_env(), "x = pl.column('nope', 'name')") {
        Err(EvalError::Runtime(e)) => assert_eq!(e.kind, ErrorKind::Key),
        other => panic!("unexpected {:?}", other),
    }
    match eval_in(&catalog_env(), "x = pl.launch()") {
        Err(EvalError::Runtime(e)) => assert_eq!(e.kind, ErrorKind::Attribute),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_imports_resolve_only_bound_capabilities() {
    let evaluation = eval_in(&catalog_env(), "import polars as p\nresult = p.tables()").unwrap();
    assert_eq!(evaluation.output, Some(Value::List(vec![s("cities")])));

    match eval_in(&catalog_env(), "import pandas as pd") {
        Err(EvalError::Runtime(e)) => {
            assert_eq!(e.kind, ErrorKind::Import);
            assert_eq!(e.message, "No module named 'pandas'");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_dunder_attribute_is_rejected_at_runtime() {
    let err = runtime_error("x = (1).__class__");
    assert_eq!(err.kind, ErrorKind::Attribute);
}

#[test]
fn test_cancel_flag_cannot_be_caught() {
    let flag = Arc::new(AtomicBool::new(true));
    let program = parse("try:\n    while True:\n        pass\nexcept Exception:\n    result = 1").unwrap();
    let meter = Meter::unlimited().with_cancel(flag);
    assert_eq!(
        evaluate(&program, &empty_env(), meter),
        Err(EvalError::Halt(Halt::Deadline))
    );
}

#[test]
fn test_large_repetition_hits_memory_ceiling() {
    let program = parse("x = [0] * 100000000").unwrap();
    let result = evaluate(&program, &empty_env(), Meter::new(16, 10));
    assert_eq!(result, Err(EvalError::Halt(Halt::Memory { limit_mb: 16 })));
}

#[test]
fn test_unexportable_result_is_a_runtime_failure() {
    let err = runtime_error("result = len");
    assert_eq!(err.kind, ErrorKind::Type);
}

#[test]
fn test_self_referencing_list_is_not_exportable() {
    let err = runtime_error("a = []\na.append(a)\nresult = a");
    assert_eq!(err.kind, ErrorKind::Value);
}

#[test]
fn test_syntax_error_reports_line() {
    let err = parse("x = 1\ny = (2\n").unwrap_err();
    assert!(err.line >= 2, "{:?}", err);
}
