//! Language-level guarantees checked end to end through `run_source`.

use indoc::indoc;

use pyrun::compiler::{CompileError, CompileOptions};
use pyrun::vm::ExceptionReport;
use pyrun::{RunOptions, SourceError, compile_source, run_source};

fn output(source: &str) -> String {
    let execution = run_source(source, RunOptions::default()).expect("compiles");
    if let Err(report) = &execution.result {
        panic!("uncaught exception:\n{report}");
    }
    execution.stdout
}

fn failure(source: &str) -> ExceptionReport {
    run_source(source, RunOptions::default())
        .expect("compiles")
        .result
        .expect_err("program raises")
}

#[test]
fn assigned_names_are_local_for_the_whole_function() {
    let source = indoc! {"
        x = 'global'
        def f():
            print(x)
            x = 'local'
        f()
    "};
    let report = failure(source);
    assert_eq!(report.type_name, "UnboundLocalError");
    assert!(report.message.contains("'x'"));

    let nested = indoc! {"
        def outer():
            x = 'enclosing'
            def inner():
                y = x
                x = 'inner'
                return y
            return inner()
        outer()
    "};
    assert_eq!(failure(nested).type_name, "UnboundLocalError");
}

#[test]
fn closures_observe_later_rebinding() {
    let source = indoc! {"
        def outer():
            value = 1
            def read():
                return value
            seen = [read()]
            value = 2
            seen.append(read())
            def write():
                nonlocal value
                value = 3
            write()
            seen.append(read())
            seen.append(value)
            return seen
        print(outer())
    "};
    assert_eq!(output(source), "[1, 2, 3, 3]\n");
}

#[test]
fn finally_runs_exactly_once_on_every_exit_path() {
    let source = indoc! {"
        counts = {}
        def cleanup(path):
            counts[path] = counts.get(path, 0) + 1

        def normal():
            try:
                pass
            finally:
                cleanup('normal')

        def early_return():
            try:
                return 1
            finally:
                cleanup('return')

        def breaks():
            for _ in range(5):
                try:
                    break
                finally:
                    cleanup('break')

        def raises():
            try:
                raise ValueError
            finally:
                cleanup('raise')

        normal()
        early_return()
        breaks()
        try:
            raises()
        except ValueError:
            pass
        print(sorted(counts.items()))
    "};
    assert_eq!(
        output(source),
        "[('break', 1), ('normal', 1), ('raise', 1), ('return', 1)]\n"
    );
}

#[test]
fn parameters_bind_defaults_varargs_and_keywords() {
    let source = indoc! {"
        def f(a, b=2, *args, **kw):
            return (a, b, args, kw)
        print(f(1, 3, 4, x=5))
        print(f(1))
    "};
    assert_eq!(output(source), "(1, 3, (4,), {'x': 5})\n(1, 2, (), {})\n");
}

#[test]
fn binding_errors_happen_before_the_body_runs() {
    let source = indoc! {"
        def f(a, *, key):
            print('body ran')
        f(1, 2)
    "};
    let execution = run_source(source, RunOptions::default()).expect("compiles");
    assert_eq!(execution.stdout, "");
    let report = execution.result.expect_err("raises");
    assert_eq!(report.type_name, "TypeError");
    assert!(report.message.contains("positional argument"));
}

#[test]
fn comprehension_variables_do_not_leak() {
    let source = indoc! {"
        x = 1
        y = [x for x in range(3)]
        assert x == 1
        g = list(x * 2 for x in 'ab')
        assert x == 1
        print(x, y, g)
    "};
    assert_eq!(output(source), "1 [0, 1, 2] ['aa', 'bb']\n");
}

#[test]
fn match_tries_cases_in_source_order() {
    let source = indoc! {"
        def pick(value):
            match value:
                case 0:
                    return 'zero'
                case _:
                    return 'other'
        print(pick(0), pick(0.0), pick(False), pick(1))
    "};
    assert_eq!(output(source), "zero zero zero other\n");
}

#[test]
fn failed_guards_do_not_commit_captures() {
    let source = indoc! {"
        captured = 'untouched'
        match [1, 2]:
            case [captured, 2] if False:
                pass
            case [_, _]:
                pass
        print(captured)
    "};
    assert_eq!(output(source), "untouched\n");
}

#[test]
fn attribute_lookup_follows_the_mro() {
    let source = indoc! {"
        class A:
            def who(self):
                return 'A'
        class AParent:
            def inherited(self):
                return 'AParent'
        class A2(AParent):
            pass
        class B:
            def who(self):
                return 'B'
            def inherited(self):
                return 'B'
            def only_b(self):
                return 'B'
        class C(A, B):
            pass
        class D(A2, B):
            pass
        print(C().who(), C().only_b(), D().inherited())
        print([cls.__name__ for cls in D.__mro__])
    "};
    assert_eq!(
        output(source),
        "A B AParent\n['D', 'A2', 'AParent', 'B', 'object']\n"
    );
}

#[test]
fn inconsistent_hierarchies_are_type_errors() {
    let source = indoc! {"
        class A: pass
        class B(A): pass
        class C(A, B): pass
    "};
    let report = failure(source);
    assert_eq!(report.type_name, "TypeError");
    assert!(report.message.contains("method resolution order"));
}

#[test]
fn global_and_parameter_conflict_is_a_compile_error() {
    let error = compile_source("def f(x):\n    global x\n", CompileOptions::default())
        .expect_err("rejected");
    assert!(matches!(
        error,
        SourceError::Compile(CompileError::BindingConflict { ref name, .. }) if name == "x"
    ));
}

#[test]
fn compile_errors_prevent_any_execution() {
    let source = indoc! {"
        print('side effect')
        def f():
            return 1
        continue
    "};
    let error = run_source(source, RunOptions::default()).expect_err("rejected");
    assert!(error.to_string().contains("'continue' not properly in loop"));
}

#[test]
fn context_managers_exit_once_on_every_path() {
    let source = indoc! {"
        exits = []
        class Manager:
            def __init__(self, tag):
                self.tag = tag
            def __enter__(self):
                return self
            def __exit__(self, kind, value, tb):
                exits.append((self.tag, kind is not None))
                return False

        def returns():
            with Manager('return'):
                return 1

        for tag in ['break', 'continue']:
            for _ in range(1):
                with Manager(tag):
                    if tag == 'break':
                        break
                    continue
        returns()
        try:
            with Manager('raise'):
                raise KeyError
        except KeyError:
            pass
        print(exits)
    "};
    assert_eq!(
        output(source),
        "[('break', False), ('continue', False), ('return', False), ('raise', True)]\n"
    );
}

#[test]
fn generator_close_runs_finally() {
    let source = indoc! {"
        def gen():
            try:
                yield 1
            finally:
                print('closed')
        g = gen()
        next(g)
        g.close()
        g.close()
        print(list(g))
    "};
    assert_eq!(output(source), "closed\n[]\n");
}

#[test]
fn except_star_reraises_the_unmatched_remainder() {
    let source = indoc! {"
        original = ExceptionGroup('eg', [KeyError('k')])
        try:
            try:
                raise original
            except* ValueError:
                pass
        except ExceptionGroup as error:
            print(error is original)
    "};
    assert_eq!(output(source), "True\n");
}

#[test]
fn resizing_a_table_during_iteration_raises() {
    let source = indoc! {"
        d = {1: 1}
        try:
            for key in d:
                d[key + 1] = 1
        except RuntimeError as error:
            print(error, len(d))
        s = {1}
        try:
            for item in s:
                s.add(item + 1)
        except RuntimeError as error:
            print(error)
        d = {'a': 1, 'b': 2}
        for key in d:
            d[key] = 0
        print(d)
        keys = iter({'x': 1, 'y': 2})
        print(next(keys), next(keys), next(keys, 'done'))
    "};
    assert_eq!(
        output(source),
        concat!(
            "dictionary changed size during iteration 2\n",
            "Set changed size during iteration\n",
            "{'a': 0, 'b': 0}\n",
            "x y done\n",
        )
    );
}

#[test]
fn integers_are_64_bit() {
    let report = failure("print(9223372036854775807 + 1)\n");
    assert_eq!(report.type_name, "OverflowError");
}

#[test]
fn optimized_asserts_are_not_emitted() {
    let options = RunOptions {
        compile: CompileOptions {
            optimize_asserts: true,
        },
        ..RunOptions::default()
    };
    let execution = run_source("assert False, 'never'\nprint('ran')\n", options).expect("compiles");
    assert!(execution.succeeded());
    assert_eq!(execution.stdout, "ran\n");
}
