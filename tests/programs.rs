use pith::config::{CompilerLimits, VmConfig};
use pith::vm::gc::GcStats;
use pith::vm::object::Object;
use pith::vm::{RuntimeError, Vm};
use pretty_assertions::assert_eq;

struct Outcome {
    out: String,
    result: Result<Object, RuntimeError>,
    stack_size: usize,
    stack_base: usize,
    live: usize,
    gc: GcStats,
}

fn run_with(source: &str, config: VmConfig, input: &str) -> Outcome {
    let program = pith::compile_source(source, &CompilerLimits::default())
        .unwrap_or_else(|d| panic!("compile failed: {}", d.message));
    let mut out = Vec::new();
    let (result, stack_size, stack_base, live, gc) = {
        let mut vm = Vm::new(&program, config).with_output(&mut out).with_input(input.as_bytes());
        let result = vm.run();
        (result, vm.stack_size(), vm.stack_base(), vm.heap().live(), vm.heap().stats())
    };
    Outcome { out: String::from_utf8(out).expect("utf-8 output"), result, stack_size, stack_base, live, gc }
}

fn run(source: &str) -> Outcome {
    run_with(source, VmConfig::default(), "")
}

/// Output of a program that must succeed.
fn output(source: &str) -> String {
    let outcome = run(source);
    if let Err(e) = &outcome.result {
        panic!("runtime error: {e}");
    }
    outcome.out
}

fn runtime_code(outcome: &Outcome) -> &'static str {
    match &outcome.result {
        Ok(value) => panic!("expected a runtime error, got {value:?}"),
        Err(e) => e.code(),
    }
}

fn compile_code(source: &str) -> &'static str {
    let diagnostic = pith::compile_source(source, &CompilerLimits::default()).unwrap_err();
    diagnostic.code.expect("diagnostic has a code")
}

// --- Expressions ---

#[test]
fn arithmetic_precedence() {
    assert_eq!(output("print(1 + 2 * 3)"), "7\n");
    assert_eq!(output("print((1 + 2) * 3)"), "9\n");
    assert_eq!(output("print(-3 - -4)"), "1\n");
    assert_eq!(output("print(7 / 2) print(-7 / 2)"), "3\n-3\n");
}

#[test]
fn comparisons_and_logic() {
    assert_eq!(output("print(!(1 > 2))"), "true\n");
    assert_eq!(output("print(1 <= 1 && 2 >= 3 || 4 != 5)"), "true\n");
    assert_eq!(output("print(1 == \"1\")"), "false\n");
}

#[test]
fn strings_concatenate_with_numbers() {
    assert_eq!(output("print(\"a\" + 1)"), "a1\n");
    assert_eq!(output("print(1 + \"a\")"), "1a\n");
    assert_eq!(output("print(\"ab\" == \"a\" + \"b\")"), "true\n");
}

#[test]
fn adding_a_bool_is_a_type_error() {
    assert_eq!(runtime_code(&run("x = \"a\" + true")), "PITH-R001");

    // Two frame links for print, then both operands of the failed add.
    let outcome = run("print(1 + true)");
    assert_eq!(runtime_code(&outcome), "PITH-R001");
    assert_eq!(outcome.stack_size, 4);
    assert_eq!(outcome.stack_base, 0);
}

#[test]
fn division_by_zero() {
    let outcome = run("d = 0; print(10 / d)");
    assert_eq!(runtime_code(&outcome), "PITH-R002");
    assert_eq!(outcome.out, "");
    assert_eq!(outcome.stack_size, 5);
}

// --- Variables and control flow ---

#[test]
fn block_variables_are_popped_on_exit() {
    let outcome = run(
        "var a = 1;
         if true { var b = 2; a = a + b }
         print(a)",
    );
    assert_eq!(outcome.out, "3\n");
    assert_eq!(outcome.stack_size, 1);
    assert_eq!(outcome.stack_base, 0);
}

#[test]
fn while_loop_sums() {
    let source = "
        var i = 0;
        var sum = 0;
        while i < 5 { sum = sum + i; i = i + 1 }
        print(sum)
    ";
    let outcome = run(source);
    assert_eq!(outcome.out, "10\n");
    assert_eq!(outcome.stack_size, 2);
}

#[test]
fn else_if_chain() {
    let source = "
        fun sign(n) {
            if n > 0 { return 1 } else if n < 0 { return -1 } else { return 0 }
        }
        print(sign(5)) print(sign(-5)) print(sign(0))
    ";
    assert_eq!(output(source), "1\n-1\n0\n");
}

#[test]
fn top_level_return_halts() {
    let outcome = run("print(1); return 5; print(2)");
    assert_eq!(outcome.out, "1\n");
    assert_eq!(outcome.result.unwrap(), Object::Number(5));
}

// --- Functions ---

#[test]
fn recursion() {
    let source = "
        fun fact(n) {
            if n <= 1 { return 1 }
            return n * fact(n - 1)
        }
        print(fact(10))
        print(fact(5))
        print(fact(0))
    ";
    let outcome = run(source);
    assert_eq!(outcome.out, "3628800\n120\n1\n");
    assert_eq!(outcome.stack_size, 0);
    assert_eq!(outcome.stack_base, 0);
}

#[test]
fn functions_see_top_level_variables() {
    assert_eq!(output("var g = 10; fun f() { return g + 1 } print(f())"), "11\n");
}

#[test]
fn functions_do_not_see_block_variables() {
    assert_eq!(compile_code("if true { var h = 1; fun f() { return h } }"), "PITH-C001");
}

#[test]
fn missing_return_yields_zero() {
    assert_eq!(output("fun f() { x = 1 } print(f())"), "0\n");
}

#[test]
fn unbounded_recursion_overflows_the_stack() {
    let config = VmConfig { stack_capacity: 64, ..VmConfig::default() };
    let outcome = run_with("fun f(n) { return f(n + 1) } f(0)", config, "");
    assert_eq!(runtime_code(&outcome), "PITH-R005");
}

#[test]
fn arity_is_checked_at_run_time() {
    assert_eq!(runtime_code(&run("fun add(a, b) { return a + b } add(1)")), "PITH-R007");
}

#[test]
fn undefined_names_fail_to_compile() {
    assert_eq!(compile_code("prnt(1)"), "PITH-C002");
    assert_eq!(compile_code("print(y)"), "PITH-C001");
}

// --- Classes ---

#[test]
fn methods_update_their_instance() {
    let source = "
        class Counter {
            var count
            fun add(n) { self.count = self.count + n; return self.count }
        }
        c = Counter();
        c.add(2);
        print(c.add(3))
        print(c.count)
        print(c)
    ";
    assert_eq!(output(source), "5\n5\n<Counter instance>\n");
}

#[test]
fn members_start_at_zero() {
    assert_eq!(output("class P { var x } p = P(); print(p.x)"), "0\n");
}

#[test]
fn index_access_reads_members_by_string() {
    assert_eq!(output("class P { var x } p = P(); p[\"x\"] = 4; print(p.x)"), "4\n");
}

#[test]
fn unknown_members() {
    assert_eq!(compile_code("class P { var x } p = P(); print(p.z)"), "PITH-C003");
    assert_eq!(runtime_code(&run("class P { var x } p = P(); print(p[\"y\"])")), "PITH-R006");
}

#[test]
fn classes_take_no_arguments() {
    assert_eq!(runtime_code(&run("class P { var x } p = P(1)")), "PITH-R007");
}

// --- Garbage collection ---

#[test]
fn dead_strings_are_reclaimed() {
    let source = "
        var i = 0;
        var s = \"start\";
        while i < 50 { s = \"x\" + i; i = i + 1 }
        print(s)
    ";
    let config = VmConfig { stack_capacity: 64, heap_capacity: 8, gc_threshold: 4 };
    let outcome = run_with(source, config, "");
    assert_eq!(outcome.out, "x49\n");
    assert!(outcome.gc.collections > 0);
    assert_eq!(outcome.gc.allocated, 50);
    assert!(outcome.live <= 4);
}

#[test]
fn collection_keeps_a_rooted_chain() {
    let source = "
        class Node { var value var next }
        var head = Node();
        var i = 1;
        while i < 20 { var n = Node(); n.value = i; n.next = head; head = n; i = i + 1 }
    ";
    let program = pith::compile_source(source, &CompilerLimits::default())
        .unwrap_or_else(|d| panic!("compile failed: {}", d.message));
    let config = VmConfig { stack_capacity: 64, heap_capacity: 32, gc_threshold: 1 };
    let mut vm = Vm::new(&program, config);
    vm.run().expect("chain builds");
    assert!(vm.heap().stats().collections > 0);
    assert_eq!(vm.heap().live(), 20);

    assert_eq!(vm.collect_garbage(), 0);
    assert_eq!(vm.heap().live(), 20);

    let mut values = Vec::new();
    let mut node = vm.stack()[0].clone();
    while let Some(handle) = node.handle() {
        let (_, members) = vm.heap().instance(handle).expect("node survives collection");
        values.push(members[0].clone());
        node = members[1].clone();
    }
    let expected: Vec<Object> = (0..20).rev().map(Object::Number).collect();
    assert_eq!(values, expected);
}

#[test]
fn reachable_instances_exhaust_the_heap() {
    let source = "
        class Link { var next }
        var head = Link();
        var i = 0;
        while i < 100 { var n = Link(); n.next = head; head = n; i = i + 1 }
    ";
    let config = VmConfig { stack_capacity: 64, heap_capacity: 16, gc_threshold: 8 };
    let outcome = run_with(source, config, "");
    assert_eq!(runtime_code(&outcome), "PITH-R003");
    assert_eq!(outcome.live, 16);
}

// --- Built-ins ---

#[test]
fn input_number_reads_a_line() {
    let outcome = run_with("n = input_number(\"n? \"); print(n * 2)", VmConfig::default(), "21\n");
    assert_eq!(outcome.out, "n? 42\n");
}

#[test]
fn input_string_reads_a_line() {
    let outcome = run_with("name = input_string(\"name: \"); print(\"hi \" + name)", VmConfig::default(), "bob\n");
    assert_eq!(outcome.out, "name: hi bob\n");
}

#[test]
fn input_number_rejects_text() {
    let outcome = run_with("n = input_number(\"n? \")", VmConfig::default(), "ten\n");
    assert_eq!(runtime_code(&outcome), "PITH-R009");
}
