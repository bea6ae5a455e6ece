/// An entry in the error code registry.
pub struct ErrorEntry {
    pub code: &'static str,
    /// One-line description.
    pub short: &'static str,
    /// Full explanation printed by `--explain`.
    pub long: &'static str,
}

/// Every stable error code pith reports.
pub static REGISTRY: &[ErrorEntry] = &[
    // ── Lexer ────────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "PITH-L001",
        short: "unexpected character",
        long: r#"## PITH-L001: unexpected character

The source contains a character that does not start any token.

**Example:**

    x = 1 $ 2

Operators are `+ - * / ! == != > >= < <= && || =`. Strings use double
quotes and comments start with `#`.
"#,
    },
    // ── Parser ───────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "PITH-P001",
        short: "expected a specific token",
        long: r#"## PITH-P001: expected a specific token

The parser needed one particular token, usually a closing bracket or
brace, and found something else.

**Example:**

    if (x > 1 { print(x) }

**Fix:** close the condition with `)` before the block.
"#,
    },
    ErrorEntry {
        code: "PITH-P002",
        short: "expected an identifier",
        long: r#"## PITH-P002: expected an identifier

A declaration or member access needs a name here.

**Example:**

    var = 3;
    fun (a) { return a }
    p.1

Names start with a letter or `_` and continue with letters, digits or `_`.
"#,
    },
    ErrorEntry {
        code: "PITH-P003",
        short: "unexpected end of input",
        long: r#"## PITH-P003: unexpected end of input

The file ended in the middle of a statement or expression.

**Example:**

    fun f(a) { return a

**Fix:** finish the construct, here with a closing `}`.
"#,
    },
    ErrorEntry {
        code: "PITH-P004",
        short: "invalid class body",
        long: r#"## PITH-P004: invalid class body

A class body may only contain member declarations (`var name`) and
method definitions (`fun name(params) { ... }`). Members have no
initializer; every member of a new instance starts as `0`.

**Example:**

    class Point { var x = 1 }

**Fix:**

    class Point { var x }
"#,
    },
    ErrorEntry {
        code: "PITH-P005",
        short: "invalid assignment target",
        long: r#"## PITH-P005: invalid assignment target

Only a name, a member (`a.b`) or an index (`a[b]`) can appear on the
left of `=`.

**Example:**

    1 + x = 4
    f() = 2
"#,
    },
    ErrorEntry {
        code: "PITH-P006",
        short: "expected an expression",
        long: r#"## PITH-P006: expected an expression

An operand was missing where a value was required.

**Example:**

    x = 3 * ;

The `*` has nothing on its right.
"#,
    },
    // ── Compiler ─────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "PITH-C001",
        short: "undefined variable",
        long: r#"## PITH-C001: undefined variable

A name was read before any variable, function, class or built-in with
that name was visible.

Inside a function body only the function's own parameters and locals
and the variables declared at the top level of the program (outside any
block) are visible.

**Example:**

    fun f() { return y }
    var y = 1;

**Fix:** declare `y` before `f`.
"#,
    },
    ErrorEntry {
        code: "PITH-C002",
        short: "undefined function",
        long: r#"## PITH-C002: undefined function

The callee of a call is a bare name that resolves to nothing.

**Example:**

    prnt("hi")

Built-ins are `print`, `input_number` and `input_string`.
"#,
    },
    ErrorEntry {
        code: "PITH-C003",
        short: "no class has this member",
        long: r#"## PITH-C003: no class has this member

`a.name` is checked against every class in the program: at least one of
them must declare a member or method called `name`. Which class `a`
belongs to is only known at run time, where a miss is PITH-R006.

**Example:**

    class Point { var x }
    p = Point();
    print(p.z)
"#,
    },
    ErrorEntry {
        code: "PITH-C004",
        short: "compiler limit exceeded",
        long: r#"## PITH-C004: compiler limit exceeded

The program needs more instruction bytes, constant-pool bytes or live
variables than the compiler allows.

**Fix:** raise the matching field of the `compiler` section in the
file passed with `--config`:

    { "compiler": { "max_code_bytes": 262144 } }
"#,
    },
    ErrorEntry {
        code: "PITH-C005",
        short: "malformed syntax tree",
        long: r#"## PITH-C005: malformed syntax tree

The compiler received a node that is missing a required child. Trees
produced by the parser never do this, so it indicates a bug in code that
builds trees directly.

If you see this from the command line, please file a bug report.
"#,
    },
    // ── Runtime ──────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "PITH-R001",
        short: "type error",
        long: r#"## PITH-R001: type error

An operation was applied to a value whose type has no handler for it.

- `+` works on numbers, and on strings with a string or number.
- `- * / < <= > >=` need two numbers.
- `! && ||` and conditions need bools.
- Only functions, bound methods and classes can be called.
- Only instances have fields.

**Example:**

    x = 1 + true
"#,
    },
    ErrorEntry {
        code: "PITH-R002",
        short: "division by zero",
        long: r#"## PITH-R002: division by zero

The right operand of `/` was zero. Division otherwise truncates toward
zero.

**Example:**

    d = 0;
    print(10 / d)
"#,
    },
    ErrorEntry {
        code: "PITH-R003",
        short: "out of memory",
        long: r#"## PITH-R003: out of memory

An allocation found the heap at its capacity even after a collection.
Every live string and instance counts toward the limit.

**Fix:** drop references you no longer need, or raise the capacity with
`--heap-capacity` or the `vm.heap_capacity` config field.
"#,
    },
    ErrorEntry {
        code: "PITH-R004",
        short: "out-of-bounds access",
        long: r#"## PITH-R004: out-of-bounds access

An instruction read a stack slot, operand, jump target or heap handle
outside its valid range. Compiled programs only trigger this when the
program bytes were damaged or hand-edited.
"#,
    },
    ErrorEntry {
        code: "PITH-R005",
        short: "stack overflow",
        long: r#"## PITH-R005: stack overflow

The value stack reached its capacity, usually through unbounded
recursion.

**Example:**

    fun f(n) { return f(n + 1) }
    f(0)

**Fix:** add a base case, or raise `--stack-capacity`.
"#,
    },
    ErrorEntry {
        code: "PITH-R006",
        short: "unknown field",
        long: r#"## PITH-R006: unknown field

The instance's class has no member or method with that name. Index
access (`p["x"]`) is only checked at run time.

**Example:**

    class Point { var x }
    p = Point();
    print(p["y"])
"#,
    },
    ErrorEntry {
        code: "PITH-R007",
        short: "wrong number of arguments",
        long: r#"## PITH-R007: wrong number of arguments

A function or method was called with a different number of arguments
than it declares. Classes are constructed with no arguments.

**Example:**

    fun add(a, b) { return a + b }
    add(1)
"#,
    },
    ErrorEntry {
        code: "PITH-R008",
        short: "invalid program",
        long: r#"## PITH-R008: invalid program

The VM met an unknown opcode, a bad constant, an unknown built-in index
or a corrupted call frame. Programs produced by the compiler never do
this; it indicates damaged bytecode.
"#,
    },
    ErrorEntry {
        code: "PITH-R009",
        short: "input or output failed",
        long: r#"## PITH-R009: input or output failed

A built-in could not read or write, or `input_number` read a line that
is not an integer.

**Example:**

    n = input_number("age? ")

entered as `ten`.
"#,
    },
];

/// Looks up an entry by code. Accepts the bare form (`c001`) as well as `PITH-C001`.
pub fn lookup(code: &str) -> Option<&'static ErrorEntry> {
    let code = code.trim().to_ascii_uppercase();
    let code = code.strip_prefix("PITH-").unwrap_or(&code);
    REGISTRY.iter().find(|e| e.code.strip_prefix("PITH-") == Some(code))
}
