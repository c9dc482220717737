use expect_test::{expect, Expect};

use crate::{parse_function, parse_functions};

fn check(src: &str, expect: Expect) {
    let func = parse_function(src).unwrap();
    let printed = func.to_debug_string();
    expect.assert_eq(&printed);
    // printed text must read back into the same function
    let reparsed = parse_function(&printed).unwrap();
    assert_eq!(reparsed.to_debug_string(), printed);
    assert_eq!(reparsed, func);
}

fn check_err(src: &str, expect: Expect) {
    let err = parse_function(src).unwrap_err();
    expect.assert_eq(&err.to_string());
}

#[test]
fn straight_line() {
    check(
        r#"
        ; a comment
        @optimize(a)
        function %f(a: real, p: obj) -> real {
            let b: real = fmul a, a
            let q: real = load p.alpha   ; trailing comment
            store p.beta, b
            let r: real = call %nn.soft_plus(b, q) [node SoftPlusNode]
            let big: real = fconst 1e16
            let small: real = fconst -2
            return r
        }"#,
        expect![[r#"
            @optimize(a)
            function %f(a: real, p: obj) -> real {
                let b: real = fmul a, a
                let q: real = load p.alpha
                store p.beta, b
                let r: real = call %nn.soft_plus(b, q) [node SoftPlusNode]
                let big: real = fconst 1e16
                let small: real = fconst -2.0
                return r
            }
        "#]],
    );
}

#[test]
fn control_flow() {
    check(
        r#"
        function %g(a: real, n: int) -> real, real {
            let mut s: real = fconst 0.0
            let mut i: int = iconst 0
            while { let c: bool = ilt i, n } -> c {
                let one: int = iconst 1
                i = iadd i, one
                s = fadd s, a
            }
            let z: real = fconst 0.0
            let p: bool = fgt s, z
            let q: bool = flt s, z
            if p { s = copy a } else if q { s = fneg a } else { { let u: real = sin a } }
            do { let d: bool = bconst false } while d
            push values1, s
            push decisions1, -3
            let t: bool = top_is decisions1, -3
            let k: int = pop decisions1
            let v: real = pop values1
            unreachable
            return s, v
        }"#,
        expect![[r#"
            function %g(a: real, n: int) -> real, real {
                let mut s: real = fconst 0.0
                let mut i: int = iconst 0
                while {
                    let c: bool = ilt i, n
                } -> c {
                    let one: int = iconst 1
                    i = iadd i, one
                    s = fadd s, a
                }
                let z: real = fconst 0.0
                let p: bool = fgt s, z
                let q: bool = flt s, z
                if p {
                    s = copy a
                } else if q {
                    s = fneg a
                } else {
                    {
                        let u: real = sin a
                    }
                }
                do {
                    let d: bool = bconst false
                } while d
                push values1, s
                push decisions1, -3
                let t: bool = top_is decisions1, -3
                let k: int = pop decisions1
                let v: real = pop values1
                unreachable
                return s, v
            }
        "#]],
    );
}

#[test]
fn shadowing() {
    let func = parse_function(
        "function %f(a: real) -> real { let x: real = sin a { let x: real = cos x } return x }",
    )
    .unwrap();
    assert_eq!(func.vars.len(), 3);
    assert_eq!(func.validate(), Ok(()));
}

#[test]
fn module() {
    let funcs = parse_functions(
        "function %a() { return } \n ; between \n function %b(x: int) -> int { return x }",
    )
    .unwrap();
    let names: Vec<_> = funcs.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["a", "b"]);
}

#[test]
fn errors() {
    check_err(
        "function %f(a: real) -> real {\n let b: real = fmul a, c\n return b }",
        expect![[r#"2: undefined variable 'c'"#]],
    );
    check_err(
        "function %f(a: real) -> real {\n let c: bool = bconst true\n if c { return a }\n}",
        expect![[r#"4: expected 'else', conditionals require an else branch"#]],
    );
    check_err(
        "function %f(a: real) -> real { let b: real = frob a\n return b }",
        expect![[r#"1: unknown opcode 'frob'"#]],
    );
    check_err(
        "function %f(a: real) -> real { let if: real = copy a }",
        expect![[r#"1: 'if' is a keyword and can not be used as a variable name"#]],
    );
    check_err(
        "function %f(a: real) -> quaternion { return a }",
        expect![[r#"1: unknown type 'quaternion'"#]],
    );
    check_err("function %f(a: real) -> real { return a", expect![[r#"1: expected '}' before end of input"#]]);
    check_err(
        "function %f(a: real) { let x: real = copy a\n let x: real = copy a }",
        expect![[r#"2: variable 'x' is declared twice in the same block"#]],
    );
}
