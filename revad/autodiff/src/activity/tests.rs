use expect_test::{expect, Expect};
use ir::Function;
use ir_reader::parse_function;

use crate::activity::{Activity, BuiltinStacks, StackProbe};
use crate::{select_input, Error, ErrorClass};

fn analyze(func: &Function, input: &str, probe: Option<&dyn StackProbe>) -> Result<Activity, Error> {
    let input = select_input(func, &[input.into()])?;
    Activity::analyze(func, input, probe)
}

fn check(src: &str, input: &str, expect: Expect) {
    let func = parse_function(src).unwrap();
    let activity = analyze(&func, input, None).unwrap();
    expect.assert_eq(&activity.to_debug_string(&func));
}

#[test]
fn straight_line() {
    let src = r#"
        function %f(a: real, b: real, n: int) -> real {
            let x: real = fmul a, b
            let y: real = fmul b, b
            let c: bool = flt x, y
            let k: real = ifcast n
            let z: real = fadd x, y
            return z
        }"#;
    check(src, "a", expect![[r#"a x z"#]]);
    check(src, "b", expect![[r#"b x y z"#]]);
}

#[test]
fn loop_carried() {
    let src = r#"
        function %f(a: real, n: int) -> real {
            let mut s: real = fconst 1.0
            let mut t: real = fconst 1.0
            let mut i: int = iconst 0
            while { let c: bool = ilt i, n } -> c {
                s = fmul s, t
                t = fadd t, a
                let one: int = iconst 1
                i = iadd i, one
            }
            return s
        }"#;
    // `s` only becomes active in the second iteration of the analysis
    check(src, "a", expect![[r#"a s t"#]]);

    let func = parse_function(src).unwrap();
    let first = analyze(&func, "a", None).unwrap();
    let second = analyze(&func, "a", None).unwrap();
    assert_eq!(first, second);
}

#[test]
fn branch_join() {
    check(
        r#"
        function %f(a: real, p: bool) -> real {
            let mut y: real = fconst 2.0
            if p {
                y = sin a
            } else {
                y = fconst 3.0
            }
            let z: real = fmul y, y
            return z
        }"#,
        "a",
        expect![[r#"a y z"#]],
    );
}

#[test]
fn property_seed() {
    check(
        r#"
        function %f(o: obj, a: real) -> real {
            let w: real = load o.w
            let v: real = load o.v
            let r: real = fmul w, a
            let q: real = fadd v, a
            return r
        }"#,
        "o.w",
        expect![[r#"w r"#]],
    );
}

#[test]
fn accumulators_and_calls() {
    check(
        r#"
        function %f(a: real, n: int) -> real {
            let mut __acc_x: real = fconst 0.0
            let mut other: real = fconst 0.0
            let b: real = fconst 0.0
            let r: real = call %nn.soft_plus(a)
            let k: int = call %nn.count(a)
            let m: real = call %nn.table(n)
            return r
        }"#,
        "a",
        expect![[r#"a __acc_x r"#]],
    );
}

#[test]
fn tapes() {
    let func = parse_function(
        r#"
        function %f(a: real, b: real) -> real {
            push values1, a
            push values1, b
            let x: real = pop values1
            let y: real = pop values1
            push decisions1, 0
            let k: int = pop decisions1
            let r: real = fadd x, y
            return r
        }"#,
    )
    .unwrap();

    let err = analyze(&func, "a", None).unwrap_err();
    assert_eq!(err, Error::TapeOutsideProbe { tape: "values1".into() });
    assert_eq!(err.class(), ErrorClass::Structural);

    let activity = analyze(&func, "a", Some(&BuiltinStacks)).unwrap();
    assert_eq!(activity.to_debug_string(&func), "a x y r [values1]");
}

#[test]
fn unsupported() {
    let err = |src: &str, input: &str| {
        let func = parse_function(src).unwrap();
        let err = analyze(&func, input, None).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Unsupported);
        err.to_string()
    };

    let msg = err(
        r#"
        function %f(a: real) -> real {
            let t: tensor = call %nn.broadcast(a)
            return a
        }"#,
        "a",
    );
    assert_eq!(msg, "'t' would carry a non-scalar derivative");

    let msg = err(
        r#"
        function %f(o: obj, a: real) -> real {
            let x: real = fmul a, a
            store o.v, x
            return x
        }"#,
        "a",
    );
    assert_eq!(msg, "active values can not be stored into records (field 'v')");

    let msg = err(
        r#"
        function %f(o: obj, a: real) -> real {
            store o.v, a
            return a
        }"#,
        "o.v",
    );
    assert_eq!(msg, "active values can not be stored into records (field 'v')");
}
