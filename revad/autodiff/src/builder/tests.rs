use expect_test::{expect, Expect};
use ir_reader::parse_function;

use crate::activity::{Activity, BuiltinStacks};
use crate::builder::build_diffir;
use crate::registry::{Registry, Resolver};
use crate::{select_input, Error, ErrorClass};

fn lower(src: &str, registry: &Registry) -> Result<String, Error> {
    let func = parse_function(src).unwrap();
    let input = select_input(&func, &[])?;
    let activity = Activity::analyze(&func, input, None)?;
    let diff = build_diffir(&func, &activity, &mut Resolver::new(registry))?;
    Ok(format!("{}\n", diff.to_debug_string(&func, registry)))
}

fn check(src: &str, expect: Expect) {
    let registry = Registry::new().unwrap();
    expect.assert_eq(&lower(src, &registry).unwrap());
}

fn check_err(src: &str, class: ErrorClass, expect: Expect) {
    let mut registry = Registry::new().unwrap();
    registry
        .add_catalog(
            r#"
            function %nn.soft_plus.d0(upstream: real, x: real, primal: real) -> real {
                return upstream
            }"#,
        )
        .unwrap();
    let err = lower(src, &registry).unwrap_err();
    assert_eq!(err.class(), class);
    expect.assert_eq(&err.to_string());
}

#[test]
fn checkpoints() {
    // values read by a rule are only saved if they may change before the reverse pass
    check(
        r#"
        function %f(a: real, n: int) -> real {
            let two: real = fconst 2.0
            let s: real = fmul a, a
            let e: real = exp s
            let mut y: real = fmul e, two
            let m: int = iconst 3
            y = fdiv y, a
            return y
        }"#,
        expect![[r#"
            block [s, e, y] {
                virtual {
                    const let two: real = fconst 2.0
                }
                call s = fmul a, a [FmulNode; active a a]
                call e = exp s [ExpNode; active s; primal]
                call y = fmul e, two [FmulNode; active e]
                virtual {
                    const let m: int = iconst 3
                }
                call y = fdiv y, a [FdivNode; active y a; saved primal]
                return y
            }
        "#]],
    );
}

#[test]
fn control_flow() {
    check(
        r#"
        function %f(a: real, p: bool, n: int) -> real {
            let mut y: real = fconst 0.0
            if p {
                let s: real = sin a
                y = fadd y, s
            } else {
                let k: int = iconst 1
            }
            let mut i: int = iconst 0
            while {
                let c: bool = ilt i, n
            } -> c {
                y = fmul y, a
                let one: int = iconst 1
                i = iadd i, one
            }
            return y
        }"#,
        expect![[r#"
            block [y] {
                virtual {
                    const let mut y: real = fconst 0.0
                }
                if p #0 block [s] {
                    call s = sin a [SinNode; active a]
                    call y = fadd y, s [FaddNode; active y s]
                } else #1 block {
                    virtual {
                        const let k: int = iconst 1
                    }
                }
                virtual {
                    const let mut i: int = iconst 0
                }
                loop #-1 while c block {
                    call y = fmul y, a [FmulNode; active y a; saved y]
                    virtual {
                        const let one: int = iconst 1
                        const i = iadd i, one
                    }
                }
                return y
            }
        "#]],
    );
}

#[test]
fn loop_ids() {
    check(
        r#"
        function %f(a: real, n: int) -> real {
            let mut y: real = copy a
            let mut i: int = iconst 0
            while { let c: bool = ilt i, n } -> c {
                let mut j: int = iconst 0
                while { let d: bool = ilt j, i } -> d {
                    y = sin y
                    let one: int = iconst 1
                    j = iadd j, one
                }
                let one2: int = iconst 1
                i = iadd i, one2
            }
            while { let e: bool = ilt i, n } -> e {
                y = cos y
            }
            return y
        }"#,
        expect![[r#"
            block [y] {
                assign y = a
                virtual {
                    const let mut i: int = iconst 0
                }
                loop #-1 while c block {
                    virtual {
                        const let mut j: int = iconst 0
                    }
                    loop #-2 while d block {
                        call y = sin y [SinNode; active y; saved y]
                        virtual {
                            const let one: int = iconst 1
                            const j = iadd j, one
                        }
                    }
                    virtual {
                        const let one2: int = iconst 1
                        const i = iadd i, one2
                    }
                }
                loop #-3 while e block {
                    call y = cos y [CosNode; active y; saved y]
                }
                return y
            }
        "#]],
    );
}

#[test]
fn inert_control_flow() {
    check(
        r#"
        function %f(a: real, n: int) -> real {
            let mut i: int = iconst 0
            while { let c: bool = ilt i, n } -> c {
                let one: int = iconst 1
                i = iadd i, one
            }
            let r: real = exp a
            return r
        }"#,
        expect![[r#"
            block [r] {
                virtual {
                    const let mut i: int = iconst 0
                    const while {
                        let c: bool = ilt i, n
                    } -> c {
                        let one: int = iconst 1
                        i = iadd i, one
                    }
                }
                call r = exp a [ExpNode; active a; primal]
                return r
            }
        "#]],
    );
}

#[test]
fn malformed() {
    check_err(
        r#"
        function %f(a: real, p: bool) -> real {
            if p {
                return a
            } else {
            }
            return a
        }"#,
        ErrorClass::Structural,
        expect![[r#"function has more than one return statement, found another 'return a'"#]],
    );
    check_err(
        r#"
        function %f(a: real) -> real {
            let b: real = sin a
        }"#,
        ErrorClass::Structural,
        expect![[r#"function has no return statement"#]],
    );
    check_err(
        r#"
        function %f(a: real) -> real {
            {
                return a
            }
        }"#,
        ErrorClass::Structural,
        expect![[r#"'return a' must be the last statement of the function body and return a single value"#]],
    );
    check_err(
        r#"
        function %f(a: real, n: int) -> int {
            return n
        }"#,
        ErrorClass::Structural,
        expect![[r#"the returned value is not a real"#]],
    );
    check_err(
        r#"
        function %f(a: real) -> real {
            let y: real = sin a
            y = cos a
            return y
        }"#,
        ErrorClass::Structural,
        expect![[r#"assignment to immutable variable 'y'"#]],
    );
}

#[test]
fn unsupported() {
    check_err(
        r#"
        function %f(a: real) -> real {
            let mut y: real = copy a
            do {
                y = sin y
                let c: bool = bconst false
            } while c
            return y
        }"#,
        ErrorClass::Unsupported,
        expect![[r#"do-while loops can not be differentiated"#]],
    );
    // rejected even if it does not touch active values
    check_err(
        r#"
        function %f(a: real, n: int) -> real {
            let mut i: int = iconst 0
            do {
                let one: int = iconst 1
                i = iadd i, one
                let c: bool = ilt i, n
            } while c
            return a
        }"#,
        ErrorClass::Unsupported,
        expect![[r#"do-while loops can not be differentiated"#]],
    );
    check_err(
        r#"
        function %f(a: real) -> real {
            let mut y: real = copy a
            while {
                let t: real = sin y
                let c: bool = flt t, a
            } -> c {
                y = cos t
            }
            return y
        }"#,
        ErrorClass::Unsupported,
        expect![[r#"'t' is computed from active values by a loop condition and read outside of it"#]],
    );
    check_err(
        r#"
        function %f(a: real) -> real {
            let mut d: real = fconst 0.0
            let mut x: real = copy a
            while {
                d = fmul x, x
                let c: bool = flt d, a
            } -> c {
                x = fadd x, a
            }
            return d
        }"#,
        ErrorClass::Unsupported,
        expect![[r#"'d' is computed from active values by a loop condition and read outside of it"#]],
    );
}

#[test]
fn active_loop_condition() {
    // the header is replayed as is and gets no adjoints
    check(
        r#"
        function %f(a: real) -> real {
            let lim: real = fconst 1.0
            let half: real = fconst 0.5
            let mut x: real = copy a
            while {
                let d: real = fmul x, x
                let c: bool = fgt d, lim
            } -> c {
                x = fmul x, half
            }
            return x
        }"#,
        expect![[r#"
            block [x] {
                virtual {
                    const let lim: real = fconst 1.0
                    const let half: real = fconst 0.5
                }
                assign x = a
                loop #-1 while c block {
                    call x = fmul x, half [FmulNode; active x]
                }
                return x
            }
        "#]],
    );
}

#[test]
fn unresolved() {
    check_err(
        r#"
        function %f(a: real) -> real {
            let r: real = call %nn.relu(a)
            return r
        }"#,
        ErrorClass::Resolution,
        expect![[r#"no derivative rule exists for active call %nn.relu"#]],
    );
    check_err(
        r#"
        function %f(a: real) -> real {
            let r: real = call %nn.soft_plus(a, a)
            return r
        }"#,
        ErrorClass::Resolution,
        expect![[r#"SoftPlusNode expects 1 inputs but the call passes 2"#]],
    );
    check_err(
        r#"
        function %f(a: real) -> real {
            let r: real = call %nn.scaled(a) [node ScaleNode]
            return r
        }"#,
        ErrorClass::Resolution,
        expect![[r#"unknown dependency node ScaleNode"#]],
    );
}

#[test]
fn tape_writes() {
    let func = parse_function(
        r#"
        function %f(a: real, b: real) -> real {
            push values1, a
            push values1, b
            let x: real = pop values1
            let y: real = pop values1
            let r: real = fadd x, y
            return r
        }"#,
    )
    .unwrap();
    let registry = Registry::new().unwrap();
    let input = select_input(&func, &["a".into()]).unwrap();
    let activity = Activity::analyze(&func, input, Some(&BuiltinStacks)).unwrap();
    let diff = build_diffir(&func, &activity, &mut Resolver::new(&registry)).unwrap();
    expect![[r#"
        block [x, y, r] {
            write values1, a
            write values1, b [inert]
            assign x = pop values1
            assign y = pop values1
            call r = fadd x, y [FaddNode; active x y]
            return r
        }"#]]
    .assert_eq(&diff.to_debug_string(&func, &registry));
}
