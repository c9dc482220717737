use expect_test::expect;
use ir_reader::parse_function;

use crate::{pullback, select_input, ActiveInput, Context, Error, ErrorClass, Registry};

#[test]
fn input_selection() {
    let func = parse_function(
        r#"
        function %f(a: real, b: real, o: obj, n: int) -> real {
            return a
        }"#,
    )
    .unwrap();
    let (a, o) = (func.params[0], func.params[2]);

    assert_eq!(select_input(&func, &["a".into()]), Ok(ActiveInput::Param(a)));
    assert_eq!(
        select_input(&func, &["o.w".into()]),
        Ok(ActiveInput::Property { obj: o, field: "w".into() })
    );

    let msg = |args: &[&str]| {
        let args: Vec<_> = args.iter().map(|arg| (*arg).into()).collect();
        select_input(&func, &args).unwrap_err().to_string()
    };
    expect![[r#"only one active input is supported but found `a` and `b`"#]].assert_eq(&msg(&[]));
    expect![[r#"only one active input is supported but found `a` and `b`"#]]
        .assert_eq(&msg(&["a", "b"]));
    expect![[r#"'n' has type int, only real inputs can be differentiated"#]].assert_eq(&msg(&["n"]));
    expect![[r#"'x' does not name a parameter or property"#]].assert_eq(&msg(&["x"]));
    expect![[r#"'a.w' does not name a parameter or property"#]].assert_eq(&msg(&["a.w"]));

    let func = parse_function("function %g(n: int) -> int { return n }").unwrap();
    let err = select_input(&func, &[]).unwrap_err();
    assert_eq!(err, Error::NoActiveInput);
    assert_eq!(err.class(), ErrorClass::Structural);
}

#[test]
fn derivative_ids() {
    let func = parse_function(
        r#"
        function %f(a: real) -> real {
            push values3, a
            let b: real = pop values3
            return b
        }"#,
    )
    .unwrap();
    let mut ctx = Context::default();
    let first = ctx.fresh_id(&func);
    assert_eq!(first.level(), 4);
    let second = ctx.fresh_id(&func);
    assert!(second.is_nested_in(first));
    assert_eq!(second.values().to_string(), "values5");
}

#[test]
fn invalid_input() {
    let mut func = parse_function(
        r#"
        function %f(a: real) -> real {
            let b: real = sin a
            return b
        }"#,
    )
    .unwrap();
    // the reader does not check return arities
    func.returns.push(ir::Ty::Real);
    let input = select_input(&func, &[]).unwrap();
    let err = pullback(&func, &input, &Registry::new().unwrap(), &mut Context::default())
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Structural);
    expect![[r#"invalid function: function returns 2 values but 1 were supplied"#]]
        .assert_eq(&err.to_string());
}
