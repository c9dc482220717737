use float_cmp::assert_approx_eq;
use ir_interpret::{Data, Heap, Interpreter, NoExterns};
use ir_reader::parse_function;

use crate::{second_order, select_input, Context, ErrorClass, Registry};

/// Returns the first and second derivative.
fn derivatives(src: &str, args: &[Data]) -> (f64, f64) {
    let func = parse_function(src).unwrap();
    let input = select_input(&func, &[]).unwrap();
    let registry = Registry::new().unwrap();
    let res = second_order(&func, &input, &registry, &mut Context::default()).unwrap();
    assert_eq!(res.validate(), Ok(()));
    assert_eq!(res.name, format!("{}.second_order", func.name));

    let mut args = args.to_vec();
    args.push(Data::Real(1.0));
    let mut heap = Heap::default();
    let mut externs = NoExterns;
    let mut interp = Interpreter::new(&res, &mut externs, &mut heap);
    let vals = interp.run(&args).unwrap();
    assert!(interp.tapes.is_balanced(), "{:?}", interp.tapes.all_stats());
    // the nested pullback has tapes of its own
    assert!(interp.tapes.all_stats().iter().all(|(tape, _)| tape.level <= 2));
    (vals[0].f64().unwrap(), vals[1].f64().unwrap())
}

#[test]
fn square_of_sum() {
    let a = 2.15f64;
    let (first, second) = derivatives(
        r#"
        function %f(a: real) -> real {
            let s: real = fmul a, a
            let t: real = fadd s, s
            let r: real = fmul t, t
            return r
        }"#,
        &[Data::Real(a)],
    );
    assert_approx_eq!(f64, first, 16.0 * a.powi(3), epsilon = 1e-9);
    assert_approx_eq!(f64, second, 48.0 * a * a, epsilon = 1e-9);
    assert_approx_eq!(f64, second, 221.88, epsilon = 1e-9);
}

#[test]
fn through_tapes() {
    // y = a^(n + 1), the first order pullback saves y on every iteration
    let src = r#"
        function %f(a: real, n: int) -> real {
            let mut y: real = copy a
            let mut i: int = iconst 0
            while { let c: bool = ilt i, n } -> c {
                y = fmul y, a
                let one: int = iconst 1
                i = iadd i, one
            }
            let zero: real = fconst 0.0
            let neg: bool = flt y, zero
            if neg {
                y = fneg y
            } else {
            }
            return y
        }"#;
    let a = 1.3f64;
    let (first, second) = derivatives(src, &[Data::Real(a), Data::Int(3)]);
    assert_approx_eq!(f64, first, 4.0 * a.powi(3), epsilon = 1e-9);
    assert_approx_eq!(f64, second, 12.0 * a.powi(2), epsilon = 1e-9);

    let (first, second) = derivatives(src, &[Data::Real(a), Data::Int(0)]);
    assert_approx_eq!(f64, first, 1.0, epsilon = 1e-12);
    assert_approx_eq!(f64, second, 0.0, epsilon = 1e-12);

    // odd power of a negative number is flipped by the branch
    let (first, second) = derivatives(src, &[Data::Real(-a), Data::Int(2)]);
    assert_approx_eq!(f64, first, -3.0 * a.powi(2), epsilon = 1e-9);
    assert_approx_eq!(f64, second, 6.0 * a, epsilon = 1e-9);
}

#[test]
fn non_scalar_input() {
    let func = parse_function(
        r#"
        function %f(o: obj, n: int) -> real {
            let w: real = load o.w
            return w
        }"#,
    )
    .unwrap();
    let registry = Registry::new().unwrap();
    let input = crate::ActiveInput::Param(func.params[1]);
    let err = second_order(&func, &input, &registry, &mut Context::default()).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Unsupported);
    assert_eq!(err.to_string(), "'n' has type int, only real inputs can be differentiated");
}
