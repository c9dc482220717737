use float_cmp::assert_approx_eq;
use ir::{Tape, TapeKind};
use ir_reader::parse_function;

use crate::{
    gradient, run_function, Data, Externs, Heap, InterpretError, Interpreter, NoExterns,
    TapeStats, Wrt,
};

#[test]
fn counted_loop() {
    let func = parse_function(
        r#"
        function %f(a: real, n: int) -> real {
            let mut s: real = fconst 0.0
            let mut i: int = iconst 0
            while { let c: bool = ilt i, n } -> c {
                let one: int = iconst 1
                i = iadd i, one
                s = fadd s, a
            }
            return s
        }"#,
    )
    .unwrap();

    let res = run_function(&func, &[Data::Real(2.0), Data::Int(3)]).unwrap();
    assert_eq!(res, vec![Data::Real(6.0)]);
    let res = run_function(&func, &[Data::Real(2.0), Data::Int(0)]).unwrap();
    assert_eq!(res, vec![Data::Real(0.0)]);

    let mut heap = Heap::default();
    let grad = gradient(&func, &[Data::Real(2.0), Data::Int(5)], &Wrt::Param(0), &mut NoExterns, &mut heap)
        .unwrap();
    assert_approx_eq!(f64, grad.value, 10.0);
    assert_approx_eq!(f64, grad.derivative, 5.0);
}

#[test]
fn nested_square() {
    let func = parse_function(
        r#"
        function %f(a: real) -> real {
            let s: real = fmul a, a
            let t: real = fadd s, s
            let r: real = fmul t, t
            return r
        }"#,
    )
    .unwrap();

    let a = 2.15f64;
    let mut heap = Heap::default();
    let grad = gradient(&func, &[Data::Real(a)], &Wrt::Param(0), &mut NoExterns, &mut heap).unwrap();
    assert_approx_eq!(f64, grad.value, 4.0 * a.powi(4), epsilon = 1e-9);
    assert_approx_eq!(f64, grad.derivative, 16.0 * a.powi(3), epsilon = 1e-9);
}

#[test]
fn property_derivative() {
    let func = parse_function(
        r#"
        function %f(p: obj) -> real {
            let y: real = load p.alpha
            let z: real = fmul y, y
            store p.beta, z
            let w: real = load p.beta
            let r: real = sin w
            return r
        }"#,
    )
    .unwrap();

    let mut heap = Heap::default();
    let p = heap.alloc(&[("alpha", Data::Real(0.7)), ("beta", Data::Real(0.0))]);
    let wrt = Wrt::Property { param: 0, field: "alpha".into() };
    let grad = gradient(&func, &[p], &wrt, &mut NoExterns, &mut heap).unwrap();
    assert_approx_eq!(f64, grad.value, 0.49f64.sin(), epsilon = 1e-12);
    assert_approx_eq!(f64, grad.derivative, 0.49f64.cos() * 1.4, epsilon = 1e-12);
    assert_eq!(heap.load(0, "beta"), Ok(Data::Real(0.7 * 0.7)));
}

#[test]
fn tape_statistics() {
    let func = parse_function(
        r#"
        function %f(a: real) -> real {
            push values1, a
            push decisions1, 2
            let t: bool = top_is decisions1, 2
            let d: int = pop decisions1
            let b: real = pop values1
            let r: real = fmul b, a
            return r
        }"#,
    )
    .unwrap();

    let mut heap = Heap::default();
    let mut externs = NoExterns;
    let mut interp = Interpreter::new(&func, &mut externs, &mut heap);
    assert_eq!(interp.run(&[Data::Real(3.0)]), Ok(vec![Data::Real(9.0)]));
    assert!(interp.tapes.is_balanced());
    let stats = TapeStats { pushes: 1, pops: 1 };
    assert_eq!(
        interp.tapes.all_stats(),
        vec![(Tape::values(1), stats), (Tape::decisions(1), stats)]
    );
    assert_eq!(interp.tapes.stats(Tape { kind: TapeKind::Adjoints, level: 1 }), TapeStats::default());

    // values carried through a tape keep their dependency on the seed
    let grad = gradient(&func, &[Data::Real(3.0)], &Wrt::Param(0), &mut NoExterns, &mut heap).unwrap();
    assert_approx_eq!(f64, grad.derivative, 6.0);
}

#[test]
fn runtime_errors() {
    let func = parse_function(
        r#"
        function %f(a: real) -> real {
            let b: real = pop values1
            return b
        }"#,
    )
    .unwrap();
    assert_eq!(run_function(&func, &[Data::Real(1.0)]), Err(InterpretError::EmptyTape(Tape::values(1))));
    assert_eq!(run_function(&func, &[]), Err(InterpretError::Arity { expected: 1, found: 0 }));

    let func = parse_function(
        r#"
        function %f(a: real) -> real {
            let c: bool = bconst true
            if c { unreachable } else { }
            let b: real = call %missing(a)
            return b
        }"#,
    )
    .unwrap();
    assert_eq!(run_function(&func, &[Data::Real(1.0)]), Err(InterpretError::Unreachable));

    let func = parse_function(
        r#"
        function %f(a: real) -> real {
            let b: real = call %missing(a)
            return b
        }"#,
    )
    .unwrap();
    let err = run_function(&func, &[Data::Real(1.0)]).unwrap_err();
    assert_eq!(err.to_string(), "call to unknown operation %missing");
}

struct Cube;

impl Externs for Cube {
    fn call(&mut self, name: &str, args: &[Data], _heap: &mut Heap) -> Result<Data, InterpretError> {
        match name {
            "cube" => Ok(Data::Real(args[0].f64()?.powi(3))),
            _ => Err(InterpretError::UnknownExtern(name.into())),
        }
    }

    fn partials(&mut self, name: &str, args: &[Data]) -> Option<Vec<f64>> {
        let x = args[0].f64().ok()?;
        (name == "cube").then(|| vec![3.0 * x * x])
    }
}

#[test]
fn extern_partials() {
    let func = parse_function(
        r#"
        function %f(a: real) -> real {
            let b: real = call %cube(a)
            let c: real = exp b
            return c
        }"#,
    )
    .unwrap();

    let mut heap = Heap::default();
    let grad = gradient(&func, &[Data::Real(0.5)], &Wrt::Param(0), &mut Cube, &mut heap).unwrap();
    assert_approx_eq!(f64, grad.value, 0.125f64.exp());
    assert_approx_eq!(f64, grad.derivative, 0.125f64.exp() * 0.75, epsilon = 1e-12);

    let err = gradient(&func, &[Data::Real(0.5)], &Wrt::Param(0), &mut NoExterns, &mut heap);
    assert_eq!(err, Err(InterpretError::UnknownExtern("cube".into())));
}
