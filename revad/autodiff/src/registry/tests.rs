use expect_test::expect;
use ir::{Expr, Opcode, Var};

use crate::registry::{node_name, NodeDef, Registry, Resolver};
use crate::{Error, ErrorClass};

fn call(callee: &str, node: Option<&str>) -> Expr {
    Expr::Call { callee: callee.into(), args: vec![Var::from(0u32)], node: node.map(Into::into) }
}

fn op(opcode: Opcode) -> Expr {
    Expr::Op { opcode, args: vec![Var::from(0u32); opcode.arity()] }
}

#[test]
fn builtin_catalog() {
    let registry = Registry::new().unwrap();
    let listing: Vec<_> = registry
        .iter()
        .map(|node| format!("{} {}/{}", node.name, node.qualified, node.arity))
        .collect();
    expect![[r#"
        FnegNode math.fneg/1
        FaddNode math.fadd/2
        FsubNode math.fsub/2
        FmulNode math.fmul/2
        FdivNode math.fdiv/2
        SinNode math.sin/1
        CosNode math.cos/1
        TanNode math.tan/1
        ExpNode math.exp/1
        LnNode math.ln/1
        SqrtNode math.sqrt/1
        PowNode math.pow/2
        TanhNode math.tanh/1
    "#]]
    .assert_eq(&(listing.join("\n") + "\n"));

    // every differentiable opcode has a rule
    let mut resolver = Resolver::new(&registry);
    for opcode in Opcode::ALL {
        let node = resolver.resolve(&op(*opcode)).unwrap();
        assert_eq!(node.is_some(), opcode.is_differentiable(), "{opcode}");
    }
}

#[test]
fn referenced_inputs() {
    fn node<'r>(resolver: &mut Resolver<'r>, opcode: Opcode) -> &'r NodeDef {
        let registry = resolver.registry;
        registry.node(resolver.resolve(&op(opcode)).unwrap().unwrap())
    }

    let registry = Registry::new().unwrap();
    let resolver = &mut Resolver::new(&registry);

    let fmul = node(resolver, Opcode::Fmul);
    assert_eq!(fmul.inputs_referenced(&[true, false]), vec![false, true]);
    assert_eq!(fmul.inputs_referenced(&[true, true]), vec![true, true]);
    assert!(!fmul.primal_referenced(&[true, true]));

    let fdiv = node(resolver, Opcode::Fdiv);
    assert_eq!(fdiv.inputs_referenced(&[true, false]), vec![false, true]);
    assert!(!fdiv.primal_referenced(&[true, false]));
    assert!(fdiv.primal_referenced(&[false, true]));

    let exp = node(resolver, Opcode::Exp);
    assert_eq!(exp.inputs_referenced(&[true]), vec![false]);
    assert!(exp.primal_referenced(&[true]));

    let fadd = node(resolver, Opcode::Fadd);
    assert_eq!(fadd.inputs_referenced(&[true, true]), vec![false, false]);
}

const NN: &str = r#"
function %nn.soft_plus.d0(upstream: real, x: real, primal: real) -> real {
    let e: real = exp x
    let one: real = fconst 1.0
    let s: real = fadd one, e
    let q: real = fdiv e, s
    let r: real = fmul upstream, q
    return r
}

function %act.soft_plus.d0(upstream: real, x: real, primal: real) -> real {
    return upstream
}

function %nn.scale.d0(upstream: real, x: real, k: real, primal: real) -> real {
    let r: real = fmul upstream, k
    return r
}

function %nn.scale.d1(upstream: real, x: real, k: real, primal: real) -> real {
    let r: real = fmul upstream, x
    return r
}
"#;

#[test]
fn resolution_order() {
    let mut registry = Registry::new().unwrap();
    registry.add_catalog(NN).unwrap();
    let mut resolver = Resolver::new(&registry);
    let mut resolve = |expr: Expr| {
        resolver.resolve(&expr).map(|node| node.map(|node| registry.node(node).qualified.clone()))
    };

    // exact path
    assert_eq!(resolve(call("nn.soft_plus", None)), Ok(Some("nn.soft_plus".into())));
    // unique node name
    assert_eq!(resolve(call("layers.scale", None)), Ok(Some("nn.scale".into())));
    // explicit links take precedence
    assert_eq!(resolve(call("nn.scale", Some("SinNode"))), Ok(Some("math.sin".into())));
    // unknown operations are inert
    assert_eq!(resolve(call("nn.relu", None)), Ok(None));

    let err = resolve(call("layers.soft_plus", None)).unwrap_err();
    expect![[r#"call %layers.soft_plus matches multiple dependency nodes: `nn.soft_plus` and `act.soft_plus`"#]]
        .assert_eq(&err.to_string());
    assert_eq!(err.class(), ErrorClass::Resolution);

    let err = resolve(call("nn.relu", Some("ReluNode"))).unwrap_err();
    assert_eq!(err, Error::UnknownNode { name: "ReluNode".into() });
    assert_eq!(node_name("nn.soft_plus"), "SoftPlusNode");
}

#[test]
fn invalid_catalogs() {
    let check = |src: &str, expect: expect_test::Expect| {
        let err = Registry::default().add_catalog(src).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Structural);
        expect.assert_eq(&err.to_string());
    };

    check(
        r#"
        function %nn.relu.d0(upstream: real, x: real, primal: real) -> real {
            let z: real = fconst 0.0
            let c: bool = fgt x, z
            let mut r: real = fconst 0.0
            if c { r = copy upstream } else { }
            return r
        }"#,
        expect![[r#"invalid derivative rule %nn.relu: derivative rules must be straight-line code"#]],
    );
    check(
        r#"
        function %nn.scale.d1(upstream: real, x: real, k: real, primal: real) -> real {
            return upstream
        }"#,
        expect![[r#"invalid derivative rule %nn.scale: missing or duplicate rule for input 0"#]],
    );
    check(
        r#"
        function %nn.scale.d0(upstream: real, x: real, k: real, primal: real) -> real {
            return upstream
        }"#,
        expect![[r#"invalid derivative rule %nn.scale: missing rule for input 1"#]],
    );
    check(
        r#"
        function %nn.scale(upstream: real, x: real, primal: real) -> real {
            return upstream
        }"#,
        expect![[r#"invalid derivative rule %nn.scale: expected a name of the form <node>.d<input>"#]],
    );
}
