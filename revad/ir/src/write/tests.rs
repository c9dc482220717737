use expect_test::expect;

use crate::{Attr, Expr, FunctionBuilder, NameGen, Opcode, Stmt, Tape, Ty};

#[test]
fn print_function() {
    let mut b = FunctionBuilder::new("f");
    let a = b.param("a", Ty::Real);
    let n = b.param("n", Ty::Int);
    let s = b.def_mut("s", Ty::Real, Expr::Const(crate::Const::Real(0.0)));
    let i = b.def_mut("i", Ty::Int, Expr::Const(crate::Const::Int(0)));
    let one = b.iconst("one", 1);

    b.open_block();
    let c = b.op("c", Opcode::Ilt, &[i, n]);
    let header = b.close_block();
    b.open_block();
    b.assign(s, Expr::Op { opcode: Opcode::Fadd, args: vec![s, a] });
    b.assign(i, Expr::Op { opcode: Opcode::Iadd, args: vec![i, one] });
    let body = b.close_block();
    b.push(Stmt::While { header, cond: c, body });

    let z = b.fconst("z", -1.5e-7);
    let p = b.op("p", Opcode::Fgt, &[s, z]);
    b.open_block();
    b.push_value(Tape::values(1), s);
    let then = b.close_block();
    b.open_block();
    b.push_decision(Tape::decisions(1), -1);
    let else_ = b.close_block();
    b.push(Stmt::If { branches: vec![(p, then)], else_ });

    let r = b.def(
        "r",
        Ty::Real,
        Expr::Call { callee: "nn.soft_plus".into(), args: vec![s], node: Some("SoftPlusNode".into()) },
    );
    b.ret(vec![r]);
    let mut func = b.finish(vec![Ty::Real]);
    func.attrs.push(Attr { name: "optimize".into(), args: vec!["a".into()] });

    expect![[r#"
        @optimize(a)
        function %f(a: real, n: int) -> real {
            let mut s: real = fconst 0.0
            let mut i: int = iconst 0
            let one: int = iconst 1
            while {
                let c: bool = ilt i, n
            } -> c {
                s = fadd s, a
                i = iadd i, one
            }
            let z: real = fconst -1.5e-7
            let p: bool = fgt s, z
            if p {
                push values1, s
            } else {
                push decisions1, -1
            }
            let r: real = call %nn.soft_plus(s) [node SoftPlusNode]
            return r
        }
    "#]]
    .assert_eq(&func.to_debug_string());
    assert_eq!(func.validate(), Ok(()));
}

#[test]
fn fresh_names() {
    let mut names = NameGen::default();
    assert_eq!(names.fresh("x"), "x");
    assert_eq!(names.fresh("x"), "x_1");
    assert_eq!(names.fresh("x"), "x_2");
    assert_eq!(names.fresh("let"), "let_1");
}
