use super::helpers::*;
use fluid_compiler::opcode::OpCode;
use fluid_compiler::printer::print_chunk;
use fluid_compiler::proto::{Constant, Proto};
use proptest::prelude::*;

/// Integer arithmetic tree, rendered fully parenthesised.
#[derive(Clone, Debug)]
enum Arith {
    Lit(i64),
    Neg(Box<Arith>),
    Bin(char, Box<Arith>, Box<Arith>),
}

impl Arith {
    fn source(&self) -> String {
        match self {
            Arith::Lit(n) => n.to_string(),
            Arith::Neg(e) => format!("(-{})", e.source()),
            Arith::Bin(op, a, b) => format!("({} {op} {})", a.source(), b.source()),
        }
    }

    fn eval(&self) -> i64 {
        match self {
            Arith::Lit(n) => *n,
            Arith::Neg(e) => e.eval().wrapping_neg(),
            Arith::Bin('+', a, b) => a.eval().wrapping_add(b.eval()),
            Arith::Bin('-', a, b) => a.eval().wrapping_sub(b.eval()),
            Arith::Bin(_, a, b) => a.eval().wrapping_mul(b.eval()),
        }
    }
}

fn arb_arith() -> impl Strategy<Value = Arith> {
    let leaf = (0i64..1000).prop_map(Arith::Lit);
    leaf.prop_recursive(5, 32, 2, |inner| {
        prop_oneof![
            inner.clone().prop_map(|e| Arith::Neg(Box::new(e))),
            (prop_oneof![Just('+'), Just('-'), Just('*')], inner.clone(), inner)
                .prop_map(|(op, a, b)| Arith::Bin(op, Box::new(a), Box::new(b))),
        ]
    })
}

/// The integer loaded by `return <constant>`.
fn returned_integer(proto: &Proto) -> Option<i64> {
    let load = proto.code[1];
    match load.opcode() {
        OpCode::LoadI => Some(i64::from(load.sbx())),
        OpCode::LoadK => match proto.constants[load.bx() as usize] {
            Constant::Integer(n) => Some(n),
            _ => None,
        },
        _ => None,
    }
}

/// Source of an arbitrary expression built from every operator form.
fn arb_expr_source() -> impl Strategy<Value = String> {
    let leaf = prop_oneof![
        prop_oneof![Just("a"), Just("b"), Just("c"), Just("nil"), Just("true")].prop_map(String::from),
        (0u32..100).prop_map(|n| n.to_string()),
    ];
    leaf.prop_recursive(4, 48, 3, |inner| {
        let binop = prop_oneof![
            Just("+"),
            Just("-"),
            Just("*"),
            Just("//"),
            Just("^"),
            Just(".."),
            Just("=="),
            Just("~="),
            Just("<="),
            Just("and"),
            Just("or"),
            Just("??"),
            Just("&"),
            Just("<<"),
        ];
        let unop = prop_oneof![Just("-"), Just("not "), Just("#"), Just("~")];
        prop_oneof![
            (binop, inner.clone(), inner.clone()).prop_map(|(op, a, b)| format!("({a} {op} {b})")),
            (unop, inner.clone()).prop_map(|(op, e)| format!("({op}{e})")),
            (inner.clone(), inner.clone(), inner.clone())
                .prop_map(|(c, a, b)| format!("({c} ? {a} :> {b})")),
            inner.clone().prop_map(|e| format!("({e}?)")),
            inner.clone().prop_map(|e| format!("f({e})")),
            inner.clone().prop_map(|e| format!("o:m({e}, 1)")),
            inner.clone().prop_map(|e| format!("t[{e}]")),
            inner.clone().prop_map(|e| format!("t?[{e}]")),
            inner.clone().prop_map(|e| format!("({e} |> g())")),
            inner.clone().prop_map(|e| format!("(a => {e})")),
            inner.prop_map(|e| format!("{{{e}, k = {e}}}")),
        ]
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_constant_arithmetic_folds(tree in arb_arith()) {
        let src = format!("return {}", tree.source());
        let proto = compile_str(&src);
        prop_assert_eq!(proto.code.len(), 3, "{}", src);
        prop_assert_eq!(returned_integer(&proto), Some(tree.eval()), "{}", src);
    }

    #[test]
    fn prop_print_reparse_is_identical(expr in arb_expr_source()) {
        let src = format!("local x = {expr}\nreturn x, {expr}");
        let block = parse_str(&src);
        let printed = print_chunk(&block);
        prop_assert_eq!(parse_str(&printed), block, "{}", printed);
    }
}
