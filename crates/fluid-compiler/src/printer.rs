//! Renders an AST back to source. Operator expressions are fully
//! parenthesised, so printing then re-parsing yields the same tree.
use crate::ast::{
    Block, CallExpr, CallTarget, Expr, ExprKind, FunctionBody, IfClause, Literal, LocalName,
    Param, ResultFilter, Stmt, StmtKind, TableField,
};

/// Print a chunk, one statement per line.
pub fn print_chunk(block: &Block) -> String {
    let mut p = Printer::default();
    p.block(block);
    p.out
}

pub fn print_expr(expr: &Expr) -> String {
    let mut p = Printer::default();
    p.expr(expr);
    p.out
}

#[derive(Default)]
struct Printer {
    out: String,
    indent: usize,
}

impl Printer {
    fn push(&mut self, s: &str) {
        self.out.push_str(s);
    }

    fn newline(&mut self) {
        self.out.push('\n');
        for _ in 0..self.indent {
            self.out.push_str("  ");
        }
    }

    fn block(&mut self, block: &Block) {
        for (i, stmt) in block.stmts.iter().enumerate() {
            if i > 0 {
                self.newline();
            }
            self.stmt(stmt);
        }
    }

    /// An indented block between two header lines.
    fn nested(&mut self, block: &Block) {
        self.indent += 1;
        if !block.stmts.is_empty() {
            self.newline();
            self.block(block);
        }
        self.indent -= 1;
        self.newline();
    }

    fn stmt(&mut self, stmt: &Stmt) {
        let start = self.out.len();
        match &stmt.kind {
            StmtKind::Local { names, values } => {
                self.push("local ");
                for (i, name) in names.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.local_name(name);
                }
                if !values.is_empty() {
                    self.push(" = ");
                    self.expr_list(values);
                }
            }
            StmtKind::LocalFunction { name, func } => {
                self.push("local function ");
                self.push(name);
                self.function_body(func, false);
            }
            StmtKind::Function { path, func } => {
                self.push("function ");
                self.push(&path.segments.join("."));
                if let Some(method) = &path.method {
                    self.push(":");
                    self.push(method);
                }
                self.function_body(func, path.method.is_some());
            }
            StmtKind::If {
                clauses,
                else_block,
            } => {
                for (i, IfClause { cond, body }) in clauses.iter().enumerate() {
                    self.push(if i == 0 { "if " } else { "elseif " });
                    self.expr(cond);
                    self.push(" then");
                    self.nested(body);
                }
                if let Some(block) = else_block {
                    self.push("else");
                    self.nested(block);
                }
                self.push("end");
            }
            StmtKind::While { cond, body } => {
                self.push("while ");
                self.expr(cond);
                self.push(" do");
                self.nested(body);
                self.push("end");
            }
            StmtKind::Repeat { body, cond } => {
                self.push("repeat");
                self.nested(body);
                self.push("until ");
                self.expr(cond);
            }
            StmtKind::NumericFor {
                var,
                start,
                limit,
                step,
                body,
            } => {
                self.push("for ");
                self.push(var);
                self.push(" = ");
                self.expr(start);
                self.push(", ");
                self.expr(limit);
                if let Some(step) = step {
                    self.push(", ");
                    self.expr(step);
                }
                self.push(" do");
                self.nested(body);
                self.push("end");
            }
            StmtKind::GenericFor { names, exprs, body } => {
                self.push("for ");
                self.push(&names.join(", "));
                self.push(" in ");
                self.expr_list(exprs);
                self.push(" do");
                self.nested(body);
                self.push("end");
            }
            StmtKind::Do(block) => {
                self.push("do");
                self.nested(block);
                self.push("end");
            }
            StmtKind::Defer { func, args } => {
                self.push("defer");
                self.params(&func.params, func.is_vararg, false);
                self.nested(&func.body);
                self.push("end");
                if !args.is_empty() {
                    self.push("(");
                    self.expr_list(args);
                    self.push(")");
                }
            }
            StmtKind::Return(ret) => {
                self.push("return");
                if !ret.values.is_empty() {
                    self.push(" ");
                    self.expr_list(&ret.values);
                }
            }
            StmtKind::Break => self.push("break"),
            StmtKind::Continue => self.push("continue"),
            StmtKind::Assignment {
                op,
                targets,
                values,
            } => {
                self.expr_list(targets);
                self.push(" ");
                self.push(op.as_str());
                self.push(" ");
                self.expr_list(values);
            }
            StmtKind::Expression(expr) => match &expr.kind {
                ExprKind::Update {
                    target, postfix, ..
                } => self.update(target, *postfix),
                _ => self.expr(expr),
            },
            StmtKind::ConditionalShorthand { condition, body } => {
                self.prefix_expr(condition);
                self.push("?? ");
                self.stmt(body);
            }
            StmtKind::Global { op, names, values } => {
                self.push("global ");
                self.push(&names.join(", "));
                if !values.is_empty() {
                    self.push(" ");
                    self.push(op.as_str());
                    self.push(" ");
                    self.expr_list(values);
                }
            }
            StmtKind::Raise { code, message } => {
                self.push("raise ");
                self.expr(code);
                if let Some(message) = message {
                    self.push(", ");
                    self.expr(message);
                }
            }
            StmtKind::Check(code) => {
                self.push("check ");
                self.expr(code);
            }
        }
        // A leading `(` or `[` would continue the previous statement.
        if matches!(self.out.as_bytes().get(start), Some(b'(' | b'[')) {
            self.out.insert(start, ';');
        }
    }

    fn local_name(&mut self, name: &LocalName) {
        self.push(&name.name);
        if let Some(ty) = name.type_name {
            self.push(": ");
            self.push(ty.as_str());
        }
        if name.has_close {
            self.push(" <close>");
        }
        if name.is_const {
            self.push(" <const>");
        }
    }

    fn function_body(&mut self, func: &FunctionBody, skip_self: bool) {
        self.params(&func.params, func.is_vararg, skip_self);
        self.nested(&func.body);
        self.push("end");
    }

    fn params(&mut self, params: &[Param], is_vararg: bool, skip_self: bool) {
        self.push("(");
        let mut first = true;
        for param in params.iter().filter(|p| !(skip_self && p.is_self)) {
            if !first {
                self.push(", ");
            }
            first = false;
            self.push(&param.name);
            if let Some(ty) = param.type_name {
                self.push(": ");
                self.push(ty.as_str());
            }
        }
        if is_vararg {
            if !first {
                self.push(", ");
            }
            self.push("...");
        }
        self.push(")");
    }

    fn expr_list(&mut self, exprs: &[Expr]) {
        for (i, e) in exprs.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.expr(e);
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Literal(lit) => self.literal(lit),
            ExprKind::Identifier(name) => self.push(name),
            ExprKind::Vararg => self.push("..."),
            ExprKind::Function(func) => {
                self.push("function");
                self.function_body(func, false);
            }
            ExprKind::Table(table) => {
                self.push("{");
                for (i, field) in table.fields.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    match field {
                        TableField::Array(value) => self.expr(value),
                        TableField::Record { name, value } => {
                            self.push(name);
                            self.push(" = ");
                            self.expr(value);
                        }
                        TableField::Computed { key, value } => {
                            self.bracketed(key);
                            self.push(" = ");
                            self.expr(value);
                        }
                    }
                }
                self.push("}");
            }
            ExprKind::Paren(inner) => {
                self.push("(");
                self.expr(inner);
                self.push(")");
            }
            ExprKind::Deferred(inner) => {
                self.push("<{ ");
                self.expr(inner);
                self.push(" }>");
            }
            ExprKind::Member { table, name, safe } => {
                self.prefix_expr(table);
                self.push(if *safe { "?." } else { "." });
                self.push(name);
            }
            ExprKind::Index { table, key, safe } => {
                self.prefix_expr(table);
                if *safe {
                    self.push("?");
                }
                self.bracketed(key);
            }
            ExprKind::Call(call) => self.call(call),
            ExprKind::Unary { op, operand } => {
                self.push("(");
                self.push(op.as_str());
                self.expr(operand);
                self.push(")");
            }
            ExprKind::Binary { op, lhs, rhs } => {
                self.push("(");
                self.expr(lhs);
                self.push(" ");
                self.push(op.as_str());
                self.push(" ");
                self.expr(rhs);
                self.push(")");
            }
            ExprKind::Ternary {
                cond,
                if_true,
                if_false,
            } => {
                self.push("(");
                self.expr(cond);
                self.push(" ? ");
                self.expr(if_true);
                self.push(" :> ");
                self.expr(if_false);
                self.push(")");
            }
            // Pipes stay bare: the parser only groups them through a kept `Paren`.
            ExprKind::Pipe { lhs, call, limit } => {
                self.expr(lhs);
                match limit {
                    0 => self.push(" |> "),
                    n => self.push(&format!(" |{n}> ")),
                }
                self.expr(call);
            }
            ExprKind::Presence(inner) => {
                self.push("(");
                self.prefix_expr(inner);
                self.push("??)");
            }
            ExprKind::Update {
                target, postfix, ..
            } => {
                self.push("(");
                self.update(target, *postfix);
                self.push(")");
            }
            ExprKind::ResultFilter(filter) => self.result_filter(filter),
        }
    }

    /// Expressions that may take a suffix, or already print their own
    /// parentheses, print as-is; anything else is wrapped.
    fn prefix_expr(&mut self, expr: &Expr) {
        match expr.kind {
            ExprKind::Identifier(_)
            | ExprKind::Member { .. }
            | ExprKind::Index { .. }
            | ExprKind::Call(_)
            | ExprKind::Paren(_)
            | ExprKind::Unary { .. }
            | ExprKind::Binary { .. }
            | ExprKind::Ternary { .. }
            | ExprKind::Presence(_)
            | ExprKind::Update { .. } => self.expr(expr),
            _ => {
                self.push("(");
                self.expr(expr);
                self.push(")");
            }
        }
    }

    fn bracketed(&mut self, key: &Expr) {
        self.push("[");
        let start = self.out.len();
        self.expr(key);
        // `[[` would open a long string.
        if self.out.as_bytes().get(start) == Some(&b'[') {
            self.out.insert(start, ' ');
        }
        self.push("]");
    }

    fn update(&mut self, target: &Expr, postfix: bool) {
        if postfix {
            self.prefix_expr(target);
            self.push("++");
        } else {
            self.push("++");
            self.prefix_expr(target);
        }
    }

    fn call(&mut self, call: &CallExpr) {
        match &call.target {
            CallTarget::Direct(callee) => self.prefix_expr(callee),
            CallTarget::Method {
                receiver,
                name,
                safe,
            } => {
                self.prefix_expr(receiver);
                self.push(if *safe { "?:" } else { ":" });
                self.push(name);
            }
        }
        self.push("(");
        self.expr_list(&call.args);
        self.push(")");
    }

    fn result_filter(&mut self, filter: &ResultFilter) {
        self.push("[");
        for i in 0..filter.count {
            let keep = filter.keep_mask & (1u64 << i) != 0;
            self.out.push(if keep { '*' } else { '_' });
        }
        self.push("]");
        self.expr(&filter.call);
    }

    fn literal(&mut self, lit: &Literal) {
        match lit {
            Literal::Nil => self.push("nil"),
            Literal::True => self.push("true"),
            Literal::False => self.push("false"),
            Literal::Integer(i) => self.push(&i.to_string()),
            Literal::Float(f) if f.is_finite() => self.push(&format!("{f:?}")),
            Literal::Float(f) if f.is_nan() => self.push("(0/0)"),
            Literal::Float(f) => self.push(if *f > 0.0 { "1e999" } else { "(-1e999)" }),
            Literal::String(bytes) => {
                self.out.push('"');
                for &b in bytes {
                    match b {
                        b'\\' => self.push("\\\\"),
                        b'"' => self.push("\\\""),
                        b'\n' => self.push("\\n"),
                        b'\r' => self.push("\\r"),
                        b'\t' => self.push("\\t"),
                        0x20..=0x7e => self.out.push(b as char),
                        _ => self.push(&format!("\\{b:03}")),
                    }
                }
                self.out.push('"');
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::tests::parse;

    fn round_trip(src: &str) {
        let mut first = parse(src);
        let printed = print_chunk(&first);
        let mut second = parse(&printed);
        first.clear_spans();
        second.clear_spans();
        assert_eq!(first, second, "source:\n{src}\nprinted:\n{printed}");
        // Printing is a fixed point after one pass.
        assert_eq!(print_chunk(&second), printed);
    }

    #[test]
    fn test_print_operators() {
        let block = parse("x = 1 + 2 * 3");
        assert_eq!(print_chunk(&block), "x = (1 + (2 * 3))");
        let block = parse("x = -a ^ 2");
        assert_eq!(print_chunk(&block), "x = (-(a ^ 2))");
    }

    #[test]
    fn test_print_expr() {
        let block = parse("return t?.k ?? d, c ? 1 :> 2, [_*]f()");
        let StmtKind::Return(ret) = &block.stmts[0].kind else {
            panic!("expected return");
        };
        let printed: Vec<String> = ret.values.iter().map(print_expr).collect();
        assert_eq!(printed, vec!["(t?.k ?? d)", "(c ? 1 :> 2)", "[_*]f()"]);
    }

    #[test]
    fn test_print_strings() {
        let block = parse(r#"s = "a\"b\n\0\255""#);
        assert_eq!(print_chunk(&block), r#"s = "a\"b\n\000\255""#);
    }

    #[test]
    fn test_round_trip_statements() {
        round_trip(
            "local a <close>, b: num = f(), 2\n\
             local k <const> = 1\n\
             local function g(x: str, ...) return x end\n\
             function t.a.b:m(y) self.v = y end\n\
             if a then b() elseif c then d() else e() end\n\
             while x < 10 do x += 1 end\n\
             repeat n++ until n > 3\n\
             for i = 1, 10, 2 do continue end\n\
             for k, v in pairs(t) do break end\n\
             do local z end\n\
             defer(a) print(a) end(1)\n\
             defer end\n\
             a, b.c, d[1] = 1, 2, 3\n\
             s ..= 'x'\n\
             v ??= {}\n\
             x?? return 1, 2\n\
             return",
        );
    }

    #[test]
    fn test_round_trip_extensions() {
        round_trip(
            "x = a ?? b or c\n\
             y = (a??)\n\
             z = c ? a |> f() :> [_*]g()\n\
             w = o?.p?[k]?:m(1) + (0?)\n\
             u = <{ a .. b .. c }>\n\
             v = {1, k = 2, [k] = 3, [_*]f(), (g())}\n\
             print(v |2> h(1) |> k())\n\
             ;(f or g)(\"s\")\n\
             ;[__*]f()\n\
             ++t.n\n\
             i++",
        );
    }

    #[test]
    fn test_round_trip_globals_and_errors() {
        round_trip(
            "global a, b = 1, 2\n\
             global c\n\
             global d ??= {}\n\
             global function f(x) return x end\n\
             raise 5\n\
             raise code, 'failed'\n\
             check f(1)\n\
             sq = x => x * x\n\
             add = (a, b) => a + b\n\
             run(() => do print(1) end)",
        );
    }

    #[test]
    fn test_print_arrow_as_function() {
        let printed = print_chunk(&parse("f = x => x + 1"));
        assert_eq!(printed, "f = function(x)\n  return (x + 1)\nend");
    }

    #[test]
    fn test_round_trip_literals() {
        round_trip("x = {1.5, 1e100, 0x10, 'tab\\t', [[long]], -3, not nil, #t, ~5, true}");
    }

    #[test]
    fn test_leading_paren_statement_is_separated() {
        let printed = print_chunk(&parse("a = b\n;(f)()"));
        assert_eq!(printed, "a = b\nf()");
        let printed = print_chunk(&parse("a = b\n;(f or g)()"));
        assert_eq!(printed, "a = b\n;(f or g)()");
    }
}
