//! Canonical printer — deterministic round-trip text for a source unit
//!
//! The printer produces the one canonical spelling of a (rewritten) source
//! unit: fixed 4-space indentation, one item per line, explicit visibility,
//! no comments, normalized literals. Printing then reparsing then printing
//! again yields byte-identical output; the linearizer hashes this text to
//! derive a contract's content identifier.

use crate::parser::ast::*;

const INDENT: &str = "    ";

/// Print a whole source unit in canonical form
pub fn print_unit(unit: &SourceUnit) -> String {
    let mut out = String::new();

    if let Some(ref pragma) = unit.pragma {
        out.push_str("pragma inscript \"");
        out.push_str(&pragma.version);
        out.push_str("\";\n\n");
    }

    for (i, contract) in unit.contracts.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        print_contract_into(&mut out, contract);
    }

    out
}

/// Print a single contract declaration in canonical form
pub fn print_contract(contract: &ContractDecl) -> String {
    let mut out = String::new();
    print_contract_into(&mut out, contract);
    out
}

// ── Declarations ───────────────────────────────────────────

fn print_contract_into(out: &mut String, contract: &ContractDecl) {
    if contract.is_abstract {
        out.push_str("abstract ");
    }
    if contract.is_upgradeable {
        out.push_str("upgradeable ");
    }
    out.push_str("contract ");
    out.push_str(&contract.name);
    if !contract.parents.is_empty() {
        out.push_str(" is ");
        out.push_str(&contract.parents.join(", "));
    }
    out.push_str(" {\n");

    for (i, item) in contract.items.iter().enumerate() {
        if i > 0 && matches!(item, Item::Function(_)) {
            out.push('\n');
        }
        match item {
            Item::Storage(decl) => {
                out.push_str(INDENT);
                out.push_str("storage ");
                out.push_str(&decl.name);
                out.push_str(": ");
                print_type(out, &decl.ty);
                out.push_str(";\n");
            }
            Item::Function(decl) => print_function(out, decl),
        }
    }

    out.push_str("}\n");
}

fn print_function(out: &mut String, func: &FunctionDecl) {
    out.push_str(INDENT);
    out.push_str("fn ");
    out.push_str(&func.name);
    out.push('(');
    for (i, param) in func.params.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&param.name);
        out.push_str(": ");
        print_type(out, &param.ty);
    }
    out.push_str(") ");
    out.push_str(match func.visibility {
        Visibility::Public => "public",
        Visibility::Internal => "internal",
    });
    out.push_str(" {\n");
    print_block(out, &func.body, 2);
    out.push_str(INDENT);
    out.push_str("}\n");
}

fn print_type(out: &mut String, ty: &TypeExpr) {
    match ty {
        TypeExpr::Uint => out.push_str("uint"),
        TypeExpr::Bool => out.push_str("bool"),
        TypeExpr::StringTy => out.push_str("string"),
        TypeExpr::Address => out.push_str("address"),
        TypeExpr::Map(key, value) => {
            out.push_str("map<");
            print_type(out, key);
            out.push_str(", ");
            print_type(out, value);
            out.push('>');
        }
    }
}

// ── Statements ─────────────────────────────────────────────

fn print_block(out: &mut String, stmts: &[Stmt], depth: usize) {
    for stmt in stmts {
        print_stmt(out, stmt, depth);
    }
}

fn write_indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
}

fn print_stmt(out: &mut String, stmt: &Stmt, depth: usize) {
    write_indent(out, depth);
    match stmt {
        Stmt::Let { name, value } => {
            out.push_str("let ");
            out.push_str(name);
            out.push_str(" = ");
            print_expr(out, value, 0, false);
            out.push_str(";\n");
        }
        Stmt::Assign { target, op, value } => {
            print_lvalue(out, target);
            out.push_str(match op {
                AssignOp::Assign => " = ",
                AssignOp::AddAssign => " += ",
                AssignOp::SubAssign => " -= ",
            });
            print_expr(out, value, 0, false);
            out.push_str(";\n");
        }
        Stmt::Require { cond, message } => {
            out.push_str("require(");
            print_expr(out, cond, 0, false);
            out.push_str(", ");
            print_string(out, message);
            out.push_str(");\n");
        }
        Stmt::Emit { event, args } => {
            out.push_str("emit ");
            out.push_str(event);
            out.push('(');
            print_args(out, args);
            out.push_str(");\n");
        }
        Stmt::Return { value } => {
            out.push_str("return");
            if let Some(expr) = value {
                out.push(' ');
                print_expr(out, expr, 0, false);
            }
            out.push_str(";\n");
        }
        Stmt::If { .. } => print_if(out, stmt, depth),
        Stmt::Expr(expr) => {
            print_expr(out, expr, 0, false);
            out.push_str(";\n");
        }
    }
}

/// Prints an if/else-if/else chain; the leading indent is already written
fn print_if(out: &mut String, stmt: &Stmt, depth: usize) {
    let (cond, then_branch, else_branch) = match stmt {
        Stmt::If {
            cond,
            then_branch,
            else_branch,
        } => (cond, then_branch, else_branch),
        _ => unreachable!("print_if called on non-if statement"),
    };

    out.push_str("if ");
    print_expr(out, cond, 0, false);
    out.push_str(" {\n");
    print_block(out, then_branch, depth + 1);
    write_indent(out, depth);
    out.push('}');

    if let Some(else_stmts) = else_branch {
        // `else if` collapses when the else branch is a lone if statement
        if else_stmts.len() == 1 && matches!(else_stmts[0], Stmt::If { .. }) {
            out.push_str(" else ");
            print_if(out, &else_stmts[0], depth);
            return;
        }
        out.push_str(" else {\n");
        print_block(out, else_stmts, depth + 1);
        write_indent(out, depth);
        out.push('}');
    }
    out.push('\n');
}

fn print_lvalue(out: &mut String, target: &LValue) {
    match target {
        LValue::Var(name) => out.push_str(name),
        LValue::Index { name, key } => {
            out.push_str(name);
            out.push('[');
            print_expr(out, key, 0, false);
            out.push(']');
        }
    }
}

// ── Expressions ────────────────────────────────────────────

fn binary_prec(op: BinaryOp) -> u8 {
    match op {
        BinaryOp::Or => 1,
        BinaryOp::And => 2,
        BinaryOp::Eq | BinaryOp::NotEq => 3,
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => 4,
        BinaryOp::Add | BinaryOp::Sub => 5,
        BinaryOp::Mul | BinaryOp::Div => 6,
    }
}

fn expr_prec(expr: &Expr) -> u8 {
    match expr {
        Expr::Binary { op, .. } => binary_prec(*op),
        Expr::Unary { .. } => 7,
        _ => 8,
    }
}

fn print_expr(out: &mut String, expr: &Expr, parent_prec: u8, is_rhs: bool) {
    let prec = expr_prec(expr);
    let needs_parens = prec < parent_prec || (prec == parent_prec && is_rhs && prec < 7);
    if needs_parens {
        out.push('(');
    }

    match expr {
        Expr::Integer(value) => out.push_str(&value.to_string()),
        Expr::Str(value) => print_string(out, value),
        Expr::Bool(value) => out.push_str(if *value { "true" } else { "false" }),
        Expr::AddressLit(value) => out.push_str(value),
        Expr::Ident(name) => out.push_str(name),
        Expr::Index { name, key } => {
            out.push_str(name);
            out.push('[');
            print_expr(out, key, 0, false);
            out.push(']');
        }
        Expr::MsgSender => out.push_str("msg.sender"),
        Expr::BlockNumber => out.push_str("block.number"),
        Expr::BlockTimestamp => out.push_str("block.timestamp"),
        Expr::BlockChainId => out.push_str("block.chainid"),
        Expr::InternalCall { function, args } => {
            out.push_str(function);
            out.push('(');
            print_args(out, args);
            out.push(')');
        }
        Expr::ExternalCall { to, function, args } => {
            print_cross_contract(out, "call", to, function, args);
        }
        Expr::TryCall { to, function, args } => {
            print_cross_contract(out, "try_call", to, function, args);
        }
        Expr::Upgrade { new_hash } => {
            out.push_str("upgrade(");
            print_expr(out, new_hash, 0, false);
            out.push(')');
        }
        Expr::Unary { op, expr } => {
            out.push(match op {
                UnaryOp::Neg => '-',
                UnaryOp::Not => '!',
            });
            print_expr(out, expr, 7, false);
        }
        Expr::Binary { op, lhs, rhs } => {
            let prec = binary_prec(*op);
            print_expr(out, lhs, prec, false);
            out.push_str(match op {
                BinaryOp::Add => " + ",
                BinaryOp::Sub => " - ",
                BinaryOp::Mul => " * ",
                BinaryOp::Div => " / ",
                BinaryOp::Eq => " == ",
                BinaryOp::NotEq => " != ",
                BinaryOp::Lt => " < ",
                BinaryOp::Le => " <= ",
                BinaryOp::Gt => " > ",
                BinaryOp::Ge => " >= ",
                BinaryOp::And => " && ",
                BinaryOp::Or => " || ",
            });
            print_expr(out, rhs, prec, true);
        }
    }

    if needs_parens {
        out.push(')');
    }
}

fn print_cross_contract(out: &mut String, keyword: &str, to: &Expr, function: &str, args: &[Expr]) {
    out.push_str(keyword);
    out.push('(');
    print_expr(out, to, 0, false);
    out.push_str(", ");
    print_string(out, function);
    for arg in args {
        out.push_str(", ");
        print_expr(out, arg, 0, false);
    }
    out.push(')');
}

fn print_args(out: &mut String, args: &[Expr]) {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        print_expr(out, arg, 0, false);
    }
}

fn print_string(out: &mut String, value: &str) {
    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('"');
}
