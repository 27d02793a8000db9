//! Graphviz dump of a definition's control-flow graph.
//!
//! One record node per block listing its three-address code and terminator;
//! edges for jumps and both branch arms. Compile with `dot -Tpdf` for
//! rendering.

use crate::ir::{Definition, IrOp, Op, Terminator, Var, VarKind};
use crate::session::Session;
use std::io::{self, Write};

fn var_text(sess: &Session, v: &Var) -> String {
    let name = match v.symbol {
        Some(sym) => sess.syms.get(sym).name.clone(),
        None => String::new(),
    };
    match v.kind {
        VarKind::Immediate => {
            if v.symbol.is_some() {
                format!("${}", name)
            } else {
                format!("{}", v.imm)
            }
        }
        VarKind::Direct => {
            if v.offset != 0 {
                format!("{}+{}", name, v.offset)
            } else {
                name
            }
        }
        VarKind::Deref => format!("*({}+{})", name, v.offset),
        VarKind::Address => format!("&{}", name),
    }
}

fn op_text(sess: &Session, op: &Op) -> String {
    let t = var_text(sess, &op.target);
    let a = var_text(sess, &op.a);
    let b = op.b.map(|b| var_text(sess, &b));
    let sign = match op.op {
        IrOp::Add => "+",
        IrOp::Sub => "-",
        IrOp::Mul => "*",
        IrOp::Div => "/",
        IrOp::Mod => "%",
        IrOp::And => "&",
        IrOp::Or => "|",
        IrOp::Xor => "^",
        IrOp::Shl => "<<",
        IrOp::Shr => ">>",
        IrOp::Eq => "==",
        IrOp::Ge => ">=",
        IrOp::Gt => ">",
        IrOp::Cast => return format!("{} = ({})", t, a),
        IrOp::Not => return format!("{} = ~{}", t, a),
        IrOp::Assign => return format!("{} = {}", t, a),
        IrOp::Load => return format!("{} = {}", t, a),
        IrOp::Addr => return format!("{} = &{}", t, a),
        IrOp::Call => return format!("{} = call {}", t, a),
        IrOp::Param => return format!("param {}", a),
        IrOp::VaStart => return format!("va_start {}", a),
        IrOp::VaArg => return format!("{} = va_arg {}", t, a),
    };
    format!("{} = {} {} {}", t, a, sign, b.unwrap_or_default())
}

/// Write the CFG of one definition in dot format.
pub fn fdotgen<W: Write>(out: &mut W, sess: &Session, def: &Definition) -> io::Result<()> {
    let name = &sess.syms.get(def.symbol).name;
    writeln!(out, "digraph {{")?;
    writeln!(out, "  node [fontname=\"Courier_New\",shape=record];")?;
    writeln!(out, "  label=\"{}\";", name)?;
    for (i, block) in def.blocks.iter().enumerate() {
        let label = &sess.syms.get(block.label).name;
        let mut body = String::new();
        for op in &block.code {
            // Escape the characters that delimit record labels.
            for ch in op_text(sess, op).chars() {
                if matches!(ch, '<' | '>' | '{' | '}' | '|') {
                    body.push('\\');
                }
                body.push(ch);
            }
            body.push_str("\\l");
        }
        let tail = match &block.terminator {
            Terminator::None => String::new(),
            Terminator::Jump(_) => String::new(),
            Terminator::Branch(v, _, _) => format!("branch {}\\l", var_text(sess, v)),
            Terminator::Return(Some(v)) => format!("return {}\\l", var_text(sess, v)),
            Terminator::Return(None) => "return\\l".to_string(),
        };
        writeln!(
            out,
            "  b{} [label=\"{{ {}: | {}{}}}\"];",
            i, label, body, tail
        )?;
        match &block.terminator {
            Terminator::Jump(t) => writeln!(out, "  b{} -> b{};", i, t.0)?,
            Terminator::Branch(_, a, b) => {
                writeln!(out, "  b{} -> b{} [label=\"true\"];", i, a.0)?;
                writeln!(out, "  b{} -> b{} [label=\"false\"];", i, b.0)?;
            }
            _ => {}
        }
    }
    writeln!(out, "}}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    #[test]
    fn test_dot_output_shape() {
        let mut parser =
            Parser::from_source("int f(int x) { if (x) return 1; return 0; }").unwrap();
        let def = parser.parse().unwrap().unwrap();
        let sess = parser.into_session();
        let mut out = Vec::new();
        fdotgen(&mut out, &sess, &def).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("digraph {"));
        assert!(text.contains("label=\"f\""));
        assert!(text.contains("true"));
        assert!(text.contains("false"));
        assert!(text.trim_end().ends_with('}'));
    }
}
