// File: src/checker.rs
//
// Semantic checker (spec §4.4): a single pre-codegen pass over the AST. It
// rejects declaring, assigning to, pre/postfix-mutating, or taking as a
// parameter any of the reserved identifiers `this`, `arguments`, `eval`, and
// rejects duplicate keys in an object literal. Everything else is left to
// codegen or runtime.

use crate::ast::{Member, Node, NodeKind};
use crate::errors::EngineError;

const RESERVED: [&str; 3] = ["this", "arguments", "eval"];

pub fn check(script: &Node) -> Result<(), EngineError> {
    check_node(script)
}

fn reject_if_reserved(name: &str, node: &Node, action: &str) -> Result<(), EngineError> {
    if RESERVED.contains(&name) {
        return Err(EngineError::semantic(
            format!("cannot {} reserved identifier '{}'", action, name),
            node.pos,
        ));
    }
    Ok(())
}

fn check_params(params: &[String], node: &Node) -> Result<(), EngineError> {
    for p in params {
        reject_if_reserved(p, node, "use as a parameter name")?;
    }
    Ok(())
}

fn check_node(node: &Node) -> Result<(), EngineError> {
    match &node.kind {
        NodeKind::Script(stmts) | NodeKind::Block(stmts) => {
            for s in stmts {
                check_node(s)?;
            }
        }
        NodeKind::Var { name, init } | NodeKind::Const { name, init } => {
            reject_if_reserved(name, node, "declare")?;
            if let Some(init) = init {
                check_node(init)?;
            }
        }
        NodeKind::If { cond, then_branch, else_branch } => {
            check_node(cond)?;
            check_node(then_branch)?;
            if let Some(e) = else_branch {
                check_node(e)?;
            }
        }
        NodeKind::For { init, cond, step, body } => {
            if let Some(n) = init { check_node(n)?; }
            if let Some(n) = cond { check_node(n)?; }
            if let Some(n) = step { check_node(n)?; }
            check_node(body)?;
        }
        NodeKind::ForEach { name, iterable, body } => {
            reject_if_reserved(name, node, "declare")?;
            check_node(iterable)?;
            check_node(body)?;
        }
        NodeKind::Return(expr) => {
            if let Some(e) = expr {
                check_node(e)?;
            }
        }
        NodeKind::Function { params, body, .. } => {
            check_params(params, node)?;
            check_node(body)?;
        }
        NodeKind::Assignment { target, value, .. } => {
            check_assignment_target(target)?;
            check_node(value)?;
        }
        NodeKind::FnCall { callee, args } => {
            check_node(callee)?;
            for a in args {
                check_node(a)?;
            }
        }
        NodeKind::Literal(_) => {}
        NodeKind::Identifier(_) => {}
        NodeKind::ArrayLit(items) => {
            for i in items {
                check_node(i)?;
            }
        }
        NodeKind::ObjectLit(props) => {
            let mut seen = std::collections::HashSet::new();
            for p in props {
                if !seen.insert(p.name.as_str()) {
                    return Err(EngineError::semantic(
                        format!("duplicate key '{}' in object literal", p.name),
                        node.pos,
                    ));
                }
                check_node(&p.value)?;
            }
        }
        NodeKind::ArrayAccess { base, index } => {
            check_node(base)?;
            check_node(index)?;
        }
        NodeKind::MemberAccess { base, .. } => check_node(base)?,
        NodeKind::Conditional { cond, then_expr, else_expr } => {
            check_node(cond)?;
            check_node(then_expr)?;
            check_node(else_expr)?;
        }
        NodeKind::BinaryOp { left, right, .. } => {
            check_node(left)?;
            check_node(right)?;
        }
        NodeKind::PrefixOp { op, operand } => {
            if matches!(op, crate::ast::PrefixOp::Inc | crate::ast::PrefixOp::Dec) {
                check_mutate_target(operand)?;
            }
            check_node(operand)?;
        }
        NodeKind::PostfixOp { operand, .. } => {
            check_mutate_target(operand)?;
            check_node(operand)?;
        }
        NodeKind::Actor { params, members, .. } => {
            check_params(params, node)?;
            for m in members {
                check_member(m)?;
            }
        }
        NodeKind::Connect { output, input } => {
            check_node(output)?;
            check_node(input)?;
        }
        NodeKind::Input { params, body, .. } => {
            check_params(params, node)?;
            check_node(body)?;
        }
        NodeKind::Output { .. } => {}
        NodeKind::Class { params, extends, members, .. } => {
            check_params(params, node)?;
            if let Some(e) = extends {
                for a in &e.args {
                    check_node(a)?;
                }
            }
            for m in members {
                check_member(m)?;
            }
        }
        NodeKind::Extends(_) => {}
        NodeKind::Export(inner) => check_node(inner)?,
        NodeKind::Import(_) => {}
    }
    Ok(())
}

fn check_member(member: &Member) -> Result<(), EngineError> {
    match member {
        Member::Var { init: Some(init), .. } => check_node(init),
        Member::Var { init: None, .. } => Ok(()),
        Member::Method { body, .. } | Member::Input { body, .. } => check_node(body),
        Member::Output { .. } => Ok(()),
        Member::Connect { output, input } => {
            check_node(output)?;
            check_node(input)
        }
    }
}

fn check_assignment_target(target: &Node) -> Result<(), EngineError> {
    if let NodeKind::Identifier(name) = &target.kind {
        reject_if_reserved(name, target, "assign to")?;
    }
    check_node(target)
}

fn check_mutate_target(target: &Node) -> Result<(), EngineError> {
    if let NodeKind::Identifier(name) = &target.kind {
        reject_if_reserved(name, target, "mutate")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;

    #[test]
    fn rejects_this_as_declaration() {
        let ast = parse_source("var this=1").unwrap();
        let err = check(&ast).unwrap_err();
        assert_eq!(err.kind, crate::errors::ErrorKind::SemanticError);
    }

    #[test]
    fn rejects_eval_as_parameter() {
        let ast = parse_source("function f(eval){return eval}").unwrap();
        assert!(check(&ast).is_err());
    }

    #[test]
    fn rejects_arguments_assignment() {
        let ast = parse_source("arguments = 1").unwrap();
        assert!(check(&ast).is_err());
    }

    #[test]
    fn rejects_duplicate_object_keys() {
        let ast = parse_source("var o = {a:1,a:2}").unwrap();
        assert!(check(&ast).is_err());
    }

    #[test]
    fn accepts_ordinary_program() {
        let ast = parse_source("var x=1; x=x+2; x").unwrap();
        assert!(check(&ast).is_ok());
    }
}
