// File: src/compiler.rs
//
// AST → Routine code generator (spec §4.5). Every compiled `Block` is
// self-contained: it always leaves exactly one net value on the operand
// stack above whatever was there on entry (statement results are popped
// between statements; locals declared within a block are unwound — via a
// SWAP/POP pair per local — before the block's own result surfaces), so an
// `If`, `For`, function body, or the top-level `Script` can all treat
// "compile a block" identically regardless of nesting.
//
// Free identifiers (anything that isn't a local, a parameter, or `this`)
// resolve against the VM's current-globals register. There is no bytecode
// register for that, so codegen routes through it the same way operators
// do: a zero-argument call to the `@globals` primitive (registered by
// `builtins.rs`, resolved specially by the VM since it needs no prior
// environment reference) returns it as an ordinary `Value::Object`, and the
// normal `RD_FIELD`/`WR_FIELD` opcodes take it from there.

use std::rc::Rc;

use crate::ast::{BinOp, Extends, Member, Node, NodeKind, ObjectProp, PostfixOp, PrefixOp};
use crate::bytecode::{Op, Routine};
use crate::errors::EngineError;
use crate::position::{CodeMap, SourcePos, VmPos};
use crate::value::Value;

/// Shared state across every routine compiled for one program: the routine
/// id counter and the single CodeMap every nested routine's instructions
/// are recorded into (spec §3 "CodeMap").
struct CodegenCtx {
    code_map: CodeMap,
    next_id: usize,
}

impl CodegenCtx {
    fn new() -> Self {
        CodegenCtx { code_map: CodeMap::new(), next_id: 0 }
    }

    fn alloc_id(&mut self) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeKind {
    Function,
    Block,
}

struct Scope {
    kind: ScopeKind,
    locals: Vec<(String, bool)>,
    depth_after: Vec<usize>,
}

/// Compiles one routine (the top-level script, or a nested function/method/
/// endpoint body).
struct Compiler<'a> {
    ctx: &'a mut CodegenCtx,
    routine: Routine,
    current_block: usize,
    stack_size: i32,
    scopes: Vec<Scope>,
    pos: SourcePos,
}

pub fn compile_program(script: &Node) -> Result<(Routine, CodeMap), EngineError> {
    let mut ctx = CodegenCtx::new();
    let routine = {
        let mut compiler = Compiler::new(&mut ctx, None);
        compiler.compile_script(script)?;
        compiler.finish()
    };
    Ok((routine, ctx.code_map))
}

impl<'a> Compiler<'a> {
    fn new(ctx: &'a mut CodegenCtx, name: Option<String>) -> Self {
        let mut routine = Routine::new();
        routine.id = ctx.alloc_id();
        routine.name = name;
        Compiler { ctx, routine, current_block: 0, stack_size: 0, scopes: Vec::new(), pos: SourcePos::unknown() }
    }

    fn finish(self) -> Routine {
        self.routine
    }

    fn err(&self, message: impl Into<String>) -> EngineError {
        EngineError::codegen(message, self.pos)
    }

    fn emit(&mut self, op: Op) -> Result<(), EngineError> {
        let offset = {
            let block = &mut self.routine.blocks[self.current_block];
            block.emit(op).map_err(|e| EngineError::codegen(e, self.pos))?
        };
        self.ctx.code_map.insert(VmPos::new(self.routine.id, self.current_block, offset), self.pos);
        self.stack_size += op.stack_delta();
        Ok(())
    }

    fn new_block(&mut self) -> usize {
        self.routine.add_block()
    }

    fn intern(&mut self, value: Value) -> Result<u16, EngineError> {
        self.routine.intern_constant(value).map_err(|e| self.err(e))
    }

    fn push_const(&mut self, value: Value) -> Result<(), EngineError> {
        let k = self.intern(value)?;
        self.emit(Op::PushC(k))
    }

    fn push_null(&mut self) -> Result<(), EngineError> {
        self.push_const(Value::Null)
    }

    // === Scopes & locals ===

    fn push_scope(&mut self, kind: ScopeKind) {
        self.scopes.push(Scope { kind, locals: Vec::new(), depth_after: Vec::new() });
    }

    fn declare_local(&mut self, name: &str, is_const: bool) {
        let depth = self.stack_size as usize;
        let scope = self.scopes.last_mut().expect("declare_local outside any scope");
        scope.locals.push((name.to_string(), is_const));
        scope.depth_after.push(depth);
    }

    /// Looks up `name` in the innermost enclosing scopes, stopping at the
    /// nearest function boundary (locals do not cross into an outer
    /// function's frame — that frame belongs to a different routine).
    fn resolve_local(&self, name: &str) -> Option<(usize, bool)> {
        for scope in self.scopes.iter().rev() {
            for (i, (n, is_const)) in scope.locals.iter().enumerate() {
                if n == name {
                    return Some((scope.depth_after[i], *is_const));
                }
            }
            if scope.kind == ScopeKind::Function {
                break;
            }
        }
        None
    }

    /// Pops this scope, removing its locals from the stack while preserving
    /// whatever is currently on top (the block's result) via a SWAP/POP per
    /// local (spec §4.5 "locals declared within are removed with POPs").
    fn pop_scope(&mut self) -> Result<(), EngineError> {
        let scope = self.scopes.pop().expect("pop_scope with no active scope");
        for _ in scope.locals.iter().rev() {
            self.emit(Op::Swap)?;
            self.emit(Op::Pop)?;
        }
        Ok(())
    }

    /// Used only when the routine is already ending (return/frame-teardown
    /// handles local cleanup), so no SWAP/POP sequence is emitted.
    fn pop_scope_no_emit(&mut self) {
        self.scopes.pop();
    }

    // === Global (environment) access, via the `@globals` primitive ===

    fn push_globals_env(&mut self) -> Result<(), EngineError> {
        // `@globals` is always resolvable directly off the VM's
        // current-globals register without a prior environment reference —
        // the VM special-cases this one name (see vm.rs `resolve_primitive`).
        self.push_const(Value::str("@globals"))?;
        self.push_null()?; // this
        self.emit(Op::Swap)?;
        self.emit(Op::Call(1))
    }

    fn compile_global_read(&mut self, name: &str) -> Result<(), EngineError> {
        self.push_globals_env()?;
        self.push_const(Value::str(name))?;
        self.emit(Op::RdField)
    }

    // === Statements ===

    fn compile_script(&mut self, script: &Node) -> Result<(), EngineError> {
        self.pos = script.pos;
        if let NodeKind::Script(stmts) = &script.kind {
            self.push_scope(ScopeKind::Function);
            self.compile_stmt_sequence(stmts)?;
            self.pop_scope()?;
        } else {
            return Err(self.err("expected a script node at the program root"));
        }
        Ok(())
    }

    fn compile_stmt_sequence(&mut self, stmts: &[Node]) -> Result<(), EngineError> {
        if stmts.is_empty() {
            return self.push_null();
        }
        for (i, stmt) in stmts.iter().enumerate() {
            let is_last = i == stmts.len() - 1;
            self.compile_top_statement(stmt, is_last)?;
        }
        Ok(())
    }

    fn compile_block_node(&mut self, node: &Node) -> Result<(), EngineError> {
        self.pos = node.pos;
        match &node.kind {
            NodeKind::Block(stmts) => {
                self.push_scope(ScopeKind::Block);
                self.compile_stmt_sequence(stmts)?;
                self.pop_scope()
            }
            _ => {
                self.push_scope(ScopeKind::Block);
                self.compile_top_statement(node, true)?;
                self.pop_scope()
            }
        }
    }

    fn compile_top_statement(&mut self, stmt: &Node, is_last: bool) -> Result<(), EngineError> {
        self.pos = stmt.pos;
        match &stmt.kind {
            NodeKind::Var { name, init } => {
                self.compile_var_like(name, init.as_deref(), false, stmt.pos)?;
                if is_last {
                    self.push_null()?;
                }
            }
            NodeKind::Const { name, init } => {
                self.compile_var_like(name, init.as_deref(), true, stmt.pos)?;
                if is_last {
                    self.push_null()?;
                }
            }
            NodeKind::Function { name: Some(fn_name), params, body } => {
                self.compile_function_literal(None, params, body)?;
                self.declare_local(fn_name, true);
                if is_last {
                    self.push_null()?;
                }
            }
            NodeKind::Class { .. } => {
                self.compile_class(stmt)?;
                if is_last {
                    self.push_null()?;
                }
            }
            NodeKind::Actor { .. } => {
                self.compile_actor(stmt)?;
                if is_last {
                    self.push_null()?;
                }
            }
            NodeKind::Export(inner) => {
                self.compile_export(inner)?;
                if is_last {
                    self.push_null()?;
                }
            }
            NodeKind::Import(path) => {
                self.compile_import(path)?;
                if is_last {
                    self.push_null()?;
                }
            }
            _ => {
                self.compile_statement_value(stmt)?;
                if !is_last {
                    self.emit(Op::Pop)?;
                }
            }
        }
        Ok(())
    }

    /// Statements that always leave exactly one value (If/For/ForEach/
    /// Return/expression statements/bare function expressions).
    fn compile_statement_value(&mut self, stmt: &Node) -> Result<(), EngineError> {
        self.pos = stmt.pos;
        match &stmt.kind {
            NodeKind::If { cond, then_branch, else_branch } => {
                self.compile_if(cond, then_branch, else_branch.as_deref())
            }
            NodeKind::For { init, cond, step, body } => {
                self.compile_for(init.as_deref(), cond.as_deref(), step.as_deref(), body)
            }
            NodeKind::ForEach { name, iterable, body } => self.compile_for_each(name, iterable, body),
            NodeKind::Return(expr) => self.compile_return(expr.as_deref()),
            _ => self.compile_expression(stmt),
        }
    }

    fn compile_var_like(
        &mut self,
        name: &str,
        init: Option<&Node>,
        is_const: bool,
        pos: SourcePos,
    ) -> Result<(), EngineError> {
        self.pos = pos;
        let is_module_scope = self.scopes.len() <= 1;
        if let Some(expr) = init {
            self.compile_expression(expr)?;
        } else {
            self.push_null()?;
        }
        if is_module_scope {
            self.store_global(name, is_const)?;
            self.emit(Op::Pop)?;
        } else {
            self.declare_local(name, is_const);
        }
        Ok(())
    }

    /// Consumes the value already on top of stack and writes it to the
    /// named global, leaving the value on top (assignment-as-expression).
    fn store_global(&mut self, name: &str, is_const_decl: bool) -> Result<(), EngineError> {
        // stack: [value]
        self.push_globals_env()?; // [value, env]
        self.push_const(Value::str(name))?; // [value, env, name]
        self.emit(Op::Cp(2))?; // [value, env, name, value]
        if is_const_decl {
            self.emit(Op::NewConstField) // consumes env,name leaves value: [value, value]
        } else {
            self.emit(Op::WrField)
        }?;
        // stack now: [value, value] -- the original copy is discarded, the
        // freshly written-back value remains as the expression's result.
        self.emit(Op::Pop)
    }

    fn compile_if(
        &mut self,
        cond: &Node,
        then_branch: &Node,
        else_branch: Option<&Node>,
    ) -> Result<(), EngineError> {
        self.compile_expression(cond)?;
        let cond_exit = self.current_block;
        let then_entry = self.new_block();
        self.current_block = then_entry;
        self.stack_size -= 1; // condition consumed by the branch test
        self.compile_block_node(then_branch)?;
        let then_exit = self.current_block;
        let stack_after_then = self.stack_size;

        let else_entry = self.new_block();
        self.current_block = else_entry;
        self.stack_size = stack_after_then - 1;
        if let Some(else_node) = else_branch {
            self.compile_block_node(else_node)?;
        } else {
            self.push_null()?;
        }
        let else_exit = self.current_block;

        let merge = self.new_block();
        self.routine.blocks[cond_exit].next_false = else_entry as isize;
        self.routine.blocks[cond_exit].next_true = then_entry as isize;
        self.routine.blocks[then_exit].set_unconditional(merge as isize);
        self.routine.blocks[else_exit].set_unconditional(merge as isize);
        self.current_block = merge;
        Ok(())
    }

    fn compile_for(
        &mut self,
        init: Option<&Node>,
        cond: Option<&Node>,
        step: Option<&Node>,
        body: &Node,
    ) -> Result<(), EngineError> {
        self.push_scope(ScopeKind::Block);
        if let Some(init_node) = init {
            match &init_node.kind {
                NodeKind::Var { name, init } => self.compile_var_like(name, init.as_deref(), false, init_node.pos)?,
                NodeKind::Const { name, init } => self.compile_var_like(name, init.as_deref(), true, init_node.pos)?,
                _ => {
                    self.compile_expression(init_node)?;
                    self.emit(Op::Pop)?;
                }
            }
        }
        let cond_block = self.new_block();
        self.routine.blocks[self.current_block].set_unconditional(cond_block as isize);
        self.current_block = cond_block;

        if let Some(cond_node) = cond {
            self.compile_expression(cond_node)?;
        } else {
            self.push_const(Value::Bool(true))?;
        }
        let cond_exit = self.current_block;
        self.stack_size -= 1;

        let body_entry = self.new_block();
        self.current_block = body_entry;
        self.compile_block_node(body)?;
        self.emit(Op::Pop)?;
        if let Some(step_node) = step {
            self.compile_expression(step_node)?;
            self.emit(Op::Pop)?;
        }
        let body_exit = self.current_block;
        self.routine.blocks[body_exit].set_unconditional(cond_block as isize);

        let after = self.new_block();
        self.routine.blocks[cond_exit].next_false = after as isize;
        self.routine.blocks[cond_exit].next_true = body_entry as isize;
        self.current_block = after;
        self.pop_scope()?;
        self.push_null()
    }

    /// `for (id in expr) body`, lowered via the iterator protocol
    /// (`head()`/`tail()`) per §9 Open Question 3.
    fn compile_for_each(&mut self, name: &str, iterable: &Node, body: &Node) -> Result<(), EngineError> {
        self.push_scope(ScopeKind::Block);
        self.compile_expression(iterable)?;
        self.declare_local("@iter", false);

        let cond_block = self.new_block();
        self.routine.blocks[self.current_block].set_unconditional(cond_block as isize);
        self.current_block = cond_block;

        self.push_globals_env()?;
        self.push_const(Value::str("@notNull"))?;
        self.emit(Op::RdField)?;
        self.push_null()?;
        self.emit(Op::Swap)?;
        let (iter_depth, _) = self.resolve_local("@iter").unwrap();
        let offset = self.stack_size as usize - iter_depth;
        self.emit(Op::Cp(offset as u16))?;
        self.emit(Op::Swap)?;
        self.emit(Op::Call(2))?;
        let cond_exit = self.current_block;
        self.stack_size -= 1;

        let body_entry = self.new_block();
        self.current_block = body_entry;
        self.push_scope(ScopeKind::Block);
        let (iter_depth, _) = self.resolve_local("@iter").unwrap();
        let offset = self.stack_size as usize - iter_depth;
        self.emit(Op::Cp(offset as u16))?;
        self.push_const(Value::str("head"))?;
        self.emit(Op::RdField)?;
        self.push_null()?;
        self.emit(Op::Swap)?;
        self.emit(Op::Call(1))?;
        self.declare_local(name, false);
        self.compile_block_node(body)?;
        self.emit(Op::Pop)?;
        self.pop_scope()?;

        let (iter_depth, _) = self.resolve_local("@iter").unwrap();
        let offset = self.stack_size as usize - iter_depth;
        self.emit(Op::Cp(offset as u16))?;
        self.push_const(Value::str("tail"))?;
        self.emit(Op::RdField)?;
        self.push_null()?;
        self.emit(Op::Swap)?;
        self.emit(Op::Call(1))?;
        let (iter_depth, _) = self.resolve_local("@iter").unwrap();
        let write_offset = self.stack_size as usize - iter_depth;
        self.emit(Op::Wr(write_offset as u16))?;
        self.emit(Op::Pop)?;
        let body_exit = self.current_block;
        self.routine.blocks[body_exit].set_unconditional(cond_block as isize);

        let after = self.new_block();
        self.routine.blocks[cond_exit].next_false = after as isize;
        self.routine.blocks[cond_exit].next_true = body_entry as isize;
        self.current_block = after;
        self.pop_scope()?;
        self.push_null()
    }

    fn compile_return(&mut self, expr: Option<&Node>) -> Result<(), EngineError> {
        if let Some(e) = expr {
            self.compile_expression(e)?;
        } else {
            self.push_null()?;
        }
        self.routine.blocks[self.current_block].next_false = -1;
        self.routine.blocks[self.current_block].next_true = -1;
        let after = self.new_block();
        self.current_block = after;
        // Unreachable code after `return` still needs a well-formed block
        // to keep the static stack-size bookkeeping balanced.
        self.stack_size = 0;
        self.push_null()
    }

    fn compile_export(&mut self, inner: &Node) -> Result<(), EngineError> {
        match &inner.kind {
            NodeKind::Var { name, init } | NodeKind::Const { name, init } => {
                let is_const = matches!(inner.kind, NodeKind::Const { .. });
                self.compile_var_like(name, init.as_deref(), is_const, inner.pos)?;
                self.mark_exported(name)
            }
            _ => self.compile_top_statement(inner, true),
        }
    }

    /// Flags `name` as exported in the globals object's field slots (spec
    /// §6 "export merges only flagged symbols"). Stack-neutral: pushes and
    /// pops only what it itself pushes.
    fn mark_exported(&mut self, name: &str) -> Result<(), EngineError> {
        self.push_globals_env()?; // [env]
        self.push_const(Value::str("@exportSymbol"))?; // [env, fn_name]
        self.emit(Op::RdField)?; // [export_fn]
        self.push_null()?; // [export_fn, Null]
        self.emit(Op::Swap)?; // [Null, export_fn]
        self.push_globals_env()?; // [Null, export_fn, env2]
        self.emit(Op::Swap)?; // [Null, env2, export_fn]
        self.push_const(Value::str(name.to_string()))?; // [Null, env2, export_fn, name]
        self.emit(Op::Swap)?; // [Null, env2, name, export_fn]
        self.emit(Op::Call(3))?; // [result]
        self.emit(Op::Pop)
    }

    fn compile_import(&mut self, path: &str) -> Result<(), EngineError> {
        self.push_globals_env()?;
        self.push_const(Value::str("@importModule"))?;
        self.emit(Op::RdField)?;
        self.push_null()?;
        self.emit(Op::Swap)?;
        self.push_const(Value::str(path))?;
        self.emit(Op::Swap)?;
        self.emit(Op::Call(2))?;
        self.emit(Op::Pop)
    }

    // === Expressions ===

    fn compile_expression(&mut self, node: &Node) -> Result<(), EngineError> {
        self.pos = node.pos;
        match &node.kind {
            NodeKind::Literal(v) => self.push_const(v.clone()),
            NodeKind::Identifier(name) => self.compile_identifier_read(name),
            NodeKind::ArrayLit(items) => self.compile_array_literal(items),
            NodeKind::ObjectLit(props) => self.compile_object_literal(props),
            NodeKind::ArrayAccess { base, index } => {
                self.compile_expression(base)?;
                self.compile_expression(index)?;
                self.emit(Op::RdIndex)
            }
            NodeKind::MemberAccess { base, name } => {
                self.compile_expression(base)?;
                self.push_const(Value::str(name.clone()))?;
                self.emit(Op::RdField)
            }
            NodeKind::Conditional { cond, then_expr, else_expr } => self.compile_conditional(cond, then_expr, else_expr),
            NodeKind::BinaryOp { op, left, right } => self.compile_binary(*op, left, right),
            NodeKind::PrefixOp { op, operand } => self.compile_prefix(*op, operand),
            NodeKind::PostfixOp { op, operand } => self.compile_postfix(*op, operand),
            NodeKind::Assignment { target, compound, value } => self.compile_assignment(target, *compound, value),
            NodeKind::FnCall { callee, args } => self.compile_call(callee, args),
            NodeKind::Function { name, params, body } => self.compile_function_literal(name.clone(), params, body),
            NodeKind::Block(_) => self.compile_block_node(node),
            _ => self.compile_statement_value(node),
        }
    }

    fn compile_identifier_read(&mut self, name: &str) -> Result<(), EngineError> {
        if name == "this" {
            return self.emit(Op::PushThis);
        }
        if let Some((depth, _)) = self.resolve_local(name) {
            let offset = self.stack_size as usize - depth;
            return self.emit(Op::Cp(offset as u16));
        }
        self.compile_global_read(name)
    }

    fn compile_array_literal(&mut self, items: &[Node]) -> Result<(), EngineError> {
        self.push_globals_env()?;
        self.push_const(Value::str("@newArray"))?;
        self.emit(Op::RdField)?;
        self.push_null()?;
        self.emit(Op::Swap)?;
        for item in items {
            self.compile_expression(item)?;
            self.emit(Op::Swap)?;
        }
        self.emit(Op::Call((items.len() + 1) as u16))
    }

    fn compile_object_literal(&mut self, props: &[ObjectProp]) -> Result<(), EngineError> {
        self.push_globals_env()?;
        self.push_const(Value::str("@newObject"))?;
        self.emit(Op::RdField)?;
        self.push_null()?;
        self.emit(Op::Swap)?;
        self.emit(Op::Call(1))?;
        self.push_scope(ScopeKind::Block);
        self.declare_local("@obj_scratch", false);
        for prop in props {
            let (depth, _) = self.resolve_local("@obj_scratch").unwrap();
            let offset = self.stack_size as usize - depth;
            self.emit(Op::Cp(offset as u16))?;
            self.push_const(Value::str(prop.name.clone()))?;
            self.compile_expression(&prop.value)?;
            if prop.is_const {
                self.emit(Op::NewConstField)?;
            } else {
                self.emit(Op::WrField)?;
            }
            self.emit(Op::Pop)?;
        }
        self.pop_scope()
    }

    fn compile_conditional(&mut self, cond: &Node, then_expr: &Node, else_expr: &Node) -> Result<(), EngineError> {
        self.compile_expression(cond)?;
        let cond_exit = self.current_block;
        let then_entry = self.new_block();
        self.current_block = then_entry;
        self.stack_size -= 1;
        self.compile_expression(then_expr)?;
        let then_exit = self.current_block;
        let stack_after_then = self.stack_size;

        let else_entry = self.new_block();
        self.current_block = else_entry;
        self.stack_size = stack_after_then - 1;
        self.compile_expression(else_expr)?;
        let else_exit = self.current_block;

        let merge = self.new_block();
        self.routine.blocks[cond_exit].next_false = else_entry as isize;
        self.routine.blocks[cond_exit].next_true = then_entry as isize;
        self.routine.blocks[then_exit].set_unconditional(merge as isize);
        self.routine.blocks[else_exit].set_unconditional(merge as isize);
        self.current_block = merge;
        Ok(())
    }

    fn compile_binary(&mut self, op: BinOp, left: &Node, right: &Node) -> Result<(), EngineError> {
        match op {
            BinOp::AndAnd => self.compile_short_circuit(left, right, true),
            BinOp::OrOr => self.compile_short_circuit(left, right, false),
            _ => {
                self.push_globals_env()?;
                self.push_const(Value::str(op.primitive_name()))?;
                self.emit(Op::RdField)?;
                self.push_null()?;
                self.emit(Op::Swap)?;
                self.compile_expression(left)?;
                self.emit(Op::Swap)?;
                self.compile_expression(right)?;
                self.emit(Op::Swap)?;
                self.emit(Op::Call(3))
            }
        }
    }

    /// `&&`/`||`: evaluate LHS, duplicate, branch on truthiness — one arm
    /// keeps the duplicated LHS, the other pops it and evaluates RHS.
    fn compile_short_circuit(&mut self, left: &Node, right: &Node, is_and: bool) -> Result<(), EngineError> {
        self.compile_expression(left)?;
        self.emit(Op::Cp(0))?;
        let cond_exit = self.current_block;
        self.stack_size -= 1;

        let rhs_entry = self.new_block();
        self.current_block = rhs_entry;
        self.emit(Op::Pop)?;
        self.compile_expression(right)?;
        let rhs_exit = self.current_block;

        let keep_entry = self.new_block();
        self.current_block = keep_entry;
        let keep_exit = keep_entry;

        let merge = self.new_block();
        if is_and {
            self.routine.blocks[cond_exit].next_false = keep_entry as isize;
            self.routine.blocks[cond_exit].next_true = rhs_entry as isize;
        } else {
            self.routine.blocks[cond_exit].next_false = rhs_entry as isize;
            self.routine.blocks[cond_exit].next_true = keep_entry as isize;
        }
        self.routine.blocks[rhs_exit].set_unconditional(merge as isize);
        self.routine.blocks[keep_exit].set_unconditional(merge as isize);
        self.current_block = merge;
        Ok(())
    }

    fn compile_prefix(&mut self, op: PrefixOp, operand: &Node) -> Result<(), EngineError> {
        match op {
            PrefixOp::Inc | PrefixOp::Dec => {
                let bin = if op == PrefixOp::Inc { BinOp::Add } else { BinOp::Sub };
                let one = Node::new(operand.pos, NodeKind::Literal(Value::Number(1.0)));
                let assign = Node::new(
                    operand.pos,
                    NodeKind::Assignment { target: Box::new(operand.clone()), compound: Some(bin), value: Box::new(one) },
                );
                self.compile_expression(&assign)
            }
            PrefixOp::Plus => self.compile_unary_primitive("@toNumber", operand),
            PrefixOp::Neg => self.compile_unary_primitive("@neg", operand),
            PrefixOp::BitNot => self.compile_unary_primitive("@bitNot", operand),
            PrefixOp::Not => self.compile_unary_primitive("@not", operand),
        }
    }

    fn compile_unary_primitive(&mut self, name: &str, operand: &Node) -> Result<(), EngineError> {
        self.push_globals_env()?;
        self.push_const(Value::str(name))?;
        self.emit(Op::RdField)?;
        self.push_null()?;
        self.emit(Op::Swap)?;
        self.compile_expression(operand)?;
        self.emit(Op::Swap)?;
        self.emit(Op::Call(2))
    }

    /// Postfix `++`/`--`: read the old value through `@toNumber` (pure,
    /// coerces without mutating — used here only to normalize and keep a
    /// copy), then perform the real prefix mutation and discard its result.
    fn compile_postfix(&mut self, op: PostfixOp, operand: &Node) -> Result<(), EngineError> {
        let to_number = "@toNumber";
        self.push_globals_env()?;
        self.push_const(Value::str(to_number))?;
        self.emit(Op::RdField)?;
        self.push_null()?;
        self.emit(Op::Swap)?;
        self.compile_expression(operand)?;
        self.emit(Op::Swap)?;
        self.emit(Op::Call(2))?;
        let prefix_kind = if op == PostfixOp::Inc { PrefixOp::Inc } else { PrefixOp::Dec };
        self.compile_prefix(prefix_kind, operand)?;
        self.emit(Op::Pop)
    }

    fn compile_assignment(&mut self, target: &Node, compound: Option<BinOp>, value: &Node) -> Result<(), EngineError> {
        match &target.kind {
            NodeKind::Identifier(name) => {
                if let Some(op) = compound {
                    self.compile_identifier_read(name)?;
                    self.compile_binop_call(op, value)?;
                } else {
                    self.compile_expression(value)?;
                }
                self.compile_identifier_write(name)
            }
            NodeKind::MemberAccess { base, name } => {
                self.compile_expression(base)?;
                self.push_const(Value::str(name.clone()))?;
                if let Some(op) = compound {
                    self.emit(Op::Cp(1))?;
                    self.emit(Op::Cp(1))?;
                    self.emit(Op::RdField)?;
                    self.compile_binop_call(op, value)?;
                } else {
                    self.compile_expression(value)?;
                }
                self.emit(Op::WrField)
            }
            NodeKind::ArrayAccess { base, index } => {
                self.compile_expression(base)?;
                self.compile_expression(index)?;
                if let Some(op) = compound {
                    self.emit(Op::Cp(1))?;
                    self.emit(Op::Cp(1))?;
                    self.emit(Op::RdIndex)?;
                    self.compile_binop_call(op, value)?;
                } else {
                    self.compile_expression(value)?;
                }
                self.emit(Op::WrIndex)
            }
            _ => Err(self.err("invalid assignment target")),
        }
    }

    /// Given `lhs` already on top of stack, pushes the primitive call
    /// `lhs <op> value`, leaving the result on top.
    fn compile_binop_call(&mut self, op: BinOp, rhs: &Node) -> Result<(), EngineError> {
        // Entry: [..., lhs]. Everything below `lhs` (e.g. a buffered
        // `base`/`name` pair for a compound field assignment) is left
        // completely untouched — every offset used here stays within the
        // frame this call builds on top of `lhs`.
        self.push_globals_env()?; // [lhs, env]
        self.push_const(Value::str(op.primitive_name()))?; // [lhs, env, name]
        self.emit(Op::RdField)?; // [lhs, func]
        self.push_null()?; // [lhs, func, Null]
        self.emit(Op::Swap)?; // [lhs, Null, func]
        self.emit(Op::Cp(2))?; // [lhs, Null, func, lhs_copy]
        self.emit(Op::Swap)?; // [lhs, Null, lhs_copy, func]
        self.compile_expression(rhs)?; // [lhs, Null, lhs_copy, func, rhs]
        self.emit(Op::Swap)?; // [lhs, Null, lhs_copy, rhs, func]
        self.emit(Op::Call(3))?; // [lhs, result]
        self.emit(Op::Swap)?; // [result, lhs]
        self.emit(Op::Pop) // [result]
    }

    /// Writes the already-computed top-of-stack value to `name`, leaving it
    /// on top (assignment is an expression).
    fn compile_identifier_write(&mut self, name: &str) -> Result<(), EngineError> {
        if name == "this" {
            self.emit(Op::WrThisp)?;
            return self.push_null();
        }
        if let Some((depth, is_const)) = self.resolve_local(name) {
            if is_const {
                return Err(self.err(format!("cannot assign to const '{}'", name)));
            }
            let offset = self.stack_size as usize - depth;
            return self.emit(Op::Wr(offset as u16));
        }
        self.store_global(name, false)
    }

    fn compile_call(&mut self, callee: &Node, args: &[Node]) -> Result<(), EngineError> {
        match &callee.kind {
            NodeKind::MemberAccess { base, name } => {
                self.compile_expression(base)?;
                self.push_const(Value::str(name.clone()))?;
                self.emit(Op::Cp(1))?;
                self.emit(Op::Cp(1))?;
                self.emit(Op::RdField)?;
                // stack: [base, name, func] -> drop the spare name, keeping
                // [base(=this), func] for the call below.
                self.emit(Op::Swap)?;
                self.emit(Op::Pop)?;
                for arg in args {
                    self.compile_expression(arg)?;
                    self.emit(Op::Swap)?;
                }
                self.emit(Op::Call((args.len() + 1) as u16))
            }
            NodeKind::ArrayAccess { base, index } => {
                self.compile_expression(base)?;
                self.compile_expression(index)?;
                self.emit(Op::Cp(1))?;
                self.emit(Op::Cp(1))?;
                self.emit(Op::RdIndex)?;
                self.emit(Op::Swap)?;
                self.emit(Op::Pop)?;
                for arg in args {
                    self.compile_expression(arg)?;
                    self.emit(Op::Swap)?;
                }
                self.emit(Op::Call((args.len() + 1) as u16))
            }
            _ => {
                self.push_null()?;
                self.compile_expression(callee)?;
                for arg in args {
                    self.compile_expression(arg)?;
                    self.emit(Op::Swap)?;
                }
                self.emit(Op::Call((args.len() + 1) as u16))
            }
        }
    }

    fn compile_function_literal(
        &mut self,
        name: Option<String>,
        params: &[String],
        body: &Node,
    ) -> Result<(), EngineError> {
        let routine = {
            let mut inner = Compiler::new(self.ctx, name.clone());
            inner.routine.arity = params.len();
            inner.pos = body.pos;
            inner.push_scope(ScopeKind::Function);
            for (i, param) in params.iter().enumerate() {
                inner.push_const(Value::Number(i as f64))?;
                inner.emit(Op::RdParam)?;
                inner.declare_local(param, false);
            }
            inner.compile_block_node(body)?;
            inner.routine.blocks[inner.current_block].set_unconditional(-1);
            inner.pop_scope_no_emit();
            inner.finish()
        };
        let fn_value = Value::routine_fn(name, params.len(), Rc::new(routine));
        self.push_const(fn_value)
    }

    // === Classes ===

    fn compile_class(&mut self, node: &Node) -> Result<(), EngineError> {
        let (name, params, extends, members) = match &node.kind {
            NodeKind::Class { name, params, extends, members } => (name, params, extends, members),
            _ => unreachable!(),
        };
        self.push_globals_env()?;
        self.push_const(Value::str("@makeClass"))?;
        self.emit(Op::RdField)?;
        self.push_null()?;
        self.emit(Op::Swap)?;
        self.push_const(Value::str(name.clone()))?;
        self.emit(Op::Swap)?;

        if let Some(ext) = extends {
            self.compile_extends_parent(ext)?;
        } else {
            self.push_null()?;
        }
        self.emit(Op::Swap)?;

        self.compile_constructor(params, members)?;
        self.emit(Op::Swap)?;

        let method_count = members.iter().filter(|m| matches!(m, Member::Method { .. })).count();
        for member in members {
            if let Member::Method { name: mname, params: mparams, body } = member {
                self.compile_function_literal(Some(mname.clone()), mparams, body)?;
                self.emit(Op::Swap)?;
                self.push_const(Value::str(mname.clone()))?;
                self.emit(Op::Swap)?;
            }
        }
        self.emit(Op::Call((method_count * 2 + 4) as u16))?;

        if self.scopes.len() <= 1 {
            self.store_global(name, true)?;
            self.emit(Op::Pop)?;
        } else {
            self.declare_local(name, true);
        }
        Ok(())
    }

    fn compile_extends_parent(&mut self, ext: &Extends) -> Result<(), EngineError> {
        self.compile_identifier_read(&ext.name)
    }

    /// A class's constructor binds constructor parameters as instance
    /// fields first, then runs each `var`/`const` member initializer
    /// against the new instance (`this`).
    fn compile_constructor(&mut self, params: &[String], members: &[Member]) -> Result<(), EngineError> {
        let routine = {
            let mut inner = Compiler::new(self.ctx, Some("<constructor>".to_string()));
            inner.routine.arity = params.len();
            inner.push_scope(ScopeKind::Function);
            for (i, param) in params.iter().enumerate() {
                inner.emit(Op::PushThis)?;
                inner.push_const(Value::str(param.clone()))?;
                inner.push_const(Value::Number(i as f64))?;
                inner.emit(Op::RdParam)?;
                inner.emit(Op::WrField)?;
                inner.emit(Op::Pop)?;
            }
            for member in members {
                if let Member::Var { name, is_const, init } = member {
                    inner.emit(Op::PushThis)?;
                    inner.push_const(Value::str(name.clone()))?;
                    if let Some(expr) = init {
                        inner.compile_expression(expr)?;
                    } else {
                        inner.push_null()?;
                    }
                    if *is_const {
                        inner.emit(Op::NewConstField)?;
                    } else {
                        inner.emit(Op::WrField)?;
                    }
                    inner.emit(Op::Pop)?;
                }
            }
            inner.emit(Op::PushThis)?;
            inner.routine.blocks[inner.current_block].set_unconditional(-1);
            inner.pop_scope_no_emit();
            inner.finish()
        };
        let fn_value = Value::routine_fn(Some("<constructor>".to_string()), params.len(), Rc::new(routine));
        self.push_const(fn_value)
    }

    // === Actors ===

    fn compile_actor(&mut self, node: &Node) -> Result<(), EngineError> {
        let (name, params, members) = match &node.kind {
            NodeKind::Actor { name, params, members } => (name, params, members),
            _ => unreachable!(),
        };
        self.push_globals_env()?;
        self.push_const(Value::str("@makeActorClass"))?;
        self.emit(Op::RdField)?;
        self.push_null()?;
        self.emit(Op::Swap)?;
        self.push_const(Value::str(name.clone()))?;
        self.emit(Op::Swap)?;
        self.compile_actor_body_fn(params, members)?;
        self.emit(Op::Swap)?;
        self.emit(Op::Call(3))?;

        if self.scopes.len() <= 1 {
            self.store_global(name, true)?;
            self.emit(Op::Pop)?;
        } else {
            self.declare_local(name, true);
        }
        Ok(())
    }

    /// Compiles the actor's elaboration routine: constructor-parameter
    /// binding, `var`/`const` initializers, input/output endpoint
    /// registration, and `connect` statements, run in declaration order
    /// against the new actor's own globals (`this`), matching §4.7
    /// "Creation".
    fn compile_actor_body_fn(&mut self, params: &[String], members: &[Member]) -> Result<(), EngineError> {
        let routine = {
            let mut inner = Compiler::new(self.ctx, Some("<actor-body>".to_string()));
            inner.routine.arity = params.len();
            inner.push_scope(ScopeKind::Function);
            for (i, param) in params.iter().enumerate() {
                inner.emit(Op::PushThis)?;
                inner.push_const(Value::str(param.clone()))?;
                inner.push_const(Value::Number(i as f64))?;
                inner.emit(Op::RdParam)?;
                inner.emit(Op::WrField)?;
                inner.emit(Op::Pop)?;
            }
            for member in members {
                match member {
                    Member::Var { name, is_const, init } => {
                        inner.emit(Op::PushThis)?;
                        inner.push_const(Value::str(name.clone()))?;
                        if let Some(expr) = init {
                            inner.compile_expression(expr)?;
                        } else {
                            inner.push_null()?;
                        }
                        if *is_const {
                            inner.emit(Op::NewConstField)?;
                        } else {
                            inner.emit(Op::WrField)?;
                        }
                        inner.emit(Op::Pop)?;
                    }
                    Member::Input { name, params: ep_params, body } => {
                        inner.emit(Op::PushThis)?;
                        inner.push_const(Value::str("@registerInput"))?;
                        inner.emit(Op::RdField)?;
                        inner.push_null()?;
                        inner.emit(Op::Swap)?;
                        inner.emit(Op::PushThis)?;
                        inner.emit(Op::Swap)?;
                        inner.push_const(Value::str(name.clone()))?;
                        inner.emit(Op::Swap)?;
                        inner.compile_function_literal(Some(name.clone()), ep_params, body)?;
                        inner.emit(Op::Swap)?;
                        inner.emit(Op::Call(4))?;
                        inner.emit(Op::Pop)?;
                    }
                    Member::Output { name } => {
                        inner.emit(Op::PushThis)?;
                        inner.push_const(Value::str("@registerOutput"))?;
                        inner.emit(Op::RdField)?;
                        inner.push_null()?;
                        inner.emit(Op::Swap)?;
                        inner.emit(Op::PushThis)?;
                        inner.emit(Op::Swap)?;
                        inner.push_const(Value::str(name.clone()))?;
                        inner.emit(Op::Swap)?;
                        inner.emit(Op::Call(3))?;
                        inner.emit(Op::Pop)?;
                    }
                    Member::Connect { output, input } => {
                        inner.emit(Op::PushThis)?;
                        inner.push_const(Value::str("@connect"))?;
                        inner.emit(Op::RdField)?;
                        inner.push_null()?;
                        inner.emit(Op::Swap)?;
                        inner.emit(Op::PushThis)?;
                        inner.emit(Op::Swap)?;
                        inner.compile_expression(output)?;
                        inner.emit(Op::Swap)?;
                        inner.compile_expression(input)?;
                        inner.emit(Op::Swap)?;
                        inner.emit(Op::Call(4))?;
                        inner.emit(Op::Pop)?;
                    }
                }
            }
            inner.push_null()?;
            inner.routine.blocks[inner.current_block].set_unconditional(-1);
            inner.pop_scope_no_emit();
            inner.finish()
        };
        let fn_value = Value::routine_fn(Some("<actor-body>".to_string()), params.len(), Rc::new(routine));
        self.push_const(fn_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;

    fn compile(src: &str) -> Routine {
        let ast = parse_source(src).unwrap();
        compile_program(&ast).unwrap().0
    }

    #[test]
    fn compiles_without_error_simple_arithmetic() {
        let routine = compile("var x=1; x=x+2; x");
        assert!(!routine.blocks.is_empty());
    }

    #[test]
    fn compiles_function_literal_as_constant() {
        let routine = compile("function f(a,b){return a*b} f(6,7)");
        assert!(routine.constants.iter().any(|c| matches!(c, Value::Function(_))));
    }

    #[test]
    fn compiles_for_loop_with_distinct_blocks() {
        let routine = compile("var s=''; for(var i=0;i<3;i=i+1) s=s+i; s");
        assert!(routine.blocks.len() > 1);
    }

    #[test]
    fn compiles_object_and_array_literals() {
        let routine = compile("var o={a:1,b:2}; o.a+o['b']");
        assert!(!routine.blocks.is_empty());
    }

    #[test]
    fn compiles_class_declaration() {
        let routine = compile("class C(x){ get(){return this.x} } new C(7).get()");
        assert!(!routine.blocks.is_empty());
    }

    #[test]
    fn compiles_actor_declaration() {
        let routine = compile("actor A(){ input @start(){ return 9 } } new A()");
        assert!(!routine.blocks.is_empty());
    }

    #[test]
    fn compiles_if_else_branches() {
        let routine = compile("var x=1; if (x>0) { x=x+1 } else { x=x-1 } x");
        assert!(routine.blocks.len() >= 4);
    }
}
