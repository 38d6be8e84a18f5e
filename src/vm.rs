// File: src/vm.rs
//
// Virtual Machine for executing compiled Routines (spec §4.6). A dense match
// over `Op` drives a single operand stack; call frames are plain Rust stack
// frames (via recursive `call_routine`), not a hand-rolled frame array, since
// nothing here needs to suspend mid-call — actor message dispatch (§4.7)
// suspends only *between* messages, never inside one.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::rc::Rc;

use crate::bytecode::{Op, Routine};
use crate::errors::EngineError;
use crate::module::ModuleLoader;
use crate::position::{SourcePos, VmPos};
use crate::position::CodeMap;
use crate::value::{NativeContext, Value};

/// One queued actor message: destination, endpoint name, argument array
/// (spec §4.7 "A message is `(destination_endpoint_ref, params_array)`").
pub struct PendingMessage {
    pub actor: Value,
    pub endpoint: String,
    pub args: Vec<Value>,
}

/// Calls nest as native Rust recursion; this bounds it well below a real
/// stack overflow so deep script recursion fails with a normal `RuntimeError`
/// instead of aborting the process.
const MAX_CALL_DEPTH: usize = 1024;

/// One in-progress call: which routine, which block is executing, where its
/// parameters begin on the operand stack, how many there are, and the
/// current `this` value (the "this-param register" of spec §4.6, captured at
/// frame-push time).
struct Frame {
    routine: Rc<Routine>,
    block: usize,
    base: usize,
    arity: usize,
    this: Value,
}

/// The bytecode interpreter. Owns the operand stack and the "current
/// globals" register that actor message dispatch and closure calls swap for
/// the duration of a call (spec §5 "the VM holds no implicit global mutable
/// state beyond the globals object and the current-globals pointer").
pub struct Vm {
    stack: Vec<Value>,
    frames: Vec<Frame>,
    globals: Value,
    code_map: CodeMap,
    current_pos: SourcePos,
    trace: Option<Box<dyn FnMut(VmPos)>>,
    /// Messages produced by calling an endpoint reference, drained between
    /// calls by the actor runtime (spec §4.7, §5 "suspension points: only
    /// between messages"). Calling an endpoint never runs the callee inline.
    pending: VecDeque<PendingMessage>,
    /// The actor whose message handler is currently executing, if any; used
    /// to set the `parent` of an actor instantiated mid-message (spec §4.7
    /// "Creation"). `None` at the top level and between messages.
    current_actor: Option<Value>,
    /// The shared, host-provided globals every freshly-loaded module starts
    /// from (spec §6 `create_default_globals`); defaults to this VM's own
    /// starting globals until `set_module_context` overrides it.
    primitives: Value,
    /// Directory `import "path"` resolves a relative path against — the
    /// directory of the module currently executing, if any (spec §6 "import
    /// resolves path relative to the importing module's directory").
    module_dir: Option<PathBuf>,
    /// Cross-module cache and circular-import guard (spec §6 "loads once"),
    /// shared with every module transitively imported from this VM.
    module_loader: Rc<RefCell<ModuleLoader>>,
}

impl Vm {
    pub fn new(globals: Value, code_map: CodeMap) -> Self {
        Vm {
            stack: Vec::new(),
            frames: Vec::new(),
            globals: globals.clone(),
            code_map,
            current_pos: SourcePos::unknown(),
            trace: None,
            pending: VecDeque::new(),
            current_actor: None,
            primitives: globals,
            module_dir: None,
            module_loader: Rc::new(RefCell::new(ModuleLoader::new())),
        }
    }

    /// Overrides the module-resolution context (spec §6 `evaluate(source,
    /// globals, module_path?)`): the directory relative imports resolve
    /// against, the shared loader cache to participate in, and the
    /// primitives fresh modules start from.
    pub fn set_module_context(
        &mut self,
        loader: Rc<RefCell<ModuleLoader>>,
        dir: Option<PathBuf>,
        primitives: Value,
    ) {
        self.module_loader = loader;
        self.module_dir = dir;
        self.primitives = primitives;
    }

    /// Pops the next queued message in FIFO order, if any.
    pub fn take_message(&mut self) -> Option<PendingMessage> {
        self.pending.pop_front()
    }

    pub fn enqueue_message(&mut self, actor: Value, endpoint: impl Into<String>, args: Vec<Value>) {
        self.pending.push_back(PendingMessage { actor, endpoint: endpoint.into(), args });
    }

    pub fn globals(&self) -> Value {
        self.globals.clone()
    }

    pub fn set_globals(&mut self, globals: Value) {
        self.globals = globals;
    }

    /// Installs an optional per-instruction trace hook (spec §4.6 "optional
    /// trace callback"); not used by the engine itself, a debugging knob for
    /// embedders.
    pub fn set_trace(&mut self, trace: Option<Box<dyn FnMut(VmPos)>>) {
        self.trace = trace;
    }

    /// Runs a routine to completion as the top-level script body (`this` is
    /// `Null`, no arguments): spec §6 `evaluate`/`evaluate_compiled`.
    pub fn run(&mut self, routine: Rc<Routine>) -> Result<Value, EngineError> {
        self.call_routine(routine, &[], Value::Null)
    }

    fn err(&self, message: impl Into<String>) -> EngineError {
        EngineError::runtime(message, self.current_pos)
    }

    fn pop(&mut self) -> Result<Value, EngineError> {
        self.stack.pop().ok_or_else(|| self.err("operand stack underflow"))
    }

    /// Executes `routine` as a fresh call: reserves its parameter area on the
    /// operand stack (padded/truncated to its declared arity), pushes a
    /// frame, and runs blocks until one terminates with successor `-1`.
    fn call_routine(&mut self, routine: Rc<Routine>, args: &[Value], this: Value) -> Result<Value, EngineError> {
        if self.frames.len() >= MAX_CALL_DEPTH {
            return Err(self.err("call stack exceeded maximum depth"));
        }
        let base = self.stack.len();
        let arity = routine.arity;
        for i in 0..arity {
            self.stack.push(args.get(i).cloned().unwrap_or(Value::Null));
        }
        self.frames.push(Frame { routine, block: 0, base, arity, this });

        let result = self.run_frame();

        match result {
            Ok(value) => {
                self.stack.truncate(base);
                self.frames.pop();
                Ok(value)
            }
            Err(e) => {
                self.stack.truncate(base);
                self.frames.pop();
                Err(e)
            }
        }
    }

    /// Runs the topmost frame's blocks until it terminates, returning its
    /// return value. Does not touch `frames`/`stack` cleanup — the caller
    /// (`call_routine`) owns that, so an error here still leaves a coherent
    /// stack for the caller to unwind.
    fn run_frame(&mut self) -> Result<Value, EngineError> {
        loop {
            let (routine, block_idx, base) = {
                let frame = self.frames.last().expect("run_frame called with no active frame");
                (frame.routine.clone(), frame.block, frame.base)
            };
            let routine_id = routine.id;
            let block = routine.blocks.get(block_idx).ok_or_else(|| self.err("branch to a non-existent block"))?;
            let ops: Vec<(usize, Op)> = block.iter_ops().collect();

            for (offset, op) in ops {
                self.current_pos = self.code_map.get(VmPos::new(routine_id, block_idx, offset));
                if let Some(trace) = &mut self.trace {
                    trace(VmPos::new(routine_id, block_idx, offset));
                }
                self.dispatch(op, base)?;
            }

            let (next_false, next_true) = {
                let block = routine.blocks.get(block_idx).unwrap();
                (block.next_false, block.next_true)
            };
            let next = if next_false == next_true {
                next_false
            } else {
                let cond = self.pop()?;
                if cond.to_bool() { next_true } else { next_false }
            };

            if next < 0 {
                return self.pop();
            }
            self.frames.last_mut().unwrap().block = next as usize;
        }
    }

    fn dispatch(&mut self, op: Op, base: usize) -> Result<(), EngineError> {
        match op {
            Op::Call(n) => {
                let func = self.pop()?;
                let mut raw = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    raw.push(self.pop()?);
                }
                raw.reverse();
                let this = raw.first().cloned().unwrap_or(Value::Null);
                let args = if raw.is_empty() { &[][..] } else { &raw[1..] };
                let result = self.call_value(&func, args, this)?;
                self.stack.push(result);
            }
            Op::Cp(o) => {
                let idx = self.checked_index(o as usize)?;
                self.stack.push(self.stack[idx].clone());
            }
            Op::Wr(o) => {
                let idx = self.checked_index(o as usize)?;
                let value = self.stack.last().ok_or_else(|| self.err("operand stack underflow"))?.clone();
                self.stack[idx] = value;
            }
            Op::Swap => {
                let len = self.stack.len();
                if len < 2 {
                    return Err(self.err("operand stack underflow"));
                }
                self.stack.swap(len - 1, len - 2);
            }
            Op::Pop => {
                self.pop()?;
            }
            Op::RdField => {
                let name = self.pop_field_name()?;
                let target = self.pop()?;
                self.stack.push(target.read_field(&name).unwrap_or(Value::Null));
            }
            Op::WrField => {
                let value = self.pop()?;
                let name = self.pop_field_name()?;
                let target = self.pop()?;
                target.write_field(&name, value, self.current_pos)?;
                // Re-read rather than pushing the attempted value: a write to
                // a const field or a frozen object is a silent no-op (spec
                // §3), so the stack must reflect what is actually stored.
                let result = target.read_field(&name).unwrap_or(Value::Null);
                self.stack.push(result);
            }
            Op::NewConstField => {
                let value = self.pop()?;
                let name = self.pop_field_name()?;
                let target = self.pop()?;
                target.new_const_field(&name, value, self.current_pos)?;
                let result = target.read_field(&name).unwrap_or(Value::Null);
                self.stack.push(result);
            }
            Op::RdIndex => {
                let index = self.pop()?;
                let target = self.pop()?;
                let result = target.get_at(&index, self.current_pos)?;
                self.stack.push(result);
            }
            Op::WrIndex => {
                let value = self.pop()?;
                let index = self.pop()?;
                let target = self.pop()?;
                target.set_at(&index, value, self.current_pos)?;
                let result = target.get_at(&index, self.current_pos)?;
                self.stack.push(result);
            }
            Op::RdParam => {
                let index = self.pop()?.to_int32();
                let arity = self.frames.last().unwrap().arity;
                if index < 0 || index as usize >= arity {
                    return Err(self.err(format!("parameter index {} out of range", index)));
                }
                self.stack.push(self.stack[base + index as usize].clone());
            }
            Op::WrParam => {
                let value = self.pop()?;
                let index = self.pop()?.to_int32();
                let arity = self.frames.last().unwrap().arity;
                if index < 0 || index as usize >= arity {
                    return Err(self.err(format!("parameter index {} out of range", index)));
                }
                self.stack[base + index as usize] = value;
            }
            Op::NumParams => {
                let arity = self.frames.last().unwrap().arity;
                self.stack.push(Value::Number(arity as f64));
            }
            Op::PushThis => {
                self.stack.push(self.frames.last().unwrap().this.clone());
            }
            Op::WrThisp => {
                let value = self.pop()?;
                self.frames.last_mut().unwrap().this = value;
            }
            Op::Nop => {}
            Op::PushC(k) => {
                let frame = self.frames.last().unwrap();
                let constant = frame
                    .routine
                    .constants
                    .get(k as usize)
                    .cloned()
                    .ok_or_else(|| self.err(format!("constant pool index {} out of range", k)))?;
                self.stack.push(constant);
            }
        }
        Ok(())
    }

    fn pop_field_name(&mut self) -> Result<String, EngineError> {
        match self.pop()? {
            Value::Str(s) => Ok((*s).clone()),
            other => Err(self.err(format!("field name must be a string, got {}", other.value_type()))),
        }
    }

    /// Translates a `Cp`/`Wr` offset-from-top into an absolute stack index,
    /// failing rather than panicking if codegen ever produced an
    /// out-of-range offset.
    fn checked_index(&self, offset: usize) -> Result<usize, EngineError> {
        self.stack
            .len()
            .checked_sub(offset + 1)
            .ok_or_else(|| self.err("stack offset out of range"))
    }

    /// Constructs an actor from `class`: splits the current globals into a
    /// shared-then-forked environment for the child (`crate::actor::share`),
    /// runs the class's elaboration routine against it, and enqueues
    /// `@start` with the constructor arguments (spec §4.7 "Creation").
    /// Returns the new actor reference; elaboration errors propagate as an
    /// ordinary runtime error (the actor is never published to its would-be
    /// parent if construction itself fails).
    fn instantiate_actor(&mut self, class: Value, args: &[Value]) -> Result<Value, EngineError> {
        let (elaborate, arity) = match &class {
            Value::ActorClass(c) => (c.elaborate.clone(), c.params.len()),
            _ => return Err(self.err("not an actor class")),
        };
        let child_globals = crate::actor::share(&self.globals);
        let parent = self.current_actor.clone();
        let actor = Value::Actor(Rc::new(std::cell::RefCell::new(crate::value::ActorData {
            class: class.clone(),
            globals: child_globals.clone(),
            parent: parent.clone(),
            fields: indexmap::IndexMap::new(),
            inputs: indexmap::IndexMap::new(),
            outputs: indexmap::IndexSet::new(),
            children: Vec::new(),
            connections: indexmap::IndexMap::new(),
            result: None,
            error: None,
            finished: false,
        })));

        let padded: Vec<Value> = (0..arity).map(|i| args.get(i).cloned().unwrap_or(Value::Null)).collect();

        let saved_globals = self.globals.clone();
        let saved_actor = self.current_actor.take();
        self.globals = child_globals;
        self.current_actor = Some(actor.clone());
        let elaborated = self.call_value(&elaborate, &padded, actor.clone());
        self.globals = saved_globals;
        self.current_actor = saved_actor;
        elaborated?;

        if let Some(Value::Actor(p) | Value::ActorRef(p)) = &parent {
            p.borrow_mut().children.push(actor.clone());
        }
        self.enqueue_message(actor.clone(), "@start", padded);
        Ok(actor)
    }

    /// Runs one queued message to completion: looks up its input handler,
    /// swaps in the destination actor's globals and `this`, and runs it.
    /// A handler error crashes the actor (spec §4.7): it is marked finished,
    /// the error is recorded, and — if it has a parent — a `childStopped`
    /// message is enqueued for it (silently dropped if the parent never
    /// registered that input, which is the default no-op behavior).
    /// Returns the handler's result so the root actor's `@start` can surface
    /// it; ordinary (non-root) messages simply discard it.
    pub fn dispatch_message(&mut self, msg: PendingMessage) -> (Option<Value>, Option<EngineError>) {
        let PendingMessage { actor, endpoint, args } = msg;
        let (finished, globals, handler) = match &actor {
            Value::Actor(a) | Value::ActorRef(a) => {
                let data = a.borrow();
                (data.finished, data.globals.clone(), data.inputs.get(&endpoint).cloned())
            }
            _ => return (None, None),
        };
        if finished {
            return (None, None);
        }
        let handler = match handler {
            Some(h) => h,
            None => return (None, None),
        };

        let saved_globals = self.globals.clone();
        let saved_actor = self.current_actor.take();
        self.globals = globals;
        self.current_actor = Some(actor.clone());
        let result = self.call_value(&handler, &args, actor.clone());
        self.globals = saved_globals;
        self.current_actor = saved_actor;

        match result {
            Ok(value) => (Some(value), None),
            Err(e) => {
                let parent = match &actor {
                    Value::Actor(a) | Value::ActorRef(a) => {
                        let mut data = a.borrow_mut();
                        data.finished = true;
                        data.error = Some(e.clone());
                        data.parent.clone()
                    }
                    _ => None,
                };
                if let Some(parent) = parent {
                    self.enqueue_message(parent, "childStopped", vec![actor.clone()]);
                }
                (None, Some(e))
            }
        }
    }
}

impl NativeContext for Vm {
    /// The single call-dispatch point: routines recurse into `call_routine`,
    /// natives run directly, closures swap in their captured environment for
    /// the call's duration, and the literal string `"@globals"` is special-
    /// cased to hand back the current globals register directly rather than
    /// performing a real call — codegen has no dedicated opcode for reading
    /// "the current globals", so it routes free-identifier lookups through
    /// an ordinary zero-arg `Call` against this one magic name instead.
    fn call_value(&mut self, callee: &Value, args: &[Value], this: Value) -> Result<Value, EngineError> {
        if let Value::Str(s) = callee {
            if s.as_str() == "@globals" {
                return Ok(self.globals.clone());
            }
        }
        match callee {
            Value::Function(f) => match &f.body {
                crate::value::FunctionBody::Native(native) => {
                    let native = native.clone();
                    native(self, args, this)
                }
                crate::value::FunctionBody::Routine(routine) => self.call_routine(routine.clone(), args, this),
            },
            Value::Closure(c) => {
                let saved = self.globals.clone();
                self.globals = c.env.clone();
                let result = self.call_value(&c.function, args, this);
                self.globals = saved;
                result
            }
            // Calling an endpoint reference never runs synchronously (spec
            // §4.7): an input ref enqueues a message directly; an output ref
            // forwards through its connection table, or is a silent no-op if
            // unconnected (including on a stopped actor, since `finished`
            // actors simply have nothing left wired).
            Value::EndPointRef(e) => {
                if e.is_input {
                    self.enqueue_message(e.actor.clone(), e.name.clone(), args.to_vec());
                    return Ok(Value::Null);
                }
                let target = match &e.actor {
                    Value::Actor(a) | Value::ActorRef(a) => {
                        let data = a.borrow();
                        if data.finished {
                            None
                        } else {
                            data.connections.get(&e.name).cloned()
                        }
                    }
                    _ => None,
                };
                if let Some(input_ref) = target {
                    self.call_value(&input_ref, args, Value::Null)?;
                }
                Ok(Value::Null)
            }
            // `new C(args)` lowers to an ordinary call on the class value
            // itself (the parser treats `new` as a transparent prefix): the
            // constructor runs against a fresh instance and, per
            // `compile_constructor`, ends by returning `this`.
            Value::Class(c) => {
                let instance = Value::new_object();
                if let Value::Object(o) = &instance {
                    o.borrow_mut().class = Some(callee.clone());
                }
                match &c.constructor {
                    Some(ctor) => self.call_value(ctor, args, instance),
                    None => Ok(instance),
                }
            }
            Value::ActorClass(_) => self.instantiate_actor(callee.clone(), args),
            other => Err(self.err(format!("value of type {} is not callable", other.value_type()))),
        }
    }

    fn current_position(&self) -> SourcePos {
        self.current_pos
    }

    fn current_globals(&self) -> Value {
        self.globals.clone()
    }

    fn import_module(&mut self, path: &str) -> Result<(), EngineError> {
        let importer = self.globals.clone();
        let primitives = self.primitives.clone();
        let dir = self.module_dir.clone();
        let loader = self.module_loader.clone();
        ModuleLoader::import(&loader, path, dir.as_deref(), &importer, &primitives)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Block;
    use crate::compiler::compile_program;
    use crate::parser::parse_source;
    use std::cell::RefCell;

    fn add_native(name: &str, arity: usize, f: impl Fn(&[Value]) -> Value + 'static) -> Value {
        Value::native_fn(name, arity, Rc::new(move |_ctx, args, _this| Ok(f(args))))
    }

    fn test_globals() -> Value {
        let globals = Value::new_object();
        globals.write_field("@add", add_native("@add", 2, |a| Value::Number(a[0].to_number() + a[1].to_number())), SourcePos::unknown()).unwrap();
        globals.write_field("@sub", add_native("@sub", 2, |a| Value::Number(a[0].to_number() - a[1].to_number())), SourcePos::unknown()).unwrap();
        globals.write_field("@toNumber", add_native("@toNumber", 1, |a| Value::Number(a[0].to_number())), SourcePos::unknown()).unwrap();
        globals
    }

    #[test]
    fn runs_simple_arithmetic_end_to_end() {
        let ast = parse_source("var x=1; x=x+2; x").unwrap();
        let (routine, code_map) = compile_program(&ast).unwrap();
        let mut vm = Vm::new(test_globals(), code_map);
        let result = vm.run(Rc::new(routine)).unwrap();
        assert_eq!(result.to_number(), 3.0);
    }

    #[test]
    fn calls_a_compiled_function_literal() {
        let ast = parse_source("function f(a,b){return a*b === a*b && true} f(6,7)").unwrap();
        let (routine, code_map) = compile_program(&ast).unwrap();
        let mut vm = Vm::new(test_globals(), code_map);
        // `*` and `===` aren't registered in `test_globals`; this exercises
        // only the call/branch machinery, so swap in stubs that make the
        // expression deterministically true.
        let globals = vm.globals();
        globals.write_field("@mul", add_native("@mul", 2, |a| Value::Number(a[0].to_number() * a[1].to_number())), SourcePos::unknown()).unwrap();
        globals.write_field("@strictEq", add_native("@strictEq", 2, |_a| Value::Bool(true)), SourcePos::unknown()).unwrap();
        let result = vm.run(Rc::new(routine)).unwrap();
        assert_eq!(result.to_bool(), true);
    }

    #[test]
    fn cp_and_wr_address_relative_to_top() {
        // Hand-built routine: PushC(0), PushC(1), Cp(1) duplicates the first
        // constant, Wr(0) overwrites the top with itself (no-op here), then
        // the block ends unconditionally (-1), returning the duplicate.
        let mut routine = Routine::new();
        let a = routine.intern_constant(Value::Number(10.0)).unwrap();
        let b = routine.intern_constant(Value::Number(20.0)).unwrap();
        let block = &mut routine.blocks[0];
        block.emit(Op::PushC(a)).unwrap();
        block.emit(Op::PushC(b)).unwrap();
        block.emit(Op::Cp(1)).unwrap();
        block.set_unconditional(-1);

        let mut vm = Vm::new(Value::new_object(), CodeMap::new());
        let result = vm.run(Rc::new(routine)).unwrap();
        assert_eq!(result.to_number(), 10.0);
    }

    #[test]
    fn branches_on_truthiness_between_blocks() {
        let mut routine = Routine::new();
        let t = routine.intern_constant(Value::str("then")).unwrap();
        let f = routine.intern_constant(Value::str("else")).unwrap();
        let cond = routine.intern_constant(Value::Bool(false)).unwrap();
        routine.blocks[0].emit(Op::PushC(cond)).unwrap();

        let then_block = routine.add_block();
        routine.blocks[then_block].emit(Op::PushC(t)).unwrap();
        routine.blocks[then_block].set_unconditional(-1);

        let else_block = routine.add_block();
        routine.blocks[else_block].emit(Op::PushC(f)).unwrap();
        routine.blocks[else_block].set_unconditional(-1);

        routine.blocks[0].next_true = then_block as isize;
        routine.blocks[0].next_false = else_block as isize;

        let mut vm = Vm::new(Value::new_object(), CodeMap::new());
        let result = vm.run(Rc::new(routine)).unwrap();
        assert_eq!(result.to_display_string(), "else");
    }

    #[test]
    fn field_and_index_roundtrip() {
        let obj = Value::new_object();
        obj.write_field("x", Value::Number(1.0), SourcePos::unknown()).unwrap();
        let arr = Value::new_array(vec![Value::Number(9.0)]);

        let mut routine = Routine::new();
        let obj_idx = routine.intern_constant(obj.clone()).unwrap();
        let name_idx = routine.intern_constant(Value::str("x")).unwrap();
        let arr_idx = routine.intern_constant(arr.clone()).unwrap();
        let zero = routine.intern_constant(Value::Number(0.0)).unwrap();

        let block = &mut routine.blocks[0];
        block.emit(Op::PushC(obj_idx)).unwrap();
        block.emit(Op::PushC(name_idx)).unwrap();
        block.emit(Op::RdField).unwrap();
        block.emit(Op::Pop).unwrap();
        block.emit(Op::PushC(arr_idx)).unwrap();
        block.emit(Op::PushC(zero)).unwrap();
        block.emit(Op::RdIndex).unwrap();
        block.set_unconditional(-1);

        let mut vm = Vm::new(Value::new_object(), CodeMap::new());
        let result = vm.run(Rc::new(routine)).unwrap();
        assert_eq!(result.to_number(), 9.0);
    }

    #[test]
    fn globals_bootstrap_returns_the_current_register_without_a_real_call() {
        let globals = Value::new_object();
        globals.write_field("marker", Value::Number(42.0), SourcePos::unknown()).unwrap();
        let mut vm = Vm::new(globals, CodeMap::new());
        let result = vm.call_value(&Value::str("@globals"), &[], Value::Null).unwrap();
        assert_eq!(result.read_field("marker").unwrap().to_number(), 42.0);
    }

    #[test]
    fn recursive_call_depth_is_bounded() {
        // A routine that calls itself forever via a native trampoline must
        // fail with a RuntimeError rather than overflow the real stack.
        let recursive = Rc::new(RefCell::new(None::<Value>));
        let recursive_clone = recursive.clone();
        let native = Value::native_fn("loop", 0, Rc::new(move |ctx, _args, _this| {
            let callee = recursive_clone.borrow().clone().unwrap();
            ctx.call_value(&callee, &[], Value::Null)
        }));
        *recursive.borrow_mut() = Some(native.clone());
        let mut vm = Vm::new(Value::new_object(), CodeMap::new());
        let err = vm.call_value(&native, &[], Value::Null).unwrap_err();
        assert_eq!(err.kind, crate::errors::ErrorKind::RuntimeError);
    }

    #[test]
    fn unknown_field_read_is_null_not_an_error() {
        let obj = Value::new_object();
        let mut routine = Routine::new();
        let obj_idx = routine.intern_constant(obj).unwrap();
        let name_idx = routine.intern_constant(Value::str("missing")).unwrap();
        let block = &mut routine.blocks[0];
        block.emit(Op::PushC(obj_idx)).unwrap();
        block.emit(Op::PushC(name_idx)).unwrap();
        block.emit(Op::RdField).unwrap();
        block.set_unconditional(-1);
        let mut vm = Vm::new(Value::new_object(), CodeMap::new());
        let result = vm.run(Rc::new(routine)).unwrap();
        assert!(matches!(result, Value::Null));
    }

    #[test]
    fn writing_a_const_field_twice_silently_keeps_the_original_value() {
        let obj = Value::new_object();
        obj.new_const_field("x", Value::Number(1.0), SourcePos::unknown()).unwrap();
        let mut routine = Routine::new();
        let obj_idx = routine.intern_constant(obj.clone()).unwrap();
        let name_idx = routine.intern_constant(Value::str("x")).unwrap();
        let value_idx = routine.intern_constant(Value::Number(2.0)).unwrap();
        let block = &mut routine.blocks[0];
        block.emit(Op::PushC(obj_idx)).unwrap();
        block.emit(Op::PushC(name_idx)).unwrap();
        block.emit(Op::PushC(value_idx)).unwrap();
        block.emit(Op::WrField).unwrap();
        block.set_unconditional(-1);
        let mut vm = Vm::new(Value::new_object(), CodeMap::new());
        let result = vm.run(Rc::new(routine)).unwrap();
        assert_eq!(result.to_number(), 1.0);
        assert_eq!(obj.read_field("x").unwrap().to_number(), 1.0);
    }
}
