// File: src/actor.rs
//
// Actor concurrency (spec §4.7, §5): the copy-on-write globals split used by
// every actor instantiation (`Vm::instantiate_actor`), and `blocking_exec`,
// the host entry point that drives a compiled routine to completion through
// the message queue that lives on `Vm`.

use std::cell::RefCell;
use std::rc::Rc;

use crate::bytecode::Routine;
use crate::errors::EngineError;
use crate::position::CodeMap;
use crate::value::{ActorData, Value};
use crate::vm::Vm;

/// Splits `parent` globals into the bindings a child actor may see: only
/// those already `DeepFrozen` are visible, carried over by cloning the
/// `Value` (cheap — an `Rc` bump, never a payload copy). Everything else
/// starts absent from the child, matching spec §5's "empty non-shareable
/// map": since deep-frozen data can never be written through, there is
/// nothing left for a later "clone on first write" step to do — the split
/// itself already guarantees parent and child never observe each other's
/// mutations.
pub fn share(parent: &Value) -> Value {
    let child = Value::new_object();
    if let Value::Object(o) = parent {
        for (name, slot) in o.borrow().fields.iter() {
            if slot.value.mutability() == crate::value::Mutability::DeepFrozen {
                let _ = child.write_field(name, slot.value.clone(), crate::position::SourcePos::unknown());
            }
        }
    }
    child
}

/// Places `value` directly into `globals`, regardless of its mutability,
/// bypassing the deep-frozen-only rule `share()` applies to inherited
/// bindings (spec §5 `newNotSharedVar`). Since every actor already owns a
/// private globals object, this is just an ordinary field write on it.
pub fn new_not_shared_var(globals: &Value, name: &str, value: Value) -> Result<(), EngineError> {
    globals.write_field(name, value, crate::position::SourcePos::unknown())
}

/// Runs `routine` as the `@start` input of a root "routine actor" and
/// drains the message queue until empty (spec §4.7 "Blocking entry point").
/// The returned pair reflects whichever message was the last one dispatched
/// before the queue emptied — for a program with no actors this is simply
/// the top-level script's own return value; for scenario 8's shape (a
/// program that creates one actor and returns) it is that actor's `@start`
/// result, since actor creation only enqueues the new actor's `@start`
/// rather than running it inline.
pub fn blocking_exec(routine: Rc<Routine>, globals: Value, code_map: CodeMap) -> (Option<Value>, Option<EngineError>) {
    let mut vm = Vm::new(globals.clone(), code_map);
    let root = Value::Actor(Rc::new(RefCell::new(ActorData {
        class: Value::Null,
        globals,
        parent: None,
        fields: indexmap::IndexMap::new(),
        inputs: {
            let mut inputs = indexmap::IndexMap::new();
            inputs.insert("@start".to_string(), Value::routine_fn(None, 0, routine));
            inputs
        },
        outputs: indexmap::IndexSet::new(),
        children: Vec::new(),
        connections: indexmap::IndexMap::new(),
        result: None,
        error: None,
        finished: false,
    })));

    vm.enqueue_message(root, "@start", Vec::new());

    let mut last_result = None;
    let mut last_error = None;
    while let Some(msg) = vm.take_message() {
        let (result, error) = vm.dispatch_message(msg);
        if result.is_some() || error.is_some() {
            last_result = result;
            last_error = error;
        }
    }
    (last_result, last_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile_program;
    use crate::parser::parse_source;
    use crate::value::Mutability;

    fn default_globals() -> Value {
        let globals = Value::new_object();
        globals
            .write_field(
                "@add",
                Value::native_fn("@add", 2, Rc::new(|_ctx, args, _this| {
                    Ok(Value::Number(args[0].to_number() + args[1].to_number()))
                })),
                crate::position::SourcePos::unknown(),
            )
            .unwrap();
        globals
    }

    #[test]
    fn share_carries_only_deep_frozen_bindings() {
        let parent = Value::new_object();
        parent.write_field("constant", Value::Number(1.0).deep_freeze(), crate::position::SourcePos::unknown()).unwrap();
        parent.write_field("mutable", Value::new_object(), crate::position::SourcePos::unknown()).unwrap();

        let child = share(&parent);
        assert!(child.read_field("constant").is_some());
        assert!(child.read_field("mutable").is_none());
    }

    #[test]
    fn share_isolates_later_writes_between_parent_and_child() {
        let parent = Value::new_object();
        parent.write_field("shared", Value::Number(1.0).deep_freeze(), crate::position::SourcePos::unknown()).unwrap();
        let child = share(&parent);

        new_not_shared_var(&child, "local", Value::Number(2.0)).unwrap();
        assert!(parent.read_field("local").is_none());

        new_not_shared_var(&parent, "other", Value::Number(3.0)).unwrap();
        assert!(child.read_field("other").is_none());
    }

    #[test]
    fn blocking_exec_runs_a_plain_script_as_the_root_actors_start() {
        let ast = parse_source("var x=1; x=x+2; x").unwrap();
        let (routine, code_map) = compile_program(&ast).unwrap();
        let (result, error) = blocking_exec(Rc::new(routine), default_globals(), code_map);
        assert_eq!(result.unwrap().to_number(), 3.0);
        assert!(error.is_none());
    }

    #[test]
    fn new_not_shared_var_bypasses_the_deep_freeze_rule() {
        let globals = Value::new_object();
        new_not_shared_var(&globals, "x", Value::new_object()).unwrap();
        assert_eq!(globals.read_field("x").unwrap().mutability(), Mutability::Mutable);
    }
}
