// File: src/builtins.rs
//
// VM primitives and the seed standard library (spec §6). `create_default_globals`
// builds the object every fresh VM/module starts from; `add_native` is the
// registration surface a host uses to extend it. The primitive names below
// are exactly the set `compiler.rs` emits calls to — no more, no less: the
// compiler already lowers indexing to `RdIndex`/`WrIndex` opcodes and actor
// wiring to `@registerInput`/`@registerOutput`/`@connect` (`value.rs`
// `actor_native`) directly rather than through named primitives, so there is
// no `@getAt`/`@setAt`/`@setClassEnv`/`@setObjClass` here — see DESIGN.md.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::errors::EngineError;
use crate::position::SourcePos;
use crate::value::{ActorClassData, ClassData, CompareResult, FieldSlot, FunctionBody, NativeContext, Value};

/// Registers one native function on `globals` under `name` (spec §6
/// `add_native`) — the surface a host embedding this engine uses to extend
/// the library beyond the seed built in here.
pub fn add_native(
    globals: &Value,
    name: &str,
    arity: usize,
    f: impl Fn(&mut dyn NativeContext, &[Value], Value) -> Result<Value, EngineError> + 'static,
) -> Result<(), EngineError> {
    globals.write_field(name, Value::native_fn(name, arity, Rc::new(f)), SourcePos::unknown())
}

/// Builds the object every fresh VM/module starts from: the VM primitives
/// the compiler depends on, plus a small seed library (spec §6
/// `create_default_globals`). Library breadth is explicitly out of scope —
/// this covers enough of `Math` to exercise numeric scripts, not a full
/// standard library.
pub fn create_default_globals() -> Value {
    let globals = Value::new_object();
    register_primitives(&globals);
    register_math(&globals);
    globals
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or(Value::Null)
}

fn expect_str(v: &Value, what: &str, pos: SourcePos) -> Result<String, EngineError> {
    match v {
        Value::Str(s) => Ok((**s).clone()),
        _ => Err(EngineError::runtime(format!("{} expects a string", what), pos)),
    }
}

fn register_primitives(globals: &Value) {
    let g = globals;

    // Arithmetic. `@add` follows JS's overload: string concatenation if
    // either operand is a string, numeric addition otherwise.
    let _ = add_native(g, "@add", 2, |_ctx, args, _this| {
        let (a, b) = (arg(args, 0), arg(args, 1));
        if matches!(a, Value::Str(_)) || matches!(b, Value::Str(_)) {
            Ok(Value::str(format!("{}{}", a.to_display_string(), b.to_display_string())))
        } else {
            Ok(Value::Number(a.to_number() + b.to_number()))
        }
    });
    let _ = add_native(g, "@sub", 2, |_ctx, args, _this| {
        Ok(Value::Number(arg(args, 0).to_number() - arg(args, 1).to_number()))
    });
    let _ = add_native(g, "@mul", 2, |_ctx, args, _this| {
        Ok(Value::Number(arg(args, 0).to_number() * arg(args, 1).to_number()))
    });
    let _ = add_native(g, "@div", 2, |_ctx, args, _this| {
        Ok(Value::Number(arg(args, 0).to_number() / arg(args, 1).to_number()))
    });
    let _ = add_native(g, "@mod", 2, |_ctx, args, _this| {
        Ok(Value::Number(arg(args, 0).to_number() % arg(args, 1).to_number()))
    });
    let _ = add_native(g, "@pow", 2, |_ctx, args, _this| {
        Ok(Value::Number(arg(args, 0).to_number().powf(arg(args, 1).to_number())))
    });

    // Bitwise, via `ToInt32` truncation.
    let _ = add_native(g, "@binAnd", 2, |_ctx, args, _this| {
        Ok(Value::Number((arg(args, 0).to_int32() & arg(args, 1).to_int32()) as f64))
    });
    let _ = add_native(g, "@binOr", 2, |_ctx, args, _this| {
        Ok(Value::Number((arg(args, 0).to_int32() | arg(args, 1).to_int32()) as f64))
    });
    let _ = add_native(g, "@binXor", 2, |_ctx, args, _this| {
        Ok(Value::Number((arg(args, 0).to_int32() ^ arg(args, 1).to_int32()) as f64))
    });
    let _ = add_native(g, "@lshift", 2, |_ctx, args, _this| {
        let shift = (arg(args, 1).to_int32() as u32) & 31;
        Ok(Value::Number((arg(args, 0).to_int32() << shift) as f64))
    });
    let _ = add_native(g, "@rshift", 2, |_ctx, args, _this| {
        let shift = (arg(args, 1).to_int32() as u32) & 31;
        Ok(Value::Number((arg(args, 0).to_int32() >> shift) as f64))
    });
    let _ = add_native(g, "@rshiftu", 2, |_ctx, args, _this| {
        let shift = (arg(args, 1).to_int32() as u32) & 31;
        Ok(Value::Number(((arg(args, 0).to_int32() as u32) >> shift) as f64))
    });

    // Comparisons.
    let _ = add_native(g, "@eq", 2, |_ctx, args, _this| {
        Ok(Value::Bool(arg(args, 0).compare(&arg(args, 1)) == CompareResult::Equal))
    });
    let _ = add_native(g, "@neq", 2, |_ctx, args, _this| {
        Ok(Value::Bool(arg(args, 0).compare(&arg(args, 1)) != CompareResult::Equal))
    });
    let _ = add_native(g, "@seq", 2, |_ctx, args, _this| {
        Ok(Value::Bool(arg(args, 0).typed_compare(&arg(args, 1)) == CompareResult::Equal))
    });
    let _ = add_native(g, "@sneq", 2, |_ctx, args, _this| {
        Ok(Value::Bool(arg(args, 0).typed_compare(&arg(args, 1)) != CompareResult::Equal))
    });
    let _ = add_native(g, "@less", 2, |_ctx, args, _this| {
        Ok(Value::Bool(arg(args, 0).compare(&arg(args, 1)) == CompareResult::Less))
    });
    let _ = add_native(g, "@greater", 2, |_ctx, args, _this| {
        Ok(Value::Bool(arg(args, 0).compare(&arg(args, 1)) == CompareResult::Greater))
    });
    let _ = add_native(g, "@lessEq", 2, |_ctx, args, _this| {
        let r = arg(args, 0).compare(&arg(args, 1));
        Ok(Value::Bool(matches!(r, CompareResult::Less | CompareResult::Equal)))
    });
    let _ = add_native(g, "@greaterEq", 2, |_ctx, args, _this| {
        let r = arg(args, 0).compare(&arg(args, 1));
        Ok(Value::Bool(matches!(r, CompareResult::Greater | CompareResult::Equal)))
    });

    // Unary.
    let _ = add_native(g, "@neg", 1, |_ctx, args, _this| Ok(Value::Number(-arg(args, 0).to_number())));
    let _ = add_native(g, "@bitNot", 1, |_ctx, args, _this| Ok(Value::Number(!arg(args, 0).to_int32() as f64)));
    let _ = add_native(g, "@not", 1, |_ctx, args, _this| Ok(Value::Bool(!arg(args, 0).to_bool())));
    let _ = add_native(g, "@toNumber", 1, |_ctx, args, _this| Ok(Value::Number(arg(args, 0).to_number())));
    let _ = add_native(g, "@notNull", 1, |_ctx, args, _this| Ok(Value::Bool(!matches!(arg(args, 0), Value::Null))));

    // Structural construction.
    let _ = add_native(g, "@newArray", 0, |_ctx, args, _this| Ok(Value::new_array(args.to_vec())));
    let _ = add_native(g, "@newObject", 0, |_ctx, _args, _this| Ok(Value::new_object()));

    // `@makeClass(name, parent, constructor, [methodFn, methodName]*)` —
    // argument layout fixed by `compiler.rs`'s `compile_class`.
    let _ = add_native(g, "@makeClass", 0, |ctx, args, _this| {
        let name = expect_str(&arg(args, 0), "@makeClass", ctx.current_position())?;
        let parent = match args.get(1) {
            Some(Value::Null) | None => None,
            Some(v) => Some(v.clone()),
        };
        let constructor = match args.get(2) {
            Some(Value::Null) | None => None,
            Some(v) => Some(v.clone()),
        };
        let mut members = IndexMap::new();
        let rest = if args.len() > 3 { &args[3..] } else { &[] };
        let mut pairs = rest.iter();
        while let (Some(method_fn), Some(method_name)) = (pairs.next(), pairs.next()) {
            if let Value::Str(n) = method_name {
                members.insert((**n).clone(), method_fn.clone());
            }
        }
        Ok(Value::Class(Rc::new(ClassData { name, parent, members, constructor })))
    });

    // `@makeActorClass(name, elaborateFn)` — arity is read off the
    // elaboration routine's own declared arity (constructor parameter
    // count), so no separate parameter-name list is threaded through here.
    let _ = add_native(g, "@makeActorClass", 0, |ctx, args, _this| {
        let name = expect_str(&arg(args, 0), "@makeActorClass", ctx.current_position())?;
        let elaborate = arg(args, 1);
        let arity = match &elaborate {
            Value::Function(f) => f.arity,
            _ => return Err(EngineError::runtime("@makeActorClass expects an elaboration function", ctx.current_position())),
        };
        let params = vec![String::new(); arity];
        Ok(Value::ActorClass(Rc::new(ActorClassData { name, params, elaborate })))
    });

    // `@exportSymbol(env, name)` — flags an already-written field `export`ed
    // (spec §6 "merges symbols marked export").
    let _ = add_native(g, "@exportSymbol", 2, |ctx, args, _this| {
        let env = arg(args, 0);
        let name = expect_str(&arg(args, 1), "@exportSymbol", ctx.current_position())?;
        if let Value::Object(o) = &env {
            let mut data = o.borrow_mut();
            data.fields.entry(name).or_insert_with(|| FieldSlot::new(Value::Null)).exported = true;
        }
        Ok(Value::Null)
    });

    // `@importModule(path)` — resolves/loads/merges through the VM's module
    // context (`vm.rs` `import_module`, `module.rs`).
    let _ = add_native(g, "@importModule", 1, |ctx, args, _this| {
        let path = expect_str(&arg(args, 0), "@importModule", ctx.current_position())?;
        ctx.import_module(&path)?;
        Ok(Value::Null)
    });
}

/// A small `Math` seed object (PI/E plus the handful of functions the
/// teacher's own math helpers already implement), registered to exercise
/// the "user-visible built-in library" half of spec §6 without growing it
/// beyond what this crate's scope calls for.
fn register_math(globals: &Value) {
    let math = Value::new_object();
    let _ = math.write_field("PI", Value::Number(std::f64::consts::PI), SourcePos::unknown());
    let _ = math.write_field("E", Value::Number(std::f64::consts::E), SourcePos::unknown());

    macro_rules! unary_math {
        ($name:expr, $f:expr) => {
            let _ = add_native(&math, $name, 1, move |_ctx, args, _this| Ok(Value::Number($f(arg(args, 0).to_number()))));
        };
    }
    unary_math!("abs", f64::abs);
    unary_math!("sqrt", f64::sqrt);
    unary_math!("floor", f64::floor);
    unary_math!("ceil", f64::ceil);
    unary_math!("round", f64::round);
    unary_math!("sin", f64::sin);
    unary_math!("cos", f64::cos);
    unary_math!("tan", f64::tan);
    unary_math!("log", f64::ln);
    unary_math!("exp", f64::exp);

    let _ = add_native(&math, "pow", 2, |_ctx, args, _this| {
        Ok(Value::Number(arg(args, 0).to_number().powf(arg(args, 1).to_number())))
    });
    let _ = add_native(&math, "min", 2, |_ctx, args, _this| {
        Ok(Value::Number(arg(args, 0).to_number().min(arg(args, 1).to_number())))
    });
    let _ = add_native(&math, "max", 2, |_ctx, args, _this| {
        Ok(Value::Number(arg(args, 0).to_number().max(arg(args, 1).to_number())))
    });

    let _ = globals.write_field("Math", math.deep_freeze(), SourcePos::unknown());
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoCtx;
    impl NativeContext for NoCtx {
        fn call_value(&mut self, _: &Value, _: &[Value], _: Value) -> Result<Value, EngineError> {
            unreachable!()
        }
        fn current_position(&self) -> SourcePos {
            SourcePos::unknown()
        }
        fn current_globals(&self) -> Value {
            Value::Null
        }
        fn import_module(&mut self, _: &str) -> Result<(), EngineError> {
            unreachable!()
        }
    }

    fn call_native(f: &Value, args: &[Value]) -> Value {
        let mut ctx = NoCtx;
        if let Value::Function(data) = f {
            if let FunctionBody::Native(native) = &data.body {
                return native(&mut ctx, args, Value::Null).unwrap();
            }
        }
        panic!("not a native function");
    }

    #[test]
    fn add_concatenates_strings_but_adds_numbers() {
        let globals = create_default_globals();
        let add = globals.read_field("@add").unwrap();
        assert_eq!(call_native(&add, &[Value::Number(1.0), Value::Number(2.0)]).to_number(), 3.0);
        assert_eq!(call_native(&add, &[Value::str("a"), Value::Number(2.0)]).to_display_string(), "a2");
    }

    #[test]
    fn comparisons_coerce_loosely_but_not_strictly() {
        let globals = create_default_globals();
        let eq = globals.read_field("@eq").unwrap();
        let seq = globals.read_field("@seq").unwrap();
        assert!(call_native(&eq, &[Value::Number(1.0), Value::str("1")]).to_bool());
        assert!(!call_native(&seq, &[Value::Number(1.0), Value::str("1")]).to_bool());
    }

    #[test]
    fn math_object_is_deep_frozen_and_carries_constants() {
        let globals = create_default_globals();
        let math = globals.read_field("Math").unwrap();
        assert_eq!(math.read_field("PI").unwrap().to_number(), std::f64::consts::PI);
        assert_eq!(math.mutability(), crate::value::Mutability::DeepFrozen);
    }

    #[test]
    fn make_class_interleaves_method_functions_and_names() {
        let globals = create_default_globals();
        let make_class = globals.read_field("@makeClass").unwrap();
        let method = Value::native_fn("get", 0, Rc::new(|_ctx, _args, _this| Ok(Value::Number(7.0))));
        let class = call_native(&make_class, &[Value::str("C"), Value::Null, Value::Null, method, Value::str("get")]);
        assert!(matches!(class, Value::Class(_)));
        assert!(class.read_field("get").is_some());
    }

    #[test]
    fn make_actor_class_derives_params_from_elaborate_arity() {
        let globals = create_default_globals();
        let make_actor_class = globals.read_field("@makeActorClass").unwrap();
        let elaborate = Value::native_fn("elaborate", 2, Rc::new(|_ctx, _args, _this| Ok(Value::Null)));
        let class = call_native(&make_actor_class, &[Value::str("A"), elaborate]);
        match class {
            Value::ActorClass(c) => assert_eq!(c.params.len(), 2),
            _ => panic!("expected an actor class"),
        }
    }

    #[test]
    fn export_symbol_flags_a_field_exported() {
        let globals = create_default_globals();
        let export_symbol = globals.read_field("@exportSymbol").unwrap();
        let env = Value::new_object();
        env.write_field("x", Value::Number(1.0), SourcePos::unknown()).unwrap();
        call_native(&export_symbol, &[env.clone(), Value::str("x")]);
        if let Value::Object(o) = &env {
            assert!(o.borrow().fields.get("x").unwrap().exported);
        }
    }
}
