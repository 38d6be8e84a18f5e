// File: src/value.rs
//
// The runtime value model (spec §3). `Value` is a small tagged union that is
// cheap to copy: every heap-backed variant wraps its payload in `Rc<RefCell<..>>`
// so cloning a `Value` never deep-copies data, only bumps a refcount. The
// mutability lattice (`Mutable < Frozen < DeepFrozen`) lives alongside the
// payloads it governs rather than as a side table, since every object/array
// needs to answer "am I frozen?" on every field write.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::bytecode::Routine;
use crate::errors::EngineError;
use crate::position::SourcePos;

/// Where a value sits in the freeze lattice (spec §3, §5). Monotonic:
/// nothing ever moves back down the lattice for a value that is still
/// reachable through an existing alias — `freeze`/`deep_freeze` instead
/// allocate a fresh, stricter copy when an alias needs to stay as it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Mutability {
    Mutable,
    Frozen,
    DeepFrozen,
}

/// A named entry in an `Object`'s field map: the value, whether it was
/// declared `const`, and whether it is flagged for `export` out of a module.
#[derive(Debug, Clone)]
pub struct FieldSlot {
    pub value: Value,
    pub is_const: bool,
    pub exported: bool,
}

impl FieldSlot {
    pub fn new(value: Value) -> Self {
        FieldSlot { value, is_const: false, exported: false }
    }
}

/// Backing storage for `Value::Object`: an insertion-ordered map from field
/// name to slot (spec §3 "ordered mapping from string key"), an optional
/// class this object was constructed from, and this object's place in the
/// freeze lattice.
#[derive(Debug, Clone)]
pub struct ObjectData {
    pub fields: IndexMap<String, FieldSlot>,
    pub class: Option<Value>,
    pub mutability: Mutability,
}

impl ObjectData {
    pub fn new() -> Self {
        ObjectData { fields: IndexMap::new(), class: None, mutability: Mutability::Mutable }
    }
}

impl Default for ObjectData {
    fn default() -> Self {
        Self::new()
    }
}

/// Backing storage for `Value::Array`.
#[derive(Debug, Clone, Default)]
pub struct ArrayData {
    pub items: Vec<Value>,
    pub mutability: Mutability,
}

/// A class: an optional parent to chain method/field lookup through, an
/// ordered table of instance methods and field initializers, and an
/// optional constructor routine.
#[derive(Debug, Clone)]
pub struct ClassData {
    pub name: String,
    pub parent: Option<Value>,
    pub members: IndexMap<String, Value>,
    pub constructor: Option<Value>,
}

/// An actor class: the declared constructor parameters and a single
/// elaboration routine (compiled from `var`/`const` initializers, `input`
/// handlers, `output` declarations, and `connect` statements, in
/// declaration order) run once per instance with `this` bound to the new
/// actor (spec §4.7 "Creation"). Writing constructor parameters as actor
/// fields is itself the elaboration routine's prologue, not a separate step.
#[derive(Debug, Clone)]
pub struct ActorClassData {
    pub name: String,
    pub params: Vec<String>,
    pub elaborate: Value,
}

/// A live actor instance (spec §3 "Actor", §4.7, §5).
#[derive(Debug)]
pub struct ActorData {
    pub class: Value,
    /// The actor's own global environment (post-`share()`).
    pub globals: Value,
    pub parent: Option<Value>,
    pub fields: IndexMap<String, Value>,
    /// input endpoint name -> handler function, populated by `@registerInput`.
    pub inputs: IndexMap<String, Value>,
    /// declared output endpoint names, populated by `@registerOutput`.
    pub outputs: indexmap::IndexSet<String>,
    pub children: Vec<Value>,
    /// output endpoint name -> input `EndPointRef` it is wired to.
    pub connections: IndexMap<String, Value>,
    pub result: Option<Value>,
    pub error: Option<EngineError>,
    pub finished: bool,
}

/// A reference to an endpoint (input or output) on a specific actor,
/// obtainable as `actor.endpointName` (spec §3 "EndPointRef").
#[derive(Debug, Clone)]
pub struct EndPointRefData {
    pub actor: Value,
    pub name: String,
    pub is_input: bool,
}

/// The body of a callable `Function` value: either a Rust-native
/// implementation registered through `add_native` (spec §6), or a compiled
/// routine produced by the code generator.
#[derive(Clone)]
pub enum FunctionBody {
    Native(NativeFn),
    Routine(Rc<Routine>),
}

impl fmt::Debug for FunctionBody {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FunctionBody::Native(_) => write!(f, "Native(..)"),
            FunctionBody::Routine(r) => write!(f, "Routine({:?})", r.name),
        }
    }
}

/// Host-provided implementation of a native function. Takes the calling
/// context so it can invoke script-level callbacks (e.g. `Array.map`)
/// without `value.rs`/`builtins.rs` needing to depend on the VM's concrete
/// type; `vm.rs` implements this trait for its interpreter.
pub trait NativeContext {
    fn call_value(&mut self, callee: &Value, args: &[Value], this: Value) -> Result<Value, EngineError>;
    fn current_position(&self) -> SourcePos;
    /// The globals object currently in scope (spec §6 `@globals`), so a
    /// native like `@importModule` can merge into it without needing its
    /// own copy of the VM's environment-swapping rules.
    fn current_globals(&self) -> Value;
    /// Resolves, loads (if needed), and merges an `import "path"` (spec §6).
    fn import_module(&mut self, path: &str) -> Result<(), EngineError>;
}

pub type NativeFn = Rc<dyn Fn(&mut dyn NativeContext, &[Value], Value) -> Result<Value, EngineError>>;

#[derive(Debug, Clone)]
pub struct FunctionData {
    pub name: Option<String>,
    pub arity: usize,
    pub body: FunctionBody,
}

/// Backing storage for `Value::Closure`: a function paired with the single
/// environment `Object` it captured at creation time. Closures in this
/// language capture the enclosing global/actor scope only, never enclosing
/// function locals (locals live on the VM operand stack, not in an
/// environment object, so there is nothing else to capture).
#[derive(Debug, Clone)]
pub struct ClosureData {
    pub function: Value,
    pub env: Value,
}

/// The runtime value type (spec §3). Cloning a `Value` is O(1): heap
/// payloads are reference-counted, never deep-copied by `Clone`.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<String>),
    Object(Rc<RefCell<ObjectData>>),
    Array(Rc<RefCell<ArrayData>>),
    Function(Rc<FunctionData>),
    Closure(Rc<ClosureData>),
    Class(Rc<ClassData>),
    ActorClass(Rc<ActorClassData>),
    Actor(Rc<RefCell<ActorData>>),
    ActorRef(Rc<RefCell<ActorData>>),
    EndPointRef(Rc<EndPointRefData>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Null,
    Bool,
    Number,
    String,
    Object,
    Array,
    Function,
    Closure,
    Class,
    ActorClass,
    Actor,
    ActorRef,
    EndPointRef,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            ValueType::Null => "null",
            ValueType::Bool => "bool",
            ValueType::Number => "number",
            ValueType::String => "string",
            ValueType::Object => "object",
            ValueType::Array => "array",
            ValueType::Function => "function",
            ValueType::Closure => "closure",
            ValueType::Class => "class",
            ValueType::ActorClass => "actor class",
            ValueType::Actor => "actor",
            ValueType::ActorRef => "actor ref",
            ValueType::EndPointRef => "endpoint ref",
        };
        write!(f, "{}", s)
    }
}

/// Result of comparing two values for ordering purposes (`<`, `<=`, `>`,
/// `>=`, and the equality operators). Mirrors `jsOperators.cpp`'s handling of
/// values that simply cannot be ordered against each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareResult {
    Less,
    Equal,
    Greater,
    Incomparable,
}

impl Value {
    pub fn str(s: impl Into<String>) -> Value {
        Value::Str(Rc::new(s.into()))
    }

    pub fn new_object() -> Value {
        Value::Object(Rc::new(RefCell::new(ObjectData::new())))
    }

    pub fn new_array(items: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(ArrayData { items, mutability: Mutability::Mutable })))
    }

    pub fn native_fn(name: impl Into<String>, arity: usize, f: NativeFn) -> Value {
        Value::Function(Rc::new(FunctionData { name: Some(name.into()), arity, body: FunctionBody::Native(f) }))
    }

    pub fn routine_fn(name: Option<String>, arity: usize, routine: Rc<Routine>) -> Value {
        Value::Function(Rc::new(FunctionData { name, arity, body: FunctionBody::Routine(routine) }))
    }

    pub fn endpoint_ref(actor: Value, name: impl Into<String>, is_input: bool) -> Value {
        Value::EndPointRef(Rc::new(EndPointRefData { actor, name: name.into(), is_input }))
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Null,
            Value::Bool(_) => ValueType::Bool,
            Value::Number(_) => ValueType::Number,
            Value::Str(_) => ValueType::String,
            Value::Object(_) => ValueType::Object,
            Value::Array(_) => ValueType::Array,
            Value::Function(_) => ValueType::Function,
            Value::Closure(_) => ValueType::Closure,
            Value::Class(_) => ValueType::Class,
            Value::ActorClass(_) => ValueType::ActorClass,
            Value::Actor(_) => ValueType::Actor,
            Value::ActorRef(_) => ValueType::ActorRef,
            Value::EndPointRef(_) => ValueType::EndPointRef,
        }
    }

    pub fn to_bool(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// Best-effort numeric coercion (spec §3 "to_number"): `Null` is `0`,
    /// booleans are `0`/`1`, strings parse as a JS-style numeric literal (or
    /// `NaN` on failure), everything else is `NaN`.
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Null => 0.0,
            Value::Bool(b) => if *b { 1.0 } else { 0.0 },
            Value::Number(n) => *n,
            Value::Str(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse::<f64>().unwrap_or(f64::NAN)
                }
            }
            _ => f64::NAN,
        }
    }

    /// `ToInt32`-style truncation used by bitwise operators and indexing.
    pub fn to_int32(&self) -> i32 {
        let n = self.to_number();
        if !n.is_finite() {
            return 0;
        }
        n.trunc() as i64 as i32
    }

    pub fn to_display_string(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::Str(s) => s.as_str().to_string(),
            Value::Object(o) => {
                let o = o.borrow();
                let fields: Vec<String> = o
                    .fields
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v.value.to_display_string()))
                    .collect();
                format!("{{{}}}", fields.join(", "))
            }
            Value::Array(a) => {
                let a = a.borrow();
                let items: Vec<String> = a.items.iter().map(|v| v.to_display_string()).collect();
                format!("[{}]", items.join(", "))
            }
            Value::Function(f) => format!("function {}", f.name.as_deref().unwrap_or("<anonymous>")),
            Value::Closure(c) => c.function.to_display_string(),
            Value::Class(c) => format!("class {}", c.name),
            Value::ActorClass(c) => format!("actor {}", c.name),
            Value::Actor(_) | Value::ActorRef(_) => "actor".to_string(),
            Value::EndPointRef(e) => format!("endpoint {}", e.name),
        }
    }

    /// Structural equality used for constant-pool deduplication (spec
    /// §4.5). Reference-counted container types compare by pointer identity
    /// here, since two structurally-equal-but-distinct objects must not
    /// collapse into one constant (later mutation of one must not affect
    /// the other).
    pub fn structural_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            (Value::Class(a), Value::Class(b)) => Rc::ptr_eq(a, b),
            (Value::ActorClass(a), Value::ActorClass(b)) => Rc::ptr_eq(a, b),
            (Value::Actor(a), Value::Actor(b)) => Rc::ptr_eq(a, b),
            (Value::ActorRef(a), Value::ActorRef(b)) => Rc::ptr_eq(a, b),
            (Value::EndPointRef(a), Value::EndPointRef(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Loose ordering comparison (`<`, `<=`, `>`, `>=`): numeric if either
    /// side is a number, otherwise lexical string comparison, otherwise
    /// `Incomparable` (spec §3 "compare").
    pub fn compare(&self, other: &Value) -> CompareResult {
        use Value::*;
        match (self, other) {
            (Number(_), _) | (_, Number(_)) => {
                let (a, b) = (self.to_number(), other.to_number());
                if a.is_nan() || b.is_nan() {
                    CompareResult::Incomparable
                } else {
                    ord_to_compare(a.partial_cmp(&b))
                }
            }
            (Str(a), Str(b)) => ord_to_compare(Some(a.cmp(b))),
            (Bool(a), Bool(b)) => ord_to_compare(Some(a.cmp(b))),
            _ => CompareResult::Incomparable,
        }
    }

    /// Strict comparison (`===`/`!==`): like `compare`, but values of
    /// different variants never compare equal, and are `Incomparable`
    /// rather than coerced (spec §3 "typed_compare").
    pub fn typed_compare(&self, other: &Value) -> CompareResult {
        if self.value_type() != other.value_type() {
            return CompareResult::Incomparable;
        }
        match (self, other) {
            (Value::Null, Value::Null) => CompareResult::Equal,
            (Value::Bool(a), Value::Bool(b)) => {
                if a == b { CompareResult::Equal } else { CompareResult::Incomparable }
            }
            (Value::Number(a), Value::Number(b)) => {
                if a.is_nan() || b.is_nan() {
                    CompareResult::Incomparable
                } else {
                    ord_to_compare(a.partial_cmp(b))
                }
            }
            (Value::Str(a), Value::Str(b)) => ord_to_compare(Some(a.cmp(b))),
            _ => {
                if self.structural_eq(other) {
                    CompareResult::Equal
                } else {
                    CompareResult::Incomparable
                }
            }
        }
    }

    pub fn mutability(&self) -> Mutability {
        match self {
            Value::Object(o) => o.borrow().mutability,
            Value::Array(a) => a.borrow().mutability,
            _ => Mutability::DeepFrozen,
        }
    }

    /// Raises this value's mutability to at least `Frozen`. When already at
    /// or above that level this is a cheap `Rc` clone; otherwise a fresh
    /// shallow copy is allocated so existing aliases of `self` keep their
    /// original (more permissive) mutability (spec §5 "never becomes more
    /// mutable", reconciled by never mutating the *shared* allocation in
    /// place when tightening it).
    pub fn freeze(&self) -> Value {
        self.set_mutability(Mutability::Frozen, false)
    }

    /// Raises this value, and everything reachable from it, to
    /// `DeepFrozen`.
    pub fn deep_freeze(&self) -> Value {
        self.set_mutability(Mutability::DeepFrozen, true)
    }

    /// Returns a `Mutable` copy of this value. Unlike `freeze`/`deep_freeze`
    /// this always allocates, since loosening a shared allocation in place
    /// would let a frozen alias observe later mutation.
    pub fn un_freeze(&self) -> Value {
        match self {
            Value::Object(o) => {
                let data = o.borrow();
                let mut copy = ObjectData::new();
                for (k, slot) in data.fields.iter() {
                    copy.fields.insert(k.clone(), slot.clone());
                }
                copy.class = data.class.clone();
                Value::Object(Rc::new(RefCell::new(copy)))
            }
            Value::Array(a) => {
                let data = a.borrow();
                Value::Array(Rc::new(RefCell::new(ArrayData {
                    items: data.items.clone(),
                    mutability: Mutability::Mutable,
                })))
            }
            other => other.clone(),
        }
    }

    fn set_mutability(&self, target: Mutability, deep: bool) -> Value {
        match self {
            Value::Object(o) => {
                if o.borrow().mutability >= target {
                    return self.clone();
                }
                let data = o.borrow();
                let mut copy = ObjectData::new();
                copy.class = data.class.clone();
                copy.mutability = target;
                for (k, slot) in data.fields.iter() {
                    let value = if deep { slot.value.set_mutability(target, deep) } else { slot.value.clone() };
                    copy.fields.insert(k.clone(), FieldSlot { value, is_const: slot.is_const, exported: slot.exported });
                }
                Value::Object(Rc::new(RefCell::new(copy)))
            }
            Value::Array(a) => {
                if a.borrow().mutability >= target {
                    return self.clone();
                }
                let data = a.borrow();
                let items = if deep {
                    data.items.iter().map(|v| v.set_mutability(target, deep)).collect()
                } else {
                    data.items.clone()
                };
                Value::Array(Rc::new(RefCell::new(ArrayData { items, mutability: target })))
            }
            other => other.clone(),
        }
    }

    /// Reads a named field. Looks in own fields first, then (for `Object`
    /// with a `class`) walks the class/parent chain for a method (spec §3
    /// "read_field").
    pub fn read_field(&self, name: &str) -> Option<Value> {
        match self {
            Value::Object(o) => {
                let data = o.borrow();
                if let Some(slot) = data.fields.get(name) {
                    return Some(slot.value.clone());
                }
                if let Some(class) = &data.class {
                    return lookup_class_member(class, name);
                }
                None
            }
            Value::Class(c) => lookup_class_member(&Value::Class(c.clone()), name),
            Value::Array(a) => {
                if name == "length" {
                    return Some(Value::Number(a.borrow().items.len() as f64));
                }
                array_native(name)
            }
            Value::Str(s) => {
                if name == "length" {
                    return Some(Value::Number(s.chars().count() as f64));
                }
                None
            }
            Value::Actor(a) | Value::ActorRef(a) => {
                let data = a.borrow();
                if let Some(v) = data.fields.get(name) {
                    return Some(v.clone());
                }
                if data.inputs.contains_key(name) {
                    return Some(Value::endpoint_ref(self.clone(), name, true));
                }
                if data.outputs.contains(name) {
                    return Some(Value::endpoint_ref(self.clone(), name, false));
                }
                drop(data);
                actor_native(name)
            }
            _ => None,
        }
    }

    /// Writes a named field. Per spec §3, writing a const field or any field
    /// of a non-mutable object is a silent no-op that leaves the existing
    /// value in place — not an error (§7's RuntimeError enumeration does not
    /// list const/frozen writes).
    pub fn write_field(&self, name: &str, value: Value, pos: SourcePos) -> Result<(), EngineError> {
        match self {
            Value::Object(o) => {
                let mut data = o.borrow_mut();
                if data.mutability != Mutability::Mutable {
                    return Ok(());
                }
                if let Some(slot) = data.fields.get(name) {
                    if slot.is_const {
                        return Ok(());
                    }
                }
                data.fields.entry(name.to_string()).or_insert_with(|| FieldSlot::new(Value::Null)).value = value;
                Ok(())
            }
            // Actor fields (set by an actor's elaboration routine and its
            // message handlers) carry no per-field const flag the way
            // `ObjectData`'s `FieldSlot` does; `NEW_CONST_FIELD` on an actor
            // degrades to an ordinary write (see `new_const_field` below).
            Value::Actor(a) | Value::ActorRef(a) => {
                a.borrow_mut().fields.insert(name.to_string(), value);
                Ok(())
            }
            // `length` is a reflected pseudo-field (spec §3 "Array"):
            // assigning to it resizes `items`, padding with `Null` when
            // growing and truncating when shrinking.
            Value::Array(a) => {
                if name != "length" {
                    return Err(EngineError::runtime(
                        format!("cannot write field '{}' on a value of type {}", name, self.value_type()),
                        pos,
                    ));
                }
                let mut data = a.borrow_mut();
                if data.mutability != Mutability::Mutable {
                    return Ok(());
                }
                let new_len = value.to_int32().max(0) as usize;
                data.items.resize(new_len, Value::Null);
                Ok(())
            }
            _ => Err(EngineError::runtime(
                format!("cannot write field '{}' on a value of type {}", name, self.value_type()),
                pos,
            )),
        }
    }

    /// Declares a new field as `const` on first write (spec §4.5
    /// `NEW_CONST_FIELD`). Declaring on a non-mutable object is likewise a
    /// silent no-op (see `write_field` above).
    pub fn new_const_field(&self, name: &str, value: Value, pos: SourcePos) -> Result<(), EngineError> {
        match self {
            Value::Object(o) => {
                let mut data = o.borrow_mut();
                if data.mutability != Mutability::Mutable {
                    return Ok(());
                }
                data.fields.insert(name.to_string(), FieldSlot { value, is_const: true, exported: false });
                Ok(())
            }
            Value::Actor(_) | Value::ActorRef(_) => self.write_field(name, value, pos),
            _ => Err(EngineError::runtime(
                format!("cannot declare field '{}' on a value of type {}", name, self.value_type()),
                pos,
            )),
        }
    }

    pub fn delete_field(&self, name: &str) -> bool {
        if let Value::Object(o) = self {
            let mut data = o.borrow_mut();
            if data.mutability == Mutability::Mutable {
                return data.fields.shift_remove(name).is_some();
            }
        }
        false
    }

    /// Reads by numeric index (arrays) or key (objects via `to_display_string`
    /// coercion of the index), per spec §3 "get_at".
    pub fn get_at(&self, index: &Value, pos: SourcePos) -> Result<Value, EngineError> {
        match self {
            Value::Array(a) => {
                let data = a.borrow();
                let i = index.to_int32();
                if i < 0 || i as usize >= data.items.len() {
                    return Ok(Value::Null);
                }
                Ok(data.items[i as usize].clone())
            }
            Value::Str(s) => {
                let i = index.to_int32();
                if i < 0 {
                    return Ok(Value::Null);
                }
                match s.chars().nth(i as usize) {
                    Some(c) => Ok(Value::str(c.to_string())),
                    None => Ok(Value::Null),
                }
            }
            Value::Object(_) => Ok(self.read_field(&index.to_display_string()).unwrap_or(Value::Null)),
            _ => Err(EngineError::runtime(
                format!("cannot index into a value of type {}", self.value_type()),
                pos,
            )),
        }
    }

    pub fn set_at(&self, index: &Value, value: Value, pos: SourcePos) -> Result<(), EngineError> {
        match self {
            Value::Array(a) => {
                let mut data = a.borrow_mut();
                if data.mutability != Mutability::Mutable {
                    return Ok(());
                }
                let i = index.to_int32();
                if i < 0 {
                    return Err(EngineError::runtime("negative array index", pos));
                }
                let i = i as usize;
                if i >= data.items.len() {
                    data.items.resize(i + 1, Value::Null);
                }
                data.items[i] = value;
                Ok(())
            }
            Value::Object(_) => self.write_field(&index.to_display_string(), value, pos),
            _ => Err(EngineError::runtime(
                format!("cannot index-assign into a value of type {}", self.value_type()),
                pos,
            )),
        }
    }

    /// True if this value exposes the iterator protocol (callable `head`
    /// and `tail` members), used by `for (id in expr)` lowering (spec §9
    /// Open Question 3, resolved via `@iterator`).
    pub fn supports_iterator_protocol(&self) -> bool {
        matches!(self.read_field("head"), Some(h) if matches!(h.value_type(), ValueType::Function | ValueType::Closure))
            && matches!(self.read_field("tail"), Some(t) if matches!(t.value_type(), ValueType::Function | ValueType::Closure))
    }

    pub fn get_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.as_str().to_string()),
            Value::Array(a) => {
                serde_json::Value::Array(a.borrow().items.iter().map(|v| v.get_json()).collect())
            }
            Value::Object(o) => {
                let mut map = serde_json::Map::new();
                for (k, slot) in o.borrow().fields.iter() {
                    map.insert(k.clone(), slot.value.get_json());
                }
                serde_json::Value::Object(map)
            }
            _ => serde_json::Value::Null,
        }
    }
}

/// The handful of names every actor instance answers to regardless of its
/// class, wired up by the compiled elaboration routine (`src/compiler.rs`
/// `compile_actor_body_fn`) rather than stored per-instance: registering an
/// endpoint or a connection is the same operation on every actor, so these
/// are built fresh on each lookup instead of cluttering `ActorData::fields`.
fn actor_native(name: &str) -> Option<Value> {
    match name {
        "@registerInput" => Some(Value::native_fn("@registerInput", 2, Rc::new(|ctx, args, this| {
            let name = match args.first() {
                Some(Value::Str(s)) => (**s).clone(),
                _ => return Err(EngineError::runtime("@registerInput expects a name string", ctx.current_position())),
            };
            let handler = args.get(1).cloned().unwrap_or(Value::Null);
            match &this {
                Value::Actor(a) | Value::ActorRef(a) => {
                    a.borrow_mut().inputs.insert(name, handler);
                    Ok(Value::Null)
                }
                _ => Err(EngineError::runtime("@registerInput called without an actor receiver", ctx.current_position())),
            }
        }))),
        "@registerOutput" => Some(Value::native_fn("@registerOutput", 1, Rc::new(|ctx, args, this| {
            let name = match args.first() {
                Some(Value::Str(s)) => (**s).clone(),
                _ => return Err(EngineError::runtime("@registerOutput expects a name string", ctx.current_position())),
            };
            match &this {
                Value::Actor(a) | Value::ActorRef(a) => {
                    a.borrow_mut().outputs.insert(name);
                    Ok(Value::Null)
                }
                _ => Err(EngineError::runtime("@registerOutput called without an actor receiver", ctx.current_position())),
            }
        }))),
        "@connect" => Some(Value::native_fn("@connect", 2, Rc::new(|ctx, args, this| {
            let output = args.first().cloned().unwrap_or(Value::Null);
            let input = args.get(1).cloned().unwrap_or(Value::Null);
            let (Value::Actor(a) | Value::ActorRef(a)) = &this else {
                return Err(EngineError::runtime("@connect called without an actor receiver", ctx.current_position()));
            };
            if a.borrow().finished {
                return Ok(Value::Null);
            }
            let output_name = match &output {
                Value::EndPointRef(e) if !e.is_input => e.name.clone(),
                _ => return Err(EngineError::runtime("connect source must be an output endpoint", ctx.current_position())),
            };
            match &input {
                Value::EndPointRef(e) if e.is_input => {}
                _ => return Err(EngineError::runtime("connect target must be an input endpoint", ctx.current_position())),
            }
            a.borrow_mut().connections.insert(output_name, input);
            Ok(Value::Null)
        }))),
        _ => None,
    }
}

/// `head`/`tail` on arrays (spec §9 Open Question 3's `@iterator` resolved
/// structurally, per `compiler.rs` `compile_for_each`): `tail()` returns
/// `Null` rather than an empty array once nothing is left, so the `for (x in
/// expr)` loop's `@notNull(iter)` condition terminates. An array with zero
/// elements still answers one round with `head() == Null` before `tail()`
/// collapses to `Null` and the loop stops — see DESIGN.md.
fn array_native(name: &str) -> Option<Value> {
    match name {
        "head" => Some(Value::native_fn("head", 0, Rc::new(|ctx, _args, this| match &this {
            Value::Array(a) => Ok(a.borrow().items.first().cloned().unwrap_or(Value::Null)),
            _ => Err(EngineError::runtime("head called without an array receiver", ctx.current_position())),
        }))),
        "tail" => Some(Value::native_fn("tail", 0, Rc::new(|ctx, _args, this| match &this {
            Value::Array(a) => {
                let items = &a.borrow().items;
                if items.len() <= 1 {
                    Ok(Value::Null)
                } else {
                    Ok(Value::new_array(items[1..].to_vec()))
                }
            }
            _ => Err(EngineError::runtime("tail called without an array receiver", ctx.current_position())),
        }))),
        _ => None,
    }
}

fn lookup_class_member(class: &Value, name: &str) -> Option<Value> {
    let mut current = Some(class.clone());
    while let Some(Value::Class(c)) = current {
        if let Some(v) = c.members.get(name) {
            return Some(v.clone());
        }
        current = c.parent.clone();
    }
    None
}

fn ord_to_compare(ord: Option<Ordering>) -> CompareResult {
    match ord {
        Some(Ordering::Less) => CompareResult::Less,
        Some(Ordering::Equal) => CompareResult::Equal,
        Some(Ordering::Greater) => CompareResult::Greater,
        None => CompareResult::Incomparable,
    }
}

/// Formats a number the way the language's `to_string` does: integral
/// values print without a trailing `.0`, matching typical JS-style display.
fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity".to_string() } else { "-Infinity".to_string() };
    }
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Value({})", self.to_display_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_bool_matches_js_truthiness() {
        assert!(!Value::Null.to_bool());
        assert!(!Value::Number(0.0).to_bool());
        assert!(!Value::str("").to_bool());
        assert!(Value::str("0").to_bool());
        assert!(Value::Number(1.0).to_bool());
    }

    #[test]
    fn freeze_does_not_affect_existing_aliases() {
        let obj = Value::new_object();
        obj.write_field("x", Value::Number(1.0), SourcePos::unknown()).unwrap();
        let alias = obj.clone();
        let frozen = obj.freeze();
        assert_eq!(frozen.mutability(), Mutability::Frozen);
        assert_eq!(alias.mutability(), Mutability::Mutable);
        alias.write_field("x", Value::Number(2.0), SourcePos::unknown()).unwrap();
        frozen.write_field("x", Value::Number(3.0), SourcePos::unknown()).unwrap();
        assert_eq!(frozen.read_field("x").unwrap().to_number(), 1.0);
    }

    #[test]
    fn deep_freeze_propagates_to_nested_values() {
        let inner = Value::new_object();
        let outer = Value::new_object();
        outer.write_field("inner", inner, SourcePos::unknown()).unwrap();
        let frozen = outer.deep_freeze();
        let inner_read = frozen.read_field("inner").unwrap();
        assert_eq!(inner_read.mutability(), Mutability::DeepFrozen);
    }

    #[test]
    fn compare_is_numeric_when_either_side_is_a_number() {
        assert_eq!(Value::Number(1.0).compare(&Value::str("2")), CompareResult::Less);
    }

    #[test]
    fn typed_compare_rejects_cross_type() {
        assert_eq!(Value::Number(1.0).typed_compare(&Value::str("1")), CompareResult::Incomparable);
    }

    #[test]
    fn const_field_silently_keeps_its_value_on_a_second_write() {
        let obj = Value::new_object();
        obj.new_const_field("x", Value::Number(1.0), SourcePos::unknown()).unwrap();
        obj.write_field("x", Value::Number(2.0), SourcePos::unknown()).unwrap();
        assert_eq!(obj.read_field("x").unwrap().to_number(), 1.0);
    }

    #[test]
    fn array_get_at_out_of_range_is_null() {
        let arr = Value::new_array(vec![Value::Number(1.0)]);
        assert!(matches!(arr.get_at(&Value::Number(5.0), SourcePos::unknown()).unwrap(), Value::Null));
    }

    #[test]
    fn writing_array_length_grows_and_shrinks() {
        let arr = Value::new_array(vec![Value::Number(10.0), Value::Number(20.0), Value::Number(30.0)]);
        arr.write_field("length", Value::Number(5.0), SourcePos::unknown()).unwrap();
        assert_eq!(arr.read_field("length").unwrap().to_number(), 5.0);
        assert!(matches!(arr.get_at(&Value::Number(3.0), SourcePos::unknown()).unwrap(), Value::Null));
        arr.write_field("length", Value::Number(1.0), SourcePos::unknown()).unwrap();
        assert_eq!(arr.read_field("length").unwrap().to_number(), 1.0);
        assert_eq!(arr.get_at(&Value::Number(0.0), SourcePos::unknown()).unwrap().to_number(), 10.0);
    }

    #[test]
    fn writing_into_a_frozen_array_is_silently_ignored() {
        let arr = Value::new_array(vec![Value::Number(1.0)]).freeze();
        arr.set_at(&Value::Number(0.0), Value::Number(9.0), SourcePos::unknown()).unwrap();
        assert_eq!(arr.get_at(&Value::Number(0.0), SourcePos::unknown()).unwrap().to_number(), 1.0);
    }
}
