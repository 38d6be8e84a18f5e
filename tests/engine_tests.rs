// Black-box integration tests running complete programs through the public
// `engine` API — the literal scenarios the pipeline is expected to satisfy
// end to end: arithmetic, functions, loops, objects, arrays, classes, the
// semantic checker's rejection of `this` as a declared variable, and the
// actor runtime's blocking entry point.

use scriptactor::engine::{blocking_exec, create_default_globals, evaluate};
use scriptactor::errors::ErrorKind;

#[test]
fn arithmetic_and_reassignment() {
    let result = evaluate("var x=1; x=x+2; x", create_default_globals(), None).unwrap();
    assert_eq!(result.to_number(), 3.0);
}

#[test]
fn function_call_multiplies_its_arguments() {
    let result = evaluate("function f(a,b){return a*b} f(6,7)", create_default_globals(), None).unwrap();
    assert_eq!(result.to_number(), 42.0);
}

#[test]
fn for_loop_builds_a_string() {
    let result = evaluate("var s=''; for(var i=0;i<3;i=i+1) s=s+i; s", create_default_globals(), None).unwrap();
    assert_eq!(result.to_display_string(), "012");
}

#[test]
fn object_field_access_by_dot_and_by_index() {
    let result = evaluate("var o={a:1,b:2}; o.a+o['b']", create_default_globals(), None).unwrap();
    assert_eq!(result.to_number(), 3.0);
}

#[test]
fn array_length_assignment_grows_it_and_indexing_reads_back() {
    let result = evaluate("var a=[10,20,30]; a.length=5; a[4]=99; a.length+a[4]", create_default_globals(), None).unwrap();
    assert_eq!(result.to_number(), 104.0);
}

#[test]
fn class_instance_method_call() {
    let result = evaluate("class C(x){ get(){return this.x} } new C(7).get()", create_default_globals(), None).unwrap();
    assert_eq!(result.to_number(), 7.0);
}

#[test]
fn declaring_this_as_a_variable_is_a_semantic_error() {
    let err = evaluate("var this=1", create_default_globals(), None).unwrap_err();
    assert_eq!(err.kind, ErrorKind::SemanticError);
}

#[test]
fn blocking_exec_runs_the_root_actors_start_handler() {
    let ast = scriptactor::parser::parse_source("actor A(){ input @start(){ return 9 } } new A()").unwrap();
    scriptactor::checker::check(&ast).unwrap();
    let (routine, code_map) = scriptactor::compiler::compile_program(&ast).unwrap();
    let (result, error) = blocking_exec(std::rc::Rc::new(routine), create_default_globals(), code_map);
    assert_eq!(result.unwrap().to_number(), 9.0);
    assert!(error.is_none());
}
