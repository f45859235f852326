//! Varargs collection, spreading and the argument slot ceiling

mod common;

use std::sync::Arc;

use common::{fixture, ty, Fixture};
use mh_engine::{
    permute_arguments, ClassId, ClassRegistryBuilder, ClassSpec, InvokeError, Kind, MethodHandle,
    Modifiers, Runtime, TypeDescriptor, Value, ARG_SLOT_LIMIT,
};

fn count(fx: &Fixture) -> MethodHandle {
    fx.runtime
        .lookup(fx.calc)
        .find_static(
            fx.calc,
            "count",
            &ty(Kind::INT, [Kind::Reference(fx.wk.object_array)]),
        )
        .unwrap()
}

#[test]
fn test_varargs_collector_accepts_any_arity() {
    let fx = fixture();
    let handle = count(&fx);
    assert!(handle.is_varargs_collector());

    let object = fx.object();
    for n in 0..6 {
        let site = TypeDescriptor::new(Kind::INT, vec![object; n]);
        let args = (0..n).map(|i| fx.boxed(Value::Int(i as i32))).collect();
        assert_eq!(handle.invoke(&site, args).unwrap(), Value::Int(n as i32));
    }

    // Primitive arguments are boxed into the Object[]
    let site = ty(Kind::INT, [Kind::INT, Kind::DOUBLE, Kind::BOOLEAN]);
    let args = vec![Value::Int(1), Value::Double(2.0), Value::Boolean(true)];
    assert_eq!(handle.invoke(&site, args).unwrap(), Value::Int(3));
}

#[test]
fn test_varargs_collector_passes_array_through() {
    let fx = fixture();
    let handle = count(&fx);
    let array_site = ty(Kind::INT, [Kind::Reference(fx.wk.object_array)]);
    let array = Value::new_array(fx.wk.object_array, vec![Value::Null, Value::Null]);
    assert_eq!(handle.invoke(&array_site, vec![array]).unwrap(), Value::Int(2));

    // A single Object is not an Object[]; it is collected as one element
    let one = ty(Kind::INT, [fx.object()]);
    let array = Value::new_array(fx.wk.object_array, vec![Value::Null, Value::Null]);
    assert_eq!(handle.invoke(&one, vec![array]).unwrap(), Value::Int(1));
}

#[test]
fn test_fixed_arity_rejects_loose_arguments() {
    let fx = fixture();
    let fixed = count(&fx).as_fixed_arity();
    let object = fx.object();
    let site = ty(Kind::INT, [object, object, object]);
    let args = vec![Value::Null, Value::Null, Value::Null];
    assert!(matches!(
        fixed.invoke(&site, args),
        Err(InvokeError::WrongMethodType { .. })
    ));
}

#[test]
fn test_bound_and_inserted_handles_have_fixed_arity() {
    let fx = fixture();
    let add = fx
        .runtime
        .lookup(fx.calc)
        .bind(fx.instance(fx.calc), "add", &ty(Kind::INT, [Kind::INT, Kind::INT]))
        .unwrap();
    assert!(!add.is_varargs_collector());
    assert!(add.bound_receiver().is_some());

    let sum = fx
        .runtime
        .lookup(fx.calc)
        .find_static(fx.calc, "sum", &ty(Kind::INT, [Kind::Reference(fx.int_array)]))
        .unwrap();
    let ten = sum
        .insert_arguments(0, vec![Value::new_array(fx.int_array, vec![Value::Int(10)])])
        .unwrap();
    assert!(!ten.is_varargs_collector());
    assert_eq!(ten.invoke(&ty(Kind::INT, []), vec![]).unwrap(), Value::Int(10));
}

#[test]
fn test_invoke_with_arguments_collects() {
    let fx = fixture();
    let result = count(&fx)
        .invoke_with_arguments(vec![Value::Int(1), Value::Long(2), Value::Null])
        .unwrap();
    assert_eq!(result.unboxed(), Some(Value::Int(3)));
}

#[test]
fn test_spreader_then_collector_round_trip() {
    let fx = fixture();
    let sum = fx
        .runtime
        .lookup(fx.calc)
        .find_static(fx.calc, "sum", &ty(Kind::INT, [Kind::Reference(fx.int_array)]))
        .unwrap();
    let loose = sum.as_collector(fx.int_array, 2).unwrap();
    let packed = loose.as_spreader(fx.int_array, 2).unwrap();
    assert_eq!(packed.ty(), sum.ty());

    let site = packed.ty().clone();
    let array = Value::new_array(fx.int_array, vec![Value::Int(20), Value::Int(22)]);
    assert_eq!(packed.invoke_exact(&site, vec![array]).unwrap(), Value::Int(42));

    let wrong = Value::new_array(fx.int_array, vec![Value::Int(1)]);
    assert!(matches!(
        packed.invoke_exact(&site, vec![wrong]),
        Err(InvokeError::IllegalArgument(_))
    ));
}

#[test]
fn test_spreader_element_cast_fails() {
    let fx = fixture();
    let string = Kind::Reference(fx.wk.string);
    let identity = fx
        .runtime
        .lookup(fx.calc)
        .find_static(fx.calc, "identity", &ty(fx.object(), [fx.object()]))
        .unwrap()
        .as_type(&ty(string, [string]))
        .unwrap();
    let spread = identity.as_spreader(fx.wk.object_array, 1).unwrap();
    let site = spread.ty().clone();

    let ok = Value::new_array(fx.wk.object_array, vec![Value::string(&fx.wk, "s")]);
    assert_eq!(spread.invoke_exact(&site, vec![ok]).unwrap().as_str(), Some("s"));

    let bad = Value::new_array(fx.wk.object_array, vec![fx.boxed(Value::Int(1))]);
    assert!(matches!(
        spread.invoke_exact(&site, vec![bad]),
        Err(InvokeError::ClassCast { .. })
    ));
}

struct Wide {
    runtime: Arc<Runtime>,
    class: ClassId,
    long_array: ClassId,
}

/// Class with methods sized around the slot ceiling
fn wide() -> Wide {
    let mut builder = ClassRegistryBuilder::new();
    let long_array = builder.array_of(Kind::LONG);
    let ints = |n: usize| TypeDescriptor::new(Kind::Void, vec![Kind::INT; n]);
    let longs = |n: usize| {
        let mut params = vec![Kind::LONG; n];
        params.push(Kind::Reference(long_array));
        TypeDescriptor::new(Kind::Void, params)
    };
    let nothing = |_: &[Value]| -> Result<Value, InvokeError> { Ok(Value::Void) };

    let class = builder.define(
        ClassSpec::new("a.Wide")
            .method("fits", Modifiers::PUBLIC | Modifiers::STATIC, ints(255), nothing)
            .method("overflows", Modifiers::PUBLIC | Modifiers::STATIC, ints(256), nothing)
            .method("fitsWithThis", Modifiers::PUBLIC, ints(254), nothing)
            .method("overflowsWithThis", Modifiers::PUBLIC, ints(255), nothing)
            .method("longs", Modifiers::PUBLIC | Modifiers::STATIC, longs(0), nothing)
            .constructor(Modifiers::PUBLIC, vec![Kind::INT; 254], nothing)
            .constructor(Modifiers::PUBLIC, vec![Kind::INT; 255], nothing),
    );
    let registry = Arc::new(builder.build());
    Wide {
        runtime: Runtime::new(registry),
        class,
        long_array,
    }
}

fn is_illegal_argument<T>(result: Result<T, InvokeError>) -> bool {
    matches!(result, Err(InvokeError::IllegalArgument(_)))
}

#[test]
fn test_lookup_slot_ceiling() {
    let w = wide();
    let lookup = w.runtime.lookup(w.class);
    let ints = |n: usize| TypeDescriptor::new(Kind::Void, vec![Kind::INT; n]);

    assert!(lookup.find_static(w.class, "fits", &ints(255)).is_ok());
    assert!(is_illegal_argument(lookup.find_static(w.class, "overflows", &ints(256))));

    // The receiver takes a slot
    assert!(lookup.find_virtual(w.class, "fitsWithThis", &ints(254)).is_ok());
    assert!(is_illegal_argument(lookup.find_virtual(w.class, "overflowsWithThis", &ints(255))));

    // So does the object a constructor initializes
    assert!(lookup.find_constructor(w.class, &ints(254)).is_ok());
    assert!(is_illegal_argument(lookup.find_constructor(w.class, &ints(255))));
}

#[test]
fn test_adapter_slot_ceiling() {
    let w = wide();
    let longs = w
        .runtime
        .lookup(w.class)
        .find_static(
            w.class,
            "longs",
            &TypeDescriptor::new(Kind::Void, [Kind::Reference(w.long_array)]),
        )
        .unwrap();

    let collector = longs.as_collector(w.long_array, 127).unwrap();
    assert_eq!(collector.ty().arg_slots(), 254);
    // 127 longs plus a trailing int
    let widest = collector.drop_arguments(127, &[Kind::INT]).unwrap();
    assert_eq!(widest.ty().arg_slots(), 255);
    assert!(is_illegal_argument(widest.drop_arguments(0, &[Kind::INT])));

    // Spreading zero arguments still adds the array parameter
    assert_eq!(collector.as_spreader(w.long_array, 0).unwrap().ty().arg_slots(), 255);
    assert!(is_illegal_argument(widest.as_spreader(w.long_array, 0)));
    assert_eq!(widest.as_spreader_at(0, w.long_array, 127).unwrap().ty().arg_slots(), 2);

    assert!(is_illegal_argument(longs.as_collector(w.long_array, 128)));
    assert!(is_illegal_argument(longs.as_collector(w.long_array, ARG_SLOT_LIMIT + 1)));

    let mut params = collector.ty().params().to_vec();
    params.push(Kind::LONG);
    let too_wide = TypeDescriptor::new(Kind::Void, params);
    let reorder: Vec<usize> = (0..127).collect();
    assert!(is_illegal_argument(permute_arguments(&collector, &too_wide, &reorder)));
}
