//! Shared class graph for the integration tests
//!
//! Package `a` holds `Parent`, `Peer`, `Calc`, `Counter`, `SubCounter` and
//! `Broken`; package `b` holds `Child` (a subclass of `a.Parent`) and
//! `Stranger`.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mh_engine::{
    ClassId, ClassRegistryBuilder, ClassSpec, InvokeError, Kind, Modifiers, Runtime,
    RuntimeOptions, TypeDescriptor, Value, WellKnownClasses,
};
use parking_lot::Mutex;

pub struct Fixture {
    pub runtime: Arc<Runtime>,
    pub wk: WellKnownClasses,
    pub parent: ClassId,
    pub peer: ClassId,
    pub child: ClassId,
    pub stranger: ClassId,
    pub calc: ClassId,
    pub counter: ClassId,
    pub sub_counter: ClassId,
    pub broken: ClassId,
    pub int_array: ClassId,
    /// Times `a.Counter`'s initializer ran
    pub counter_inits: Arc<AtomicUsize>,
    /// Initializer names in the order they ran
    pub init_order: Arc<Mutex<Vec<&'static str>>>,
}

pub fn ty<const N: usize>(ret: Kind, params: [Kind; N]) -> TypeDescriptor {
    TypeDescriptor::new(ret, params)
}

pub fn int_method() -> TypeDescriptor {
    ty(Kind::INT, [])
}

fn constant(value: i32) -> impl Fn(&[Value]) -> Result<Value, InvokeError> + Send + Sync + 'static {
    move |_| Ok(Value::Int(value))
}

pub fn fixture() -> Fixture {
    fixture_with(RuntimeOptions::default())
}

pub fn fixture_with(options: RuntimeOptions) -> Fixture {
    let mut builder = ClassRegistryBuilder::new();
    let wk = builder.well_known().clone();
    let object = wk.object_kind();
    let int_array = builder.array_of(Kind::INT);

    let parent = builder.define(
        ClassSpec::new("a.Parent")
            .constructor(Modifiers::PUBLIC, Vec::new(), |_| Ok(Value::Void))
            .method("pubM", Modifiers::PUBLIC, int_method(), constant(1))
            .method("protM", Modifiers::PROTECTED, int_method(), constant(2))
            .method("pkgM", Modifiers::empty(), int_method(), constant(3))
            .method("privM", Modifiers::PRIVATE, int_method(), constant(4))
            .method(
                "protS",
                Modifiers::PROTECTED | Modifiers::STATIC,
                int_method(),
                constant(5),
            ),
    );
    let peer = builder.define(ClassSpec::new("a.Peer"));
    let child = builder.define(
        ClassSpec::new("b.Child")
            .extends(parent)
            .constructor(Modifiers::PUBLIC, Vec::new(), |_| Ok(Value::Void))
            .method("pubM", Modifiers::PUBLIC, int_method(), constant(10)),
    );
    let stranger = builder.define(ClassSpec::new("b.Stranger"));

    let calc = builder.define(
        ClassSpec::new("a.Calc")
            .constructor(Modifiers::PUBLIC, Vec::new(), |_| Ok(Value::Void))
            .method(
                "add",
                Modifiers::PUBLIC,
                ty(Kind::INT, [Kind::INT, Kind::INT]),
                |args| {
                    let a = args[1].as_int().unwrap_or_default();
                    let b = args[2].as_int().unwrap_or_default();
                    Ok(Value::Int(a.wrapping_add(b)))
                },
            )
            .method(
                "sum",
                Modifiers::PUBLIC | Modifiers::STATIC | Modifiers::VARARGS,
                ty(Kind::INT, [Kind::Reference(int_array)]),
                |args| {
                    let total = args[0]
                        .array_elements()
                        .unwrap_or_default()
                        .iter()
                        .filter_map(Value::as_int)
                        .sum();
                    Ok(Value::Int(total))
                },
            )
            .method(
                "count",
                Modifiers::PUBLIC | Modifiers::STATIC | Modifiers::VARARGS,
                ty(Kind::INT, [Kind::Reference(wk.object_array)]),
                |args| {
                    let len = args[0].array_elements().map(|e| e.len()).unwrap_or(0);
                    Ok(Value::Int(len as i32))
                },
            )
            .method(
                "identity",
                Modifiers::PUBLIC | Modifiers::STATIC,
                ty(object, [object]),
                |args| Ok(args[0].clone()),
            ),
    );

    let counter_inits = Arc::new(AtomicUsize::new(0));
    let init_order = Arc::new(Mutex::new(Vec::new()));

    let runs = Arc::clone(&counter_inits);
    let order = Arc::clone(&init_order);
    let counter = builder.define(
        ClassSpec::new("a.Counter")
            .field("value", Modifiers::PUBLIC | Modifiers::STATIC, Kind::INT)
            .method(
                "peek",
                Modifiers::PUBLIC | Modifiers::STATIC,
                int_method(),
                constant(7),
            )
            .initializer(move |class| {
                thread::sleep(Duration::from_millis(20));
                runs.fetch_add(1, Ordering::SeqCst);
                order.lock().push("a.Counter");
                if let Some(slot) = class.static_slot("value") {
                    class.set_static(slot, Value::Int(42));
                }
                Ok(())
            }),
    );

    let order = Arc::clone(&init_order);
    let sub_counter = builder.define(
        ClassSpec::new("a.SubCounter")
            .extends(counter)
            .method(
                "ping",
                Modifiers::PUBLIC | Modifiers::STATIC,
                int_method(),
                constant(8),
            )
            .initializer(move |_| {
                order.lock().push("a.SubCounter");
                Ok(())
            }),
    );

    let broken = builder.define(
        ClassSpec::new("a.Broken")
            .method(
                "ping",
                Modifiers::PUBLIC | Modifiers::STATIC,
                int_method(),
                constant(9),
            )
            .initializer(|_| Err(InvokeError::Thrown("ExceptionInInitializerError".into()))),
    );

    let registry = Arc::new(builder.build());
    Fixture {
        runtime: Runtime::with_options(registry, options),
        wk,
        parent,
        peer,
        child,
        stranger,
        calc,
        counter,
        sub_counter,
        broken,
        int_array,
        counter_inits,
        init_order,
    }
}

impl Fixture {
    /// New instance through the class's public no-arg constructor
    pub fn instance(&self, class: ClassId) -> Value {
        let ctor = self
            .runtime
            .lookup(class)
            .find_constructor(class, &ty(Kind::Void, []))
            .unwrap();
        let site = ctor.ty().clone();
        ctor.invoke_exact(&site, vec![]).unwrap()
    }

    pub fn boxed(&self, value: Value) -> Value {
        value.boxed(&self.wk)
    }

    pub fn object(&self) -> Kind {
        self.wk.object_kind()
    }
}
