//! Access control across packages
//!
//! Covers the modifier × caller matrix, protected access through a
//! superclass-typed receiver, lookup mode transitions and class visibility.

mod common;

use common::{fixture, int_method, ty};
use mh_engine::{ClassId, InvokeError, Kind, LookupModes};

fn resolve(fx: &common::Fixture, caller: ClassId, refc: ClassId, name: &str) -> Result<i32, InvokeError> {
    let handle = fx.runtime.lookup(caller).find_virtual(refc, name, &int_method())?;
    let receiver = fx.instance(fx.child);
    let site = handle.ty().clone();
    let result = handle.invoke(&site, vec![receiver])?;
    Ok(result.as_int().unwrap())
}

#[test]
fn test_access_matrix() {
    let fx = fixture();
    // (member, same package, subclass in other package, unrelated in other package)
    let table = [
        ("pubM", true, true, true),
        ("protM", true, true, false),
        ("pkgM", true, false, false),
        ("privM", false, false, false),
    ];

    for (name, same_pkg, subclass, unrelated) in table {
        let outcomes = [
            (fx.peer, fx.parent, same_pkg),
            (fx.child, fx.child, subclass),
            (fx.stranger, fx.parent, unrelated),
        ];
        for (caller, refc, allowed) in outcomes {
            let result = resolve(&fx, caller, refc, name);
            if allowed {
                assert!(result.is_ok(), "{} from {:?}: {:?}", name, caller, result);
            } else {
                assert!(
                    matches!(result, Err(InvokeError::IllegalAccess(_))),
                    "{} from {:?}: {:?}",
                    name,
                    caller,
                    result
                );
            }
        }
    }
}

#[test]
fn test_private_visible_to_declaring_class() {
    let fx = fixture();
    assert_eq!(resolve(&fx, fx.parent, fx.parent, "privM").unwrap(), 4);
}

#[test]
fn test_public_method_dispatches_on_runtime_class() {
    let fx = fixture();
    assert_eq!(resolve(&fx, fx.stranger, fx.parent, "pubM").unwrap(), 10);
}

#[test]
fn test_protected_requires_subclass_typed_receiver() {
    let fx = fixture();
    let lookup = fx.runtime.lookup(fx.child);

    let through_child = lookup.find_virtual(fx.child, "protM", &int_method()).unwrap();
    assert_eq!(through_child.ty().parameter(0), Some(Kind::Reference(fx.child)));
    let site = through_child.ty().clone();
    let result = through_child
        .invoke_exact(&site, vec![fx.instance(fx.child)])
        .unwrap();
    assert_eq!(result.as_int(), Some(2));

    // The runtime object would be a Child, but the static receiver type is Parent
    let err = lookup
        .find_virtual(fx.parent, "protM", &int_method())
        .unwrap_err();
    assert!(matches!(err, InvokeError::IllegalAccess(_)));
}

#[test]
fn test_protected_static_from_subclass() {
    let fx = fixture();
    let handle = fx
        .runtime
        .lookup(fx.child)
        .find_static(fx.parent, "protS", &int_method())
        .unwrap();
    let site = handle.ty().clone();
    assert_eq!(handle.invoke_exact(&site, vec![]).unwrap().as_int(), Some(5));

    assert!(matches!(
        fx.runtime
            .lookup(fx.stranger)
            .find_static(fx.parent, "protS", &int_method()),
        Err(InvokeError::IllegalAccess(_))
    ));
}

#[test]
fn test_public_lookup_sees_only_public() {
    let fx = fixture();
    let lookup = fx.runtime.public_lookup();
    assert_eq!(lookup.lookup_modes(), LookupModes::PUBLIC);
    assert!(lookup.find_virtual(fx.parent, "pubM", &int_method()).is_ok());
    for name in ["protM", "pkgM", "privM"] {
        assert!(matches!(
            lookup.find_virtual(fx.parent, name, &int_method()),
            Err(InvokeError::IllegalAccess(_))
        ));
    }
}

#[test]
fn test_weakened_and_moved_lookups() {
    let fx = fixture();
    let full = fx.runtime.lookup(fx.parent);

    let weak = full.weaken_to_public();
    assert!(matches!(
        weak.find_virtual(fx.parent, "privM", &int_method()),
        Err(InvokeError::IllegalAccess(_))
    ));

    let at_peer = full.in_class(fx.peer);
    assert_eq!(at_peer.lookup_class(), fx.peer);
    assert!(at_peer.find_virtual(fx.parent, "pkgM", &int_method()).is_ok());
    assert!(at_peer.find_virtual(fx.parent, "privM", &int_method()).is_err());

    let no_package = full.drop_lookup_mode(LookupModes::PACKAGE).unwrap();
    assert!(matches!(
        no_package.find_virtual(fx.parent, "pkgM", &int_method()),
        Err(InvokeError::IllegalAccess(_))
    ));
}

#[test]
fn test_missing_members_and_wrong_descriptors() {
    let fx = fixture();
    let lookup = fx.runtime.lookup(fx.parent);
    assert!(matches!(
        lookup.find_virtual(fx.parent, "nope", &int_method()),
        Err(InvokeError::NoSuchMember(_))
    ));
    assert!(matches!(
        lookup.find_virtual(fx.parent, "pubM", &ty(Kind::LONG, [])),
        Err(InvokeError::NoSuchMember(_))
    ));
    assert!(matches!(
        lookup.find_virtual(fx.parent, "<clinit>", &ty(Kind::Void, [])),
        Err(InvokeError::NoSuchMember(_))
    ));
}
