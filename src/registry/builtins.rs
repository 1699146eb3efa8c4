//! Registrations every process gets from [`Registry::with_builtins`].

use super::Registry;

/// A function that adds entries to a fresh registry.
pub struct BuiltinRegistration(pub fn(&mut Registry));

inventory::collect!(BuiltinRegistration);

fn register_codecs(registry: &mut Registry) {
    registry
        .register_codec::<i32>("i32")
        .register_codec::<i64>("i64")
        .register_codec::<u32>("u32")
        .register_codec::<u64>("u64")
        .register_codec::<f64>("f64")
        .register_codec::<bool>("bool")
        .register_codec::<String>("String");
}

fn register_comparators(registry: &mut Registry) {
    registry
        .register_natural_order::<i32>("natural_i32")
        .register_natural_order::<i64>("natural_i64")
        .register_natural_order::<u32>("natural_u32")
        .register_natural_order::<u64>("natural_u64")
        .register_natural_order::<String>("natural_string");
}

fn register_key_functions(registry: &mut Registry) {
    registry
        .register_key_function::<i32, i32, _>("identity_i32", |v| *v)
        .register_key_function::<i64, i64, _>("identity_i64", |v| *v)
        .register_key_function::<u64, u64, _>("identity_u64", |v| *v)
        .register_key_function::<String, String, _>("identity_string", |v| v.clone());
}

inventory::submit! { BuiltinRegistration(register_codecs) }
inventory::submit! { BuiltinRegistration(register_comparators) }
inventory::submit! { BuiltinRegistration(register_key_functions) }
