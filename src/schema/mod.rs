//! schema
//!
//! Explicit per-type schema descriptors.
//!
//! # Design
//!
//! The mapping engine never inspects a type at runtime. Every bindable model
//! implements [`Model`], which declares its fields in order together with
//! their kind (leaf value, nested model, list of nested models), whether they
//! take part in serialization, and which property (if any) identifies an
//! instance. Leaf values go through serde, so any `Serialize +
//! DeserializeOwned` field type works without further glue.
//!
//! [`ModelType`] is the type-erased handle the engine passes around. It is a
//! bundle of monomorphized function pointers, so it is `Copy` and can live in
//! `const` field tables, including self-referential ones.
//!
//! # Example
//!
//! ```
//! use restbind::schema::{Field, Model, ModelType, Slot};
//!
//! #[derive(Debug, Default)]
//! struct Tag {
//!     id: Option<i64>,
//!     label: String,
//! }
//!
//! impl Model for Tag {
//!     const NAME: &'static str = "Tag";
//!
//!     fn fields() -> &'static [Field] {
//!         const FIELDS: &[Field] = &[Field::value("id"), Field::value("label")];
//!         FIELDS
//!     }
//!
//!     fn identity() -> Option<&'static str> {
//!         Some("id")
//!     }
//!
//!     fn read(&self, property: &str) -> Option<Slot> {
//!         match property {
//!             "id" => Some(Slot::value(&self.id)),
//!             "label" => Some(Slot::value(&self.label)),
//!             _ => None,
//!         }
//!     }
//!
//!     fn write(&mut self, property: &str, value: Slot) -> bool {
//!         match property {
//!             "id" => value.assign(&mut self.id),
//!             "label" => value.assign(&mut self.label),
//!             _ => false,
//!         }
//!     }
//! }
//!
//! let ty = ModelType::of::<Tag>();
//! assert_eq!(ty.name(), "Tag");
//! assert_eq!(ty.identity(), Some("id"));
//! ```

mod slot;

pub use slot::{AnyResource, Slot, WeakAnyResource};

use std::any::TypeId;
use std::fmt;

use crate::binding::{Resource, Target};
use crate::manager::Manager;
use crate::metadata::ParentLink;

/// Kind of a declared field.
#[derive(Debug, Clone, Copy)]
pub enum FieldKind {
    /// Leaf value converted through serde (scalars, strings, generic JSON).
    Value,
    /// A single nested model, possibly absent.
    Object(ModelType),
    /// An ordered list of nested models.
    Array(ModelType),
}

/// One declared property of a model.
#[derive(Debug, Clone, Copy)]
pub struct Field {
    /// Local property name.
    pub name: &'static str,
    /// What the property holds.
    pub kind: FieldKind,
    /// Whether the property takes part in encoding.
    pub serialize: bool,
}

impl Field {
    /// Declare a leaf value property.
    pub const fn value(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Value,
            serialize: true,
        }
    }

    /// Declare a nested model property.
    pub const fn object(name: &'static str, ty: ModelType) -> Self {
        Self {
            name,
            kind: FieldKind::Object(ty),
            serialize: true,
        }
    }

    /// Declare a list-of-models property.
    pub const fn array(name: &'static str, ty: ModelType) -> Self {
        Self {
            name,
            kind: FieldKind::Array(ty),
            serialize: true,
        }
    }

    /// Exclude this property from encoding. It is still decoded.
    pub const fn skip_serializing(self) -> Self {
        Self {
            serialize: false,
            ..self
        }
    }
}

/// A type the mapping engine can populate and serialize.
///
/// Implementations are plain data: `read` hands out a [`Slot`] for a
/// property and `write` accepts one. Returning `false` from `write` means the
/// value did not fit the property; the engine skips it and keeps going.
pub trait Model: Default + Send + 'static {
    /// Name used in log output.
    const NAME: &'static str;

    /// Declared fields, in encoding order.
    fn fields() -> &'static [Field];

    /// Property whose value identifies an instance (see the identity index).
    fn identity() -> Option<&'static str> {
        None
    }

    /// Read a property.
    fn read(&self, property: &str) -> Option<Slot>;

    /// Write a property. Returns `false` if the value was rejected.
    fn write(&mut self, property: &str, value: Slot) -> bool;
}

/// Type-erased handle to a [`Model`] implementation.
#[derive(Clone, Copy)]
pub struct ModelType {
    name: &'static str,
    type_id: fn() -> TypeId,
    fields: fn() -> &'static [Field],
    identity: fn() -> Option<&'static str>,
    create: fn() -> AnyResource,
    read: fn(&AnyResource, &str) -> Option<Slot>,
    write: fn(&AnyResource, &str, Slot) -> bool,
    adopt: fn(&AnyResource, &Manager, ParentLink) -> Option<ParentLink>,
}

impl ModelType {
    /// Describe `T`.
    pub const fn of<T: Model>() -> Self {
        Self {
            name: T::NAME,
            type_id: TypeId::of::<T>,
            fields: T::fields,
            identity: T::identity,
            create: create_erased::<T>,
            read: read_erased::<T>,
            write: write_erased::<T>,
            adopt: adopt_erased::<T>,
        }
    }

    /// The model's name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The model's `TypeId`.
    pub fn type_id(&self) -> TypeId {
        (self.type_id)()
    }

    /// Whether this describes `T`.
    pub fn is<T: Model>(&self) -> bool {
        self.type_id() == TypeId::of::<T>()
    }

    /// Declared fields.
    pub fn fields(&self) -> &'static [Field] {
        (self.fields)()
    }

    /// Look up a declared field by local property name.
    pub fn field(&self, property: &str) -> Option<&'static Field> {
        self.fields().iter().find(|f| f.name == property)
    }

    /// Identifying property, if any.
    pub fn identity(&self) -> Option<&'static str> {
        (self.identity)()
    }

    /// Allocate a fresh default instance.
    pub fn create(&self) -> AnyResource {
        (self.create)()
    }

    /// Read a property of an instance of this type.
    pub fn read(&self, instance: &AnyResource, property: &str) -> Option<Slot> {
        (self.read)(instance, property)
    }

    /// Write a property of an instance of this type.
    pub fn write(&self, instance: &AnyResource, property: &str, value: Slot) -> bool {
        (self.write)(instance, property, value)
    }

    /// Attach the instance's metadata record below `parent`, returning the
    /// instance's own link for its children.
    pub(crate) fn adopt(
        &self,
        instance: &AnyResource,
        manager: &Manager,
        parent: ParentLink,
    ) -> Option<ParentLink> {
        (self.adopt)(instance, manager, parent)
    }
}

impl PartialEq for ModelType {
    fn eq(&self, other: &Self) -> bool {
        self.type_id() == other.type_id()
    }
}

impl Eq for ModelType {}

impl fmt::Debug for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ModelType").field(&self.name).finish()
    }
}

fn create_erased<T: Model>() -> AnyResource {
    AnyResource::new(Resource::new(T::default()))
}

fn read_erased<T: Model>(instance: &AnyResource, property: &str) -> Option<Slot> {
    let resource = instance.downcast::<T>()?;
    let guard = resource.lock();
    guard.read(property)
}

fn write_erased<T: Model>(instance: &AnyResource, property: &str, value: Slot) -> bool {
    match instance.downcast::<T>() {
        Some(resource) => resource.lock().write(property, value),
        None => false,
    }
}

fn adopt_erased<T: Model>(
    instance: &AnyResource,
    manager: &Manager,
    parent: ParentLink,
) -> Option<ParentLink> {
    let resource = instance.downcast::<T>()?;
    let metadata = resource.bind_to(manager);
    metadata.set_parent(parent);
    Some(metadata.as_parent())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Node {
        id: Option<String>,
        secret: String,
        next: Option<Resource<Node>>,
    }

    impl Model for Node {
        const NAME: &'static str = "Node";

        fn fields() -> &'static [Field] {
            const FIELDS: &[Field] = &[
                Field::value("id"),
                Field::value("secret").skip_serializing(),
                Field::object("next", ModelType::of::<Node>()),
            ];
            FIELDS
        }

        fn identity() -> Option<&'static str> {
            Some("id")
        }

        fn read(&self, property: &str) -> Option<Slot> {
            match property {
                "id" => Some(Slot::value(&self.id)),
                "secret" => Some(Slot::value(&self.secret)),
                "next" => Some(Slot::object(&self.next)),
                _ => None,
            }
        }

        fn write(&mut self, property: &str, value: Slot) -> bool {
            match property {
                "id" => value.assign(&mut self.id),
                "secret" => value.assign(&mut self.secret),
                "next" => value.assign_object(&mut self.next),
                _ => false,
            }
        }
    }

    #[test]
    fn model_type_describes_fields() {
        let ty = ModelType::of::<Node>();
        assert_eq!(ty.name(), "Node");
        assert_eq!(ty.fields().len(), 3);
        assert!(ty.field("secret").is_some_and(|f| !f.serialize));
        assert!(ty.field("missing").is_none());
        assert!(ty.is::<Node>());
    }

    #[test]
    fn self_referential_field_points_back_to_same_type() {
        let ty = ModelType::of::<Node>();
        match ty.field("next").map(|f| f.kind) {
            Some(FieldKind::Object(child)) => assert_eq!(child, ty),
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn erased_read_and_write_round_trip() {
        let ty = ModelType::of::<Node>();
        let instance = ty.create();
        assert!(ty.write(&instance, "id", Slot::Value(serde_json::json!("n1"))));
        assert!(!ty.write(&instance, "id", Slot::Value(serde_json::json!({"no": 1}))));
        assert!(!ty.write(&instance, "unknown", Slot::Value(serde_json::json!(1))));

        match ty.read(&instance, "id") {
            Some(Slot::Value(v)) => assert_eq!(v, serde_json::json!("n1")),
            _ => panic!("expected a value slot"),
        }
    }

    #[test]
    fn model_type_debug_shows_name() {
        assert_eq!(format!("{:?}", ModelType::of::<Node>()), "ModelType(\"Node\")");
    }
}
