//! mapping
//!
//! JSON value trees to typed object graphs and back.
//!
//! # Design
//!
//! A [`Mapper`] borrows the registry and identity index of one manager for
//! the duration of a decode or encode. It never holds an instance lock while
//! recursing: property reads and writes lock the instance for a single call
//! each, and nested instances are fully decoded before they are written into
//! their parent.
//!
//! Decoding is permissive. Unknown keys are skipped, nulls are skipped unless
//! `overwrite_nulls` is set, and values a property rejects are logged and
//! skipped.
//!
//! # Modules
//!
//! - `decode`: JSON → objects, identity resolution, collection merge and sort
//! - `encode`: objects → JSON with whitelists, reverse mapping and templates

mod decode;
mod encode;

use std::cmp::Ordering;

use serde_json::Value;
use thiserror::Error;

use crate::manager::Manager;
use crate::metadata::ParentLink;
use crate::registry::{IdentityIndex, Registry};

/// Errors from local JSON decoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    /// The text is not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(String),

    /// No JSON object was found where the model should be.
    #[error("no {model} object at class depth {depth}")]
    NoObject { model: &'static str, depth: usize },
}

impl From<serde_json::Error> for MappingError {
    fn from(e: serde_json::Error) -> Self {
        MappingError::Json(e.to_string())
    }
}

/// How a host is laid out in a response tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Layout {
    /// Depth at which the native type is instantiated. `None` uses the
    /// host's default (0 for a resource, 1 for a collection).
    pub class_depth: Option<usize>,
    /// Merge into an existing collection instead of replacing it.
    pub append: bool,
    /// Property to sort a collection by after decoding.
    pub sort_key: Option<String>,
}

/// Values found `depth` container levels below `tree`.
///
/// Level 0 is the tree itself. Each further level takes the values of
/// objects (in key order) and the elements of arrays; scalars are dropped.
pub fn descend(tree: &Value, depth: usize) -> Vec<&Value> {
    let mut level = vec![tree];
    for _ in 0..depth {
        let mut next = Vec::new();
        for value in level {
            match value {
                Value::Object(map) => next.extend(map.values()),
                Value::Array(items) => next.extend(items.iter()),
                _ => {}
            }
        }
        level = next;
    }
    level
}

fn rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values used for sort keys.
///
/// Values of different kinds order null < bool < number < string < array <
/// object. Arrays and objects compare equal among themselves.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Decoder/encoder bound to one manager's registry and identity index.
#[derive(Clone)]
pub struct Mapper<'a> {
    registry: &'a Registry,
    index: &'a IdentityIndex,
    overwrite_nulls: bool,
    parent: Option<(&'a Manager, ParentLink)>,
}

impl<'a> Mapper<'a> {
    pub fn new(registry: &'a Registry, index: &'a IdentityIndex, overwrite_nulls: bool) -> Self {
        Self {
            registry,
            index,
            overwrite_nulls,
            parent: None,
        }
    }

    /// Link every instance this mapper creates or updates below `parent`.
    pub(crate) fn with_parent(mut self, manager: &'a Manager, parent: ParentLink) -> Self {
        self.parent = Some((manager, parent));
        self
    }

    pub fn registry(&self) -> &Registry {
        self.registry
    }

    pub fn index(&self) -> &IdentityIndex {
        self.index
    }
}

#[cfg(test)]
mod tests {
    use std::cmp::Ordering;

    use serde_json::{json, Value};

    use super::*;
    use crate::binding::Resource;
    use crate::schema::{AnyResource, Field, Model, ModelType, Slot};

    #[derive(Debug, Default)]
    struct Address {
        street: String,
        city: String,
    }

    impl Model for Address {
        const NAME: &'static str = "Address";

        fn fields() -> &'static [Field] {
            const FIELDS: &[Field] = &[Field::value("street"), Field::value("city")];
            FIELDS
        }

        fn read(&self, property: &str) -> Option<Slot> {
            match property {
                "street" => Some(Slot::value(&self.street)),
                "city" => Some(Slot::value(&self.city)),
                _ => None,
            }
        }

        fn write(&mut self, property: &str, value: Slot) -> bool {
            match property {
                "street" => value.assign(&mut self.street),
                "city" => value.assign(&mut self.city),
                _ => false,
            }
        }
    }

    #[derive(Debug, Default)]
    struct Pet {
        id: Option<i64>,
        name: String,
    }

    impl Model for Pet {
        const NAME: &'static str = "Pet";

        fn fields() -> &'static [Field] {
            const FIELDS: &[Field] = &[Field::value("id"), Field::value("name")];
            FIELDS
        }

        fn identity() -> Option<&'static str> {
            Some("id")
        }

        fn read(&self, property: &str) -> Option<Slot> {
            match property {
                "id" => Some(Slot::value(&self.id)),
                "name" => Some(Slot::value(&self.name)),
                _ => None,
            }
        }

        fn write(&mut self, property: &str, value: Slot) -> bool {
            match property {
                "id" => value.assign(&mut self.id),
                "name" => value.assign(&mut self.name),
                _ => false,
            }
        }
    }

    #[derive(Debug, Default)]
    struct Person {
        id: Option<i64>,
        name: String,
        nickname: Option<String>,
        password: String,
        address: Option<Resource<Address>>,
        pets: Vec<Resource<Pet>>,
        friend: Option<Resource<Person>>,
    }

    impl Model for Person {
        const NAME: &'static str = "Person";

        fn fields() -> &'static [Field] {
            const FIELDS: &[Field] = &[
                Field::value("id"),
                Field::value("name"),
                Field::value("nickname"),
                Field::value("password").skip_serializing(),
                Field::object("address", ModelType::of::<Address>()),
                Field::array("pets", ModelType::of::<Pet>()),
                Field::object("friend", ModelType::of::<Person>()),
            ];
            FIELDS
        }

        fn identity() -> Option<&'static str> {
            Some("id")
        }

        fn read(&self, property: &str) -> Option<Slot> {
            match property {
                "id" => Some(Slot::value(&self.id)),
                "name" => Some(Slot::value(&self.name)),
                "nickname" => Some(Slot::value(&self.nickname)),
                "password" => Some(Slot::value(&self.password)),
                "address" => Some(Slot::object(&self.address)),
                "pets" => Some(Slot::array(&self.pets)),
                "friend" => Some(Slot::object(&self.friend)),
                _ => None,
            }
        }

        fn write(&mut self, property: &str, value: Slot) -> bool {
            match property {
                "id" => value.assign(&mut self.id),
                "name" => value.assign(&mut self.name),
                "nickname" => value.assign(&mut self.nickname),
                "password" => value.assign(&mut self.password),
                "address" => value.assign_object(&mut self.address),
                "pets" => value.assign_array(&mut self.pets),
                "friend" => value.assign_object(&mut self.friend),
                _ => false,
            }
        }
    }

    fn object(value: Value) -> serde_json::Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {}", other),
        }
    }

    fn person_type() -> ModelType {
        ModelType::of::<Person>()
    }

    fn pet_type() -> ModelType {
        ModelType::of::<Pet>()
    }

    #[test]
    fn descend_flattens_containers_in_order() {
        let tree = json!({"a": [1, 2], "b": {"c": 3}, "d": "x"});
        assert_eq!(descend(&tree, 0), vec![&tree]);
        assert_eq!(descend(&tree, 1).len(), 3);
        assert_eq!(descend(&tree, 2), vec![&json!(1), &json!(2), &json!(3)]);
        assert!(descend(&tree, 3).is_empty());
    }

    #[test]
    fn compare_values_orders_by_kind_then_value() {
        assert_eq!(compare_values(&json!(2), &json!(10)), Ordering::Less);
        assert_eq!(compare_values(&json!(2.5), &json!(2)), Ordering::Greater);
        assert_eq!(compare_values(&json!("b"), &json!("a")), Ordering::Greater);
        assert_eq!(compare_values(&Value::Null, &json!(false)), Ordering::Less);
        assert_eq!(compare_values(&json!(100), &json!("1")), Ordering::Less);
    }

    #[test]
    fn decode_applies_mappings_and_skips_unknown_keys_and_nulls() {
        let mut registry = Registry::default();
        registry.map_remote_field_for(person_type().type_id(), "full_name", "name");
        let index = IdentityIndex::new();
        let mapper = Mapper::new(&registry, &index, false);

        let person = Resource::new(Person {
            nickname: Some("Bo".to_string()),
            ..Default::default()
        });
        let instance = AnyResource::new(person.clone());
        mapper.decode_into(
            person_type(),
            &instance,
            &object(json!({"id": 1, "full_name": "Bob", "shoe_size": 44, "nickname": null})),
        );

        person.read(|p| {
            assert_eq!(p.id, Some(1));
            assert_eq!(p.name, "Bob");
            assert_eq!(p.nickname.as_deref(), Some("Bo"));
        });
    }

    #[test]
    fn overwrite_nulls_clears_optional_properties() {
        let registry = Registry::default();
        let index = IdentityIndex::new();
        let mapper = Mapper::new(&registry, &index, true);

        let person = Resource::new(Person {
            nickname: Some("Bo".to_string()),
            ..Default::default()
        });
        mapper.decode_into(
            person_type(),
            &AnyResource::new(person.clone()),
            &object(json!({"nickname": null})),
        );
        assert!(person.read(|p| p.nickname.is_none()));
    }

    #[test]
    fn mismatched_values_are_skipped() {
        let registry = Registry::default();
        let index = IdentityIndex::new();
        let mapper = Mapper::new(&registry, &index, false);

        let person = Resource::new(Person::default());
        mapper.decode_into(
            person_type(),
            &AnyResource::new(person.clone()),
            &object(json!({"id": "not a number", "name": "Ann", "pets": "none"})),
        );
        person.read(|p| {
            assert_eq!(p.id, None);
            assert_eq!(p.name, "Ann");
            assert!(p.pets.is_empty());
        });
    }

    #[test]
    fn nested_object_without_identity_is_updated_in_place() {
        let registry = Registry::default();
        let index = IdentityIndex::new();
        let mapper = Mapper::new(&registry, &index, false);

        let address = Resource::new(Address {
            street: "Main St".to_string(),
            city: "Springfield".to_string(),
        });
        let person = Resource::new(Person {
            address: Some(address.clone()),
            ..Default::default()
        });
        mapper.decode_into(
            person_type(),
            &AnyResource::new(person.clone()),
            &object(json!({"address": {"city": "Shelbyville"}})),
        );

        let current = person.read(|p| p.address.clone()).unwrap();
        assert!(current.ptr_eq(&address));
        address.read(|a| {
            assert_eq!(a.street, "Main St");
            assert_eq!(a.city, "Shelbyville");
        });
    }

    #[test]
    fn duplicate_keys_resolve_to_one_instance_last_write_wins() {
        let registry = Registry::default();
        let index = IdentityIndex::new();
        let mapper = Mapper::new(&registry, &index, false);

        let person = Resource::new(Person::default());
        mapper.decode_into(
            person_type(),
            &AnyResource::new(person.clone()),
            &object(json!({"pets": [
                {"id": 1, "name": "Rex"},
                {"id": 2, "name": "Tom"},
                {"id": 1, "name": "Rex II"}
            ]})),
        );

        let pets = person.read(|p| p.pets.clone());
        assert_eq!(pets.len(), 3);
        assert!(pets[0].ptr_eq(&pets[2]));
        assert_eq!(pets[0].read(|p| p.name.clone()), "Rex II");
    }

    #[test]
    fn instantiate_updates_live_instance_in_place() {
        let registry = Registry::default();
        let index = IdentityIndex::new();
        let mapper = Mapper::new(&registry, &index, false);

        let first = mapper.instantiate(pet_type(), &object(json!({"id": 7, "name": "Rex"})));
        let second = mapper.instantiate(pet_type(), &object(json!({"id": "7", "name": "Max"})));
        assert!(first.same(&second));

        let pet = first.downcast::<Pet>().unwrap();
        assert_eq!(pet.read(|p| p.name.clone()), "Max");
        assert!(index.lookup_typed::<Pet>(&json!(7)).is_some());
    }

    #[test]
    fn claim_does_not_steal_a_live_key() {
        let registry = Registry::default();
        let index = IdentityIndex::new();
        let mapper = Mapper::new(&registry, &index, false);

        let live = mapper.instantiate(pet_type(), &object(json!({"id": 3, "name": "Rex"})));
        let other = AnyResource::new(Resource::new(Pet::default()));
        mapper.claim(pet_type(), &other, &object(json!({"id": 3, "name": "Max"})));

        assert!(index.lookup_typed::<Pet>(&json!(3)).is_some_and(|p| AnyResource::new(p).same(&live)));
        let live = live.downcast::<Pet>().unwrap();
        assert_eq!(live.read(|p| p.name.clone()), "Max");
    }

    fn pet(id: i64, name: &str) -> AnyResource {
        AnyResource::new(Resource::new(Pet {
            id: Some(id),
            name: name.to_string(),
        }))
    }

    #[test]
    fn append_merge_keeps_positions_and_appends_new() {
        let registry = Registry::default();
        let index = IdentityIndex::new();
        let mapper = Mapper::new(&registry, &index, false);

        let existing = vec![pet(1, "Rex"), pet(99, "Old")];
        let one = object(json!({"id": 1, "name": "Rex updated"}));
        let two = object(json!({"id": 2, "name": "New"}));
        let merged = mapper.merge(pet_type(), &existing, &[&one, &two], true);

        assert_eq!(merged.len(), 3);
        assert!(merged[0].same(&existing[0]));
        assert!(merged[1].same(&existing[1]));
        let names: Vec<String> = merged
            .iter()
            .map(|p| p.downcast::<Pet>().unwrap().read(|p| p.name.clone()))
            .collect();
        assert_eq!(names, vec!["Rex updated", "Old", "New"]);
    }

    #[test]
    fn replace_merge_follows_incoming_order_without_duplicates() {
        let registry = Registry::default();
        let index = IdentityIndex::new();
        let mapper = Mapper::new(&registry, &index, false);

        let existing = vec![pet(1, "Rex"), pet(99, "Old")];
        let two = object(json!({"id": 2}));
        let one = object(json!({"id": 1, "name": "Rex again"}));
        let merged = mapper.merge(pet_type(), &existing, &[&two, &one, &two], false);

        assert_eq!(merged.len(), 2);
        assert!(merged[1].same(&existing[0]));
        assert_eq!(
            merged[1].downcast::<Pet>().unwrap().read(|p| p.name.clone()),
            "Rex again"
        );
    }

    #[test]
    fn sort_orders_by_property_stably() {
        let registry = Registry::default();
        let index = IdentityIndex::new();
        let mapper = Mapper::new(&registry, &index, false);

        let mut items = vec![pet(3, "b"), pet(1, "a"), pet(2, "b")];
        mapper.sort(pet_type(), &mut items, "name");
        let ids: Vec<Option<i64>> = items
            .iter()
            .map(|p| p.downcast::<Pet>().unwrap().read(|p| p.id))
            .collect();
        assert_eq!(ids, vec![Some(1), Some(3), Some(2)]);
    }

    #[test]
    fn encode_uses_remote_names_and_skips_hidden_fields() {
        let mut registry = Registry::default();
        registry.map_remote_field("full_name", "name");
        let index = IdentityIndex::new();
        let mapper = Mapper::new(&registry, &index, false);

        let person = Resource::new(Person {
            id: Some(5),
            name: "Ann".to_string(),
            password: "secret".to_string(),
            pets: vec![Resource::new(Pet {
                id: Some(1),
                name: "Rex".to_string(),
            })],
            ..Default::default()
        });
        let encoded = mapper.encode(person_type(), &AnyResource::new(person), None);
        assert_eq!(
            encoded,
            json!({
                "id": 5,
                "full_name": "Ann",
                "nickname": null,
                "address": null,
                "pets": [{"id": 1, "name": "Rex"}],
                "friend": null
            })
        );
    }

    #[test]
    fn encode_template_restricts_keys_recursively() {
        let registry = Registry::default();
        let index = IdentityIndex::new();
        let mapper = Mapper::new(&registry, &index, false);

        let person = Resource::new(Person {
            id: Some(5),
            name: "Ann".to_string(),
            address: Some(Resource::new(Address {
                street: "Main St".to_string(),
                city: "Springfield".to_string(),
            })),
            pets: vec![Resource::new(Pet {
                id: Some(1),
                name: "Rex".to_string(),
            })],
            ..Default::default()
        });
        let template = json!({"name": 0, "address": {"city": ""}, "pets": [{"name": null}]});
        let encoded = mapper.encode(person_type(), &AnyResource::new(person), Some(&template));
        assert_eq!(
            encoded,
            json!({"name": "Ann", "address": {"city": "Springfield"}, "pets": [{"name": "Rex"}]})
        );
    }

    #[test]
    fn whitelist_limits_encoded_fields() {
        let mut registry = Registry::default();
        registry.add_serialization_keys(person_type().type_id(), &["id"]);
        let index = IdentityIndex::new();
        let mapper = Mapper::new(&registry, &index, false);

        let person = Resource::new(Person {
            id: Some(9),
            name: "Ann".to_string(),
            ..Default::default()
        });
        assert_eq!(
            mapper.encode(person_type(), &AnyResource::new(person), None),
            json!({"id": 9})
        );
    }

    #[test]
    fn cycles_encode_as_null() {
        let registry = Registry::default();
        let index = IdentityIndex::new();
        let mapper = Mapper::new(&registry, &index, false);

        let a = Resource::new(Person {
            id: Some(1),
            ..Default::default()
        });
        let b = Resource::new(Person {
            id: Some(2),
            friend: Some(a.clone()),
            ..Default::default()
        });
        a.update(|p| p.friend = Some(b.clone()));

        let encoded = mapper.encode(person_type(), &AnyResource::new(a.clone()), None);
        assert_eq!(encoded["friend"]["id"], json!(2));
        assert_eq!(encoded["friend"]["friend"], Value::Null);

        // break the cycle so both instances are freed
        a.update(|p| p.friend = None);
    }
}
