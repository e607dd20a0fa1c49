//! mapping::decode
//!
//! JSON objects into model instances.

use serde_json::{Map, Value};

use super::{compare_values, Mapper};
use crate::registry::IdentityKey;
use crate::schema::{AnyResource, FieldKind, ModelType, Slot};

impl<'a> Mapper<'a> {
    /// Write every recognized key of `object` into `instance`.
    pub fn decode_into(&self, ty: ModelType, instance: &AnyResource, object: &Map<String, Value>) {
        for (key, value) in object {
            let property = self.registry.property_name_for_field(ty.type_id(), key);
            let Some(field) = ty.field(&property) else {
                tracing::trace!("{}: skipping unknown key '{}'", ty.name(), key);
                continue;
            };
            if value.is_null() && !self.overwrite_nulls {
                continue;
            }

            let slot = match field.kind {
                FieldKind::Value => Slot::Value(value.clone()),
                FieldKind::Object(child_ty) => match value {
                    Value::Object(map) => {
                        let current = match ty.read(instance, &property) {
                            Some(Slot::Object(current)) => current,
                            _ => None,
                        };
                        Slot::Object(Some(self.decode_child(child_ty, current, map)))
                    }
                    Value::Null => Slot::Object(None),
                    _ => {
                        tracing::debug!(
                            "{}.{}: expected an object for {}",
                            ty.name(),
                            property,
                            child_ty.name()
                        );
                        continue;
                    }
                },
                FieldKind::Array(child_ty) => match value {
                    Value::Array(items) => Slot::Array(
                        items
                            .iter()
                            .filter_map(Value::as_object)
                            .map(|map| self.instantiate(child_ty, map))
                            .collect(),
                    ),
                    Value::Null => Slot::Array(Vec::new()),
                    _ => {
                        tracing::debug!(
                            "{}.{}: expected an array of {}",
                            ty.name(),
                            property,
                            child_ty.name()
                        );
                        continue;
                    }
                },
            };

            if !ty.write(instance, &property, slot) {
                tracing::debug!("{}.{}: value rejected", ty.name(), property);
            }
        }
    }

    /// Resolve or allocate an instance for `object` and populate it.
    ///
    /// Types with an identifying property go through the identity index, so
    /// an instance that is already live is updated in place.
    pub fn instantiate(&self, ty: ModelType, object: &Map<String, Value>) -> AnyResource {
        let instance = match self.key_of_object(ty, object) {
            Some(key) => self.index.resolve_or_insert(ty, key).0,
            None => ty.create(),
        };
        self.adopt(ty, &instance).decode_into(ty, &instance, object);
        instance
    }

    /// Register `instance` in the identity index under the key found in
    /// `object`, unless another live instance already holds that key.
    ///
    /// An instance that already holds the key keeps it and is updated from
    /// `object` as well, so it never falls behind a copy decoded outside the
    /// index.
    pub fn claim(&self, ty: ModelType, instance: &AnyResource, object: &Map<String, Value>) {
        let Some(key) = self.key_of_object(ty, object) else {
            return;
        };
        if self.index.claim(ty.type_id(), key.clone(), instance) {
            return;
        }
        let Some(holder) = self.index.lookup(ty.type_id(), &key) else {
            return;
        };
        if holder.same(instance) {
            return;
        }
        tracing::debug!(
            "{} {} is bound to another instance, updating it too",
            ty.name(),
            key
        );
        // The holder keeps its own parent links.
        let mut unlinked = self.clone();
        unlinked.parent = None;
        unlinked.decode_into(ty, &holder, object);
    }

    /// Decode `incoming` against the current elements of a collection.
    ///
    /// Incoming objects whose key matches an existing element update that
    /// element in place. In replace mode the result is the incoming order
    /// with duplicates removed. In append mode existing elements keep their
    /// positions and new ones are appended in arrival order.
    pub fn merge(
        &self,
        ty: ModelType,
        existing: &[AnyResource],
        incoming: &[&Map<String, Value>],
        append: bool,
    ) -> Vec<AnyResource> {
        let existing_keys: Vec<(Option<IdentityKey>, &AnyResource)> = existing
            .iter()
            .map(|item| (self.key_of_instance(ty, item), item))
            .collect();

        let mut decoded: Vec<AnyResource> = Vec::with_capacity(incoming.len());
        for object in incoming {
            let key = self.key_of_object(ty, object);
            let matched = key.as_ref().and_then(|key| {
                existing_keys
                    .iter()
                    .find(|(k, _)| k.as_ref() == Some(key))
                    .map(|(_, item)| (*item).clone())
            });

            let instance = match matched {
                Some(item) => {
                    self.adopt(ty, &item).decode_into(ty, &item, object);
                    self.claim(ty, &item, object);
                    item
                }
                None => self.instantiate(ty, object),
            };

            if !decoded.iter().any(|d| d.same(&instance)) {
                decoded.push(instance);
            }
        }

        if !append {
            return decoded;
        }

        let mut merged: Vec<AnyResource> = existing.to_vec();
        for instance in decoded {
            if !merged.iter().any(|m| m.same(&instance)) {
                merged.push(instance);
            }
        }
        merged
    }

    /// Stable sort by the value of `property`.
    pub fn sort(&self, ty: ModelType, items: &mut Vec<AnyResource>, property: &str) {
        let mut keyed: Vec<(Value, AnyResource)> = items
            .drain(..)
            .map(|item| {
                let value = match ty.read(&item, property) {
                    Some(Slot::Value(value)) => value,
                    _ => Value::Null,
                };
                (value, item)
            })
            .collect();
        keyed.sort_by(|a, b| compare_values(&a.0, &b.0));
        items.extend(keyed.into_iter().map(|(_, item)| item));
    }

    fn decode_child(
        &self,
        ty: ModelType,
        current: Option<AnyResource>,
        object: &Map<String, Value>,
    ) -> AnyResource {
        if let Some(current) = current {
            let in_place = match ty.identity() {
                None => true,
                Some(_) => {
                    let incoming = self.key_of_object(ty, object);
                    incoming.is_some() && incoming == self.key_of_instance(ty, &current)
                }
            };
            if in_place {
                self.adopt(ty, &current).decode_into(ty, &current, object);
                self.claim(ty, &current, object);
                return current;
            }
        }
        self.instantiate(ty, object)
    }

    /// Mapper for the children of `instance`, linking `instance` below this
    /// mapper's parent when parent tracking is on.
    fn adopt(&self, ty: ModelType, instance: &AnyResource) -> Mapper<'a> {
        if let Some((manager, parent)) = &self.parent {
            if let Some(link) = ty.adopt(instance, manager, parent.clone()) {
                return self.clone().with_parent(*manager, link);
            }
        }
        self.clone()
    }

    fn key_of_object(&self, ty: ModelType, object: &Map<String, Value>) -> Option<IdentityKey> {
        let property = ty.identity()?;
        let remote = self.registry.field_name_for_property(ty.type_id(), property);
        object
            .get(&remote)
            .or_else(|| object.get(property))
            .and_then(IdentityKey::from_value)
    }

    fn key_of_instance(&self, ty: ModelType, instance: &AnyResource) -> Option<IdentityKey> {
        let property = ty.identity()?;
        match ty.read(instance, property)? {
            Slot::Value(value) => IdentityKey::from_value(&value),
            _ => None,
        }
    }
}
