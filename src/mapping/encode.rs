//! mapping::encode
//!
//! Model instances into JSON.

use serde_json::{Map, Value};

use super::Mapper;
use crate::schema::{AnyResource, FieldKind, ModelType, Slot};

impl<'a> Mapper<'a> {
    /// Serialize `instance`.
    ///
    /// Only serializable properties are written, under their remote names.
    /// With a template, only keys present in the template are written, and
    /// nested object or array templates restrict nested instances the same
    /// way. An instance reached again while it is being encoded becomes
    /// `null`.
    pub fn encode(&self, ty: ModelType, instance: &AnyResource, template: Option<&Value>) -> Value {
        let mut path = Vec::new();
        self.encode_instance(ty, instance, template, &mut path)
    }

    fn encode_instance(
        &self,
        ty: ModelType,
        instance: &AnyResource,
        template: Option<&Value>,
        path: &mut Vec<usize>,
    ) -> Value {
        if path.contains(&instance.addr()) {
            tracing::trace!("{}: cycle encoded as null", ty.name());
            return Value::Null;
        }
        path.push(instance.addr());

        let restrict = template.and_then(Value::as_object);
        let mut out = Map::new();
        for field in ty.fields() {
            if !self.registry.should_property_be_serialized(ty, field.name) {
                continue;
            }
            let remote = self.registry.field_name_for_property(ty.type_id(), field.name);
            let nested_template = match restrict {
                Some(keys) => match keys.get(&remote) {
                    Some(nested) => Some(nested),
                    None => continue,
                },
                None => None,
            };
            let Some(slot) = ty.read(instance, field.name) else {
                continue;
            };

            let value = match (slot, field.kind) {
                (Slot::Value(value), _) => value,
                (Slot::Object(Some(child)), FieldKind::Object(child_ty)) => {
                    self.encode_instance(child_ty, &child, nested_template, path)
                }
                (Slot::Array(items), FieldKind::Array(child_ty)) => {
                    let element_template = nested_template
                        .and_then(Value::as_array)
                        .and_then(|t| t.first());
                    Value::Array(
                        items
                            .iter()
                            .map(|item| self.encode_instance(child_ty, item, element_template, path))
                            .collect(),
                    )
                }
                _ => Value::Null,
            };
            out.insert(remote, value);
        }

        path.pop();
        Value::Object(out)
    }
}
