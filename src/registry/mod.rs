//! registry
//!
//! Field-name mappings, transformer chains and serialization whitelists.
//!
//! # Design
//!
//! The registry is plain data owned by a [`Manager`](crate::manager::Manager)
//! behind a read/write lock. Lookups fall back from the per-type table to the
//! global table to the name itself:
//!
//! - remote field → local property: per-type mapping, global mapping, as-is
//! - local property → remote field: the reverse of the same tables
//!
//! Transformer chains are returned as cloned `Arc`s so callers run them with
//! no lock held.
//!
//! # Example
//!
//! ```
//! use std::any::TypeId;
//! use restbind::registry::Registry;
//!
//! struct User;
//!
//! let mut registry = Registry::default();
//! registry.map_remote_field("created_at", "created");
//! registry.map_remote_field_for(TypeId::of::<User>(), "user_name", "name");
//!
//! let user = TypeId::of::<User>();
//! assert_eq!(registry.property_name_for_field(user, "user_name"), "name");
//! assert_eq!(registry.property_name_for_field(user, "created_at"), "created");
//! assert_eq!(registry.field_name_for_property(user, "name"), "user_name");
//! assert_eq!(registry.property_name_for_field(user, "email"), "email");
//! ```

pub mod identity;

pub use identity::{IdentityIndex, IdentityKey};

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::schema::ModelType;
use crate::transport::Request;

/// Mutates an outgoing request before it reaches the transport.
pub type RequestTransformer = Arc<dyn Fn(&mut Request) + Send + Sync>;

/// Rewrites a parsed response tree before it is decoded.
pub type ResponseTransformer = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// One direction-pair of name mappings.
#[derive(Debug, Clone, Default)]
struct NameTable {
    to_local: HashMap<String, String>,
    to_remote: HashMap<String, String>,
}

impl NameTable {
    fn insert(&mut self, field: &str, property: &str) {
        self.to_local.insert(field.to_string(), property.to_string());
        self.to_remote.insert(property.to_string(), field.to_string());
    }
}

/// Mapping and transformer tables for one manager.
#[derive(Clone, Default)]
pub struct Registry {
    global_names: NameTable,
    type_names: HashMap<TypeId, NameTable>,
    global_request: Vec<RequestTransformer>,
    global_response: Vec<ResponseTransformer>,
    type_request: HashMap<TypeId, Vec<RequestTransformer>>,
    type_response: HashMap<TypeId, Vec<ResponseTransformer>>,
    serialization_keys: HashMap<TypeId, Vec<String>>,
}

impl Registry {
    /// Map a remote field to a local property for every type.
    pub fn map_remote_field(&mut self, field: &str, property: &str) {
        self.global_names.insert(field, property);
    }

    /// Map a remote field to a local property for one type.
    pub fn map_remote_field_for(&mut self, ty: TypeId, field: &str, property: &str) {
        self.type_names.entry(ty).or_default().insert(field, property);
    }

    /// Local property name for an incoming remote field.
    pub fn property_name_for_field(&self, ty: TypeId, field: &str) -> String {
        self.type_names
            .get(&ty)
            .and_then(|t| t.to_local.get(field))
            .or_else(|| self.global_names.to_local.get(field))
            .cloned()
            .unwrap_or_else(|| field.to_string())
    }

    /// Remote field name for an outgoing local property.
    pub fn field_name_for_property(&self, ty: TypeId, property: &str) -> String {
        self.type_names
            .get(&ty)
            .and_then(|t| t.to_remote.get(property))
            .or_else(|| self.global_names.to_remote.get(property))
            .cloned()
            .unwrap_or_else(|| property.to_string())
    }

    pub fn add_global_request_transformer(&mut self, transformer: RequestTransformer) {
        self.global_request.push(transformer);
    }

    pub fn add_global_response_transformer(&mut self, transformer: ResponseTransformer) {
        self.global_response.push(transformer);
    }

    /// Add a request transformer that only applies to records of `ty`.
    pub fn add_request_transformer_for(&mut self, ty: TypeId, transformer: RequestTransformer) {
        self.type_request.entry(ty).or_default().push(transformer);
    }

    /// Add a response transformer that only applies to records of `ty`.
    pub fn add_response_transformer_for(&mut self, ty: TypeId, transformer: ResponseTransformer) {
        self.type_response.entry(ty).or_default().push(transformer);
    }

    /// Whitelist a property for encoding. Once a type has a whitelist, only
    /// listed properties are encoded.
    pub fn add_serialization_key(&mut self, ty: TypeId, key: &str) {
        let keys = self.serialization_keys.entry(ty).or_default();
        if !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
        }
    }

    pub fn add_serialization_keys<S: AsRef<str>>(&mut self, ty: TypeId, keys: &[S]) {
        for key in keys {
            self.add_serialization_key(ty, key.as_ref());
        }
    }

    /// The whitelist for `ty`, if one was registered.
    pub fn serialization_keys(&self, ty: TypeId) -> Option<&[String]> {
        self.serialization_keys.get(&ty).map(Vec::as_slice)
    }

    /// Whether `property` of `ty` is encoded.
    ///
    /// Properties declared with `skip_serializing` never are; otherwise the
    /// type's whitelist decides, and without one every declared property is.
    pub fn should_property_be_serialized(&self, ty: ModelType, property: &str) -> bool {
        let Some(field) = ty.field(property) else {
            return false;
        };
        if !field.serialize {
            return false;
        }
        match self.serialization_keys(ty.type_id()) {
            Some(keys) => keys.iter().any(|k| k == property),
            None => true,
        }
    }

    /// Global then per-type request transformers for `ty`.
    pub fn request_chain(&self, ty: Option<TypeId>) -> Vec<RequestTransformer> {
        let mut chain = self.global_request.clone();
        if let Some(extra) = ty.and_then(|ty| self.type_request.get(&ty)) {
            chain.extend(extra.iter().cloned());
        }
        chain
    }

    /// Global then per-type response transformers for `ty`.
    pub fn response_chain(&self, ty: Option<TypeId>) -> Vec<ResponseTransformer> {
        let mut chain = self.global_response.clone();
        if let Some(extra) = ty.and_then(|ty| self.type_response.get(&ty)) {
            chain.extend(extra.iter().cloned());
        }
        chain
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("global_names", &self.global_names.to_local.len())
            .field("type_names", &self.type_names.len())
            .field("global_request", &self.global_request.len())
            .field("global_response", &self.global_response.len())
            .field("serialization_keys", &self.serialization_keys.len())
            .finish()
    }
}

/// Run a request chain in order.
pub fn apply_request_chain(chain: &[RequestTransformer], request: &mut Request) {
    for transformer in chain {
        transformer(request);
    }
}

/// Run a response chain in order.
pub fn apply_response_chain(chain: &[ResponseTransformer], tree: Value) -> Value {
    chain.iter().fold(tree, |tree, transformer| transformer(tree))
}
