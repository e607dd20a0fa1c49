//! Shared models and helpers for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use restbind::prelude::*;
use restbind::transport::mock::MockTransport;

pub const API: &str = "http://api.test";

pub fn url(path: &str) -> String {
    format!("{}{}", API, path)
}

/// A manager wired to a fresh mock transport.
pub fn mock_manager() -> (Manager, MockTransport) {
    let mock = MockTransport::new();
    let manager = Manager::builder()
        .transport(Arc::new(mock.clone()))
        .build();
    (manager, mock)
}

/// Wait until the manager has no request in flight.
pub async fn drained(manager: &Manager) {
    for _ in 0..400 {
        if manager.active_requests() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("requests still in flight");
}

#[derive(Debug, Default)]
pub struct Address {
    pub street: String,
    pub city: String,
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
pub struct User {
    pub id: Option<i64>,
    pub name: String,
    pub address: Option<Resource<Address>>,
}

impl Model for User {
    const NAME: &'static str = "User";

    fn fields() -> &'static [Field] {
        const FIELDS: &[Field] = &[
            Field::value("id"),
            Field::value("name"),
            Field::object("address", ModelType::of::<Address>()),
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
            "address" => Some(Slot::object(&self.address)),
            _ => None,
        }
    }

    fn write(&mut self, property: &str, value: Slot) -> bool {
        match property {
            "id" => value.assign(&mut self.id),
            "name" => value.assign(&mut self.name),
            "address" => value.assign_object(&mut self.address),
            _ => false,
        }
    }
}

#[derive(Debug, Default)]
pub struct Item {
    pub id: Option<i64>,
    pub title: String,
    pub position: Option<i64>,
}

impl Item {
    pub fn new(id: i64, title: &str) -> Resource<Item> {
        Resource::new(Item {
            id: Some(id),
            title: title.to_string(),
            position: None,
        })
    }
}

impl Model for Item {
    const NAME: &'static str = "Item";

    fn fields() -> &'static [Field] {
        const FIELDS: &[Field] = &[
            Field::value("id"),
            Field::value("title"),
            Field::value("position"),
        ];
        FIELDS
    }

    fn identity() -> Option<&'static str> {
        Some("id")
    }

    fn read(&self, property: &str) -> Option<Slot> {
        match property {
            "id" => Some(Slot::value(&self.id)),
            "title" => Some(Slot::value(&self.title)),
            "position" => Some(Slot::value(&self.position)),
            _ => None,
        }
    }

    fn write(&mut self, property: &str, value: Slot) -> bool {
        match property {
            "id" => value.assign(&mut self.id),
            "title" => value.assign(&mut self.title),
            "position" => value.assign(&mut self.position),
            _ => false,
        }
    }
}

#[derive(Debug, Default)]
pub struct ApiError {
    pub error: String,
}

impl Model for ApiError {
    const NAME: &'static str = "ApiError";

    fn fields() -> &'static [Field] {
        const FIELDS: &[Field] = &[Field::value("error")];
        FIELDS
    }

    fn read(&self, property: &str) -> Option<Slot> {
        (property == "error").then(|| Slot::value(&self.error))
    }

    fn write(&mut self, property: &str, value: Slot) -> bool {
        property == "error" && value.assign(&mut self.error)
    }
}
