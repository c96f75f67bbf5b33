use rhai::{Dynamic, Map};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use ulid::Ulid;

/// Key under which scripts see an item's id.
pub const ITEM_ID_PROPERTY: &str = "id";

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ItemId(Ulid);

impl ItemId {
    pub fn new() -> ItemId {
        ItemId(Ulid::new())
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    #[default]
    Empty,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl PropertyValue {
    pub fn to_dynamic(&self) -> Dynamic {
        match self {
            PropertyValue::Empty => Dynamic::UNIT,
            PropertyValue::Bool(b) => Dynamic::from(*b),
            PropertyValue::Int(n) => Dynamic::from(*n),
            PropertyValue::Float(n) => Dynamic::from(*n),
            PropertyValue::Text(s) => Dynamic::from(s.clone()),
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Int(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Float(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Text(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::Text(value)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserItem {
    pub id: ItemId,
    pub properties: BTreeMap<String, PropertyValue>,
}

impl UserItem {
    pub fn new() -> UserItem {
        Self::default()
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> UserItem {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    /// Returns the previous value.
    pub fn set(&mut self, name: impl Into<String>, value: PropertyValue) -> Option<PropertyValue> {
        self.properties.insert(name.into(), value)
    }

    /// Object map scripts see: every property plus `id`.
    pub fn to_dynamic(&self) -> Dynamic {
        let mut map = Map::new();
        for (name, value) in &self.properties {
            map.insert(name.as_str().into(), value.to_dynamic());
        }
        map.insert(ITEM_ID_PROPERTY.into(), Dynamic::from(self.id.to_string()));
        Dynamic::from_map(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_to_dynamic_exposes_properties() {
        let item = UserItem::new()
            .with_property("Priority", 3_i64)
            .with_property("Title", "Write tests");
        let map = item.to_dynamic().cast::<Map>();
        assert_eq!(map["Priority"].as_int().unwrap(), 3);
        assert_eq!(map["Title"].clone().into_string().unwrap(), "Write tests");
        assert_eq!(
            map[ITEM_ID_PROPERTY].clone().into_string().unwrap(),
            item.id.to_string()
        );
    }

    #[test]
    fn test_set_returns_previous() {
        let mut item = UserItem::new().with_property("Done", false);
        assert_eq!(item.set("Done", true.into()), Some(PropertyValue::Bool(false)));
        assert_eq!(item.get("Done"), Some(&PropertyValue::Bool(true)));
    }
}
