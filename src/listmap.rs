//! Resolution of keyed lists ("list maps").
//!
//! A keyed list identifies each item by the values of one or more key fields,
//! like `spec.drivers` keyed by `name`. [`index_by_key`] builds the key → item
//! mapping and fails with every duplicate when two items share a key.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde_json::Value;

/// The key of one list item.
#[derive(Clone, Debug)]
pub struct ItemKey {
    fields: Vec<String>,
    values: Vec<Value>,
    canonical: String,
}

impl ItemKey {
    /// The key value reported as the bad value of a duplicate: the bare value
    /// for a single key field, an object of all key fields otherwise.
    pub fn value(&self) -> Value {
        match self.values.as_slice() {
            [single] => single.clone(),
            values => Value::Object(
                self.fields
                    .iter()
                    .cloned()
                    .zip(values.iter().cloned())
                    .collect(),
            ),
        }
    }
}

impl PartialEq for ItemKey {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for ItemKey {}

impl Hash for ItemKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, (field, value)) in self.fields.iter().zip(&self.values).enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{field}={value}")?;
        }
        f.write_str("]")
    }
}

/// Extract the key of `item`. Returns `None` when the item is not an object
/// or any key field is absent or null; such items are left unkeyed.
pub fn item_key(item: &Value, key_fields: &[String]) -> Option<ItemKey> {
    let obj = item.as_object()?;
    let values = key_fields
        .iter()
        .map(|field| obj.get(field).filter(|v| !v.is_null()).cloned())
        .collect::<Option<Vec<_>>>()?;
    let canonical = values
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join("\u{0}");
    Some(ItemKey {
        fields: key_fields.to_vec(),
        values,
        canonical,
    })
}

/// A second item carrying a key already used earlier in the list.
#[derive(Clone, Debug)]
pub struct Duplicate {
    pub index: usize,
    pub key: ItemKey,
}

/// Items of a list indexed by key.
#[derive(Debug)]
pub struct KeyedList<'a> {
    items: &'a [Value],
    keys: Vec<Option<ItemKey>>,
    by_key: HashMap<ItemKey, usize>,
}

impl<'a> KeyedList<'a> {
    /// Index and item for `key`.
    pub fn get(&self, key: &ItemKey) -> Option<(usize, &'a Value)> {
        self.by_key.get(key).map(|&i| (i, &self.items[i]))
    }

    /// Key of the item at `index`, if it has one.
    pub fn key_at(&self, index: usize) -> Option<&ItemKey> {
        self.keys.get(index).and_then(Option::as_ref)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Index `items` by `key_fields`.
///
/// Every later occurrence of a key is reported; the first occurrence wins.
pub fn index_by_key<'a>(
    items: &'a [Value],
    key_fields: &[String],
) -> Result<KeyedList<'a>, Vec<Duplicate>> {
    let mut by_key = HashMap::with_capacity(items.len());
    let mut keys = Vec::with_capacity(items.len());
    let mut duplicates = Vec::new();

    for (index, item) in items.iter().enumerate() {
        let key = item_key(item, key_fields);
        if let Some(ref k) = key {
            if by_key.contains_key(k) {
                duplicates.push(Duplicate {
                    index,
                    key: k.clone(),
                });
            } else {
                by_key.insert(k.clone(), index);
            }
        }
        keys.push(key);
    }

    if duplicates.is_empty() {
        Ok(KeyedList {
            items,
            keys,
            by_key,
        })
    } else {
        Err(duplicates)
    }
}
