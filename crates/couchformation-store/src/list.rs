//! List attributes
//!
//! A list attribute is an ordered sequence of tuples stored as a JSON array
//! under a single key, e.g. `zone -> [[zone, cidr, subnet_id], ...]`. The
//! first field of each tuple is its match key and is unique within the list.

use crate::error::{Result, StoreError};
use crate::store::{Store, read_value, write_value};
use serde_json::Value;

/// One entry of a list attribute
pub type Tuple = Vec<Value>;

impl Store {
    /// Append a tuple to the list at `name`, creating the list if absent.
    ///
    /// Returns `false` without modifying the list when an entry with the same
    /// first field already exists.
    pub fn list_add<I, V>(&self, name: &str, fields: I) -> Result<bool>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let entry: Tuple = fields.into_iter().map(Into::into).collect();
        let Some(head) = entry.first().cloned() else {
            return Err(StoreError::EmptyEntry);
        };

        self.write_tx(|conn, table| {
            let mut list = self.parse_list(name, read_value(conn, table, name)?)?;
            if list.iter().any(|t| t.first() == Some(&head)) {
                return Ok(false);
            }
            list.push(entry);
            write_value(conn, table, name, &list)?;
            Ok(true)
        })
    }

    /// Remove every tuple whose first field equals `match_value`.
    ///
    /// Returns the number of removed entries.
    pub fn list_remove(&self, name: &str, match_value: impl Into<Value>) -> Result<usize> {
        let needle = match_value.into();
        self.write_tx(|conn, table| {
            let mut list = self.parse_list(name, read_value(conn, table, name)?)?;
            let before = list.len();
            list.retain(|t| t.first() != Some(&needle));
            let removed = before - list.len();
            if removed > 0 {
                write_value(conn, table, name, &list)?;
            }
            Ok(removed)
        })
    }

    /// Whether the list at `name` has an entry keyed by `match_value`
    pub fn list_exists(&self, name: &str, match_value: impl Into<Value>) -> Result<bool> {
        Ok(self.list_find(name, match_value)?.is_some())
    }

    /// The entry keyed by `match_value`, if any
    pub fn list_find(&self, name: &str, match_value: impl Into<Value>) -> Result<Option<Tuple>> {
        let needle = match_value.into();
        Ok(self
            .read_list(name)?
            .into_iter()
            .find(|t| t.first() == Some(&needle)))
    }

    /// All entries of the list at `name` in insertion order
    pub fn list_get(&self, name: &str) -> Result<Vec<Tuple>> {
        self.read_list(name)
    }

    fn read_list(&self, name: &str) -> Result<Vec<Tuple>> {
        self.parse_list(name, self.get(name)?)
    }

    fn parse_list(&self, name: &str, raw: Option<Value>) -> Result<Vec<Tuple>> {
        match raw {
            None => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    Value::Array(fields) => Ok(fields),
                    _ => Err(self.not_a_list(name)),
                })
                .collect(),
            Some(_) => Err(self.not_a_list(name)),
        }
    }

    fn not_a_list(&self, name: &str) -> StoreError {
        StoreError::NotAList {
            document: self.document_name().to_string(),
            key: name.to_string(),
        }
    }
}
