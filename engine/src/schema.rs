//! Table declarations and the dependency graph.
//!
//! A [`Schema`] names every synchronized table, the key fields that point
//! from one table into another, and optional field constraints checked on
//! local writes. Key fields make tables depend on each other; the graph must
//! be acyclic and is checked when the database is built.

use crate::{error::Result, Attributes, Error, TableName};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Field types supported in schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
    /// Arbitrary nested JSON
    Json,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::String => write!(f, "String"),
            FieldType::Int => write!(f, "Int"),
            FieldType::Float => write!(f, "Float"),
            FieldType::Bool => write!(f, "Bool"),
            FieldType::Json => write!(f, "Json"),
        }
    }
}

/// Definition of a field in a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// Field type
    pub field_type: FieldType,
    /// Whether this field is required
    pub required: bool,
}

impl FieldDef {
    /// Create a new required field definition.
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
        }
    }

    /// Create a new optional field definition.
    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
        }
    }

    /// Validate a JSON value against this field definition.
    pub fn validate(&self, value: Option<&serde_json::Value>) -> Result<()> {
        match value {
            None | Some(serde_json::Value::Null) if self.required => {
                Err(Error::MissingRequiredField(self.name.clone()))
            }
            None | Some(serde_json::Value::Null) => Ok(()),
            Some(v) => self.validate_type(v),
        }
    }

    fn validate_type(&self, value: &serde_json::Value) -> Result<()> {
        let valid = match self.field_type {
            FieldType::String => value.is_string(),
            FieldType::Int => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_number(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Json => true,
        };

        if valid {
            Ok(())
        } else {
            Err(Error::TypeMismatch {
                field: self.name.clone(),
                expected: self.field_type.to_string(),
                got: json_type_name(value).to_string(),
            })
        }
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "Null",
        serde_json::Value::Bool(_) => "Bool",
        serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => "Int",
        serde_json::Value::Number(_) => "Float",
        serde_json::Value::String(_) => "String",
        serde_json::Value::Array(_) => "Array",
        serde_json::Value::Object(_) => "Object",
    }
}

/// A field holding an identifier of a record in another table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyField {
    pub field: String,
    pub table: TableName,
}

/// Declaration of one synchronized table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    /// Table name, also the remote collection name
    pub name: TableName,
    /// Field constraints checked on local writes
    pub fields: Vec<FieldDef>,
    /// Key fields, in declaration order
    pub keys: Vec<KeyField>,
    /// Whether records are kept in local storage. Tables without storage
    /// go straight to the transport.
    pub storage: bool,
}

impl TableSchema {
    /// Declare a stored table with no constraints.
    pub fn new(name: impl Into<TableName>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            keys: Vec::new(),
            storage: true,
        }
    }

    /// Add a field constraint.
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Declare `field` as a key into `table`.
    pub fn key(mut self, field: impl Into<String>, table: impl Into<TableName>) -> Self {
        self.keys.push(KeyField {
            field: field.into(),
            table: table.into(),
        });
        self
    }

    /// Mark the table as remote-only.
    pub fn remote_only(mut self) -> Self {
        self.storage = false;
        self
    }

    /// Validate attributes against the declared fields.
    pub fn validate_attributes(&self, attributes: &Attributes) -> Result<()> {
        for field in &self.fields {
            field.validate(attributes.get(&field.name))?;
        }
        Ok(())
    }
}

/// All table declarations of a database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    /// Table schemas by name
    pub tables: HashMap<TableName, TableSchema>,
}

impl Schema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table to the schema.
    pub fn add_table(&mut self, table: TableSchema) -> &mut Self {
        self.tables.insert(table.name.clone(), table);
        self
    }

    /// Builder-style method to add a table.
    pub fn with_table(mut self, table: TableSchema) -> Self {
        self.add_table(table);
        self
    }

    /// Get a table schema by name.
    pub fn get_table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    /// Check that every key field points at a declared table and that the
    /// dependency graph has no cycles.
    pub fn validate(&self) -> Result<()> {
        for table in self.tables.values() {
            for key in &table.keys {
                if !self.tables.contains_key(&key.table) {
                    return Err(Error::UnknownTable {
                        table: table.name.clone(),
                        field: key.field.clone(),
                        target: key.table.clone(),
                    });
                }
            }
        }
        self.dependency_order().map(|_| ())
    }

    /// Every table ordered so that referenced tables come before the tables
    /// referencing them. Fails on cycles.
    pub fn dependency_order(&self) -> Result<Vec<TableName>> {
        let mut names: Vec<&TableName> = self.tables.keys().collect();
        names.sort();

        let mut order = Vec::with_capacity(names.len());
        let mut done = HashSet::new();
        for name in names {
            let mut path = Vec::new();
            self.visit(name, &mut path, &mut done, &mut order)?;
        }
        Ok(order)
    }

    fn visit(
        &self,
        name: &TableName,
        path: &mut Vec<TableName>,
        done: &mut HashSet<TableName>,
        order: &mut Vec<TableName>,
    ) -> Result<()> {
        if done.contains(name) {
            return Ok(());
        }
        if let Some(start) = path.iter().position(|n| n == name) {
            let mut cycle = path[start..].to_vec();
            cycle.push(name.clone());
            return Err(Error::CyclicDependency(cycle));
        }
        path.push(name.clone());
        if let Some(table) = self.tables.get(name) {
            for key in &table.keys {
                self.visit(&key.table, path, done, order)?;
            }
        }
        path.pop();
        done.insert(name.clone());
        order.push(name.clone());
        Ok(())
    }

    /// Transitive dependencies of `name`, deepest first, without duplicates
    /// and without `name` itself.
    pub fn all_dependencies(&self, name: &str) -> Result<Vec<TableName>> {
        let table = self
            .tables
            .get(name)
            .ok_or_else(|| Error::TableNotFound(name.to_string()))?;

        let mut deps = Vec::new();
        for key in &table.keys {
            for dep in self.all_dependencies(&key.table)? {
                if !deps.contains(&dep) {
                    deps.push(dep);
                }
            }
            if !deps.contains(&key.table) {
                deps.push(key.table.clone());
            }
        }
        deps.retain(|d| d != name);
        Ok(deps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn library() -> Schema {
        Schema::new()
            .with_table(TableSchema::new("authors"))
            .with_table(TableSchema::new("shelves"))
            .with_table(
                TableSchema::new("books")
                    .key("author_id", "authors")
                    .key("shelf_id", "shelves"),
            )
            .with_table(TableSchema::new("loans").key("book_id", "books"))
    }

    fn attrs(value: serde_json::Value) -> Attributes {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn validate_valid_attributes() {
        let table = TableSchema::new("users")
            .field(FieldDef::required("name", FieldType::String))
            .field(FieldDef::optional("age", FieldType::Int));

        assert!(table.validate_attributes(&attrs(json!({"name": "Alice"}))).is_ok());
        assert!(table
            .validate_attributes(&attrs(json!({"name": "Bob", "age": 25, "extra": true})))
            .is_ok());
    }

    #[test]
    fn validate_missing_required_field() {
        let table = TableSchema::new("users").field(FieldDef::required("name", FieldType::String));

        let result = table.validate_attributes(&attrs(json!({"age": 3})));
        assert!(matches!(result, Err(Error::MissingRequiredField(f)) if f == "name"));

        let result = table.validate_attributes(&attrs(json!({"name": null})));
        assert!(matches!(result, Err(Error::MissingRequiredField(f)) if f == "name"));
    }

    #[test]
    fn validate_wrong_type() {
        let table = TableSchema::new("users").field(FieldDef::optional("age", FieldType::Int));

        let result = table.validate_attributes(&attrs(json!({"age": "thirty"})));
        assert!(matches!(result, Err(Error::TypeMismatch { field, .. }) if field == "age"));
    }

    #[test]
    fn field_type_display() {
        assert_eq!(FieldType::String.to_string(), "String");
        assert_eq!(FieldType::Int.to_string(), "Int");
        assert_eq!(FieldType::Json.to_string(), "Json");
    }

    #[test]
    fn dependency_order_puts_referenced_tables_first() {
        let order = library().dependency_order().unwrap();
        let pos = |n: &str| order.iter().position(|t| t == n).unwrap();

        assert_eq!(order.len(), 4);
        assert!(pos("authors") < pos("books"));
        assert!(pos("shelves") < pos("books"));
        assert!(pos("books") < pos("loans"));
    }

    #[test]
    fn all_dependencies_is_transitive_and_deduplicated() {
        let schema = library().with_table(
            TableSchema::new("reviews")
                .key("book_id", "books")
                .key("author_id", "authors"),
        );

        assert_eq!(
            schema.all_dependencies("loans").unwrap(),
            vec!["authors", "shelves", "books"]
        );
        assert_eq!(
            schema.all_dependencies("reviews").unwrap(),
            vec!["authors", "shelves", "books"]
        );
        assert!(schema.all_dependencies("authors").unwrap().is_empty());
    }

    #[test]
    fn unknown_key_table_is_rejected() {
        let schema = Schema::new().with_table(TableSchema::new("books").key("author_id", "authors"));
        assert!(matches!(
            schema.validate(),
            Err(Error::UnknownTable { target, .. }) if target == "authors"
        ));
    }

    #[test]
    fn cycles_are_rejected() {
        let schema = Schema::new()
            .with_table(TableSchema::new("a").key("b_id", "b"))
            .with_table(TableSchema::new("b").key("c_id", "c"))
            .with_table(TableSchema::new("c").key("a_id", "a"));

        match schema.validate() {
            Err(Error::CyclicDependency(cycle)) => {
                assert_eq!(cycle.first(), cycle.last());
                assert_eq!(cycle.len(), 4);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let schema = Schema::new().with_table(TableSchema::new("nodes").key("parent_id", "nodes"));
        assert!(matches!(schema.validate(), Err(Error::CyclicDependency(_))));
    }

    #[test]
    fn schema_serialization() {
        let schema = library();
        let json = serde_json::to_string(&schema).unwrap();
        let parsed: Schema = serde_json::from_str(&json).unwrap();
        assert_eq!(schema, parsed);
    }
}
