//! Upstream introspection and the gateway's own `__schema` / `__type` fields.
//!
//! Upstreams are introspected once at startup with [`INTROSPECTION_QUERY`].
//! The raw `__schema` document is kept so the composed schema can answer
//! client introspection locally, and a typed view of it feeds the type index.

use graphql_parser::query::Value as AstValue;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::QueryError;
use crate::query_planner::{CollectedField, PreparedOperation, SelectionSet};

/// Operation name reserved for schema introspection.
pub const INTROSPECTION_OPERATION: &str = "IntrospectionQuery";

pub const INTROSPECTION_QUERY: &str = r#"
query IntrospectionQuery {
  __schema {
    queryType { name }
    mutationType { name }
    subscriptionType { name }
    types { ...FullType }
    directives {
      name
      description
      locations
      args { ...InputValue }
    }
  }
}

fragment FullType on __Type {
  kind
  name
  description
  fields(includeDeprecated: true) {
    name
    description
    args { ...InputValue }
    type { ...TypeRef }
    isDeprecated
    deprecationReason
  }
  inputFields { ...InputValue }
  interfaces { ...TypeRef }
  enumValues(includeDeprecated: true) {
    name
    description
    isDeprecated
    deprecationReason
  }
  possibleTypes { ...TypeRef }
}

fragment InputValue on __InputValue {
  name
  description
  type { ...TypeRef }
  defaultValue
}

fragment TypeRef on __Type {
  kind
  name
  ofType {
    kind
    name
    ofType {
      kind
      name
      ofType {
        kind
        name
        ofType {
          kind
          name
          ofType {
            kind
            name
            ofType {
              kind
              name
              ofType {
                kind
                name
              }
            }
          }
        }
      }
    }
  }
}
"#;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TypeKind {
    Scalar,
    Object,
    Interface,
    Union,
    Enum,
    InputObject,
    List,
    NonNull,
}

impl TypeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TypeKind::Scalar => "SCALAR",
            TypeKind::Object => "OBJECT",
            TypeKind::Interface => "INTERFACE",
            TypeKind::Union => "UNION",
            TypeKind::Enum => "ENUM",
            TypeKind::InputObject => "INPUT_OBJECT",
            TypeKind::List => "LIST",
            TypeKind::NonNull => "NON_NULL",
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, TypeKind::Object | TypeKind::Interface | TypeKind::Union)
    }

    pub fn is_abstract(&self) -> bool {
        matches!(self, TypeKind::Interface | TypeKind::Union)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntrospectedSchema {
    pub query_type: NamedTypeRef,
    #[serde(default)]
    pub mutation_type: Option<NamedTypeRef>,
    #[serde(default)]
    pub subscription_type: Option<NamedTypeRef>,
    pub types: Vec<IntrospectedType>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedTypeRef {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntrospectedType {
    pub kind: TypeKind,
    pub name: String,
    #[serde(default)]
    pub fields: Option<Vec<IntrospectedField>>,
    #[serde(default)]
    pub possible_types: Option<Vec<NamedTypeRef>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntrospectedField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: TypeRef,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeRef {
    pub kind: TypeKind,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub of_type: Option<Box<TypeRef>>,
}

impl TypeRef {
    /// The innermost named type, unwrapping lists and non-null wrappers.
    pub fn named_type(&self) -> Option<&str> {
        match &self.name {
            Some(name) => Some(name),
            None => self.of_type.as_deref().and_then(TypeRef::named_type),
        }
    }
}

/// The introspection result of one upstream.
#[derive(Debug, Clone)]
pub struct RemoteSchema {
    pub service: String,
    /// The `__schema` object exactly as the upstream returned it.
    pub raw: Value,
    pub schema: IntrospectedSchema,
}

impl RemoteSchema {
    /// Builds a remote schema from the `data` of an introspection response.
    pub fn from_data(service: &str, data: Option<Value>) -> Result<Self, String> {
        let raw = match data {
            Some(Value::Object(mut data)) => data
                .remove("__schema")
                .ok_or_else(|| "response has no __schema".to_string())?,
            Some(_) | None => return Err("response has no data".to_string()),
        };

        let schema: IntrospectedSchema = serde_json::from_value(raw.clone())
            .map_err(|e| format!("invalid introspection result: {e}"))?;

        Ok(RemoteSchema {
            service: service.to_string(),
            raw,
            schema,
        })
    }

    pub fn root_type_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.schema.query_type.name.as_str())
            .chain(self.schema.mutation_type.iter().map(|t| t.name.as_str()))
            .chain(self.schema.subscription_type.iter().map(|t| t.name.as_str()))
    }
}

// Meta types reachable from each meta field, for `__typename` and nested selections.
fn child_meta_type(parent: &str, field: &str) -> Option<&'static str> {
    match (parent, field) {
        ("__Schema", "types" | "queryType" | "mutationType" | "subscriptionType") => {
            Some("__Type")
        }
        ("__Schema", "directives") => Some("__Directive"),
        ("__Type", "fields") => Some("__Field"),
        ("__Type", "interfaces" | "possibleTypes" | "ofType") => Some("__Type"),
        ("__Type", "enumValues") => Some("__EnumValue"),
        ("__Type", "inputFields") => Some("__InputValue"),
        ("__Field" | "__Directive", "args") => Some("__InputValue"),
        ("__Field" | "__InputValue", "type") => Some("__Type"),
        _ => None,
    }
}

/// Answers a root `__schema`, `__type` or `__typename` field from the composed
/// introspection document.
pub fn resolve_meta_field(
    schema_document: &Value,
    root_type: &str,
    operation: &PreparedOperation,
    field: &CollectedField<'_>,
) -> Result<Value, QueryError> {
    match field.name.as_str() {
        "__typename" => Ok(Value::String(root_type.to_string())),
        "__schema" => project(
            operation,
            schema_document,
            "__Schema",
            &field.sub_selections(),
        ),
        "__type" => {
            let name = field
                .first()
                .arguments
                .iter()
                .find(|(arg, _)| arg == "name")
                .and_then(|(_, value)| argument_string(operation, value));

            let found = name.and_then(|name| {
                schema_document
                    .get("types")
                    .and_then(Value::as_array)
                    .and_then(|types| {
                        types
                            .iter()
                            .find(|t| t.get("name").and_then(Value::as_str) == Some(name.as_str()))
                    })
            });

            match found {
                Some(found) => project(operation, found, "__Type", &field.sub_selections()),
                None => Ok(Value::Null),
            }
        }
        other => Err(QueryError::UnknownField {
            type_name: root_type.to_string(),
            field: other.to_string(),
        }),
    }
}

fn project(
    operation: &PreparedOperation,
    value: &Value,
    meta_type: &str,
    selections: &[&SelectionSet],
) -> Result<Value, QueryError> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| project(operation, item, meta_type, selections))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(object) => {
            let collected =
                operation.collect_fields(selections, &|condition| condition == meta_type)?;
            let mut projected = Map::new();

            for field in &collected {
                if field.name == "__typename" {
                    projected.insert(
                        field.response_key.clone(),
                        Value::String(meta_type.to_string()),
                    );
                    continue;
                }

                let mut raw = object.get(&field.name).cloned().unwrap_or(Value::Null);
                if matches!(field.name.as_str(), "fields" | "enumValues")
                    && !include_deprecated(operation, field)
                {
                    if let Value::Array(items) = &mut raw {
                        items.retain(|item| item.get("isDeprecated") != Some(&Value::Bool(true)));
                    }
                }

                let value = match child_meta_type(meta_type, &field.name) {
                    Some(child) => project(operation, &raw, child, &field.sub_selections())?,
                    None => raw,
                };
                projected.insert(field.response_key.clone(), value);
            }

            Ok(Value::Object(projected))
        }
        scalar => Ok(scalar.clone()),
    }
}

fn include_deprecated(operation: &PreparedOperation, field: &CollectedField<'_>) -> bool {
    field
        .first()
        .arguments
        .iter()
        .find(|(name, _)| name == "includeDeprecated")
        .map(|(_, value)| match value {
            AstValue::Boolean(flag) => *flag,
            AstValue::Variable(name) => {
                operation.variable(name).and_then(Value::as_bool).unwrap_or(false)
            }
            _ => false,
        })
        .unwrap_or(false)
}

fn argument_string(
    operation: &PreparedOperation,
    value: &AstValue<'static, String>,
) -> Option<String> {
    match value {
        AstValue::String(s) => Some(s.clone()),
        AstValue::Variable(name) => operation
            .variable(name)
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GraphQLRequest;
    use serde_json::json;

    fn document() -> Value {
        json!({
            "queryType": { "name": "Query" },
            "mutationType": null,
            "subscriptionType": null,
            "types": [
                {
                    "kind": "OBJECT",
                    "name": "User",
                    "description": null,
                    "fields": [
                        {
                            "name": "id",
                            "isDeprecated": false,
                            "type": { "kind": "SCALAR", "name": "Int", "ofType": null }
                        },
                        {
                            "name": "login",
                            "isDeprecated": true,
                            "type": { "kind": "SCALAR", "name": "String", "ofType": null }
                        }
                    ]
                }
            ],
            "directives": []
        })
    }

    fn resolve(query: &str) -> Value {
        let operation = PreparedOperation::parse(&GraphQLRequest::new(query)).unwrap();
        let collected = operation
            .collect_fields(&[operation.selection_set()], &|_| true)
            .unwrap();
        resolve_meta_field(&document(), "Query", &operation, &collected[0]).unwrap()
    }

    #[test]
    fn typed_view_unwraps_named_types() {
        let raw = json!({ "__schema": {
            "queryType": { "name": "query_root" },
            "types": [{
                "kind": "OBJECT",
                "name": "query_root",
                "fields": [{
                    "name": "goals",
                    "type": { "kind": "NON_NULL", "name": null, "ofType": {
                        "kind": "LIST",
                        "name": null,
                        "ofType": { "kind": "OBJECT", "name": "goals", "ofType": null }
                    }}
                }]
            }]
        }});

        let remote = RemoteSchema::from_data("data", Some(raw)).unwrap();
        let field = &remote.schema.types[0].fields.as_ref().unwrap()[0];
        assert_eq!(field.field_type.named_type(), Some("goals"));
        assert_eq!(remote.root_type_names().collect::<Vec<_>>(), vec!["query_root"]);
        assert!(RemoteSchema::from_data("data", Some(json!({}))).is_err());
    }

    #[test]
    fn schema_projection_follows_selection_and_aliases() {
        let value = resolve("{ __schema { queryType { name } all: types { name __typename } } }");
        assert_eq!(
            value,
            json!({
                "queryType": { "name": "Query" },
                "all": [{ "name": "User", "__typename": "__Type" }],
            })
        );
    }

    #[test]
    fn type_lookup_hides_deprecated_fields_by_default() {
        let value = resolve(r#"{ __type(name: "User") { fields { name } } }"#);
        assert_eq!(value, json!({ "fields": [{ "name": "id" }] }));

        let value =
            resolve(r#"{ __type(name: "User") { fields(includeDeprecated: true) { name } } }"#);
        assert_eq!(value, json!({ "fields": [{ "name": "id" }, { "name": "login" }] }));

        assert_eq!(resolve(r#"{ __type(name: "Nope") { name } }"#), Value::Null);
    }
}
