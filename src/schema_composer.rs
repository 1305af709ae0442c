use graphql_parser::query::{Definition as QueryDefinition, Selection, TypeCondition, parse_query};
use graphql_parser::schema::{self, Definition, TypeExtension, parse_schema};
use serde_json::{Map, Value, json};
use std::collections::{HashMap, HashSet};

use crate::error::GatewayError;
use crate::introspection::{RemoteSchema, TypeKind};
use crate::query_planner::internal_alias;
use crate::resolvers::{EXTENSION_FIELDS, EXTENSIONS_SDL, ExtensionField, Resolve};

const QUERY_ROOT: &str = "Query";
const MUTATION_ROOT: &str = "Mutation";

#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub name: String,
    /// Named output type, with list and non-null wrappers removed.
    pub type_name: String,
    /// Upstream answering this field when it is selected on a root type.
    pub owner: Option<String>,
    pub extension: bool,
}

#[derive(Debug, Clone)]
pub struct TypeInfo {
    pub name: String,
    pub kind: TypeKind,
    fields: HashMap<String, FieldInfo>,
    pub possible_types: Vec<String>,
}

impl TypeInfo {
    fn new(name: &str, kind: TypeKind) -> Self {
        TypeInfo {
            name: name.to_string(),
            kind,
            fields: HashMap::new(),
            possible_types: Vec::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.get(name)
    }
}

/// An extension field checked against the composed types.
#[derive(Debug, Clone)]
pub struct BoundExtension {
    pub type_name: String,
    pub field_name: String,
    /// Parent columns named by the fragment requirement.
    pub columns: Vec<String>,
    pub output_type: String,
    pub nullable: bool,
    pub resolve: Resolve,
}

impl BoundExtension {
    pub fn is_delegated(&self) -> bool {
        matches!(self.resolve, Resolve::Delegate(_))
    }

    /// The fragment requirement columns fetched for this field, by their
    /// schema names.
    pub fn source_columns(&self, object: &Map<String, Value>) -> Map<String, Value> {
        self.columns
            .iter()
            .filter_map(|column| {
                object
                    .get(&internal_alias(column))
                    .map(|value| (column.clone(), value.clone()))
            })
            .collect()
    }
}

/// The gateway schema: both upstreams behind merged roots, plus extensions.
///
/// Built once at startup and read-only afterwards.
#[derive(Debug)]
pub struct ComposedSchema {
    types: HashMap<String, TypeInfo>,
    mutation_type: Option<String>,
    extensions: HashMap<String, HashMap<String, BoundExtension>>,
    document: Value,
}

impl ComposedSchema {
    pub fn query_type(&self) -> &str {
        QUERY_ROOT
    }

    pub fn mutation_type(&self) -> Option<&str> {
        self.mutation_type.as_deref()
    }

    pub fn type_info(&self, name: &str) -> Option<&TypeInfo> {
        self.types.get(name)
    }

    pub fn is_composite(&self, name: &str) -> bool {
        self.types
            .get(name)
            .is_some_and(|info| info.kind.is_composite())
    }

    pub fn root_field_owner(&self, root_type: &str, field: &str) -> Option<&str> {
        self.type_info(root_type)?.field(field)?.owner.as_deref()
    }

    pub fn extension(&self, type_name: &str, field: &str) -> Option<&BoundExtension> {
        self.extensions.get(type_name)?.get(field)
    }

    pub fn extensions(&self) -> impl Iterator<Item = &BoundExtension> {
        self.extensions.values().flat_map(HashMap::values)
    }

    /// Whether a fragment on `condition` applies to an object of `concrete` type.
    pub fn fragment_applies(&self, condition: &str, concrete: &str) -> bool {
        condition == concrete
            || self
                .types
                .get(condition)
                .is_some_and(|info| info.possible_types.iter().any(|t| t == concrete))
    }

    /// The composed `__schema` introspection document.
    pub fn document(&self) -> &Value {
        &self.document
    }
}

/// Collects upstream schemas and composes them with the local extensions.
pub struct SchemaComposer {
    remotes: Vec<RemoteSchema>,
    extension_sdl: String,
    resolvers: &'static [ExtensionField],
}

impl Default for SchemaComposer {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaComposer {
    pub fn new() -> Self {
        SchemaComposer {
            remotes: Vec::new(),
            extension_sdl: EXTENSIONS_SDL.to_string(),
            resolvers: EXTENSION_FIELDS,
        }
    }

    pub fn with_extensions(
        mut self,
        extension_sdl: impl Into<String>,
        resolvers: &'static [ExtensionField],
    ) -> Self {
        self.extension_sdl = extension_sdl.into();
        self.resolvers = resolvers;
        self
    }

    pub fn register(mut self, remote: RemoteSchema) -> Self {
        self.remotes.push(remote);
        self
    }

    pub fn compose(self) -> Result<ComposedSchema, GatewayError> {
        let mut builder = Builder::default();

        for remote in &self.remotes {
            builder.add_remote(remote)?;
        }
        let declared = builder.add_extensions(&self.extension_sdl)?;
        let extensions = builder.bind_resolvers(self.resolvers, declared, &self.remotes)?;

        let schema = builder.finish(extensions);
        tracing::debug!(
            types = schema.types.len(),
            extensions = schema.extensions().count(),
            "composed schema"
        );
        Ok(schema)
    }
}

fn conflict(message: String) -> GatewayError {
    GatewayError::Composition(message)
}

struct Declared {
    output_type: String,
    nullable: bool,
}

#[derive(Default)]
struct Builder {
    types: HashMap<String, TypeInfo>,
    type_owners: HashMap<String, String>,
    // Introspection entries, in upstream order.
    documents: Vec<Value>,
    document_index: HashMap<String, usize>,
    directives: Vec<Value>,
    has_mutation: bool,
}

impl Builder {
    fn root_document(&mut self, name: &str) -> &mut Value {
        if !self.types.contains_key(name) {
            self.types
                .insert(name.to_string(), TypeInfo::new(name, TypeKind::Object));
            self.document_index
                .insert(name.to_string(), self.documents.len());
            self.documents.push(json!({
                "kind": "OBJECT",
                "name": name,
                "description": null,
                "fields": [],
                "inputFields": null,
                "interfaces": [],
                "enumValues": null,
                "possibleTypes": null,
            }));
        }
        &mut self.documents[self.document_index[name]]
    }

    fn add_remote(&mut self, remote: &RemoteSchema) -> Result<(), GatewayError> {
        let service = remote.service.as_str();
        let introspected = &remote.schema;

        let mut renames = HashMap::new();
        renames.insert(introspected.query_type.name.clone(), QUERY_ROOT.to_string());
        if let Some(mutation) = &introspected.mutation_type {
            renames.insert(mutation.name.clone(), MUTATION_ROOT.to_string());
            self.has_mutation = true;
        }
        let subscription = introspected
            .subscription_type
            .as_ref()
            .map(|t| t.name.as_str());

        let raw_types: HashMap<&str, &Value> = remote
            .raw
            .get("types")
            .and_then(Value::as_array)
            .map(|types| {
                types
                    .iter()
                    .filter_map(|t| t.get("name").and_then(Value::as_str).map(|name| (name, t)))
                    .collect()
            })
            .unwrap_or_default();

        for typed in &introspected.types {
            let name = typed.name.as_str();
            if Some(name) == subscription {
                continue;
            }

            let mut document = raw_types
                .get(name)
                .map(|raw| (*raw).clone())
                .unwrap_or_else(|| json!({ "kind": typed.kind.as_str(), "name": name }));
            rename_type_refs(&mut document, &renames);

            let fields = typed.fields.iter().flatten().map(|field| FieldInfo {
                name: field.name.clone(),
                type_name: field
                    .field_type
                    .named_type()
                    .map(|named| renames.get(named).map(String::as_str).unwrap_or(named))
                    .unwrap_or_default()
                    .to_string(),
                owner: Some(service.to_string()),
                extension: false,
            });

            if let Some(root) = renames.get(name) {
                let root = root.clone();
                self.root_document(&root);
                let Some(info) = self.types.get_mut(&root) else {
                    continue;
                };
                for field in fields {
                    if let Some(existing) = info.fields.get(&field.name) {
                        return Err(conflict(format!(
                            "root field `{root}.{}` is defined by both `{}` and `{service}`",
                            field.name,
                            existing.owner.as_deref().unwrap_or("the gateway"),
                        )));
                    }
                    info.fields.insert(field.name.clone(), field);
                }

                let root_fields = document
                    .get_mut("fields")
                    .and_then(Value::as_array_mut)
                    .map(std::mem::take)
                    .unwrap_or_default();
                if let Some(Value::Array(merged)) = self.root_document(&root).get_mut("fields") {
                    merged.extend(root_fields);
                }
                continue;
            }

            if let Some(owner) = self.type_owners.get(name) {
                if typed.kind == TypeKind::Scalar || name.starts_with("__") {
                    continue;
                }
                return Err(conflict(format!(
                    "type `{name}` is defined by both `{owner}` and `{service}`"
                )));
            }
            if self.types.contains_key(name) {
                return Err(conflict(format!(
                    "type `{name}` of `{service}` collides with a gateway root type"
                )));
            }

            let mut info = TypeInfo::new(name, typed.kind);
            info.fields = fields.map(|field| (field.name.clone(), field)).collect();
            info.possible_types = typed
                .possible_types
                .iter()
                .flatten()
                .map(|t| t.name.clone())
                .collect();

            self.types.insert(name.to_string(), info);
            self.type_owners.insert(name.to_string(), service.to_string());
            self.document_index
                .insert(name.to_string(), self.documents.len());
            self.documents.push(document);
        }

        let known: HashSet<String> = self
            .directives
            .iter()
            .filter_map(|d| d.get("name").and_then(Value::as_str).map(str::to_string))
            .collect();
        if let Some(Value::Array(directives)) = remote.raw.get("directives") {
            for directive in directives {
                let name = directive.get("name").and_then(Value::as_str).unwrap_or_default();
                if !known.contains(name) {
                    self.directives.push(directive.clone());
                }
            }
        }

        Ok(())
    }

    fn add_extensions(
        &mut self,
        sdl: &str,
    ) -> Result<HashMap<(String, String), Declared>, GatewayError> {
        let document = parse_schema::<String>(sdl)
            .map_err(|e| conflict(format!("invalid extension SDL: {e}")))?
            .into_static();

        let mut declared = HashMap::new();
        for definition in document.definitions {
            let extension = match definition {
                Definition::TypeExtension(TypeExtension::Object(extension)) => extension,
                other => {
                    return Err(conflict(format!(
                        "only object type extensions are supported, found `{}`",
                        other.to_string().trim()
                    )));
                }
            };

            let type_name = extension.name.as_str();
            if type_name == QUERY_ROOT || type_name == MUTATION_ROOT {
                return Err(conflict(format!(
                    "root type `{type_name}` cannot be extended"
                )));
            }
            match self.types.get(type_name) {
                Some(info) if info.kind == TypeKind::Object => {}
                Some(_) => {
                    return Err(conflict(format!(
                        "cannot extend `{type_name}`: not an object type"
                    )));
                }
                None => {
                    return Err(conflict(format!(
                        "cannot extend unknown type `{type_name}`"
                    )));
                }
            }

            for field in &extension.fields {
                let output_type = sdl_named_type(&field.field_type).to_string();
                if !self.types.contains_key(&output_type) && !is_builtin_scalar(&output_type) {
                    return Err(conflict(format!(
                        "`{type_name}.{}` has unknown type `{output_type}`",
                        field.name
                    )));
                }

                let type_ref = type_ref_document(&field.field_type, &self.types);
                let Some(info) = self.types.get_mut(type_name) else {
                    continue;
                };
                if info.fields.contains_key(&field.name) {
                    return Err(conflict(format!(
                        "`{type_name}.{}` is already defined upstream",
                        field.name
                    )));
                }
                info.fields.insert(
                    field.name.clone(),
                    FieldInfo {
                        name: field.name.clone(),
                        type_name: output_type.clone(),
                        owner: None,
                        extension: true,
                    },
                );

                let index = self.document_index[type_name];
                if let Some(Value::Array(fields)) = self.documents[index].get_mut("fields") {
                    fields.push(json!({
                        "name": field.name,
                        "description": field.description,
                        "args": [],
                        "type": type_ref,
                        "isDeprecated": false,
                        "deprecationReason": null,
                    }));
                }

                declared.insert(
                    (type_name.to_string(), field.name.clone()),
                    Declared {
                        output_type,
                        nullable: !matches!(field.field_type, schema::Type::NonNullType(_)),
                    },
                );
            }
        }

        Ok(declared)
    }

    fn bind_resolvers(
        &self,
        resolvers: &[ExtensionField],
        mut declared: HashMap<(String, String), Declared>,
        remotes: &[RemoteSchema],
    ) -> Result<HashMap<String, HashMap<String, BoundExtension>>, GatewayError> {
        let mut bound: HashMap<String, HashMap<String, BoundExtension>> = HashMap::new();

        for resolver in resolvers {
            let key = (resolver.type_name.to_string(), resolver.field_name.to_string());
            let Declared {
                output_type,
                nullable,
            } = declared.remove(&key).ok_or_else(|| {
                conflict(format!(
                    "resolver for `{}.{}` has no declaration in the extension SDL",
                    resolver.type_name, resolver.field_name
                ))
            })?;

            let columns = self.fragment_columns(resolver)?;

            if let Resolve::Delegate(delegation) = &resolver.resolve {
                if !remotes.iter().any(|r| r.service == delegation.service) {
                    return Err(conflict(format!(
                        "`{}.{}` delegates to unknown upstream `{}`",
                        resolver.type_name, resolver.field_name, delegation.service
                    )));
                }
                let target = self
                    .types
                    .get(QUERY_ROOT)
                    .and_then(|root| root.field(delegation.field_name))
                    .filter(|field| field.owner.as_deref() == Some(delegation.service))
                    .ok_or_else(|| {
                        conflict(format!(
                            "`{}` has no root field `{}`",
                            delegation.service, delegation.field_name
                        ))
                    })?;
                if target.type_name != output_type {
                    return Err(conflict(format!(
                        "`{}.{}` is declared as `{output_type}` but `{}.{}` returns `{}`",
                        resolver.type_name,
                        resolver.field_name,
                        QUERY_ROOT,
                        delegation.field_name,
                        target.type_name
                    )));
                }
            }

            bound.entry(key.0.clone()).or_default().insert(
                key.1.clone(),
                BoundExtension {
                    type_name: key.0,
                    field_name: key.1,
                    columns,
                    output_type,
                    nullable,
                    resolve: resolver.resolve,
                },
            );
        }

        if let Some(((type_name, field), _)) = declared.into_iter().next() {
            return Err(conflict(format!(
                "`{type_name}.{field}` is declared but has no resolver"
            )));
        }

        Ok(bound)
    }

    fn fragment_columns(&self, resolver: &ExtensionField) -> Result<Vec<String>, GatewayError> {
        let invalid = |reason: String| {
            conflict(format!(
                "fragment of `{}.{}`: {reason}",
                resolver.type_name, resolver.field_name
            ))
        };

        let document =
            parse_query::<String>(resolver.fragment).map_err(|e| invalid(e.to_string()))?;
        let fragment = match document.definitions.as_slice() {
            [QueryDefinition::Fragment(fragment)] => fragment,
            _ => return Err(invalid("expected exactly one fragment".to_string())),
        };

        let TypeCondition::On(condition) = &fragment.type_condition;
        if condition != resolver.type_name {
            return Err(invalid(format!("type condition `{condition}` does not match")));
        }

        let info = &self.types[resolver.type_name];
        fragment
            .selection_set
            .items
            .iter()
            .map(|item| match item {
                Selection::Field(field)
                    if info.field(&field.name).is_some_and(|f| !f.extension) =>
                {
                    Ok(field.name.clone())
                }
                Selection::Field(field) => Err(invalid(format!(
                    "`{}` is not an upstream field",
                    field.name
                ))),
                _ => Err(invalid("only plain fields are supported".to_string())),
            })
            .collect()
    }

    fn finish(
        mut self,
        extensions: HashMap<String, HashMap<String, BoundExtension>>,
    ) -> ComposedSchema {
        let mutation_type = self.has_mutation.then(|| MUTATION_ROOT.to_string());
        self.root_document(QUERY_ROOT);

        let document = json!({
            "queryType": { "name": QUERY_ROOT },
            "mutationType": mutation_type.as_ref().map(|name| json!({ "name": name })),
            "subscriptionType": null,
            "types": self.documents,
            "directives": self.directives,
        });

        ComposedSchema {
            types: self.types,
            mutation_type,
            extensions,
            document,
        }
    }
}

fn is_builtin_scalar(name: &str) -> bool {
    matches!(name, "String" | "Int" | "Float" | "Boolean" | "ID")
}

fn sdl_named_type<'a>(ty: &'a schema::Type<'static, String>) -> &'a str {
    match ty {
        schema::Type::NamedType(name) => name,
        schema::Type::ListType(inner) | schema::Type::NonNullType(inner) => sdl_named_type(inner),
    }
}

fn type_ref_document(
    ty: &schema::Type<'static, String>,
    types: &HashMap<String, TypeInfo>,
) -> Value {
    match ty {
        schema::Type::NamedType(name) => json!({
            "kind": types.get(name).map(|t| t.kind.as_str()).unwrap_or("SCALAR"),
            "name": name,
            "ofType": null,
        }),
        schema::Type::ListType(inner) => json!({
            "kind": "LIST",
            "name": null,
            "ofType": type_ref_document(inner, types),
        }),
        schema::Type::NonNullType(inner) => json!({
            "kind": "NON_NULL",
            "name": null,
            "ofType": type_ref_document(inner, types),
        }),
    }
}

// Points references to an upstream root type at the gateway root.
fn rename_type_refs(value: &mut Value, renames: &HashMap<String, String>) {
    match value {
        Value::Object(object) => {
            if object.contains_key("kind") {
                if let Some(Value::String(name)) = object.get_mut("name") {
                    if let Some(renamed) = renames.get(name.as_str()) {
                        *name = renamed.clone();
                    }
                }
            }
            for child in object.values_mut() {
                rename_type_refs(child, renames);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(|item| rename_type_refs(item, renames)),
        _ => {}
    }
}
