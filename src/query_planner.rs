use graphql_parser::Pos;
use graphql_parser::query::{
    self, Definition, OperationDefinition, TypeCondition, Value as AstValue, parse_query,
};
use serde_json::{Map, Number, Value};
use std::collections::{HashMap, HashSet};

use crate::{
    ComposedSchema, OutboundOperation, error::QueryError, introspection::INTROSPECTION_OPERATION,
};

pub type Document = query::Document<'static, String>;
pub type SelectionSet = query::SelectionSet<'static, String>;
pub type Selection = query::Selection<'static, String>;
pub type Field = query::Field<'static, String>;
pub type FragmentDefinition = query::FragmentDefinition<'static, String>;
pub type VariableDefinition = query::VariableDefinition<'static, String>;
pub type Directive = query::Directive<'static, String>;

/// Prefix of the aliases the gateway adds for fragment requirements.
pub const INTERNAL_PREFIX: &str = "_stitch_";

/// Response key under which an injected column is fetched.
pub fn internal_alias(field: &str) -> String {
    format!("{INTERNAL_PREFIX}{field}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Mutation,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Query => "query",
            OperationKind::Mutation => "mutation",
        }
    }
}

/// The operation selected from an incoming document, with its fragments and
/// coerced variables.
#[derive(Debug)]
pub struct PreparedOperation {
    kind: OperationKind,
    name: Option<String>,
    variable_definitions: Vec<VariableDefinition>,
    selection_set: SelectionSet,
    fragments: HashMap<String, FragmentDefinition>,
    variables: Map<String, Value>,
}

/// All fields sharing one response key in a selection, in document order.
#[derive(Debug)]
pub struct CollectedField<'a> {
    pub response_key: String,
    pub name: String,
    pub fields: Vec<&'a Field>,
}

impl<'a> CollectedField<'a> {
    pub fn first(&self) -> &'a Field {
        self.fields[0]
    }

    pub fn sub_selections(&self) -> Vec<&'a SelectionSet> {
        self.fields.iter().map(|f| &f.selection_set).collect()
    }

    /// Sub-selections of every occurrence merged into one selection set.
    pub fn merged_selection(&self) -> SelectionSet {
        merge_selections(&self.sub_selections())
    }
}

pub fn merge_selections(selections: &[&SelectionSet]) -> SelectionSet {
    SelectionSet {
        span: selections
            .first()
            .map(|s| s.span)
            .unwrap_or((Pos::default(), Pos::default())),
        items: selections
            .iter()
            .flat_map(|s| s.items.iter().cloned())
            .collect(),
    }
}

impl PreparedOperation {
    pub fn parse(request: &crate::GraphQLRequest) -> Result<Self, QueryError> {
        let document: Document = parse_query::<String>(&request.query)
            .map_err(|e| QueryError::Parse(e.to_string()))?
            .into_static();

        let mut operations = Vec::new();
        let mut fragments = HashMap::new();
        for definition in document.definitions {
            match definition {
                Definition::Operation(op) => operations.push(op),
                Definition::Fragment(fragment) => {
                    fragments.insert(fragment.name.clone(), fragment);
                }
            }
        }

        let selected = match request.operation_name.as_deref() {
            Some(wanted) => operations
                .into_iter()
                .find(|op| operation_name(op) == Some(wanted))
                .ok_or_else(|| QueryError::UnknownOperation(wanted.to_string()))?,
            None if operations.len() > 1 => return Err(QueryError::AmbiguousOperation),
            None => operations.pop().ok_or(QueryError::MissingOperation)?,
        };

        let (kind, name, variable_definitions, selection_set) = match selected {
            OperationDefinition::SelectionSet(selection_set) => {
                (OperationKind::Query, None, Vec::new(), selection_set)
            }
            OperationDefinition::Query(q) => (
                OperationKind::Query,
                q.name,
                q.variable_definitions,
                q.selection_set,
            ),
            OperationDefinition::Mutation(m) => (
                OperationKind::Mutation,
                m.name,
                m.variable_definitions,
                m.selection_set,
            ),
            OperationDefinition::Subscription(_) => {
                return Err(QueryError::SubscriptionUnsupported);
            }
        };

        reject_reserved_keys(&selection_set)?;
        for fragment in fragments.values() {
            reject_reserved_keys(&fragment.selection_set)?;
        }

        let mut variables = request.variables_map();
        for definition in &variable_definitions {
            if let Some(default) = &definition.default_value {
                if !variables.contains_key(&definition.name) {
                    variables.insert(definition.name.clone(), ast_to_json(default));
                }
            }
        }

        Ok(PreparedOperation {
            kind,
            name,
            variable_definitions,
            selection_set,
            fragments,
            variables,
        })
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn selection_set(&self) -> &SelectionSet {
        &self.selection_set
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    /// The name forwarded upstream. The reserved introspection name is never
    /// forwarded, so a client cannot borrow the introspection credential.
    pub fn outbound_name(&self) -> Option<String> {
        self.name
            .as_deref()
            .filter(|name| *name != INTROSPECTION_OPERATION)
            .map(str::to_string)
    }

    fn fragment(&self, name: &str) -> Result<&FragmentDefinition, QueryError> {
        self.fragments
            .get(name)
            .ok_or_else(|| QueryError::UnknownFragment(name.to_string()))
    }

    /// Groups the fields of `selections` by response key, following fragments
    /// whose type condition `applies` and honouring `@skip` / `@include`.
    pub fn collect_fields<'a>(
        &'a self,
        selections: &[&'a SelectionSet],
        applies: &dyn Fn(&str) -> bool,
    ) -> Result<Vec<CollectedField<'a>>, QueryError> {
        let mut collected = Vec::new();
        let mut visiting = Vec::new();
        for selection_set in selections.iter().copied() {
            self.collect_into(selection_set, applies, &mut collected, &mut visiting)?;
        }
        Ok(collected)
    }

    fn collect_into<'a>(
        &'a self,
        selection_set: &'a SelectionSet,
        applies: &dyn Fn(&str) -> bool,
        collected: &mut Vec<CollectedField<'a>>,
        visiting: &mut Vec<&'a str>,
    ) -> Result<(), QueryError> {
        for item in &selection_set.items {
            match item {
                query::Selection::Field(field) => {
                    if !self.is_included(&field.directives) {
                        continue;
                    }
                    let key = field.alias.as_deref().unwrap_or(&field.name);
                    match collected.iter_mut().find(|c| c.response_key == key) {
                        Some(existing) => existing.fields.push(field),
                        None => collected.push(CollectedField {
                            response_key: key.to_string(),
                            name: field.name.clone(),
                            fields: vec![field],
                        }),
                    }
                }
                query::Selection::InlineFragment(fragment) => {
                    if !self.is_included(&fragment.directives) {
                        continue;
                    }
                    if let Some(TypeCondition::On(condition)) = &fragment.type_condition {
                        if !applies(condition) {
                            continue;
                        }
                    }
                    self.collect_into(&fragment.selection_set, applies, collected, visiting)?;
                }
                query::Selection::FragmentSpread(spread) => {
                    if !self.is_included(&spread.directives) {
                        continue;
                    }
                    let name = spread.fragment_name.as_str();
                    if visiting.contains(&name) {
                        return Err(QueryError::FragmentCycle(name.to_string()));
                    }
                    let definition = self.fragment(name)?;
                    let TypeCondition::On(condition) = &definition.type_condition;
                    if !applies(condition) {
                        continue;
                    }
                    visiting.push(name);
                    self.collect_into(&definition.selection_set, applies, collected, visiting)?;
                    visiting.pop();
                }
            }
        }
        Ok(())
    }

    fn is_included(&self, directives: &[Directive]) -> bool {
        directives.iter().all(|directive| {
            let condition = || {
                directive
                    .arguments
                    .iter()
                    .find(|(name, _)| name == "if")
                    .map(|(_, value)| match value {
                        AstValue::Boolean(flag) => *flag,
                        AstValue::Variable(name) => {
                            self.variable(name).and_then(Value::as_bool).unwrap_or(false)
                        }
                        _ => false,
                    })
                    .unwrap_or(false)
            };
            match directive.name.as_str() {
                "skip" => !condition(),
                "include" => condition(),
                _ => true,
            }
        })
    }

    /// Renders `selection_set` as a standalone operation, declaring and
    /// sending only the variables it uses.
    pub fn build_operation(
        &self,
        kind: OperationKind,
        name: Option<String>,
        selection_set: SelectionSet,
    ) -> OutboundOperation {
        let mut used = Vec::new();
        used_variables(&selection_set, &mut used);

        let variable_definitions: Vec<VariableDefinition> = self
            .variable_definitions
            .iter()
            .filter(|definition| used.contains(&definition.name))
            .cloned()
            .collect();

        let variables = used
            .iter()
            .filter_map(|name| {
                self.variables
                    .get(name)
                    .map(|value| (name.clone(), value.clone()))
            })
            .collect();

        let definition = match kind {
            OperationKind::Query => OperationDefinition::Query(query::Query {
                position: Pos::default(),
                name: name.clone(),
                variable_definitions,
                directives: Vec::new(),
                selection_set,
            }),
            OperationKind::Mutation => OperationDefinition::Mutation(query::Mutation {
                position: Pos::default(),
                name: name.clone(),
                variable_definitions,
                directives: Vec::new(),
                selection_set,
            }),
        };

        let document: Document = query::Document {
            definitions: vec![Definition::Operation(definition)],
        };

        OutboundOperation {
            query: document.to_string(),
            operation_name: name,
            variables,
        }
    }
}

fn operation_name<'a>(operation: &'a OperationDefinition<'static, String>) -> Option<&'a str> {
    match operation {
        OperationDefinition::SelectionSet(_) => None,
        OperationDefinition::Query(q) => q.name.as_deref(),
        OperationDefinition::Mutation(m) => m.name.as_deref(),
        OperationDefinition::Subscription(s) => s.name.as_deref(),
    }
}

// Keys under the internal prefix are reserved for injected columns.
fn reject_reserved_keys(selection_set: &SelectionSet) -> Result<(), QueryError> {
    for item in &selection_set.items {
        match item {
            query::Selection::Field(field) => {
                let response_key = field.alias.as_ref().unwrap_or(&field.name);
                if response_key.starts_with(INTERNAL_PREFIX) {
                    return Err(QueryError::ReservedResponseKey(response_key.clone()));
                }
                reject_reserved_keys(&field.selection_set)?;
            }
            query::Selection::InlineFragment(fragment) => {
                reject_reserved_keys(&fragment.selection_set)?;
            }
            query::Selection::FragmentSpread(_) => {}
        }
    }
    Ok(())
}

fn used_variables(selection_set: &SelectionSet, used: &mut Vec<String>) {
    for item in &selection_set.items {
        match item {
            query::Selection::Field(field) => {
                for (_, value) in &field.arguments {
                    value_variables(value, used);
                }
                directive_variables(&field.directives, used);
                used_variables(&field.selection_set, used);
            }
            query::Selection::InlineFragment(fragment) => {
                directive_variables(&fragment.directives, used);
                used_variables(&fragment.selection_set, used);
            }
            query::Selection::FragmentSpread(spread) => {
                directive_variables(&spread.directives, used);
            }
        }
    }
}

fn directive_variables(directives: &[Directive], used: &mut Vec<String>) {
    for directive in directives {
        for (_, value) in &directive.arguments {
            value_variables(value, used);
        }
    }
}

fn value_variables(value: &AstValue<'static, String>, used: &mut Vec<String>) {
    match value {
        AstValue::Variable(name) => {
            if !used.contains(name) {
                used.push(name.clone());
            }
        }
        AstValue::List(items) => items.iter().for_each(|item| value_variables(item, used)),
        AstValue::Object(fields) => fields.values().for_each(|item| value_variables(item, used)),
        _ => {}
    }
}

fn ast_to_json(value: &AstValue<'static, String>) -> Value {
    match value {
        AstValue::Variable(_) | AstValue::Null => Value::Null,
        AstValue::Int(number) => number.as_i64().map(Value::from).unwrap_or(Value::Null),
        AstValue::Float(float) => Number::from_f64(*float)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        AstValue::String(s) => Value::String(s.clone()),
        AstValue::Boolean(flag) => Value::Bool(*flag),
        AstValue::Enum(name) => Value::String(name.clone()),
        AstValue::List(items) => Value::Array(items.iter().map(ast_to_json).collect()),
        AstValue::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(key, value)| (key.clone(), ast_to_json(value)))
                .collect(),
        ),
    }
}

/// One operation to send to one upstream.
#[derive(Debug, Clone)]
pub struct ServiceQuery {
    pub service: String,
    /// Root response keys this upstream answers.
    pub response_keys: Vec<String>,
    pub operation: OutboundOperation,
}

#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub kind: OperationKind,
    pub root_type: String,
    /// Root response keys in the order the client selected them.
    pub root_keys: Vec<String>,
    /// Root keys answered by the gateway itself.
    pub local_fields: Vec<String>,
    /// Upstream operations, in dispatch order for mutations.
    pub service_queries: Vec<ServiceQuery>,
}

/// Splits operations across upstreams and rewrites selections around the
/// gateway's extension fields.
pub struct QueryPlanner<'s> {
    schema: &'s ComposedSchema,
}

impl<'s> QueryPlanner<'s> {
    pub fn new(schema: &'s ComposedSchema) -> Self {
        QueryPlanner { schema }
    }

    pub fn plan(&self, operation: &PreparedOperation) -> Result<QueryPlan, QueryError> {
        let kind = operation.kind();
        let root_type = match kind {
            OperationKind::Query => self.schema.query_type(),
            OperationKind::Mutation => self
                .schema
                .mutation_type()
                .ok_or(QueryError::UnsupportedOperation("mutation"))?,
        };

        let collected =
            operation.collect_fields(&[operation.selection_set()], &|c| c == root_type)?;

        let mut root_keys = Vec::new();
        let mut local_fields = Vec::new();
        let mut groups: Vec<(String, Vec<&CollectedField<'_>>)> = Vec::new();

        for field in &collected {
            root_keys.push(field.response_key.clone());
            match field.name.as_str() {
                "__typename" => local_fields.push(field.response_key.clone()),
                "__schema" | "__type" if kind == OperationKind::Query => {
                    local_fields.push(field.response_key.clone())
                }
                name => {
                    let owner = self.schema.root_field_owner(root_type, name).ok_or_else(|| {
                        QueryError::UnknownField {
                            type_name: root_type.to_string(),
                            field: name.to_string(),
                        }
                    })?;
                    let group = match kind {
                        OperationKind::Query => {
                            groups.iter_mut().find(|(service, _)| service.as_str() == owner)
                        }
                        // Mutation fields only share a dispatch with the
                        // consecutive fields before them.
                        OperationKind::Mutation => groups
                            .last_mut()
                            .filter(|(service, _)| service.as_str() == owner),
                    };
                    match group {
                        Some((_, fields)) => fields.push(field),
                        None => groups.push((owner.to_string(), vec![field])),
                    }
                }
            }
        }

        let mut service_queries = Vec::with_capacity(groups.len());
        for (service, fields) in groups {
            let subset = SelectionSet {
                span: operation.selection_set().span,
                items: fields
                    .iter()
                    .flat_map(|field| field.fields.iter())
                    .map(|field| query::Selection::Field((*field).clone()))
                    .collect(),
            };
            let selection_set =
                self.rewrite_selection(operation, root_type, &subset, &mut Vec::new())?;

            tracing::debug!(%service, kind = kind.as_str(), "planned upstream operation");

            let outbound =
                operation.build_operation(kind, operation.outbound_name(), selection_set);
            service_queries.push(ServiceQuery {
                response_keys: fields.iter().map(|f| f.response_key.clone()).collect(),
                operation: outbound,
                service,
            });
        }

        Ok(QueryPlan {
            kind,
            root_type: root_type.to_string(),
            root_keys,
            local_fields,
            service_queries,
        })
    }

    /// Rewrites a client selection on `type_name` into what its owning upstream
    /// can answer: extension fields are replaced by their fragment requirements,
    /// fragment spreads are inlined and abstract selections learn `__typename`.
    pub fn rewrite_selection(
        &self,
        operation: &PreparedOperation,
        type_name: &str,
        selection_set: &SelectionSet,
        visiting: &mut Vec<String>,
    ) -> Result<SelectionSet, QueryError> {
        let type_info = self
            .schema
            .type_info(type_name)
            .ok_or_else(|| QueryError::UnknownType(type_name.to_string()))?;

        let mut items = Vec::with_capacity(selection_set.items.len());
        let mut injected = HashSet::new();
        let mut inject = |items: &mut Vec<Selection>, column: &str| {
            if injected.insert(column.to_string()) {
                items.push(injected_field(column, selection_set.span.0));
            }
        };

        if type_info.kind.is_abstract() {
            inject(&mut items, "__typename");
        }

        for item in &selection_set.items {
            match item {
                query::Selection::Field(field) => {
                    if field.name == "__typename" {
                        items.push(item.clone());
                        continue;
                    }

                    if let Some(extension) = self.schema.extension(type_name, &field.name) {
                        for column in &extension.columns {
                            inject(&mut items, column.as_str());
                        }
                        if extension.is_delegated() {
                            self.rewrite_selection(
                                operation,
                                &extension.output_type,
                                &field.selection_set,
                                visiting,
                            )?;
                        }
                        continue;
                    }

                    let field_info =
                        type_info
                            .field(&field.name)
                            .ok_or_else(|| QueryError::UnknownField {
                                type_name: type_name.to_string(),
                                field: field.name.clone(),
                            })?;

                    let mut rewritten = field.clone();
                    if self.schema.is_composite(&field_info.type_name) {
                        rewritten.selection_set = self.rewrite_selection(
                            operation,
                            &field_info.type_name,
                            &field.selection_set,
                            visiting,
                        )?;
                    }
                    items.push(query::Selection::Field(rewritten));
                }
                query::Selection::InlineFragment(fragment) => {
                    let condition = match &fragment.type_condition {
                        Some(TypeCondition::On(condition)) => condition.as_str(),
                        None => type_name,
                    };
                    let mut rewritten = fragment.clone();
                    rewritten.selection_set = self.rewrite_selection(
                        operation,
                        condition,
                        &fragment.selection_set,
                        visiting,
                    )?;
                    items.push(query::Selection::InlineFragment(rewritten));
                }
                query::Selection::FragmentSpread(spread) => {
                    let name = &spread.fragment_name;
                    if visiting.contains(name) {
                        return Err(QueryError::FragmentCycle(name.clone()));
                    }
                    let definition = operation.fragment(name)?;
                    let TypeCondition::On(condition) = &definition.type_condition;

                    visiting.push(name.clone());
                    let selection_set = self.rewrite_selection(
                        operation,
                        condition,
                        &definition.selection_set,
                        visiting,
                    )?;
                    visiting.pop();

                    items.push(query::Selection::InlineFragment(query::InlineFragment {
                        position: spread.position,
                        type_condition: Some(definition.type_condition.clone()),
                        directives: spread.directives.clone(),
                        selection_set,
                    }));
                }
            }
        }

        Ok(SelectionSet {
            span: selection_set.span,
            items,
        })
    }
}

fn injected_field(column: &str, position: Pos) -> Selection {
    query::Selection::Field(query::Field {
        position,
        alias: Some(internal_alias(column)),
        name: column.to_string(),
        arguments: Vec::new(),
        directives: Vec::new(),
        selection_set: SelectionSet {
            span: (position, position),
            items: Vec::new(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{composed, composed_with, users_schema_with_mutations};
    use crate::{DATA_SERVICE, GraphQLRequest, USERS_SERVICE};
    use serde_json::json;

    fn prepare(query: &str) -> PreparedOperation {
        PreparedOperation::parse(&GraphQLRequest::new(query)).unwrap()
    }

    #[test]
    fn selects_operation_by_name() {
        let request = GraphQLRequest::new("query A { a } query B { b }");
        assert_eq!(
            PreparedOperation::parse(&request).unwrap_err(),
            QueryError::AmbiguousOperation
        );

        let operation =
            PreparedOperation::parse(&request.clone().with_operation_name("B")).unwrap();
        assert_eq!(operation.name(), Some("B"));

        let err = PreparedOperation::parse(&request.with_operation_name("C")).unwrap_err();
        assert_eq!(err, QueryError::UnknownOperation("C".to_string()));
    }

    #[test]
    fn rejects_subscriptions_and_garbage() {
        let err = PreparedOperation::parse(&GraphQLRequest::new("subscription { goals { id } }"))
            .unwrap_err();
        assert_eq!(err, QueryError::SubscriptionUnsupported);

        assert!(matches!(
            PreparedOperation::parse(&GraphQLRequest::new("{ goals {")),
            Err(QueryError::Parse(_))
        ));
    }

    #[test]
    fn collects_fields_through_fragments_and_directives() {
        let request = GraphQLRequest::new(
            r#"
            query($show: Boolean = false) {
              a
              ...F
              ... on Other { c }
              hidden: d @include(if: $show)
              e @skip(if: true)
            }
            fragment F on Query { a b }
            "#,
        );
        let operation = PreparedOperation::parse(&request).unwrap();
        let collected = operation
            .collect_fields(&[operation.selection_set()], &|c| c == "Query")
            .unwrap();

        let keys: Vec<_> = collected.iter().map(|c| c.response_key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(collected[0].fields.len(), 2);
    }

    #[test]
    fn detects_fragment_cycles() {
        let operation =
            prepare("{ ...A } fragment A on Query { ...B } fragment B on Query { ...A }");
        let err = operation
            .collect_fields(&[operation.selection_set()], &|_| true)
            .unwrap_err();
        assert!(matches!(err, QueryError::FragmentCycle(_)));
    }

    #[test]
    fn outbound_operations_only_declare_used_variables() {
        let request = GraphQLRequest::new(
            "query Goals($limit: Int, $unused: String) { goals(limit: $limit) { id } }",
        )
        .with_variables(json!({ "limit": 5, "unused": "x" }));
        let operation = PreparedOperation::parse(&request).unwrap();

        let outbound = operation.build_operation(
            OperationKind::Query,
            operation.outbound_name(),
            operation.selection_set().clone(),
        );

        assert!(outbound.query.contains("$limit: Int"));
        assert!(!outbound.query.contains("$unused"));
        assert_eq!(outbound.variables, json!({ "limit": 5 }).as_object().cloned().unwrap());
        assert_eq!(outbound.operation_name.as_deref(), Some("Goals"));
    }

    #[test]
    fn reserved_introspection_name_is_not_forwarded() {
        let operation = prepare("query IntrospectionQuery { goals { id } }");
        assert_eq!(operation.outbound_name(), None);
    }

    #[test]
    fn routes_root_fields_to_their_owner() {
        let schema = composed();
        let operation = prepare("{ goals { id } me: user(id: 1) { email } __typename }");
        let plan = QueryPlanner::new(&schema).plan(&operation).unwrap();

        assert_eq!(plan.root_keys, vec!["goals", "me", "__typename"]);
        assert_eq!(plan.local_fields, vec!["__typename"]);
        let services: Vec<_> = plan.service_queries.iter().map(|q| q.service.as_str()).collect();
        assert_eq!(services, vec![DATA_SERVICE, USERS_SERVICE]);
        assert_eq!(plan.service_queries[1].response_keys, vec!["me"]);
        assert!(plan.service_queries[1].operation.query.contains("me: user(id: 1)"));
    }

    #[test]
    fn extension_fields_become_fragment_requirements() {
        let schema = composed();
        let operation = prepare(
            "{ goals { title created_by { fullName } ...Review } } \
             fragment Review on goals { reviewer { id } }",
        );
        let plan = QueryPlanner::new(&schema).plan(&operation).unwrap();
        let query = &plan.service_queries[0].operation.query;

        assert!(query.contains("_stitch_created_by_id: created_by_id"), "{query}");
        assert!(query.contains("_stitch_reviewer_id: reviewer_id"), "{query}");
        assert!(query.contains("... on goals"), "{query}");
        assert!(!query.contains("fullName"), "{query}");
        assert!(!query.contains("created_by {"), "{query}");
        assert!(!query.contains("Review"), "{query}");
    }

    #[test]
    fn delegated_selections_are_validated_against_the_target_type() {
        let schema = composed();
        let err = QueryPlanner::new(&schema)
            .plan(&prepare("{ goals { created_by { nope } } }"))
            .unwrap_err();
        assert_eq!(
            err,
            QueryError::UnknownField {
                type_name: "User".to_string(),
                field: "nope".to_string(),
            }
        );
    }

    #[test]
    fn mutations_use_the_mutation_root() {
        let schema = composed();
        let plan = QueryPlanner::new(&schema)
            .plan(&prepare(r#"mutation { insert_goal(title: "x") { id } }"#))
            .unwrap();
        assert_eq!(plan.kind, OperationKind::Mutation);
        assert_eq!(plan.root_type, "Mutation");
        assert!(plan.service_queries[0].operation.query.starts_with("mutation"));
    }

    #[test]
    fn mutation_dispatches_follow_document_order() {
        let schema = composed_with(users_schema_with_mutations());
        let plan = QueryPlanner::new(&schema)
            .plan(&prepare(
                r#"mutation {
                    a: insert_goal(title: "a") { id }
                    b: insert_goal(title: "b") { id }
                    c: update_user { id }
                    d: insert_goal(title: "d") { id }
                }"#,
            ))
            .unwrap();

        let dispatches: Vec<_> = plan
            .service_queries
            .iter()
            .map(|q| (q.service.as_str(), q.response_keys.join(",")))
            .collect();
        assert_eq!(
            dispatches,
            vec![
                (DATA_SERVICE, "a,b".to_string()),
                (USERS_SERVICE, "c".to_string()),
                (DATA_SERVICE, "d".to_string()),
            ]
        );
        assert!(plan.service_queries[2].operation.query.contains("d: insert_goal"));
        assert!(!plan.service_queries[2].operation.query.contains("a: insert_goal"));
    }

    #[test]
    fn query_groups_still_batch_per_service() {
        let schema = composed();
        let plan = QueryPlanner::new(&schema)
            .plan(&prepare("{ a: goals { id } users { id } b: goals { title } }"))
            .unwrap();

        assert_eq!(plan.service_queries.len(), 2);
        assert_eq!(plan.service_queries[0].response_keys, vec!["a", "b"]);
    }

    #[test]
    fn reserved_response_keys_are_rejected() {
        let aliased = GraphQLRequest::new("{ goals { _stitch_note: title } }");
        let err = PreparedOperation::parse(&aliased).unwrap_err();
        assert_eq!(err, QueryError::ReservedResponseKey("_stitch_note".to_string()));

        let err = PreparedOperation::parse(&GraphQLRequest::new(
            "{ goals { ...G } } fragment G on goals { _stitch_created_by_id: title }",
        ))
        .unwrap_err();
        assert_eq!(
            err,
            QueryError::ReservedResponseKey("_stitch_created_by_id".to_string())
        );

        let plain = GraphQLRequest::new("{ goals { stitch_note: title } }");
        assert!(PreparedOperation::parse(&plain).is_ok());
    }
}
