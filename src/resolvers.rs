//! Fields the gateway adds on top of the upstream schemas.
//!
//! Each extension field is declared twice: once in `schemas/extensions.graphql`
//! (its type) and once in [`EXTENSION_FIELDS`] (how to compute it). The schema
//! composer checks that both agree.

use graphql_parser::Pos;
use graphql_parser::query::{self, Number, Value as AstValue};
use serde_json::{Map, Value};

use crate::query_planner::{OperationKind, PreparedOperation, SelectionSet};
use crate::{OutboundOperation, RequestContext, USERS_SERVICE};

pub const EXTENSIONS_SDL: &str = include_str!("../schemas/extensions.graphql");

/// Id sent for a nullable relation whose foreign key is missing.
pub const ABSENT_ID: i32 = 0;

/// Computes a field from its fragment requirement columns.
pub type LocalResolver = fn(&Map<String, Value>) -> Result<Value, String>;

#[derive(Debug, Clone, Copy)]
pub enum Resolve {
    /// Computed in-process from sibling columns.
    Local(LocalResolver),
    /// Fetched from another upstream with a single-field root query.
    Delegate(Delegation),
}

/// A `<field_name>(<argument>: <id_column>)` root query on `service`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delegation {
    pub service: &'static str,
    pub field_name: &'static str,
    pub argument: &'static str,
    pub id_column: &'static str,
    /// A required id must be present; otherwise [`ABSENT_ID`] stands in.
    pub required: bool,
}

#[derive(Debug)]
pub struct ExtensionField {
    pub type_name: &'static str,
    pub field_name: &'static str,
    /// Columns of the parent needed to resolve the field, as a GraphQL fragment.
    pub fragment: &'static str,
    pub resolve: Resolve,
}

pub static EXTENSION_FIELDS: &[ExtensionField] = &[
    ExtensionField {
        type_name: "User",
        field_name: "fullName",
        fragment: "fragment UserFragment on User { firstName lastName }",
        resolve: Resolve::Local(full_name),
    },
    ExtensionField {
        type_name: "goals",
        field_name: "created_by",
        fragment: "fragment goalsFragment on goals { created_by_id }",
        resolve: Resolve::Delegate(user_by_id("created_by_id", true)),
    },
    ExtensionField {
        type_name: "goals",
        field_name: "delegated_to",
        fragment: "fragment goalsFragment on goals { delegated_to_id }",
        resolve: Resolve::Delegate(user_by_id("delegated_to_id", false)),
    },
    ExtensionField {
        type_name: "goals",
        field_name: "reviewer",
        fragment: "fragment goalsFragment on goals { reviewer_id }",
        resolve: Resolve::Delegate(user_by_id("reviewer_id", false)),
    },
    ExtensionField {
        type_name: "goals",
        field_name: "verifier",
        fragment: "fragment goalsFragment on goals { verifier_id }",
        resolve: Resolve::Delegate(user_by_id("verifier_id", false)),
    },
];

const fn user_by_id(id_column: &'static str, required: bool) -> Delegation {
    Delegation {
        service: USERS_SERVICE,
        field_name: "user",
        argument: "id",
        id_column,
        required,
    }
}

/// `User.fullName`: first and last name joined by one space.
pub fn full_name(parent: &Map<String, Value>) -> Result<Value, String> {
    let part = |column: &str| {
        parent
            .get(column)
            .and_then(Value::as_str)
            .ok_or_else(|| format!("`{column}` is required to compute fullName"))
    };

    Ok(Value::String(format!(
        "{} {}",
        part("firstName")?,
        part("lastName")?
    )))
}

impl Delegation {
    /// Reads the foreign key from the parent columns as a GraphQL `Int`.
    pub fn coerce_id(&self, parent: &Map<String, Value>) -> Result<i32, String> {
        let column = self.id_column;
        let id = match parent.get(column) {
            None | Some(Value::Null) if self.required => {
                return Err(format!("`{column}` is missing"));
            }
            None | Some(Value::Null) => return Ok(ABSENT_ID),
            Some(Value::String(s)) if s.is_empty() && !self.required => return Ok(ABSENT_ID),
            Some(Value::Number(n)) => n
                .as_i64()
                .ok_or_else(|| format!("`{column}` is not an integer: {n}"))?,
            Some(Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| format!("`{column}` is not an integer: {s:?}"))?,
            Some(other) => return Err(format!("`{column}` is not an integer: {other}")),
        };

        i32::try_from(id).map_err(|_| format!("`{column}` is out of range for Int: {id}"))
    }

    pub fn request<'r>(
        &self,
        id: i32,
        context: &'r RequestContext,
        selection: SelectionSet,
    ) -> DelegatedRequest<'r> {
        DelegatedRequest {
            service: self.service,
            operation: OperationKind::Query,
            field_name: self.field_name,
            arguments: vec![(self.argument, id)],
            context,
            selection,
        }
    }
}

/// One sub-query issued on behalf of an extension field.
#[derive(Debug)]
pub struct DelegatedRequest<'r> {
    pub service: &'static str,
    pub operation: OperationKind,
    pub field_name: &'static str,
    pub arguments: Vec<(&'static str, i32)>,
    pub context: &'r RequestContext,
    /// The client's sub-selection, already rewritten for the target upstream.
    pub selection: SelectionSet,
}

impl DelegatedRequest<'_> {
    pub fn to_operation(&self, operation: &PreparedOperation) -> OutboundOperation {
        let position = Pos::default();
        let field = query::Field {
            position,
            alias: None,
            name: self.field_name.to_string(),
            arguments: self
                .arguments
                .iter()
                .map(|(name, id)| (name.to_string(), AstValue::Int(Number::from(*id))))
                .collect(),
            directives: Vec::new(),
            selection_set: self.selection.clone(),
        };

        operation.build_operation(
            self.operation,
            operation.outbound_name(),
            SelectionSet {
                span: (position, position),
                items: vec![query::Selection::Field(field)],
            },
        )
    }
}
