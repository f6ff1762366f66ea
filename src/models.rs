use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Access method used when an index target does not name one.
pub const DEFAULT_ACCESS_METHOD: &str = "btree";

/// Rounding precision applied to real-valued parameter settings by default.
pub const DEFAULT_PRECISION: u32 = 2;

/// An index definition that a create or drop action applies to.
///
/// Identity is derived once from table, ordered columns, access method and
/// name. Two targets with the same identity are the same target.
#[derive(Debug, Clone, Serialize)]
pub struct IndexTarget {
    table: String,
    columns: Vec<String>,
    access_method: Option<String>,
    name: Option<String>,
    #[serde(skip)]
    identifier: String,
}

impl IndexTarget {
    pub fn new(table: impl Into<String>, columns: Vec<String>) -> Self {
        Self::build(table.into(), columns, None, None)
    }

    /// Returns a copy of this target with its name overridden.
    pub fn with_name(self, name: impl Into<String>) -> Self {
        Self::build(self.table, self.columns, self.access_method, Some(name.into()))
    }

    /// Returns a copy of this target using the given access method.
    pub fn with_access_method(self, method: impl Into<String>) -> Self {
        Self::build(self.table, self.columns, Some(method.into()), self.name)
    }

    fn build(
        table: String,
        columns: Vec<String>,
        access_method: Option<String>,
        name: Option<String>,
    ) -> Self {
        let mut target = Self {
            table,
            columns,
            access_method,
            name,
            identifier: String::new(),
        };
        target.identifier = format!(
            "{} ON {} USING {} ({})",
            target.index_name(),
            target.table,
            target.access_method(),
            target.columns.join(", ")
        );
        target
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn access_method(&self) -> &str {
        self.access_method.as_deref().unwrap_or(DEFAULT_ACCESS_METHOD)
    }

    /// The explicit name, or `idx_<table>_<cols>` with a method suffix for
    /// non-default access methods.
    pub fn index_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }

        let columns: Vec<String> = self.columns.iter().map(|c| c.replace('_', "")).collect();
        let mut name = format!("idx_{}_{}", self.table, columns.join("_"));
        let method = self.access_method();
        if method != DEFAULT_ACCESS_METHOD {
            name.push('_');
            name.push_str(method);
        }
        name
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// A runtime parameter (GUC) that set actions apply to. Identity is the name.
#[derive(Debug, Clone, Serialize)]
pub struct ParameterTarget {
    name: String,
    precision: u32,
}

impl ParameterTarget {
    pub fn new(name: impl Into<String>, precision: u32) -> Self {
        Self {
            name: name.into(),
            precision,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn precision(&self) -> u32 {
        self.precision
    }

    pub fn identifier(&self) -> &str {
        &self.name
    }
}

macro_rules! identity_eq {
    ($ty:ty) => {
        impl PartialEq for $ty {
            fn eq(&self, other: &Self) -> bool {
                self.identifier() == other.identifier()
            }
        }

        impl Eq for $ty {}

        impl Hash for $ty {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.identifier().hash(state);
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.identifier())
            }
        }
    };
}

identity_eq!(IndexTarget);
identity_eq!(ParameterTarget);

/// A shared handle to a tuning target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    Index(Arc<IndexTarget>),
    Parameter(Arc<ParameterTarget>),
}

impl Target {
    pub fn identifier(&self) -> &str {
        match self {
            Target::Index(index) => index.identifier(),
            Target::Parameter(param) => param.identifier(),
        }
    }

    /// True when both handles point at the same allocation.
    pub fn same_instance(&self, other: &Target) -> bool {
        match (self, other) {
            (Target::Index(a), Target::Index(b)) => Arc::ptr_eq(a, b),
            (Target::Parameter(a), Target::Parameter(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}

/// A parameter setting as written in a pipeline or proposed by a generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            ParamValue::Text(s) => s.trim().parse().ok(),
            ParamValue::Bool(_) => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(true) => f.write_str("on"),
            ParamValue::Bool(false) => f.write_str("off"),
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Text(s) => f.write_str(s),
        }
    }
}

/// A proposed change to the database.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    CreateIndex {
        target: Arc<IndexTarget>,
    },
    DropIndex {
        target: Arc<IndexTarget>,
        cascade: bool,
    },
    SetParameter {
        target: Arc<ParameterTarget>,
        value: Option<ParamValue>,
        /// Persist with `ALTER SYSTEM` instead of a session-level `SET`.
        alter_system: bool,
    },
}

impl Action {
    pub fn create_index(target: IndexTarget) -> Self {
        Action::CreateIndex {
            target: Arc::new(target),
        }
    }

    pub fn drop_index(target: IndexTarget, cascade: bool) -> Self {
        Action::DropIndex {
            target: Arc::new(target),
            cascade,
        }
    }

    pub fn set_parameter(
        target: Arc<ParameterTarget>,
        value: Option<ParamValue>,
        alter_system: bool,
    ) -> Self {
        Action::SetParameter {
            target,
            value,
            alter_system,
        }
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            Action::CreateIndex { .. } => ActionKind::CreateIndex,
            Action::DropIndex { .. } => ActionKind::DropIndex,
            Action::SetParameter { .. } => ActionKind::SetParameter,
        }
    }

    pub fn target(&self) -> Target {
        match self {
            Action::CreateIndex { target } | Action::DropIndex { target, .. } => {
                Target::Index(Arc::clone(target))
            }
            Action::SetParameter { target, .. } => Target::Parameter(Arc::clone(target)),
        }
    }

    pub fn identifier(&self) -> &str {
        match self {
            Action::CreateIndex { target } | Action::DropIndex { target, .. } => {
                target.identifier()
            }
            Action::SetParameter { target, .. } => target.identifier(),
        }
    }

    /// Points this action at `canonical` when it carries the same identity.
    /// Returns false when the kinds disagree and nothing was rebound.
    pub(crate) fn rebind(&mut self, canonical: &Target) -> bool {
        match (self, canonical) {
            (
                Action::CreateIndex { target } | Action::DropIndex { target, .. },
                Target::Index(index),
            ) if **target == **index => {
                *target = Arc::clone(index);
                true
            }
            (Action::SetParameter { target, .. }, Target::Parameter(param))
                if **target == **param =>
            {
                *target = Arc::clone(param);
                true
            }
            _ => false,
        }
    }

    /// A copy of this action whose index target uses `method`. Parameter
    /// actions have no access method and yield `None`.
    pub fn with_access_method(&self, method: &str) -> Option<Action> {
        match self {
            Action::CreateIndex { target } => Some(Action::create_index(
                target.as_ref().clone().with_access_method(method),
            )),
            Action::DropIndex { target, cascade } => Some(Action::drop_index(
                target.as_ref().clone().with_access_method(method),
                *cascade,
            )),
            Action::SetParameter { .. } => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::sql::render(self))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    CreateIndex,
    DropIndex,
    SetParameter,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::CreateIndex => "create_index",
            ActionKind::DropIndex => "drop_index",
            ActionKind::SetParameter => "set_parameter",
        }
    }
}

/// Serialized form of an action in the exported catalog.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionRecord<'a> {
    CreateIndex {
        target: &'a str,
        table: &'a str,
        columns: &'a [String],
        access_method: &'a str,
        sql: String,
    },
    DropIndex {
        target: &'a str,
        index: String,
        cascade: bool,
        sql: String,
    },
    SetParameter {
        target: &'a str,
        value: &'a Option<ParamValue>,
        alter_system: bool,
        sql: String,
    },
}

impl<'a> From<&'a Action> for ActionRecord<'a> {
    fn from(action: &'a Action) -> Self {
        let sql = crate::sql::render(action);
        match action {
            Action::CreateIndex { target } => ActionRecord::CreateIndex {
                target: target.identifier(),
                table: target.table(),
                columns: target.columns(),
                access_method: target.access_method(),
                sql,
            },
            Action::DropIndex { target, cascade } => ActionRecord::DropIndex {
                target: target.identifier(),
                index: target.index_name(),
                cascade: *cascade,
                sql,
            },
            Action::SetParameter {
                target,
                value,
                alter_system,
            } => ActionRecord::SetParameter {
                target: target.identifier(),
                value,
                alter_system: *alter_system,
                sql,
            },
        }
    }
}
