use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{StrataError, StrataResult};
use crate::value::Value;

/// Comparison operator of a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    NotEquals,
    Greater,
    GreaterOrEqual,
    Lower,
    LowerOrEqual,
    Like,
    ILike,
    NotLike,
    In,
    NotIn,
}

impl Operator {
    /// Token used in serialized domains.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Equals => "=",
            Self::NotEquals => "!=",
            Self::Greater => ">",
            Self::GreaterOrEqual => ">=",
            Self::Lower => "<",
            Self::LowerOrEqual => "<=",
            Self::Like => "like",
            Self::ILike => "ilike",
            Self::NotLike => "not like",
            Self::In => "in",
            Self::NotIn => "not in",
        }
    }

    /// Standard SQL spelling; dialects may override `ILIKE`.
    pub fn sql(self) -> &'static str {
        match self {
            Self::Like => "LIKE",
            Self::ILike => "ILIKE",
            Self::NotLike => "NOT LIKE",
            Self::In => "IN",
            Self::NotIn => "NOT IN",
            other => other.as_str(),
        }
    }

    /// Operators whose argument is wrapped in `%...%`.
    pub fn is_pattern(self) -> bool {
        matches!(self, Self::Like | Self::ILike | Self::NotLike)
    }

    pub fn is_set(self) -> bool {
        matches!(self, Self::In | Self::NotIn)
    }

    /// Case-insensitive inverse of [`Operator::as_str`].
    pub fn parse(token: &str) -> Option<Self> {
        Some(match token.trim().to_ascii_lowercase().as_str() {
            "=" => Self::Equals,
            "!=" => Self::NotEquals,
            ">" => Self::Greater,
            ">=" => Self::GreaterOrEqual,
            "<" => Self::Lower,
            "<=" => Self::LowerOrEqual,
            "like" => Self::Like,
            "ilike" => Self::ILike,
            "not like" => Self::NotLike,
            "in" => Self::In,
            "not in" => Self::NotIn,
            _ => return None,
        })
    }
}

impl Serialize for Operator {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Operator {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let token = String::deserialize(deserializer)?;
        Operator::parse(&token)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown operator `{}`", token)))
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A leaf `(path, operator, value)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    /// Dotted field path, by field name or column.
    pub path: String,
    pub operator: Operator,
    pub value: Value,
}

/// A node of the condition tree.
#[derive(Debug, Clone, PartialEq)]
pub enum CondNode {
    Leaf(Predicate),
    Not(Box<CondNode>),
    And(Box<CondNode>, Box<CondNode>),
    Or(Box<CondNode>, Box<CondNode>),
}

impl CondNode {
    fn serialize_into(&self, out: &mut Vec<DomainTerm>) {
        match self {
            Self::Leaf(predicate) => out.push(DomainTerm::Predicate(
                predicate.path.clone(),
                predicate.operator,
                predicate.value.clone(),
            )),
            Self::Not(inner) => {
                out.push(DomainTerm::Operator("!".to_owned()));
                inner.serialize_into(out);
            }
            Self::And(left, right) => {
                out.push(DomainTerm::Operator("&".to_owned()));
                left.serialize_into(out);
                right.serialize_into(out);
            }
            // Most recently combined operand first.
            Self::Or(left, right) => {
                out.push(DomainTerm::Operator("|".to_owned()));
                right.serialize_into(out);
                left.serialize_into(out);
            }
        }
    }

    fn collect_paths<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Leaf(predicate) => out.push(&predicate.path),
            Self::Not(inner) => inner.collect_paths(out),
            Self::And(left, right) | Self::Or(left, right) => {
                left.collect_paths(out);
                right.collect_paths(out);
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Combinator {
    And,
    Or,
    AndNot,
    OrNot,
}

/// A boolean filter over field paths.
///
/// Built left to right; each predicate is joined to everything before it with
/// the combinator the caller names:
///
/// ```
/// use strata_core::condition::Condition;
///
/// let cond = Condition::field("Name")
///     .ilike("John")
///     .and()
///     .field("Age")
///     .greater(18);
/// assert_eq!(cond.serialize().to_string(), "& [Name ilike John] [Age > 18]");
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Condition {
    root: Option<CondNode>,
}

impl Condition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a condition with a first predicate on `path`.
    pub fn field(path: &str) -> ConditionField {
        Self::new().and().field(path)
    }

    pub fn and(self) -> ConditionStart {
        self.start(Combinator::And)
    }

    pub fn or(self) -> ConditionStart {
        self.start(Combinator::Or)
    }

    pub fn and_not(self) -> ConditionStart {
        self.start(Combinator::AndNot)
    }

    pub fn or_not(self) -> ConditionStart {
        self.start(Combinator::OrNot)
    }

    /// Join a whole condition with AND.
    pub fn and_cond(self, other: Condition) -> Condition {
        match other.root {
            Some(node) => self.combine(Combinator::And, node),
            None => self,
        }
    }

    /// Join a whole condition with OR.
    pub fn or_cond(self, other: Condition) -> Condition {
        match other.root {
            Some(node) => self.combine(Combinator::Or, node),
            None => self,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn root(&self) -> Option<&CondNode> {
        self.root.as_ref()
    }

    /// Field paths of every predicate, in tree order.
    pub fn paths(&self) -> Vec<&str> {
        let mut out = Vec::new();
        if let Some(root) = &self.root {
            root.collect_paths(&mut out);
        }
        out
    }

    /// The canonical prefix-notation domain.
    pub fn serialize(&self) -> Domain {
        let mut terms = Vec::new();
        if let Some(root) = &self.root {
            root.serialize_into(&mut terms);
        }
        Domain(terms)
    }

    /// Rebuild a condition from its serialized domain.
    pub fn from_domain(domain: &Domain) -> StrataResult<Condition> {
        let mut terms = domain.0.iter();
        if domain.0.is_empty() {
            return Ok(Condition::new());
        }
        let root = parse_term(&mut terms)?;
        if terms.next().is_some() {
            return Err(StrataError::InvalidValue(format!(
                "trailing terms in domain `{}`",
                domain
            )));
        }
        Ok(Condition { root: Some(root) })
    }

    fn start(self, op: Combinator) -> ConditionStart {
        ConditionStart { cond: self, op }
    }

    fn combine(self, op: Combinator, node: CondNode) -> Condition {
        let node = match op {
            Combinator::AndNot | Combinator::OrNot => CondNode::Not(Box::new(node)),
            Combinator::And | Combinator::Or => node,
        };
        let root = match self.root {
            None => node,
            Some(acc) => match op {
                Combinator::And | Combinator::AndNot => CondNode::And(Box::new(acc), Box::new(node)),
                Combinator::Or | Combinator::OrNot => CondNode::Or(Box::new(acc), Box::new(node)),
            },
        };
        Condition { root: Some(root) }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.serialize())
    }
}

fn parse_term(terms: &mut std::slice::Iter<'_, DomainTerm>) -> StrataResult<CondNode> {
    match terms.next() {
        Some(DomainTerm::Operator(op)) => match op.as_str() {
            "&" => {
                let left = parse_term(terms)?;
                let right = parse_term(terms)?;
                Ok(CondNode::And(Box::new(left), Box::new(right)))
            }
            "|" => {
                let right = parse_term(terms)?;
                let left = parse_term(terms)?;
                Ok(CondNode::Or(Box::new(left), Box::new(right)))
            }
            "!" => Ok(CondNode::Not(Box::new(parse_term(terms)?))),
            other => Err(StrataError::InvalidValue(format!(
                "unknown domain operator `{}`",
                other
            ))),
        },
        Some(DomainTerm::Predicate(path, operator, value)) => Ok(CondNode::Leaf(Predicate {
            path: path.clone(),
            operator: *operator,
            value: value.clone(),
        })),
        None => Err(StrataError::InvalidValue(
            "domain ended before its operands".to_owned(),
        )),
    }
}

/// A condition waiting for the field of its next predicate.
#[derive(Debug)]
pub struct ConditionStart {
    cond: Condition,
    op: Combinator,
}

impl ConditionStart {
    pub fn field(self, path: &str) -> ConditionField {
        ConditionField {
            start: self,
            path: path.to_owned(),
        }
    }
}

/// A condition waiting for the operator of its next predicate.
#[derive(Debug)]
pub struct ConditionField {
    start: ConditionStart,
    path: String,
}

impl ConditionField {
    fn push(self, operator: Operator, value: Value) -> Condition {
        let ConditionStart { cond, op } = self.start;
        cond.combine(
            op,
            CondNode::Leaf(Predicate {
                path: self.path,
                operator,
                value,
            }),
        )
    }

    pub fn equals(self, value: impl Into<Value>) -> Condition {
        self.push(Operator::Equals, value.into())
    }

    pub fn not_equals(self, value: impl Into<Value>) -> Condition {
        self.push(Operator::NotEquals, value.into())
    }

    pub fn greater(self, value: impl Into<Value>) -> Condition {
        self.push(Operator::Greater, value.into())
    }

    pub fn greater_or_equal(self, value: impl Into<Value>) -> Condition {
        self.push(Operator::GreaterOrEqual, value.into())
    }

    pub fn lower(self, value: impl Into<Value>) -> Condition {
        self.push(Operator::Lower, value.into())
    }

    pub fn lower_or_equal(self, value: impl Into<Value>) -> Condition {
        self.push(Operator::LowerOrEqual, value.into())
    }

    pub fn like(self, value: impl Into<Value>) -> Condition {
        self.push(Operator::Like, value.into())
    }

    /// Case-insensitive contains.
    pub fn ilike(self, value: impl Into<Value>) -> Condition {
        self.push(Operator::ILike, value.into())
    }

    pub fn not_like(self, value: impl Into<Value>) -> Condition {
        self.push(Operator::NotLike, value.into())
    }

    pub fn in_(self, value: impl Into<Value>) -> Condition {
        self.push(Operator::In, value.into())
    }

    pub fn not_in(self, value: impl Into<Value>) -> Condition {
        self.push(Operator::NotIn, value.into())
    }
}

/// One term of a serialized domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DomainTerm {
    /// `&`, `|` or `!`.
    Operator(String),
    Predicate(String, Operator, Value),
}

impl fmt::Display for DomainTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Operator(op) => f.write_str(op),
            Self::Predicate(path, op, value) => write!(f, "[{} {} {}]", path, op, value),
        }
    }
}

/// A condition in prefix (polish) notation, the textual interchange form of filters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Domain(pub Vec<DomainTerm>);

impl Domain {
    pub fn terms(&self) -> &[DomainTerm] {
        &self.0
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, term) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", term)?;
        }
        Ok(())
    }
}
