//! The user-facing search request.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Classification wildcard: the entity carries at least one classification.
pub const ALL_CLASSIFICATIONS: &str = "*";
/// Classification wildcard: the entity carries no classification at all.
pub const NO_CLASSIFICATIONS: &str = "_NOT_CLASSIFIED";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Neq,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    /// Comma-separated list of alternatives.
    #[serde(rename = "in")]
    In,
    #[serde(rename = "startsWith")]
    StartsWith,
    #[serde(rename = "endsWith")]
    EndsWith,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "isNull")]
    IsNull,
    #[serde(rename = "notNull")]
    NotNull,
}

impl Operator {
    const ALL: [Operator; 12] = [
        Operator::Eq,
        Operator::Neq,
        Operator::Lt,
        Operator::Lte,
        Operator::Gt,
        Operator::Gte,
        Operator::In,
        Operator::StartsWith,
        Operator::EndsWith,
        Operator::Contains,
        Operator::IsNull,
        Operator::NotNull,
    ];

    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Neq => "!=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::In => "in",
            Operator::StartsWith => "startsWith",
            Operator::EndsWith => "endsWith",
            Operator::Contains => "contains",
            Operator::IsNull => "isNull",
            Operator::NotNull => "notNull",
        }
    }

    pub fn takes_operand(self) -> bool {
        !matches!(self, Operator::IsNull | Operator::NotNull)
    }

    /// Substring operators, only meaningful on string-like attributes.
    pub fn is_textual(self) -> bool {
        matches!(
            self,
            Operator::StartsWith | Operator::EndsWith | Operator::Contains
        )
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operator::ALL
            .into_iter()
            .find(|op| op.symbol().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown operator {s:?}"))
    }
}

/// `attribute operator value`, applied to an entity or a classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributePredicate {
    pub attribute_name: String,
    pub operator: Operator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute_value: Option<String>,
}

impl AttributePredicate {
    pub fn new(attribute: impl Into<String>, operator: Operator, value: impl Into<String>) -> Self {
        Self {
            attribute_name: attribute.into(),
            operator,
            attribute_value: Some(value.into()),
        }
    }

    /// A predicate without an operand (`isNull` / `notNull`).
    pub fn unary(attribute: impl Into<String>, operator: Operator) -> Self {
        Self {
            attribute_name: attribute.into(),
            operator,
            attribute_value: None,
        }
    }
}

impl FromStr for AttributePredicate {
    type Err = String;

    /// `attribute:operator[:value]`. The value may itself contain `:`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let attribute = parts
            .next()
            .filter(|a| !a.is_empty())
            .ok_or_else(|| format!("missing attribute in filter {s:?}"))?;
        let operator: Operator = parts
            .next()
            .ok_or_else(|| format!("missing operator in filter {s:?}"))?
            .parse()?;
        Ok(Self {
            attribute_name: attribute.to_string(),
            operator,
            attribute_value: parts.next().map(str::to_string),
        })
    }
}

/// One search over entities of a type.
///
/// `limit` and `offset` are signed so a negative value coming off the wire is
/// rejected with a validation error instead of failing deserialization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchRequest {
    pub type_name: String,
    pub classification: Option<String>,
    /// Free text; every token must appear in some string attribute.
    pub query: Option<String>,
    pub entity_filters: Vec<AttributePredicate>,
    /// Filters on the attributes of the matched classification instance.
    pub tag_filters: Vec<AttributePredicate>,
    /// Attributes to project into each result.
    pub attributes: Vec<String>,
    pub sort_by: Option<String>,
    pub sort_order: SortOrder,
    pub limit: Option<i64>,
    pub offset: i64,
    pub exclude_sub_types: bool,
    pub exclude_deleted_entities: bool,
}

impl SearchRequest {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            ..Self::default()
        }
    }

    pub fn with_classification(mut self, classification: impl Into<String>) -> Self {
        self.classification = Some(classification.into());
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_filter(mut self, predicate: AttributePredicate) -> Self {
        self.entity_filters.push(predicate);
        self
    }

    pub fn with_tag_filter(mut self, predicate: AttributePredicate) -> Self {
        self.tag_filters.push(predicate);
        self
    }

    pub fn with_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attributes.push(attribute.into());
        self
    }

    pub fn sorted_by(mut self, attribute: impl Into<String>, order: SortOrder) -> Self {
        self.sort_by = Some(attribute.into());
        self.sort_order = order;
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    pub fn excluding_sub_types(mut self) -> Self {
        self.exclude_sub_types = true;
        self
    }

    pub fn excluding_deleted(mut self) -> Self {
        self.exclude_deleted_entities = true;
        self
    }
}
