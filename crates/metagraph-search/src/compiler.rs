//! Filter compilation.
//!
//! A validated request is split into index strategies, which produce
//! candidate vertex sets from store lookups, and a residual predicate that is
//! checked per candidate. Strategies are ordered attribute lookups first,
//! then classification lookups; a type scan appears only when nothing
//! narrower applies. Within a kind the order is the derived `Ord`, so the
//! same request always compiles to the same plan.

use std::fmt;

use crate::error::ValidationError;
use crate::request::{AttributePredicate, Operator, SearchRequest, ALL_CLASSIFICATIONS, NO_CLASSIFICATIONS};
use crate::taxonomy::{AttributeDef, AttributeType, ResolvedClassification, ResolvedType};
use crate::value::{parse_value, TypedValue};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Strategy {
    /// Union over `type_names × values` of `(type, attribute == value)` lookups.
    AttributeLookup {
        type_names: Vec<String>,
        attribute: String,
        values: Vec<String>,
    },
    /// Union over `type_names × classifications` of `(type, classification)` lookups.
    ClassificationLookup {
        type_names: Vec<String>,
        classifications: Vec<String>,
    },
    /// Every vertex of the listed types.
    TypeScan { type_names: Vec<String> },
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::AttributeLookup {
                type_names,
                attribute,
                values,
            } => write!(
                f,
                "attribute[{}].{attribute} in ({})",
                type_names.join(","),
                values.join(",")
            ),
            Strategy::ClassificationLookup {
                type_names,
                classifications,
            } => write!(
                f,
                "classification[{}] in ({})",
                type_names.join(","),
                classifications.join(",")
            ),
            Strategy::TypeScan { type_names } => write!(f, "scan[{}]", type_names.join(",")),
        }
    }
}

/// A predicate whose operand has already been parsed to the attribute's type.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledPredicate {
    pub attribute: AttributeDef,
    pub operator: Operator,
    pub operands: Vec<TypedValue>,
}

impl CompiledPredicate {
    /// Evaluate against an entity's (parsed) value. A missing value only
    /// satisfies `isNull` and `!=`.
    pub fn matches(&self, value: Option<&TypedValue>) -> bool {
        let Some(value) = value else {
            return matches!(self.operator, Operator::IsNull | Operator::Neq);
        };
        let first = self.operands.first();
        let cmp = |want: &TypedValue| value.compare(want);
        match self.operator {
            Operator::IsNull => false,
            Operator::NotNull => true,
            Operator::Eq => first.is_some_and(|w| cmp(w).is_eq()),
            Operator::Neq => first.is_some_and(|w| cmp(w).is_ne()),
            Operator::Lt => first.is_some_and(|w| cmp(w).is_lt()),
            Operator::Lte => first.is_some_and(|w| cmp(w).is_le()),
            Operator::Gt => first.is_some_and(|w| cmp(w).is_gt()),
            Operator::Gte => first.is_some_and(|w| cmp(w).is_ge()),
            Operator::In => self.operands.iter().any(|w| cmp(w).is_eq()),
            Operator::StartsWith | Operator::EndsWith | Operator::Contains => {
                let (Some(have), Some(want)) = (value.as_text(), first.and_then(TypedValue::as_text))
                else {
                    return false;
                };
                match self.operator {
                    Operator::StartsWith => have.starts_with(want),
                    Operator::EndsWith => have.ends_with(want),
                    _ => have.contains(want),
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClassificationCheck {
    /// At least one classification of any kind.
    Any,
    /// No classification at all.
    Unclassified,
    /// One of `names`, whose instance attributes satisfy every predicate.
    Tagged {
        names: Vec<String>,
        predicates: Vec<CompiledPredicate>,
    },
}

/// Conditions no index answers, checked per candidate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResidualPredicate {
    pub attribute_predicates: Vec<CompiledPredicate>,
    pub classification: Option<ClassificationCheck>,
    /// Lowercased free-text tokens.
    pub text_tokens: Vec<String>,
    /// String-like attributes the free-text tokens are searched in.
    pub text_attributes: Vec<AttributeDef>,
    pub exclude_deleted: bool,
}

impl ResidualPredicate {
    /// True when every candidate passes, so counting needs no per-vertex reads.
    pub fn is_trivial(&self) -> bool {
        self.attribute_predicates.is_empty()
            && self.classification.is_none()
            && self.text_tokens.is_empty()
            && !self.exclude_deleted
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFilter {
    pub strategies: Vec<Strategy>,
    pub residual: ResidualPredicate,
}

/// Compile the filtering half of `request`. `resolved_type` and
/// `classification` must already be resolved from the same request.
pub fn compile(
    request: &SearchRequest,
    resolved_type: &ResolvedType,
    classification: Option<&ResolvedClassification>,
) -> Result<CompiledFilter, ValidationError> {
    let type_names = if request.exclude_sub_types {
        vec![resolved_type.name.clone()]
    } else {
        resolved_type.type_and_sub_types.clone()
    };

    let mut strategies = Vec::new();
    let mut residual = ResidualPredicate {
        exclude_deleted: request.exclude_deleted_entities,
        ..ResidualPredicate::default()
    };

    for filter in &request.entity_filters {
        let attribute = resolved_type
            .queryable_attribute(&filter.attribute_name, !request.exclude_sub_types)?;
        let predicate = compile_predicate(filter, attribute)?;

        if attribute.indexed
            && attribute.attr_type.is_textual()
            && matches!(predicate.operator, Operator::Eq | Operator::In)
        {
            let mut values: Vec<String> = predicate
                .operands
                .iter()
                .filter_map(|v| v.as_text().map(str::to_string))
                .collect();
            values.sort();
            values.dedup();
            strategies.push(Strategy::AttributeLookup {
                type_names: type_names.clone(),
                attribute: attribute.name.clone(),
                values,
            });
        } else {
            residual.attribute_predicates.push(predicate);
        }
    }

    match request.classification.as_deref() {
        Some(ALL_CLASSIFICATIONS) | Some(NO_CLASSIFICATIONS) | None
            if !request.tag_filters.is_empty() =>
        {
            return Err(ValidationError::TagFiltersWithoutClassification(
                request.classification.clone(),
            ));
        }
        Some(ALL_CLASSIFICATIONS) => residual.classification = Some(ClassificationCheck::Any),
        Some(NO_CLASSIFICATIONS) => {
            residual.classification = Some(ClassificationCheck::Unclassified)
        }
        Some(_) | None => {}
    }

    if let Some(resolved) = classification {
        strategies.push(Strategy::ClassificationLookup {
            type_names: type_names.clone(),
            classifications: resolved.names.clone(),
        });
        if !request.tag_filters.is_empty() {
            let predicates = request
                .tag_filters
                .iter()
                .map(|filter| {
                    let attribute = resolved.attributes.get(&filter.attribute_name).ok_or_else(
                        || ValidationError::UnknownClassificationAttribute {
                            classification: resolved.name.clone(),
                            attribute: filter.attribute_name.clone(),
                        },
                    )?;
                    compile_predicate(filter, attribute)
                })
                .collect::<Result<Vec<_>, _>>()?;
            residual.classification = Some(ClassificationCheck::Tagged {
                names: resolved.names.clone(),
                predicates,
            });
        }
    }

    if let Some(query) = request.query.as_deref() {
        residual.text_tokens = tokenize(query);
        if !residual.text_tokens.is_empty() {
            residual.text_attributes = resolved_type
                .attributes
                .values()
                .filter(|a| a.attr_type.is_textual())
                .cloned()
                .collect();
        }
    }

    if strategies.is_empty() {
        strategies.push(Strategy::TypeScan { type_names });
    }
    strategies.sort();
    strategies.dedup();

    Ok(CompiledFilter {
        strategies,
        residual,
    })
}

fn compile_predicate(
    filter: &AttributePredicate,
    attribute: &AttributeDef,
) -> Result<CompiledPredicate, ValidationError> {
    let operator = filter.operator;
    if operator.is_textual() && !attribute.attr_type.is_textual() {
        return Err(ValidationError::UnsupportedOperator {
            attribute: attribute.name.clone(),
            operator,
            attr_type: attribute.attr_type,
        });
    }

    let operands = if !operator.takes_operand() {
        Vec::new()
    } else {
        let raw = filter
            .attribute_value
            .as_deref()
            .ok_or_else(|| ValidationError::MissingOperand {
                attribute: attribute.name.clone(),
                operator,
            })?;
        let raws: Vec<&str> = if operator == Operator::In {
            raw.split(',').map(str::trim).filter(|s| !s.is_empty()).collect()
        } else {
            vec![raw]
        };
        if raws.is_empty() {
            return Err(ValidationError::MissingOperand {
                attribute: attribute.name.clone(),
                operator,
            });
        }
        raws.into_iter()
            .map(|r| {
                parse_value(attribute.attr_type, r).ok_or_else(|| ValidationError::InvalidOperand {
                    attribute: attribute.name.clone(),
                    attr_type: attribute.attr_type,
                    value: r.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?
    };

    // Booleans and references have no meaningful range order.
    if matches!(
        operator,
        Operator::Lt | Operator::Lte | Operator::Gt | Operator::Gte
    ) && matches!(
        attribute.attr_type,
        AttributeType::Boolean | AttributeType::Reference
    ) {
        return Err(ValidationError::UnsupportedOperator {
            attribute: attribute.name.clone(),
            operator,
            attr_type: attribute.attr_type,
        });
    }

    Ok(CompiledPredicate {
        attribute: attribute.clone(),
        operator,
        operands,
    })
}

/// Lowercase and split on anything that is not alphanumeric.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}
