//! Required placement constraints of a pod and node matching.
//!
//! Mirrors the scheduler's `requiredDuringSchedulingIgnoredDuringExecution`
//! semantics: terms are ORed, requirements inside a term are ANDed, and a
//! `nodeSelector` map must match in addition to the terms.

use std::collections::BTreeMap;

use crate::domain::types::ClusterNode;

/// The only field `matchFields` may reference.
const NODE_NAME_FIELD: &str = "metadata.name";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
    Gt,
    Lt,
}

impl SelectorOperator {
    pub fn parse(operator: &str) -> Option<Self> {
        match operator {
            "In" => Some(Self::In),
            "NotIn" => Some(Self::NotIn),
            "Exists" => Some(Self::Exists),
            "DoesNotExist" => Some(Self::DoesNotExist),
            "Gt" => Some(Self::Gt),
            "Lt" => Some(Self::Lt),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorRequirement {
    pub key: String,
    pub operator: SelectorOperator,
    pub values: Vec<String>,
}

impl SelectorRequirement {
    fn matches(&self, value: Option<&str>) -> bool {
        match self.operator {
            SelectorOperator::In => value.is_some_and(|v| self.values.iter().any(|x| x == v)),
            SelectorOperator::NotIn => value.map_or(true, |v| !self.values.iter().any(|x| x == v)),
            SelectorOperator::Exists => value.is_some(),
            SelectorOperator::DoesNotExist => value.is_none(),
            SelectorOperator::Gt | SelectorOperator::Lt => {
                let (Some(actual), [expected]) = (value, self.values.as_slice()) else {
                    return false;
                };
                let (Ok(actual), Ok(expected)) = (actual.parse::<i64>(), expected.parse::<i64>())
                else {
                    return false;
                };
                if self.operator == SelectorOperator::Gt {
                    actual > expected
                } else {
                    actual < expected
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeSelectorTerm {
    pub match_expressions: Vec<SelectorRequirement>,
    pub match_fields: Vec<SelectorRequirement>,
}

impl NodeSelectorTerm {
    /// An empty term selects nothing.
    fn matches(&self, node: &ClusterNode) -> bool {
        if self.match_expressions.is_empty() && self.match_fields.is_empty() {
            return false;
        }
        let labels_match = self
            .match_expressions
            .iter()
            .all(|req| req.matches(node.labels.get(&req.key).map(String::as_str)));
        let fields_match = self.match_fields.iter().all(|req| {
            let value = (req.key == NODE_NAME_FIELD).then_some(node.name.as_str());
            value.is_some() && req.matches(value)
        });
        labels_match && fields_match
    }
}

/// Hard constraints on where a pod may run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlacementRequirements {
    pub node_selector: BTreeMap<String, String>,
    pub required_terms: Vec<NodeSelectorTerm>,
}

impl PlacementRequirements {
    pub fn is_constrained(&self) -> bool {
        !self.node_selector.is_empty() || !self.required_terms.is_empty()
    }

    pub fn fits(&self, node: &ClusterNode) -> bool {
        let selector_fits = self
            .node_selector
            .iter()
            .all(|(key, value)| node.labels.get(key) == Some(value));
        let terms_fit = self.required_terms.is_empty()
            || self.required_terms.iter().any(|term| term.matches(node));
        selector_fits && terms_fit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::mock::node;

    fn requirement(key: &str, operator: SelectorOperator, values: &[&str]) -> SelectorRequirement {
        SelectorRequirement {
            key: key.to_string(),
            operator,
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    fn term(expressions: Vec<SelectorRequirement>) -> NodeSelectorTerm {
        NodeSelectorTerm {
            match_expressions: expressions,
            match_fields: Vec::new(),
        }
    }

    fn zoned(name: &str, zone: &str) -> ClusterNode {
        node(name, 1000, 1 << 30, 10).with_label("zone", zone)
    }

    #[test]
    fn unconstrained_pod_fits_everywhere() {
        let placement = PlacementRequirements::default();
        assert!(!placement.is_constrained());
        assert!(placement.fits(&zoned("a", "east")));
    }

    #[test]
    fn terms_are_ored_and_expressions_anded() {
        let placement = PlacementRequirements {
            node_selector: BTreeMap::new(),
            required_terms: vec![
                term(vec![
                    requirement("zone", SelectorOperator::In, &["east"]),
                    requirement("gpu", SelectorOperator::Exists, &[]),
                ]),
                term(vec![requirement("zone", SelectorOperator::In, &["west"])]),
            ],
        };
        assert!(!placement.fits(&zoned("a", "east")));
        assert!(placement.fits(&zoned("b", "east").with_label("gpu", "a100")));
        assert!(placement.fits(&zoned("c", "west")));
    }

    #[test]
    fn not_in_and_does_not_exist_match_missing_labels() {
        let placement = PlacementRequirements {
            node_selector: BTreeMap::new(),
            required_terms: vec![term(vec![
                requirement("zone", SelectorOperator::NotIn, &["east"]),
                requirement("spot", SelectorOperator::DoesNotExist, &[]),
            ])],
        };
        assert!(placement.fits(&node("bare", 1000, 1 << 30, 10)));
        assert!(!placement.fits(&zoned("a", "east")));
    }

    #[test]
    fn numeric_comparisons_require_integer_labels() {
        let gt = term(vec![requirement("cores", SelectorOperator::Gt, &["8"])]);
        let placement = PlacementRequirements {
            node_selector: BTreeMap::new(),
            required_terms: vec![gt],
        };
        assert!(placement.fits(&node("a", 1000, 1 << 30, 10).with_label("cores", "16")));
        assert!(!placement.fits(&node("b", 1000, 1 << 30, 10).with_label("cores", "4")));
        assert!(!placement.fits(&node("c", 1000, 1 << 30, 10).with_label("cores", "many")));
    }

    #[test]
    fn match_fields_select_by_node_name() {
        let placement = PlacementRequirements {
            node_selector: BTreeMap::new(),
            required_terms: vec![NodeSelectorTerm {
                match_expressions: Vec::new(),
                match_fields: vec![requirement(NODE_NAME_FIELD, SelectorOperator::In, &["b"])],
            }],
        };
        assert!(!placement.fits(&node("a", 1000, 1 << 30, 10)));
        assert!(placement.fits(&node("b", 1000, 1 << 30, 10)));
    }

    #[test]
    fn node_selector_must_match_alongside_terms() {
        let placement = PlacementRequirements {
            node_selector: BTreeMap::from([("disk".to_string(), "ssd".to_string())]),
            required_terms: Vec::new(),
        };
        assert!(placement.is_constrained());
        assert!(!placement.fits(&zoned("a", "east")));
        assert!(placement.fits(&zoned("a", "east").with_label("disk", "ssd")));
    }

    #[test]
    fn empty_term_selects_nothing() {
        let placement = PlacementRequirements {
            node_selector: BTreeMap::new(),
            required_terms: vec![NodeSelectorTerm::default()],
        };
        assert!(!placement.fits(&zoned("a", "east")));
    }
}
