//! 过滤算子：过滤树 → 匹配的 doc id 位图

use std::sync::Arc;
use roaring::RoaringBitmap;
use crate::common::{DocId, OlapError, Result};
use crate::query::predicate::PredicateEvaluator;
use crate::query::request::FilterNode;
use crate::segment::{DataSource, ForwardIndex, IndexSegment};
use crate::startree::StarTreeFilterOperator;

pub enum FilterOperator {
    MatchAll { num_docs: usize },
    Empty,
    Predicate {
        source:    Arc<DataSource>,
        evaluator: PredicateEvaluator,
        num_docs:  usize,
    },
    And(Vec<FilterOperator>),
    Or(Vec<FilterOperator>),
    StarTree(StarTreeFilterOperator),
}

impl FilterOperator {
    pub fn build(filter: Option<&FilterNode>, segment: &dyn IndexSegment) -> Result<Self> {
        let num_docs = segment.num_docs();
        match filter {
            None => Ok(Self::MatchAll { num_docs }),
            Some(node) => Self::build_node(node, segment, num_docs),
        }
    }

    fn build_node(node: &FilterNode, segment: &dyn IndexSegment, num_docs: usize) -> Result<Self> {
        match node {
            FilterNode::And(children) => {
                let mut ops = Vec::with_capacity(children.len());
                for child in children {
                    match Self::build_node(child, segment, num_docs)? {
                        Self::Empty => return Ok(Self::Empty),
                        Self::MatchAll { .. } => {}
                        op => ops.push(op),
                    }
                }
                Ok(match ops.len() {
                    0 => Self::MatchAll { num_docs },
                    1 => ops.remove(0),
                    _ => Self::And(ops),
                })
            }
            FilterNode::Or(children) => {
                let mut ops = Vec::with_capacity(children.len());
                for child in children {
                    match Self::build_node(child, segment, num_docs)? {
                        Self::MatchAll { .. } => return Ok(Self::MatchAll { num_docs }),
                        Self::Empty => {}
                        op => ops.push(op),
                    }
                }
                Ok(match ops.len() {
                    0 => Self::Empty,
                    1 => ops.remove(0),
                    _ => Self::Or(ops),
                })
            }
            FilterNode::Predicate { column, predicate } => {
                let source = segment.data_source(column)?;
                let dictionary = source.dictionary()
                    .ok_or_else(|| OlapError::bad_query(format!("cannot filter on raw column {column}")))?;
                let evaluator = PredicateEvaluator::new(predicate, dictionary)?;
                if evaluator.is_always_false() {
                    return Ok(Self::Empty);
                }
                if evaluator.is_always_true() && source.is_single_value() {
                    return Ok(Self::MatchAll { num_docs });
                }
                Ok(Self::Predicate { source, evaluator, num_docs })
            }
        }
    }

    pub fn get_bitmap(&self) -> Result<RoaringBitmap> {
        match self {
            Self::MatchAll { num_docs } => {
                let mut all = RoaringBitmap::new();
                all.insert_range(0..*num_docs as u32);
                Ok(all)
            }
            Self::Empty => Ok(RoaringBitmap::new()),
            Self::Predicate { source, evaluator, num_docs } => scan(source, evaluator, *num_docs),
            Self::And(ops) => {
                let mut iter = ops.iter();
                let mut acc = match iter.next() {
                    Some(op) => op.get_bitmap()?,
                    None => return Ok(RoaringBitmap::new()),
                };
                for op in iter {
                    if acc.is_empty() {
                        break;
                    }
                    acc &= op.get_bitmap()?;
                }
                Ok(acc)
            }
            Self::Or(ops) => {
                let mut acc = RoaringBitmap::new();
                for op in ops {
                    acc |= op.get_bitmap()?;
                }
                Ok(acc)
            }
            Self::StarTree(op) => op.get_bitmap(),
        }
    }
}

fn scan(source: &DataSource, evaluator: &PredicateEvaluator, num_docs: usize) -> Result<RoaringBitmap> {
    let mut matched = RoaringBitmap::new();
    match source.forward() {
        ForwardIndex::SingleValue(r) => {
            for doc in 0..num_docs as DocId {
                if evaluator.apply_sv(r.get_int(doc)) {
                    matched.insert(doc);
                }
            }
        }
        ForwardIndex::MultiValue(r) => {
            let mut ctx = r.create_context();
            for doc in 0..num_docs as DocId {
                if evaluator.apply_mv(r.get_int_array_with_context(doc, &mut ctx)) {
                    matched.insert(doc);
                }
            }
        }
        ForwardIndex::RawDouble(_) => {
            return Err(OlapError::bad_query(format!("cannot filter on raw column {}", source.column())));
        }
    }
    Ok(matched)
}
