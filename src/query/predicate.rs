//! 谓词求值：把谓词解析成匹配的 dict_id 集合
//!
//! 字典有序，EQ / IN 是查找，RANGE 是一段连续区间，NOT_EQ / NOT_IN 取补集。
//! 多值列只要有一个值匹配整行即匹配。

use roaring::RoaringBitmap;
use crate::common::{DictId, Result};
use crate::dictionary::Dictionary;
use crate::field_type::Value;
use super::request::Predicate;

#[derive(Debug, Clone)]
pub struct PredicateEvaluator {
    matching:    RoaringBitmap,
    cardinality: usize,
}

impl PredicateEvaluator {
    pub fn new(predicate: &Predicate, dictionary: &Dictionary) -> Result<Self> {
        let cardinality = dictionary.cardinality();
        let lookup = |values: &[Value]| -> RoaringBitmap {
            values.iter().filter_map(|v| dictionary.index_of(v)).map(|id| id as u32).collect()
        };
        let matching = match predicate {
            Predicate::Eq(v)     => lookup(std::slice::from_ref(v)),
            Predicate::In(vs)    => lookup(vs),
            Predicate::NotEq(v)  => complement(lookup(std::slice::from_ref(v)), cardinality),
            Predicate::NotIn(vs) => complement(lookup(vs), cardinality),
            Predicate::Range { lower, upper } => {
                let range = dictionary.dict_id_range(
                    lower.as_ref().map(|(v, inc)| (v, *inc)),
                    upper.as_ref().map(|(v, inc)| (v, *inc)),
                )?;
                let mut bitmap = RoaringBitmap::new();
                bitmap.insert_range(range.start as u32..range.end as u32);
                bitmap
            }
        };
        Ok(Self { matching, cardinality })
    }

    pub fn is_always_false(&self) -> bool { self.matching.is_empty() }

    pub fn is_always_true(&self) -> bool {
        self.cardinality > 0 && self.matching.len() == self.cardinality as u64
    }

    #[inline]
    pub fn apply_sv(&self, dict_id: DictId) -> bool {
        self.matching.contains(dict_id as u32)
    }

    #[inline]
    pub fn apply_mv(&self, dict_ids: &[DictId]) -> bool {
        dict_ids.iter().any(|id| self.apply_sv(*id))
    }

    /// 升序的匹配 dict_id
    pub fn matching_dict_ids(&self) -> Vec<DictId> {
        self.matching.iter().map(|id| id as DictId).collect()
    }
}

fn complement(excluded: RoaringBitmap, cardinality: usize) -> RoaringBitmap {
    let mut all = RoaringBitmap::new();
    all.insert_range(0..cardinality as u32);
    all - excluded
}
