//! DocIdSet 与 Projection 算子
//!
//! `DocIdSetOperator` 第一次拉取时求过滤位图，之后每批最多吐出
//! `max_doc_per_call` 个 doc id。`ProjectionOperator` 只把列名绑定到数据源，
//! 真正读值发生在上层算子拉取之后。

use std::collections::HashMap;
use std::sync::Arc;
use roaring::bitmap::IntoIter;
use crate::common::{DocId, OlapError, Result};
use crate::segment::DataSource;
use super::filter::FilterOperator;

pub struct DocIdSetOperator {
    filter:           FilterOperator,
    max_doc_per_call: usize,
    docs:             Option<IntoIter>,
}

impl DocIdSetOperator {
    pub fn new(filter: FilterOperator, max_doc_per_call: usize) -> Self {
        Self { filter, max_doc_per_call, docs: None }
    }

    pub fn next_block(&mut self) -> Result<Option<Vec<DocId>>> {
        if self.docs.is_none() {
            self.docs = Some(self.filter.get_bitmap()?.into_iter());
        }
        let Some(docs) = self.docs.as_mut() else { return Ok(None) };
        let block: Vec<DocId> = docs.by_ref().take(self.max_doc_per_call).collect();
        Ok((!block.is_empty()).then_some(block))
    }
}

pub struct ProjectionOperator {
    doc_id_set:       DocIdSetOperator,
    data_sources:     HashMap<String, Arc<DataSource>>,
    num_docs_scanned: u64,
}

impl ProjectionOperator {
    pub fn new(doc_id_set: DocIdSetOperator, data_sources: HashMap<String, Arc<DataSource>>) -> Self {
        Self { doc_id_set, data_sources, num_docs_scanned: 0 }
    }

    pub fn next_block(&mut self) -> Result<Option<Vec<DocId>>> {
        let block = self.doc_id_set.next_block()?;
        if let Some(b) = &block {
            self.num_docs_scanned += b.len() as u64;
        }
        Ok(block)
    }

    pub fn data_source(&self, column: &str) -> Result<&Arc<DataSource>> {
        self.data_sources.get(column)
            .ok_or_else(|| OlapError::ColumnNotFound(column.to_string()))
    }

    pub fn num_docs_scanned(&self) -> u64 { self.num_docs_scanned }
}
