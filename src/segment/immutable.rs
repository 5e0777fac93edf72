//! 不可变段的加载
//!
//! 顺序：metadata.json → creation.meta CRC → 各列字典与正排 → 星型树容器。
//! 任何一步出现损坏都中止整个段的加载。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};
use crate::common::{OlapError, Result};
use crate::dictionary::Dictionary;
use crate::io::{DataBuffer, FixedBitMultiValueReader, FixedBitSingleValueReader, ReadMode};
use crate::startree::{StarTree, StarTreeIndexContainer};
use super::metadata::{verify_crc, ColumnMetadata, SegmentMetadata};
use super::{dictionary_file, forward_index_file, DataSource, ForwardIndex, IndexSegment};

#[derive(Debug)]
pub struct ImmutableSegment {
    dir:          PathBuf,
    metadata:     SegmentMetadata,
    data_sources: HashMap<String, Arc<DataSource>>,
    star_trees:   StarTreeIndexContainer,
}

impl ImmutableSegment {
    pub fn dir(&self) -> &Path { &self.dir }
    pub fn metadata(&self) -> &SegmentMetadata { &self.metadata }
    pub fn total_docs(&self) -> usize { self.metadata.total_docs }
}

impl IndexSegment for ImmutableSegment {
    fn segment_name(&self) -> &str { &self.metadata.segment_name }

    fn num_docs(&self) -> usize { self.metadata.num_docs }

    fn column_names(&self) -> Vec<String> {
        self.metadata.columns.iter().map(|c| c.name.clone()).collect()
    }

    fn data_source(&self, column: &str) -> Result<Arc<DataSource>> {
        self.data_sources.get(column).cloned()
            .ok_or_else(|| OlapError::ColumnNotFound(format!("{column} in segment {}", self.metadata.segment_name)))
    }

    fn star_trees(&self) -> &[Arc<StarTree>] { self.star_trees.star_trees() }
}

pub struct ImmutableSegmentLoader;

impl ImmutableSegmentLoader {
    pub fn load(dir: &Path, mode: ReadMode) -> Result<ImmutableSegment> {
        Self::load_inner(dir, mode).map_err(|e| {
            if e.is_corruption() {
                error!(segment = %dir.display(), error = %e, "aborting segment load");
            }
            e
        })
    }

    fn load_inner(dir: &Path, mode: ReadMode) -> Result<ImmutableSegment> {
        let metadata = SegmentMetadata::load(dir)?;
        let crc = verify_crc(dir)?;
        let data_sources = load_columns(dir, &metadata, mode)?;
        let star_trees = StarTreeIndexContainer::load(dir, &metadata, &data_sources, mode)?;
        info!(
            segment = %metadata.segment_name,
            version = %metadata.version,
            docs = metadata.num_docs,
            crc = format_args!("{crc:#010x}"),
            ?mode,
            "loaded segment",
        );
        Ok(ImmutableSegment { dir: dir.to_path_buf(), metadata, data_sources, star_trees })
    }
}

/// 打开段内所有列（行数为 `total_docs`）
pub(crate) fn load_columns(
    dir:      &Path,
    metadata: &SegmentMetadata,
    mode:     ReadMode,
) -> Result<HashMap<String, Arc<DataSource>>> {
    metadata.columns.iter()
        .map(|c| Ok((c.name.clone(), Arc::new(load_column(dir, c, metadata.total_docs, mode)?))))
        .collect()
}

fn load_column(dir: &Path, column: &ColumnMetadata, total_docs: usize, mode: ReadMode) -> Result<DataSource> {
    if !column.has_dictionary {
        return Err(OlapError::Unsupported(format!("raw column {}", column.name)));
    }
    let dict_buf = DataBuffer::load_file(&dir.join(dictionary_file(&column.name)))?;
    let dictionary = Dictionary::load(&dict_buf, column.data_type, column.cardinality)?;

    let fwd_buf = DataBuffer::open(&dir.join(forward_index_file(&column.name, column.single_value)), mode)?;
    let forward = if column.single_value {
        ForwardIndex::SingleValue(FixedBitSingleValueReader::new(fwd_buf, total_docs, column.bits_per_element)?)
    } else {
        let reader = FixedBitMultiValueReader::new(fwd_buf)?;
        reader.validate(total_docs, column.total_number_of_entries, column.bits_per_element)?;
        ForwardIndex::MultiValue(reader)
    };
    Ok(DataSource::new(&column.name, column.data_type, Some(Arc::new(dictionary)), forward))
}
