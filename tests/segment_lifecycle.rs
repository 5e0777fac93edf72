mod common;

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use olap_segment_engine::common::OlapError;
use olap_segment_engine::config::{
    QueryExecutorConfig, QuotaConfig, ReadMode, SegmentGeneratorConfig, StarTreeFormatVersion,
};
use olap_segment_engine::field_type::{DataType, FieldSpec, Schema, Value};
use olap_segment_engine::query::{
    AggregationInfo, QueryExecutor, QueryExecutorService, QueryRequest, QueryResult, TableQueryQuotaManager,
};
use olap_segment_engine::record::GenericRow;
use olap_segment_engine::segment::metadata::{compute_crc, read_creation_meta, write_creation_meta};
use olap_segment_engine::segment::{
    ImmutableSegmentLoader, IndexSegment, MutableSegment, RealtimeSegmentRecordReader, SegmentCreator,
};
use common::*;

/// 改写文件内容后重算 CRC，使损坏只能由格式校验发现
fn patch(seg_dir: &Path, file: &str, offset: u64, bytes: &[u8]) {
    let mut f = OpenOptions::new().write(true).open(seg_dir.join(file)).unwrap();
    f.seek(SeekFrom::Start(offset)).unwrap();
    f.write_all(bytes).unwrap();
    drop(f);
    reseal(seg_dir);
}

fn reseal(seg_dir: &Path) {
    let (_, created) = read_creation_meta(seg_dir).unwrap();
    write_creation_meta(seg_dir, compute_crc(seg_dir).unwrap(), created).unwrap();
}

fn star_segment(out: &Path, name: &str) -> std::path::PathBuf {
    create_segment(out, name, Some(abc_star_tree()), StarTreeFormatVersion::V2)
}

#[test]
fn test_corrupted_star_tree_aborts_load() {
    let dir = tempfile::tempdir().unwrap();

    let bad_magic = star_segment(dir.path(), "magic");
    patch(&bad_magic, "star_tree_index", 0, &[0u8; 8]);
    let err = ImmutableSegmentLoader::load(&bad_magic, ReadMode::Heap).unwrap_err();
    assert!(matches!(err, OlapError::Corruption(_)), "{err:?}");

    let bad_version = star_segment(dir.path(), "version");
    patch(&bad_version, "star_tree_index", 8, &99i32.to_le_bytes());
    let err = ImmutableSegmentLoader::load(&bad_version, ReadMode::Mmap).unwrap_err();
    assert!(matches!(err, OlapError::Corruption(_)), "{err:?}");

    let truncated = star_segment(dir.path(), "truncated");
    let fwd = truncated.join("B.sv.unsorted.fwd");
    OpenOptions::new().write(true).open(&fwd).unwrap().set_len(0).unwrap();
    reseal(&truncated);
    let err = ImmutableSegmentLoader::load(&truncated, ReadMode::Mmap).unwrap_err();
    assert!(err.is_corruption(), "{err:?}");
}

#[test]
fn test_checksum_mismatch_aborts_load() {
    let dir = tempfile::tempdir().unwrap();
    let seg_dir = star_segment(dir.path(), "crc");
    let mut f = OpenOptions::new().append(true).open(seg_dir.join("m.dict")).unwrap();
    f.write_all(b"junk").unwrap();
    drop(f);
    let err = ImmutableSegmentLoader::load(&seg_dir, ReadMode::Heap).unwrap_err();
    assert!(matches!(err, OlapError::ChecksumMismatch(_)), "{err:?}");
}

#[test]
fn test_heap_and_mmap_loads_answer_alike() {
    let dir = tempfile::tempdir().unwrap();
    let seg_dir = star_segment(dir.path(), "modes");
    let heap: Arc<dyn IndexSegment> = Arc::new(ImmutableSegmentLoader::load(&seg_dir, ReadMode::Heap).unwrap());
    let mmap: Arc<dyn IndexSegment> = Arc::new(ImmutableSegmentLoader::load(&seg_dir, ReadMode::Mmap).unwrap());
    let request = QueryRequest::aggregation("abc", vec![AggregationInfo::parse("avg", "m").unwrap()])
        .with_group_by(&["B"], 3);
    let a = executor(true).process_query(&request, &[heap]).unwrap();
    let b = executor(true).process_query(&request, &[mmap]).unwrap();
    assert_eq!(a.result, b.result);
}

#[test]
fn test_quota_rejects_over_rate() {
    let dir = tempfile::tempdir().unwrap();
    let segment = load(&create_segment(dir.path(), "seg_0", None, StarTreeFormatVersion::V2));

    let quota = Arc::new(TableQueryQuotaManager::new(1));
    quota.init_table_quota("abc_OFFLINE", &QuotaConfig::with_max_qps("1")).unwrap();
    let executor = QueryExecutor::with_service(
        QueryExecutorConfig::default(),
        Arc::new(QueryExecutorService::new(2)),
        quota.clone(),
    ).unwrap();

    let request = QueryRequest::aggregation("abc", vec![AggregationInfo::count()]);
    assert!(executor.process_query(&request, &[segment.clone()]).is_ok());
    let err = executor.process_query(&request, &[segment]).unwrap_err();
    assert!(matches!(err, OlapError::QuotaExceeded(ref t) if t == "abc"), "{err:?}");
    assert_eq!(quota.hit_count("abc_OFFLINE"), 2);
}

#[test]
fn test_realtime_segment_converts_to_immutable() {
    let schema = Schema::new("clicks", vec![
        FieldSpec::dimension("country", DataType::String, true),
        FieldSpec::dimension("tags", DataType::String, false),
        FieldSpec::metric("clicks", DataType::Long),
    ]);
    let mutable = MutableSegment::with_chunk_size("clicks_rt", schema.clone(), 4);
    let countries = ["us", "cn", "de", "us", "fr", "cn", "us"];
    for (i, c) in countries.iter().enumerate() {
        let row = GenericRow::from_pairs([
            ("country", Value::from(*c)),
            ("tags", Value::List(vec![Value::from("t"), Value::from(format!("x{i}"))])),
            ("clicks", Value::Long(i as i64 + 1)),
        ]);
        let doc = mutable.index(&row).unwrap();
        let mut back = GenericRow::new();
        mutable.get_record(doc, &mut back).unwrap();
        assert_eq!(back.get_value("country"), Some(&Value::from(*c)));
    }
    assert_eq!(mutable.num_docs(), countries.len());

    let dir = tempfile::tempdir().unwrap();
    let mut reader = RealtimeSegmentRecordReader::new(&mutable, Some("country")).unwrap();
    let seg_dir = SegmentCreator::new(SegmentGeneratorConfig::new("clicks", "clicks_0", dir.path()), schema)
        .unwrap()
        .create(&mut reader)
        .unwrap();
    let segment: Arc<dyn IndexSegment> = Arc::new(ImmutableSegmentLoader::load(&seg_dir, ReadMode::Mmap).unwrap());
    assert_eq!(segment.num_docs(), 7);

    // 按 country 排序输出
    let country = segment.data_source("country").unwrap();
    let values: Vec<Value> = (0..7).map(|d| country.value(d, None)).collect();
    let mut sorted = values.clone();
    sorted.sort_by(|a, b| a.compare(b));
    assert_eq!(values, sorted);

    let request = QueryRequest::aggregation("clicks", vec![AggregationInfo::parse("sum", "clicks").unwrap()])
        .with_group_by(&["country"], 1);
    let response = executor(false).process_query(&request, &[segment]).unwrap();
    let QueryResult::GroupBy(results) = response.result else { panic!("expected group-by") };
    // us: 1 + 4 + 7
    assert_eq!(results[0].groups, vec![(vec![Value::from("us")], 12.0)]);
}
