//! 摄入记录与记录读取器
//!
//! `RecordReader` 是段生成的输入接口；读取器按格式名注册，
//! 通过 `create_record_reader("json", ..)` 创建。

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use once_cell::sync::Lazy;
use crate::common::{OlapError, Result};
use crate::field_type::{Schema, Value};

// ── GenericRow ────────────────────────────────────────────────────────────────

/// 一行记录：列名 → 值
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenericRow {
    fields: HashMap<String, Value>,
}

impl GenericRow {
    pub fn new() -> Self { Self::default() }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, Value)>) -> Self {
        Self { fields: pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect() }
    }

    pub fn get_value(&self, column: &str) -> Option<&Value> { self.fields.get(column) }

    pub fn put_value(&mut self, column: &str, value: Value) {
        self.fields.insert(column.to_string(), value);
    }

    pub fn remove_value(&mut self, column: &str) -> Option<Value> { self.fields.remove(column) }

    pub fn is_null_value(&self, column: &str) -> bool {
        self.fields.get(column).map_or(true, Value::is_null)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> { self.fields.keys().map(String::as_str) }

    pub fn clear(&mut self) { self.fields.clear(); }
}

// ── RecordReader ──────────────────────────────────────────────────────────────

pub trait RecordReader: Send {
    fn has_next(&self) -> bool;
    /// 读取下一行到 `reuse`（先清空）
    fn next(&mut self, reuse: &mut GenericRow) -> Result<()>;
    /// 回到第一行（段生成需要两遍扫描）
    fn rewind(&mut self) -> Result<()>;
    fn schema(&self) -> &Schema;
}

/// 内存中的行集合
pub struct GenericRowRecordReader {
    rows:   Vec<GenericRow>,
    schema: Schema,
    pos:    usize,
}

impl GenericRowRecordReader {
    pub fn new(rows: Vec<GenericRow>, schema: Schema) -> Self {
        Self { rows, schema, pos: 0 }
    }
}

impl RecordReader for GenericRowRecordReader {
    fn has_next(&self) -> bool { self.pos < self.rows.len() }

    fn next(&mut self, reuse: &mut GenericRow) -> Result<()> {
        let row = self.rows.get(self.pos)
            .ok_or_else(|| OlapError::Internal("record reader exhausted".into()))?;
        reuse.clone_from(row);
        self.pos += 1;
        Ok(())
    }

    fn rewind(&mut self) -> Result<()> {
        self.pos = 0;
        Ok(())
    }

    fn schema(&self) -> &Schema { &self.schema }
}

/// JSON lines：每行一个对象；schema 中缺失的列读成 Null
pub struct JsonRecordReader {
    path:      PathBuf,
    schema:    Schema,
    lines:     std::io::Lines<BufReader<File>>,
    next_line: Option<String>,
}

impl JsonRecordReader {
    pub fn open(path: &Path, schema: Schema) -> Result<Self> {
        let lines = BufReader::new(File::open(path)?).lines();
        let mut reader = Self { path: path.to_path_buf(), schema, lines, next_line: None };
        reader.advance()?;
        Ok(reader)
    }

    fn advance(&mut self) -> Result<()> {
        self.next_line = None;
        for line in self.lines.by_ref() {
            let line = line?;
            if !line.trim().is_empty() {
                self.next_line = Some(line);
                break;
            }
        }
        Ok(())
    }
}

impl RecordReader for JsonRecordReader {
    fn has_next(&self) -> bool { self.next_line.is_some() }

    fn next(&mut self, reuse: &mut GenericRow) -> Result<()> {
        let line = self.next_line.take()
            .ok_or_else(|| OlapError::Internal("record reader exhausted".into()))?;
        let json: serde_json::Value = serde_json::from_str(&line)
            .map_err(|e| OlapError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        reuse.clear();
        for field in &self.schema.field_specs {
            let value = json.get(&field.name).map_or(Value::Null, Value::from_json);
            reuse.put_value(&field.name, value);
        }
        self.advance()
    }

    fn rewind(&mut self) -> Result<()> {
        self.lines = BufReader::new(File::open(&self.path)?).lines();
        self.advance()
    }

    fn schema(&self) -> &Schema { &self.schema }
}

// ── 注册表 ────────────────────────────────────────────────────────────────────

type RecordReaderFactory = fn(&Path, Schema) -> Result<Box<dyn RecordReader>>;

static RECORD_READERS: Lazy<HashMap<&'static str, RecordReaderFactory>> = Lazy::new(|| {
    let mut m: HashMap<&'static str, RecordReaderFactory> = HashMap::new();
    m.insert("json", open_json);
    m
});

fn open_json(path: &Path, schema: Schema) -> Result<Box<dyn RecordReader>> {
    Ok(Box::new(JsonRecordReader::open(path, schema)?))
}

pub fn create_record_reader(format: &str, path: &Path, schema: Schema) -> Result<Box<dyn RecordReader>> {
    let factory = RECORD_READERS.get(format.to_ascii_lowercase().as_str())
        .ok_or_else(|| OlapError::Config(format!("unsupported record format: {format}")))?;
    factory(path, schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_type::{DataType, FieldSpec};

    fn schema() -> Schema {
        Schema::new("t", vec![
            FieldSpec::dimension("country", DataType::String, true),
            FieldSpec::metric("clicks", DataType::Long),
        ])
    }

    #[test]
    fn test_generic_row_reader_rewind() {
        let rows = vec![
            GenericRow::from_pairs([("country", Value::String("us".into()))]),
            GenericRow::from_pairs([("country", Value::String("cn".into()))]),
        ];
        let mut reader = GenericRowRecordReader::new(rows, schema());
        let mut row = GenericRow::new();
        let mut seen = 0;
        while reader.has_next() {
            reader.next(&mut row).unwrap();
            seen += 1;
        }
        assert_eq!(seen, 2);
        assert!(reader.next(&mut row).is_err());
        reader.rewind().unwrap();
        reader.next(&mut row).unwrap();
        assert_eq!(row.get_value("country"), Some(&Value::String("us".into())));
    }

    #[test]
    fn test_json_reader_via_registry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(&path, "{\"country\":\"us\",\"clicks\":3}\n\n{\"country\":\"de\"}\n").unwrap();

        let mut reader = create_record_reader("JSON", &path, schema()).unwrap();
        let mut row = GenericRow::new();
        reader.next(&mut row).unwrap();
        assert_eq!(row.get_value("clicks"), Some(&Value::Long(3)));
        reader.next(&mut row).unwrap();
        assert!(row.is_null_value("clicks"));
        assert!(!reader.has_next());
        reader.rewind().unwrap();
        assert!(reader.has_next());

        assert!(create_record_reader("avro", &path, schema()).is_err());
    }
}
