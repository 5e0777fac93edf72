//! 段文件字节缓冲
//!
//! 读端：`DataBuffer` 由堆内拷贝或只读 mmap 支撑，`Arc` 共享给并发查询，
//! `view()` 切出子区间（同一个 star_tree_index 文件里的多个索引）。
//! 写端：`MappedOutput` 新建文件并按精确字节数预分配，再通过可写 mmap 写入。

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;
use byteorder::{ByteOrder, LittleEndian};
use memmap2::{Mmap, MmapMut, MmapOptions};
use serde::{Deserialize, Serialize};
use crate::common::{OlapError, Result};

/// 索引文件的加载方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadMode {
    /// 整个文件读入堆内存
    Heap,
    /// 只读映射，访问前不产生 page-in
    #[default]
    Mmap,
}

enum Backing {
    Heap(Vec<u8>),
    Mmap(Mmap),
}

impl Backing {
    fn bytes(&self) -> &[u8] {
        match self {
            Self::Heap(v) => v,
            Self::Mmap(m) => m,
        }
    }
}

// ── DataBuffer ────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct DataBuffer {
    backing: Arc<Backing>,
    offset:  usize,
    len:     usize,
}

impl DataBuffer {
    pub fn from_vec(data: Vec<u8>) -> Self {
        let len = data.len();
        Self { backing: Arc::new(Backing::Heap(data)), offset: 0, len }
    }

    /// 整个文件读入堆
    pub fn load_file(path: &Path) -> Result<Self> {
        Ok(Self::from_vec(std::fs::read(path)?))
    }

    /// 只读映射整个文件
    pub fn map_file(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let len  = file.metadata()?.len() as usize;
        if len == 0 {
            // 长度为 0 的文件无法映射
            return Ok(Self::from_vec(Vec::new()));
        }
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        Ok(Self { backing: Arc::new(Backing::Mmap(mmap)), offset: 0, len })
    }

    pub fn open(path: &Path, mode: ReadMode) -> Result<Self> {
        match mode {
            ReadMode::Heap => Self::load_file(path),
            ReadMode::Mmap => Self::map_file(path),
        }
    }

    pub fn len(&self)      -> usize { self.len }
    pub fn is_empty(&self) -> bool  { self.len == 0 }

    pub fn is_mapped(&self) -> bool {
        matches!(*self.backing, Backing::Mmap(_))
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.backing.bytes()[self.offset..self.offset + self.len]
    }

    /// 切出 `[offset, offset + len)` 子视图，越界视为文件损坏
    pub fn view(&self, offset: usize, len: usize) -> Result<DataBuffer> {
        let end = offset.checked_add(len)
            .ok_or_else(|| OlapError::corruption("buffer view overflow"))?;
        if end > self.len {
            return Err(OlapError::corruption(format!(
                "buffer view [{offset}, {end}) out of range, buffer size {}", self.len,
            )));
        }
        Ok(Self { backing: Arc::clone(&self.backing), offset: self.offset + offset, len })
    }

    pub fn get_i32(&self, offset: usize) -> i32 {
        LittleEndian::read_i32(&self.as_slice()[offset..offset + 4])
    }

    pub fn get_i64(&self, offset: usize) -> i64 {
        LittleEndian::read_i64(&self.as_slice()[offset..offset + 8])
    }

    pub fn get_f64(&self, offset: usize) -> f64 {
        LittleEndian::read_f64(&self.as_slice()[offset..offset + 8])
    }
}

impl std::fmt::Debug for DataBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataBuffer")
            .field("mapped", &self.is_mapped())
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}

// ── MappedOutput ──────────────────────────────────────────────────────────────

/// 新建并精确定长的可写映射文件
pub struct MappedOutput {
    mmap: Option<MmapMut>,
}

impl MappedOutput {
    pub fn create(path: &Path, len: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true).write(true).create(true).truncate(true)
            .open(path)?;
        file.set_len(len as u64)?;
        if len == 0 {
            return Ok(Self { mmap: None });
        }
        let mmap = unsafe { MmapOptions::new().map_mut(&file)? };
        Ok(Self { mmap: Some(mmap) })
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match &mut self.mmap {
            Some(m) => &mut m[..],
            None    => &mut [],
        }
    }

    pub fn put_i32(&mut self, offset: usize, v: i32) {
        LittleEndian::write_i32(&mut self.as_mut_slice()[offset..offset + 4], v);
    }

    pub fn put_f64(&mut self, offset: usize, v: f64) {
        LittleEndian::write_f64(&mut self.as_mut_slice()[offset..offset + 8], v);
    }

    pub fn flush(self) -> Result<()> {
        if let Some(m) = self.mmap {
            m.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_bounds() {
        let buf = DataBuffer::from_vec((0u8..32).collect());
        let v = buf.view(8, 8).unwrap();
        assert_eq!(v.as_slice()[0], 8);
        let vv = v.view(4, 4).unwrap();
        assert_eq!(vv.as_slice(), &[12, 13, 14, 15]);
        assert!(v.view(4, 8).unwrap_err().is_corruption());
        assert!(buf.view(usize::MAX, 2).is_err());
    }

    #[test]
    fn test_mapped_round_trip() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("buf.bin");
        let mut out = MappedOutput::create(&path, 12).unwrap();
        out.put_i32(0, -1);
        out.put_f64(4, 2.5);
        out.flush().unwrap();

        for mode in [ReadMode::Heap, ReadMode::Mmap] {
            let buf = DataBuffer::open(&path, mode).unwrap();
            assert_eq!(buf.is_mapped(), mode == ReadMode::Mmap);
            assert_eq!(buf.get_i32(0), -1);
            assert_eq!(buf.get_f64(4), 2.5);
            // 小端序
            assert_eq!(&buf.as_slice()[0..4], &[0xff, 0xff, 0xff, 0xff]);
        }
    }

    #[test]
    fn test_empty_file() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        MappedOutput::create(&path, 0).unwrap().flush().unwrap();
        let buf = DataBuffer::map_file(&path).unwrap();
        assert!(buf.is_empty());
    }
}
