//! 列存底层 I/O
//!
//! ```text
//! DataBuffer (heap / mmap, 只读共享)
//!   ├─ bitset           MSB-first 定宽位打包原语
//!   ├─ single_value     单值正排：doc_id → dict_id
//!   ├─ multi_value      多值正排：header + offsets + lengths + values
//!   ├─ fixed_byte       定长 f64 列（星型树 metric）
//!   └─ multi_column     实时段使用的多列定长读写器（原子单元格）
//! ```

pub mod buffer;
pub mod bitset;
pub mod single_value;
pub mod multi_value;
pub mod fixed_byte;
pub mod multi_column;

pub use buffer::{DataBuffer, MappedOutput, ReadMode};
pub use single_value::{FixedBitSingleValueReader, FixedBitSingleValueWriter, SingleValueReaderContext};
pub use multi_value::{FixedBitMultiValueReader, FixedBitMultiValueWriter, MultiValueReaderContext};
pub use fixed_byte::{FixedByteDoubleReader, FixedByteDoubleWriter};
pub use multi_column::FixedByteSingleValueMultiColumnReaderWriter;
