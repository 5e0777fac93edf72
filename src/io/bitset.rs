//! 定宽位打包（无符号，MSB-first）
//!
//! 第 `i` 个值占据比特区间 `[i * num_bits, (i + 1) * num_bits)`，
//! 比特在字节内从最高位开始编号。`num_bits` 取值 1..=32，
//! 单个值最多跨 5 个字节，用 u64 窗口一次取出。

/// 表示 `max_value` 所需的最少比特数（至少 1）
///
/// 字典列传入 `cardinality - 1`，即 `ceil(log2(cardinality))`。
pub fn num_bits_per_value(max_value: u32) -> u32 {
    (32 - max_value.leading_zeros()).max(1)
}

/// `num_values` 个 `num_bits` 宽的值打包后的字节数
pub fn packed_size(num_values: usize, num_bits: u32) -> usize {
    (num_values * num_bits as usize + 7) / 8
}

#[inline]
fn window_bounds(index: usize, num_bits: u32) -> (usize, usize, u32) {
    let bit_offset  = index * num_bits as usize;
    let byte_offset = bit_offset >> 3;
    let bit_in_byte = (bit_offset & 7) as u32;
    let num_bytes   = ((bit_in_byte + num_bits + 7) >> 3) as usize;
    let shift       = num_bytes as u32 * 8 - bit_in_byte - num_bits;
    (byte_offset, num_bytes, shift)
}

#[inline]
fn mask(num_bits: u32) -> u64 {
    (1u64 << num_bits) - 1
}

/// 读取第 `index` 个值
#[inline]
pub fn read_int(data: &[u8], index: usize, num_bits: u32) -> u32 {
    let (byte_offset, num_bytes, shift) = window_bounds(index, num_bits);
    let mut window = 0u64;
    for &b in &data[byte_offset..byte_offset + num_bytes] {
        window = (window << 8) | b as u64;
    }
    ((window >> shift) & mask(num_bits)) as u32
}

/// 从 `start_index` 开始顺序读取 `out.len()` 个值
pub fn read_ints(data: &[u8], start_index: usize, num_bits: u32, out: &mut [u32]) {
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = read_int(data, start_index + i, num_bits);
    }
}

/// 写入第 `index` 个值；高于 `num_bits` 的比特被截掉
#[inline]
pub fn write_int(data: &mut [u8], index: usize, num_bits: u32, value: u32) {
    let (byte_offset, num_bytes, shift) = window_bounds(index, num_bits);
    let bytes = &mut data[byte_offset..byte_offset + num_bytes];
    let mut window = 0u64;
    for &b in bytes.iter() {
        window = (window << 8) | b as u64;
    }
    let m  = mask(num_bits) << shift;
    window = (window & !m) | (((value as u64) << shift) & m);
    for (i, b) in bytes.iter_mut().enumerate() {
        *b = (window >> ((num_bytes - 1 - i) * 8)) as u8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_num_bits() {
        assert_eq!(num_bits_per_value(0), 1);
        assert_eq!(num_bits_per_value(1), 1);
        assert_eq!(num_bits_per_value(2), 2);
        assert_eq!(num_bits_per_value(3), 2);
        assert_eq!(num_bits_per_value(4), 3);
        assert_eq!(num_bits_per_value(255), 8);
        assert_eq!(num_bits_per_value(256), 9);
        assert_eq!(num_bits_per_value(u32::MAX), 32);
    }

    #[test]
    fn test_msb_first_layout() {
        // 3 个 3-bit 值：101 011 111 → 1010_1111 1xxx_xxxx
        let mut data = vec![0u8; packed_size(3, 3)];
        write_int(&mut data, 0, 3, 0b101);
        write_int(&mut data, 1, 3, 0b011);
        write_int(&mut data, 2, 3, 0b111);
        assert_eq!(data, vec![0b1010_1111, 0b1000_0000]);
        assert_eq!(read_int(&data, 1, 3), 0b011);
    }

    #[test]
    fn test_overwrite_keeps_neighbours() {
        let mut data = vec![0u8; packed_size(4, 7)];
        for i in 0..4 { write_int(&mut data, i, 7, 0x7f); }
        write_int(&mut data, 2, 7, 0);
        let mut out = [0u32; 4];
        read_ints(&data, 0, 7, &mut out);
        assert_eq!(out, [0x7f, 0x7f, 0, 0x7f]);
    }

    proptest! {
        #[test]
        fn prop_round_trip(num_bits in 1u32..=32, seeds in proptest::collection::vec(any::<u32>(), 1..200)) {
            let values: Vec<u32> = seeds.iter()
                .map(|v| if num_bits == 32 { *v } else { v & ((1u32 << num_bits) - 1) })
                .collect();
            let mut data = vec![0u8; packed_size(values.len(), num_bits)];
            for (i, v) in values.iter().enumerate() {
                write_int(&mut data, i, num_bits, *v);
            }
            for (i, v) in values.iter().enumerate() {
                prop_assert_eq!(read_int(&data, i, num_bits), *v);
            }
        }
    }
}
