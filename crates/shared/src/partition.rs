//! 分区键路由
//!
//! 生产者以 `partitioner=murmur2_random` 运行，与 Java 客户端的默认分区器一致。
//! 这里实现同一个 murmur2 哈希，使"同一订单号总是落在同一分区"可以在
//! 不连接 broker 的情况下被验证。

const SEED: u32 = 0x9747_b28c;
const M: u32 = 0x5bd1_e995;
const R: u32 = 24;

/// Kafka 使用的 32 位 murmur2 哈希
pub fn murmur2(data: &[u8]) -> i32 {
    let length = data.len();
    let mut h: u32 = SEED ^ (length as u32);

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h = h.wrapping_mul(M);
        h ^= k;
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        if tail.len() >= 3 {
            h ^= u32::from(tail[2]) << 16;
        }
        if tail.len() >= 2 {
            h ^= u32::from(tail[1]) << 8;
        }
        h ^= u32::from(tail[0]);
        h = h.wrapping_mul(M);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^= h >> 15;

    h as i32
}

/// 清除符号位，与 Java 客户端的 `toPositive` 一致（不是取绝对值）
fn to_positive(n: i32) -> i32 {
    n & 0x7fff_ffff
}

/// 计算 key 所属的分区
///
/// 分区数为 0 时按 1 处理。
pub fn partition_for(key: &[u8], partition_count: u32) -> i32 {
    let count = partition_count.max(1) as i32;
    to_positive(murmur2(key)) % count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_murmur2_matches_java_client() {
        assert_eq!(murmur2(b"21"), -973_932_308);
        assert_eq!(murmur2(b"foobar"), -790_332_482);
        assert_eq!(murmur2(b"abc"), 479_470_107);
        assert_eq!(murmur2(b"a-little-bit-long-string"), -985_981_536);
        assert_eq!(murmur2(b"a-little-bit-longer-string"), -1_486_304_829);
    }

    #[test]
    fn test_to_positive_masks_sign_bit() {
        assert_eq!(to_positive(-1), 0x7fff_ffff);
        assert_eq!(to_positive(i32::MIN), 0);
        assert_eq!(to_positive(42), 42);
    }

    #[test]
    fn test_same_key_same_partition() {
        for count in [1_u32, 3, 6, 12] {
            let first = partition_for(b"ORD-1a2b3c4d", count);
            for _ in 0..10 {
                assert_eq!(partition_for(b"ORD-1a2b3c4d", count), first);
            }
            assert!((0..count as i32).contains(&first));
        }
    }

    #[test]
    fn test_keys_spread_across_partitions() {
        let mut seen = std::collections::HashSet::new();
        for i in 0..200 {
            let key = format!("ORD-{i:08}");
            seen.insert(partition_for(key.as_bytes(), 6));
        }
        assert_eq!(seen.len(), 6);
    }

    #[test]
    fn test_zero_partition_count_falls_back_to_one() {
        assert_eq!(partition_for(b"ORD-1", 0), 0);
    }
}
