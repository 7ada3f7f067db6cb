use std::collections::hash_map::DefaultHasher;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};

use sysproc_common::{PartitionId, Result, SysprocError, Value};

/// Maps partitioning-column values to partitions and back.
pub trait PartitionRouter: Send + Sync + Debug {
    fn partition_count(&self) -> u32;

    fn partition_for(&self, key: &Value) -> Result<PartitionId>;

    /// A BIGINT key that hashes to `partition`.
    fn routing_key_for(&self, partition: PartitionId) -> Result<Value>;
}

const ROUTING_KEY_SEARCH_LIMIT: i64 = 1_000_000;

/// Hash-modulo router over a fixed partition count.
#[derive(Debug, Clone)]
pub struct ModuloHashinator {
    partitions: u32,
    routing_keys: Vec<i64>,
}

impl ModuloHashinator {
    pub fn new(partitions: u32) -> Result<Self> {
        if partitions == 0 {
            return Err(SysprocError::InvalidConfig(
                "hashinator needs at least one partition".to_string(),
            ));
        }
        let mut routing_keys = vec![None; partitions as usize];
        let mut missing = partitions as usize;
        let mut k = 0i64;
        while missing > 0 && k < ROUTING_KEY_SEARCH_LIMIT {
            let p = hash_bucket(&Value::BigInt(k), partitions) as usize;
            if routing_keys[p].is_none() {
                routing_keys[p] = Some(k);
                missing -= 1;
            }
            k += 1;
        }
        let routing_keys = routing_keys
            .into_iter()
            .enumerate()
            .map(|(p, k)| {
                k.ok_or_else(|| {
                    SysprocError::InvalidConfig(format!("no routing key hashes to partition {p}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            partitions,
            routing_keys,
        })
    }
}

fn hash_bucket(key: &Value, partitions: u32) -> u32 {
    let mut h = DefaultHasher::new();
    match key {
        Value::Null => 0u8.hash(&mut h),
        Value::Boolean(b) => b.hash(&mut h),
        Value::BigInt(v) => v.hash(&mut h),
        Value::Float(f) => f.to_bits().hash(&mut h),
        Value::Varchar(s) => s.hash(&mut h),
        Value::Bytes(b) => b.hash(&mut h),
    }
    (h.finish() % partitions as u64) as u32
}

impl PartitionRouter for ModuloHashinator {
    fn partition_count(&self) -> u32 {
        self.partitions
    }

    fn partition_for(&self, key: &Value) -> Result<PartitionId> {
        if matches!(key, Value::Null) {
            return Err(SysprocError::Validation(
                "cannot route a NULL partition key".to_string(),
            ));
        }
        Ok(PartitionId(hash_bucket(key, self.partitions)))
    }

    fn routing_key_for(&self, partition: PartitionId) -> Result<Value> {
        self.routing_keys
            .get(partition.0 as usize)
            .map(|k| Value::BigInt(*k))
            .ok_or_else(|| SysprocError::Validation(format!("unknown partition {partition}")))
    }
}
