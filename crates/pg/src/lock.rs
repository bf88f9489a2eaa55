//! Transaction-scoped advisory locks.

use tracing::{debug, instrument};

use crate::db::Db;
use crate::tx::Tx;
use crate::{PgError, Value};

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a.
pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Map a string key to the `int4` the advisory lock functions take.
pub fn lock_key(key: &str) -> i32 {
    fnv1a_32(key.as_bytes()) as i32
}

impl Db {
    /// Take `pg_advisory_xact_lock` on the pair `(key1, key2)`.
    ///
    /// The lock runs in a transaction ensured from `tx`, which is then
    /// committed. When `tx` is empty that commit is real, so the lock is
    /// released as soon as this returns and only serializes the acquisition
    /// itself. When `tx` already holds a transaction the commit is a no-op
    /// and the lock is held until the owner finalizes.
    #[instrument(skip(self, tx))]
    pub async fn lock(&self, tx: &Tx, key1: &str, key2: &str) -> Result<(), PgError> {
        let locked = self.ensure_tx(tx).await?;
        match self.acquire(&locked, key1, key2).await {
            Ok(()) => locked.commit().await,
            Err(err) => {
                locked.rollback_deferred().await;
                Err(err)
            }
        }
    }

    async fn acquire(&self, tx: &Tx, key1: &str, key2: &str) -> Result<(), PgError> {
        let client = self.client(tx);
        if self.environment().is_test() {
            client
                .batch_execute("SET LOCAL deadlock_timeout = '3s'")
                .await?;
        }

        let (k1, k2) = (lock_key(key1), lock_key(key2));
        debug!(k1, k2, "acquiring advisory lock");
        client
            .execute(
                "SELECT pg_advisory_xact_lock($1, $2)",
                &[Value::Int(k1), Value::Int(k2)],
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_matches_reference_vectors() {
        assert_eq!(fnv1a_32(b""), 0x811c_9dc5);
        assert_eq!(fnv1a_32(b"a"), 0xe40c_292c);
        assert_eq!(fnv1a_32(b"foobar"), 0xbf9c_f968);
    }

    #[test]
    fn keys_are_reinterpreted_as_signed() {
        // 0xe40c292c has the high bit set.
        assert!(lock_key("a") < 0);
        assert_eq!(lock_key("a"), 0xe40c_292c_u32 as i32);
        assert_ne!(lock_key("A"), lock_key("B"));
    }
}
