use std::time::Duration;

use bytes::Bytes;
use rand::Rng;

use crate::config::Config;
use crate::errors::FaasrError;
use crate::object_store::ObjectStoreClient;
use crate::payload::DataStore;

/// Random flag/lock values are chosen in `0..=2^31-1`, per SPEC_FULL.md
/// section 4.3's "random 31-bit integer".
const RAND_MAX_INCLUSIVE: u32 = (1u32 << 31) - 1;

/// A weak mutual-exclusion lock built entirely out of S3 put/list/delete
/// semantics: "Read-and-Set-Memory" (RSM). There is no server-side
/// compare-and-swap, so two objects stand in for one: a per-attempt
/// *flag*, whose mere presence under a shared prefix signals contention,
/// and a *lock* object that the single surviving attempt claims. Mirrors
/// `faasr_acquire_lock.py`'s RSM loop, including the random 31-bit
/// tie-breaking value written as both the flag's key suffix and the
/// lock's body.
pub struct LockService<'a> {
    store_client: &'a ObjectStoreClient,
    config: &'a Config,
}

pub struct LockGuard<'a> {
    store_client: &'a ObjectStoreClient,
    store_name: String,
    store: DataStore,
    lock_key: String,
}

impl<'a> LockService<'a> {
    pub fn new(store_client: &'a ObjectStoreClient, config: &'a Config) -> Self {
        Self {
            store_client,
            config,
        }
    }

    /// Acquires the lock rooted at `lock_root` (conventionally
    /// `<FaaSrLog>/<InvocationID>/<FunctionInvoke>`). Repeats the RSM
    /// protocol until success or `lock_max_attempts` is exhausted:
    ///
    /// 1. PUT our own flag, keyed by a fresh random 31-bit integer.
    /// 2. LIST the flag prefix. Any flag other than our own means
    ///    contention: delete our flag and back off.
    /// 3. Otherwise check whether the lock object already exists. If
    ///    not, PUT it (body = our random integer), delete our flag, and
    ///    return the held guard.
    /// 4. If the lock exists, we lost the race to whoever holds it:
    ///    delete our flag and back off.
    pub async fn acquire(
        &self,
        store_name: &str,
        store: &DataStore,
        lock_root: &str,
    ) -> anyhow::Result<LockGuard<'a>> {
        let flag_prefix = format!("{lock_root}/flag/");
        let lock_key = format!("{lock_root}./lock");
        let max_backoff = self.config.lock_initial_backoff() * 2u32.pow(self.config.lock_max_backoff_exp);

        for attempt in 0..self.config.lock_max_attempts {
            let my_int: u32 = rand::rng().random_range(0..=RAND_MAX_INCLUSIVE);
            let my_flag = format!("{flag_prefix}{my_int}");

            self.store_client.put(store_name, store, &my_flag, Bytes::new()).await?;

            let flags = self.store_client.list(store_name, store, &flag_prefix).await?;
            let contended = flags.iter().any(|key| key != &my_flag);
            if contended {
                self.store_client.delete(store_name, store, &my_flag).await?;
                self.back_off(attempt, max_backoff).await;
                continue;
            }

            if self.store_client.exists(store_name, store, &lock_key).await? {
                self.store_client.delete(store_name, store, &my_flag).await?;
                self.back_off(attempt, max_backoff).await;
                continue;
            }

            self.store_client
                .put(store_name, store, &lock_key, Bytes::from(my_int.to_string()))
                .await?;
            self.store_client.delete(store_name, store, &my_flag).await?;

            return Ok(LockGuard {
                store_client: self.store_client,
                store_name: store_name.to_string(),
                store: store.clone(),
                lock_key,
            });
        }

        Err(FaasrError::lock_timeout(format!(
            "could not acquire lock {lock_root} after {} attempts",
            self.config.lock_max_attempts
        ))
        .into())
    }

    async fn back_off(&self, attempt: u32, max_backoff: Duration) {
        let backoff = self.config.lock_initial_backoff() * 2u32.pow(attempt.min(self.config.lock_max_backoff_exp));
        tokio::time::sleep(backoff.min(max_backoff)).await;
    }
}

impl<'a> LockGuard<'a> {
    /// Deletes the lock object unconditionally. There is no ownership
    /// token to check — by construction only one guard is ever handed
    /// out for a given `lock_root` at a time.
    pub async fn release(self) -> anyhow::Result<()> {
        self.store_client
            .delete(&self.store_name, &self.store, &self.lock_key)
            .await
    }
}

/// Standalone helper so call sites can compute a delay without holding a
/// `LockService`, used by tests asserting the back-off schedule.
pub fn backoff_schedule(initial: Duration, max_exp: u32, attempts: u32) -> Vec<Duration> {
    (0..attempts)
        .map(|attempt| initial * 2u32.pow(attempt.min(max_exp)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        let schedule = backoff_schedule(Duration::from_secs(1), 4, 6);
        assert_eq!(
            schedule,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(16),
                Duration::from_secs(16),
            ]
        );
    }

    #[test]
    fn random_int_stays_within_31_bits() {
        for _ in 0..1000 {
            let n: u32 = rand::rng().random_range(0..=RAND_MAX_INCLUSIVE);
            assert!(n <= RAND_MAX_INCLUSIVE);
        }
    }
}
