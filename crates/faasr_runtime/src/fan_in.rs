use bytes::Bytes;
use rand::Rng;

use crate::errors::FaasrError;
use crate::graph::Graph;
use crate::lock::LockService;
use crate::object_store::ObjectStoreClient;
use crate::parsing_utils::first_line;
use crate::paths;
use crate::payload::DataStore;

/// Random tie-breaking integers for the election ballot, same range as
/// the lock's: `0..=2^31-1`.
const RAND_MAX_INCLUSIVE: u32 = (1u32 << 31) - 1;

/// Why this invocation should exit cleanly (code 0) instead of running
/// the user function. Modeled as a return value rather than a
/// `FaasrErrorKind` because both cases are expected, successful outcomes
/// of concurrent fan-in — folding them into the fatal-error enum would
/// make the exit-0 case unreachable without special-casing every call
/// site that maps errors to exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotLastTriggerReason {
    /// Not every predecessor (including ranked replicas) has posted its
    /// `<pred>[.<rank>].done` flag yet — `NotLastTrigger-NoFlag` in
    /// SPEC_FULL.md section 7.
    NoFlag,
    /// Every predecessor is done, but another concurrent invocation
    /// wrote the first line of the election ballot —
    /// `NotLastTrigger-NotFirstWriter`.
    NotFirstWriter,
}

impl NotLastTriggerReason {
    pub fn code(self) -> &'static str {
        match self {
            NotLastTriggerReason::NoFlag => "NotLastTrigger-NoFlag",
            NotLastTriggerReason::NotFirstWriter => "NotLastTrigger-NotFirstWriter",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Proceed,
    NotLastTrigger(NotLastTriggerReason),
}

/// Decides, for a function with more than one predecessor, which single
/// concurrent triggering invocation is allowed to continue past the
/// barrier. Grounded in the fan-in bookkeeping
/// `faasr_abort_on_double_trigger.py` performs via predecessor
/// done-flags, the RSM lock, and the append-only election ballot.
pub struct FanInArbiter<'a> {
    store_client: &'a ObjectStoreClient,
    lock_service: LockService<'a>,
}

impl<'a> FanInArbiter<'a> {
    pub fn new(store_client: &'a ObjectStoreClient, lock_service: LockService<'a>) -> Self {
        Self {
            store_client,
            lock_service,
        }
    }

    /// Checks whether every predecessor of `function_name` (each ranked
    /// replica counted separately) has posted its done-flag under
    /// `root`. Functions with at most one predecessor always proceed —
    /// there is nothing to arbitrate. This invocation never posts its
    /// *own* done-flag here; that happens only after the executor has
    /// actually run the user function (see `paths::done_flag` and
    /// `executor::execute`).
    pub async fn barrier(
        &self,
        graph: &Graph,
        store_name: &str,
        store: &DataStore,
        root: &str,
        function_name: &str,
    ) -> anyhow::Result<Outcome> {
        let predecessors = graph.predecessors(function_name);
        if predecessors.len() <= 1 {
            return Ok(Outcome::Proceed);
        }

        let mut expected_flags = Vec::new();
        for pred in predecessors {
            let rank_count = graph
                .successors(pred)
                .iter()
                .find(|edge| edge.target == function_name)
                .and_then(|edge| edge.rank_count);
            expected_flags.extend(paths::expand_done_flags(root, pred, rank_count));
        }

        for flag in &expected_flags {
            if !self.store_client.exists(store_name, store, flag).await? {
                return Ok(Outcome::NotLastTrigger(NotLastTriggerReason::NoFlag));
            }
        }

        self.elect(store_name, store, root, function_name).await
    }

    /// Every predecessor is accounted for; exactly one of the
    /// invocations that observed that must be allowed through. Holds the
    /// RSM lock only long enough to append our ballot line and read it
    /// back — the election outcome itself is derived from the ballot's
    /// first line, not from lock ownership.
    async fn elect(
        &self,
        store_name: &str,
        store: &DataStore,
        root: &str,
        function_name: &str,
    ) -> anyhow::Result<Outcome> {
        let lock_root = paths::lock_root(root, function_name);
        let guard = self.lock_service.acquire(store_name, store, &lock_root).await?;

        let candidate_key = paths::candidate_key(root, function_name);
        let my_int: u32 = rand::rng().random_range(0..=RAND_MAX_INCLUSIVE);

        let existing = if self.store_client.exists(store_name, store, &candidate_key).await? {
            self.store_client.get(store_name, store, &candidate_key).await?
        } else {
            bytes::Bytes::new()
        };
        let mut ballot = String::from_utf8_lossy(&existing).into_owned();
        if !ballot.is_empty() && !ballot.ends_with('\n') {
            ballot.push('\n');
        }
        ballot.push_str(&my_int.to_string());
        ballot.push('\n');

        self.store_client
            .put(store_name, store, &candidate_key, Bytes::from(ballot))
            .await?;

        let reread = self.store_client.get(store_name, store, &candidate_key).await?;
        guard.release().await?;

        let first = first_line(&reread).ok_or_else(|| {
            FaasrError::provider_dispatch(format!("election ballot {candidate_key} is empty after write"))
        })?;

        if first == my_int.to_string() {
            Ok(Outcome::Proceed)
        } else {
            Ok(Outcome::NotLastTrigger(NotLastTriggerReason::NotFirstWriter))
        }
    }
}
