//! In-process conversation memory.
//!
//! Threads are addressed by UUID and shared by every tool invocation in the
//! process, which is what makes cross-tool continuations work: any tool may
//! present a `continuation_id` minted by another. State is deliberately
//! process-local; threads live for a bounded TTL and the store LRU-evicts
//! past a cap.
//!
//! Locking discipline: the map itself is a [`DashMap`], each thread guards
//! its state with its own `RwLock`. Writes to one thread serialize on that
//! lock, readers snapshot, and operations on different threads never
//! contend.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use proto::{MemoryError, Role, ThreadId, Turn, estimate_tokens};
use tracing::{debug, info};

/// Store limits, all operator-tunable through the environment
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Turn cap per thread (`MAX_CONVERSATION_TURNS`).
    pub max_turns: usize,
    /// Idle lifetime (`CONVERSATION_TIMEOUT_HOURS`).
    pub ttl: Duration,
    /// Thread-count cap before LRU eviction.
    pub max_threads: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_turns: 20,
            ttl: Duration::hours(5),
            max_threads: 1_000,
        }
    }
}

#[derive(Debug)]
struct ThreadState {
    tool_name: String,
    parent_id: Option<ThreadId>,
    created_at: DateTime<Utc>,
    last_touched_at: DateTime<Utc>,
    turns: Vec<Turn>,
    files: Vec<String>,
    workflow_state: Option<serde_json::Value>,
}

/// Read-only snapshot of thread bookkeeping, used for continuation offers
#[derive(Debug, Clone)]
pub struct ThreadInfo {
    pub thread_id: ThreadId,
    pub tool_name: String,
    pub parent_id: Option<ThreadId>,
    pub turn_count: usize,
    pub remaining_turns: usize,
    pub created_at: DateTime<Utc>,
    pub last_touched_at: DateTime<Utc>,
}

/// Counters reported by one [`ConversationStore::gc`] pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GcStats {
    pub expired: usize,
    pub evicted: usize,
}

/// Process-wide conversation thread store
pub struct ConversationStore {
    config: StoreConfig,
    threads: DashMap<ThreadId, Arc<RwLock<ThreadState>>>,
}

impl ConversationStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            threads: DashMap::new(),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Creates a thread seeded with an initial turn and returns its id.
    pub fn create_thread(
        &self,
        tool_name: impl Into<String>,
        initial_turn: Turn,
        parent_id: Option<ThreadId>,
    ) -> ThreadId {
        if self.threads.len() >= self.config.max_threads {
            self.evict_lru(self.config.max_threads.saturating_sub(1));
        }

        let id = ThreadId::new();
        let now = Utc::now();
        let state = ThreadState {
            tool_name: tool_name.into(),
            parent_id,
            created_at: now,
            last_touched_at: now,
            turns: vec![initial_turn],
            files: Vec::new(),
            workflow_state: None,
        };
        self.threads.insert(id, Arc::new(RwLock::new(state)));
        debug!(thread = %id, "created conversation thread");
        id
    }

    /// Appends one turn, returning the new turn count.
    pub fn append_turn(&self, id: &ThreadId, turn: Turn) -> Result<usize, MemoryError> {
        let entry = self.entry(id)?;
        let mut state = entry.write().expect("thread state lock");
        self.check_expired(id, &state)?;
        if state.turns.len() >= self.config.max_turns {
            return Err(MemoryError::ThreadFull {
                thread_id: *id,
                max_turns: self.config.max_turns,
            });
        }
        state.turns.push(turn);
        // Monotonic under clock adjustments.
        state.last_touched_at = Utc::now().max(state.last_touched_at);
        Ok(state.turns.len())
    }

    /// Rebuilds history for a prompt: the most recent turns whose token
    /// estimate fits `budget_tokens`, always anchored on the first user
    /// turn so the conversation keeps its opening context. The anchor is
    /// kept even when it alone exceeds the budget.
    pub fn reconstruct(
        &self,
        id: &ThreadId,
        budget_tokens: usize,
    ) -> Result<Vec<Turn>, MemoryError> {
        let entry = self.entry(id)?;
        let state = entry.read().expect("thread state lock");
        self.check_expired(id, &state)?;

        let turns = &state.turns;
        if turns.is_empty() {
            return Ok(Vec::new());
        }

        let anchor_idx = turns.iter().position(|t| t.role == Role::User);
        let mut used = anchor_idx.map(|i| estimate_tokens(&turns[i].content)).unwrap_or(0);

        let mut start = turns.len();
        for i in (0..turns.len()).rev() {
            if Some(i) == anchor_idx {
                // Already paid for by the anchor reservation.
                start = i;
                continue;
            }
            let cost = estimate_tokens(&turns[i].content);
            if used + cost > budget_tokens {
                break;
            }
            used += cost;
            start = i;
        }

        let mut result = Vec::new();
        if let Some(anchor) = anchor_idx
            && anchor < start
        {
            result.push(turns[anchor].clone());
        }
        result.extend(turns[start..].iter().cloned());
        if result.is_empty() {
            // Nothing fit the budget; keep at least the newest turn so a
            // continuation is never silently context-free.
            result.push(turns[turns.len() - 1].clone());
        }
        Ok(result)
    }

    /// Records file attachments on a thread, de-duplicated by exact path
    /// equality after trimming. Returns the attachment count.
    pub fn record_files(&self, id: &ThreadId, paths: &[String]) -> Result<usize, MemoryError> {
        let entry = self.entry(id)?;
        let mut state = entry.write().expect("thread state lock");
        self.check_expired(id, &state)?;
        for path in paths {
            let normalized = path.trim().to_string();
            if normalized.is_empty() || state.files.contains(&normalized) {
                continue;
            }
            state.files.push(normalized);
        }
        Ok(state.files.len())
    }

    /// File attachments recorded so far, in first-seen order.
    pub fn files(&self, id: &ThreadId) -> Result<Vec<String>, MemoryError> {
        let entry = self.entry(id)?;
        let state = entry.read().expect("thread state lock");
        self.check_expired(id, &state)?;
        Ok(state.files.clone())
    }

    /// Opaque per-thread state slot used by the workflow engine.
    pub fn workflow_state(&self, id: &ThreadId) -> Result<Option<serde_json::Value>, MemoryError> {
        let entry = self.entry(id)?;
        let state = entry.read().expect("thread state lock");
        self.check_expired(id, &state)?;
        Ok(state.workflow_state.clone())
    }

    pub fn set_workflow_state(
        &self,
        id: &ThreadId,
        value: serde_json::Value,
    ) -> Result<(), MemoryError> {
        let entry = self.entry(id)?;
        let mut state = entry.write().expect("thread state lock");
        self.check_expired(id, &state)?;
        state.workflow_state = Some(value);
        state.last_touched_at = Utc::now().max(state.last_touched_at);
        Ok(())
    }

    /// Bookkeeping snapshot for one thread.
    pub fn thread_info(&self, id: &ThreadId) -> Result<ThreadInfo, MemoryError> {
        let entry = self.entry(id)?;
        let state = entry.read().expect("thread state lock");
        self.check_expired(id, &state)?;
        Ok(ThreadInfo {
            thread_id: *id,
            tool_name: state.tool_name.clone(),
            parent_id: state.parent_id,
            turn_count: state.turns.len(),
            remaining_turns: self.config.max_turns.saturating_sub(state.turns.len()),
            created_at: state.created_at,
            last_touched_at: state.last_touched_at,
        })
    }

    /// Background pass: drop expired threads, then LRU-evict past the cap.
    pub fn gc(&self) -> GcStats {
        let now = Utc::now();
        let expired: Vec<ThreadId> = self
            .threads
            .iter()
            .filter(|entry| {
                let state = entry.value().read().expect("thread state lock");
                state.last_touched_at + self.config.ttl < now
            })
            .map(|entry| *entry.key())
            .collect();
        for id in &expired {
            self.threads.remove(id);
        }

        let evicted = self.evict_lru(self.config.max_threads);
        let stats = GcStats {
            expired: expired.len(),
            evicted,
        };
        if stats.expired > 0 || stats.evicted > 0 {
            info!(
                expired = stats.expired,
                evicted = stats.evicted,
                live = self.threads.len(),
                "conversation gc pass"
            );
        }
        stats
    }

    /// Evicts least-recently-touched threads until at most `keep` remain.
    fn evict_lru(&self, keep: usize) -> usize {
        let over = self.threads.len().saturating_sub(keep);
        if over == 0 {
            return 0;
        }
        let mut by_age: Vec<(ThreadId, DateTime<Utc>)> = self
            .threads
            .iter()
            .map(|entry| {
                let state = entry.value().read().expect("thread state lock");
                (*entry.key(), state.last_touched_at)
            })
            .collect();
        by_age.sort_by_key(|(_, touched)| *touched);
        let mut evicted = 0;
        for (id, _) in by_age.into_iter().take(over) {
            self.threads.remove(&id);
            evicted += 1;
        }
        evicted
    }

    fn entry(&self, id: &ThreadId) -> Result<Arc<RwLock<ThreadState>>, MemoryError> {
        self.threads
            .get(id)
            .map(|e| Arc::clone(e.value()))
            .ok_or(MemoryError::ThreadUnknown(*id))
    }

    fn check_expired(&self, id: &ThreadId, state: &ThreadState) -> Result<(), MemoryError> {
        if state.last_touched_at + self.config.ttl < Utc::now() {
            return Err(MemoryError::ThreadExpired(*id));
        }
        Ok(())
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(max_turns: usize, ttl: Duration, max_threads: usize) -> ConversationStore {
        ConversationStore::new(StoreConfig {
            max_turns,
            ttl,
            max_threads,
        })
    }

    #[test]
    fn create_append_and_count_turns() {
        let store = ConversationStore::default();
        let id = store.create_thread("chat", Turn::user("plan migration"), None);

        let count = store
            .append_turn(&id, Turn::assistant("sure"))
            .expect("append");
        assert_eq!(count, 2);

        let info = store.thread_info(&id).expect("info");
        assert_eq!(info.tool_name, "chat");
        assert_eq!(info.turn_count, 2);
        assert_eq!(info.remaining_turns, 18);
    }

    #[test]
    fn append_to_unknown_thread_fails() {
        let store = ConversationStore::default();
        let err = store
            .append_turn(&ThreadId::new(), Turn::user("hi"))
            .expect_err("unknown thread");
        assert!(matches!(err, MemoryError::ThreadUnknown(_)));
    }

    #[test]
    fn append_past_turn_cap_reports_thread_full() {
        let store = store_with(2, Duration::hours(5), 100);
        let id = store.create_thread("chat", Turn::user("one"), None);
        store.append_turn(&id, Turn::assistant("two")).expect("append");

        let err = store
            .append_turn(&id, Turn::user("three"))
            .expect_err("thread is full");
        let MemoryError::ThreadFull { max_turns, .. } = err else {
            panic!("expected ThreadFull, got {err}");
        };
        assert_eq!(max_turns, 2);
    }

    #[test]
    fn expired_thread_is_rejected() {
        let store = store_with(20, Duration::milliseconds(-1), 100);
        let id = store.create_thread("chat", Turn::user("hello"), None);
        let err = store
            .append_turn(&id, Turn::assistant("hi"))
            .expect_err("ttl already elapsed");
        assert!(matches!(err, MemoryError::ThreadExpired(_)));
    }

    #[test]
    fn last_touched_is_monotonic_across_appends() {
        let store = ConversationStore::default();
        let id = store.create_thread("chat", Turn::user("a"), None);
        let before = store.thread_info(&id).expect("info").last_touched_at;
        store.append_turn(&id, Turn::assistant("b")).expect("append");
        let after = store.thread_info(&id).expect("info").last_touched_at;
        assert!(after >= before);
    }

    #[test]
    fn reconstruct_returns_all_turns_under_generous_budget() {
        let store = ConversationStore::default();
        let id = store.create_thread("chat", Turn::user("first question"), None);
        store.append_turn(&id, Turn::assistant("first answer")).expect("append");
        store.append_turn(&id, Turn::user("second question")).expect("append");

        let history = store.reconstruct(&id, 100_000).expect("reconstruct");
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].content, "first question");
        assert_eq!(history[2].content, "second question");
    }

    #[test]
    fn reconstruct_keeps_first_user_turn_and_newest_suffix() {
        let store = ConversationStore::default();
        let id = store.create_thread("chat", Turn::user("anchor"), None);
        // ~25 tokens each; a 40-token budget fits the anchor plus one more.
        store
            .append_turn(&id, Turn::assistant("x".repeat(100)))
            .expect("append");
        store
            .append_turn(&id, Turn::user("y".repeat(100)))
            .expect("append");

        let history = store.reconstruct(&id, 40).expect("reconstruct");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "anchor");
        assert!(history[1].content.starts_with('y'));

        // The result is the anchor plus a suffix: the middle turn is gone.
        assert!(!history.iter().any(|t| t.content.starts_with('x')));
    }

    #[test]
    fn reconstruct_token_estimate_fits_budget() {
        let store = ConversationStore::default();
        let id = store.create_thread("chat", Turn::user("q"), None);
        for i in 0..10 {
            store
                .append_turn(&id, Turn::assistant(format!("answer {i} {}", "z".repeat(40))))
                .expect("append");
        }

        let budget = 30;
        let history = store.reconstruct(&id, budget).expect("reconstruct");
        let total: usize = history.iter().map(|t| estimate_tokens(&t.content)).sum();
        assert!(total <= budget, "estimate {total} exceeds budget {budget}");
        assert_eq!(history[0].content, "q");
    }

    #[test]
    fn reconstruct_is_never_empty_for_nonempty_thread() {
        let store = ConversationStore::default();
        let id = store.create_thread("chat", Turn::user("w".repeat(400)), None);
        let history = store.reconstruct(&id, 1).expect("reconstruct");
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn record_files_dedups_exact_paths() {
        let store = ConversationStore::default();
        let id = store.create_thread("codereview", Turn::user("review"), None);

        let count = store
            .record_files(
                &id,
                &[
                    "/src/main.rs".to_string(),
                    "/src/lib.rs".to_string(),
                    " /src/main.rs ".to_string(),
                    "".to_string(),
                ],
            )
            .expect("record files");
        assert_eq!(count, 2);
        assert_eq!(
            store.files(&id).expect("files"),
            vec!["/src/main.rs", "/src/lib.rs"]
        );
    }

    #[test]
    fn workflow_state_round_trips() {
        let store = ConversationStore::default();
        let id = store.create_thread("debug", Turn::user("step 1"), None);
        assert!(store.workflow_state(&id).expect("state").is_none());

        store
            .set_workflow_state(&id, serde_json::json!({"step_number": 2}))
            .expect("set state");
        let state = store.workflow_state(&id).expect("state").expect("present");
        assert_eq!(state["step_number"], 2);
    }

    #[test]
    fn gc_removes_expired_threads() {
        let store = store_with(20, Duration::milliseconds(-1), 100);
        store.create_thread("chat", Turn::user("a"), None);
        store.create_thread("chat", Turn::user("b"), None);

        let stats = store.gc();
        assert_eq!(stats.expired, 2);
        assert!(store.is_empty());
    }

    #[test]
    fn gc_lru_evicts_past_cap() {
        let store = store_with(20, Duration::hours(5), 2);
        let first = store.create_thread("chat", Turn::user("oldest"), None);
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = store.create_thread("chat", Turn::user("newer"), None);
        std::thread::sleep(std::time::Duration::from_millis(5));

        // Creating a third evicts the least recently touched.
        let third = store.create_thread("chat", Turn::user("newest"), None);
        assert_eq!(store.len(), 2);
        assert!(store.thread_info(&first).is_err());
        assert!(store.thread_info(&second).is_ok());
        assert!(store.thread_info(&third).is_ok());
    }

    #[test]
    fn forked_thread_remembers_parent() {
        let store = ConversationStore::default();
        let parent = store.create_thread("chat", Turn::user("root"), None);
        let child = store.create_thread("debug", Turn::user("fork"), Some(parent));
        assert_eq!(
            store.thread_info(&child).expect("info").parent_id,
            Some(parent)
        );
    }

    #[test]
    fn writers_on_different_threads_do_not_interfere() {
        let store = Arc::new(ConversationStore::default());
        let a = store.create_thread("chat", Turn::user("a"), None);
        let b = store.create_thread("chat", Turn::user("b"), None);

        let handles: Vec<_> = [(a, "from-a"), (b, "from-b")]
            .into_iter()
            .map(|(id, tag)| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..5 {
                        store
                            .append_turn(&id, Turn::assistant(tag))
                            .expect("append");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread join");
        }

        assert_eq!(store.thread_info(&a).expect("info").turn_count, 6);
        assert_eq!(store.thread_info(&b).expect("info").turn_count, 6);
    }
}
