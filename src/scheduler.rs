//! Dual-channel request scheduler (§4.5): the single writer thread that owns
//! the store, and the starvation-free arbitration between the updates and
//! queries channels.
//!
//! Grounded on the same `std::sync::mpsc` + dedicated-thread + `recv_timeout`
//! shape used elsewhere in this codebase for a single-consumer event loop
//! fed by many producers — here generalized from a debounced file-watcher
//! loop into a strict two-channel priority arbiter.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::{PygmalionError, Result};
use crate::fact::{CallEdge, CommandInfo, DefInfo, Inclusion, Override, Reference, SourceRange};
use crate::store::Store;

/// A single-shot reply slot (§9 design note): the writer posts exactly one
/// value, the caller receives exactly one value or learns the writer hung
/// up (request cancelled).
pub type ReplySlot<T> = Sender<T>;
pub type ReplyWaiter<T> = Receiver<T>;

fn reply_pair<T>() -> (ReplySlot<T>, ReplyWaiter<T>) {
    mpsc::channel()
}

/// Blocks on a reply slot, turning a dropped sender into [`PygmalionError::RequestCancelled`].
pub fn await_reply<T>(waiter: ReplyWaiter<T>) -> Result<T> {
    waiter.recv().map_err(|_| PygmalionError::RequestCancelled)
}

/// Requests that mutate the store (§4.5 updates channel).
pub enum UpdateRequest {
    UpdateCommandInfo(CommandInfo),
    UpdateDef(DefInfo),
    UpdateOverride(Override),
    UpdateRef(Reference),
    UpdateInclusion(Inclusion),
    UpdateCaller(CallEdge),
    ResetMetadata(String),
    InsertFileAndCheck(String, ReplySlot<bool>),
    Shutdown,
}

/// Requests that only read the store (§4.5 queries channel).
pub enum QueryRequest {
    GetCommandInfo(String, ReplySlot<Option<CommandInfo>>),
    GetSimilarCommandInfo(String, ReplySlot<Option<CommandInfo>>),
    GetDefinition(String, ReplySlot<Option<DefInfo>>),
    GetIncluders(String, ReplySlot<Vec<CommandInfo>>),
    GetCallers(String, ReplySlot<Vec<DefInfo>>),
    GetCallees(String, ReplySlot<Vec<DefInfo>>),
    GetBases(String, ReplySlot<Vec<DefInfo>>),
    GetOverrides(String, ReplySlot<Vec<DefInfo>>),
    GetRefs(String, ReplySlot<Vec<SourceRange>>),
    GetReferenced(String, u32, u32, ReplySlot<Vec<DefInfo>>),
    GetAllCommandInfos(ReplySlot<Vec<CommandInfo>>),
}

/// A handle producers use to submit requests to the writer thread. Cheap to
/// clone; every clone is an independent producer onto the many-producer /
/// single-consumer channels (§5) — in-process callers, socket-handler
/// threads (SPEC_FULL §4.10), and worker-host threads all hold one.
#[derive(Clone)]
pub struct SchedulerHandle {
    updates: Sender<UpdateRequest>,
    queries: Sender<QueryRequest>,
    // `std::sync::mpsc::Receiver` exposes no `len()`, so the writer tracks
    // each channel's pending count itself: incremented here on send,
    // decremented by `dequeue` right after it reads one off (§4.5
    // "preferring-read channel primitive" diagnostic length).
    pending_updates: Arc<AtomicUsize>,
    pending_queries: Arc<AtomicUsize>,
}

impl SchedulerHandle {
    fn send_update(&self, req: UpdateRequest) {
        // An unbounded channel send never blocks (§5); the only failure mode
        // is the writer having already shut down, which callers treat as a
        // no-op rather than a hard error — in-flight submissions during
        // shutdown are expected to be dropped.
        self.pending_updates.fetch_add(1, Ordering::Relaxed);
        let _ = self.updates.send(req);
    }

    pub fn update_command_info(&self, ci: CommandInfo) {
        self.send_update(UpdateRequest::UpdateCommandInfo(ci));
    }

    pub fn update_def(&self, def: DefInfo) {
        self.send_update(UpdateRequest::UpdateDef(def));
    }

    pub fn update_override(&self, ov: Override) {
        self.send_update(UpdateRequest::UpdateOverride(ov));
    }

    pub fn update_reference(&self, r: Reference) {
        self.send_update(UpdateRequest::UpdateRef(r));
    }

    pub fn update_inclusion(&self, inc: Inclusion) {
        self.send_update(UpdateRequest::UpdateInclusion(inc));
    }

    pub fn update_caller(&self, edge: CallEdge) {
        self.send_update(UpdateRequest::UpdateCaller(edge));
    }

    /// Submits `ResetMetadata` for `file`. Because this and the facts that
    /// follow for the same TU are submitted by the same producer thread
    /// onto the same FIFO channel, the writer observes them in that order
    /// (§5 ordering guarantee) without any extra synchronization.
    pub fn reset_metadata(&self, file: impl Into<String>) {
        self.send_update(UpdateRequest::ResetMetadata(file.into()));
    }

    pub fn insert_file_and_check(&self, file: impl Into<String>) -> Result<bool> {
        let (tx, rx) = reply_pair();
        self.send_update(UpdateRequest::InsertFileAndCheck(file.into(), tx));
        await_reply(rx)
    }

    pub fn shutdown(&self) {
        self.send_update(UpdateRequest::Shutdown);
    }

    fn send_query(&self, req: QueryRequest) {
        self.pending_queries.fetch_add(1, Ordering::Relaxed);
        let _ = self.queries.send(req);
    }

    pub fn get_command_info(&self, file: impl Into<String>) -> Result<Option<CommandInfo>> {
        let (tx, rx) = reply_pair();
        self.send_query(QueryRequest::GetCommandInfo(file.into(), tx));
        await_reply(rx)
    }

    pub fn get_similar_command_info(&self, file: impl Into<String>) -> Result<Option<CommandInfo>> {
        let (tx, rx) = reply_pair();
        self.send_query(QueryRequest::GetSimilarCommandInfo(file.into(), tx));
        await_reply(rx)
    }

    pub fn get_definition(&self, usr: impl Into<String>) -> Result<Option<DefInfo>> {
        let (tx, rx) = reply_pair();
        self.send_query(QueryRequest::GetDefinition(usr.into(), tx));
        await_reply(rx)
    }

    pub fn get_includers(&self, file: impl Into<String>) -> Result<Vec<CommandInfo>> {
        let (tx, rx) = reply_pair();
        self.send_query(QueryRequest::GetIncluders(file.into(), tx));
        await_reply(rx)
    }

    pub fn get_callers(&self, usr: impl Into<String>) -> Result<Vec<DefInfo>> {
        let (tx, rx) = reply_pair();
        self.send_query(QueryRequest::GetCallers(usr.into(), tx));
        await_reply(rx)
    }

    pub fn get_callees(&self, usr: impl Into<String>) -> Result<Vec<DefInfo>> {
        let (tx, rx) = reply_pair();
        self.send_query(QueryRequest::GetCallees(usr.into(), tx));
        await_reply(rx)
    }

    pub fn get_bases(&self, usr: impl Into<String>) -> Result<Vec<DefInfo>> {
        let (tx, rx) = reply_pair();
        self.send_query(QueryRequest::GetBases(usr.into(), tx));
        await_reply(rx)
    }

    pub fn get_overriders(&self, usr: impl Into<String>) -> Result<Vec<DefInfo>> {
        let (tx, rx) = reply_pair();
        self.send_query(QueryRequest::GetOverrides(usr.into(), tx));
        await_reply(rx)
    }

    pub fn get_references(&self, usr: impl Into<String>) -> Result<Vec<SourceRange>> {
        let (tx, rx) = reply_pair();
        self.send_query(QueryRequest::GetRefs(usr.into(), tx));
        await_reply(rx)
    }

    pub fn get_referenced(&self, file: impl Into<String>, line: u32, col: u32) -> Result<Vec<DefInfo>> {
        let (tx, rx) = reply_pair();
        self.send_query(QueryRequest::GetReferenced(file.into(), line, col, tx));
        await_reply(rx)
    }

    /// All known `SourceFiles` rows, for the `compile_commands.json`
    /// exporter (SPEC_FULL §4.11).
    pub fn get_all_command_infos(&self) -> Result<Vec<CommandInfo>> {
        let (tx, rx) = reply_pair();
        self.send_query(QueryRequest::GetAllCommandInfos(tx));
        await_reply(rx)
    }
}

/// Reads from the preferred channel if it has an item ready; otherwise
/// blocks on either channel and returns whichever produces first (§4.5
/// "preferring-read channel primitive"). Each successful read also reports
/// the chosen channel's post-read pending length, for diagnostics.
/// Returns `Disconnected` once both channels have disconnected.
enum Dequeued {
    Update(UpdateRequest, usize),
    Query(QueryRequest, usize),
    Disconnected,
}

fn dequeue_preferring_updates(
    updates: &Receiver<UpdateRequest>,
    queries: &Receiver<QueryRequest>,
    pending_updates: &AtomicUsize,
    pending_queries: &AtomicUsize,
) -> Dequeued {
    dequeue(updates, queries, pending_updates, pending_queries, true)
}

fn dequeue_preferring_queries(
    updates: &Receiver<UpdateRequest>,
    queries: &Receiver<QueryRequest>,
    pending_updates: &AtomicUsize,
    pending_queries: &AtomicUsize,
) -> Dequeued {
    dequeue(updates, queries, pending_updates, pending_queries, false)
}

/// Decrements `counter` for an item just read off its channel and returns
/// the post-read length (saturating, since a stale read can race a
/// concurrent sender's `fetch_add` and briefly underflow otherwise).
fn post_read_len(counter: &AtomicUsize) -> usize {
    counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1))).unwrap_or(0).saturating_sub(1)
}

fn dequeue(
    updates: &Receiver<UpdateRequest>,
    queries: &Receiver<QueryRequest>,
    pending_updates: &AtomicUsize,
    pending_queries: &AtomicUsize,
    prefer_updates: bool,
) -> Dequeued {
    // Try the preferred channel first without blocking.
    if prefer_updates {
        if let Ok(u) = updates.try_recv() {
            return Dequeued::Update(u, post_read_len(pending_updates));
        }
        if let Ok(q) = queries.try_recv() {
            return Dequeued::Query(q, post_read_len(pending_queries));
        }
    } else {
        if let Ok(q) = queries.try_recv() {
            return Dequeued::Query(q, post_read_len(pending_queries));
        }
        if let Ok(u) = updates.try_recv() {
            return Dequeued::Update(u, post_read_len(pending_updates));
        }
    }

    // Both empty: block on whichever produces first, polling at a short
    // interval so a disconnect on one side doesn't wedge us forever on the
    // other (mirrors the `recv_timeout` debounce-loop shape used elsewhere
    // in this codebase for a single blocking consumer over two sources).
    let mut updates_open = true;
    let mut queries_open = true;
    loop {
        if updates_open {
            match updates.recv_timeout(Duration::from_millis(20)) {
                Ok(u) => return Dequeued::Update(u, post_read_len(pending_updates)),
                Err(RecvTimeoutError::Disconnected) => updates_open = false,
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
        if queries_open {
            match queries.recv_timeout(Duration::from_millis(20)) {
                Ok(q) => return Dequeued::Query(q, post_read_len(pending_queries)),
                Err(RecvTimeoutError::Disconnected) => queries_open = false,
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
        if !updates_open && !queries_open {
            return Dequeued::Disconnected;
        }
    }
}

/// Spawns the writer thread and returns a handle producers can clone and
/// share. The writer owns `store` for its entire lifetime; no other thread
/// ever touches it (§5).
pub fn spawn(mut store: Store) -> SchedulerHandle {
    let (update_tx, update_rx) = mpsc::channel::<UpdateRequest>();
    let (query_tx, query_rx) = mpsc::channel::<QueryRequest>();
    let pending_updates = Arc::new(AtomicUsize::new(0));
    let pending_queries = Arc::new(AtomicUsize::new(0));

    {
        let pending_updates = Arc::clone(&pending_updates);
        let pending_queries = Arc::clone(&pending_queries);
        std::thread::spawn(move || {
            let mut iteration: u64 = 0;
            let mut handled: u64 = 0;
            let mut last_queue_len: usize = 0;
            loop {
                // §4.5 arbitration: prefer queries iff n mod 10 == 0, else prefer
                // updates. ~9:1 update-biased schedule, queries drained at least
                // every ten operations.
                let dequeued = if iteration % 10 == 0 {
                    dequeue_preferring_queries(&update_rx, &query_rx, &pending_updates, &pending_queries)
                } else {
                    dequeue_preferring_updates(&update_rx, &query_rx, &pending_updates, &pending_queries)
                };
                iteration += 1;

                match dequeued {
                    Dequeued::Update(req, queue_len) => {
                        last_queue_len = queue_len;
                        if matches!(req, UpdateRequest::Shutdown) {
                            info!(handled, queue_len, "writer thread shutting down");
                            break;
                        }
                        handle_update(&mut store, req);
                        handled += 1;
                    }
                    Dequeued::Query(req, queue_len) => {
                        last_queue_len = queue_len;
                        handle_query(&store, req);
                        handled += 1;
                    }
                    Dequeued::Disconnected => {
                        info!(handled, "both scheduler channels disconnected, writer thread exiting");
                        break;
                    }
                }

                if handled > 0 && handled % 1000 == 0 {
                    info!(handled, queue_len = last_queue_len, "scheduler throughput checkpoint");
                }
            }
        });
    }

    SchedulerHandle { updates: update_tx, queries: query_tx, pending_updates, pending_queries }
}

fn handle_update(store: &mut Store, req: UpdateRequest) {
    let result = match req {
        UpdateRequest::UpdateCommandInfo(ci) => store.update_source_file(&ci),
        UpdateRequest::UpdateDef(def) => store.update_def(&def),
        UpdateRequest::UpdateOverride(ov) => store.update_override(&ov),
        UpdateRequest::UpdateRef(r) => store.update_reference(&r),
        UpdateRequest::UpdateInclusion(inc) => store.update_inclusion(&inc),
        UpdateRequest::UpdateCaller(edge) => store.update_caller(&edge),
        UpdateRequest::ResetMetadata(file) => store.reset_metadata(&file),
        UpdateRequest::InsertFileAndCheck(file, reply) => {
            let outcome = store.insert_file_and_check(&file);
            match outcome {
                Ok(v) => {
                    let _ = reply.send(v);
                    Ok(())
                }
                Err(e) => Err(e),
            }
        }
        UpdateRequest::Shutdown => unreachable!("Shutdown is handled by the caller before dispatch"),
    };
    // Transient DB failures are reported via logging and otherwise
    // swallowed (§7): facts are always recomputable, so the daemon favours
    // liveness over aborting on a single failed write.
    if let Err(e) = result {
        warn!(error = %e, "transient store write failure");
    }
}

fn handle_query(store: &Store, req: QueryRequest) {
    match req {
        QueryRequest::GetCommandInfo(file, reply) => {
            let _ = reply.send(store.get_command_info(&file).unwrap_or_default());
        }
        QueryRequest::GetSimilarCommandInfo(file, reply) => {
            let _ = reply.send(store.get_similar_command_info(&file).unwrap_or_default());
        }
        QueryRequest::GetDefinition(usr, reply) => {
            let _ = reply.send(store.get_definition(&usr).unwrap_or_default());
        }
        QueryRequest::GetIncluders(file, reply) => {
            let _ = reply.send(store.get_includers(&file).unwrap_or_default());
        }
        QueryRequest::GetCallers(usr, reply) => {
            let _ = reply.send(store.get_callers(&usr).unwrap_or_default());
        }
        QueryRequest::GetCallees(usr, reply) => {
            let _ = reply.send(store.get_callees(&usr).unwrap_or_default());
        }
        QueryRequest::GetBases(usr, reply) => {
            let _ = reply.send(store.get_bases(&usr).unwrap_or_default());
        }
        QueryRequest::GetOverrides(usr, reply) => {
            let _ = reply.send(store.get_overriders(&usr).unwrap_or_default());
        }
        QueryRequest::GetRefs(usr, reply) => {
            let _ = reply.send(store.get_references(&usr).unwrap_or_default());
        }
        QueryRequest::GetReferenced(file, line, col, reply) => {
            let _ = reply.send(store.get_referenced(&file, line, col).unwrap_or_default());
        }
        QueryRequest::GetAllCommandInfos(reply) => {
            let _ = reply.send(store.get_all_command_infos().unwrap_or_default());
        }
    }
}
