//! Scriptable in-memory remote.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use provis_reconcile::{
    ApiError, ClientToken, DeleteOptions, RemoteApi, ResourceHandle, ResourceKind,
};
use tracing::debug;

/// Server-side behaviour of a resource kind, as simulated by
/// [`FakeRemote`].
pub trait FakeModel: ResourceKind {
    /// Identifier for the `seq`-th object created (starting at 1).
    fn assign_id(seq: u64, request: &Self::Request) -> String;

    /// The object as the remote reports it right after accepting a
    /// create.
    fn materialize(id: &str, request: &Self::Request) -> Self::Object;

    /// Finish any in-flight provisioning or modification.
    fn settle(object: &mut Self::Object);

    /// Apply an update, leaving the object in its transitional state.
    fn apply_patch(object: &mut Self::Object, patch: &Self::Patch);

    /// Names of the fields a patch carries.
    fn patched_fields(patch: &Self::Patch) -> Vec<&'static str>;

    /// Move the object into its deleted state.
    fn mark_deleted(object: &mut Self::Object, opts: &DeleteOptions);
}

/// Remote API call, for counting and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Create,
    Read,
    Update,
    Delete,
    SubResourceCount,
}

struct Entry<O> {
    object: O,

    /// Reads still answered with not-found.
    hidden_reads: u32,

    /// Reads still answered with the transitional state. `None` never
    /// settles.
    pending_reads: Option<u32>,

    deleted: bool,

    /// Reads still answered with the deleted object before it vanishes.
    linger_reads: u32,
}

struct FakeState<K: FakeModel> {
    objects: BTreeMap<String, Entry<K::Object>>,
    tokens: HashMap<ClientToken, String>,
    next_seq: u64,
    calls: HashMap<Op, usize>,
    faults: VecDeque<(Op, ApiError)>,
    lost_create_responses: u32,
    sub_resource_counts: VecDeque<usize>,
    last_sub_resource_count: usize,
    delete_options: Vec<DeleteOptions>,
    patched_fields: Vec<Vec<&'static str>>,
}

impl<K: FakeModel> Default for FakeState<K> {
    fn default() -> Self {
        Self {
            objects: BTreeMap::new(),
            tokens: HashMap::new(),
            next_seq: 0,
            calls: HashMap::new(),
            faults: VecDeque::new(),
            lost_create_responses: 0,
            sub_resource_counts: VecDeque::new(),
            last_sub_resource_count: 0,
            delete_options: Vec::new(),
            patched_fields: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct Behaviour {
    visibility_delay: u32,
    settle_after: Option<u32>,
    linger_reads: u32,
    latency: Duration,
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            visibility_delay: 0,
            settle_after: Some(0),
            linger_reads: 0,
            latency: Duration::ZERO,
        }
    }
}

/// In-memory remote for one resource kind.
///
/// By default objects are visible immediately, settle on the first
/// read, and vanish as soon as they are deleted.
pub struct FakeRemote<K: FakeModel> {
    state: Mutex<FakeState<K>>,
    behaviour: Behaviour,
}

impl<K: FakeModel> Default for FakeRemote<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: FakeModel> FakeRemote<K> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            behaviour: Behaviour::default(),
        }
    }

    /// New objects read as not-found for the first `reads` reads.
    pub fn with_visibility_delay(mut self, reads: u32) -> Self {
        self.behaviour.visibility_delay = reads;
        self
    }

    /// Created or updated objects stay transitional for `reads` reads.
    pub fn with_settle_after(mut self, reads: u32) -> Self {
        self.behaviour.settle_after = Some(reads);
        self
    }

    /// Objects never leave their transitional state.
    pub fn never_settle(mut self) -> Self {
        self.behaviour.settle_after = None;
        self
    }

    /// Deleted objects stay readable, in their deleted state, for
    /// `reads` reads.
    pub fn with_linger_reads(mut self, reads: u32) -> Self {
        self.behaviour.linger_reads = reads;
        self
    }

    /// Every call sleeps for `latency` before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.behaviour.latency = latency;
        self
    }

    /// Fail the next `op` call with `err`.
    pub fn fail_next(&self, op: Op, err: ApiError) {
        self.state().faults.push_back((op, err));
    }

    /// The next create succeeds on the server but the caller sees a
    /// transient error.
    pub fn lose_next_create_response(&self) {
        self.state().lost_create_responses += 1;
    }

    /// Answer sub-resource count calls from `counts` in order. The last
    /// value repeats once the script is exhausted.
    pub fn script_sub_resource_counts(&self, counts: impl IntoIterator<Item = usize>) {
        let mut state = self.state();
        state.sub_resource_counts = counts.into_iter().collect();
    }

    /// Delete an object behind the reconciler's back.
    pub fn remove(&self, handle: &ResourceHandle) -> bool {
        self.state().objects.remove(handle.as_str()).is_some()
    }

    /// Answer the next `reads` reads of an existing object with
    /// not-found, as a lagging replica would.
    pub fn hide_for(&self, handle: &ResourceHandle, reads: u32) -> bool {
        match self.state().objects.get_mut(handle.as_str()) {
            Some(entry) => {
                entry.hidden_reads = reads;
                true
            }
            None => false,
        }
    }

    /// Change an object behind the reconciler's back.
    pub fn mutate(&self, handle: &ResourceHandle, f: impl FnOnce(&mut K::Object)) -> bool {
        match self.state().objects.get_mut(handle.as_str()) {
            Some(entry) => {
                f(&mut entry.object);
                true
            }
            None => false,
        }
    }

    pub fn object(&self, handle: &ResourceHandle) -> Option<K::Object> {
        self.state()
            .objects
            .get(handle.as_str())
            .map(|e| e.object.clone())
    }

    /// Number of objects that exist and are not deleted.
    pub fn live_objects(&self) -> usize {
        self.state().objects.values().filter(|e| !e.deleted).count()
    }

    pub fn calls(&self, op: Op) -> usize {
        self.state().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.state().calls.values().sum()
    }

    /// Fields carried by each update, in call order.
    pub fn patched_fields(&self) -> Vec<Vec<&'static str>> {
        self.state().patched_fields.clone()
    }

    /// Options passed to each delete, in call order.
    pub fn delete_options(&self) -> Vec<DeleteOptions> {
        self.state().delete_options.clone()
    }

    fn state(&self) -> MutexGuard<'_, FakeState<K>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn enter(&self, op: Op) -> Result<(), ApiError> {
        if !self.behaviour.latency.is_zero() {
            tokio::time::sleep(self.behaviour.latency).await;
        }

        let mut state = self.state();
        *state.calls.entry(op).or_default() += 1;
        let fault = state
            .faults
            .iter()
            .position(|(o, _)| *o == op)
            .and_then(|pos| state.faults.remove(pos));
        match fault {
            Some((_, err)) => {
                debug!(kind = K::NAME, ?op, %err, "Injected fault");
                Err(err)
            }
            None => Ok(()),
        }
    }
}

fn to_handle(id: &str) -> Result<ResourceHandle, ApiError> {
    ResourceHandle::parse(id).map_err(|e| ApiError::rejected("InvalidIdentifier", e.to_string()))
}

fn not_found(handle: &ResourceHandle) -> ApiError {
    ApiError::not_found(handle.as_str())
}

#[async_trait]
impl<K: FakeModel> RemoteApi<K> for FakeRemote<K> {
    async fn create(
        &self,
        token: &ClientToken,
        request: &K::Request,
    ) -> Result<(ResourceHandle, K::Object), ApiError> {
        self.enter(Op::Create).await?;
        let mut state = self.state();

        if let Some(id) = state.tokens.get(token).cloned() {
            if let Some(entry) = state.objects.get(&id) {
                debug!(kind = K::NAME, id = %id, "Replayed create");
                return Ok((to_handle(&id)?, entry.object.clone()));
            }
        }

        state.next_seq += 1;
        let id = K::assign_id(state.next_seq, request);
        if state.objects.contains_key(&id) {
            return Err(ApiError::rejected(
                "ConflictException",
                format!("{id} already exists"),
            ));
        }
        let handle = to_handle(&id)?;

        let object = K::materialize(&id, request);
        state.objects.insert(
            id.clone(),
            Entry {
                object: object.clone(),
                hidden_reads: self.behaviour.visibility_delay,
                pending_reads: self.behaviour.settle_after,
                deleted: false,
                linger_reads: 0,
            },
        );
        state.tokens.insert(*token, id);

        if state.lost_create_responses > 0 {
            state.lost_create_responses -= 1;
            return Err(ApiError::transient("RequestTimeout", "response lost"));
        }
        Ok((handle, object))
    }

    async fn read(&self, handle: &ResourceHandle) -> Result<K::Object, ApiError> {
        self.enter(Op::Read).await?;
        let mut state = self.state();

        let entry = state
            .objects
            .get_mut(handle.as_str())
            .ok_or_else(|| not_found(handle))?;

        if entry.hidden_reads > 0 {
            entry.hidden_reads -= 1;
            return Err(not_found(handle));
        }

        if entry.deleted {
            if entry.linger_reads == 0 {
                state.objects.remove(handle.as_str());
                return Err(not_found(handle));
            }
            entry.linger_reads -= 1;
            return Ok(entry.object.clone());
        }

        match entry.pending_reads {
            Some(0) => K::settle(&mut entry.object),
            Some(n) => entry.pending_reads = Some(n - 1),
            None => {}
        }
        Ok(entry.object.clone())
    }

    async fn update(
        &self,
        handle: &ResourceHandle,
        patch: &K::Patch,
    ) -> Result<K::Object, ApiError> {
        self.enter(Op::Update).await?;
        let mut state = self.state();

        let settle_after = self.behaviour.settle_after;
        let entry = state
            .objects
            .get_mut(handle.as_str())
            .filter(|e| !e.deleted)
            .ok_or_else(|| not_found(handle))?;
        K::apply_patch(&mut entry.object, patch);
        entry.pending_reads = settle_after;
        let object = entry.object.clone();

        state.patched_fields.push(K::patched_fields(patch));
        Ok(object)
    }

    async fn delete(&self, handle: &ResourceHandle, opts: &DeleteOptions) -> Result<(), ApiError> {
        self.enter(Op::Delete).await?;
        let mut state = self.state();

        let linger_reads = self.behaviour.linger_reads;
        let entry = state
            .objects
            .get_mut(handle.as_str())
            .filter(|e| !e.deleted)
            .ok_or_else(|| not_found(handle))?;
        K::mark_deleted(&mut entry.object, opts);
        entry.deleted = true;
        entry.linger_reads = linger_reads;
        if linger_reads == 0 {
            state.objects.remove(handle.as_str());
        }

        state.delete_options.push(opts.clone());
        Ok(())
    }

    async fn sub_resource_count(&self, _handle: &ResourceHandle) -> Result<usize, ApiError> {
        self.enter(Op::SubResourceCount).await?;
        let mut state = self.state();

        if let Some(count) = state.sub_resource_counts.pop_front() {
            state.last_sub_resource_count = count;
        }
        Ok(state.last_sub_resource_count)
    }
}
