//! Cluster-scoped room state.
//!
//! [`ClusterService`] stores presentation sessions, recording entries, syncer
//! assignments and member records in [`DistributedState`]. Every read treats a
//! record whose owning node fails the [`LivenessProbe`] as stale: it is deleted
//! on the spot and reported as absent.
//!
//! Orphans that nobody reads are reclaimed by [`ClusterService::sweep`], run
//! periodically on every node, and by [`ClusterService::clear_node_state`] on
//! graceful shutdown.

pub mod keys;
pub mod models;

pub use models::{
    MemberRecord, PresentationNotice, PresentationSession, RecordingEntry, RecordingNotice,
    RecordingStatus, SyncerAssignment,
};

use crate::config::{
    DEFAULT_MEMBER_TTL_SECONDS, DEFAULT_PRESENTATION_TTL_SECONDS, DEFAULT_RECORDING_TTL_SECONDS,
    DEFAULT_SYNCER_TTL_SECONDS,
};
use crate::errors::BoardError;
use crate::observability::metrics;
use crate::presence::LivenessProbe;
use crate::store::DistributedState;
use common::types::{NodeId, RoomId, SocketId, UserId};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// TTLs applied to each record kind.
#[derive(Debug, Clone, Copy)]
pub struct StateTtls {
    pub presentation: Duration,
    pub recording: Duration,
    pub syncer: Duration,
    pub member: Duration,
}

impl Default for StateTtls {
    fn default() -> Self {
        Self {
            presentation: Duration::from_secs(DEFAULT_PRESENTATION_TTL_SECONDS),
            recording: Duration::from_secs(DEFAULT_RECORDING_TTL_SECONDS),
            syncer: Duration::from_secs(DEFAULT_SYNCER_TTL_SECONDS),
            member: Duration::from_secs(DEFAULT_MEMBER_TTL_SECONDS),
        }
    }
}

/// Records deleted by a sweep or a node-scoped clear, with their rooms.
#[derive(Debug, Default)]
pub struct ClearedState {
    pub presentations_cleared: Vec<(RoomId, PresentationSession)>,
    pub recordings_cleared: Vec<(RoomId, RecordingEntry)>,
    pub syncers_cleared: Vec<(RoomId, SyncerAssignment)>,
    pub members_cleared: Vec<(RoomId, MemberRecord)>,
}

impl ClearedState {
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn total(&self) -> usize {
        self.presentations_cleared.len()
            + self.recordings_cleared.len()
            + self.syncers_cleared.len()
            + self.members_cleared.len()
    }
}

/// Which owners a reclamation pass targets.
enum Reclaim<'a> {
    DeadNodes,
    Node(&'a NodeId),
}

/// Typed room state with lazy staleness eviction.
pub struct ClusterService {
    state: DistributedState,
    liveness: Arc<dyn LivenessProbe>,
    node_id: NodeId,
    ttls: StateTtls,
}

impl ClusterService {
    pub fn new(
        state: DistributedState,
        liveness: Arc<dyn LivenessProbe>,
        node_id: NodeId,
        ttls: StateTtls,
    ) -> Self {
        Self {
            state,
            liveness,
            node_id,
            ttls,
        }
    }

    /// The node this service writes records for.
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn state(&self) -> &DistributedState {
        &self.state
    }

    async fn owner_is_dead(&self, node_id: NodeId) -> bool {
        !self.liveness.is_alive(&node_id).await
    }

    // ------------------------------------------------------------------
    // Presentation
    // ------------------------------------------------------------------

    pub async fn get_presentation(
        &self,
        room_id: &RoomId,
    ) -> Result<Option<PresentationSession>, BoardError> {
        self.state
            .get_value_checked(
                &keys::room_key(room_id, keys::PRESENTATION_SUFFIX),
                |session: &PresentationSession| self.owner_is_dead(session.node_id.clone()),
            )
            .await
    }

    pub async fn set_presentation(
        &self,
        room_id: &RoomId,
        session: &PresentationSession,
    ) -> Result<(), BoardError> {
        self.state
            .set_value(
                &keys::room_key(room_id, keys::PRESENTATION_SUFFIX),
                session,
                Some(self.ttls.presentation),
            )
            .await
    }

    pub async fn clear_presentation(&self, room_id: &RoomId) -> Result<(), BoardError> {
        self.state
            .delete_value(&keys::room_key(room_id, keys::PRESENTATION_SUFFIX))
            .await
    }

    // ------------------------------------------------------------------
    // Recording
    // ------------------------------------------------------------------

    /// Live recording entries of a room, ordered by user id.
    pub async fn get_recording_state(
        &self,
        room_id: &RoomId,
    ) -> Result<Vec<RecordingEntry>, BoardError> {
        let entries = self
            .state
            .get_hash_checked(
                &keys::room_key(room_id, keys::RECORDINGS_SUFFIX),
                |_field: &str, entry: &RecordingEntry| self.owner_is_dead(entry.node_id.clone()),
            )
            .await?;
        Ok(entries.into_iter().map(|(_, entry)| entry).collect())
    }

    pub async fn get_recording_entry(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
    ) -> Result<Option<RecordingEntry>, BoardError> {
        self.state
            .get_hash_entry_checked(
                &keys::room_key(room_id, keys::RECORDINGS_SUFFIX),
                user_id.as_str(),
                |entry: &RecordingEntry| self.owner_is_dead(entry.node_id.clone()),
            )
            .await
    }

    pub async fn set_recording_entry(
        &self,
        room_id: &RoomId,
        entry: &RecordingEntry,
    ) -> Result<(), BoardError> {
        self.state
            .set_hash_entry(
                &keys::room_key(room_id, keys::RECORDINGS_SUFFIX),
                entry.user_id.as_str(),
                entry,
                Some(self.ttls.recording),
            )
            .await
    }

    /// Whether an entry exists for the user, without judging its owner's liveness.
    pub async fn has_recording_entry(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
    ) -> Result<bool, BoardError> {
        let entry: Option<RecordingEntry> = self
            .state
            .get_hash_entry(
                &keys::room_key(room_id, keys::RECORDINGS_SUFFIX),
                user_id.as_str(),
            )
            .await?;
        Ok(entry.is_some())
    }

    /// Write `entry` only if its user has no entry in the room. Among
    /// concurrent callers exactly one gets `true`.
    ///
    /// Like [`Self::try_set_syncer`], a stale entry blocks the write until a
    /// checked read evicts it.
    pub async fn try_set_recording_entry(
        &self,
        room_id: &RoomId,
        entry: &RecordingEntry,
    ) -> Result<bool, BoardError> {
        self.state
            .set_hash_entry_if_absent(
                &keys::room_key(room_id, keys::RECORDINGS_SUFFIX),
                entry.user_id.as_str(),
                entry,
                Some(self.ttls.recording),
            )
            .await
    }

    pub async fn remove_recording_entry(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
    ) -> Result<(), BoardError> {
        self.state
            .delete_hash_entry(
                &keys::room_key(room_id, keys::RECORDINGS_SUFFIX),
                user_id.as_str(),
            )
            .await
    }

    // ------------------------------------------------------------------
    // Syncer
    // ------------------------------------------------------------------

    pub async fn get_syncer(&self, room_id: &RoomId) -> Result<Option<SyncerAssignment>, BoardError> {
        self.state
            .get_value_checked(
                &keys::room_key(room_id, keys::SYNCER_SUFFIX),
                |syncer: &SyncerAssignment| self.owner_is_dead(syncer.node_id.clone()),
            )
            .await
    }

    /// Unconditional write. Elections must use [`Self::try_set_syncer`].
    pub async fn set_syncer(
        &self,
        room_id: &RoomId,
        syncer: &SyncerAssignment,
    ) -> Result<(), BoardError> {
        self.state
            .set_value(
                &keys::room_key(room_id, keys::SYNCER_SUFFIX),
                syncer,
                Some(self.ttls.syncer),
            )
            .await
    }

    /// Claim the syncer role if nobody holds it. Among concurrent callers for
    /// one room exactly one gets `true`.
    ///
    /// A stale holder blocks the claim until it is evicted, so callers read
    /// through [`Self::get_syncer`] first.
    #[instrument(skip_all, fields(room_id = %room_id, user_id = %syncer.user_id))]
    pub async fn try_set_syncer(
        &self,
        room_id: &RoomId,
        syncer: &SyncerAssignment,
    ) -> Result<bool, BoardError> {
        self.state
            .set_value_if_absent(
                &keys::room_key(room_id, keys::SYNCER_SUFFIX),
                syncer,
                Some(self.ttls.syncer),
            )
            .await
    }

    pub async fn clear_syncer(&self, room_id: &RoomId) -> Result<(), BoardError> {
        self.state
            .delete_value(&keys::room_key(room_id, keys::SYNCER_SUFFIX))
            .await
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    pub async fn add_member(&self, room_id: &RoomId, member: &MemberRecord) -> Result<(), BoardError> {
        self.state
            .set_hash_entry(
                &keys::room_key(room_id, keys::MEMBERS_SUFFIX),
                member.socket_id.as_str(),
                member,
                Some(self.ttls.member),
            )
            .await
    }

    pub async fn remove_member(
        &self,
        room_id: &RoomId,
        socket_id: &SocketId,
    ) -> Result<(), BoardError> {
        self.state
            .delete_hash_entry(
                &keys::room_key(room_id, keys::MEMBERS_SUFFIX),
                socket_id.as_str(),
            )
            .await
    }

    /// Live members of a room in join order.
    pub async fn get_members(&self, room_id: &RoomId) -> Result<Vec<MemberRecord>, BoardError> {
        let mut members: Vec<MemberRecord> = self
            .state
            .get_hash_checked(
                &keys::room_key(room_id, keys::MEMBERS_SUFFIX),
                |_field: &str, member: &MemberRecord| self.owner_is_dead(member.node_id.clone()),
            )
            .await?
            .into_iter()
            .map(|(_, member)| member)
            .collect();

        members.sort_by(|a, b| {
            a.joined_at
                .cmp(&b.joined_at)
                .then_with(|| a.socket_id.cmp(&b.socket_id))
        });
        Ok(members)
    }

    /// Delete timer and voting state of a room.
    pub async fn clear_room_features(&self, room_id: &RoomId) -> Result<(), BoardError> {
        self.state
            .delete_value(&keys::room_key(room_id, keys::TIMER_SUFFIX))
            .await?;
        self.state
            .delete_value(&keys::room_key(room_id, keys::VOTING_SUFFIX))
            .await
    }

    // ------------------------------------------------------------------
    // Reclamation
    // ------------------------------------------------------------------

    /// Delete every record owned by a node that is no longer alive.
    #[instrument(skip_all, fields(node_id = %self.node_id))]
    pub async fn sweep(&self) -> Result<ClearedState, BoardError> {
        let cleared = self.reclaim(Reclaim::DeadNodes).await?;

        metrics::record_sweep_cleared("presentation", cleared.presentations_cleared.len());
        metrics::record_sweep_cleared("recording", cleared.recordings_cleared.len());
        metrics::record_sweep_cleared("syncer", cleared.syncers_cleared.len());
        metrics::record_sweep_cleared("member", cleared.members_cleared.len());

        if !cleared.is_empty() {
            info!(
                target: "board.cluster",
                presentations = cleared.presentations_cleared.len(),
                recordings = cleared.recordings_cleared.len(),
                syncers = cleared.syncers_cleared.len(),
                members = cleared.members_cleared.len(),
                "Swept state owned by dead nodes"
            );
        }
        Ok(cleared)
    }

    /// Delete every record owned by `node_id`, alive or not.
    #[instrument(skip_all, fields(target_node = %node_id))]
    pub async fn clear_node_state(&self, node_id: &NodeId) -> Result<ClearedState, BoardError> {
        let cleared = self.reclaim(Reclaim::Node(node_id)).await?;
        info!(
            target: "board.cluster",
            node_id = %node_id,
            cleared = cleared.total(),
            "Cleared node-owned state"
        );
        Ok(cleared)
    }

    async fn reclaim(&self, scope: Reclaim<'_>) -> Result<ClearedState, BoardError> {
        let mut verdicts: HashMap<NodeId, bool> = HashMap::new();
        let mut cleared = ClearedState::default();

        for (room_id, key) in self.room_keys(keys::PRESENTATION_SUFFIX).await? {
            let Some(session) = self.state.get_value::<PresentationSession>(&key).await? else {
                continue;
            };
            if self.targets(&scope, &session.node_id, &mut verdicts).await {
                self.state.delete_value(&key).await?;
                cleared.presentations_cleared.push((room_id, session));
            }
        }

        for (room_id, key) in self.room_keys(keys::SYNCER_SUFFIX).await? {
            let Some(syncer) = self.state.get_value::<SyncerAssignment>(&key).await? else {
                continue;
            };
            if self.targets(&scope, &syncer.node_id, &mut verdicts).await {
                self.state.delete_value(&key).await?;
                cleared.syncers_cleared.push((room_id, syncer));
            }
        }

        for (room_id, key, field, entry) in self
            .hash_fields::<RecordingEntry>(keys::RECORDINGS_SUFFIX)
            .await?
        {
            if self.targets(&scope, &entry.node_id, &mut verdicts).await {
                self.state.delete_hash_entry(&key, &field).await?;
                cleared.recordings_cleared.push((room_id, entry));
            }
        }

        for (room_id, key, field, member) in
            self.hash_fields::<MemberRecord>(keys::MEMBERS_SUFFIX).await?
        {
            if self.targets(&scope, &member.node_id, &mut verdicts).await {
                self.state.delete_hash_entry(&key, &field).await?;
                cleared.members_cleared.push((room_id, member));
            }
        }

        Ok(cleared)
    }

    /// Whether a record owned by `owner` falls in `scope`. Liveness verdicts
    /// are cached for the duration of one pass.
    async fn targets(
        &self,
        scope: &Reclaim<'_>,
        owner: &NodeId,
        verdicts: &mut HashMap<NodeId, bool>,
    ) -> bool {
        match scope {
            Reclaim::Node(target) => owner == *target,
            Reclaim::DeadNodes => {
                if let Some(dead) = verdicts.get(owner) {
                    return *dead;
                }
                let dead = !self.liveness.is_alive(owner).await;
                if dead {
                    debug!(target: "board.cluster", owner = %owner, "Owner node is dead");
                }
                verdicts.insert(owner.clone(), dead);
                dead
            }
        }
    }

    async fn room_keys(&self, suffix: &str) -> Result<Vec<(RoomId, String)>, BoardError> {
        let pattern = keys::all_rooms_pattern(suffix);
        let found = if suffix == keys::RECORDINGS_SUFFIX || suffix == keys::MEMBERS_SUFFIX {
            self.state.list_hash_keys(&pattern).await?
        } else {
            self.state.list_value_keys(&pattern).await?
        };
        Ok(found
            .into_iter()
            .filter_map(|key| keys::room_from_key(&key, suffix).map(|room_id| (room_id, key)))
            .collect())
    }

    async fn hash_fields<T: DeserializeOwned>(
        &self,
        suffix: &str,
    ) -> Result<Vec<(RoomId, String, String, T)>, BoardError> {
        let mut fields = Vec::new();
        for (room_id, key) in self.room_keys(suffix).await? {
            for (field, value) in self.state.get_hash::<T>(&key).await? {
                fields.push((room_id.clone(), key.clone(), field, value));
            }
        }
        Ok(fields)
    }
}
