//! Assignment cycle: pool rebuild and round-robin distribution.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rand::seq::SliceRandom;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::config::AssignerConfig;
use crate::error::AssignerError;
use crate::models::{AssignmentType, Team, TeamMember, User};
use crate::store::{ConversationStore, TeamStore};

use super::balancer::RoundRobinPool;

/// Per-team pools and caps. One mutex guards both maps; it is held only
/// while rebuilding and while pulling an id, never across store I/O.
#[derive(Default)]
struct PoolState {
    pools: HashMap<i64, RoundRobinPool>,
    max_auto_assignments: HashMap<i64, usize>,
}

/// Assigns unassigned conversations to team members in round-robin order.
pub struct AutoAssigner {
    config: AssignerConfig,
    team_store: Arc<dyn TeamStore>,
    conversation_store: Arc<dyn ConversationStore>,
    /// Actor assignments are attributed to.
    system_user: User,
    state: Mutex<PoolState>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl AutoAssigner {
    pub fn new(
        config: AssignerConfig,
        team_store: Arc<dyn TeamStore>,
        conversation_store: Arc<dyn ConversationStore>,
        system_user: User,
    ) -> Self {
        Self {
            config,
            team_store,
            conversation_store,
            system_user,
            state: Mutex::new(PoolState::default()),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the assignment loop: every interval, rebuild the pools from
    /// current membership and distribute unassigned conversations.
    pub fn start(self: &Arc<Self>, parent: &CancellationToken) {
        let assigner = Arc::clone(self);
        let token = parent.child_token();
        let interval = self.config.interval;
        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = ticker.tick() => {
                        if let Err(e) = assigner.reload_pools().await {
                            error!(error = %e, "error reloading assignment pools");
                        }
                        if let Err(e) = assigner.assign_conversations().await {
                            error!(error = %e, "error assigning conversations");
                        }
                    }
                }
            }
        });
        self.handles.lock().unwrap().push(handle);
    }

    /// Wait for the assignment loop to stop. Cancel the token passed to
    /// [`start`](Self::start) first.
    pub async fn close(&self) {
        let handles: Vec<_> = self.handles.lock().unwrap().drain(..).collect();
        futures::future::join_all(handles).await;
    }

    /// Rebuild every round-robin team's pool from current membership.
    ///
    /// Members are shuffled each cycle so a restart doesn't keep handing the
    /// first conversation to the same agent; existing pool entries keep
    /// their rotation position.
    pub async fn reload_pools(&self) -> Result<(), AssignerError> {
        let teams = self.team_store.get_all().await?;

        // Fetch membership for every pooled team before taking the lock.
        let mut memberships: Vec<(Team, Vec<TeamMember>)> = Vec::new();
        for team in teams {
            if team.assignment_type != AssignmentType::RoundRobin {
                continue;
            }
            match self.team_store.members(team.id).await {
                Ok(mut members) => {
                    members.shuffle(&mut rand::thread_rng());
                    memberships.push((team, members));
                }
                Err(e) => {
                    error!(team_id = team.id, error = %e, "error fetching team members");
                    continue;
                }
            }
        }

        let mut state = self.state.lock().unwrap();
        for (team, members) in memberships {
            let pool = state.pools.entry(team.id).or_default();

            let mut eligible: Vec<i64> = Vec::with_capacity(members.len());
            for member in &members {
                if member.availability_status.excluded_from_assignment() {
                    debug!(
                        team_id = team.id,
                        user_id = member.user_id,
                        status = ?member.availability_status,
                        "member is away, excluded from assignment pool"
                    );
                    continue;
                }
                eligible.push(member.user_id);
                if !pool.contains(member.user_id) {
                    // Weight 1: plain fair rotation within the team.
                    let _ = pool.add(member.user_id, 1);
                    debug!(team_id = team.id, user_id = member.user_id, "added member to assignment pool");
                }
            }

            // Drop entries for members no longer eligible.
            for id in pool.item_ids() {
                if !eligible.contains(&id) {
                    pool.remove(id);
                    debug!(team_id = team.id, user_id = id, "removed member from assignment pool");
                }
            }

            state
                .max_auto_assignments
                .insert(team.id, team.max_auto_assigned_conversations);
        }
        Ok(())
    }

    /// Assign team-routed, user-unassigned conversations from the pools.
    /// Individual failures are logged and skipped, never abort the batch.
    pub async fn assign_conversations(&self) -> Result<(), AssignerError> {
        let unassigned = self.conversation_store.unassigned_conversations().await?;

        if !unassigned.is_empty() {
            debug!(count = unassigned.len(), "found unassigned conversations");
        }

        for conversation in unassigned {
            let Some(team_id) = conversation.assigned_team_id else {
                continue;
            };

            let (user_id, team_cap) = match self.next_from_pool(team_id) {
                Ok(pick) => pick,
                Err(AssignerError::TeamPoolNotFound { .. }) => continue,
                Err(e) => {
                    error!(conversation_uuid = %conversation.uuid, error = %e, "error pulling user from assignment pool");
                    continue;
                }
            };

            let active = match self
                .conversation_store
                .active_conversation_count(user_id)
                .await
            {
                Ok(count) => count,
                Err(e) => {
                    error!(user_id, error = %e, "error fetching active conversation count");
                    continue;
                }
            };

            // 0 means unlimited.
            if team_cap != 0 && active >= team_cap {
                debug!(
                    user_id,
                    active,
                    cap = team_cap,
                    "user at max auto-assigned conversations, skipping"
                );
                continue;
            }

            if let Err(e) = self
                .conversation_store
                .update_user_assignee(conversation.uuid, user_id, &self.system_user)
                .await
            {
                error!(conversation_uuid = %conversation.uuid, error = %e, "error assigning conversation");
            }
        }
        Ok(())
    }

    /// Pull the next user id from a team's pool together with the team cap.
    /// The lock is released before any store call.
    fn next_from_pool(&self, team_id: i64) -> Result<(i64, usize), AssignerError> {
        let mut state = self.state.lock().unwrap();
        let cap = state.max_auto_assignments.get(&team_id).copied().unwrap_or(0);
        let pool = state
            .pools
            .get_mut(&team_id)
            .ok_or(AssignerError::TeamPoolNotFound { team_id })?;
        let user_id = pool.get().ok_or(AssignerError::EmptyPool { team_id })?;
        Ok((user_id, cap))
    }
}
