use crate::{
    error::GatewayError,
    gateway::GameGateway,
    types::{
        RoundId,
        RoundInfo,
        RoundState,
        TeamId,
        U256,
    },
};
use std::{
    fmt,
    mem,
};
use tokio::sync::oneshot;
use tracing::{
    debug,
    info,
    warn,
};

#[cfg(test)]
mod tests;

pub type RoundListener = Box<dyn Fn(&RoundState) + Send + Sync>;

/// What applying a read or event did to the current round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoundUpdate {
    Unchanged,
    Updated,
    NewRound { previous: RoundId },
    Ignored,
    Failed(GatewayError),
}

impl RoundUpdate {
    pub fn is_new_round(&self) -> bool {
        matches!(self, RoundUpdate::NewRound { .. })
    }
}

#[derive(Debug)]
pub struct RefreshOutcome {
    pub update: RoundUpdate,
    /// A follow-up read must be started now.
    pub follow_up: bool,
}

/// Owner of the local round mirror.
///
/// Reads are driven from outside: `begin_refresh` tells the caller whether
/// to start a read and `finish_refresh` applies it. Concurrent requests
/// share the in-flight read unless they ask for a fresh one, which queues a
/// single follow-up.
#[derive(Default)]
pub struct RoundSynchronizer {
    current: RoundState,
    deadline_fired_for: Option<u64>,
    in_flight: bool,
    waiters: Vec<oneshot::Sender<RoundState>>,
    rerun: bool,
    rerun_waiters: Vec<oneshot::Sender<RoundState>>,
    listeners: Vec<RoundListener>,
}

impl fmt::Debug for RoundSynchronizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoundSynchronizer")
            .field("current", &self.current)
            .field("deadline_fired_for", &self.deadline_fired_for)
            .field("in_flight", &self.in_flight)
            .field("rerun", &self.rerun)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl RoundSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_round(&self) -> &RoundState {
        &self.current
    }

    pub fn on_round_changed(&mut self, listener: RoundListener) {
        self.listeners.push(listener);
    }

    pub fn is_refreshing(&self) -> bool {
        self.in_flight
    }

    /// Registers interest in a round read. Returns `true` when the caller
    /// must start the read. With `fresh` set, a read already in flight is
    /// not reused and exactly one follow-up is queued behind it.
    pub fn begin_refresh(
        &mut self,
        waiter: Option<oneshot::Sender<RoundState>>,
        fresh: bool,
    ) -> bool {
        if !self.in_flight {
            self.in_flight = true;
            self.waiters.extend(waiter);
            return true;
        }
        if fresh {
            self.rerun = true;
            self.rerun_waiters.extend(waiter);
        } else {
            self.waiters.extend(waiter);
        }
        false
    }

    pub fn finish_refresh(
        &mut self,
        result: Result<RoundInfo, GatewayError>,
        active_team: TeamId,
    ) -> RefreshOutcome {
        let update = match result {
            Ok(info) => self.apply_info(&info, active_team),
            Err(err) => {
                warn!(?err, round_id = self.current.round_id, "round refresh failed");
                RoundUpdate::Failed(err)
            }
        };

        for waiter in mem::take(&mut self.waiters) {
            let _ = waiter.send(self.current.clone());
        }

        let follow_up = mem::take(&mut self.rerun);
        if follow_up {
            self.waiters = mem::take(&mut self.rerun_waiters);
        } else {
            self.in_flight = false;
        }
        RefreshOutcome { update, follow_up }
    }

    /// Applies an authoritative `round_` read.
    pub fn apply_info(&mut self, info: &RoundInfo, active_team: TeamId) -> RoundUpdate {
        if info.round_id < self.current.round_id {
            debug!(
                read = info.round_id,
                current = self.current.round_id,
                "ignoring read of an older round"
            );
            return RoundUpdate::Ignored;
        }
        let mut next = RoundState::from_info(info, active_team);
        if info.round_id > self.current.round_id {
            let previous = self.current.round_id;
            self.replace(next);
            return RoundUpdate::NewRound { previous };
        }
        // An ended round stays ended; a lagging read cannot reopen it.
        if self.current.ended && !next.ended {
            match (self.current.winner_team_id, self.current.winner_id) {
                (Some(team), Some(winner)) => next.settle(team, winner, active_team),
                _ => next.ended = true,
            }
        }
        if next == self.current {
            return RoundUpdate::Unchanged;
        }
        if next.end_time != self.current.end_time {
            debug!(
                round_id = next.round_id,
                end_time = next.end_time,
                "round end time moved"
            );
        }
        self.current = next;
        RoundUpdate::Updated
    }

    /// Applies a `NewRound` event. Only a higher round id moves the mirror.
    pub fn apply_new_round(
        &mut self,
        round_id: RoundId,
        start_time: u64,
        end_time: u64,
    ) -> RoundUpdate {
        if round_id <= self.current.round_id {
            return RoundUpdate::Ignored;
        }
        let previous = self.current.round_id;
        self.replace(RoundState::announced(round_id, start_time, end_time));
        RoundUpdate::NewRound { previous }
    }

    /// Applies a `RoundEnded` event for the current round.
    pub fn apply_round_ended(
        &mut self,
        round_id: RoundId,
        winner_team_id: TeamId,
        winner_id: U256,
        active_team: TeamId,
    ) -> RoundUpdate {
        if round_id != self.current.round_id {
            return RoundUpdate::Ignored;
        }
        let before = self.current.clone();
        self.current.settle(winner_team_id, winner_id, active_team);
        if before == self.current {
            RoundUpdate::Unchanged
        } else {
            info!(round_id, winner_team_id, %winner_id, "round ended");
            RoundUpdate::Updated
        }
    }

    /// Recomputes `is_winner` after the local team selection changed.
    pub fn rescore(&mut self, active_team: TeamId) {
        if let Some(winner_team) = self.current.winner_team_id {
            self.current.is_winner = active_team != 0 && winner_team == active_team;
        }
    }

    /// Whether the round id and end time must be polled.
    pub fn needs_polling(&self) -> bool {
        let round = &self.current;
        round.end_time == 0 || round.ended || self.deadline_fired_for == Some(round.end_time)
    }

    /// End time the deadline timer should be armed for, if any.
    pub fn deadline(&self) -> Option<u64> {
        let round = &self.current;
        if round.end_time == 0 || round.ended || self.deadline_fired_for == Some(round.end_time) {
            None
        } else {
            Some(round.end_time)
        }
    }

    pub fn mark_deadline_fired(&mut self) {
        self.deadline_fired_for = Some(self.current.end_time);
    }

    fn replace(&mut self, next: RoundState) {
        info!(
            previous = self.current.round_id,
            round_id = next.round_id,
            end_time = next.end_time,
            "new round"
        );
        self.current = next;
        self.deadline_fired_for = None;
        for listener in &self.listeners {
            listener(&self.current);
        }
    }
}

/// Reads the current round id and its metadata in one cycle.
pub async fn fetch_round<G: GameGateway>(gateway: &G) -> Result<RoundInfo, GatewayError> {
    let round_id = gateway.current_round_id().await?;
    gateway.round_info(round_id).await
}

/// Drives one standalone refresh against `gateway`.
pub async fn refresh<G: GameGateway>(
    synchronizer: &mut RoundSynchronizer,
    gateway: &G,
    active_team: TeamId,
) -> RoundUpdate {
    if !synchronizer.begin_refresh(None, true) {
        return RoundUpdate::Unchanged;
    }
    let mut outcome = synchronizer.finish_refresh(fetch_round(gateway).await, active_team);
    while outcome.follow_up {
        outcome = synchronizer.finish_refresh(fetch_round(gateway).await, active_team);
    }
    outcome.update
}
