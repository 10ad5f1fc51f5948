use crate::{
    error::GatewayError,
    gateway::GameGateway,
    types::{
        Address,
        PlayerState,
        RoundId,
    },
};
use std::mem;
use tokio::sync::oneshot;
use tracing::{
    debug,
    warn,
};

#[cfg(test)]
mod tests;

/// Identifies one fetch cycle started by the tracker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FetchTicket {
    pub generation: u64,
    pub account: Address,
    pub round_id: RoundId,
}

struct Waiter {
    min_generation: u64,
    reply: oneshot::Sender<PlayerState>,
}

/// Per-account balances, replaced only by whole fetch cycles.
///
/// A refresh requested while a fetch is in flight is coalesced into one
/// follow-up that starts after it, so every requester sees a read issued
/// after its request.
pub struct PlayerTracker {
    account: Option<Address>,
    current: PlayerState,
    in_flight: Option<FetchTicket>,
    dirty: bool,
    next_generation: u64,
    waiters: Vec<Waiter>,
}

impl PlayerTracker {
    pub fn new(account: Option<Address>) -> Self {
        Self {
            account,
            current: PlayerState::default(),
            in_flight: None,
            dirty: false,
            next_generation: 0,
            waiters: Vec::new(),
        }
    }

    pub fn account(&self) -> Option<Address> {
        self.account
    }

    pub fn current_player(&self) -> &PlayerState {
        &self.current
    }

    pub fn is_fetching(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Asks for a refresh. Returns the ticket of a fetch the caller must
    /// start, or `None` when the request rides on an existing cycle.
    pub fn request_refresh(
        &mut self,
        round_id: RoundId,
        reply: Option<oneshot::Sender<PlayerState>>,
    ) -> Option<FetchTicket> {
        let Some(account) = self.account else {
            if let Some(reply) = reply {
                let _ = reply.send(PlayerState::default());
            }
            return None;
        };
        if self.in_flight.is_some() {
            self.dirty = true;
            if let Some(reply) = reply {
                self.waiters.push(Waiter {
                    min_generation: self.next_generation,
                    reply,
                });
            }
            return None;
        }
        let ticket = self.start(account, round_id);
        if let Some(reply) = reply {
            self.waiters.push(Waiter {
                min_generation: ticket.generation,
                reply,
            });
        }
        Some(ticket)
    }

    /// Applies a completed fetch. Returns the ticket of a follow-up fetch
    /// the caller must start, if one was requested meanwhile.
    pub fn finish_refresh(
        &mut self,
        ticket: FetchTicket,
        result: Result<PlayerState, GatewayError>,
        current_round: RoundId,
    ) -> Option<FetchTicket> {
        if self.in_flight != Some(ticket) {
            debug!(generation = ticket.generation, "dropping unknown player fetch");
            return None;
        }
        self.in_flight = None;

        match result {
            Ok(_) if ticket.round_id != current_round => {
                debug!(
                    fetched_for = ticket.round_id,
                    current_round, "discarding player fetch for a previous round"
                );
                self.dirty = true;
            }
            Ok(state) => {
                self.current = state;
                self.reply_up_to(ticket.generation);
            }
            Err(err) => {
                warn!(?err, round_id = ticket.round_id, "player refresh failed");
                self.reply_up_to(ticket.generation);
            }
        }

        if mem::take(&mut self.dirty) {
            Some(self.start(ticket.account, current_round))
        } else {
            None
        }
    }

    fn start(&mut self, account: Address, round_id: RoundId) -> FetchTicket {
        let ticket = FetchTicket {
            generation: self.next_generation,
            account,
            round_id,
        };
        self.next_generation += 1;
        self.in_flight = Some(ticket);
        ticket
    }

    fn reply_up_to(&mut self, generation: u64) {
        let (ready, waiting): (Vec<_>, Vec<_>) = mem::take(&mut self.waiters)
            .into_iter()
            .partition(|waiter| waiter.min_generation <= generation);
        self.waiters = waiting;
        for waiter in ready {
            let _ = waiter.reply.send(self.current.clone());
        }
    }
}

/// One cohesive read of everything the tracker mirrors.
pub async fn fetch_player<G: GameGateway>(
    gateway: &G,
    account: Address,
    round_id: RoundId,
) -> Result<PlayerState, GatewayError> {
    let player_id = gateway.player_id(account).await?;
    let mut state = PlayerState::default();
    if !player_id.is_zero() {
        let balances = gateway.player_round(player_id, round_id).await?;
        let vaults = gateway.player_vaults(player_id).await?;
        state.eth = balances.eth;
        state.puffs = balances.puffs;
        state.mask = balances.mask;
        state.winning_vault = vaults.winning;
        state.general_vault = vaults.general;
        state.affiliate_vault = vaults.affiliate;
    }
    state.nfts = gateway.owned_nfts(account).await?.into_iter().collect();
    state.player_names = gateway.player_names(account).await?;
    Ok(state)
}
