use serde::{
    Deserialize,
    Serialize,
};
use std::collections::BTreeSet;

pub use ethers::types::{
    Address,
    H256 as TxHash,
    U256,
};

pub type RoundId = u64;
pub type TeamId = u64;

/// Local mirror of one round of the game contract.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoundState {
    pub round_id: RoundId,
    pub start_time: u64,
    pub end_time: u64,
    pub ended: bool,
    pub winner_id: Option<U256>,
    pub winner_team_id: Option<TeamId>,
    pub pot: U256,
    pub puffs: U256,
    pub eth: U256,
    pub mask: U256,
    pub is_winner: bool,
}

impl RoundState {
    /// Fresh state for a round announced by an event, before its metadata is read.
    pub fn announced(round_id: RoundId, start_time: u64, end_time: u64) -> Self {
        Self {
            round_id,
            start_time,
            end_time,
            ..Default::default()
        }
    }

    pub fn from_info(info: &RoundInfo, active_team: TeamId) -> Self {
        let mut state = Self {
            round_id: info.round_id,
            start_time: info.start_time,
            end_time: info.end_time,
            ended: false,
            winner_id: None,
            winner_team_id: None,
            pot: info.pot,
            puffs: info.puffs,
            eth: info.eth,
            mask: info.mask,
            is_winner: false,
        };
        if info.ended {
            state.settle(info.leader_team, info.leader_id, active_team);
        }
        state
    }

    /// Marks the round over with the given winners.
    pub fn settle(&mut self, winner_team_id: TeamId, winner_id: U256, active_team: TeamId) {
        self.ended = true;
        self.winner_team_id = Some(winner_team_id);
        self.winner_id = Some(winner_id);
        self.is_winner = active_team != 0 && winner_team_id == active_team;
    }

    pub fn is_over_at(&self, now: u64) -> bool {
        self.ended || (self.end_time != 0 && now > self.end_time)
    }
}

/// Raw `round_` read. The leader fields name the winner once `ended` is set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoundInfo {
    pub round_id: RoundId,
    pub start_time: u64,
    pub end_time: u64,
    pub ended: bool,
    pub leader_id: U256,
    pub leader_team: TeamId,
    pub pot: U256,
    pub puffs: U256,
    pub eth: U256,
    pub mask: U256,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlayerState {
    pub eth: U256,
    pub puffs: U256,
    pub mask: U256,
    pub winning_vault: U256,
    pub general_vault: U256,
    pub affiliate_vault: U256,
    pub nfts: BTreeSet<U256>,
    pub player_names: Vec<String>,
}

impl PlayerState {
    pub fn has_vault_balance(&self) -> bool {
        !(self.winning_vault.is_zero()
            && self.general_vault.is_zero()
            && self.affiliate_vault.is_zero())
    }

    pub fn owns_name(&self, name: &str) -> bool {
        self.player_names
            .iter()
            .any(|owned| owned.eq_ignore_ascii_case(name))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlayerRoundBalances {
    pub eth: U256,
    pub puffs: U256,
    pub mask: U256,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Vaults {
    pub winning: U256,
    pub general: U256,
    pub affiliate: U256,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TeamSelection {
    pub active_team: TeamId,
}

impl TeamSelection {
    pub fn reset(&mut self) {
        self.active_team = 0;
    }
}

/// Optional referrer attached to a purchase or name registration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Affiliate {
    pub address: Option<Address>,
    pub name: Option<String>,
    pub id: Option<U256>,
}

impl Affiliate {
    pub fn by_address(address: Address) -> Self {
        Self {
            address: Some(address),
            ..Default::default()
        }
    }

    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn by_id(id: impl Into<U256>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.address.is_none() && self.name.is_none() && self.id.is_none()
    }
}

/// Contract entry point chosen from the affiliate metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AffiliateRoute {
    Address(Address),
    Id(U256),
    Name(String),
}

impl Default for AffiliateRoute {
    fn default() -> Self {
        AffiliateRoute::Address(Address::zero())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuyOrder {
    pub team: TeamId,
    pub eth: U256,
    pub affiliate: AffiliateRoute,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NameOrder {
    pub name: String,
    pub affiliate: AffiliateRoute,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
    pub gas_used: Option<U256>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GameEvent {
    Purchase {
        account: Address,
        round_id: RoundId,
        team: TeamId,
        eth: U256,
        puffs: U256,
    },
    RoundEnded {
        round_id: RoundId,
        winner_team_id: TeamId,
        winner_id: U256,
    },
    NewRound {
        round_id: RoundId,
        start_time: u64,
        end_time: u64,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventRecord {
    pub event: GameEvent,
    pub block_number: u64,
    pub log_index: u64,
    pub tx_hash: TxHash,
}

impl EventRecord {
    pub fn position(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }
}
