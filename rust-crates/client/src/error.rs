use crate::{
    orchestrator::TxKind,
    types::{
        RoundId,
        TeamId,
        TxHash,
    },
};
use thiserror::Error;

/// Failure of a single remote call.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("contract reverted: {0}")]
    ChainRevert(String),
    #[error("network failure: {0}")]
    NetworkTimeout(String),
    /// Arguments or return data did not match the contract abi.
    #[error("abi encoding failed: {0}")]
    Encoding(String),
}

/// Resolved outcome of a rejected or failed transaction request.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FailureKind {
    #[error("contract reverted: {0}")]
    ChainRevert(String),
    #[error("network failure: {0}")]
    NetworkTimeout(String),
    #[error("abi encoding failed: {0}")]
    Encoding(String),
    #[error("a {0:?} transaction is already pending")]
    AlreadyPending(TxKind),
    #[error("team {0} is not a valid selection")]
    InvalidTeam(TeamId),
    #[error("invalid name: {0}")]
    InvalidName(String),
    #[error("purchase amount must be greater than zero")]
    InvalidAmount,
    #[error("invalid affiliate: {0}")]
    InvalidAffiliate(String),
    #[error("all vaults are empty")]
    NothingToWithdraw,
    #[error("round {requested} is not open (current round {current})")]
    StaleRound { requested: RoundId, current: RoundId },
    #[error("no account connected")]
    NoAccount,
    #[error("transaction {0:?} was not confirmed in time")]
    ConfirmationTimeout(TxHash),
    #[error("session closed")]
    SessionClosed,
}

impl From<GatewayError> for FailureKind {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::ChainRevert(reason) => FailureKind::ChainRevert(reason),
            GatewayError::NetworkTimeout(reason) => FailureKind::NetworkTimeout(reason),
            GatewayError::Encoding(reason) => FailureKind::Encoding(reason),
        }
    }
}
