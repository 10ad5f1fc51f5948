#![allow(non_snake_case)]

use super::*;
use crate::{
    test_helpers::FakeGateway,
    types::{
        PlayerRoundBalances,
        U256,
        Vaults,
    },
};

fn account() -> Address {
    Address::from_low_u64_be(0xa11ce)
}

fn state_with_eth(eth: u64) -> PlayerState {
    PlayerState {
        eth: U256::from(eth),
        ..Default::default()
    }
}

#[test]
fn request_refresh__no_account__replies_zero_state_without_fetch() {
    // given
    let mut sut = PlayerTracker::new(None);
    let (tx, mut rx) = oneshot::channel();

    // when
    let ticket = sut.request_refresh(1, Some(tx));

    // then
    assert!(ticket.is_none());
    assert_eq!(rx.try_recv().unwrap(), PlayerState::default());
}

#[test]
fn finish_refresh__swaps_whole_state() {
    // given
    let mut sut = PlayerTracker::new(Some(account()));
    let ticket = sut.request_refresh(1, None).unwrap();

    // when
    let follow_up = sut.finish_refresh(ticket, Ok(state_with_eth(5)), 1);

    // then
    assert!(follow_up.is_none());
    assert_eq!(*sut.current_player(), state_with_eth(5));
    assert!(!sut.is_fetching());
}

#[test]
fn request_refresh__while_in_flight__coalesces_into_one_follow_up() {
    // given
    let mut sut = PlayerTracker::new(Some(account()));
    let first = sut.request_refresh(1, None).unwrap();
    let (tx, mut rx) = oneshot::channel();

    // when
    assert!(sut.request_refresh(1, Some(tx)).is_none());
    assert!(sut.request_refresh(1, None).is_none());
    let follow_up = sut.finish_refresh(first, Ok(state_with_eth(1)), 1);

    // then
    let follow_up = follow_up.expect("one follow-up fetch");
    assert_eq!(follow_up.generation, first.generation + 1);
    assert!(rx.try_recv().is_err());

    // when
    let none = sut.finish_refresh(follow_up, Ok(state_with_eth(2)), 1);

    // then
    assert!(none.is_none());
    assert_eq!(rx.try_recv().unwrap(), state_with_eth(2));
}

#[test]
fn finish_refresh__previous_round__is_discarded_and_refetched() {
    // given
    let mut sut = PlayerTracker::new(Some(account()));
    let (tx, mut rx) = oneshot::channel();
    let stale = sut.request_refresh(4, Some(tx)).unwrap();

    // when
    let follow_up = sut.finish_refresh(stale, Ok(state_with_eth(9)), 5);

    // then
    assert_eq!(*sut.current_player(), PlayerState::default());
    let follow_up = follow_up.expect("refetch for the new round");
    assert_eq!(follow_up.round_id, 5);
    assert!(rx.try_recv().is_err());

    sut.finish_refresh(follow_up, Ok(state_with_eth(1)), 5);
    assert_eq!(rx.try_recv().unwrap(), state_with_eth(1));
}

#[test]
fn finish_refresh__failed_read__keeps_previous_state() {
    // given
    let mut sut = PlayerTracker::new(Some(account()));
    let ticket = sut.request_refresh(1, None).unwrap();
    sut.finish_refresh(ticket, Ok(state_with_eth(3)), 1);
    let ticket = sut.request_refresh(1, None).unwrap();

    // when
    sut.finish_refresh(
        ticket,
        Err(GatewayError::NetworkTimeout("timeout".into())),
        1,
    );

    // then
    assert_eq!(*sut.current_player(), state_with_eth(3));
}

#[test]
fn finish_refresh__unknown_ticket__is_ignored() {
    let mut sut = PlayerTracker::new(Some(account()));
    let ticket = sut.request_refresh(1, None).unwrap();
    let forged = FetchTicket {
        generation: ticket.generation + 7,
        ..ticket
    };

    assert!(sut.finish_refresh(forged, Ok(state_with_eth(8)), 1).is_none());
    assert!(sut.is_fetching());
    assert_eq!(*sut.current_player(), PlayerState::default());
}

#[tokio::test]
async fn fetch_player__reads_every_source() {
    // given
    let gateway = FakeGateway::new().with_account(account());
    gateway.set_player(
        U256::from(12),
        PlayerRoundBalances {
            eth: U256::from(100),
            puffs: U256::from(4),
            mask: U256::from(1),
        },
        Vaults {
            winning: U256::from(2),
            general: U256::zero(),
            affiliate: U256::from(1),
        },
    );
    gateway.set_nfts(vec![U256::from(30), U256::from(10)]);
    gateway.set_names(vec!["inventor".to_string()]);

    // when
    let state = fetch_player(&gateway, account(), 1).await.unwrap();

    // then
    assert_eq!(state.eth, U256::from(100));
    assert_eq!(state.puffs, U256::from(4));
    assert_eq!(state.winning_vault, U256::from(2));
    assert_eq!(state.affiliate_vault, U256::from(1));
    assert_eq!(
        state.nfts.into_iter().collect::<Vec<_>>(),
        vec![U256::from(10), U256::from(30)]
    );
    assert_eq!(state.player_names, vec!["inventor".to_string()]);
}

#[tokio::test]
async fn fetch_player__unknown_player__skips_balance_reads() {
    // given
    let gateway = FakeGateway::new().with_account(account());

    // when
    let state = fetch_player(&gateway, account(), 1).await.unwrap();

    // then
    assert_eq!(state, PlayerState::default());
    let calls = gateway.calls();
    assert_eq!(calls.player_id, 1);
    assert_eq!(calls.player_round, 0);
    assert_eq!(calls.player_vaults, 0);
}
