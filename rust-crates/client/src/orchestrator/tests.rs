#![allow(non_snake_case)]

use super::*;
use crate::test_helpers::{
    FakeGateway,
    SentTx,
};

fn account() -> Address {
    Address::from_low_u64_be(0xa11ce)
}

fn open_round() -> RoundState {
    RoundState {
        round_id: 3,
        start_time: 100,
        end_time: 1_000,
        ..Default::default()
    }
}

fn ctx<'a>(round: &'a RoundState, player: &'a PlayerState) -> AdmitContext<'a> {
    AdmitContext {
        account: Some(account()),
        round,
        player,
        now: 500,
    }
}

fn buy(team: TeamId) -> TxRequest {
    TxRequest::Buy(BuyRequest {
        team,
        amount: PurchaseAmount::Eth(U256::from(10)),
        affiliate: None,
        round_id: None,
    })
}

fn register(name: &str) -> TxRequest {
    TxRequest::RegisterName(NameRequest {
        name: name.to_string(),
        affiliate: None,
    })
}

fn receipt(n: u64) -> TxReceipt {
    TxReceipt {
        tx_hash: TxHash::from_low_u64_be(n),
        block_number: Some(n),
        gas_used: None,
    }
}

#[test]
fn admit__team_zero__is_invalid_team() {
    // given
    let mut sut = TxOrchestrator::new(4);
    let (round, player) = (open_round(), PlayerState::default());

    // when
    let result = sut.admit(buy(0), ctx(&round, &player));

    // then
    assert_eq!(result, Err(FailureKind::InvalidTeam(0)));
    assert!(sut.pending().is_empty());
}

#[test]
fn admit__team_beyond_configured_list__is_invalid_team() {
    let mut sut = TxOrchestrator::new(4);
    let (round, player) = (open_round(), PlayerState::default());

    assert_eq!(
        sut.admit(buy(5), ctx(&round, &player)),
        Err(FailureKind::InvalidTeam(5))
    );
}

#[test]
fn admit__no_account__is_rejected_first() {
    let mut sut = TxOrchestrator::new(4);
    let (round, player) = (open_round(), PlayerState::default());
    let mut context = ctx(&round, &player);
    context.account = None;

    assert_eq!(sut.admit(buy(0), context), Err(FailureKind::NoAccount));
}

#[test]
fn admit__zero_amount__is_invalid_amount() {
    let mut sut = TxOrchestrator::new(0);
    let (round, player) = (open_round(), PlayerState::default());
    let request = TxRequest::Buy(BuyRequest {
        team: 1,
        amount: PurchaseAmount::Puffs(U256::zero()),
        affiliate: None,
        round_id: None,
    });

    assert_eq!(
        sut.admit(request, ctx(&round, &player)),
        Err(FailureKind::InvalidAmount)
    );
}

#[test]
fn admit__second_buy_while_submitted__is_already_pending() {
    // given
    let mut sut = TxOrchestrator::new(4);
    let (round, player) = (open_round(), PlayerState::default());
    sut.admit(buy(1), ctx(&round, &player)).unwrap();

    // when
    let result = sut.admit(buy(2), ctx(&round, &player));

    // then
    assert_eq!(result, Err(FailureKind::AlreadyPending(TxKind::Buy)));
    assert_eq!(sut.pending().len(), 1);
}

#[test]
fn admit__different_kinds__may_be_pending_together() {
    // given
    let mut sut = TxOrchestrator::new(4);
    let round = open_round();
    let player = PlayerState {
        general_vault: U256::one(),
        ..Default::default()
    };

    // when
    sut.admit(buy(1), ctx(&round, &player)).unwrap();
    sut.admit(TxRequest::Withdraw, ctx(&round, &player)).unwrap();
    sut.admit(register("inventor"), ctx(&round, &player)).unwrap();

    // then
    let kinds: Vec<TxKind> = sut.pending().iter().map(|p| p.kind).collect();
    assert_eq!(kinds, vec![TxKind::Buy, TxKind::Withdraw, TxKind::RegisterName]);
    assert!(sut.pending().iter().all(|p| p.status == TxStatus::Submitted));
}

#[test]
fn admit__outdated_round_reference__is_stale_round() {
    let mut sut = TxOrchestrator::new(4);
    let (round, player) = (open_round(), PlayerState::default());
    let request = TxRequest::Buy(BuyRequest {
        team: 1,
        amount: PurchaseAmount::Eth(U256::one()),
        affiliate: None,
        round_id: Some(2),
    });

    assert_eq!(
        sut.admit(request, ctx(&round, &player)),
        Err(FailureKind::StaleRound {
            requested: 2,
            current: 3
        })
    );
}

#[test]
fn admit__round_past_end_time__is_stale_round() {
    let mut sut = TxOrchestrator::new(4);
    let (round, player) = (open_round(), PlayerState::default());
    let mut context = ctx(&round, &player);
    context.now = 1_001;

    assert!(matches!(
        sut.admit(buy(1), context),
        Err(FailureKind::StaleRound { .. })
    ));
}

#[test]
fn admit__withdraw_with_empty_vaults__is_nothing_to_withdraw() {
    let mut sut = TxOrchestrator::new(4);
    let (round, player) = (open_round(), PlayerState::default());

    assert_eq!(
        sut.admit(TxRequest::Withdraw, ctx(&round, &player)),
        Err(FailureKind::NothingToWithdraw)
    );
}

#[test]
fn admit__empty_name__is_invalid_name() {
    let mut sut = TxOrchestrator::new(4);
    let (round, player) = (open_round(), PlayerState::default());

    assert!(matches!(
        sut.admit(register("   "), ctx(&round, &player)),
        Err(FailureKind::InvalidName(_))
    ));
}

#[test]
fn admit__name_over_32_bytes__is_invalid_name() {
    let mut sut = TxOrchestrator::new(4);
    let (round, player) = (open_round(), PlayerState::default());

    assert!(matches!(
        sut.admit(register(&"n".repeat(33)), ctx(&round, &player)),
        Err(FailureKind::InvalidName(_))
    ));
}

#[test]
fn admit__name_already_owned__is_invalid_name_regardless_of_case() {
    let mut sut = TxOrchestrator::new(4);
    let round = open_round();
    let player = PlayerState {
        player_names: vec!["Inventor".to_string()],
        ..Default::default()
    };

    assert!(matches!(
        sut.admit(register("inventor"), ctx(&round, &player)),
        Err(FailureKind::InvalidName(_))
    ));
}

#[test]
fn admit__name_registered_this_session__is_duplicate_after_confirm() {
    // given
    let mut sut = TxOrchestrator::new(4);
    let (round, player) = (open_round(), PlayerState::default());
    sut.admit(register("inventor"), ctx(&round, &player)).unwrap();
    sut.confirm(TxKind::RegisterName, &receipt(1));

    // when
    let result = sut.admit(register("INVENTOR"), ctx(&round, &player));

    // then
    assert!(matches!(result, Err(FailureKind::InvalidName(_))));
}

#[test]
fn fail__releases_kind_and_name() {
    // given
    let mut sut = TxOrchestrator::new(4);
    let (round, player) = (open_round(), PlayerState::default());
    sut.admit(register("inventor"), ctx(&round, &player)).unwrap();

    // when
    let failed = sut
        .fail(TxKind::RegisterName, FailureKind::ChainRevert("taken".into()))
        .unwrap();

    // then
    assert_eq!(
        failed.status,
        TxStatus::Failed(FailureKind::ChainRevert("taken".into()))
    );
    assert!(sut.pending().is_empty());
    assert!(sut.admit(register("inventor"), ctx(&round, &player)).is_ok());
}

#[test]
fn confirm__remembers_reconciled_hash() {
    // given
    let mut sut = TxOrchestrator::new(4);
    let (round, player) = (open_round(), PlayerState::default());
    sut.admit(buy(1), ctx(&round, &player)).unwrap();

    // when
    let confirmed = sut.confirm(TxKind::Buy, &receipt(9)).unwrap();

    // then
    assert_eq!(confirmed.status, TxStatus::Confirmed);
    assert!(sut.was_reconciled(&TxHash::from_low_u64_be(9)));
    assert!(sut.pending_of(TxKind::Buy).is_none());
}

#[test]
fn route_affiliate__prefers_address_then_id_then_name() {
    let address = Address::from_low_u64_be(7);
    let all = Affiliate {
        address: Some(address),
        name: Some("bob".into()),
        id: Some(U256::from(3)),
    };
    let id_and_name = Affiliate {
        address: None,
        name: Some("bob".into()),
        id: Some(U256::from(3)),
    };

    assert_eq!(route_affiliate(Some(&all)), Ok(AffiliateRoute::Address(address)));
    assert_eq!(
        route_affiliate(Some(&id_and_name)),
        Ok(AffiliateRoute::Id(U256::from(3)))
    );
    assert_eq!(
        route_affiliate(Some(&Affiliate::by_name("bob"))),
        Ok(AffiliateRoute::Name("bob".into()))
    );
    assert_eq!(
        route_affiliate(None),
        Ok(AffiliateRoute::Address(Address::zero()))
    );
}

#[test]
fn route_affiliate__malformed__is_invalid_affiliate() {
    assert!(route_affiliate(Some(&Affiliate::by_address(Address::zero()))).is_err());
    assert!(route_affiliate(Some(&Affiliate::by_id(0u64))).is_err());
    assert!(route_affiliate(Some(&Affiliate::by_name(""))).is_err());
}

#[tokio::test]
async fn execute__puffs__converted_at_gateway_rate() {
    // given
    let gateway = FakeGateway::new().with_account(account());
    gateway.set_wei_per_puff(U256::from(250));
    let plan = TxPlan::Buy {
        team: 2,
        amount: PurchaseAmount::Puffs(U256::from(4)),
        affiliate: AffiliateRoute::Id(U256::from(8)),
    };

    // when
    let receipt = execute(&gateway, plan, Duration::from_secs(5), |_| {})
        .await
        .unwrap();

    // then
    assert!(receipt.block_number.is_some());
    assert_eq!(
        gateway.sent(),
        vec![SentTx::Buy(BuyOrder {
            team: 2,
            eth: U256::from(1_000),
            affiliate: AffiliateRoute::Id(U256::from(8)),
        })]
    );
}

#[tokio::test]
async fn execute__send_revert__is_chain_revert_without_confirm() {
    // given
    let gateway = FakeGateway::new().with_account(account());
    gateway.revert_next_send("not activated");

    // when
    let result = execute(&gateway, TxPlan::Withdraw, Duration::from_secs(5), |_| {}).await;

    // then
    assert_eq!(result, Err(FailureKind::ChainRevert("not activated".into())));
    assert_eq!(gateway.calls().confirm, 0);
}

#[tokio::test(start_paused = true)]
async fn execute__no_receipt_in_time__is_confirmation_timeout() {
    // given
    let gateway = FakeGateway::new().with_account(account());
    gateway.never_confirm();
    let mut sent = None;

    // when
    let result = execute(
        &gateway,
        TxPlan::Withdraw,
        Duration::from_secs(600),
        |hash| sent = Some(hash),
    )
    .await;

    // then
    let hash = sent.expect("transaction was sent");
    assert_eq!(result, Err(FailureKind::ConfirmationTimeout(hash)));
}

#[tokio::test(start_paused = true)]
async fn execute__send_never_answers__is_network_timeout_without_hash() {
    // given
    let gateway = FakeGateway::new().with_account(account());
    gateway.stall_next_send();
    let mut sent = None;

    // when
    let result = execute(
        &gateway,
        TxPlan::Withdraw,
        Duration::from_secs(600),
        |hash| sent = Some(hash),
    )
    .await;

    // then
    assert!(matches!(result, Err(FailureKind::NetworkTimeout(_))));
    assert_eq!(sent, None);
    assert_eq!(gateway.calls().confirm, 0);
}
