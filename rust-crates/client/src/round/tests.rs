#![allow(non_snake_case)]

use super::*;
use crate::test_helpers::FakeGateway;
use proptest::prelude::*;
use std::sync::{
    Arc,
    Mutex,
};

fn info(round_id: RoundId, end_time: u64) -> RoundInfo {
    RoundInfo {
        round_id,
        start_time: end_time.saturating_sub(3_600),
        end_time,
        pot: U256::from(1_000),
        ..Default::default()
    }
}

#[test]
fn apply_info__higher_round__replaces_state_and_notifies() {
    // given
    let mut sut = RoundSynchronizer::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    sut.on_round_changed(Box::new(move |round| {
        sink.lock().unwrap().push(round.round_id);
    }));
    sut.apply_info(&info(4, 100), 0);

    // when
    let update = sut.apply_info(&info(5, 200), 0);

    // then
    assert_eq!(update, RoundUpdate::NewRound { previous: 4 });
    assert_eq!(sut.current_round().round_id, 5);
    assert_eq!(sut.current_round().end_time, 200);
    assert_eq!(*seen.lock().unwrap(), vec![4, 5]);
}

#[test]
fn apply_info__lower_round__is_ignored() {
    // given
    let mut sut = RoundSynchronizer::new();
    sut.apply_info(&info(5, 200), 0);

    // when
    let update = sut.apply_info(&info(3, 900), 0);

    // then
    assert_eq!(update, RoundUpdate::Ignored);
    assert_eq!(sut.current_round().round_id, 5);
    assert_eq!(sut.current_round().end_time, 200);
}

#[test]
fn apply_info__same_values__is_unchanged() {
    let mut sut = RoundSynchronizer::new();
    sut.apply_info(&info(2, 50), 0);

    assert_eq!(sut.apply_info(&info(2, 50), 0), RoundUpdate::Unchanged);
}

#[test]
fn apply_info__open_round__has_no_winner_fields() {
    // given
    let mut sut = RoundSynchronizer::new();
    let mut read = info(2, 50);
    read.leader_team = 3;
    read.leader_id = U256::from(9);

    // when
    sut.apply_info(&read, 3);

    // then
    let round = sut.current_round();
    assert!(!round.ended);
    assert_eq!(round.winner_team_id, None);
    assert_eq!(round.winner_id, None);
    assert!(!round.is_winner);
}

#[test]
fn apply_info__ended_round__names_winner_against_selection() {
    // given
    let mut sut = RoundSynchronizer::new();
    let mut read = info(2, 50);
    read.ended = true;
    read.leader_team = 3;
    read.leader_id = U256::from(9);

    // when
    sut.apply_info(&read, 3);

    // then
    let round = sut.current_round();
    assert!(round.ended);
    assert_eq!(round.winner_team_id, Some(3));
    assert_eq!(round.winner_id, Some(U256::from(9)));
    assert!(round.is_winner);
}

#[test]
fn apply_round_ended__no_team_selected__is_never_winner() {
    // given
    let mut sut = RoundSynchronizer::new();
    sut.apply_info(&info(2, 50), 0);

    // when
    let update = sut.apply_round_ended(2, 0, U256::from(1), 0);

    // then
    assert_eq!(update, RoundUpdate::Updated);
    assert!(sut.current_round().ended);
    assert!(!sut.current_round().is_winner);
}

#[test]
fn apply_info__same_round_read_not_ended_after_round_ended__keeps_settlement() {
    // given
    let mut sut = RoundSynchronizer::new();
    sut.apply_info(&info(2, 50), 3);
    sut.apply_round_ended(2, 3, U256::from(7), 3);
    let mut lagging = info(2, 50);
    lagging.pot = U256::from(2_000);

    // when
    let update = sut.apply_info(&lagging, 3);

    // then
    assert_eq!(update, RoundUpdate::Updated);
    let round = sut.current_round();
    assert!(round.ended);
    assert_eq!(round.winner_team_id, Some(3));
    assert_eq!(round.winner_id, Some(U256::from(7)));
    assert!(round.is_winner);
    assert_eq!(round.pot, U256::from(2_000));
}

#[test]
fn apply_round_ended__other_round__is_ignored() {
    let mut sut = RoundSynchronizer::new();
    sut.apply_info(&info(2, 50), 1);

    let update = sut.apply_round_ended(1, 1, U256::from(1), 1);

    assert_eq!(update, RoundUpdate::Ignored);
    assert!(!sut.current_round().ended);
}

#[test]
fn apply_new_round__resets_round_fields() {
    // given
    let mut sut = RoundSynchronizer::new();
    sut.apply_info(&info(2, 50), 0);
    sut.apply_round_ended(2, 1, U256::from(1), 1);

    // when
    let update = sut.apply_new_round(3, 60, 500);

    // then
    assert!(update.is_new_round());
    assert_eq!(
        *sut.current_round(),
        RoundState::announced(3, 60, 500)
    );
}

#[test]
fn needs_polling__unknown_end_time__polls_without_deadline() {
    let sut = RoundSynchronizer::new();

    assert!(sut.needs_polling());
    assert_eq!(sut.deadline(), None);
}

#[test]
fn deadline__known_end_time__suspends_polling() {
    // given
    let mut sut = RoundSynchronizer::new();

    // when
    sut.apply_info(&info(5, 1_010), 0);

    // then
    assert!(!sut.needs_polling());
    assert_eq!(sut.deadline(), Some(1_010));
}

#[test]
fn mark_deadline_fired__resumes_polling_until_end_moves() {
    // given
    let mut sut = RoundSynchronizer::new();
    sut.apply_info(&info(5, 1_010), 0);

    // when
    sut.mark_deadline_fired();

    // then
    assert!(sut.needs_polling());
    assert_eq!(sut.deadline(), None);

    // when the countdown was extended
    sut.apply_info(&info(5, 1_040), 0);

    // then
    assert!(!sut.needs_polling());
    assert_eq!(sut.deadline(), Some(1_040));
}

#[test]
fn begin_refresh__concurrent_requests__share_one_read() {
    // given
    let mut sut = RoundSynchronizer::new();
    let (first_tx, mut first_rx) = oneshot::channel();
    let (second_tx, mut second_rx) = oneshot::channel();

    // when
    let started_first = sut.begin_refresh(Some(first_tx), false);
    let started_second = sut.begin_refresh(Some(second_tx), false);
    let outcome = sut.finish_refresh(Ok(info(7, 70)), 0);

    // then
    assert!(started_first);
    assert!(!started_second);
    assert!(!outcome.follow_up);
    assert!(!sut.is_refreshing());
    assert_eq!(first_rx.try_recv().unwrap().round_id, 7);
    assert_eq!(second_rx.try_recv().unwrap().round_id, 7);
}

#[test]
fn begin_refresh__fresh_while_in_flight__queues_exactly_one_follow_up() {
    // given
    let mut sut = RoundSynchronizer::new();
    let (late_tx, mut late_rx) = oneshot::channel();
    sut.begin_refresh(None, false);
    sut.begin_refresh(Some(late_tx), true);
    sut.begin_refresh(None, true);

    // when
    let first = sut.finish_refresh(Ok(info(7, 70)), 0);

    // then
    assert!(first.follow_up);
    assert!(sut.is_refreshing());
    assert!(late_rx.try_recv().is_err());

    // when
    let second = sut.finish_refresh(Ok(info(7, 80)), 0);

    // then
    assert!(!second.follow_up);
    assert_eq!(late_rx.try_recv().unwrap().end_time, 80);
}

#[test]
fn finish_refresh__failed_read__keeps_state() {
    // given
    let mut sut = RoundSynchronizer::new();
    sut.apply_info(&info(7, 70), 0);
    sut.begin_refresh(None, false);

    // when
    let outcome = sut.finish_refresh(
        Err(GatewayError::NetworkTimeout("connection reset".into())),
        0,
    );

    // then
    assert!(matches!(outcome.update, RoundUpdate::Failed(_)));
    assert_eq!(sut.current_round().round_id, 7);
    assert_eq!(sut.current_round().end_time, 70);
}

#[tokio::test]
async fn refresh__reads_round_id_then_metadata() {
    // given
    let gateway = FakeGateway::new();
    gateway.set_round(info(5, 1_010));
    let mut sut = RoundSynchronizer::new();

    // when
    let update = refresh(&mut sut, &gateway, 0).await;

    // then
    assert_eq!(update, RoundUpdate::NewRound { previous: 0 });
    assert_eq!(sut.current_round().end_time, 1_010);
    let calls = gateway.calls();
    assert_eq!(calls.round_id, 1);
    assert_eq!(calls.round_info, 1);
}

#[derive(Clone, Debug)]
enum Step {
    NewRound(RoundId),
    Read(RoundId),
    Ended(RoundId),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0u64..20).prop_map(Step::NewRound),
        (0u64..20).prop_map(Step::Read),
        (0u64..20).prop_map(Step::Ended),
    ]
}

proptest! {
    #[test]
    fn round_id__any_event_sequence__never_decreases(steps in prop::collection::vec(step(), 0..64)) {
        let mut sut = RoundSynchronizer::new();
        let mut last = sut.current_round().round_id;
        for step in steps {
            match step {
                Step::NewRound(id) => {
                    sut.apply_new_round(id, 1, 2);
                }
                Step::Read(id) => {
                    sut.apply_info(&info(id, 100 + id), 1);
                }
                Step::Ended(id) => {
                    sut.apply_round_ended(id, 1, U256::one(), 1);
                }
            }
            let current = sut.current_round().round_id;
            prop_assert!(current >= last);
            last = current;
        }
    }
}

proptest! {
    #[test]
    fn ended__any_event_sequence__stays_ended_within_round(steps in prop::collection::vec(step(), 0..64)) {
        let mut sut = RoundSynchronizer::new();
        let mut ended_round = None;
        for step in steps {
            match step {
                Step::NewRound(id) => {
                    sut.apply_new_round(id, 1, 2);
                }
                Step::Read(id) => {
                    sut.apply_info(&info(id, 100 + id), 1);
                }
                Step::Ended(id) => {
                    sut.apply_round_ended(id, 1, U256::one(), 1);
                }
            }
            let round = sut.current_round();
            if round.ended {
                ended_round = Some(round.round_id);
            } else {
                prop_assert_ne!(ended_round, Some(round.round_id));
            }
        }
    }
}
