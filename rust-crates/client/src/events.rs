use crate::{
    error::GatewayError,
    gateway::EventSource,
    types::{
        EventRecord,
        RoundId,
    },
};
use tracing::{
    debug,
    info,
};


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Subscription {
    round_id: RoundId,
    generation: u64,
    next_block: Option<u64>,
    last_seen: Option<(u64, u64)>,
}

/// Query to run for one poll of the current subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollTicket {
    pub generation: u64,
    pub round_id: RoundId,
    /// `None` on the first poll: start at the head.
    pub from_block: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventBatch {
    pub ticket: PollTicket,
    /// Last block covered by the query.
    pub to_block: u64,
    pub records: Vec<EventRecord>,
}

/// Cursor over the game's logs for the current round.
#[derive(Debug, Default)]
pub struct EventListener {
    subscription: Option<Subscription>,
    generation: u64,
    in_flight: Option<u64>,
}

impl EventListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribed_round(&self) -> Option<RoundId> {
        self.subscription.map(|sub| sub.round_id)
    }

    /// Replaces the subscription. The block cursor carries over so nothing
    /// between the two subscriptions is skipped; results still in flight
    /// for the old one are dropped on arrival.
    pub fn subscribe(&mut self, round_id: RoundId) {
        if self.subscribed_round() == Some(round_id) {
            return;
        }
        self.generation += 1;
        let next_block = self.subscription.and_then(|sub| sub.next_block);
        info!(round_id, ?next_block, "subscribing to round events");
        self.subscription = Some(Subscription {
            round_id,
            generation: self.generation,
            next_block,
            last_seen: None,
        });
    }

    pub fn unsubscribe(&mut self) {
        self.generation += 1;
        self.subscription = None;
        self.in_flight = None;
    }

    pub fn begin_poll(&mut self) -> Option<PollTicket> {
        let sub = self.subscription?;
        if self.in_flight == Some(sub.generation) {
            return None;
        }
        self.in_flight = Some(sub.generation);
        Some(PollTicket {
            generation: sub.generation,
            round_id: sub.round_id,
            from_block: sub.next_block,
        })
    }

    /// Applies a poll result and returns the records not delivered before.
    pub fn finish_poll(
        &mut self,
        generation: u64,
        result: Result<EventBatch, GatewayError>,
    ) -> Vec<EventRecord> {
        if self.in_flight == Some(generation) {
            self.in_flight = None;
        }
        let Some(sub) = self.subscription.as_mut() else {
            return Vec::new();
        };
        if sub.generation != generation {
            debug!(generation, current = sub.generation, "dropping events of an old subscription");
            return Vec::new();
        }
        let batch = match result {
            Ok(batch) => batch,
            Err(err) => {
                debug!(?err, round_id = sub.round_id, "event poll failed");
                return Vec::new();
            }
        };

        let mut fresh = Vec::new();
        for record in batch.records {
            if sub.last_seen.is_some_and(|seen| record.position() <= seen) {
                continue;
            }
            sub.last_seen = Some(record.position());
            fresh.push(record);
        }
        sub.next_block = Some(batch.to_block + 1);
        fresh
    }
}

/// Runs the query described by `ticket`.
pub async fn poll_events<S: EventSource>(
    source: &S,
    ticket: PollTicket,
) -> Result<EventBatch, GatewayError> {
    let head = source.latest_block().await?;
    let from_block = ticket.from_block.unwrap_or(head);
    if from_block > head {
        return Ok(EventBatch {
            ticket,
            to_block: from_block - 1,
            records: Vec::new(),
        });
    }
    let records = source.round_events(ticket.round_id, from_block, head).await?;
    Ok(EventBatch {
        ticket,
        to_block: head,
        records,
    })
}
