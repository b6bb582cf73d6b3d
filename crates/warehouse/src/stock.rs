//! Stock projection queries, replay, and self-verification.
//!
//! The stock lines are derived state. [`replay_totals`] is the one fold that
//! defines what they should hold: running it over a warehouse's full stream
//! must reproduce the maintained lines exactly, because the incremental path
//! applies the same per-event deltas inside each append transaction.

use std::collections::BTreeMap;

use chrono::Utc;
use tracing::{info, instrument};

use granary_core::{Crop, DomainError, DomainResult, WarehouseId};
use granary_store::{EventFilter, EventRecord, LedgerStore, StockLine};

/// Fold a stream of events into per-crop bag totals.
pub fn replay_totals<'a, I>(events: I) -> BTreeMap<Crop, i64>
where
    I: IntoIterator<Item = &'a EventRecord>,
{
    let mut totals = BTreeMap::new();
    for delta in events.into_iter().filter_map(|e| e.payload.stock_delta()) {
        *totals.entry(delta.crop).or_insert(0) += delta.bags;
    }
    totals
}

/// Read side of the stock projection plus its maintenance operations.
#[derive(Debug, Clone)]
pub struct StockLedger<S> {
    store: S,
}

impl<S: LedgerStore> StockLedger<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Current stock lines for a warehouse, ordered by crop.
    pub async fn current(&self, warehouse_id: WarehouseId) -> DomainResult<Vec<StockLine>> {
        Ok(self.store.stock_lines(warehouse_id).await?)
    }

    /// Bags currently available for one crop. Zero when the crop has no line.
    pub async fn available(&self, warehouse_id: WarehouseId, crop: Crop) -> DomainResult<i64> {
        let line = self.store.stock_line(warehouse_id, crop).await?;
        Ok(line.map(|l| l.bag_count).unwrap_or(0))
    }

    /// Rebuild the stock lines from the event stream.
    ///
    /// Replaces whatever the projection currently holds with the replayed
    /// totals, stamped with the stream head's sequence. An empty stream
    /// leaves the warehouse with no lines.
    #[instrument(skip(self), fields(warehouse_id = %warehouse_id), err)]
    pub async fn rebuild(&self, warehouse_id: WarehouseId) -> DomainResult<Vec<StockLine>> {
        let events = self.store.read(warehouse_id, EventFilter::all()).await?;
        let head = events.last().map(|e| e.sequence).unwrap_or(0);
        let lines = lines_from_totals(warehouse_id, replay_totals(&events), head);
        self.store
            .replace_stock_lines(warehouse_id, lines.clone())
            .await?;
        info!(
            events = events.len(),
            lines = lines.len(),
            "stock lines rebuilt from replay"
        );
        Ok(lines)
    }

    /// Recompute stock from the stream and compare against the maintained
    /// lines, without modifying anything.
    ///
    /// Returns the replayed lines when they agree; raises
    /// `InvariantViolation` naming the first diverging crop and both values
    /// otherwise.
    #[instrument(skip(self), fields(warehouse_id = %warehouse_id), err)]
    pub async fn verify(&self, warehouse_id: WarehouseId) -> DomainResult<Vec<StockLine>> {
        let events = self.store.read(warehouse_id, EventFilter::all()).await?;
        let head = events.last().map(|e| e.sequence).unwrap_or(0);
        let replayed = replay_totals(&events);
        let stored = self.store.stock_lines(warehouse_id).await?;

        for (crop, bags) in &replayed {
            let held = stored
                .iter()
                .find(|line| line.crop == *crop)
                .map(|line| line.bag_count)
                .unwrap_or(0);
            if held != *bags {
                return Err(DomainError::invariant(format!(
                    "stock divergence for {crop}: projection holds {held}, replay says {bags}"
                )));
            }
        }
        // A maintained line the replay knows nothing about is drift too.
        for line in &stored {
            if line.bag_count != 0 && !replayed.contains_key(&line.crop) {
                return Err(DomainError::invariant(format!(
                    "stock divergence for {}: projection holds {}, replay says 0",
                    line.crop, line.bag_count
                )));
            }
        }

        Ok(lines_from_totals(warehouse_id, replayed, head))
    }
}

fn lines_from_totals(
    warehouse_id: WarehouseId,
    totals: BTreeMap<Crop, i64>,
    last_event_sequence: u64,
) -> Vec<StockLine> {
    let now = Utc::now();
    totals
        .into_iter()
        .map(|(crop, bag_count)| StockLine {
            warehouse_id,
            crop,
            bag_count,
            last_event_sequence,
            updated_at: now,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    use granary_core::{ActorId, BatchId, EventId, RequestId, SourceType};
    use granary_events::{DispatchExecuted, EventPayload, InboundRecorded};

    fn record(warehouse_id: WarehouseId, sequence: u64, payload: EventPayload) -> EventRecord {
        EventRecord {
            event_id: EventId::new(),
            warehouse_id,
            sequence,
            kind: payload.kind(),
            actor_id: ActorId::new(),
            recorded_at: Utc::now(),
            payload,
        }
    }

    fn inbound(crop: Crop, bags: i64) -> EventPayload {
        EventPayload::InboundRecorded(InboundRecorded {
            batch_id: BatchId::new(),
            crop,
            bags,
            source_type: SourceType::FarmerDelivery,
            source_name: "test farm".to_string(),
            batch_code: format!("T-{}-0001", crop.code()),
        })
    }

    fn executed(crop: Crop, bags: i64) -> EventPayload {
        EventPayload::DispatchExecuted(DispatchExecuted {
            request_id: RequestId::new(),
            crop,
            bags,
            batches: vec![],
            photo_url: "https://evidence.example/loads/1.jpg".to_string(),
        })
    }

    #[test]
    fn replay_sums_intake_and_subtracts_dispatch() {
        let wid = WarehouseId::new();
        let events = vec![
            record(wid, 1, inbound(Crop::Maize, 100)),
            record(wid, 2, inbound(Crop::Beans, 30)),
            record(wid, 3, executed(Crop::Maize, 45)),
            record(wid, 4, inbound(Crop::Maize, 10)),
        ];
        let totals = replay_totals(&events);
        assert_eq!(totals.get(&Crop::Maize), Some(&65));
        assert_eq!(totals.get(&Crop::Beans), Some(&30));
        assert_eq!(totals.get(&Crop::Rice), None);
    }

    #[test]
    fn non_stock_events_do_not_move_totals() {
        let wid = WarehouseId::new();
        let events = vec![record(
            wid,
            1,
            EventPayload::DispatchRequested(granary_events::DispatchRequested {
                request_id: RequestId::new(),
                crop: Crop::Maize,
                bags: 50,
                recipient: "Mill".to_string(),
                notes: None,
            }),
        )];
        assert!(replay_totals(&events).is_empty());
    }

    #[test]
    fn a_crop_drained_to_zero_keeps_its_line() {
        let wid = WarehouseId::new();
        let events = vec![
            record(wid, 1, inbound(Crop::Sorghum, 20)),
            record(wid, 2, executed(Crop::Sorghum, 20)),
        ];
        let totals = replay_totals(&events);
        assert_eq!(totals.get(&Crop::Sorghum), Some(&0));
    }

    const CROPS: [Crop; 3] = [Crop::Maize, Crop::Beans, Crop::Rice];

    /// Generator for valid histories: each step either dispatches (when stock
    /// covers it) or takes intake, so totals never go negative.
    fn history(ops: Vec<(usize, i64)>) -> Vec<EventRecord> {
        let wid = WarehouseId::new();
        let mut held: BTreeMap<Crop, i64> = BTreeMap::new();
        let mut events = Vec::with_capacity(ops.len());
        for (i, (crop_idx, bags)) in ops.into_iter().enumerate() {
            let crop = CROPS[crop_idx % CROPS.len()];
            let payload = if held.get(&crop).copied().unwrap_or(0) >= bags {
                executed(crop, bags)
            } else {
                inbound(crop, bags)
            };
            if let Some(delta) = payload.stock_delta() {
                *held.entry(delta.crop).or_insert(0) += delta.bags;
            }
            events.push(record(wid, (i + 1) as u64, payload));
        }
        events
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        #[test]
        fn valid_histories_never_replay_negative(
            ops in prop::collection::vec((0usize..3, 1i64..=40), 0..60)
        ) {
            let events = history(ops);
            for (crop, bags) in replay_totals(&events) {
                prop_assert!(bags >= 0, "{crop} replayed to {bags}");
            }
        }

        #[test]
        fn each_crop_replays_independently(
            ops in prop::collection::vec((0usize..3, 1i64..=40), 0..60)
        ) {
            let events = history(ops);
            let all = replay_totals(&events);
            for crop in CROPS {
                let only: Vec<&EventRecord> = events
                    .iter()
                    .filter(|e| e.payload.stock_delta().is_some_and(|d| d.crop == crop))
                    .collect();
                let isolated = replay_totals(only.into_iter());
                prop_assert_eq!(
                    all.get(&crop).copied().unwrap_or(0),
                    isolated.get(&crop).copied().unwrap_or(0)
                );
            }
        }

        #[test]
        fn appending_intake_raises_exactly_that_crop(
            ops in prop::collection::vec((0usize..3, 1i64..=40), 0..40),
            bags in 1i64..=500
        ) {
            let mut events = history(ops);
            let before = replay_totals(&events);
            let next = events.len() as u64 + 1;
            let wid = events
                .first()
                .map(|e| e.warehouse_id)
                .unwrap_or_else(WarehouseId::new);
            events.push(record(wid, next, inbound(Crop::Maize, bags)));

            let after = replay_totals(&events);
            prop_assert_eq!(
                after.get(&Crop::Maize).copied().unwrap_or(0),
                before.get(&Crop::Maize).copied().unwrap_or(0) + bags
            );
            prop_assert_eq!(
                after.get(&Crop::Beans).copied().unwrap_or(0),
                before.get(&Crop::Beans).copied().unwrap_or(0)
            );
        }
    }
}
