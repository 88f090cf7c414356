//! Bookkeeping for ingestion units.
//!
//! Every item of a unit is dispatched up front without waiting on earlier
//! items. The unit itself completes only after each item has settled
//! through its completion path. The unit's outcome is the first error
//! reported, if any. A failing item never stops the others from being
//! dispatched.

use quota_pipeline_core::{Error, Result};
use std::collections::HashMap;
use tokio::sync::oneshot;

pub(crate) type UnitId = u64;

struct IngestUnit {
    remaining: usize,
    first_error: Option<Error>,
    ack: oneshot::Sender<Result<()>>,
}

#[derive(Default)]
pub(crate) struct IngestUnits {
    next_id: UnitId,
    open: HashMap<UnitId, IngestUnit>,
}

impl IngestUnits {
    /// Registers a unit of `len` items. An empty unit is acknowledged
    /// immediately.
    pub(crate) fn open(&mut self, len: usize, ack: oneshot::Sender<Result<()>>) -> UnitId {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        if len == 0 {
            let _ = ack.send(Ok(()));
        } else {
            self.open.insert(
                id,
                IngestUnit {
                    remaining: len,
                    first_error: None,
                    ack,
                },
            );
        }
        id
    }

    /// Records the outcome of one item; acknowledges the unit once its last
    /// item has settled.
    pub(crate) fn settle(&mut self, id: UnitId, result: Result<()>) {
        let Some(unit) = self.open.get_mut(&id) else {
            return;
        };

        if let Err(e) = result {
            unit.first_error.get_or_insert(e);
        }
        unit.remaining -= 1;

        if unit.remaining == 0 {
            if let Some(unit) = self.open.remove(&id) {
                let outcome = unit.first_error.map_or(Ok(()), Err);
                // The submitter may have dropped its receipt.
                let _ = unit.ack.send(outcome);
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.open.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unknown(method: &str) -> Error {
        Error::UnknownMethod {
            method: method.to_string(),
        }
    }

    #[test]
    fn acknowledges_empty_unit_immediately() {
        let mut units = IngestUnits::default();
        let (tx, mut rx) = oneshot::channel();

        units.open(0, tx);

        assert!(matches!(rx.try_recv(), Ok(Ok(()))));
        assert_eq!(units.len(), 0);
    }

    #[test]
    fn waits_for_every_item() {
        let mut units = IngestUnits::default();
        let (tx, mut rx) = oneshot::channel();
        let id = units.open(3, tx);

        units.settle(id, Ok(()));
        units.settle(id, Ok(()));
        assert!(rx.try_recv().is_err());

        units.settle(id, Ok(()));
        assert!(matches!(rx.try_recv(), Ok(Ok(()))));
        assert_eq!(units.len(), 0);
    }

    #[test]
    fn reports_first_error_after_all_items_settle() {
        let mut units = IngestUnits::default();
        let (tx, mut rx) = oneshot::channel();
        let id = units.open(3, tx);

        units.settle(id, Err(unknown("FROB")));
        assert!(rx.try_recv().is_err());
        units.settle(id, Err(unknown("BLAH")));
        units.settle(id, Ok(()));

        match rx.try_recv() {
            Ok(Err(Error::UnknownMethod { method })) => assert_eq!(method, "FROB"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn keeps_units_independent() {
        let mut units = IngestUnits::default();
        let (tx_a, mut rx_a) = oneshot::channel();
        let (tx_b, mut rx_b) = oneshot::channel();
        let a = units.open(1, tx_a);
        let b = units.open(2, tx_b);

        units.settle(b, Ok(()));
        units.settle(a, Err(unknown("FROB")));

        assert!(matches!(rx_a.try_recv(), Ok(Err(Error::UnknownMethod { .. }))));
        assert!(rx_b.try_recv().is_err());
        assert_eq!(units.len(), 1);
    }
}
