//! Write model contract.
//!
//! A write model is built fresh for every command invocation: it declares the
//! events it needs ([`WriteModel::query`]) and folds them ([`WriteModel::reduce`]).
//! Folding is a pure function of prior state + event, so two reductions over the
//! same prefix always agree. That is what makes `processed_sequence` usable as
//! the optimistic concurrency version.

use chrono::{DateTime, Utc};
use thiserror::Error;

use irongate_core::{CommandError, CommandResult, ExpectedVersion, ObjectDetails};

use crate::envelope::Event;
use crate::query::SearchQuery;

/// Lifecycle of an aggregate as seen by a write model.
///
/// `Unspecified` (no events) and `Removed` are both "does not exist" for
/// [`AggregateState::exists`], but stay distinguishable for commands whose
/// business rule tells them apart.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum AggregateState {
    #[default]
    Unspecified,
    Active,
    Inactive,
    Removed,
}

impl AggregateState {
    pub fn exists(self) -> bool {
        matches!(self, AggregateState::Active | AggregateState::Inactive)
    }

    pub fn is_removed(self) -> bool {
        self == AggregateState::Removed
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReduceError {
    #[error("event at position {found} ({event_type}) folded after position {last}")]
    NonMonotonicPosition {
        last: u64,
        found: u64,
        event_type: String,
    },
}

impl From<ReduceError> for CommandError {
    fn from(err: ReduceError) -> Self {
        CommandError::internal("Errors.WriteModel.Reduce", err)
    }
}

/// Fields every write model tracks.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WriteModelBase {
    pub aggregate_id: String,
    pub instance_id: String,
    pub resource_owner: String,
    /// Sequence of the last committed event folded.
    pub processed_sequence: u64,
    pub change_date: Option<DateTime<Utc>>,
    last_position: u64,
}

impl WriteModelBase {
    pub fn new(
        aggregate_id: impl Into<String>,
        instance_id: impl Into<String>,
        resource_owner: impl Into<String>,
    ) -> Self {
        Self {
            aggregate_id: aggregate_id.into(),
            instance_id: instance_id.into(),
            resource_owner: resource_owner.into(),
            ..Self::default()
        }
    }

    /// Whether any committed event has been folded.
    pub fn has_events(&self) -> bool {
        self.processed_sequence > 0
    }

    /// Version to push with when this model read the aggregate's whole stream.
    pub fn expected_version(&self) -> ExpectedVersion {
        ExpectedVersion::Exact(self.processed_sequence)
    }

    /// `None` until a committed event has been folded.
    pub fn details(&self) -> Option<ObjectDetails> {
        let event_date = self.change_date?;
        if !self.has_events() {
            return None;
        }
        Some(ObjectDetails {
            sequence: self.processed_sequence,
            event_date,
            resource_owner: self.resource_owner.clone(),
        })
    }

    fn check_order<E>(&self, event: &Event<E>) -> Result<(), ReduceError> {
        if event.is_pending() || event.position() > self.last_position {
            return Ok(());
        }
        Err(ReduceError::NonMonotonicPosition {
            last: self.last_position,
            found: event.position(),
            event_type: event.event_type().to_string(),
        })
    }

    fn track<E>(&mut self, event: &Event<E>) {
        let aggregate = event.aggregate();
        if self.aggregate_id.is_empty() {
            self.aggregate_id = aggregate.id.clone();
        }
        if self.instance_id.is_empty() {
            self.instance_id = aggregate.instance_id.clone();
        }
        if self.resource_owner.is_empty() {
            self.resource_owner = aggregate.owner.clone();
        }
        if event.is_pending() {
            return;
        }
        self.processed_sequence = event.sequence();
        self.last_position = event.position();
        self.change_date = Some(event.created_at());
    }
}

/// Per-aggregate (or per-query-scope) accumulator of derived state.
pub trait WriteModel<E>: Send {
    /// Events relevant to this model. Must be stable for one configuration and
    /// always ascending.
    fn query(&self) -> SearchQuery;

    fn base(&self) -> &WriteModelBase;

    fn base_mut(&mut self) -> &mut WriteModelBase;

    /// Folds one event into derived state. Event kinds the model does not care
    /// about are ignored.
    fn apply(&mut self, event: &Event<E>);

    /// Folds `events` in order and advances `processed_sequence`, also past
    /// events `apply` ignored.
    fn reduce(&mut self, events: &[Event<E>]) -> CommandResult<()> {
        for event in events {
            self.base().check_order(event)?;
            self.apply(event);
            self.base_mut().track(event);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use irongate_core::AggregateRef;
    use proptest::prelude::*;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Tally {
        Set(i64),
        Add(i64),
        Noise,
    }

    #[derive(Debug, Default, Clone, PartialEq, Eq)]
    struct TallyModel {
        base: WriteModelBase,
        value: i64,
    }

    impl WriteModel<Tally> for TallyModel {
        fn query(&self) -> SearchQuery {
            SearchQuery::builder()
                .add_query()
                .aggregate_types(["tally"])
                .build()
        }

        fn base(&self) -> &WriteModelBase {
            &self.base
        }

        fn base_mut(&mut self) -> &mut WriteModelBase {
            &mut self.base
        }

        fn apply(&mut self, event: &Event<Tally>) {
            match event.payload() {
                Tally::Set(v) => self.value = *v,
                Tally::Add(v) => self.value = self.value.saturating_add(*v),
                Tally::Noise => {}
            }
        }
    }

    fn committed(seq: u64, payload: Tally) -> Event<Tally> {
        Event::committed(
            AggregateRef::new("tally", "t1", "i1", "owner-1"),
            "tally.changed",
            seq,
            seq * 10,
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            "tester",
            payload,
        )
    }

    fn stream(payloads: Vec<Tally>) -> Vec<Event<Tally>> {
        payloads
            .into_iter()
            .enumerate()
            .map(|(i, p)| committed(i as u64 + 1, p))
            .collect()
    }

    #[test]
    fn reduce_tracks_base_fields_and_ignored_events() {
        let mut model = TallyModel::default();
        model
            .reduce(&stream(vec![Tally::Set(3), Tally::Add(2), Tally::Noise]))
            .unwrap();

        assert_eq!(model.value, 5);
        assert_eq!(model.base.processed_sequence, 3);
        assert_eq!(model.base.aggregate_id, "t1");
        assert_eq!(model.base.resource_owner, "owner-1");
        assert_eq!(model.base.expected_version(), ExpectedVersion::Exact(3));
        let details = model.base.details().unwrap();
        assert_eq!(details.sequence, 3);
        assert_eq!(details.resource_owner, "owner-1");
    }

    #[test]
    fn empty_model_has_no_details() {
        let model = TallyModel::default();
        assert!(!model.base.has_events());
        assert!(model.base.details().is_none());
        assert_eq!(model.base.expected_version(), ExpectedVersion::Exact(0));
    }

    #[test]
    fn out_of_order_events_are_rejected() {
        let mut events = stream(vec![Tally::Set(1), Tally::Set(2)]);
        events.swap(0, 1);

        let mut model = TallyModel::default();
        let err = model.reduce(&events).unwrap_err();
        assert!(err.is_internal());
    }

    #[test]
    fn pending_events_do_not_advance_sequence() {
        let mut model = TallyModel::default();
        model.reduce(&stream(vec![Tally::Set(1)])).unwrap();

        let pending = Event::committed(
            AggregateRef::new("tally", "t1", "i1", "owner-1"),
            "tally.changed",
            0,
            0,
            Utc::now(),
            "",
            Tally::Add(4),
        );
        model.reduce(&[pending]).unwrap();

        assert_eq!(model.value, 5);
        assert_eq!(model.base.processed_sequence, 1);
    }

    fn tally_strategy() -> impl Strategy<Value = Tally> {
        prop_oneof![
            (-1000i64..1000).prop_map(Tally::Set),
            (-1000i64..1000).prop_map(Tally::Add),
            Just(Tally::Noise),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            .. ProptestConfig::default()
        })]

        #[test]
        fn reduction_is_deterministic(payloads in prop::collection::vec(tally_strategy(), 0..40)) {
            let events = stream(payloads);

            let mut first = TallyModel::default();
            first.reduce(&events).unwrap();
            let mut second = TallyModel::default();
            second.reduce(&events).unwrap();

            prop_assert_eq!(first, second);
        }

        #[test]
        fn reducing_in_chunks_equals_reducing_at_once(
            payloads in prop::collection::vec(tally_strategy(), 1..40),
            split in 0usize..40,
        ) {
            let events = stream(payloads);
            let split = split.min(events.len());

            let mut whole = TallyModel::default();
            whole.reduce(&events).unwrap();

            let mut chunked = TallyModel::default();
            chunked.reduce(&events[..split]).unwrap();
            chunked.reduce(&events[split..]).unwrap();

            prop_assert_eq!(whole, chunked);
        }
    }
}
