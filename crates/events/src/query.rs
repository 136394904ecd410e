//! Declarative event selection.
//!
//! A [`SearchQuery`] is consumed by write models (their `query()`), by ad hoc
//! cross-aggregate projections inside preparation steps and by every store
//! backend. The in-memory store and the transactional read set evaluate it with
//! [`SearchQuery::matches`] + [`SearchQuery::arrange`]; the SQL store translates it.
//!
//! ## Shape
//!
//! Top-level filters (instance, owner, creator, position/creation bounds) are
//! AND-ed. Sub-queries are OR-ed with each other; inside one sub-query every
//! non-empty list is an IN filter and the lists are AND-ed. A query without
//! sub-queries selects every event in scope.

use chrono::{DateTime, Utc};

use irongate_core::AggregateRef;

use crate::envelope::Event;

/// Read access to the metadata a query filters on.
pub trait EventMetadata {
    fn aggregate(&self) -> &AggregateRef;
    fn event_type(&self) -> &str;
    fn sequence(&self) -> u64;
    fn position(&self) -> u64;
    fn created_at(&self) -> DateTime<Utc>;
    fn creator(&self) -> &str;
}

impl<E> EventMetadata for Event<E> {
    fn aggregate(&self) -> &AggregateRef {
        Event::aggregate(self)
    }

    fn event_type(&self) -> &str {
        Event::event_type(self)
    }

    fn sequence(&self) -> u64 {
        Event::sequence(self)
    }

    fn position(&self) -> u64 {
        Event::position(self)
    }

    fn created_at(&self) -> DateTime<Utc> {
        Event::created_at(self)
    }

    fn creator(&self) -> &str {
        Event::creator(self)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Order {
    /// Causal order; the only order write models fold in.
    #[default]
    Asc,
    /// Most recent first, for "latest N" style reads.
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchQuery {
    pub instance_ids: Vec<String>,
    pub owner: Option<String>,
    pub order: Order,
    pub limit: Option<usize>,
    pub position_after: Option<u64>,
    pub created_after: Option<DateTime<Utc>>,
    pub creator: Option<String>,
    pub sub_queries: Vec<SubQuery>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubQuery {
    pub aggregate_types: Vec<String>,
    pub aggregate_ids: Vec<String>,
    pub event_types: Vec<String>,
    pub sequence_greater: Option<u64>,
    pub sequence_less: Option<u64>,
}

impl SearchQuery {
    pub fn builder() -> SearchQueryBuilder {
        SearchQueryBuilder {
            query: SearchQuery::default(),
        }
    }

    /// Whether `event` is selected by this query.
    ///
    /// Pending events (position 0) are not subject to position or sequence bounds:
    /// they will be committed after everything already on record.
    pub fn matches<T: EventMetadata + ?Sized>(&self, event: &T) -> bool {
        let aggregate = event.aggregate();
        let pending = event.position() == 0;

        if !self.instance_ids.is_empty() && !self.instance_ids.contains(&aggregate.instance_id) {
            return false;
        }
        if let Some(owner) = &self.owner {
            if &aggregate.owner != owner {
                return false;
            }
        }
        if let Some(creator) = &self.creator {
            if event.creator() != creator {
                return false;
            }
        }
        if let Some(after) = self.created_after {
            if event.created_at() < after {
                return false;
            }
        }
        if let Some(after) = self.position_after {
            if !pending && event.position() <= after {
                return false;
            }
        }

        self.sub_queries.is_empty() || self.sub_queries.iter().any(|q| q.matches(event, pending))
    }

    /// Orders `events` as requested and applies the limit.
    ///
    /// Pending events sort after every committed one in ascending order.
    pub fn arrange<T: EventMetadata>(&self, mut events: Vec<T>) -> Vec<T> {
        events.sort_by_key(|e| (e.position() == 0, e.position()));
        if self.order == Order::Desc {
            events.reverse();
        }
        if let Some(limit) = self.limit {
            events.truncate(limit);
        }
        events
    }
}

impl SubQuery {
    fn matches<T: EventMetadata + ?Sized>(&self, event: &T, pending: bool) -> bool {
        let aggregate = event.aggregate();

        if !self.aggregate_types.is_empty() && !self.aggregate_types.contains(&aggregate.aggregate_type) {
            return false;
        }
        if !self.aggregate_ids.is_empty() && !self.aggregate_ids.contains(&aggregate.id) {
            return false;
        }
        if !self.event_types.is_empty() && !self.event_types.iter().any(|t| t == event.event_type()) {
            return false;
        }
        if pending {
            return true;
        }
        if let Some(greater) = self.sequence_greater {
            if event.sequence() <= greater {
                return false;
            }
        }
        if let Some(less) = self.sequence_less {
            if event.sequence() >= less {
                return false;
            }
        }
        true
    }
}

fn strings(values: impl IntoIterator<Item = impl Into<String>>) -> impl Iterator<Item = String> {
    values.into_iter().map(Into::into)
}

#[derive(Debug, Clone)]
pub struct SearchQueryBuilder {
    query: SearchQuery,
}

impl SearchQueryBuilder {
    pub fn instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.query.instance_ids.push(instance_id.into());
        self
    }

    pub fn instance_ids(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.query.instance_ids.extend(strings(ids));
        self
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.query.owner = Some(owner.into());
        self
    }

    pub fn order_asc(mut self) -> Self {
        self.query.order = Order::Asc;
        self
    }

    pub fn order_desc(mut self) -> Self {
        self.query.order = Order::Desc;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.query.limit = Some(limit);
        self
    }

    pub fn position_after(mut self, position: u64) -> Self {
        self.query.position_after = Some(position);
        self
    }

    pub fn created_after(mut self, at: DateTime<Utc>) -> Self {
        self.query.created_after = Some(at);
        self
    }

    pub fn creator(mut self, creator: impl Into<String>) -> Self {
        self.query.creator = Some(creator.into());
        self
    }

    /// Starts an OR-ed sub-query; finish it with [`SubQueryBuilder::builder`].
    pub fn add_query(self) -> SubQueryBuilder {
        SubQueryBuilder {
            parent: self,
            sub: SubQuery::default(),
        }
    }

    pub fn build(self) -> SearchQuery {
        self.query
    }
}

#[derive(Debug, Clone)]
pub struct SubQueryBuilder {
    parent: SearchQueryBuilder,
    sub: SubQuery,
}

impl SubQueryBuilder {
    pub fn aggregate_types(mut self, types: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.sub.aggregate_types.extend(strings(types));
        self
    }

    pub fn aggregate_ids(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.sub.aggregate_ids.extend(strings(ids));
        self
    }

    pub fn event_types(mut self, types: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.sub.event_types.extend(strings(types));
        self
    }

    pub fn sequence_greater(mut self, sequence: u64) -> Self {
        self.sub.sequence_greater = Some(sequence);
        self
    }

    pub fn sequence_less(mut self, sequence: u64) -> Self {
        self.sub.sequence_less = Some(sequence);
        self
    }

    /// Closes this sub-query and returns to the parent builder.
    pub fn builder(mut self) -> SearchQueryBuilder {
        self.parent.query.sub_queries.push(self.sub);
        self.parent
    }

    pub fn build(self) -> SearchQuery {
        self.builder().build()
    }
}
