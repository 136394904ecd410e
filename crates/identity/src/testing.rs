//! Helpers for building event histories in tests.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{TimeZone, Utc};

use irongate_auth::{Membership, PolicyChecker, Principal, PrincipalId, Role, Scope};
use irongate_core::{AggregateRef, StreamKey};
use irongate_events::{Event, InMemoryReadSet, PendingEvent};

use crate::event::*;
use crate::{instance, org, user, Authz};

pub const INSTANCE: &str = "inst-1";
pub const INSTANCE_DOMAIN: &str = "iam.example";

pub fn org_agg(org_id: &str) -> AggregateRef {
    org::aggregate(INSTANCE, org_id)
}

pub fn user_agg(user_id: &str, org_id: &str) -> AggregateRef {
    user::aggregate(INSTANCE, user_id, org_id)
}

pub fn instance_agg() -> AggregateRef {
    instance::aggregate(INSTANCE)
}

/// Commits `events` in order, numbering sequences per aggregate.
pub fn history(events: Vec<(AggregateRef, IamEvent)>) -> InMemoryReadSet<IamEvent> {
    let mut sequences: HashMap<StreamKey, u64> = HashMap::new();
    let committed = events
        .into_iter()
        .enumerate()
        .map(|(i, (agg, payload))| {
            let seq = sequences.entry(agg.stream_key()).or_default();
            *seq += 1;
            Event::committed(
                agg,
                irongate_events::EventPayload::event_type(&payload),
                *seq,
                i as u64 + 1,
                Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap(),
                "tester",
                payload,
            )
        })
        .collect();
    InMemoryReadSet::new(committed)
}

pub fn empty() -> InMemoryReadSet<IamEvent> {
    InMemoryReadSet::empty()
}

pub fn payloads(events: &[PendingEvent<IamEvent>]) -> Vec<IamEvent> {
    events.iter().map(|e| e.payload().clone()).collect()
}

pub fn admin() -> Authz {
    Authz::system()
}

/// A principal without any membership.
pub fn stranger() -> Authz {
    Authz::new(
        Arc::new(PolicyChecker::default()),
        Principal::new(PrincipalId::new("stranger")),
    )
}

pub fn org_owner(org_id: &str) -> Authz {
    Authz::new(
        Arc::new(PolicyChecker::default()),
        Principal::new(PrincipalId::new("owner")).with_membership(Membership {
            scope: Scope::org(INSTANCE, org_id),
            roles: vec![Role::ORG_OWNER],
        }),
    )
}

/// The test instance, as it exists before any org is added.
pub fn instance_created() -> (AggregateRef, IamEvent) {
    (
        instance_agg(),
        IamEvent::InstanceAdded(InstanceAdded { name: "Test".into() }),
    )
}

pub fn acme_added() -> Vec<(AggregateRef, IamEvent)> {
    let agg = org_agg("org-1");
    vec![
        (agg.clone(), IamEvent::OrgAdded(OrgAdded { name: "Acme".into() })),
        (
            agg.clone(),
            IamEvent::OrgDomainAdded(OrgDomainAdded {
                domain: "acme.iam.example".into(),
            }),
        ),
        (
            agg.clone(),
            IamEvent::OrgDomainVerified(OrgDomainVerified {
                domain: "acme.iam.example".into(),
            }),
        ),
        (
            agg,
            IamEvent::OrgDomainPrimarySet(OrgDomainPrimarySet {
                domain: "acme.iam.example".into(),
            }),
        ),
    ]
}

pub fn human_added(user_id: &str, org_id: &str, username: &str) -> (AggregateRef, IamEvent) {
    (
        user_agg(user_id, org_id),
        IamEvent::HumanAdded(HumanAdded {
            username: username.into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: format!("{username}@mail.example"),
            login_must_be_domain: true,
        }),
    )
}
