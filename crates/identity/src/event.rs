//! The closed family of IAM events and its explicit codec.
//!
//! Every event kind is a variant of [`IamEvent`]; write models pattern-match on
//! it, so a new kind is an exhaustiveness question for each model. The unique
//! constraint operations an event implies are derived from its payload here, in
//! one place.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use irongate_core::AggregateRef;
use irongate_events::{CodecError, EventCodec, EventPayload, UniqueConstraint};

use crate::unique;

pub mod types {
    pub const INSTANCE_ADDED: &str = "instance.added";
    pub const INSTANCE_REMOVED: &str = "instance.removed";
    pub const INSTANCE_DEFAULT_ORG_SET: &str = "instance.default.org.set";
    pub const INSTANCE_DOMAIN_ADDED: &str = "instance.domain.added";
    pub const INSTANCE_DOMAIN_PRIMARY_SET: &str = "instance.domain.primary.set";
    pub const INSTANCE_DOMAIN_REMOVED: &str = "instance.domain.removed";

    pub const ORG_ADDED: &str = "org.added";
    pub const ORG_CHANGED: &str = "org.changed";
    pub const ORG_DEACTIVATED: &str = "org.deactivated";
    pub const ORG_REACTIVATED: &str = "org.reactivated";
    pub const ORG_REMOVED: &str = "org.removed";

    pub const ORG_DOMAIN_ADDED: &str = "org.domain.added";
    pub const ORG_DOMAIN_VERIFIED: &str = "org.domain.verified";
    pub const ORG_DOMAIN_PRIMARY_SET: &str = "org.domain.primary.set";
    pub const ORG_DOMAIN_REMOVED: &str = "org.domain.removed";

    pub const ORG_MEMBER_ADDED: &str = "org.member.added";
    pub const ORG_MEMBER_CHANGED: &str = "org.member.changed";
    pub const ORG_MEMBER_REMOVED: &str = "org.member.removed";
    pub const ORG_MEMBER_CASCADE_REMOVED: &str = "org.member.cascade.removed";

    pub const USER_HUMAN_ADDED: &str = "user.human.added";
    pub const USER_USERNAME_CHANGED: &str = "user.username.changed";
    pub const USER_DEACTIVATED: &str = "user.deactivated";
    pub const USER_REACTIVATED: &str = "user.reactivated";
    pub const USER_REMOVED: &str = "user.removed";
}

// ─────────────────────────────────────────────────────────────────────────────
// Payloads
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceAdded {
    pub name: String,
}

/// Releases every constraint of the instance, and its globally unique domains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRemoved {
    pub name: String,
    pub domains: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDefaultOrgSet {
    pub org_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDomainAdded {
    pub domain: String,
    /// Generated at setup; cannot be removed.
    pub generated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDomainPrimarySet {
    pub domain: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDomainRemoved {
    pub domain: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgAdded {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgChanged {
    pub name: String,
    pub old_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OrgDeactivated {}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OrgReactivated {}

/// A username that was active in an org when it was removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgUsername {
    pub username: String,
    pub login_must_be_domain: bool,
}

/// Carries everything the org held claims on, so removal can release them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgRemoved {
    pub name: String,
    pub usernames: Vec<OrgUsername>,
    pub verified_domains: Vec<String>,
    pub member_user_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgDomainAdded {
    pub domain: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgDomainVerified {
    pub domain: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgDomainPrimarySet {
    pub domain: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgDomainRemoved {
    pub domain: String,
    pub was_verified: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberAdded {
    pub user_id: String,
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberChanged {
    pub user_id: String,
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRemoved {
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HumanAdded {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub login_must_be_domain: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsernameChanged {
    pub username: String,
    pub old_username: String,
    pub login_must_be_domain: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserDeactivated {}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserReactivated {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRemoved {
    pub username: String,
    pub login_must_be_domain: bool,
}

/// An event type this codec does not know (written by another subsystem).
///
/// Write models ignore it but still advance past its sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnknownEvent {
    pub event_type: String,
    pub payload: JsonValue,
}

// ─────────────────────────────────────────────────────────────────────────────
// Event family
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum IamEvent {
    InstanceAdded(InstanceAdded),
    InstanceRemoved(InstanceRemoved),
    InstanceDefaultOrgSet(InstanceDefaultOrgSet),
    InstanceDomainAdded(InstanceDomainAdded),
    InstanceDomainPrimarySet(InstanceDomainPrimarySet),
    InstanceDomainRemoved(InstanceDomainRemoved),

    OrgAdded(OrgAdded),
    OrgChanged(OrgChanged),
    OrgDeactivated(OrgDeactivated),
    OrgReactivated(OrgReactivated),
    OrgRemoved(OrgRemoved),

    OrgDomainAdded(OrgDomainAdded),
    OrgDomainVerified(OrgDomainVerified),
    OrgDomainPrimarySet(OrgDomainPrimarySet),
    OrgDomainRemoved(OrgDomainRemoved),

    OrgMemberAdded(MemberAdded),
    OrgMemberChanged(MemberChanged),
    OrgMemberRemoved(MemberRemoved),
    OrgMemberCascadeRemoved(MemberRemoved),

    HumanAdded(HumanAdded),
    UsernameChanged(UsernameChanged),
    UserDeactivated(UserDeactivated),
    UserReactivated(UserReactivated),
    UserRemoved(UserRemoved),

    Unknown(UnknownEvent),
}

impl EventPayload for IamEvent {
    fn event_type(&self) -> &'static str {
        use types::*;
        match self {
            IamEvent::InstanceAdded(_) => INSTANCE_ADDED,
            IamEvent::InstanceRemoved(_) => INSTANCE_REMOVED,
            IamEvent::InstanceDefaultOrgSet(_) => INSTANCE_DEFAULT_ORG_SET,
            IamEvent::InstanceDomainAdded(_) => INSTANCE_DOMAIN_ADDED,
            IamEvent::InstanceDomainPrimarySet(_) => INSTANCE_DOMAIN_PRIMARY_SET,
            IamEvent::InstanceDomainRemoved(_) => INSTANCE_DOMAIN_REMOVED,
            IamEvent::OrgAdded(_) => ORG_ADDED,
            IamEvent::OrgChanged(_) => ORG_CHANGED,
            IamEvent::OrgDeactivated(_) => ORG_DEACTIVATED,
            IamEvent::OrgReactivated(_) => ORG_REACTIVATED,
            IamEvent::OrgRemoved(_) => ORG_REMOVED,
            IamEvent::OrgDomainAdded(_) => ORG_DOMAIN_ADDED,
            IamEvent::OrgDomainVerified(_) => ORG_DOMAIN_VERIFIED,
            IamEvent::OrgDomainPrimarySet(_) => ORG_DOMAIN_PRIMARY_SET,
            IamEvent::OrgDomainRemoved(_) => ORG_DOMAIN_REMOVED,
            IamEvent::OrgMemberAdded(_) => ORG_MEMBER_ADDED,
            IamEvent::OrgMemberChanged(_) => ORG_MEMBER_CHANGED,
            IamEvent::OrgMemberRemoved(_) => ORG_MEMBER_REMOVED,
            IamEvent::OrgMemberCascadeRemoved(_) => ORG_MEMBER_CASCADE_REMOVED,
            IamEvent::HumanAdded(_) => USER_HUMAN_ADDED,
            IamEvent::UsernameChanged(_) => USER_USERNAME_CHANGED,
            IamEvent::UserDeactivated(_) => USER_DEACTIVATED,
            IamEvent::UserReactivated(_) => USER_REACTIVATED,
            IamEvent::UserRemoved(_) => USER_REMOVED,
            // never pushed; the codec refuses to encode it
            IamEvent::Unknown(_) => "unknown",
        }
    }

    fn unique_constraints(&self, aggregate: &AggregateRef) -> Vec<UniqueConstraint> {
        match self {
            IamEvent::InstanceRemoved(e) => {
                let mut ops = vec![UniqueConstraint::remove_instance()];
                ops.extend(e.domains.iter().map(|d| unique::remove_instance_domain(d)));
                ops
            }
            IamEvent::InstanceDomainAdded(e) => vec![unique::add_instance_domain(&e.domain)],
            IamEvent::InstanceDomainRemoved(e) => vec![unique::remove_instance_domain(&e.domain)],

            IamEvent::OrgAdded(e) => vec![unique::add_org_name(&e.name)],
            IamEvent::OrgChanged(e) => vec![
                unique::remove_org_name(&e.old_name),
                unique::add_org_name(&e.name),
            ],
            IamEvent::OrgRemoved(e) => {
                let org_id = &aggregate.id;
                let mut ops = vec![unique::remove_org_name(&e.name)];
                ops.extend(
                    e.usernames
                        .iter()
                        .map(|u| unique::remove_username(&u.username, org_id, u.login_must_be_domain)),
                );
                ops.extend(e.verified_domains.iter().map(|d| unique::remove_org_domain(d)));
                ops.extend(e.member_user_ids.iter().map(|u| unique::remove_member(org_id, u)));
                ops
            }

            IamEvent::OrgDomainVerified(e) => vec![unique::add_org_domain(&e.domain)],
            IamEvent::OrgDomainRemoved(e) if e.was_verified => {
                vec![unique::remove_org_domain(&e.domain)]
            }

            IamEvent::OrgMemberAdded(e) => vec![unique::add_member(&aggregate.id, &e.user_id)],
            IamEvent::OrgMemberRemoved(e) | IamEvent::OrgMemberCascadeRemoved(e) => {
                vec![unique::remove_member(&aggregate.id, &e.user_id)]
            }

            IamEvent::HumanAdded(e) => vec![unique::add_username(
                &e.username,
                &aggregate.owner,
                e.login_must_be_domain,
            )],
            IamEvent::UsernameChanged(e) => vec![
                unique::remove_username(&e.old_username, &aggregate.owner, e.login_must_be_domain),
                unique::add_username(&e.username, &aggregate.owner, e.login_must_be_domain),
            ],
            IamEvent::UserRemoved(e) => vec![unique::remove_username(
                &e.username,
                &aggregate.owner,
                e.login_must_be_domain,
            )],

            _ => Vec::new(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Codec
// ─────────────────────────────────────────────────────────────────────────────

/// JSON codec for [`IamEvent`]; handed to the eventstore explicitly.
#[derive(Debug, Clone, Copy, Default)]
pub struct IamCodec;

fn encode<T: Serialize>(event_type: &str, payload: &T) -> Result<JsonValue, CodecError> {
    serde_json::to_value(payload).map_err(|source| CodecError::Malformed {
        event_type: event_type.to_string(),
        source,
    })
}

fn decode<T: DeserializeOwned>(event_type: &str, payload: &JsonValue) -> Result<T, CodecError> {
    T::deserialize(payload).map_err(|source| CodecError::Malformed {
        event_type: event_type.to_string(),
        source,
    })
}

impl EventCodec for IamCodec {
    type Event = IamEvent;

    fn encode(&self, event: &IamEvent) -> Result<JsonValue, CodecError> {
        let t = event.event_type();
        match event {
            IamEvent::InstanceAdded(p) => encode(t, p),
            IamEvent::InstanceRemoved(p) => encode(t, p),
            IamEvent::InstanceDefaultOrgSet(p) => encode(t, p),
            IamEvent::InstanceDomainAdded(p) => encode(t, p),
            IamEvent::InstanceDomainPrimarySet(p) => encode(t, p),
            IamEvent::InstanceDomainRemoved(p) => encode(t, p),
            IamEvent::OrgAdded(p) => encode(t, p),
            IamEvent::OrgChanged(p) => encode(t, p),
            IamEvent::OrgDeactivated(p) => encode(t, p),
            IamEvent::OrgReactivated(p) => encode(t, p),
            IamEvent::OrgRemoved(p) => encode(t, p),
            IamEvent::OrgDomainAdded(p) => encode(t, p),
            IamEvent::OrgDomainVerified(p) => encode(t, p),
            IamEvent::OrgDomainPrimarySet(p) => encode(t, p),
            IamEvent::OrgDomainRemoved(p) => encode(t, p),
            IamEvent::OrgMemberAdded(p) => encode(t, p),
            IamEvent::OrgMemberChanged(p) => encode(t, p),
            IamEvent::OrgMemberRemoved(p) | IamEvent::OrgMemberCascadeRemoved(p) => encode(t, p),
            IamEvent::HumanAdded(p) => encode(t, p),
            IamEvent::UsernameChanged(p) => encode(t, p),
            IamEvent::UserDeactivated(p) => encode(t, p),
            IamEvent::UserReactivated(p) => encode(t, p),
            IamEvent::UserRemoved(p) => encode(t, p),
            IamEvent::Unknown(u) => Err(CodecError::NotEncodable(u.event_type.clone())),
        }
    }

    fn decode(&self, event_type: &str, payload: &JsonValue) -> Result<IamEvent, CodecError> {
        use types::*;
        let t = event_type;
        let event = match event_type {
            INSTANCE_ADDED => IamEvent::InstanceAdded(decode(t, payload)?),
            INSTANCE_REMOVED => IamEvent::InstanceRemoved(decode(t, payload)?),
            INSTANCE_DEFAULT_ORG_SET => IamEvent::InstanceDefaultOrgSet(decode(t, payload)?),
            INSTANCE_DOMAIN_ADDED => IamEvent::InstanceDomainAdded(decode(t, payload)?),
            INSTANCE_DOMAIN_PRIMARY_SET => IamEvent::InstanceDomainPrimarySet(decode(t, payload)?),
            INSTANCE_DOMAIN_REMOVED => IamEvent::InstanceDomainRemoved(decode(t, payload)?),
            ORG_ADDED => IamEvent::OrgAdded(decode(t, payload)?),
            ORG_CHANGED => IamEvent::OrgChanged(decode(t, payload)?),
            ORG_DEACTIVATED => IamEvent::OrgDeactivated(decode(t, payload)?),
            ORG_REACTIVATED => IamEvent::OrgReactivated(decode(t, payload)?),
            ORG_REMOVED => IamEvent::OrgRemoved(decode(t, payload)?),
            ORG_DOMAIN_ADDED => IamEvent::OrgDomainAdded(decode(t, payload)?),
            ORG_DOMAIN_VERIFIED => IamEvent::OrgDomainVerified(decode(t, payload)?),
            ORG_DOMAIN_PRIMARY_SET => IamEvent::OrgDomainPrimarySet(decode(t, payload)?),
            ORG_DOMAIN_REMOVED => IamEvent::OrgDomainRemoved(decode(t, payload)?),
            ORG_MEMBER_ADDED => IamEvent::OrgMemberAdded(decode(t, payload)?),
            ORG_MEMBER_CHANGED => IamEvent::OrgMemberChanged(decode(t, payload)?),
            ORG_MEMBER_REMOVED => IamEvent::OrgMemberRemoved(decode(t, payload)?),
            ORG_MEMBER_CASCADE_REMOVED => IamEvent::OrgMemberCascadeRemoved(decode(t, payload)?),
            USER_HUMAN_ADDED => IamEvent::HumanAdded(decode(t, payload)?),
            USER_USERNAME_CHANGED => IamEvent::UsernameChanged(decode(t, payload)?),
            USER_DEACTIVATED => IamEvent::UserDeactivated(decode(t, payload)?),
            USER_REACTIVATED => IamEvent::UserReactivated(decode(t, payload)?),
            USER_REMOVED => IamEvent::UserRemoved(decode(t, payload)?),
            other => IamEvent::Unknown(UnknownEvent {
                event_type: other.to_string(),
                payload: payload.clone(),
            }),
        };
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use irongate_events::{ConstraintScope, UniqueAction};
    use serde_json::json;

    use super::*;

    fn org_agg() -> AggregateRef {
        AggregateRef::new("org", "org-1", "inst-1", "org-1")
    }

    #[test]
    fn codec_decodes_what_it_encodes() {
        let event = IamEvent::OrgRemoved(OrgRemoved {
            name: "Acme".into(),
            usernames: vec![OrgUsername {
                username: "ada".into(),
                login_must_be_domain: true,
            }],
            verified_domains: vec!["acme.example".into()],
            member_user_ids: vec!["user-1".into()],
        });

        let json = IamCodec.encode(&event).unwrap();
        let back = IamCodec.decode(event.event_type(), &json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn unknown_types_decode_to_catch_all() {
        let event = IamCodec
            .decode("project.added", &json!({ "name": "p" }))
            .unwrap();
        match event {
            IamEvent::Unknown(u) => assert_eq!(u.event_type, "project.added"),
            other => panic!("expected Unknown, got {other:?}"),
        }
    }

    #[test]
    fn unknown_events_cannot_be_encoded() {
        let event = IamEvent::Unknown(UnknownEvent {
            event_type: "project.added".into(),
            payload: json!({}),
        });
        assert!(matches!(
            IamCodec.encode(&event),
            Err(CodecError::NotEncodable(_))
        ));
    }

    #[test]
    fn malformed_payload_is_an_error() {
        let err = IamCodec.decode(types::ORG_ADDED, &json!({ "nom": 1 })).unwrap_err();
        assert!(matches!(err, CodecError::Malformed { .. }));
    }

    #[test]
    fn empty_payload_events_round_trip_through_empty_objects() {
        let json = IamCodec
            .encode(&IamEvent::OrgDeactivated(OrgDeactivated {}))
            .unwrap();
        assert_eq!(json, json!({}));
    }

    #[test]
    fn org_changed_swaps_name_claims() {
        let ops = IamEvent::OrgChanged(OrgChanged {
            name: "New".into(),
            old_name: "Old".into(),
        })
        .unique_constraints(&org_agg());

        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].action, UniqueAction::Remove);
        assert_eq!(ops[0].unique_field, "Old");
        assert_eq!(ops[1].action, UniqueAction::Add);
        assert_eq!(ops[1].unique_field, "New");
    }

    #[test]
    fn unverified_domain_removal_releases_nothing() {
        let ops = IamEvent::OrgDomainRemoved(OrgDomainRemoved {
            domain: "acme.example".into(),
            was_verified: false,
        })
        .unique_constraints(&org_agg());
        assert!(ops.is_empty());
    }

    #[test]
    fn instance_domains_are_global() {
        let ops = IamEvent::InstanceDomainAdded(InstanceDomainAdded {
            domain: "a.example".into(),
            generated: false,
        })
        .unique_constraints(&AggregateRef::new("instance", "inst-1", "inst-1", "inst-1"));
        assert_eq!(ops[0].scope, ConstraintScope::Global);
    }

    #[test]
    fn member_claim_is_keyed_by_org_and_user() {
        let ops = IamEvent::OrgMemberAdded(MemberAdded {
            user_id: "user-1".into(),
            roles: vec!["ORG_OWNER".into()],
        })
        .unique_constraints(&org_agg());
        assert_eq!(ops[0].unique_field, "org-1:user-1");
    }

    #[test]
    fn org_removal_releases_everything_it_held() {
        let ops = IamEvent::OrgRemoved(OrgRemoved {
            name: "Acme".into(),
            usernames: vec![
                OrgUsername {
                    username: "ada".into(),
                    login_must_be_domain: true,
                },
                OrgUsername {
                    username: "bob".into(),
                    login_must_be_domain: false,
                },
            ],
            verified_domains: vec!["acme.example".into()],
            member_user_ids: vec!["user-1".into()],
        })
        .unique_constraints(&org_agg());

        assert!(ops.iter().all(|op| op.action == UniqueAction::Remove));
        let fields: Vec<_> = ops.iter().map(|op| op.unique_field.as_str()).collect();
        assert_eq!(
            fields,
            ["Acme", "adaorg-1", "bob", "acme.example", "org-1:user-1"]
        );
    }
}
