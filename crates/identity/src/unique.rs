//! Unique constraint keys claimed by IAM events.

use irongate_events::UniqueConstraint;

pub const ORG_NAME: &str = "org_name";
pub const ORG_DOMAIN: &str = "org_domain";
pub const INSTANCE_DOMAIN: &str = "instance_domain";
pub const USERNAME: &str = "usernames";
pub const MEMBER: &str = "member";

pub fn add_org_name(name: &str) -> UniqueConstraint {
    UniqueConstraint::add(ORG_NAME, name, "Errors.Org.AlreadyExists")
}

pub fn remove_org_name(name: &str) -> UniqueConstraint {
    UniqueConstraint::remove(ORG_NAME, name)
}

/// A verified org domain belongs to exactly one org of the instance.
pub fn add_org_domain(domain: &str) -> UniqueConstraint {
    UniqueConstraint::add(ORG_DOMAIN, domain, "Errors.Org.Domain.AlreadyExists")
}

pub fn remove_org_domain(domain: &str) -> UniqueConstraint {
    UniqueConstraint::remove(ORG_DOMAIN, domain)
}

/// Instance domains route requests, so they are unique across all instances.
pub fn add_instance_domain(domain: &str) -> UniqueConstraint {
    UniqueConstraint::add(INSTANCE_DOMAIN, domain, "Errors.Instance.Domain.AlreadyExists").global()
}

pub fn remove_instance_domain(domain: &str) -> UniqueConstraint {
    UniqueConstraint::remove(INSTANCE_DOMAIN, domain).global()
}

/// With login-must-be-domain the login is `username@org-domain`, so the username
/// only has to be unique inside its org. Otherwise it is unique in the instance.
fn username_field(username: &str, org_id: &str, login_must_be_domain: bool) -> String {
    if login_must_be_domain {
        format!("{username}{org_id}")
    } else {
        username.to_string()
    }
}

pub fn add_username(username: &str, org_id: &str, login_must_be_domain: bool) -> UniqueConstraint {
    UniqueConstraint::add(
        USERNAME,
        username_field(username, org_id, login_must_be_domain),
        "Errors.User.AlreadyExists",
    )
}

pub fn remove_username(username: &str, org_id: &str, login_must_be_domain: bool) -> UniqueConstraint {
    UniqueConstraint::remove(USERNAME, username_field(username, org_id, login_must_be_domain))
}

pub fn add_member(org_id: &str, user_id: &str) -> UniqueConstraint {
    UniqueConstraint::add(MEMBER, format!("{org_id}:{user_id}"), "Errors.Org.Member.AlreadyExists")
}

pub fn remove_member(org_id: &str, user_id: &str) -> UniqueConstraint {
    UniqueConstraint::remove(MEMBER, format!("{org_id}:{user_id}"))
}
