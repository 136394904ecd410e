//! Static input checks shared by several preparation steps.

use irongate_core::{CommandError, CommandResult};

pub(crate) fn require(value: &str, error: &'static str) -> CommandResult<()> {
    if value.trim().is_empty() {
        return Err(CommandError::invalid_argument(error));
    }
    Ok(())
}

/// Lower-cases `domain` and checks it is a plausible host name.
pub fn normalize_domain(domain: &str) -> CommandResult<String> {
    let domain = domain.trim().to_lowercase();
    let labels_ok = domain.split('.').all(|label| {
        !label.is_empty()
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    });
    if domain.is_empty() || domain.len() > 253 || !labels_ok {
        return Err(CommandError::invalid_argument("Errors.Domain.Invalid"));
    }
    Ok(domain)
}

/// Derives an org's default domain from its name: `"Acme Corp"` under
/// `iam.example` becomes `acme-corp.iam.example`.
pub fn default_org_domain(org_name: &str, instance_domain: &str) -> CommandResult<String> {
    let label: String = org_name
        .trim()
        .to_lowercase()
        .replace(' ', "-")
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
        .collect();
    let label = label.trim_matches('-');
    if label.is_empty() {
        return Err(CommandError::invalid_argument("Errors.Org.Domain.EmptyLabel"));
    }
    normalize_domain(&format!("{label}.{instance_domain}"))
}
