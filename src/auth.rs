/// What an authenticated connection may do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Tenants and landlords acting through the application.
    Client,
    /// Listing and application systems pushing catalog updates. May also act as a client.
    Upstream,
}

/// Shared-secret check for the connection handshake. Catalog sync uses its own secret.
#[derive(Debug, Clone)]
pub struct Authenticator {
    password: String,
    upstream_password: String,
}

impl Authenticator {
    pub fn new(password: String, upstream_password: String) -> Self {
        Self {
            password,
            upstream_password,
        }
    }

    pub fn verify(&self, candidate: &str) -> Option<Role> {
        if constant_time_eq(&self.upstream_password, candidate) {
            Some(Role::Upstream)
        } else if constant_time_eq(&self.password, candidate) {
            Some(Role::Client)
        } else {
            None
        }
    }
}

/// Compares every byte so timing does not leak the matching prefix length.
fn constant_time_eq(expected: &str, candidate: &str) -> bool {
    let expected = expected.as_bytes();
    let candidate = candidate.as_bytes();
    if expected.len() != candidate.len() {
        return false;
    }
    expected
        .iter()
        .zip(candidate)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_only_the_configured_passwords() {
        let auth = Authenticator::new("viewings".into(), "catalog-sync".into());
        assert_eq!(auth.verify("viewings"), Some(Role::Client));
        assert_eq!(auth.verify("catalog-sync"), Some(Role::Upstream));
        assert_eq!(auth.verify("viewing"), None);
        assert_eq!(auth.verify("viewingz"), None);
        assert_eq!(auth.verify(""), None);
    }
}
