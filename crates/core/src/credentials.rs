use std::collections::BTreeMap;

use secrecy::{ExposeSecret, SecretString};

/// Source of upstream credentials, resolved once per dispatched request.
pub trait CredentialStore: Send + Sync {
    fn resolve(&self, service: &str) -> Option<SecretString>;
}

/// Credentials loaded from `[credentials]` config and `WARDEN_CREDENTIAL_<SERVICE>`.
#[derive(Clone, Debug, Default)]
pub struct ConfigCredentialStore {
    credentials: BTreeMap<String, SecretString>,
}

impl ConfigCredentialStore {
    pub fn new(credentials: BTreeMap<String, SecretString>) -> Self {
        Self { credentials }
    }

    /// Services with a non-empty credential, without exposing the values.
    pub fn configured_services(&self) -> Vec<String> {
        self.credentials
            .iter()
            .filter(|(_, value)| !value.expose_secret().trim().is_empty())
            .map(|(service, _)| service.clone())
            .collect()
    }
}

impl CredentialStore for ConfigCredentialStore {
    fn resolve(&self, service: &str) -> Option<SecretString> {
        self.credentials
            .get(service)
            .filter(|value| !value.expose_secret().trim().is_empty())
            .cloned()
    }
}
