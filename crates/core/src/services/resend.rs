use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::registry::schema::{ensure_email, ensure_present, parse_params};
use crate::registry::{
    endpoint, ActionError, BuildRequest, HttpMethod, ServiceActions, UpstreamRequest, Validate,
    ValidationError,
};

pub const BASE_URL: &str = "https://api.resend.com";
pub const DEFAULT_SENDER_DOMAIN: &str = "grove.place";

const ACTIONS: &[&str] = &["send_email"];

/// A single address or a list of addresses.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Recipients {
    One(String),
    Many(Vec<String>),
}

impl Recipients {
    fn validate(&self, field: &str) -> Result<(), ValidationError> {
        match self {
            Self::One(address) => ensure_email(field, address),
            Self::Many(addresses) => {
                addresses.iter().try_for_each(|address| ensure_email(field, address))
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct EmailTag {
    pub name: String,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct SendEmail {
    pub from: String,
    pub to: Recipients,
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cc: Option<Recipients>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bcc: Option<Recipients>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<EmailTag>>,
}

impl Validate for SendEmail {
    fn validate(&self) -> Result<(), ValidationError> {
        ensure_email("from", &self.from)?;
        self.to.validate("to")?;
        ensure_present("subject", &self.subject)?;
        if let Some(reply_to) = &self.reply_to {
            ensure_email("reply_to", reply_to)?;
        }
        if let Some(cc) = &self.cc {
            cc.validate("cc")?;
        }
        if let Some(bcc) = &self.bcc {
            bcc.validate("bcc")?;
        }
        Ok(())
    }
}

impl SendEmail {
    fn ensure_sender_domain(&self, domain: &str) -> Result<(), ValidationError> {
        let suffix = format!("@{}", domain.trim_start_matches('@'));
        if !self.from.to_ascii_lowercase().ends_with(&suffix.to_ascii_lowercase()) {
            return Err(ValidationError::new(
                "from",
                format!("only {suffix} sender addresses are permitted"),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResendAction {
    SendEmail(SendEmail),
}

impl BuildRequest for ResendAction {
    fn build(&self, base_url: &Url) -> UpstreamRequest {
        match self {
            Self::SendEmail(params) => {
                UpstreamRequest::new(HttpMethod::Post, endpoint(base_url, &["emails"], &[]))
                    .with_header("Content-Type", "application/json")
                    .with_json(serde_json::to_value(params).unwrap_or(Value::Null))
            }
        }
    }
}

/// Resend actions restricted to a single sender domain.
#[derive(Clone, Debug)]
pub struct ResendActions {
    sender_domain: String,
}

impl Default for ResendActions {
    fn default() -> Self {
        Self::new(DEFAULT_SENDER_DOMAIN)
    }
}

impl ResendActions {
    pub fn new(sender_domain: impl Into<String>) -> Self {
        Self { sender_domain: sender_domain.into() }
    }

    pub fn parse(&self, action: &str, params: &Value) -> Result<ResendAction, ActionError> {
        match action {
            "send_email" => {
                let email: SendEmail = parse_params(params)?;
                email.ensure_sender_domain(&self.sender_domain)?;
                Ok(ResendAction::SendEmail(email))
            }
            other => Err(ActionError::UnknownAction(other.to_string())),
        }
    }
}

impl ServiceActions for ResendActions {
    fn action_names(&self) -> &'static [&'static str] {
        ACTIONS
    }

    fn prepare(&self, action: &str, params: &Value) -> Result<Box<dyn BuildRequest>, ActionError> {
        Ok(Box::new(self.parse(action, params)?))
    }
}
