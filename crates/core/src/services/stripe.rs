//! Read-only Stripe actions. Nothing here creates or mutates billing objects.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::registry::schema::{ensure_email, ensure_present, ensure_range, parse_params};
use crate::registry::{
    endpoint, ActionError, BuildRequest, HttpMethod, ServiceActions, UpstreamRequest, Validate,
    ValidationError,
};

pub const BASE_URL: &str = "https://api.stripe.com/v1";

const ACTIONS: &[&str] =
    &["list_customers", "get_customer", "list_subscriptions", "list_invoices", "get_invoice"];

fn default_limit() -> u64 {
    10
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    PastDue,
    Unpaid,
    Canceled,
    Incomplete,
    IncompleteExpired,
    Trialing,
    #[default]
    All,
}

impl SubscriptionStatus {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Unpaid => "unpaid",
            Self::Canceled => "canceled",
            Self::Incomplete => "incomplete",
            Self::IncompleteExpired => "incomplete_expired",
            Self::Trialing => "trialing",
            Self::All => "all",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Open,
    Paid,
    Uncollectible,
    Void,
}

impl InvoiceStatus {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Open => "open",
            Self::Paid => "paid",
            Self::Uncollectible => "uncollectible",
            Self::Void => "void",
        }
    }
}

/// Cursor pagination shared by every list endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct Cursor {
    pub starting_after: Option<String>,
    pub ending_before: Option<String>,
}

impl Cursor {
    fn append_to(&self, query: &mut Vec<(&'static str, String)>) {
        if let Some(starting_after) = &self.starting_after {
            query.push(("starting_after", starting_after.clone()));
        }
        if let Some(ending_before) = &self.ending_before {
            query.push(("ending_before", ending_before.clone()));
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ListCustomers {
    #[serde(default = "default_limit")]
    pub limit: u64,
    #[serde(flatten)]
    pub cursor: Cursor,
    pub email: Option<String>,
}

impl Validate for ListCustomers {
    fn validate(&self) -> Result<(), ValidationError> {
        ensure_range("limit", self.limit, 1, 100)?;
        if let Some(email) = &self.email {
            ensure_email("email", email)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct CustomerRef {
    pub customer_id: String,
}

impl Validate for CustomerRef {
    fn validate(&self) -> Result<(), ValidationError> {
        ensure_present("customer_id", &self.customer_id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ListSubscriptions {
    #[serde(default = "default_limit")]
    pub limit: u64,
    pub customer: Option<String>,
    #[serde(default)]
    pub status: SubscriptionStatus,
    #[serde(flatten)]
    pub cursor: Cursor,
}

impl Validate for ListSubscriptions {
    fn validate(&self) -> Result<(), ValidationError> {
        ensure_range("limit", self.limit, 1, 100)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ListInvoices {
    #[serde(default = "default_limit")]
    pub limit: u64,
    pub customer: Option<String>,
    pub subscription: Option<String>,
    pub status: Option<InvoiceStatus>,
    #[serde(flatten)]
    pub cursor: Cursor,
}

impl Validate for ListInvoices {
    fn validate(&self) -> Result<(), ValidationError> {
        ensure_range("limit", self.limit, 1, 100)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct InvoiceRef {
    pub invoice_id: String,
}

impl Validate for InvoiceRef {
    fn validate(&self) -> Result<(), ValidationError> {
        ensure_present("invoice_id", &self.invoice_id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StripeAction {
    ListCustomers(ListCustomers),
    GetCustomer(CustomerRef),
    ListSubscriptions(ListSubscriptions),
    ListInvoices(ListInvoices),
    GetInvoice(InvoiceRef),
}

impl StripeAction {
    pub fn parse(action: &str, params: &Value) -> Result<Self, ActionError> {
        let parsed = match action {
            "list_customers" => Self::ListCustomers(parse_params(params)?),
            "get_customer" => Self::GetCustomer(parse_params(params)?),
            "list_subscriptions" => Self::ListSubscriptions(parse_params(params)?),
            "list_invoices" => Self::ListInvoices(parse_params(params)?),
            "get_invoice" => Self::GetInvoice(parse_params(params)?),
            other => return Err(ActionError::UnknownAction(other.to_string())),
        };
        Ok(parsed)
    }
}

fn stripe_get(url: Url) -> UpstreamRequest {
    UpstreamRequest::new(HttpMethod::Get, url)
        .with_header("Content-Type", "application/x-www-form-urlencoded")
}

impl BuildRequest for StripeAction {
    fn build(&self, base_url: &Url) -> UpstreamRequest {
        match self {
            Self::ListCustomers(params) => {
                let mut query = vec![("limit", params.limit.to_string())];
                params.cursor.append_to(&mut query);
                if let Some(email) = &params.email {
                    query.push(("email", email.clone()));
                }
                stripe_get(endpoint(base_url, &["customers"], &query))
            }
            Self::GetCustomer(params) => {
                stripe_get(endpoint(base_url, &["customers", &params.customer_id], &[]))
            }
            Self::ListSubscriptions(params) => {
                let mut query = vec![
                    ("limit", params.limit.to_string()),
                    ("status", params.status.as_str().to_string()),
                ];
                if let Some(customer) = &params.customer {
                    query.push(("customer", customer.clone()));
                }
                params.cursor.append_to(&mut query);
                stripe_get(endpoint(base_url, &["subscriptions"], &query))
            }
            Self::ListInvoices(params) => {
                let mut query = vec![("limit", params.limit.to_string())];
                if let Some(customer) = &params.customer {
                    query.push(("customer", customer.clone()));
                }
                if let Some(subscription) = &params.subscription {
                    query.push(("subscription", subscription.clone()));
                }
                if let Some(status) = &params.status {
                    query.push(("status", status.as_str().to_string()));
                }
                params.cursor.append_to(&mut query);
                stripe_get(endpoint(base_url, &["invoices"], &query))
            }
            Self::GetInvoice(params) => {
                stripe_get(endpoint(base_url, &["invoices", &params.invoice_id], &[]))
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct StripeActions;

impl ServiceActions for StripeActions {
    fn action_names(&self) -> &'static [&'static str] {
        ACTIONS
    }

    fn prepare(&self, action: &str, params: &Value) -> Result<Box<dyn BuildRequest>, ActionError> {
        Ok(Box::new(StripeAction::parse(action, params)?))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use url::Url;

    use super::{StripeAction, BASE_URL};
    use crate::registry::{ActionError, BuildRequest, HttpMethod};

    fn base() -> Url {
        Url::parse(BASE_URL).expect("base url")
    }

    #[test]
    fn list_customers_encodes_query_and_form_content_type() {
        let action = StripeAction::parse(
            "list_customers",
            &json!({"limit": 3, "email": "billing@grove.place", "starting_after": "cus_1"}),
        )
        .expect("parse");
        let request = action.build(&base());

        assert_eq!(request.method, HttpMethod::Get);
        assert_eq!(
            request.url.as_str(),
            "https://api.stripe.com/v1/customers?limit=3&starting_after=cus_1&email=billing%40grove.place"
        );
        assert_eq!(request.header("content-type"), Some("application/x-www-form-urlencoded"));
        assert!(request.body.is_none());
    }

    #[test]
    fn subscription_status_defaults_to_all() {
        let action = StripeAction::parse("list_subscriptions", &json!({})).expect("parse");
        assert_eq!(
            action.build(&base()).url.as_str(),
            "https://api.stripe.com/v1/subscriptions?limit=10&status=all"
        );
    }

    #[test]
    fn invalid_email_and_status_are_rejected() {
        let error = StripeAction::parse("list_customers", &json!({"email": "nope"}))
            .expect_err("email");
        assert!(matches!(error, ActionError::Validation(ref e) if e.field == "email"));

        let error = StripeAction::parse("list_invoices", &json!({"status": "refunded"}))
            .expect_err("status");
        assert!(matches!(error, ActionError::Validation(_)));
    }

    #[test]
    fn write_actions_do_not_exist() {
        assert_eq!(
            StripeAction::parse("create_refund", &json!({})),
            Err(ActionError::UnknownAction("create_refund".to_string()))
        );
    }
}
