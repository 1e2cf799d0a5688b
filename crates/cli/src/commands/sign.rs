use serde_json::json;
use warden_core::auth::signature;

use crate::commands::CommandResult;

/// Computes the `X-Warden-Signature` value an agent sends for `nonce`.
pub fn run(secret: &str, nonce: &str) -> CommandResult {
    if secret.trim().is_empty() || nonce.trim().is_empty() {
        return CommandResult::failure(
            "sign",
            "invalid_arguments",
            "both --secret and --nonce are required",
            2,
        );
    }

    let signature = signature::sign_with_agent_secret(secret, nonce.trim());
    CommandResult::success_with_data(
        "sign",
        "signature computed",
        json!({ "nonce": nonce.trim(), "signature": signature }),
    )
}

#[cfg(test)]
mod tests {
    use serde_json::Value;
    use warden_core::auth::signature;

    use super::run;

    #[test]
    fn signature_verifies_against_the_stored_hash() {
        let result = run("raw-agent-secret", "nonce-123");
        assert_eq!(result.exit_code, 0);

        let payload: Value = serde_json::from_str(&result.output).expect("json");
        let provided = payload["data"]["signature"].as_str().expect("signature");
        assert!(signature::verify(
            &signature::hash_secret("raw-agent-secret"),
            "nonce-123",
            provided
        ));
    }

    #[test]
    fn blank_arguments_are_rejected() {
        let result = run("", "nonce-123");
        assert_eq!(result.exit_code, 2);
        assert!(result.output.contains("invalid_arguments"));
    }
}
