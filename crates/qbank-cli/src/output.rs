//! Output formatting for the CLI.

use clap::ValueEnum;
use qbank_auth::AuthError;
use serde::Serialize;

/// Output format.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Print a value as pretty JSON.
pub fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error: could not serialize output: {}", e),
    }
}

/// Print a success message.
pub fn print_success(message: &str, format: &OutputFormat) {
    match format {
        OutputFormat::Text => println!("{}", message),
        OutputFormat::Json => {
            println!("{}", serde_json::json!({ "status": "success", "message": message }));
        }
    }
}

/// Print an error message.
pub fn print_error(message: &str, format: &OutputFormat) {
    match format {
        OutputFormat::Text => eprintln!("Error: {}", message),
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "status": "error", "message": message }));
        }
    }
}

/// User-facing text for an auth or API error. Validation details are safe
/// to show and tell the user what to fix.
pub fn describe(err: &AuthError) -> String {
    match err {
        AuthError::ValidationError(detail) if !detail.is_empty() => {
            format!("{} {}", err.user_message(), detail)
        }
        _ => err.user_message().to_string(),
    }
}

/// Print a table row.
pub fn print_row(label: &str, value: &str) {
    println!("  {:<16} {}", format!("{}:", label), value);
}

/// Print a divider line.
pub fn print_divider() {
    println!("{}", "-".repeat(50));
}

/// Print a heading.
pub fn print_heading(text: &str) {
    println!("\n{}", text);
    print_divider();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_hides_provider_details() {
        let err = AuthError::Provider("NotAuthorizedException: internal detail".to_string());
        assert!(!describe(&err).contains("internal detail"));
    }

    #[test]
    fn test_describe_keeps_validation_detail() {
        let err = AuthError::ValidationError("Password must be at least 8 characters".to_string());
        assert!(describe(&err).ends_with("Password must be at least 8 characters"));
    }
}
