//! Authentication commands.

use super::{into_anyhow, Context};
use crate::output::{self, OutputFormat};
use anyhow::Result;
use qbank_auth::{AuthError, AuthService, Session};
use std::io::{self, Write};

fn prompt_line(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// Ask for a new password twice and submit it to the pending challenge.
async fn complete_challenge(auth: &AuthService, format: &OutputFormat) -> Result<Session> {
    output::print_success(
        "Your account requires a new password before you can continue.",
        format,
    );

    let new_password = rpassword::prompt_password("New password: ")?;
    let confirm = rpassword::prompt_password("Confirm new password: ")?;
    if new_password != confirm {
        auth.abandon_challenge().map_err(into_anyhow)?;
        anyhow::bail!("Passwords do not match");
    }

    match auth.complete_challenge(&new_password).await {
        Ok(session) => Ok(session),
        Err(err) => {
            // A rejected-before-submit password leaves the challenge pending;
            // this process is about to exit, so drop it.
            let _ = auth.abandon_challenge();
            Err(into_anyhow(err))
        }
    }
}

/// Login with email and password, rotating a temporary password inline.
pub async fn login(ctx: &Context, format: &OutputFormat) -> Result<()> {
    if let Some(session) = ctx.auth.current_session() {
        output::print_success(
            &format!("Already logged in as {}", session.identity.login_id),
            format,
        );
        return Ok(());
    }

    let email = prompt_line("Email: ")?;
    if email.is_empty() {
        anyhow::bail!("Email is required");
    }

    let password = rpassword::prompt_password("Password: ")?;
    if password.is_empty() {
        anyhow::bail!("Password is required");
    }

    println!("Logging in...");

    let session = match ctx.auth.login(&email, &password).await {
        Ok(session) => session,
        Err(AuthError::ChallengeRequired) => complete_challenge(&ctx.auth, format).await?,
        Err(err) => return Err(into_anyhow(err)),
    };

    let role = if ctx.auth.is_admin() { " (admin)" } else { "" };
    output::print_success(
        &format!("Logged in as {}{}", session.identity.login_id, role),
        format,
    );
    Ok(())
}

/// Provision an account. The temporary password arrives by email.
pub async fn signup(ctx: &Context, email: &str, format: &OutputFormat) -> Result<()> {
    let ack = ctx.auth.signup(email).await.map_err(into_anyhow)?;

    match format {
        OutputFormat::Text => {
            println!("{}", ack.message);
            println!("Account: {}", ack.identity_ref);
            println!("Check your email for a temporary password, then run 'qbank login'.");
        }
        OutputFormat::Json => output::print_json(&ack),
    }
    Ok(())
}

/// Logout and clear the saved session.
pub async fn logout(ctx: &Context, format: &OutputFormat) -> Result<()> {
    ctx.auth.logout().await;
    output::print_success("Logged out successfully", format);
    Ok(())
}

/// Show the current authentication status.
pub async fn status(ctx: &Context, format: &OutputFormat) -> Result<()> {
    let snapshot = ctx.auth.status();

    match format {
        OutputFormat::Text => {
            output::print_heading("Authentication");
            output::print_row("State", &snapshot.state.to_string());
            if let Some(login_id) = &snapshot.login_id {
                output::print_row("Email", login_id);
                let roles = if snapshot.roles.is_empty() {
                    "none".to_string()
                } else {
                    snapshot.roles.join(", ")
                };
                output::print_row("Roles", &roles);
                output::print_row("Admin", if snapshot.is_admin { "yes" } else { "no" });
            }
            if let Some(expires_at) = snapshot.expires_at {
                output::print_row("Expires", &expires_at.to_rfc3339());
            }
        }
        OutputFormat::Json => output::print_json(&snapshot),
    }
    Ok(())
}
