use {
    anyhow::Result,
    claude_skills_oauth::{DeviceCodeResponse, DevicePrompt, Token},
    tracing::warn,
};

use crate::app::App;

/// Prints the user code and tries to open the verification page.
struct TerminalPrompt;

impl DevicePrompt for TerminalPrompt {
    fn present(&self, code: &DeviceCodeResponse) {
        let url = code.browser_uri();
        println!("Opening browser for device authorization...");
        println!("Your code: {}", code.user_code);
        if open::that(url).is_err() {
            println!("Could not open browser. Please visit:\n{url}");
        }
        println!(
            "Waiting for authorization (expires in {} minutes)...",
            code.expires_in.div_ceil(60)
        );
    }
}

pub async fn login(app: &App) -> Result<()> {
    let auth = app.authenticator()?;
    let token = auth.login(&TerminalPrompt).await?;
    println!("Successfully logged in as {}", token.user_id);
    Ok(())
}

pub fn logout(app: &App) -> Result<()> {
    app.authenticator()?.logout()?;
    println!("Logged out.");
    Ok(())
}

/// Reports the stored session as-is. An expired token is shown, not refreshed.
pub async fn whoami(app: &App) -> Result<()> {
    let auth = app.authenticator()?;
    let Some(token) = auth.stored_token() else {
        println!("Not logged in. Run \"claude-skills login\" to authenticate.");
        return Ok(());
    };

    if token.is_valid() {
        match auth.fetch_user_info(token.access_token()).await {
            Ok(user) => {
                println!("User:    {}", user.id);
                if let Some(email) = &user.email {
                    println!("Email:   {email}");
                }
            },
            Err(e) => {
                warn!(error = %e, "could not fetch user info");
                println!("User:    {} (cached)", token.user_id);
            },
        }
    } else {
        println!("User:    {}", token.user_id);
    }
    if !token.scopes.is_empty() {
        let scopes: Vec<&str> = token.scopes.iter().map(String::as_str).collect();
        println!("Scopes:  {}", scopes.join(" "));
    }
    println!("Session: {}", session_status(&token));
    println!("Device:  {}", auth.device_id());
    Ok(())
}

fn session_status(token: &Token) -> String {
    match token.remaining() {
        Some(remaining) => {
            let secs = remaining.as_secs();
            format!("valid ({}h {}m remaining)", secs / 3600, (secs % 3600) / 60)
        },
        None => "expired".to_string(),
    }
}
