//! Authentication for the Remedi backend
//!
//! Email/password login against the REST API. The returned bearer token is
//! stored in the config file and reused by the HTTP client and the chat
//! socket until it expires.

pub mod tokens;

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};

use crate::api;
use crate::config::Config;

pub use tokens::{StoredToken, TokenStore};

fn read_password() -> Result<String> {
    print!("Password: ");
    io::stdout().flush().context("Failed to flush stdout")?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read password")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Log in and store the token plus the user profile.
pub async fn login(email: &str, password: Option<String>) -> Result<()> {
    let mut config = Config::load()?;

    let password = match password {
        Some(p) => p,
        None => read_password()?,
    };
    if password.is_empty() {
        anyhow::bail!("Password must not be empty");
    }

    let resp = api::auth::login(&config.server.api_base, email, &password)
        .await
        .map_err(|e| {
            if e.is_auth_expired() {
                anyhow::anyhow!("Invalid email or password")
            } else {
                anyhow::Error::new(e).context("Login request failed")
            }
        })?;

    let token = StoredToken::from_jwt(resp.token);
    if token.is_expired() {
        anyhow::bail!("Server issued an already-expired token; check the system clock");
    }

    tracing::debug!("Logged in as user {}", resp.user.id);
    println!("Logged in as {}.", resp.user.display_name());

    config.set_token(token);
    config.set_user(resp.user);
    config.save()?;
    Ok(())
}

/// Clear stored credentials
pub async fn logout() -> Result<()> {
    let mut config = Config::load()?;
    config.clear_tokens();
    config.save()?;
    println!("Logged out.");
    Ok(())
}

/// Display current auth status
pub async fn status() -> Result<()> {
    let config = Config::load()?;

    println!("API:     {}", config.server.api_base);
    println!("Socket:  {}", config.server.ws_url);

    match config.get_token() {
        Some(token) if !token.is_expired() => {
            println!("Token:   valid");
            if let Some(exp) = token.expires_at_utc() {
                println!("  expires_at: {}", exp.format("%Y-%m-%d %H:%M:%S UTC"));
            }
        }
        Some(_) => {
            println!("Token:   expired");
        }
        None => {
            println!("Token:   none");
        }
    }

    match config.get_user() {
        Some(user) => println!(
            "User:    {} (id {}, {})",
            user.display_name(),
            user.id,
            if user.is_admin() { "admin" } else { "user" }
        ),
        None => println!("User:    none"),
    }

    Ok(())
}
