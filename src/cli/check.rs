use anyhow::{Result, anyhow};
use std::path::Path;

use crate::core::config::Settings;
use crate::core::terminal::{print_info, print_status, print_step, print_success, print_warn};

/// Loads the configuration and reports what the bot would run with.
pub fn run_check(config: Option<&Path>) -> Result<()> {
    print_step("Checking gridbot configuration...");
    println!();

    let settings = Settings::load(config).map_err(|e| anyhow!("Configuration is invalid: {e}"))?;

    print_success(&format!("DOMAIN is {}", settings.domain));

    let jenkins = &settings.jenkins;
    if jenkins.discovery {
        print_info(&format!(
            "Jenkins endpoints are discovered through master-<grid>.{}",
            settings.domain
        ));
    } else if jenkins.urls.is_empty() {
        print_warn("Discovery is off and no jenkins.url entries exist. Every grid is unresolved.");
    } else {
        print_info("Discovery is off. Using the static Jenkins URL table.");
    }
    for (grid, url) in &jenkins.urls {
        print_status(grid, url);
    }
    if jenkins.credentials.username.is_none() || jenkins.credentials.password.is_none() {
        print_warn("jenkins.username / jenkins.password are not both set. Requests go out anonymously.");
    }

    let notifications = &settings.notifications;
    print_status(
        "Notifications",
        if notifications.receive { "on" } else { "off" },
    );
    if !notifications.chatrooms.is_empty() {
        print_status("Broadcast rooms", &notifications.chatrooms.join(", "));
    }
    print_status("Command prefix", &settings.chat.prefix);

    match settings.slack.bot_token.as_deref() {
        Some(token) if !token.is_empty() => {
            print_success("Slack bot token configured.");
            if settings.slack.signing_secret.as_deref().unwrap_or("").is_empty() {
                print_warn("slack.signing_secret is empty. Slack events will not be verified.");
            }
        }
        _ => print_warn("No slack.bot_token. Broadcasts go to the console."),
    }

    println!();
    print_success("Configuration is valid.");
    Ok(())
}
