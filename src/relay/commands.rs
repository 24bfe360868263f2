//! Admin commands
//!
//! Commands are recognised from any conversation but only executed for
//! senders on the admin allowlist. Replies go back to the invoking chat.

use tracing::{info, warn};

use super::{EventOutcome, Relay};
use crate::filter::types::PolicyTier;
use crate::platform::RawEvent;

/// Parsed admin command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    Help,
    Status,
    /// Change the filter level in memory
    Set(Option<String>),
    /// Change the filter level and persist it
    SetAndSave(Option<String>),
    /// Empty the in-memory dedup cache
    Clear,
}

impl AdminCommand {
    /// Recognise `/name[@bot] [arg]`. Unknown commands are not commands.
    pub fn parse(text: &str) -> Option<Self> {
        let rest = text.trim().strip_prefix('/')?;
        let mut words = rest.split_whitespace();
        let head = words.next()?;
        let name = head.split('@').next().unwrap_or(head).to_ascii_lowercase();
        let arg = words.next().map(str::to_string);

        match name.as_str() {
            "help" | "start" => Some(AdminCommand::Help),
            "status" => Some(AdminCommand::Status),
            "set" => Some(AdminCommand::Set(arg)),
            "set_and_save" => Some(AdminCommand::SetAndSave(arg)),
            "clear" => Some(AdminCommand::Clear),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AdminCommand::Help => "help",
            AdminCommand::Status => "status",
            AdminCommand::Set(_) => "set",
            AdminCommand::SetAndSave(_) => "set_and_save",
            AdminCommand::Clear => "clear",
        }
    }
}

pub const PERMISSION_DENIED: &str = "⛔ You are not allowed to use this command.";

pub fn help_text() -> String {
    format!(
        "Available commands:\n\
         /help - show this message\n\
         /status - show filter level, dedup and routing state\n\
         /set <level> - change the filter level until restart\n\
         /set_and_save <level> - change and persist the filter level\n\
         /clear - forget remembered addresses (history is kept)\n\
         \n\
         Levels: {}",
        PolicyTier::names()
    )
}

impl Relay {
    pub(super) async fn handle_command(&self, command: AdminCommand, event: &RawEvent) -> EventOutcome {
        let authorized = self.admins.contains(&event.sender_id);

        let reply = if authorized {
            info!(command = command.name(), sender = event.sender_id, "Admin command");
            match &command {
                AdminCommand::Help => help_text(),
                AdminCommand::Status => self.status_text().await,
                AdminCommand::Set(arg) => self.set_level(arg.as_deref(), false).await,
                AdminCommand::SetAndSave(arg) => self.set_level(arg.as_deref(), true).await,
                AdminCommand::Clear => {
                    let dropped = self.dedup.clear().await;
                    format!("🧹 Cleared {} remembered addresses.", dropped)
                }
            }
        } else {
            warn!(command = command.name(), sender = event.sender_id, "Command from non-admin refused");
            PERMISSION_DENIED.to_string()
        };

        let delivered = self.router.reply(event.source_conversation_id, &reply).await;

        EventOutcome::Command {
            command,
            authorized,
            reply,
            delivered,
        }
    }

    async fn set_level(&self, arg: Option<&str>, persist: bool) -> String {
        let usage = if persist { "/set_and_save" } else { "/set" };
        let Some(arg) = arg else {
            return format!("Usage: {} <level>\nLevels: {}", usage, PolicyTier::names());
        };
        let tier: PolicyTier = match arg.parse() {
            Ok(tier) => tier,
            Err(_) => {
                return format!("Unknown level '{}'. Levels: {}", arg, PolicyTier::names());
            }
        };

        let previous = self.policy.set(tier).await;
        if !persist {
            return format!("✅ Filter level {} → {} (not saved)", previous, tier);
        }

        match &self.store {
            None => format!(
                "✅ Filter level {} → {}\n⚠️ Not saved: storage is disabled",
                previous, tier
            ),
            Some(store) => match store.save_tier(tier).await {
                Ok(()) => format!("✅ Filter level {} → {} (saved)", previous, tier),
                Err(e) => {
                    warn!(error = %e, "Failed to persist filter level");
                    format!("✅ Filter level {} → {}\n⚠️ Not saved: {}", previous, tier, e)
                }
            },
        }
    }

    async fn status_text(&self) -> String {
        let tier = self.policy.current().await;
        let (size, capacity) = self.dedup.stats().await;
        let dedup = if self.dedup.is_enabled() {
            format!("{} ({}/{})", self.dedup.mode(), size, capacity)
        } else {
            self.dedup.mode().to_string()
        };

        format!(
            "📊 Relay status\n\
             Filter level: {}\n\
             Dedup: {}\n\
             Sources: {} ({} chats, {} senders)\n\
             Destinations: {} ({} resolved)\n\
             Payload: {}",
            tier,
            dedup,
            self.selector.mode(),
            self.selector.chat_count(),
            self.selector.sender_count(),
            self.destinations.len(),
            self.router.resolved_count(&self.destinations),
            self.payload,
        )
    }
}
