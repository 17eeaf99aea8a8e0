use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use crate::{identity::Identity, ratelimit::ActionClass, storage::MemberCounters};

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const WARNING_ORANGE: Colour = Colour::from_rgb(255, 193, 7);
    pub const BOOSTER_PINK: Colour = Colour::from_rgb(244, 127, 255);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🏘️ Community Bot";

/// Shown when a command is still cooling down for the user.
pub fn create_cooldown_embed(action: ActionClass, retry_after: Duration) -> CreateEmbed {
    CreateEmbed::default()
        .title("⏳ Slow down")
        .description(format!(
            "You can use **{}** commands again in **{}**.",
            action_label(action),
            format_wait(retry_after)
        ))
        .color(colors::WARNING_ORANGE)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_rank_embed(identity: &Identity, counters: Option<&MemberCounters>) -> CreateEmbed {
    let color = if identity.is_booster {
        colors::BOOSTER_PINK
    } else {
        colors::SUCCESS_GREEN
    };

    let mut embed = CreateEmbed::default()
        .title(format!("📊 {}", identity.display_name))
        .color(color)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER));

    if let Some(avatar) = &identity.avatar_url {
        embed = embed.thumbnail(avatar);
    }

    match counters {
        Some(counters) => embed
            .field("⭐ Level", counters.level.to_string(), true)
            .field("✨ XP", counters.xp.to_string(), true)
            .field("💬 Messages", counters.total_messages.to_string(), true)
            .field("🎙️ Voice", format!("{} min", counters.voice_minutes), true),
        None => embed.description("No activity recorded yet."),
    }
}

pub fn create_error_embed(message: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title("❌ Error")
        .description(message)
        .color(colors::ERROR_RED)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

fn action_label(action: ActionClass) -> &'static str {
    match action {
        ActionClass::Download => "download",
        ActionClass::ImageSearch => "image search",
        ActionClass::Convert => "convert",
        ActionClass::Action => "action",
        ActionClass::Fun => "fun",
        ActionClass::TempVoice => "temp voice",
        ActionClass::Lookup => "lookup",
    }
}

/// Formatea una espera en formato legible ("45s", "4m 05s")
pub fn format_wait(wait: Duration) -> String {
    let total = crate::ratelimit::ceil_secs(wait);
    let minutes = total / 60;
    let seconds = total % 60;

    if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
