use serenity::{
    builder::{CreateInteractionResponse, CreateInteractionResponseMessage},
    model::application::CommandInteraction,
    prelude::Context,
};
use std::time::Duration;
use tracing::{debug, info};

use crate::{
    bot::CommunityBot,
    error::Result,
    ratelimit::{ActionClass, Cooldowns, RateDecision},
    ui::embeds,
};

/// Outcome of the cooldown gate for one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Command has no cooldown class.
    Ungated,
    /// Caller is exempt from cooldowns.
    Exempt,
    Allowed(ActionClass),
    Limited {
        action: ActionClass,
        retry_after: Duration,
    },
}

/// Charges `command` against the user's cooldown unless exempt.
pub fn gate(cooldowns: &Cooldowns, exempt: bool, user_id: u64, command: &str) -> Gate {
    let Some(action) = ActionClass::for_command(command) else {
        return Gate::Ungated;
    };

    if exempt {
        return Gate::Exempt;
    }

    match cooldowns.check(user_id, action) {
        RateDecision::Allowed { .. } => Gate::Allowed(action),
        RateDecision::Limited { retry_after } => Gate::Limited { action, retry_after },
    }
}

/// Maneja comandos slash
pub async fn handle_command(ctx: &Context, command: CommandInteraction, bot: &CommunityBot) -> Result<()> {
    let user_id = command.user.id.get();
    let name = command.data.name.as_str();

    info!("📝 /{} used by {} ({})", name, command.user.name, user_id);

    let charged = gate(bot.cooldowns(), bot.is_exempt(&command), user_id, name);
    if let Gate::Limited { action, retry_after } = charged {
        debug!("⏳ /{} on cooldown for {} ({:?} left)", name, user_id, retry_after);
        return respond_embed(ctx, &command, embeds::create_cooldown_embed(action, retry_after)).await;
    }

    let result = match name {
        "rank" => handle_rank(ctx, &command, bot).await,
        _ => respond_embed(ctx, &command, embeds::create_error_embed("This command is not available.")).await,
    };

    if result.is_err() {
        refund(bot.cooldowns(), charged, user_id);
    }
    result
}

/// Gives back the cooldown slot charged by `gate` after the command failed.
pub fn refund(cooldowns: &Cooldowns, gate: Gate, user_id: u64) {
    if let Gate::Allowed(action) = gate {
        cooldowns.reset(user_id, action);
        debug!("↩️ Refunded {} cooldown for {}", action, user_id);
    }
}

async fn handle_rank(ctx: &Context, command: &CommandInteraction, bot: &CommunityBot) -> Result<()> {
    let user_id = command.user.id.get();

    let identity = bot.identities().resolve(user_id).await;
    let counters = bot.store().counters(bot.guild_id(), user_id).await?;

    let response = CreateInteractionResponse::Message(
        CreateInteractionResponseMessage::new().embed(embeds::create_rank_embed(&identity, counters.as_ref())),
    );
    command.create_response(&ctx.http, response).await?;
    Ok(())
}

async fn respond_embed(
    ctx: &Context,
    command: &CommandInteraction,
    embed: serenity::builder::CreateEmbed,
) -> Result<()> {
    let response = CreateInteractionResponse::Message(
        CreateInteractionResponseMessage::new().embed(embed).ephemeral(true),
    );
    command.create_response(&ctx.http, response).await?;
    Ok(())
}
