//! # Bot Module
//!
//! Gateway side of the community bot.
//!
//! [`CommunityBot`] implements Serenity's [`EventHandler`] and feeds the
//! shared core services:
//!
//! - Member updates push booster changes into the identity cache
//!   (clearing cached responses when a badge changes).
//! - Member removals evict the cached identity and mark the member inactive
//!   for snapshots.
//! - Messages and voice sessions accumulate XP counters in the store.
//! - Slash commands pass the per-user cooldown gate before running.

use serenity::{
    all::{
        CommandInteraction, Context, EventHandler, GuildId, GuildMemberUpdateEvent, Interaction,
        Member, Message, Ready, User, VoiceState,
    },
    async_trait,
};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, info, warn};

pub mod activity;
pub mod handlers;

pub use activity::ActivityTracker;

use crate::{
    cache::CacheService,
    config::Config,
    identity::IdentityResolver,
    ratelimit::Cooldowns,
    storage::{Activity, SnapshotStore},
};

/// Main Discord event handler.
///
/// Holds shared handles to the services built in `main`; nothing here owns
/// state of its own except the activity tracker.
pub struct CommunityBot {
    config: Arc<Config>,
    cache: Arc<CacheService>,
    cooldowns: Arc<Cooldowns>,
    identities: IdentityResolver,
    store: Arc<dyn SnapshotStore>,
    activity: ActivityTracker,
}

impl CommunityBot {
    pub fn new(
        config: Arc<Config>,
        cache: Arc<CacheService>,
        cooldowns: Arc<Cooldowns>,
        identities: IdentityResolver,
        store: Arc<dyn SnapshotStore>,
    ) -> Self {
        let activity = ActivityTracker::new(&config);
        Self {
            config,
            cache,
            cooldowns,
            identities,
            store,
            activity,
        }
    }

    pub fn cooldowns(&self) -> &Cooldowns {
        &self.cooldowns
    }

    pub fn identities(&self) -> &IdentityResolver {
        &self.identities
    }

    pub fn store(&self) -> &dyn SnapshotStore {
        self.store.as_ref()
    }

    pub fn guild_id(&self) -> u64 {
        self.config.guild_id
    }

    /// Owner and moderators skip command cooldowns.
    pub fn is_exempt(&self, command: &CommandInteraction) -> bool {
        if self.config.owner_id == Some(command.user.id.get()) {
            return true;
        }
        command
            .member
            .as_ref()
            .and_then(|member| member.permissions)
            .is_some_and(|permissions| permissions.administrator() || permissions.manage_messages())
    }

    fn is_our_guild(&self, guild_id: Option<GuildId>) -> bool {
        guild_id.is_some_and(|id| id.get() == self.config.guild_id)
    }

    async fn record(&self, user_id: u64, activity: Activity) {
        if let Err(e) = self.store.record_activity(self.config.guild_id, user_id, activity).await {
            warn!("⚠️ Could not record activity for {}: {}", user_id, e);
        }
    }
}

#[async_trait]
impl EventHandler for CommunityBot {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("🤖 {} is online!", ready.user.name);
        info!("📊 Connected to {} guilds", ready.guilds.len());
    }

    /// Pushes booster changes into the identity cache.
    ///
    /// Only users already cached are touched; an uncached user is fetched
    /// fresh on the next dashboard lookup anyway.
    async fn guild_member_update(
        &self,
        _ctx: Context,
        _old_if_available: Option<Member>,
        _new: Option<Member>,
        event: GuildMemberUpdateEvent,
    ) {
        if !self.is_our_guild(Some(event.guild_id)) {
            return;
        }

        self.cache
            .apply_booster_change(event.user.id.get(), event.premium_since.is_some());
    }

    async fn guild_member_removal(
        &self,
        _ctx: Context,
        guild_id: GuildId,
        user: User,
        _member_data_if_available: Option<Member>,
    ) {
        if !self.is_our_guild(Some(guild_id)) {
            return;
        }

        let user_id = user.id.get();
        self.cache.forget_member(user_id);

        if let Err(e) = self.store.set_active(guild_id.get(), user_id, false).await {
            warn!("⚠️ Could not deactivate member {}: {}", user_id, e);
        }
        info!("👋 {} left, identity evicted", user.name);
    }

    async fn message(&self, _ctx: Context, message: Message) {
        if message.author.bot || !self.is_our_guild(message.guild_id) {
            return;
        }

        let user_id = message.author.id.get();
        let activity = self.activity.on_message(user_id, Instant::now());
        self.record(user_id, activity).await;
    }

    async fn voice_state_update(&self, _ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        if !self.is_our_guild(new.guild_id) {
            return;
        }
        if new.member.as_ref().is_some_and(|member| member.user.bot) {
            return;
        }

        let user_id = new.user_id.get();
        let was_connected = old.as_ref().is_some_and(|state| state.channel_id.is_some());
        let now = Instant::now();

        match (was_connected, new.channel_id.is_some()) {
            (_, true) => self.activity.on_voice_join(user_id, now),
            (true, false) => {
                if let Some(activity) = self.activity.on_voice_leave(user_id, now) {
                    self.record(user_id, activity).await;
                }
            }
            (false, false) => {}
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command, self).await {
                error!("Error handling command: {:?}", e);
            }
        }
    }
}
