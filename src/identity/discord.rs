use async_trait::async_trait;
use serenity::{
    http::Http,
    model::{
        guild::Member,
        id::{GuildId, UserId},
    },
    Error as SerenityError,
};
use std::sync::Arc;

use super::{Identity, IdentitySource, MemberLookup};
use crate::error::Result;

const HTTP_NOT_FOUND: u16 = 404;

impl Identity {
    /// Builds an identity from a guild member.
    ///
    /// Display name prefers the global name, avatar prefers the guild avatar,
    /// and booster status is taken from `premium_since`.
    pub fn from_member(member: &Member) -> Self {
        let display_name = member
            .user
            .global_name
            .clone()
            .unwrap_or_else(|| member.display_name().to_string());

        Self {
            avatar_url: Some(member.face()),
            display_name,
            username: Some(member.user.name.clone()),
            joined_at: member.joined_at.map(|ts| ts.unix_timestamp()),
            is_booster: member.premium_since.is_some(),
        }
    }
}

/// Looks members up through the Discord HTTP API for one guild.
pub struct GuildMemberSource {
    http: Arc<Http>,
    guild_id: GuildId,
}

impl GuildMemberSource {
    pub fn new(http: Arc<Http>, guild_id: u64) -> Self {
        Self {
            http,
            guild_id: GuildId::new(guild_id),
        }
    }
}

#[async_trait]
impl IdentitySource for GuildMemberSource {
    async fn fetch_member(&self, user_id: u64) -> Result<MemberLookup> {
        match self.guild_id.member(&*self.http, UserId::new(user_id)).await {
            Ok(member) => Ok(MemberLookup::Found(Identity::from_member(&member))),
            Err(SerenityError::Http(err))
                if err.status_code().map(|status| status.as_u16()) == Some(HTTP_NOT_FOUND) =>
            {
                Ok(MemberLookup::NotFound)
            }
            Err(e) => Err(e.into()),
        }
    }
}
