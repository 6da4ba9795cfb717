//! Online/offline notices posted to each guild's status channel.

use serenity::{
    all::{ChannelType, GuildId},
    cache::Cache,
    http::Http,
    model::id::ChannelId,
};
use tracing::{error, info};

pub const ONLINE: &str = "Bot is now online and listening!";
pub const OFFLINE: &str = "Bot is no longer listening.";

/// Text channels named `channel_name`, one per guild at most.
fn status_channels(cache: &Cache, channel_name: &str) -> Vec<(GuildId, ChannelId)> {
    cache
        .guilds()
        .into_iter()
        .filter_map(|guild_id| {
            let guild = cache.guild(guild_id)?;
            let found = guild
                .channels
                .values()
                .find(|c| c.kind == ChannelType::Text && c.name == channel_name)
                .map(|c| (guild_id, c.id));
            if found.is_none() {
                info!("No #{} channel in guild {}", channel_name, guild.name);
            }
            found
        })
        .collect()
}

pub async fn broadcast(cache: &Cache, http: &Http, channel_name: &str, text: &str) {
    for (guild_id, channel_id) in status_channels(cache, channel_name) {
        if let Err(e) = channel_id.say(http, text).await {
            error!(
                "Could not send status message to guild {} in #{}: {:?}",
                guild_id, channel_name, e
            );
        }
    }
}
