use anyhow::Result;
use serenity::{http::Http, model::gateway::GatewayIntents, Client};
use std::{net::SocketAddr, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use community_bot::{
    api::{self, AppState},
    bot::CommunityBot,
    cache::CacheService,
    clock::{Clock, SystemClock},
    config::Config,
    identity::{GuildMemberSource, IdentityResolver, IdentitySource},
    ratelimit::{ApiRateLimiter, ApiRateLimiterConfig, Cooldowns},
    scheduler::{self, SchedulerDeps},
    storage::{JsonSnapshotStore, SnapshotStore},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("community_bot=debug".parse()?)
                .add_directive("serenity=info".parse()?),
        )
        .init();

    info!("🏘️ Starting Community Bot v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Config::load()?;
    info!("{}", config.summary());

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Servicios compartidos
    let cache = Arc::new(CacheService::new(&config, clock.clone()));
    let limiter = Arc::new(ApiRateLimiter::new(ApiRateLimiterConfig::from(&config)));
    let cooldowns = Arc::new(Cooldowns::from_config(&config));
    let store: Arc<dyn SnapshotStore> = Arc::new(JsonSnapshotStore::new(&config.data_dir).await?);

    let http = Arc::new(Http::new(&config.discord_token));
    let source: Arc<dyn IdentitySource> = Arc::new(GuildMemberSource::new(http, config.guild_id));
    let identities = IdentityResolver::new(source.clone(), cache.clone(), config.fetch_timeout());

    // Tareas en segundo plano
    let mut tasks = scheduler::start(SchedulerDeps {
        config: config.clone(),
        cache: cache.clone(),
        limiter: limiter.clone(),
        source,
        store: store.clone(),
        clock: clock.clone(),
    })
    .await;

    // API del dashboard
    let shutdown = CancellationToken::new();
    let addr: SocketAddr = format!("{}:{}", config.api_host, config.api_port).parse()?;
    let state = AppState {
        guild_id: config.guild_id,
        cache: cache.clone(),
        limiter,
        identities: identities.clone(),
        store: store.clone(),
        clock,
        snapshot_offset: config.snapshot_offset(),
    };
    let api_handle = tokio::spawn(api::serve(state, addr, shutdown.clone()));

    // Cliente de Discord
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::GUILD_VOICE_STATES;

    let config = Arc::new(config);
    let handler = CommunityBot::new(config.clone(), cache, cooldowns, identities, store);

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .await?;

    let shard_manager = client.shard_manager.clone();

    tokio::select! {
        result = client.start() => {
            if let Err(e) = result {
                error!("❌ Gateway client stopped: {:?}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("🛑 Shutdown signal received");
        }
    }

    // Apagado ordenado
    tasks.stop().await;
    shutdown.cancel();
    match api_handle.await {
        Ok(Err(e)) => error!("❌ Dashboard API error: {}", e),
        Err(e) => error!("❌ Dashboard API task failed: {}", e),
        Ok(Ok(())) => {}
    }
    shard_manager.shutdown_all().await;

    info!("👋 Community Bot stopped");
    Ok(())
}
