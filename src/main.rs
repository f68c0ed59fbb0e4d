use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use persona_store::config::StoreConfig;
use persona_store::domain::authentication::{AuthRepository, UserAuth};
use persona_store::domain::conversation::{
    ChannelId, Conversation, ConversationId, ConversationRepository, Message,
};
use persona_store::domain::personality::{
    AiModel, LocalProfile, Personality, PersonalityId, PersonalityProfile, PersonalityRepository,
    UserId,
};
use persona_store::event_sourcing::{EventBus, RepositoryContext, WILDCARD};
use persona_store::metrics::Metrics;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default to INFO level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,persona_store=debug")),
        )
        .init();

    let config = StoreConfig::load()?;
    tracing::info!(data_dir = %config.data_dir.display(), "Starting persona store");

    // === 1. Metrics and event bus ===
    let metrics = Arc::new(Metrics::new()?);
    let mut context = RepositoryContext::new().with_metrics(metrics.clone());

    if config.event_bus_enabled {
        let bus = EventBus::new().with_metrics(metrics.clone());
        bus.subscribe(WILDCARD, |record| async move {
            tracing::info!(
                event_type = %record.event_type,
                aggregate_id = %record.aggregate_id,
                "Event published"
            );
            Ok(())
        });
        context = context.with_event_bus(bus);
    }

    // === 2. Repositories ===
    let personalities = PersonalityRepository::new(&config.data_dir, context.clone());
    let conversations = ConversationRepository::new(&config.data_dir, context.clone())
        .with_max_messages(config.max_conversation_messages);
    let auth = AuthRepository::new(&config.data_dir, context.clone());

    personalities.initialize().await?;
    conversations.initialize().await?;
    auth.initialize().await?;

    // === 3. Demo lifecycle ===
    let clock = context.clock();
    let owner = UserId::new("demo-user");
    let personality_id = PersonalityId::new("demo-assistant");

    let mut personality = match personalities.find_by_id(&personality_id).await? {
        Some(existing) => existing,
        None => {
            let mut created = Personality::create(
                personality_id.clone(),
                owner.clone(),
                PersonalityProfile::Local(LocalProfile {
                    display_name: "Demo Assistant".to_string(),
                    prompt: "You are a helpful assistant.".to_string(),
                    model_path: None,
                    max_word_count: None,
                    avatar_url: None,
                }),
                AiModel::new("default", "/models/default"),
                clock,
            )?;
            created.add_alias("demo", clock)?;
            created
        }
    };
    personalities.save(&mut personality).await?;

    if personality.needs_profile_refresh(config.profile_refresh_threshold_ms, clock) {
        tracing::info!(personality_id = %personality_id, "External profile due for refresh");
    }

    if let Some(found) = personalities.find_by_alias("DEMO").await? {
        tracing::info!(personality = %found.display_name(), "Resolved alias");
    }

    let mut user_auth = match auth.find_by_user_id(&owner).await? {
        Some(existing) => existing,
        None => UserAuth::create(owner.clone(), clock)?,
    };
    if !user_auth.has_valid_token(clock) {
        user_auth.assign_token(uuid::Uuid::new_v4().to_string(), None, clock)?;
    }
    auth.save(&mut user_auth).await?;

    let channel = ChannelId::new("demo-channel");
    let conversation_id = ConversationId::for_participants(&owner, &channel);
    let greeting = Message::from_user(
        uuid::Uuid::new_v4().to_string(),
        &owner,
        &channel,
        "Hello there",
        clock.now(),
    );

    let mut conversation = match conversations.find_by_id(&conversation_id).await? {
        Some(existing) if !existing.is_ended() => existing,
        _ => Conversation::start(
            conversation_id,
            greeting,
            personality_id.clone(),
            config.conversation_settings(),
            clock,
        )?,
    };
    let reply = Message::from_personality(
        uuid::Uuid::new_v4().to_string(),
        &personality_id,
        &channel,
        "Hi! How can I help?",
        clock.now(),
    );
    if let Err(e) = conversation.add_message(reply, clock) {
        tracing::warn!(error = %e, "Reply not recorded");
    }
    conversations.save(&mut conversation).await?;

    // === 4. Summary ===
    let personality_stats = personalities.get_stats().await?;
    let conversation_stats = conversations.get_stats().await?;
    let auth_stats = auth.get_stats().await?;
    tracing::info!(?personality_stats, ?conversation_stats, ?auth_stats, "Store ready");
    tracing::info!(
        "📊 Metrics registry holds {} metric families",
        metrics.registry().gather().len()
    );

    Ok(())
}
