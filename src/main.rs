use std::sync::Arc;
use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::{ChatMemberStatus, ChatMemberUpdated, User};
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

use najva::config::Config;
use najva::retry::{Backoff, retry_with_backoff};
use najva::telegram_log::TelegramLogLayer;
use najva::whisper::{
    App, Author, BotStatus, DisclosureActivation, Event, Gateway, GroupText, LifecycleConfig, MembershipChange,
    PrivateText, Store, TelegramClient, system_clock,
};

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "najva.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            std::process::exit(1);
        }
    };

    let bot = Bot::new(&config.telegram_bot_token);
    let gateway: Arc<dyn Gateway> = Arc::new(TelegramClient::new(bot.clone()));

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("najva.log"))
        .expect("Failed to open log file");
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        );

    if let Some(log_chat_id) = config.log_chat_id {
        registry.with(TelegramLogLayer::new(gateway.clone(), log_chat_id.0)).init();
    } else {
        registry.init();
    }

    info!("🚀 Starting najva...");
    info!("Loaded config from {config_path}");
    match config.admin_id {
        Some(admin) => info!("Admin: {}", admin),
        None => warn!("No admin_id configured; admin commands are disabled"),
    }

    let (bot_user_id, fetched_username) = match bot.get_me().await {
        Ok(me) => {
            info!("Bot user ID: {}, username: @{}", me.id, me.username());
            (me.id.0 as i64, Some(me.username().to_string()))
        }
        Err(e) => {
            warn!("Failed to get bot info: {e}");
            (0, None)
        }
    };
    let db_path = config.database_path.clone();
    let store = match retry_with_backoff("Opening database", Backoff::default(), || {
        let path = db_path.clone();
        async move { Store::open(&path) }
    })
    .await
    {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Giving up on database {}: {}", db_path.display(), e);
            std::process::exit(1);
        }
    };

    let lifecycle = LifecycleConfig::from_config(&config, bot_user_id, fetched_username);
    let app = Arc::new(App::new(lifecycle, &config.trigger_words, store, gateway, system_clock()));

    if config.sweep_interval_secs > 0 {
        spawn_maintenance(
            app.clone(),
            Duration::from_secs(config.sweep_interval_secs),
            config.whisper_retention_days.map(|d| chrono::Duration::days(d as i64)),
        );
    }

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_callback_query().endpoint(handle_callback))
        .branch(Update::filter_my_chat_member().endpoint(handle_my_chat_member));

    info!("✅ najva is online");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![app])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

fn spawn_maintenance(app: Arc<App>, every: Duration, retention: Option<chrono::Duration>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            if let Err(e) = app.lifecycle().maintain(retention).await {
                error!("Maintenance failed: {e}");
            }
        }
    });
}

fn author(user: &User) -> Author {
    Author {
        user_id: user.id.0 as i64,
        name: user.full_name(),
        is_bot: user.is_bot,
    }
}

fn message_event(msg: &Message) -> Option<Event> {
    let from = msg.from.as_ref()?;
    let text = msg.text()?.to_string();
    let message_id = msg.id.0 as i64;

    if msg.chat.is_private() {
        return Some(Event::PrivateText(PrivateText {
            message_id,
            from: author(from),
            text,
            reply_to_message_id: msg.reply_to_message().map(|r| r.id.0 as i64),
        }));
    }

    if msg.chat.is_group() || msg.chat.is_supergroup() {
        return Some(Event::GroupText(GroupText {
            chat_id: msg.chat.id.0,
            chat_title: msg.chat.title().unwrap_or_default().to_string(),
            message_id,
            from: author(from),
            text,
            reply_to: msg.reply_to_message().and_then(|r| r.from.as_ref()).map(author),
        }));
    }

    None
}

async fn handle_message(msg: Message, app: Arc<App>) -> ResponseResult<()> {
    if let Some(event) = message_event(&msg) {
        app.dispatch(event).await;
    }
    Ok(())
}

async fn handle_callback(query: CallbackQuery, app: Arc<App>) -> ResponseResult<()> {
    let Some(data) = query.data.clone() else {
        return Ok(());
    };
    let activation = DisclosureActivation {
        callback_id: query.id.0.clone(),
        from: author(&query.from),
        data,
    };
    app.dispatch(Event::DisclosureActivation(activation)).await;
    Ok(())
}

async fn handle_my_chat_member(update: ChatMemberUpdated, app: Arc<App>) -> ResponseResult<()> {
    let status = match update.new_chat_member.status() {
        ChatMemberStatus::Owner | ChatMemberStatus::Administrator => BotStatus::Administrator,
        ChatMemberStatus::Member => BotStatus::Member,
        ChatMemberStatus::Restricted => BotStatus::Restricted,
        ChatMemberStatus::Left => BotStatus::Left,
        ChatMemberStatus::Banned => BotStatus::Banned,
    };
    let change = MembershipChange {
        chat_id: update.chat.id.0,
        chat_title: update.chat.title().unwrap_or_default().to_string(),
        is_group: update.chat.is_group() || update.chat.is_supergroup(),
        status,
    };
    app.dispatch(Event::MembershipChange(change)).await;
    Ok(())
}
