use std::sync::Arc;
use axum::{
    routing::{Router, get},
    middleware,
    http::{Method, HeaderValue},
};
use tower_http::{
    cors::{CorsLayer, Any},
    compression::CompressionLayer,
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tracing::{info, warn, error};
use tokio::time::{interval, Duration};

mod routes;
mod models;
mod services;
mod config;
mod error;
mod utils;
mod state;

use crate::{
    config::Config,
    state::AppState,
    services::{
        Database,
        ChannelService,
        FeedService,
        ItemService,
        FetchService,
        ProcessorService,
        SchedulerService,
        WebSubService,
        WebmentionService,
        DiscoveryService,
        RealtimeService,
    },
    utils::middleware::auth_middleware,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("LOG_LEVEL").unwrap_or_else(|_| "rainbow_reader=debug,tower_http=debug".into())
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Rainbow-Reader service...");

    // 加载配置
    dotenv::dotenv().ok();
    let config = Config::from_env()?;

    // 初始化数据库连接
    let db = Arc::new(match Database::new(&config).await {
        Ok(db) => {
            match db.verify_connection().await {
                Ok(_) => {
                    info!("Database connection established successfully");
                    db
                }
                Err(e) => {
                    warn!("Database connection failed: {}", e);
                    info!("Attempting to auto-start database...");

                    // 尝试自动启动数据库
                    if let Err(start_err) = auto_start_database(&config).await {
                        error!("Failed to auto-start database: {}. Original error: {}", start_err, e);
                        return Err(anyhow::anyhow!("Database connection failed"));
                    }

                    // 重新尝试连接
                    let db = Database::new(&config).await?;
                    db.verify_connection().await?;
                    info!("Database auto-started and connected successfully");
                    db
                }
            }
        }
        Err(e) => {
            error!("Failed to create database connection: {}", e);
            return Err(anyhow::anyhow!("Database initialization failed"));
        }
    });

    // 建表索引
    db.init_schema().await?;

    // 初始化所有服务
    let realtime_service = RealtimeService::new();
    let channel_service = ChannelService::new(db.clone()).await?;
    let feed_service = FeedService::new(db.clone()).await?;
    let item_service = ItemService::new(db.clone(), &config).await?;
    let fetch_service = FetchService::new(&config)?;
    let websub_service = WebSubService::new(feed_service.clone(), &config)?;
    let processor_service = ProcessorService::new(
        channel_service.clone(),
        feed_service.clone(),
        item_service.clone(),
        fetch_service.clone(),
        websub_service.clone(),
        realtime_service.clone(),
    );
    let scheduler_service = SchedulerService::new(
        feed_service.clone(),
        processor_service.clone(),
        websub_service.clone(),
        &config,
    );
    let webmention_service = WebmentionService::new(
        db.clone(),
        channel_service.clone(),
        fetch_service.clone(),
        realtime_service.clone(),
    );
    let discovery_service = DiscoveryService::new(fetch_service.clone());

    // 创建应用状态
    let app_state = Arc::new(AppState {
        config: config.clone(),
        db: (*db).clone(),
        channel_service,
        feed_service,
        item_service,
        fetch_service,
        processor_service,
        scheduler_service,
        websub_service,
        webmention_service,
        discovery_service,
        realtime_service,
    });

    // 启动后台任务
    start_background_tasks(app_state.clone()).await;

    // 配置 CORS
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .allow_origin(
            config.cors_allowed_origins
                .split(',')
                .map(|origin| origin.parse::<HeaderValue>().unwrap())
                .collect::<Vec<_>>(),
        );

    // Microsub 端点走认证, WebSub 回调挂在其下但必须公开可达
    let microsub_router = routes::microsub::router()
        .route_layer(middleware::from_fn_with_state(app_state.clone(), auth_middleware))
        .nest("/websub", routes::websub::router());

    let opml_router = routes::opml::router()
        .route_layer(middleware::from_fn_with_state(app_state.clone(), auth_middleware));

    // 构建应用路由
    let app = Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .nest(&config.mount_path, microsub_router)
        .nest("/webmention", routes::webmention::router())
        .nest("/opml", opml_router)
        .layer(cors)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    // 启动主服务器
    let addr = format!("{}:{}", config.server_host, config.server_port);
    info!("Starting server on http://{}{}", addr, config.mount_path);

    axum::Server::bind(&addr.parse()?)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "Rainbow-Reader is running!"
}

async fn auto_start_database(config: &Config) -> anyhow::Result<()> {
    info!("Attempting to start SurrealDB...");

    // 尝试启动 SurrealDB 进程
    let output = tokio::process::Command::new("surreal")
        .args([
            "start",
            "--user", config.database_username.as_str(),
            "--pass", config.database_password.as_str(),
            "memory",
        ])
        .spawn();

    match output {
        Ok(_) => {
            info!("SurrealDB started successfully");
            // 等待数据库启动
            tokio::time::sleep(Duration::from_secs(3)).await;
            Ok(())
        }
        Err(e) => {
            error!("Failed to start SurrealDB: {}", e);
            Err(anyhow::anyhow!("Failed to start database"))
        }
    }
}

async fn start_background_tasks(app_state: Arc<AppState>) {
    info!("Starting background tasks...");

    // 启动时对每个 (channel, owner) 跑一遍保留清理
    let cleanup_state = app_state.clone();
    tokio::spawn(async move {
        if let Err(e) = cleanup_state.item_service.cleanup_all().await {
            error!("Startup retention cleanup failed: {}", e);
        }
    });

    // 轮询调度循环
    let scheduler_state = app_state.clone();
    tokio::spawn(async move {
        let mut interval = interval(Duration::from_secs(
            scheduler_state.config.scheduler_interval_secs
        ));

        loop {
            interval.tick().await;
            scheduler_state.scheduler_service.tick().await;
        }
    });

    info!("Background tasks started successfully");
}
