use actix_web::{App, HttpServer, middleware::Logger, web};
use chrono::Local; // timestamp in log lines
use env_logger::{Env, Target};
use std::io::Write; // for env_logger custom formatter
use std::sync::Arc;
use std::time::Duration;

use ticketing_backend::{
    config::Config,
    database::{create_pool, run_migrations},
    external::{
        NotificationDispatcher, PaymentGateway, PaystackGateway, RetryPolicy,
        TicketAssetPipeline, UnconfiguredAssetPipeline, sink_from_config,
    },
    handlers,
    middlewares::{AuthMiddleware, create_cors},
    services::*,
    swagger::swagger_config,
    tasks,
    utils::JwtService,
};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| {
            let ts = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z");
            let level = record.level().as_str().to_ascii_lowercase();
            let msg_json = serde_json::to_string(&format!("{}", record.args()))
                .unwrap_or_else(|_| "\"<invalid utf8>\"".to_string());
            writeln!(
                buf,
                "{{\"timestamp\":\"{}\",\"level\":\"{}\",\"message\":{},\"target\":\"{}\"}}",
                ts,
                level,
                msg_json,
                record.target(),
            )
        })
        .target(Target::Stdout)
        .init();

    let config = Config::from_toml().expect("Failed to load configuration file");

    let pool = create_pool(&config.database)
        .await
        .expect("Failed to create database connection pool");

    run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");

    let jwt_service = JwtService::new(&config.jwt.secret);

    // collaborators
    let gateway: Arc<dyn PaymentGateway> = Arc::new(PaystackGateway::new(config.paystack.clone()));
    let notifier =
        NotificationDispatcher::spawn(sink_from_config(&config.notifications), RetryPolicy::default());
    let assets: Arc<dyn TicketAssetPipeline> = Arc::new(UnconfiguredAssetPipeline);

    let settings_service = SettingsService::new(pool.clone(), config.platform.clone());
    let settings: Arc<dyn SettingsProvider> = Arc::new(settings_service.clone());
    let balance_service = BalanceService::new(pool.clone());
    let order_service = OrderService::new(pool.clone(), gateway.clone(), settings.clone());
    let settlement_service = SettlementService::new(
        pool.clone(),
        gateway,
        balance_service.clone(),
        notifier.clone(),
        assets.clone(),
        Duration::from_secs(config.paystack.verify_timeout_secs),
    );
    let ticket_service = TicketService::new(pool.clone(), assets, settings.clone());
    let withdrawal_service =
        WithdrawalService::new(pool.clone(), settings, balance_service.clone(), notifier);

    tasks::spawn_all(
        settlement_service.clone(),
        ticket_service.clone(),
        chrono::Duration::minutes(config.platform.pending_order_ttl_minutes),
    );

    log::info!(
        "Starting HTTP server at {}:{}",
        config.server.host,
        config.server.port
    );

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(create_cors())
            .wrap(AuthMiddleware::new(jwt_service.clone()))
            .app_data(web::Data::new(settings_service.clone()))
            .app_data(web::Data::new(balance_service.clone()))
            .app_data(web::Data::new(order_service.clone()))
            .app_data(web::Data::new(settlement_service.clone()))
            .app_data(web::Data::new(ticket_service.clone()))
            .app_data(web::Data::new(withdrawal_service.clone()))
            .configure(swagger_config)
            .configure(handlers::webhook_config)
            .service(
                web::scope("/api/v1")
                    .configure(handlers::order_config)
                    .configure(handlers::ticket_config)
                    .configure(handlers::organizer_config)
                    .configure(handlers::admin_config),
            )
    })
    .bind((config.server.host.as_str(), config.server.port))?
    .run()
    .await
}
