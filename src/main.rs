use axum::{
    routing::{get, post},
    Router,
};
use bill_recon_rust::{api, create_pool, AppConfig, EntryBillService};
use std::sync::Arc;
use tower::ServiceBuilder;
use tracing::info;
use tracing_subscriber::fmt::time::ChronoLocal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志 - 本地时间格式
    tracing_subscriber::fmt()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_target(true)
        .with_level(true)
        .init();

    // 加载配置
    let config = AppConfig::from_env();
    info!("Starting server with config: {:?}", config);

    // 创建数据库连接池
    let pool = create_pool(&config.database.url).await?;
    info!("Database pool created");

    // 入库对账服务
    let service = Arc::new(EntryBillService::new(pool, config.intake.quiescence_ms));

    // 构建路由
    let app = Router::new()
        .route("/health", get(api::health_check))
        .route("/api/exit-bills", get(api::list_exit_bills))
        .route("/api/exit-bills/:id", get(api::get_exit_bill))
        .route(
            "/api/entry-bills/:exit_bill_id/session",
            post(api::open_session)
                .get(api::session_view)
                .delete(api::cancel_session),
        )
        .route("/api/entry-bills/:exit_bill_id", get(api::get_entry_bill))
        .route("/api/entry-bills/:exit_bill_id/scan", post(api::scan))
        .route(
            "/api/entry-bills/:exit_bill_id/items/:variant_id/decrement",
            post(api::decrement_item),
        )
        .route(
            "/api/entry-bills/:exit_bill_id/finalize",
            post(api::finalize),
        )
        .route(
            "/api/entry-bills/:exit_bill_id/resolve-missing",
            post(api::resolve_missing),
        )
        .route(
            "/api/entry-bills/:exit_bill_id/resolve-extra",
            post(api::resolve_extra),
        )
        .route(
            "/api/entry-bills/:exit_bill_id/resolution/cancel",
            post(api::cancel_resolution),
        )
        .route("/api/entry-bills/:exit_bill_id/submit", post(api::submit))
        .route(
            "/api/entry-bills/:exit_bill_id/discrepancies.csv",
            get(api::discrepancy_csv),
        )
        .with_state(service)
        .layer(ServiceBuilder::new());

    // 启动服务器
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server listening on {}", addr);
    info!("API Endpoints:");
    info!("  GET    /api/exit-bills                                 - 出库单列表");
    info!("  GET    /api/exit-bills/:id                             - 出库单详情");
    info!("  POST   /api/entry-bills/:id/session                    - 开启扫码会话");
    info!("  POST   /api/entry-bills/:id/scan                       - 扫码输入");
    info!("  POST   /api/entry-bills/:id/finalize                   - 定稿比对");
    info!("  POST   /api/entry-bills/:id/submit                     - 提交入库单");
    info!("  GET    /api/entry-bills/:id/discrepancies.csv          - 差异导出");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
