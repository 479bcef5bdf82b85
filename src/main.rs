use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use std::sync::Arc;

use coursepay::config::Config;
use coursepay::db::{AppState, create_pool, init_db, queries};
use coursepay::dispatch::{Dispatcher, InvoiceRenderer};
use coursepay::email::EmailService;
use coursepay::handlers;
use coursepay::invoice::HttpInvoiceRenderer;
use coursepay::models::{CreateCourse, CreateProfile, Role};
use coursepay::payments::{CardGatewayClient, HostedCheckoutClient};

#[derive(Parser, Debug)]
#[command(name = "coursepay")]
#[command(about = "Payment reconciliation and course access for an online academy")]
struct Cli {
    /// Seed the database with dev data (admin, student, course, API keys)
    #[arg(long)]
    seed: bool,

    /// Delete the database on exit (dev mode only, useful for fresh starts)
    #[arg(long)]
    ephemeral: bool,
}

/// Seeds the database with dev data for testing.
/// Only runs in dev mode and when the database is empty.
fn seed_dev_data(state: &AppState) {
    let conn = state.db.get().expect("Failed to get db connection for seeding");

    let count = queries::count_profiles(&conn).expect("Failed to count profiles");
    if count > 0 {
        tracing::info!("Database already has data, skipping seed");
        return;
    }

    tracing::info!("============================================");
    tracing::info!("SEEDING DEV DATA");
    tracing::info!("============================================");

    let admin = queries::create_profile(
        &conn,
        &CreateProfile {
            name: "Dev Admin".to_string(),
            email: "admin@coursepay.local".to_string(),
            role: Role::Admin,
        },
    )
    .expect("Failed to create dev admin");
    let admin_api_key = queries::create_api_key(&conn, &admin.id).expect("Failed to create admin key");
    tracing::info!("Admin: {} ({})", admin.email, admin.id);

    let student = queries::create_profile(
        &conn,
        &CreateProfile {
            name: "Dev Student".to_string(),
            email: "student@coursepay.local".to_string(),
            role: Role::Student,
        },
    )
    .expect("Failed to create dev student");
    let student_api_key =
        queries::create_api_key(&conn, &student.id).expect("Failed to create student key");
    tracing::info!("Student: {} ({})", student.email, student.id);

    let course = queries::create_course(
        &conn,
        &CreateCourse {
            title: "Advanced Mathematics".to_string(),
            price: 15000,
            currency: "LKR".to_string(),
        },
    )
    .expect("Failed to create dev course");
    tracing::info!("Course: {} (id: {})", course.title, course.id);

    tracing::info!("============================================");
    tracing::info!("DEV DATA SEEDED SUCCESSFULLY");
    tracing::info!("============================================");

    // Copy-paste friendly output (no log formatting)
    println!();
    println!("--- COPY FROM HERE ---");
    println!("  admin_id: {}", admin.id);
    println!("  admin_api_key: {}", admin_api_key);
    println!("  student_id: {}", student.id);
    println!("  student_api_key: {}", student_api_key);
    println!("  course_id: {}", course.id);
    println!("--- END COPY ---");
    println!();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coursepay=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }

    // Collaborators
    let email = Arc::new(EmailService::new(
        config.resend_api_key.clone(),
        config.email_from.clone(),
    ));
    let invoices: Option<Arc<dyn InvoiceRenderer>> = match &config.invoice_renderer_url {
        Some(url) => Some(Arc::new(
            HttpInvoiceRenderer::new(url.clone(), config.outbound_timeout)
                .expect("Failed to build invoice renderer client"),
        )),
        None => {
            tracing::warn!("INVOICE_RENDERER_URL not set, invoices will not be issued");
            None
        }
    };
    let dispatcher = Dispatcher::new(email, invoices, config.best_effort_timeout);

    // Payment providers
    let hosted_checkout = config.hosted_checkout.as_ref().map(HostedCheckoutClient::new);
    let card_gateway = config.card_gateway.as_ref().map(|gateway| {
        CardGatewayClient::new(gateway, config.outbound_timeout)
            .expect("Failed to build card gateway client")
    });
    if hosted_checkout.is_none() {
        tracing::warn!("Hosted checkout not configured, its endpoints will refuse work");
    }
    if card_gateway.is_none() {
        tracing::warn!("Card gateway not configured, its endpoints will refuse work");
    }

    let state = AppState {
        db: db_pool,
        base_url: config.base_url.clone(),
        hosted_checkout,
        card_gateway,
        dispatcher: dispatcher.clone(),
        checkout_success_url: config.checkout_success_url.clone(),
        checkout_cancel_url: config.checkout_cancel_url.clone(),
    };

    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set COURSEPAY_ENV=dev)");
        } else {
            seed_dev_data(&state);
        }
    }

    let app = handlers::app(state).layer(TraceLayer::new_for_http());

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    let cleanup_on_exit = cli.ephemeral && config.dev_mode;
    let db_path = config.database_path.clone();

    if cleanup_on_exit {
        tracing::info!("EPHEMERAL MODE: database will be deleted on exit");
    }

    tracing::info!("CoursePay server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Failed to start server");

    // Let in-flight invoices and emails finish; each is bounded by its own timeout
    tracing::info!("Waiting for pending invoice and email dispatch...");
    dispatcher.drain().await;
    if !dispatcher.failures().is_empty() {
        tracing::warn!(
            "{} downstream failure(s) recorded this run, check the log for payment ids",
            dispatcher.failures().len()
        );
    }

    if cleanup_on_exit {
        tracing::info!("Cleaning up ephemeral database...");
        if let Err(e) = std::fs::remove_file(&db_path) {
            tracing::warn!("Failed to remove {}: {}", db_path, e);
        } else {
            tracing::info!("Removed {}", db_path);
        }
        // Also remove WAL and SHM files if they exist
        let _ = std::fs::remove_file(format!("{}-wal", db_path));
        let _ = std::fs::remove_file(format!("{}-shm", db_path));
        tracing::info!("Ephemeral cleanup complete");
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
