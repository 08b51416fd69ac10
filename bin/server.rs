// Cooperative Records - Web Server
// Read-only JSON API over the records database

use anyhow::{bail, Context};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use coop_records::entities::loan::{get_loan, get_schedule, list_loans};
use coop_records::entities::member::{get_member, list_members};
use coop_records::entities::savings::{accounts_for_member, list_accounts};
use coop_records::ledger::trial_balance;
use coop_records::{
    open_database, AccountStatus, Config, Error, GlAccount, Installment, Loan, LoanStatus, Member,
    MemberStatus, SavingsAccount,
};

const BIND_ENV: &str = "COOP_BIND";
const DEFAULT_BIND: &str = "0.0.0.0:3000";

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
}

impl AppState {
    fn conn(&self) -> Result<MutexGuard<'_, Connection>, ApiError> {
        self.db
            .lock()
            .map_err(|_| ApiError::internal("database lock poisoned".to_string()))
    }
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn internal(message: String) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message,
        }
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        let status = match &e {
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Validation(_) | Error::InvalidAmount(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(error = %self.message, "request failed");
        }
        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(self.message),
        };
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

/// Stats response
#[derive(Serialize)]
struct StatsResponse {
    members: usize,
    active_members: usize,
    savings_accounts: usize,
    dormant_accounts: usize,
    total_savings: Decimal,
    loans_pending: usize,
    loans_released: usize,
    loans_receivable: Decimal,
    cash_on_hand: Decimal,
    books_balanced: bool,
}

#[derive(Serialize)]
struct ScheduleResponse {
    loan: Loan,
    installments: Vec<Installment>,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/members
async fn get_members(State(state): State<AppState>) -> ApiResult<Vec<Member>> {
    let conn = state.conn()?;
    Ok(Json(ApiResponse::ok(list_members(&conn)?)))
}

/// GET /api/members/:id/accounts
async fn get_member_accounts(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Vec<SavingsAccount>> {
    let conn = state.conn()?;
    let member = get_member(&conn, id)?;
    Ok(Json(ApiResponse::ok(accounts_for_member(&conn, member.id)?)))
}

/// GET /api/loans
async fn get_loans(State(state): State<AppState>) -> ApiResult<Vec<Loan>> {
    let conn = state.conn()?;
    Ok(Json(ApiResponse::ok(list_loans(&conn)?)))
}

/// GET /api/loans/:id/schedule
async fn get_loan_schedule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<ScheduleResponse> {
    let conn = state.conn()?;
    let loan = get_loan(&conn, id)?;
    let installments = get_schedule(&conn, loan.id)?;
    Ok(Json(ApiResponse::ok(ScheduleResponse { loan, installments })))
}

/// GET /api/stats - Portfolio totals straight from the general ledger
async fn get_stats(State(state): State<AppState>) -> ApiResult<StatsResponse> {
    let conn = state.conn()?;

    let members = list_members(&conn)?;
    let accounts = list_accounts(&conn)?;
    let loans = list_loans(&conn)?;
    let tb = trial_balance(&conn)?;

    let net = |account: GlAccount| tb.line(account).map(|l| l.net()).unwrap_or_default();

    Ok(Json(ApiResponse::ok(StatsResponse {
        members: members.len(),
        active_members: members.iter().filter(|m| m.status == MemberStatus::Active).count(),
        savings_accounts: accounts.len(),
        dormant_accounts: accounts.iter().filter(|a| a.status == AccountStatus::Dormant).count(),
        // Liability accounts carry credit balances
        total_savings: -net(GlAccount::SavingsDeposits),
        loans_pending: loans
            .iter()
            .filter(|l| matches!(l.status, LoanStatus::Pending | LoanStatus::Approved))
            .count(),
        loans_released: loans.iter().filter(|l| l.status == LoanStatus::Released).count(),
        loans_receivable: net(GlAccount::LoansReceivable),
        cash_on_hand: net(GlAccount::Cash),
        books_balanced: tb.is_balanced(),
    })))
}

fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/members", get(get_members))
        .route("/members/:id/accounts", get(get_member_accounts))
        .route("/loans", get(get_loans))
        .route("/loans/:id/schedule", get(get_loan_schedule))
        .route("/stats", get(get_stats))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load(None)?;
    config.logging.init();

    println!("🌐 Cooperative Records - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let db_path = &config.database.path;
    if !db_path.exists() {
        bail!(
            "database not found at {}; run `coop-records init` first",
            db_path.display()
        );
    }

    let conn = open_database(db_path).with_context(|| format!("opening {}", db_path.display()))?;
    println!("✓ Database opened: {}", db_path.display());

    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
    };

    let addr = std::env::var(BIND_ENV).unwrap_or_else(|_| DEFAULT_BIND.to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;

    info!(%addr, "server listening");
    println!("\n🚀 Server running on http://{}", addr);
    println!("   API: http://{}/api/members", addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, router(state))
        .await
        .context("server stopped")?;
    Ok(())
}
