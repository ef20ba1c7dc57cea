use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use mail_triage::config::{GoogleConfig, ServerConfig, TriageConfig};
use mail_triage::draft::LlmDrafter;
use mail_triage::google::GoogleClient;
use mail_triage::llm::{LlmConfig, create_provider};
use mail_triage::mailbox::{GmailMailbox, Mailbox, WatchRenewal};
use mail_triage::pipeline::{
    Classifier, CursorTracker, ItemProcessor, LabelGate, NotificationHandler,
};
use mail_triage::retry::RetryPolicy;
use mail_triage::server::{AppState, router};
use mail_triage::store::{ContactMemory, CursorStore, LibSqlBackend};
use mail_triage::tools::ToolRegistry;
use mail_triage::tools::builtin::{
    CalendarCheckTool, GoogleCalendar, GooglePeople, LookupContactTool, SearchEmailsTool,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let triage = TriageConfig::from_env().context("triage configuration")?;
    let google = GoogleConfig::from_env().context("Google configuration")?;
    let llm_config = LlmConfig::from_env().context("LLM configuration")?;
    let server = ServerConfig::from_env().context("server configuration")?;
    let retry = RetryPolicy::new(triage.retry_backoff);

    // ── Storage ─────────────────────────────────────────────────────────
    let db = Arc::new(
        LibSqlBackend::new_local(&server.db_path)
            .await
            .with_context(|| format!("opening database at {}", server.db_path.display()))?,
    );
    let pruned = db.prune_expired_contacts().await?;
    if pruned > 0 {
        info!(pruned, "Dropped expired contact profiles");
    }

    // ── Mailbox ─────────────────────────────────────────────────────────
    let client = GoogleClient::new(&google)?;
    let gmail = Arc::new(GmailMailbox::new(
        client.clone(),
        &google,
        triage.labels.respond.clone(),
        triage.user_email.clone(),
    ));
    gmail
        .ensure_labels(&triage.labels.all())
        .await
        .context("creating workflow labels")?;
    let mailbox: Arc<dyn Mailbox> = gmail.clone();

    // ── Drafting ────────────────────────────────────────────────────────
    let llm = create_provider(&llm_config)?;
    let drafter = Arc::new(LlmDrafter::new(llm, &llm_config, triage.user_email.clone()));

    // ── Tools ───────────────────────────────────────────────────────────
    let tools = ToolRegistry::new(retry)
        .with(Arc::new(CalendarCheckTool::new(Arc::new(GoogleCalendar::new(
            client.clone(),
            &google,
        )))))
        .with(Arc::new(SearchEmailsTool::new(mailbox.clone())))
        .with(Arc::new(LookupContactTool::new(Arc::new(GooglePeople::new(
            client, &google,
        )))));
    info!(tools = ?tools.names(), "Tool registry ready");

    // ── Pipeline ────────────────────────────────────────────────────────
    let classifier = Arc::new(Classifier::from_config(&triage)?);
    let contacts: Arc<dyn ContactMemory> = db.clone();
    let processor = ItemProcessor::new(
        mailbox.clone(),
        classifier,
        Arc::new(tools),
        drafter,
        Some(contacts),
        LabelGate::new(mailbox.clone(), triage.labels.clone(), retry),
        triage.signature_html.clone(),
        retry,
    );
    let cursors: Arc<dyn CursorStore> = db;
    let tracker = CursorTracker::new(cursors, mailbox, triage.labels.respond.clone(), retry);
    let handler = Arc::new(NotificationHandler::new(tracker, Arc::new(processor)));

    // ── Server ──────────────────────────────────────────────────────────
    let watch: Arc<dyn WatchRenewal> = gmail;
    let app = router(AppState {
        handler,
        watch: Some(watch),
        token: server.webhook_token.clone(),
    });

    let listener = tokio::net::TcpListener::bind(server.bind)
        .await
        .with_context(|| format!("binding {}", server.bind))?;
    info!(
        addr = %server.bind,
        version = env!("CARGO_PKG_VERSION"),
        "mail-triage listening"
    );
    axum::serve(listener, app).await?;
    Ok(())
}
