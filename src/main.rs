//! taskbank server entrypoint.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use taskbank::ledger::types::{Campus, NewUser, ScheduleHints, TaskDraft};
use taskbank::moderation::GeminiClassifier;
use taskbank::{api, Config, LedgerStore, RiskClassifier};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("taskbank=info")),
        )
        .init();

    let config = Config::from_env();
    let store = Arc::new(LedgerStore::open(&config.database_path)?);

    let classifier = Arc::new(match &config.gemini_api_key {
        Some(key) => {
            tracing::info!(model = %config.gemini_model, "semantic risk screening enabled");
            RiskClassifier::new(Some(Arc::new(GeminiClassifier::new(
                key.clone(),
                config.gemini_model.clone(),
            ))))
        }
        None => {
            tracing::info!("no classifier key configured, keyword-only risk screening");
            RiskClassifier::keyword_only()
        }
    });

    if config.seed_demo {
        seed_demo(&store, &config)?;
    }

    api::serve(config, store, classifier).await
}

/// Seed a handful of demo users and tasks into an empty ledger.
fn seed_demo(store: &LedgerStore, config: &Config) -> anyhow::Result<()> {
    if store.stats()?.users > 0 {
        tracing::info!("ledger already populated, skipping demo seed");
        return Ok(());
    }

    let alice = store.create_user(
        NewUser {
            email: "alice@example.edu".into(),
            name: "Alice".into(),
            campus: Campus::Main,
            skills: vec!["數學".into(), "英文".into()],
            willing_cross_campus: true,
        },
        config.starting_points,
    )?;
    let bob = store.create_user(
        NewUser {
            email: "bob@example.edu".into(),
            name: "Bob".into(),
            campus: Campus::Downtown,
            skills: vec!["搬運".into(), "修電腦".into()],
            willing_cross_campus: false,
        },
        config.starting_points,
    )?;
    store.create_user(
        NewUser {
            email: "carol@example.edu".into(),
            name: "Carol".into(),
            campus: Campus::Online,
            skills: vec!["程式設計".into()],
            willing_cross_campus: true,
        },
        config.starting_points,
    )?;

    store.create_task_escrowed(
        alice.id,
        &TaskDraft {
            title: "幫忙搬宿舍行李".into(),
            description: "週末從宿舍搬幾箱書到新房間".into(),
            category: "daily support".into(),
            location: "第一宿舍".into(),
            campus: Campus::Main,
            stake: 30,
            is_urgent: false,
            hints: ScheduleHints::default(),
        },
        chrono::Utc::now(),
    )?;
    store.create_task_escrowed(
        bob.id,
        &TaskDraft {
            title: "微積分考前複習".into(),
            description: "期中考前需要兩小時的微積分複習指導".into(),
            category: "study support".into(),
            location: "圖書館".into(),
            campus: Campus::Downtown,
            stake: 50,
            is_urgent: true,
            hints: ScheduleHints::default(),
        },
        chrono::Utc::now(),
    )?;

    tracing::info!("seeded demo users and tasks");
    Ok(())
}
