use anyhow::Result;
use csdscraper::{
    fetch::{self, github, github::GithubEnumerator, local},
    partition::aggregate::{load_processed, MonthlyAggregator},
    report::{self, record::CanonicalRecord},
    sink::FsSink,
    summary::{RunSummary, SkipReason},
};
use futures::future::join_all;
use std::{env, fs, path::PathBuf, sync::Arc};
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_SOURCE_REPO: &str = "intermittentnrg/intermittent-aeso-sns-sqs";
const FETCH_CONCURRENCY: usize = 4;

enum Origin {
    Remote { download_url: String },
    Local { path: PathBuf },
}

struct Pending {
    identifier: String,
    origin: Origin,
}

enum Outcome {
    Parsed {
        identifier: String,
        records: Vec<CanonicalRecord>,
    },
    Skipped {
        identifier: String,
        reason: SkipReason,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();
    info!("startup");

    // ─── 2) configure sink + rebuild processed set ───────────────────
    let data_dir = PathBuf::from(env::var("CSD_DATA_DIR").unwrap_or_else(|_| "data".to_string()));
    fs::create_dir_all(&data_dir)?;
    let sink = FsSink::new(&data_dir)?;
    let processed = load_processed(&sink)?;
    info!("{} sources already represented in partitions", processed.len());

    // ─── 3) enumerate sources ────────────────────────────────────────
    let client = fetch::http_client()?;
    let mut pending: Vec<Pending> = Vec::new();
    if let Ok(reports_dir) = env::var("CSD_REPORTS_DIR") {
        info!(dir = %reports_dir, "enumerating local reports");
        for path in local::enumerate_dir(&reports_dir)? {
            let identifier = local::identifier_for(&reports_dir, &path);
            pending.push(Pending {
                identifier,
                origin: Origin::Local { path },
            });
        }
    } else {
        let repo = env::var("CSD_SOURCE_REPO").unwrap_or_else(|_| DEFAULT_SOURCE_REPO.to_string());
        let root = env::var("CSD_SOURCE_PATH").unwrap_or_default();
        let token = env::var("CSD_TOKEN").ok();
        info!(repo = %repo, root = %root, "listing remote reports");
        let listing = GithubEnumerator::new(client.clone(), repo, root, token);
        for entry in listing.list().await? {
            pending.push(Pending {
                identifier: entry.path.clone(),
                origin: Origin::Remote {
                    download_url: entry.download_url,
                },
            });
        }
    }

    let mut summary = RunSummary::default();
    summary.sources_seen = pending.len();

    let fresh: Vec<Pending> = pending
        .into_iter()
        .filter(|p| {
            if processed.contains(&p.identifier) {
                summary.record_skip(SkipReason::AlreadyProcessed);
                false
            } else {
                true
            }
        })
        .collect();

    if fresh.is_empty() {
        info!("no new reports");
        summary.log();
        return Ok(());
    }
    info!("{} reports to fetch and parse", fresh.len());

    // ─── 4) fetch + parse each source independently ──────────────────
    let (tx, mut rx) = mpsc::channel::<Outcome>(100);
    let sem = Arc::new(Semaphore::new(FETCH_CONCURRENCY));
    let mut handles = Vec::with_capacity(fresh.len());

    for source in fresh {
        let client = client.clone();
        let tx = tx.clone();
        let sem = Arc::clone(&sem);
        handles.push(tokio::spawn(async move {
            let Ok(_permit) = sem.acquire().await else {
                return;
            };
            let outcome = process_source(&client, source).await;
            let _ = tx.send(outcome).await;
        }));
    }
    // drop the original sender so `rx.recv()` ends once all tasks finish
    drop(tx);

    // ─── 5) aggregate through the single consumer ────────────────────
    let mut aggregator = MonthlyAggregator::new(processed);
    while let Some(outcome) = rx.recv().await {
        match outcome {
            Outcome::Parsed {
                identifier,
                records,
            } => {
                let count = records.len();
                if aggregator.ingest(&identifier, records) {
                    summary.records_produced += count;
                } else {
                    summary.record_skip(SkipReason::AlreadyProcessed);
                }
            }
            Outcome::Skipped { identifier, reason } => {
                info!(source = %identifier, reason = reason.as_str(), "skipped");
                summary.record_skip(reason);
            }
        }
    }
    join_all(handles).await;

    // ─── 6) persist month partitions ─────────────────────────────────
    let stats = aggregator.flush(&sink);
    summary.months_written = stats.months_written;
    summary.months_failed = stats.months_failed;
    summary.log();
    Ok(())
}

async fn process_source(client: &reqwest::Client, source: Pending) -> Outcome {
    let identifier = source.identifier;
    let fetched = match source.origin {
        Origin::Remote { download_url } => {
            tokio::time::sleep(fetch::MIN_REQUEST_SPACING).await;
            github::fetch_report(client, &identifier, &download_url).await
        }
        Origin::Local { path } => local::read_report(&identifier, &path),
    };
    let raw = match fetched {
        Ok(source) => source,
        Err(e) => {
            error!(source = %identifier, "fetch failed: {e:#}");
            return Outcome::Skipped {
                identifier,
                reason: SkipReason::FetchFailed,
            };
        }
    };

    let parsed = report::parse_report(&raw.text);
    let Some(timestamp) = parsed.timestamp else {
        return Outcome::Skipped {
            identifier,
            reason: SkipReason::NoTimestamp,
        };
    };
    let records = parsed
        .rows
        .iter()
        .filter_map(|candidate| report::build(timestamp, &identifier, candidate))
        .collect();
    Outcome::Parsed {
        identifier,
        records,
    }
}
