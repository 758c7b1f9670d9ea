//! Scan handler: load a pack, optionally ping it, print the merged servers.

use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tabled::Tabled;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use racelobby_config::Config;
use racelobby_core::{
    EntryState, EntryStatus, OnlineManager, PackSelection, PingProgress, PriorityFilter,
    ServerInfo, SessionStatus,
};

use crate::cli::{GlobalOpts, OutputFormat, ScanArgs, SortKey};
use crate::commands::{SourceSet, build_manager};
use crate::error::CliError;
use crate::output;

// ── Views ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
struct ServerView {
    id: String,
    name: String,
    track: String,
    drivers: u32,
    capacity: u32,
    ping_ms: Option<u64>,
    status: EntryStatus,
    password: bool,
    sources: Vec<String>,
    lan: bool,
    favourite: bool,
    excluded: bool,
    errors: Vec<String>,
}

impl ServerView {
    fn from_state(id: &str, s: &EntryState) -> Self {
        let info = s.info.as_ref();
        Self {
            id: id.to_owned(),
            name: s.name().to_owned(),
            track: info.map(|i| i.track.clone()).unwrap_or_default(),
            drivers: s.drivers(),
            capacity: info.map_or(0, |i| i.capacity),
            ping_ms: s.ping_ms,
            status: s.status,
            password: info.is_some_and(|i| i.password_required),
            sources: s.references.keys().cloned().collect(),
            lan: s.is_lan(),
            favourite: s.is_favourite(),
            excluded: s.is_excluded(),
            errors: s.errors.clone(),
        }
    }
}

#[derive(Tabled)]
struct ServerRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Track")]
    track: String,
    #[tabled(rename = "Drivers")]
    drivers: String,
    #[tabled(rename = "Ping")]
    ping: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Sources")]
    sources: String,
}

fn to_row(v: &ServerView, color: bool) -> ServerRow {
    let mut name = v.name.clone();
    if v.favourite {
        name.insert_str(0, "★ ");
    }
    if v.password {
        name.push_str(" 🔒");
    }
    ServerRow {
        id: v.id.clone(),
        name,
        track: v.track.clone(),
        drivers: if v.capacity > 0 {
            format!("{}/{}", v.drivers, v.capacity)
        } else {
            "-".into()
        },
        ping: v.ping_ms.map_or_else(|| "-".into(), |ms| format!("{ms} ms")),
        status: output::status_cell(v.status, color),
        sources: v.sources.join(", "),
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(args: ScanArgs, config: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    let manager = build_manager(
        config,
        SourceSet {
            lobby: true,
            lan: !args.no_lan,
        },
    )?;
    manager.attach_lists(config.lists_dir(), false).await?;

    let selection = selection(&manager, &args.source)?;
    let pack = manager.pack(&selection);
    let spinner = spinner(global);
    let cancel = CancellationToken::new();

    if let Some(bar) = &spinner {
        bar.set_message(format!("Loading {}", pack.keys().join(", ")));
    }
    let status = tokio::select! {
        status = pack.ensure_loaded(&cancel) => status,
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            pack.status()
        }
    };

    if status.status == SessionStatus::Error {
        if let Some(bar) = &spinner {
            bar.finish_and_clear();
        }
        manager.shutdown().await;
        return match (&status.error_source, &status.error) {
            (Some(key), Some(err)) => Err(CliError::from_load_error(key, err)),
            _ => Err(CliError::Internal("every source failed".into())),
        };
    }
    for session in pack.sessions() {
        if let Some(err) = session.error() {
            warn!(source = %session.key(), error = %err, "source failed to load");
        }
    }

    if args.ping {
        ping(&manager, priority_filter(&args), spinner.as_ref()).await?;
    }
    if let Some(bar) = &spinner {
        bar.finish_and_clear();
    }

    let mut views: Vec<ServerView> = manager
        .store()
        .snapshot()
        .iter()
        .map(|e| e.with_state(|s| ServerView::from_state(e.id().as_str(), s)))
        .filter(|v| args.include_excluded || !v.excluded)
        .collect();
    sort_views(&mut views, args.sort);
    if let Some(limit) = args.limit {
        views.truncate(limit);
    }

    let color = output::should_color(global.color);
    let out = output::render_list(global.output, &views, |v| to_row(v, color), |v| v.id.clone())?;
    output::print_output(&out, global.quiet);

    manager.shutdown().await;
    Ok(())
}

fn selection(manager: &OnlineManager, keys: &[String]) -> Result<PackSelection, CliError> {
    if keys.is_empty() {
        return Ok(PackSelection::All);
    }
    let known = manager.registry().keys();
    if let Some(unknown) = keys.iter().find(|k| !known.contains(k)) {
        return Err(CliError::Validation {
            field: "source".into(),
            reason: format!("unknown source '{unknown}', available: {}", known.join(", ")),
        });
    }
    Ok(PackSelection::Keys(keys.to_vec()))
}

async fn ping(
    manager: &OnlineManager,
    priority: Option<PriorityFilter>,
    spinner: Option<&ProgressBar>,
) -> Result<PingProgress, CliError> {
    let mut updates = manager.ping_progress();
    let mut cycle = manager.start_pinging(priority);
    loop {
        tokio::select! {
            done = &mut cycle => {
                return done.map_err(|e| CliError::Internal(format!("ping cycle failed: {e}")));
            }
            Ok(()) = updates.changed() => {
                let progress = *updates.borrow_and_update();
                if let Some(bar) = spinner {
                    bar.set_message(format!("Pinging {}/{}", progress.pinged, progress.total));
                }
            }
            _ = tokio::signal::ctrl_c() => manager.stop_pinging(),
        }
    }
}

fn priority_filter(args: &ScanArgs) -> Option<PriorityFilter> {
    let free = args.prefer_free;
    let needle = args.prefer_name.as_deref().map(str::to_lowercase);
    if !free && needle.is_none() {
        return None;
    }
    Some(Arc::new(move |state: &EntryState| {
        let has_room = free && state.info.as_ref().is_some_and(ServerInfo::has_free_slots);
        let named = needle
            .as_deref()
            .is_some_and(|n| state.name().to_lowercase().contains(n));
        has_room || named
    }))
}

fn sort_views(views: &mut [ServerView], key: SortKey) {
    match key {
        SortKey::Drivers => views.sort_by(|a, b| {
            b.drivers
                .cmp(&a.drivers)
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        }),
        SortKey::Ping => views.sort_by_key(|v| (v.ping_ms.is_none(), v.ping_ms)),
        SortKey::Name => views.sort_by_cached_key(|v| v.name.to_lowercase()),
    }
}

fn spinner(global: &GlobalOpts) -> Option<ProgressBar> {
    if global.quiet
        || global.output != OutputFormat::Table
        || !std::io::stderr().is_terminal()
    {
        return None;
    }
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
        bar.set_style(style);
    }
    bar.enable_steady_tick(Duration::from_millis(100));
    Some(bar)
}
