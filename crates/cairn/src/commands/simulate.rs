//! Simulate command - drives a session workload through the metadata factory.
//!
//! Sessions are created and accessed on worker threads, each request running
//! in its own transaction. Orphaned creation entries, evictions and removals
//! can be layered on top to exercise the repair and tiering paths.

use std::ops::AddAssign;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Result, anyhow, ensure};
use chrono::{Duration, Utc};
use clap::Args;
use console::{Style, style};
use serde::Serialize;
use tracing::{debug, info};

use cairn_session::{
    CreationKey, CreationMetaData, CreationMetaDataEntry, ImmutableSessionMetaData, SessionId,
    SessionMetaData, SessionMetaDataFactory,
};
use cairn_store::{KeyValueStore, MemoryStore, Options, StoreStats, TxId};

use super::Context;

/// The CLI attaches the name of the creating worker as local context.
type Factory = SessionMetaDataFactory<MemoryStore, String>;

/// Arguments for the simulate command.
#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Number of sessions to create
    #[arg(short, long, default_value_t = 100)]
    pub sessions: usize,

    /// Requests per session after creation
    #[arg(short, long, default_value_t = 5)]
    pub requests: usize,

    /// Worker threads
    #[arg(short, long, default_value_t = 4)]
    pub threads: usize,

    /// Orphaned creation entries to plant and repair
    #[arg(long, default_value_t = 0)]
    pub orphans: usize,

    /// Sessions to evict from the active tier
    #[arg(long, default_value_t = 0)]
    pub evict: usize,

    /// Sessions to remove
    #[arg(long, default_value_t = 0)]
    pub remove: usize,

    /// Enable the durable tier regardless of config
    #[arg(long)]
    pub durable: bool,

    /// Use non-blocking lookups for requests
    #[arg(long)]
    pub try_find: bool,

    /// Override the max inactive interval of new sessions, in seconds
    #[arg(long)]
    pub max_inactive_secs: Option<i64>,
}

/// Per-worker counts, summed after the threads join.
#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    created: usize,
    passive: usize,
    found: usize,
    missing: usize,
}

impl AddAssign for Tally {
    fn add_assign(&mut self, other: Self) {
        self.created += other.created;
        self.passive += other.passive;
        self.found += other.found;
        self.missing += other.missing;
    }
}

/// Simulation results for JSON output.
#[derive(Debug, Serialize)]
struct SimulationReport {
    sessions: usize,
    threads: usize,
    durable: bool,
    created: usize,
    passive_creates: usize,
    requests: usize,
    found: usize,
    missing: usize,
    orphans_planted: usize,
    orphans_repaired: usize,
    evicted: usize,
    reactivated: usize,
    removed: usize,
    expired: usize,
    elapsed_ms: u64,
    store: StoreStats,
}

/// Run the simulate command.
pub fn run(args: SimulateArgs, ctx: &Context) -> Result<()> {
    ensure!(args.threads > 0, "--threads must be at least 1");
    ensure!(
        args.evict + args.remove <= args.sessions,
        "--evict plus --remove cannot exceed --sessions"
    );

    let mut store_config = ctx.config.config.store.clone();
    if args.durable {
        store_config = store_config.with_durable(true);
    }
    let mut factory_config = ctx.config.config.session.clone();
    if let Some(secs) = args.max_inactive_secs {
        ensure!(secs >= 0, "--max-inactive-secs must not be negative");
        factory_config = factory_config.with_default_max_inactive_interval(Duration::seconds(secs));
    }

    let durable = store_config.durable;
    let store = Arc::new(MemoryStore::new(store_config));
    let factory = Factory::new(Arc::clone(&store), factory_config);

    info!(
        sessions = args.sessions,
        threads = args.threads,
        requests = args.requests,
        durable,
        "Starting simulation"
    );
    let started = Instant::now();

    let ids: Vec<SessionId> = (0..args.sessions).map(|_| SessionId::generate()).collect();
    let tally = run_workers(&factory, &ids, &args)?;

    let (orphans_planted, orphans_repaired) = plant_orphans(&factory, args.orphans)?;

    let (to_evict, rest) = ids.split_at(args.evict);
    let (to_remove, kept) = rest.split_at(args.remove);

    let mut reactivated = 0;
    for id in to_evict {
        factory.evict(id)?;
        if factory.find(id, None)?.is_some() {
            reactivated += 1;
        }
    }

    let mut removed = 0;
    for id in to_remove {
        factory.remove(id, None)?;
        if factory.find(id, None)?.is_none() {
            removed += 1;
        }
    }

    let now = Utc::now();
    let mut expired = 0;
    for id in kept {
        if let Some(handle) = factory.find(id, None)?
            && factory.to_immutable(id, &handle).is_expired(now)
        {
            expired += 1;
        }
    }

    let report = SimulationReport {
        sessions: args.sessions,
        threads: args.threads,
        durable,
        created: tally.created,
        passive_creates: tally.passive,
        requests: args.sessions * args.requests,
        found: tally.found,
        missing: tally.missing,
        orphans_planted,
        orphans_repaired,
        evicted: to_evict.len(),
        reactivated,
        removed,
        expired,
        elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        store: store.stats(),
    };
    info!(elapsed_ms = report.elapsed_ms, "Simulation complete");

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, ctx.verbose);
    }
    Ok(())
}

fn run_workers(factory: &Factory, ids: &[SessionId], args: &SimulateArgs) -> Result<Tally> {
    if ids.is_empty() {
        return Ok(Tally::default());
    }

    let chunk = ids.len().div_ceil(args.threads);
    let requests = args.requests;
    let non_blocking = args.try_find;

    std::thread::scope(|scope| {
        let handles: Vec<_> = ids
            .chunks(chunk)
            .enumerate()
            .map(|(n, ids)| {
                scope.spawn(move || run_worker(factory, ids, n, requests, non_blocking))
            })
            .collect();

        let mut total = Tally::default();
        for handle in handles {
            total += handle
                .join()
                .map_err(|_| anyhow!("worker thread panicked"))??;
        }
        Ok(total)
    })
}

fn run_worker(
    factory: &Factory,
    ids: &[SessionId],
    worker: usize,
    requests: usize,
    non_blocking: bool,
) -> Result<Tally> {
    let name = format!("worker-{worker}");
    let mut tally = Tally::default();

    for id in ids {
        tally.created += 1;
        if create_session(factory, id, &name)? {
            tally.passive += 1;
        }
    }

    for _ in 0..requests {
        for id in ids {
            if request(factory, id, non_blocking)? {
                tally.found += 1;
            } else {
                tally.missing += 1;
            }
        }
    }

    debug!(worker = %name, sessions = ids.len(), "Worker finished");
    Ok(tally)
}

/// Run `f` in a fresh transaction, committing on success and rolling back on
/// failure.
fn in_transaction<T>(store: &MemoryStore, f: impl FnOnce(TxId) -> Result<T>) -> Result<T> {
    let tx = store.begin();
    match f(tx) {
        Ok(value) => {
            store.commit(tx)?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = store.rollback(tx) {
                debug!(%tx, error = %rollback, "Rollback failed");
            }
            Err(e)
        }
    }
}

/// Create a session and record its first access in the same transaction.
///
/// Returns whether both mutators were passive.
fn create_session(factory: &Factory, id: &SessionId, worker: &str) -> Result<bool> {
    in_transaction(factory.store(), |tx| {
        let handle = factory.create(id, Some(tx))?;
        let mut meta = factory.to_mutable(id, handle, Some(tx))?;
        meta.local_context().get_or_init(|| worker.to_string());

        let now = Utc::now();
        meta.set_last_access(now, now)?;

        Ok(meta.creation().mutator().is_passive() && meta.access().mutator().is_passive())
    })
}

/// Look a session up and record an access. Returns whether it was found.
fn request(factory: &Factory, id: &SessionId, non_blocking: bool) -> Result<bool> {
    in_transaction(factory.store(), |tx| {
        let found = if non_blocking {
            factory.try_find(id, Some(tx))?
        } else {
            factory.find(id, Some(tx))?
        };
        let Some(handle) = found else {
            return Ok(false);
        };

        let start = Utc::now();
        let mut meta = factory.to_mutable(id, handle, Some(tx))?;
        meta.set_last_access(start, Utc::now().max(start))?;
        Ok(true)
    })
}

/// Insert creation entries with no access entry, then look each one up.
///
/// Returns how many were planted and how many the lookup purged.
fn plant_orphans(factory: &Factory, count: usize) -> Result<(usize, usize)> {
    let store = factory.store();
    let interval = factory.config().default_max_inactive_interval();
    let mut repaired = 0;

    for _ in 0..count {
        let id = SessionId::generate();
        let key = CreationKey::<String>::new(&id);
        store.insert_if_absent(
            &key,
            CreationMetaDataEntry::new(CreationMetaData::new(Utc::now(), interval)),
            Options::new(),
        )?;

        if factory.find(&id, None)?.is_none() && store.peek_active(&key).is_none() {
            repaired += 1;
        }
    }

    Ok((count, repaired))
}

fn print_report(report: &SimulationReport, verbose: bool) {
    let dim = Style::new().dim();
    let cyan = Style::new().cyan();

    println!();
    println!("{}", style("Cairn Simulation").bold());
    println!("{}", dim.apply_to("─".repeat(40)));
    println!();
    println!("  {} {}", dim.apply_to("Sessions:      "), cyan.apply_to(report.sessions));
    println!("  {} {}", dim.apply_to("Threads:       "), cyan.apply_to(report.threads));
    println!("  {} {}", dim.apply_to("Durable tier:  "), cyan.apply_to(report.durable));
    println!("  {} {}", dim.apply_to("Created:       "), cyan.apply_to(report.created));
    println!("  {} {}", dim.apply_to("Passive:       "), cyan.apply_to(report.passive_creates));
    println!("  {} {}", dim.apply_to("Requests:      "), cyan.apply_to(report.requests));
    println!("  {} {}", dim.apply_to("Found:         "), cyan.apply_to(report.found));
    println!("  {} {}", dim.apply_to("Missing:       "), cyan.apply_to(report.missing));
    println!(
        "  {} {}/{}",
        dim.apply_to("Orphans fixed: "),
        cyan.apply_to(report.orphans_repaired),
        report.orphans_planted
    );
    println!(
        "  {} {} ({} reactivated)",
        dim.apply_to("Evicted:       "),
        cyan.apply_to(report.evicted),
        report.reactivated
    );
    println!("  {} {}", dim.apply_to("Removed:       "), cyan.apply_to(report.removed));
    println!("  {} {}", dim.apply_to("Expired:       "), cyan.apply_to(report.expired));
    println!("  {} {} ms", dim.apply_to("Elapsed:       "), report.elapsed_ms);

    if verbose {
        let stats = &report.store;
        println!();
        println!("{}", style("Store Statistics").bold());
        println!("{}", dim.apply_to("─".repeat(40)));
        println!();
        println!("  {} {}", dim.apply_to("Inserts:       "), stats.inserts);
        println!("  {} {}", dim.apply_to("Writes:        "), stats.writes);
        println!("  {} {}", dim.apply_to("Removals:      "), stats.removals);
        println!("  {} {}", dim.apply_to("Evictions:     "), stats.evictions);
        println!("  {} {}", dim.apply_to("Activations:   "), stats.activations);
        println!("  {} {}", dim.apply_to("Synchronous:   "), stats.synchronous);
        println!("  {} {}", dim.apply_to("Lock waits:    "), stats.lock_waits);
        println!("  {} {}", dim.apply_to("Commits:       "), stats.commits);
        println!("  {} {}", dim.apply_to("Rollbacks:     "), stats.rollbacks);
    }
    println!();
}
