use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

/// A snapshot of processor profiling metrics.
///
/// Profiling is enabled via the `AQLBRIDGE_PROFILE` environment variable and
/// accumulates across every processor in the process.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryProfileSnapshot {
    /// Total nanoseconds spent resolving containment sets.
    pub resolve_ns: u64,
    /// Number of containment resolutions.
    pub resolve_count: u64,
    /// Total nanoseconds spent building per-template fragments.
    pub fragment_ns: u64,
    /// Number of fragments built.
    pub fragment_count: u64,
    /// Total nanoseconds spent merging fragments into one statement.
    pub merge_ns: u64,
    /// Number of merges.
    pub merge_count: u64,
    /// Total nanoseconds spent fetching statement results.
    pub fetch_ns: u64,
    /// Number of statements fetched.
    pub fetch_count: u64,
    /// Total nanoseconds spent rendering explain entries.
    pub render_ns: u64,
    /// Number of statements rendered for explain.
    pub render_count: u64,
}

#[derive(Default)]
struct QueryProfileCounters {
    resolve_ns: AtomicU64,
    resolve_count: AtomicU64,
    fragment_ns: AtomicU64,
    fragment_count: AtomicU64,
    merge_ns: AtomicU64,
    merge_count: AtomicU64,
    fetch_ns: AtomicU64,
    fetch_count: AtomicU64,
    render_ns: AtomicU64,
    render_count: AtomicU64,
}

static PROFILE_ENABLED: OnceLock<bool> = OnceLock::new();
static PROFILE_COUNTERS: OnceLock<QueryProfileCounters> = OnceLock::new();

fn profiling_enabled() -> bool {
    *PROFILE_ENABLED.get_or_init(|| std::env::var_os("AQLBRIDGE_PROFILE").is_some())
}

fn counters() -> Option<&'static QueryProfileCounters> {
    profiling_enabled().then(|| PROFILE_COUNTERS.get_or_init(QueryProfileCounters::default))
}

pub(crate) fn profile_timer() -> Option<Instant> {
    profiling_enabled().then(Instant::now)
}

pub(crate) enum QueryProfileKind {
    Resolve,
    Fragment,
    Merge,
    Fetch,
    Render,
}

pub(crate) fn record_profile_timer(kind: QueryProfileKind, start: Option<Instant>) {
    let Some(start) = start else {
        return;
    };
    let Some(counters) = counters() else {
        return;
    };
    let nanos = start.elapsed().as_nanos().min(u64::MAX as u128) as u64;
    let (ns, count) = match kind {
        QueryProfileKind::Resolve => (&counters.resolve_ns, &counters.resolve_count),
        QueryProfileKind::Fragment => (&counters.fragment_ns, &counters.fragment_count),
        QueryProfileKind::Merge => (&counters.merge_ns, &counters.merge_count),
        QueryProfileKind::Fetch => (&counters.fetch_ns, &counters.fetch_count),
        QueryProfileKind::Render => (&counters.render_ns, &counters.render_count),
    };
    ns.fetch_add(nanos, Ordering::Relaxed);
    count.fetch_add(1, Ordering::Relaxed);
}

/// Retrieves a snapshot of current profiling metrics.
///
/// Returns `None` when `AQLBRIDGE_PROFILE` is unset. With `reset`, counters
/// are zeroed as they are read.
///
/// ```no_run
/// use aqlbridge::query::profile::profile_snapshot;
///
/// if let Some(snapshot) = profile_snapshot(true) {
///     println!("fragments built: {}", snapshot.fragment_count);
/// }
/// ```
pub fn profile_snapshot(reset: bool) -> Option<QueryProfileSnapshot> {
    let counters = counters()?;
    let load = |counter: &AtomicU64| {
        if reset {
            counter.swap(0, Ordering::Relaxed)
        } else {
            counter.load(Ordering::Relaxed)
        }
    };
    Some(QueryProfileSnapshot {
        resolve_ns: load(&counters.resolve_ns),
        resolve_count: load(&counters.resolve_count),
        fragment_ns: load(&counters.fragment_ns),
        fragment_count: load(&counters.fragment_count),
        merge_ns: load(&counters.merge_ns),
        merge_count: load(&counters.merge_count),
        fetch_ns: load(&counters.fetch_ns),
        fetch_count: load(&counters.fetch_count),
        render_ns: load(&counters.render_ns),
        render_count: load(&counters.render_count),
    })
}
