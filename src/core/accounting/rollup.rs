// src/core/accounting/rollup.rs

//! The usage-rollup engine.
//!
//! The hourly roll is the workhorse: it scans events, reservations, and
//! jobs overlapping one `[start, start+hour)` window, charges CPU-seconds
//! to the cluster, associations, reservations, and wckeys, redistributes
//! idle reservation time, reconciles the cluster row, and emits
//! everything in one batched store call. The daily and monthly rolls
//! delegate to stored aggregations over the hourly rows; their windows
//! are computed with local calendar math so DST transitions land on real
//! day and month boundaries.

use crate::core::LatticeError;
use crate::core::accounting::store::{AccountingStore, UsageScope};
use crate::core::model::{AssocUsage, ClusterUsage, RollupPeriod, WckeyUsage};
use chrono::{Datelike, Duration, Local, TimeZone};
use std::collections::HashMap;
use tracing::{debug, warn};

pub const HOUR_SECS: i64 = 3600;

/// Per-reservation scratch state carried through one hourly window.
struct LocalResvUsage {
    total: u64,
    unused: u64,
    assocs: Vec<u32>,
}

/// Rolls one hourly window for `cluster` and emits the resulting rows.
/// Returns the emitted cluster row for observability.
pub async fn hourly_rollup(
    store: &dyn AccountingStore,
    cluster: &str,
    start: i64,
    track_wckey: bool,
) -> Result<ClusterUsage, LatticeError> {
    let end = start + HOUR_SECS;
    let clip = |s: i64, e: i64| -> i64 {
        let s_open = if s == 0 { start } else { s };
        let e_open = if e == 0 { end } else { e };
        (e_open.min(end) - s_open.max(start)).max(0)
    };

    let mut c_usage = ClusterUsage {
        cluster: cluster.to_string(),
        period_start: start,
        ..Default::default()
    };
    let mut a_usage: HashMap<u32, u64> = HashMap::new();
    let mut w_usage: HashMap<String, u64> = HashMap::new();
    let mut r_usage: HashMap<u32, LocalResvUsage> = HashMap::new();

    // 1. Event scan: registration rows set the live CPU count and grow
    //    the window capacity; node rows contribute down time. MAINT
    //    events are already accounted as planned-down via reservations.
    for event in store.events_overlapping(cluster, start, end).await {
        if event.maint {
            continue;
        }
        let seconds = clip(event.start, event.end) as u64;
        if seconds == 0 {
            continue;
        }
        if event.is_registration() {
            c_usage.cpu_count = event.cpus;
            c_usage.total_time += seconds * u64::from(event.cpus);
        } else {
            c_usage.down_secs += seconds * u64::from(event.cpus);
        }
    }

    // 2. Reservation scan: the whole reservation cost lands on the
    //    cluster up front; jobs inside it draw the cost back down.
    for resv in store.resvs_overlapping(cluster, start, end).await {
        let seconds = clip(resv.start, resv.end) as u64;
        if seconds == 0 {
            continue;
        }
        let cost = seconds * u64::from(resv.cpus);
        if resv.maint {
            c_usage.pdown_secs += cost;
        } else {
            c_usage.alloc_secs += cost;
        }
        r_usage.insert(
            resv.id,
            LocalResvUsage {
                total: cost,
                unused: cost,
                assocs: resv.assocs.clone(),
            },
        );
    }

    // 3. Job scan: charge run time (minus suspensions) to associations
    //    and wckeys; cluster or reservation depending on where the job
    //    ran, plus reserved-but-pending time for queued jobs.
    for job in store.jobs_overlapping(cluster, start, end).await {
        let cpus = u64::from(job.alloc_cpus);
        if job.start > 0 {
            let run_secs = clip(job.start, job.end);
            let suspended = store.suspend_secs(job.job_id, job.start.max(start), end).await;
            let secs = (run_secs - suspended).max(0) as u64;
            if secs > 0 {
                *a_usage.entry(job.assoc_id).or_default() += secs * cpus;
                if track_wckey && !job.wckey.is_empty() {
                    *w_usage.entry(job.wckey.clone()).or_default() += secs * cpus;
                }
                if job.resv_id != 0 {
                    if let Some(resv) = r_usage.get_mut(&job.resv_id) {
                        resv.unused = resv.unused.saturating_sub(secs * cpus);
                    }
                } else {
                    c_usage.alloc_secs += secs * cpus;
                }
            }
        }
        // Eligible-to-start time is billed as reserved, but only for jobs
        // running (or queued) directly against the cluster.
        if job.resv_id == 0 {
            let pend_end = if job.start == 0 { end } else { job.start };
            let pend_secs = (pend_end.min(end) - job.eligible.max(start)).max(0) as u64;
            if pend_secs > 0 {
                c_usage.resv_secs += pend_secs * cpus;
            }
        }
    }

    // 4. Idle reservation time is split evenly across the reservation's
    //    associations; the floor-division remainder is dropped.
    for resv in r_usage.values() {
        if resv.unused == 0 || resv.assocs.is_empty() {
            continue;
        }
        let share = resv.unused / resv.assocs.len() as u64;
        if share == 0 {
            continue;
        }
        for assoc_id in &resv.assocs {
            *a_usage.entry(*assoc_id).or_default() += share;
        }
    }

    // 5. Sanity pass: the emitted row must decompose the window capacity.
    reconcile(&mut c_usage);

    // 6. One batched emit for the window.
    let assoc_rows: Vec<AssocUsage> = a_usage
        .into_iter()
        .map(|(assoc_id, alloc_secs)| AssocUsage {
            assoc_id,
            period_start: start,
            alloc_secs,
        })
        .collect();
    let wckey_rows: Vec<WckeyUsage> = w_usage
        .into_iter()
        .map(|(wckey, alloc_secs)| WckeyUsage {
            wckey,
            period_start: start,
            alloc_secs,
        })
        .collect();
    store
        .store_usage(
            RollupPeriod::Hour,
            vec![c_usage.clone()],
            assoc_rows,
            wckey_rows,
        )
        .await?;

    debug!(
        cluster,
        start,
        total = c_usage.total_time,
        alloc = c_usage.alloc_secs,
        idle = c_usage.idle_secs,
        "hourly rollup emitted"
    );
    Ok(c_usage)
}

/// Reconciles one cluster row so the buckets decompose `total_time`:
/// clamp over-allocation into `over`, then fit down/planned-down/reserved
/// and let idle take the remainder. Every adjustment is logged.
fn reconcile(c: &mut ClusterUsage) {
    if c.alloc_secs > c.total_time {
        warn!(
            cluster = %c.cluster,
            alloc = c.alloc_secs,
            total = c.total_time,
            "allocated exceeds window capacity; clamping into over"
        );
        c.over_secs += c.alloc_secs - c.total_time;
        c.alloc_secs = c.total_time;
    }
    let mut remaining = c.total_time - c.alloc_secs;
    for (name, bucket) in [
        ("down", &mut c.down_secs),
        ("planned_down", &mut c.pdown_secs),
        ("reserved", &mut c.resv_secs),
    ] {
        if *bucket > remaining {
            warn!(
                cluster = %c.cluster,
                bucket = name,
                excess = *bucket - remaining,
                "bucket exceeds remaining window capacity; clamping into over"
            );
            c.over_secs += *bucket - remaining;
            *bucket = remaining;
        }
        remaining -= *bucket;
    }
    c.idle_secs = remaining;
}

/// Start of the local calendar day containing `ts`.
pub fn day_start(ts: i64) -> i64 {
    let dt = Local.timestamp_opt(ts, 0).single().unwrap_or_else(|| {
        Local
            .timestamp_opt(ts, 0)
            .earliest()
            .expect("timestamp out of range")
    });
    let date = dt.date_naive();
    local_midnight(date)
}

/// Start of the local calendar day after the one containing `ts`.
pub fn next_day_start(ts: i64) -> i64 {
    let dt = Local.timestamp_opt(ts, 0).single().unwrap_or_else(|| {
        Local
            .timestamp_opt(ts, 0)
            .earliest()
            .expect("timestamp out of range")
    });
    let date = dt.date_naive() + Duration::days(1);
    local_midnight(date)
}

/// Start of the local calendar month containing `ts`.
pub fn month_start(ts: i64) -> i64 {
    let dt = Local.timestamp_opt(ts, 0).single().unwrap_or_else(|| {
        Local
            .timestamp_opt(ts, 0)
            .earliest()
            .expect("timestamp out of range")
    });
    let date = dt.date_naive().with_day(1).expect("day 1 always valid");
    local_midnight(date)
}

/// Start of the local calendar month after the one containing `ts`.
pub fn next_month_start(ts: i64) -> i64 {
    let dt = Local.timestamp_opt(ts, 0).single().unwrap_or_else(|| {
        Local
            .timestamp_opt(ts, 0)
            .earliest()
            .expect("timestamp out of range")
    });
    let date = dt.date_naive();
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    let first = date
        .with_day(1)
        .and_then(|d| d.with_month(month))
        .and_then(|d| d.with_year(year))
        .expect("first of month always valid");
    local_midnight(first)
}

fn local_midnight(date: chrono::NaiveDate) -> i64 {
    let midnight = date.and_hms_opt(0, 0, 0).expect("midnight always valid");
    // On a DST gap the literal midnight may not exist; take the earliest
    // valid instant of the day.
    Local
        .from_local_datetime(&midnight)
        .earliest()
        .map(|dt| dt.timestamp())
        .unwrap_or_else(|| midnight.and_utc().timestamp())
}

/// Runs the three daily stored aggregations for `[start, end)`.
pub async fn daily_rollup(
    store: &dyn AccountingStore,
    now: i64,
    start: i64,
    end: i64,
) -> Result<(), LatticeError> {
    for scope in [UsageScope::Assoc, UsageScope::Cluster, UsageScope::Wckey] {
        store
            .usage_aggregate(scope, RollupPeriod::Day, now, start, end)
            .await?;
    }
    Ok(())
}

/// Runs the three monthly stored aggregations for `[start, end)`.
pub async fn monthly_rollup(
    store: &dyn AccountingStore,
    now: i64,
    start: i64,
    end: i64,
) -> Result<(), LatticeError> {
    for scope in [UsageScope::Assoc, UsageScope::Cluster, UsageScope::Wckey] {
        store
            .usage_aggregate(scope, RollupPeriod::Month, now, start, end)
            .await?;
    }
    Ok(())
}
