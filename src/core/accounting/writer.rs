// src/core/accounting/writer.rs

//! The accounting writer: every add/modify/remove is a target-table
//! mutation plus one transaction-log row, committed as a single batch.
//! Bulk operations fold all rows into one batch so a failure anywhere
//! rolls the whole change back and surfaces one error.
//!
//! Operations that also touch the controller's in-memory tables are split
//! in two: a synchronous `prepare` step that runs under the associations
//! write lock and returns the op batch, and the store commit, which the
//! caller awaits after the lock is released.

use crate::core::LatticeError;
use crate::core::model::{Association, Qos};
use crate::core::sched::topology::preemption_introduces_loop;
use crate::core::state::{AssocTable, QOS_WIDTH, now};
use crate::core::{Bitmap, accounting::store::*};
use tracing::info;

/// A prepared write: the op batch and its transaction-log row.
#[derive(Debug)]
pub struct PreparedWrite {
    pub ops: Vec<StoreOp>,
    pub txn: TxnInput,
}

fn txn(action: TxnAction, object: &str, actor: &str, info: String) -> TxnInput {
    TxnInput {
        timestamp: now(),
        action,
        object: object.to_string(),
        actor: actor.to_string(),
        info,
    }
}

/// Adds a batch of users in one transaction.
pub async fn add_users(
    store: &dyn AccountingStore,
    actor: &str,
    users: Vec<UserRow>,
) -> Result<u64, LatticeError> {
    let names: Vec<String> = users.iter().map(|u| u.name.clone()).collect();
    let ops = users.into_iter().map(StoreOp::UpsertUser).collect();
    store
        .commit(
            ops,
            txn(TxnAction::AddUser, &names.join(","), actor, String::new()),
        )
        .await
}

/// Soft-deletes a user; the row stays with its flag set and a bumped
/// `mod_time`.
pub async fn remove_user(
    store: &dyn AccountingStore,
    actor: &str,
    name: &str,
) -> Result<u64, LatticeError> {
    let mod_time = now();
    store
        .commit(
            vec![StoreOp::SoftDeleteUser {
                name: name.to_string(),
                mod_time,
            }],
            txn(TxnAction::RemoveUser, name, actor, String::new()),
        )
        .await
}

/// Adds a batch of accounts in one transaction.
pub async fn add_accounts(
    store: &dyn AccountingStore,
    actor: &str,
    accounts: Vec<AccountRow>,
) -> Result<u64, LatticeError> {
    let names: Vec<String> = accounts.iter().map(|a| a.name.clone()).collect();
    let ops = accounts.into_iter().map(StoreOp::UpsertAccount).collect();
    store
        .commit(
            ops,
            txn(TxnAction::AddAccount, &names.join(","), actor, String::new()),
        )
        .await
}

pub async fn remove_account(
    store: &dyn AccountingStore,
    actor: &str,
    name: &str,
) -> Result<u64, LatticeError> {
    store
        .commit(
            vec![StoreOp::SoftDeleteAccount {
                name: name.to_string(),
                mod_time: now(),
            }],
            txn(TxnAction::RemoveAccount, name, actor, String::new()),
        )
        .await
}

/// Grants coordinator rights over `acct` to every listed user in one
/// batch.
pub async fn add_coordinators(
    store: &dyn AccountingStore,
    actor: &str,
    acct: &str,
    users: Vec<String>,
) -> Result<u64, LatticeError> {
    let info = users.join(",");
    store
        .commit(
            vec![StoreOp::AddCoords {
                acct: acct.to_string(),
                users,
            }],
            txn(TxnAction::AddCoord, acct, actor, info),
        )
        .await
}

pub async fn remove_coordinators(
    store: &dyn AccountingStore,
    actor: &str,
    acct: &str,
    users: Vec<String>,
) -> Result<u64, LatticeError> {
    let info = users.join(",");
    store
        .commit(
            vec![StoreOp::RemoveCoords {
                acct: acct.to_string(),
                users,
            }],
            txn(TxnAction::RemoveCoord, acct, actor, info),
        )
        .await
}

/// Registers (or re-registers) a cluster controller: an upsert of the
/// cluster row plus a txn row naming the reporting user.
pub async fn register_ctld(
    store: &dyn AccountingStore,
    actor: &str,
    cluster: &str,
    control_host: &str,
    control_port: u16,
    rpc_version: u32,
) -> Result<u64, LatticeError> {
    store
        .commit(
            vec![StoreOp::UpsertCluster(ClusterRow {
                name: cluster.to_string(),
                control_host: control_host.to_string(),
                control_port,
                rpc_version,
                cpu_count: 0,
                deleted: false,
                mod_time: now(),
            })],
            txn(
                TxnAction::RegisterCluster,
                cluster,
                actor,
                format!("{control_host}:{control_port} v{rpc_version}"),
            ),
        )
        .await
}

/// Materializes an association under `parent_acct` and returns the store
/// write for the whole refreshed tree (nested-set bounds shift on
/// insert). Runs under the associations write lock.
#[allow(clippy::too_many_arguments)]
pub fn add_assoc_prepare(
    assocs: &mut AssocTable,
    actor: &str,
    cluster: &str,
    acct: &str,
    user: &str,
    partition: &str,
    parent_acct: &str,
) -> Result<(u32, PreparedWrite), LatticeError> {
    if assocs.find(acct, user, partition).is_some() {
        return Err(LatticeError::DbOneChangeAtATime);
    }
    let id = assocs.next_assoc_id;
    assocs.next_assoc_id += 1;
    assocs.assocs.push(Association {
        id,
        cluster: cluster.to_string(),
        acct: acct.to_string(),
        user: user.to_string(),
        partition: partition.to_string(),
        parent_acct: parent_acct.to_string(),
        lft: 0,
        rgt: 0,
        limits: Default::default(),
        qos: Bitmap::new(QOS_WIDTH),
        delta_qos: String::new(),
        deleted: false,
        mod_time: now(),
    });
    assocs.rebuild_nested_sets();

    let ops: Vec<StoreOp> = assocs
        .assocs
        .iter()
        .map(|a| StoreOp::UpsertAssoc(assoc_row(a)))
        .collect();
    Ok((
        id,
        PreparedWrite {
            ops,
            txn: txn(
                TxnAction::AddAssoc,
                &format!("{cluster}/{acct}/{user}"),
                actor,
                String::new(),
            ),
        },
    ))
}

fn assoc_row(a: &Association) -> AssocRow {
    AssocRow {
        id: a.id,
        cluster: a.cluster.clone(),
        acct: a.acct.clone(),
        user: a.user.clone(),
        partition: a.partition.clone(),
        parent_acct: a.parent_acct.clone(),
        lft: a.lft,
        rgt: a.rgt,
        qos: a
            .qos
            .iter_set()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(","),
        delta_qos: a.delta_qos.clone(),
        deleted: a.deleted,
        mod_time: a.mod_time,
    }
}

/// Adds a batch of QOS classes; one transaction for the whole batch.
/// Runs under the associations write lock.
pub fn add_qoses_prepare(
    assocs: &mut AssocTable,
    actor: &str,
    names: Vec<String>,
) -> Result<PreparedWrite, LatticeError> {
    let mut ops = Vec::with_capacity(names.len());
    for name in &names {
        if assocs.find_qos(name).is_some() {
            return Err(LatticeError::DbOneChangeAtATime);
        }
        let id = assocs.next_qos_id;
        assocs.next_qos_id += 1;
        let qos = Qos::new(id, name.clone(), QOS_WIDTH);
        ops.push(StoreOp::UpsertQos(qos_row(&qos)));
        assocs.qoses.push(qos);
    }
    Ok(PreparedWrite {
        ops,
        txn: txn(TxnAction::AddQos, &names.join(","), actor, String::new()),
    })
}

fn qos_row(q: &Qos) -> QosRow {
    QosRow {
        id: q.id,
        name: q.name.clone(),
        description: q.description.clone(),
        preempt: q.preempt.iter_set().map(|i| i as u32).collect(),
        usage_factor: q.usage_factor,
        deleted: q.deleted,
        mod_time: q.mod_time,
    }
}

/// Modifies a QOS preemption set. Rejected with `QosPreemptionLoop` when
/// the new edges would close a cycle; on rejection neither the in-memory
/// table nor the store is touched and no txn row is appended. Runs under
/// the associations write lock.
pub fn modify_qos_preempt_prepare(
    assocs: &mut AssocTable,
    actor: &str,
    name: &str,
    preempt_names: &[String],
) -> Result<PreparedWrite, LatticeError> {
    let origin = assocs
        .find_qos(name)
        .ok_or_else(|| LatticeError::InvalidQos(name.to_string()))?
        .id;

    let mut new_preempt = Bitmap::new(QOS_WIDTH);
    for preemptee in preempt_names {
        let target = assocs
            .find_qos(preemptee)
            .ok_or_else(|| LatticeError::InvalidQos(preemptee.clone()))?;
        new_preempt.set(target.id as usize);
    }

    if preemption_introduces_loop(&assocs.qoses, origin, &new_preempt) {
        return Err(LatticeError::QosPreemptionLoop);
    }

    let mod_time = now();
    let qos = assocs
        .qoses
        .iter_mut()
        .find(|q| q.id == origin)
        .expect("qos vanished under the associations lock");
    qos.preempt = new_preempt;
    qos.mod_time = mod_time;
    let row = qos_row(qos);

    Ok(PreparedWrite {
        ops: vec![StoreOp::UpsertQos(row)],
        txn: txn(
            TxnAction::ModifyQos,
            name,
            actor,
            format!("preempt={}", preempt_names.join(",")),
        ),
    })
}

/// Soft-deletes a QOS and scrubs it out of every association's delta-QOS
/// column with a regex replace, so present allocations keep a valid,
/// reduced QOS set. Runs under the associations write lock.
pub fn remove_qos_prepare(
    assocs: &mut AssocTable,
    actor: &str,
    name: &str,
) -> Result<PreparedWrite, LatticeError> {
    let qos_id = assocs
        .find_qos(name)
        .ok_or_else(|| LatticeError::InvalidQos(name.to_string()))?
        .id;
    let mod_time = now();

    let escaped = regex::escape(name);
    // Mid-list and trailing entries first, then a leading entry.
    let mid_pattern = format!(",[+-]?{escaped}(?=,|$)");
    let lead_pattern = format!("^[+-]?{escaped}(,|$)");
    let ops = vec![
        StoreOp::SoftDeleteQos {
            name: name.to_string(),
            mod_time,
        },
        StoreOp::RewriteDeltaQos {
            pattern: mid_pattern.clone(),
            replacement: String::new(),
            mod_time,
        },
        StoreOp::RewriteDeltaQos {
            pattern: lead_pattern.clone(),
            replacement: String::new(),
            mod_time,
        },
    ];

    // Mirror the change in the scheduling-side tables.
    if let Some(qos) = assocs.qoses.iter_mut().find(|q| q.id == qos_id) {
        qos.deleted = true;
        qos.mod_time = mod_time;
    }
    let scrub_mid =
        regex::Regex::new(&mid_pattern).map_err(|e| LatticeError::Internal(e.to_string()))?;
    let scrub_lead =
        regex::Regex::new(&lead_pattern).map_err(|e| LatticeError::Internal(e.to_string()))?;
    for assoc in assocs.assocs.iter_mut() {
        let rewritten = scrub_lead
            .replace_all(&scrub_mid.replace_all(&assoc.delta_qos, ""), "")
            .into_owned();
        if rewritten != assoc.delta_qos {
            assoc.delta_qos = rewritten;
            assoc.mod_time = mod_time;
        }
        assoc.qos.clear(qos_id as usize);
    }

    info!(qos = name, "qos removed and delta columns scrubbed");
    Ok(PreparedWrite {
        ops,
        txn: txn(TxnAction::RemoveQos, name, actor, String::new()),
    })
}
