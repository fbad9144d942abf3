mod availability;
mod error;
mod gaps;
mod mutations;
mod queries;

pub use availability::{find_conflict, Availability, ConflictReason};
pub use error::EngineError;
pub use gaps::{gaps_in_window, BusinessHours};
pub use mutations::{hold_matches, BookingOutcome, BookingRequest, HoldRequest};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedStaffTimeline = Arc<RwLock<StaffTimeline>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    respond_batch(batch, &result);
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// Secondary indexes over one tenant's timelines. Kept in lockstep with
/// applied events; rebuilt from scratch on replay.
pub(super) struct TimelineIndex {
    /// appointment id → staff id. Never unmapped — appointments are soft rows.
    pub appointment_staff: DashMap<Ulid, Ulid>,
    /// hold id → staff id. Unmapped on consumption or release.
    pub hold_staff: DashMap<Ulid, Ulid>,
    /// idempotency key → appointment id.
    pub idempotency: DashMap<String, Ulid>,
}

impl TimelineIndex {
    fn new() -> Self {
        Self {
            appointment_staff: DashMap::new(),
            hold_staff: DashMap::new(),
            idempotency: DashMap::new(),
        }
    }
}

/// One tenant's booking engine: staff timelines plus the WAL that makes
/// every operation atomic across crash and restart.
pub struct Engine {
    pub(super) staff: DashMap<Ulid, SharedStaffTimeline>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) index: TimelineIndex,
    pub business_hours: BusinessHours,
}

/// Apply an event directly to a StaffTimeline (no locking — caller holds
/// the lock) and keep the secondary indexes in step.
fn apply_to_timeline(timeline: &mut StaffTimeline, event: &Event, index: &TimelineIndex) {
    match event {
        Event::HoldPlaced {
            id,
            staff_id,
            span,
            client_id,
            service_id,
            expires_at,
        } => {
            timeline.insert_hold(SlotHold {
                id: *id,
                staff_id: *staff_id,
                span: *span,
                client_id: *client_id,
                service_id: *service_id,
                expires_at: *expires_at,
            });
            index.hold_staff.insert(*id, *staff_id);
        }
        Event::HoldReleased { id, .. } => {
            timeline.remove_hold(id);
            index.hold_staff.remove(id);
        }
        Event::AppointmentBooked {
            appointment,
            consumed_hold,
        } => {
            if let Some(hold_id) = consumed_hold {
                timeline.remove_hold(hold_id);
                index.hold_staff.remove(hold_id);
            }
            index
                .appointment_staff
                .insert(appointment.id, appointment.staff_id);
            if let Some(key) = &appointment.idempotency_key {
                index.idempotency.insert(key.clone(), appointment.id);
            }
            timeline.insert_appointment(appointment.clone());
        }
        Event::AppointmentCancelled { id, .. } => {
            // Unconditional status write — re-cancelling is a no-op, and the
            // row stays put for history.
            if let Some(appointment) = timeline.appointment_mut(id) {
                appointment.status = AppointmentStatus::Cancelled;
            }
        }
        Event::AppointmentRescheduled { id, span, .. } => {
            // Remove and reinsert so the sort-by-start invariant holds.
            if let Some(pos) = timeline.appointments.iter().position(|a| a.id == *id) {
                let mut appointment = timeline.appointments.remove(pos);
                appointment.span = *span;
                timeline.insert_appointment(appointment);
            }
        }
        // StaffRegistered is handled at the DashMap level, not here.
        Event::StaffRegistered { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, business_hours: BusinessHours) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            staff: DashMap::new(),
            wal_tx,
            index: TimelineIndex::new(),
            business_hours,
        };

        // Replay events — we're the sole owner of these Arcs, so try_write
        // always succeeds instantly (no contention). Never use blocking_write
        // here because this may run inside an async context (e.g. lazy tenant
        // creation).
        for event in &events {
            match event {
                Event::StaffRegistered { id, name } => {
                    let timeline = StaffTimeline::new(*id, name.clone());
                    engine.staff.insert(*id, Arc::new(RwLock::new(timeline)));
                }
                other => {
                    if let Some(staff_id) = event_staff_id(other)
                        && let Some(entry) = engine.staff.get(&staff_id) {
                            let tl_arc = entry.clone();
                            let mut guard = tl_arc.try_write().expect("replay: uncontended write");
                            apply_to_timeline(&mut guard, other, &engine.index);
                        }
                }
            }
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_staff(&self, id: &Ulid) -> Option<SharedStaffTimeline> {
        self.staff.get(id).map(|e| e.value().clone())
    }

    pub fn staff_for_appointment(&self, appointment_id: &Ulid) -> Option<Ulid> {
        self.index
            .appointment_staff
            .get(appointment_id)
            .map(|e| *e.value())
    }

    pub fn staff_for_hold(&self, hold_id: &Ulid) -> Option<Ulid> {
        self.index.hold_staff.get(hold_id).map(|e| *e.value())
    }

    /// WAL-append + apply in one call. The append happens first, so a
    /// storage failure leaves in-memory state untouched.
    pub(super) async fn persist_and_apply(
        &self,
        timeline: &mut StaffTimeline,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_timeline(timeline, event, &self.index);
        Ok(())
    }

    /// Lookup appointment → staff, get timeline, acquire write lock.
    pub(super) async fn resolve_appointment_write(
        &self,
        appointment_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<StaffTimeline>), EngineError> {
        let staff_id = self
            .staff_for_appointment(appointment_id)
            .ok_or(EngineError::NotFound(*appointment_id))?;
        let timeline = self
            .get_staff(&staff_id)
            .ok_or(EngineError::NotFound(staff_id))?;
        let guard = timeline.write_owned().await;
        Ok((staff_id, guard))
    }
}

/// Extract the staff_id from an event (for non-StaffRegistered events).
fn event_staff_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::HoldPlaced { staff_id, .. }
        | Event::HoldReleased { staff_id, .. }
        | Event::AppointmentCancelled { staff_id, .. }
        | Event::AppointmentRescheduled { staff_id, .. } => Some(*staff_id),
        Event::AppointmentBooked { appointment, .. } => Some(appointment.staff_id),
        Event::StaffRegistered { .. } => None,
    }
}
