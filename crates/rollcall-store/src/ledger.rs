//! Daily attendance ledger.
//!
//! One row per identity per calendar day in the reporting time zone. The
//! first IN of the day is written once and never cleared; the last OUT is
//! replaced by each later OUT. Every write is a read-then-conditional-write
//! inside an immediate transaction on the store's single connection, so the
//! two camera workers cannot lose each other's updates.

use crate::db::{Store, StoreError};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Timelike, Utc};
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::fmt;

const DAY_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "OUT")]
    Out,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventKind::In => "IN",
            EventKind::Out => "OUT",
        })
    }
}

/// What a ledger write did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerAction {
    Created,
    Updated,
    Skipped,
}

/// How to treat an OUT sighting when the identity has no IN for the day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutBeforeIn {
    /// The first sighting of the day is the arrival, whichever camera saw it.
    #[default]
    TreatAsIn,
    /// OUT without a prior IN is dropped.
    Ignore,
}

/// Structured result of [`Ledger::record_event`]. Never an `Err`: storage
/// faults come back with `success == false`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerOutcome {
    pub success: bool,
    pub action: Option<LedgerAction>,
    pub message: String,
}

impl LedgerOutcome {
    fn ok(action: LedgerAction, message: impl Into<String>) -> Self {
        Self {
            success: true,
            action: Some(action),
            message: message.into(),
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            action: None,
            message: message.into(),
        }
    }

    /// True for successful writes that changed the ledger.
    pub fn is_change(&self) -> bool {
        self.success && matches!(self.action, Some(LedgerAction::Created | LedgerAction::Updated))
    }
}

#[derive(Debug, Clone)]
pub struct AttendanceEvent {
    pub identity_id: String,
    pub kind: EventKind,
    pub camera_id: String,
    pub confidence: f32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceRecord {
    pub identity_id: String,
    pub day: NaiveDate,
    pub first_in: Option<NaiveTime>,
    pub in_camera_id: Option<String>,
    pub in_confidence: Option<f32>,
    pub last_out: Option<NaiveTime>,
    pub out_camera_id: Option<String>,
    pub out_confidence: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceSummaryRow {
    pub identity_id: String,
    pub name: String,
    pub department: String,
    pub day: NaiveDate,
    pub first_in: Option<NaiveTime>,
    pub last_out: Option<NaiveTime>,
    /// "Xh Ym" when both IN and OUT are set.
    pub duration: Option<String>,
}

/// The write chosen for an event given the day's existing row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    InsertIn,
    SetIn,
    SetOut,
    Skip(&'static str),
}

#[derive(Debug, Clone, Copy)]
struct DayState {
    first_in: Option<NaiveTime>,
    last_out: Option<NaiveTime>,
}

fn transition(existing: Option<DayState>, kind: EventKind, at: NaiveTime, policy: OutBeforeIn) -> Transition {
    match (existing, kind) {
        (None, EventKind::In) => Transition::InsertIn,
        (None, EventKind::Out) => match policy {
            OutBeforeIn::TreatAsIn => Transition::InsertIn,
            OutBeforeIn::Ignore => Transition::Skip("OUT without prior IN ignored"),
        },
        (Some(day), EventKind::In) => match day.first_in {
            Some(_) => Transition::Skip("IN already logged"),
            None => Transition::SetIn,
        },
        (Some(day), EventKind::Out) => match day.first_in {
            None => match policy {
                OutBeforeIn::TreatAsIn => Transition::SetIn,
                OutBeforeIn::Ignore => Transition::Skip("OUT without prior IN ignored"),
            },
            Some(first_in) if at < first_in => Transition::Skip("OUT earlier than first IN"),
            Some(_) => match day.last_out {
                Some(last_out) if at < last_out => Transition::Skip("OUT earlier than recorded OUT"),
                _ => Transition::SetOut,
            },
        },
    }
}

/// Parse a `+HH:MM` / `-HH:MM` / `Z` offset.
pub fn parse_utc_offset(s: &str) -> Option<FixedOffset> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("z") || s.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0);
    }
    let (sign, rest) = match s.as_bytes().first()? {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => return None,
    };
    let (h, m) = rest.split_once(':').unwrap_or((rest, "0"));
    let hours: i32 = h.parse().ok()?;
    let minutes: i32 = m.parse().ok()?;
    if !(0..=23).contains(&hours) || !(0..=59).contains(&minutes) {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn parse_time(value: Option<String>) -> rusqlite::Result<Option<NaiveTime>> {
    value
        .map(|s| {
            NaiveTime::parse_from_str(&s, TIME_FORMAT)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
        })
        .transpose()
}

fn parse_day(value: String) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(&value, DAY_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn format_duration(first_in: NaiveTime, last_out: NaiveTime) -> Option<String> {
    let minutes = (last_out - first_in).num_minutes();
    (minutes >= 0).then(|| format!("{}h {}m", minutes / 60, minutes % 60))
}

/// Idempotent per-day attendance writer.
#[derive(Clone)]
pub struct Ledger {
    store: Store,
    offset: FixedOffset,
    policy: OutBeforeIn,
}

impl Ledger {
    pub fn new(store: Store, offset: FixedOffset, policy: OutBeforeIn) -> Self {
        Self { store, offset, policy }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Calendar day and wall-clock time (second precision) of `ts` in the
    /// reporting time zone.
    pub fn local_day_and_time(&self, ts: DateTime<Utc>) -> (NaiveDate, NaiveTime) {
        let local = ts.with_timezone(&self.offset);
        let time = local.time();
        (local.date_naive(), time.with_nanosecond(0).unwrap_or(time))
    }

    /// Today in the reporting time zone.
    pub fn today(&self) -> NaiveDate {
        self.local_day_and_time(Utc::now()).0
    }

    /// Apply one recognition event to the identity's row for that day.
    pub async fn record_event(&self, event: AttendanceEvent) -> LedgerOutcome {
        let (day, at) = self.local_day_and_time(event.timestamp);
        let policy = self.policy;
        let identity = event.identity_id.clone();
        let kind = event.kind;

        let result = self
            .store
            .conn()
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let day_s = day.format(DAY_FORMAT).to_string();
                let at_s = at.format(TIME_FORMAT).to_string();

                let existing = tx
                    .query_row(
                        "SELECT id, first_in, last_out FROM attendance WHERE identity_id = ?1 AND day = ?2",
                        params![event.identity_id, day_s],
                        |row| {
                            Ok((
                                row.get::<_, i64>(0)?,
                                parse_time(row.get(1)?)?,
                                parse_time(row.get(2)?)?,
                            ))
                        },
                    )
                    .optional()?;

                let state = existing.map(|(_, first_in, last_out)| DayState { first_in, last_out });
                let step = transition(state, event.kind, at, policy);
                let confidence = event.confidence as f64;

                let action = match (step, existing) {
                    (Transition::InsertIn, _) => {
                        tx.execute(
                            "INSERT INTO attendance (identity_id, day, first_in, in_camera_id, in_confidence)
                             VALUES (?1, ?2, ?3, ?4, ?5)",
                            params![event.identity_id, day_s, at_s, event.camera_id, confidence],
                        )?;
                        (LedgerAction::Created, "IN logged")
                    }
                    (Transition::SetIn, Some((row_id, _, _))) => {
                        tx.execute(
                            "UPDATE attendance SET first_in = ?1, in_camera_id = ?2, in_confidence = ?3,
                                updated_at = CURRENT_TIMESTAMP
                             WHERE id = ?4",
                            params![at_s, event.camera_id, confidence, row_id],
                        )?;
                        (LedgerAction::Updated, "IN logged")
                    }
                    (Transition::SetOut, Some((row_id, _, _))) => {
                        tx.execute(
                            "UPDATE attendance SET last_out = ?1, out_camera_id = ?2, out_confidence = ?3,
                                updated_at = CURRENT_TIMESTAMP
                             WHERE id = ?4",
                            params![at_s, event.camera_id, confidence, row_id],
                        )?;
                        (LedgerAction::Updated, "OUT updated")
                    }
                    (Transition::Skip(reason), _) => (LedgerAction::Skipped, reason),
                    // SetIn/SetOut are only chosen when a row exists.
                    (Transition::SetIn | Transition::SetOut, None) => (LedgerAction::Skipped, "no row to update"),
                };
                tx.commit()?;
                Ok(action)
            })
            .await;

        match result {
            Ok((action, message)) => {
                match action {
                    LedgerAction::Skipped => {
                        tracing::debug!(identity = %identity, %kind, %day, reason = message, "attendance unchanged")
                    }
                    _ => tracing::info!(identity = %identity, %kind, %day, time = %at, ?action, "attendance logged"),
                }
                LedgerOutcome::ok(action, message)
            }
            Err(e) => {
                tracing::error!(identity = %identity, %kind, %day, error = %e, "attendance write failed");
                LedgerOutcome::failed(e.to_string())
            }
        }
    }

    /// The identity's row for `day`, if any.
    pub async fn record_for(&self, identity_id: &str, day: NaiveDate) -> Result<Option<AttendanceRecord>, StoreError> {
        let id = identity_id.to_string();
        let record = self
            .store
            .conn()
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT identity_id, day, first_in, in_camera_id, in_confidence,
                                last_out, out_camera_id, out_confidence
                         FROM attendance WHERE identity_id = ?1 AND day = ?2",
                        params![id, day.format(DAY_FORMAT).to_string()],
                        |row| {
                            Ok(AttendanceRecord {
                                identity_id: row.get(0)?,
                                day: parse_day(row.get(1)?)?,
                                first_in: parse_time(row.get(2)?)?,
                                in_camera_id: row.get(3)?,
                                in_confidence: row.get::<_, Option<f64>>(4)?.map(|v| v as f32),
                                last_out: parse_time(row.get(5)?)?,
                                out_camera_id: row.get(6)?,
                                out_confidence: row.get::<_, Option<f64>>(7)?.map(|v| v as f32),
                            })
                        },
                    )
                    .optional()?)
            })
            .await?;
        Ok(record)
    }

    /// Rows between `from` and `to` inclusive, newest day first, then by name.
    pub async fn summary(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        limit: usize,
    ) -> Result<Vec<AttendanceSummaryRow>, StoreError> {
        let (from_s, to_s) = (from.format(DAY_FORMAT).to_string(), to.format(DAY_FORMAT).to_string());
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self
            .store
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT a.identity_id, i.name, i.department, a.day, a.first_in, a.last_out
                     FROM attendance a JOIN identities i ON i.id = a.identity_id
                     WHERE a.day BETWEEN ?1 AND ?2
                     ORDER BY a.day DESC, i.name ASC
                     LIMIT ?3",
                )?;
                let rows = stmt.query_map(params![from_s, to_s, limit], |row| {
                    let first_in = parse_time(row.get(4)?)?;
                    let last_out = parse_time(row.get(5)?)?;
                    Ok(AttendanceSummaryRow {
                        identity_id: row.get(0)?,
                        name: row.get(1)?,
                        department: row.get(2)?,
                        day: parse_day(row.get(3)?)?,
                        first_in,
                        last_out,
                        duration: first_in.zip(last_out).and_then(|(i, o)| format_duration(i, o)),
                    })
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?;
        Ok(rows)
    }

    /// Retention: delete rows older than `days_to_keep` days before `today`.
    pub async fn cleanup_before(&self, today: NaiveDate, days_to_keep: u32) -> Result<usize, StoreError> {
        let cutoff = today - chrono::Duration::days(i64::from(days_to_keep));
        let cutoff_s = cutoff.format(DAY_FORMAT).to_string();
        let deleted = self
            .store
            .conn()
            .call(move |conn| Ok(conn.execute("DELETE FROM attendance WHERE day < ?1", params![cutoff_s])?))
            .await?;
        if deleted > 0 {
            tracing::info!(deleted, %cutoff, "old attendance rows removed");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ist() -> FixedOffset {
        parse_utc_offset("+05:30").unwrap()
    }

    async fn ledger(policy: OutBeforeIn) -> Ledger {
        let store = Store::open_in_memory().await.unwrap();
        for (id, name) in [("E001", "Asha"), ("E002", "Ravi")] {
            store.upsert_identity(id, name, "Ops", "").await.unwrap();
        }
        Ledger::new(store, ist(), policy)
    }

    /// UTC instant for an IST wall-clock time on 2026-03-02.
    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        ist().with_ymd_and_hms(2026, 3, 2, h, m, s).unwrap().with_timezone(&Utc)
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    fn t(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    fn event(id: &str, kind: EventKind, camera: &str, ts: DateTime<Utc>) -> AttendanceEvent {
        AttendanceEvent {
            identity_id: id.to_string(),
            kind,
            camera_id: camera.to_string(),
            confidence: 0.8,
            timestamp: ts,
        }
    }

    #[test]
    fn test_parse_utc_offset() {
        assert_eq!(parse_utc_offset("+05:30").unwrap().local_minus_utc(), 19800);
        assert_eq!(parse_utc_offset("-08:00").unwrap().local_minus_utc(), -28800);
        assert_eq!(parse_utc_offset("Z").unwrap().local_minus_utc(), 0);
        assert_eq!(parse_utc_offset("+3").unwrap().local_minus_utc(), 10800);
        assert!(parse_utc_offset("05:30").is_none());
        assert!(parse_utc_offset("+25:00").is_none());
    }

    #[test]
    fn test_transition_table() {
        let p = OutBeforeIn::TreatAsIn;
        let none = None;
        let with_in = Some(DayState { first_in: Some(t(9, 0, 0)), last_out: None });
        let with_out = Some(DayState { first_in: Some(t(9, 0, 0)), last_out: Some(t(17, 0, 0)) });
        let empty_row = Some(DayState { first_in: None, last_out: None });

        assert_eq!(transition(none, EventKind::In, t(9, 0, 0), p), Transition::InsertIn);
        assert_eq!(transition(none, EventKind::Out, t(9, 0, 0), p), Transition::InsertIn);
        assert!(matches!(transition(none, EventKind::Out, t(9, 0, 0), OutBeforeIn::Ignore), Transition::Skip(_)));
        assert!(matches!(transition(with_in, EventKind::In, t(10, 0, 0), p), Transition::Skip(_)));
        assert_eq!(transition(with_in, EventKind::Out, t(12, 0, 0), p), Transition::SetOut);
        assert_eq!(transition(with_out, EventKind::Out, t(18, 0, 0), p), Transition::SetOut);
        assert!(matches!(transition(with_out, EventKind::Out, t(16, 0, 0), p), Transition::Skip(_)));
        assert!(matches!(transition(with_in, EventKind::Out, t(8, 0, 0), p), Transition::Skip(_)));
        assert_eq!(transition(empty_row, EventKind::Out, t(9, 0, 0), p), Transition::SetIn);
        assert_eq!(transition(empty_row, EventKind::In, t(9, 0, 0), p), Transition::SetIn);
    }

    #[tokio::test]
    async fn test_repeated_in_creates_once_then_skips() {
        let ledger = ledger(OutBeforeIn::TreatAsIn).await;
        let first = ledger.record_event(event("E001", EventKind::In, "entry_camera", at(9, 1, 0))).await;
        assert!(first.success);
        assert_eq!(first.action, Some(LedgerAction::Created));

        for minute in 2..6 {
            let again = ledger.record_event(event("E001", EventKind::In, "entry_camera", at(9, minute, 0))).await;
            assert!(again.success);
            assert_eq!(again.action, Some(LedgerAction::Skipped));
        }

        let record = ledger.record_for("E001", day()).await.unwrap().unwrap();
        assert_eq!(record.first_in, Some(t(9, 1, 0)));
        assert_eq!(record.in_camera_id.as_deref(), Some("entry_camera"));
        assert!(record.last_out.is_none());
    }

    #[tokio::test]
    async fn test_out_first_is_treated_as_arrival() {
        let ledger = ledger(OutBeforeIn::TreatAsIn).await;
        let outcome = ledger.record_event(event("E001", EventKind::Out, "exit_camera", at(8, 45, 10))).await;
        assert_eq!(outcome.action, Some(LedgerAction::Created));

        let record = ledger.record_for("E001", day()).await.unwrap().unwrap();
        assert_eq!(record.first_in, Some(t(8, 45, 10)));
        assert_eq!(record.in_camera_id.as_deref(), Some("exit_camera"));
        assert!(record.last_out.is_none());
    }

    #[tokio::test]
    async fn test_out_first_ignored_by_policy() {
        let ledger = ledger(OutBeforeIn::Ignore).await;
        let outcome = ledger.record_event(event("E001", EventKind::Out, "exit_camera", at(8, 45, 0))).await;
        assert!(outcome.success);
        assert_eq!(outcome.action, Some(LedgerAction::Skipped));
        assert!(ledger.record_for("E001", day()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_out_replaced_by_later_out_only() {
        let ledger = ledger(OutBeforeIn::TreatAsIn).await;
        ledger.record_event(event("E001", EventKind::In, "entry_camera", at(9, 0, 0))).await;
        let o1 = ledger.record_event(event("E001", EventKind::Out, "exit_camera", at(13, 0, 0))).await;
        assert_eq!(o1.action, Some(LedgerAction::Updated));
        let o2 = ledger.record_event(event("E001", EventKind::Out, "exit_camera", at(18, 30, 0))).await;
        assert_eq!(o2.action, Some(LedgerAction::Updated));
        let stale = ledger.record_event(event("E001", EventKind::Out, "exit_camera", at(17, 0, 0))).await;
        assert_eq!(stale.action, Some(LedgerAction::Skipped));

        let record = ledger.record_for("E001", day()).await.unwrap().unwrap();
        assert_eq!(record.first_in, Some(t(9, 0, 0)));
        assert_eq!(record.last_out, Some(t(18, 30, 0)));
    }

    #[tokio::test]
    async fn test_in_never_after_out_for_any_ordering() {
        let times = [at(9, 0, 0), at(12, 0, 0), at(17, 0, 0)];
        let orders: [[(EventKind, usize); 3]; 4] = [
            [(EventKind::In, 0), (EventKind::Out, 1), (EventKind::Out, 2)],
            [(EventKind::Out, 2), (EventKind::In, 0), (EventKind::Out, 1)],
            [(EventKind::Out, 1), (EventKind::Out, 0), (EventKind::In, 2)],
            [(EventKind::In, 2), (EventKind::Out, 0), (EventKind::Out, 1)],
        ];
        for order in orders {
            let ledger = ledger(OutBeforeIn::TreatAsIn).await;
            for (kind, i) in order {
                let camera = if kind == EventKind::In { "entry_camera" } else { "exit_camera" };
                assert!(ledger.record_event(event("E002", kind, camera, times[i])).await.success);
            }
            let record = ledger.record_for("E002", day()).await.unwrap().unwrap();
            let first_in = record.first_in.expect("first IN always set");
            if let Some(last_out) = record.last_out {
                assert!(first_in <= last_out, "{order:?}: {first_in} > {last_out}");
            }
        }
    }

    #[tokio::test]
    async fn test_concurrent_writers_produce_one_row() {
        let ledger = ledger(OutBeforeIn::TreatAsIn).await;
        let writes = (0..16).map(|i| {
            let ledger = ledger.clone();
            let kind = if i % 2 == 0 { EventKind::In } else { EventKind::Out };
            async move { ledger.record_event(event("E001", kind, "cam", at(9, 0, i))).await }
        });
        let outcomes = futures::future::join_all(writes).await;
        assert!(outcomes.iter().all(|o| o.success));
        let created = outcomes.iter().filter(|o| o.action == Some(LedgerAction::Created)).count();
        assert_eq!(created, 1);

        let rows = ledger.summary(day(), day(), 100).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_day_boundary_uses_reporting_zone() {
        let ledger = ledger(OutBeforeIn::TreatAsIn).await;
        // 20:00 UTC on Mar 1 is 01:30 IST on Mar 2.
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 20, 0, 0).unwrap();
        assert_eq!(ledger.local_day_and_time(ts), (day(), t(1, 30, 0)));
        ledger.record_event(event("E001", EventKind::In, "entry_camera", ts)).await;
        assert!(ledger.record_for("E001", day()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unknown_identity_is_structured_failure() {
        let ledger = ledger(OutBeforeIn::TreatAsIn).await;
        let outcome = ledger.record_event(event("ghost", EventKind::In, "entry_camera", at(9, 0, 0))).await;
        assert!(!outcome.success);
        assert!(outcome.action.is_none());
        assert!(!outcome.message.is_empty());
    }

    #[tokio::test]
    async fn test_summary_and_cleanup() {
        let ledger = ledger(OutBeforeIn::TreatAsIn).await;
        ledger.record_event(event("E001", EventKind::In, "entry_camera", at(9, 0, 0))).await;
        ledger.record_event(event("E001", EventKind::Out, "exit_camera", at(17, 45, 0))).await;
        ledger.record_event(event("E002", EventKind::In, "entry_camera", at(10, 0, 0))).await;
        let old = ist().with_ymd_and_hms(2025, 1, 10, 9, 0, 0).unwrap().with_timezone(&Utc);
        ledger.record_event(event("E002", EventKind::In, "entry_camera", old)).await;

        let rows = ledger.summary(day(), day(), 100).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, "Asha");
        assert_eq!(rows[0].duration.as_deref(), Some("8h 45m"));
        assert_eq!(rows[1].name, "Ravi");
        assert!(rows[1].duration.is_none());

        let deleted = ledger.cleanup_before(day(), 365).await.unwrap();
        assert_eq!(deleted, 1);
        let all = ledger
            .summary(NaiveDate::from_ymd_opt(2000, 1, 1).unwrap(), day(), 100)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }
}
