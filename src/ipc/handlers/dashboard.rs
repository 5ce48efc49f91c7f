//! `dashboard.get`: one read-only summary per primary role.

use rusqlite::{params_from_iter, OptionalExtension};
use serde_json::{json, Value};

use crate::auth::Role;
use crate::error::AppResult;
use crate::ipc::guard::{self, Access, Ctx, Handler};
use crate::ipc::helpers::today;
use crate::ipc::types::{AppState, Request};
use crate::prefect_ids;
use crate::store::{self, ListQuery, ProfileDirectory, Row, TableDef};
use crate::tables::{COMPLAINTS, DUTIES, EVALUATIONS, EVENTS, INCIDENTS, WEEKLY_REPORTS};

const RECENT: usize = 5;

/// Statuses that take a dated row out of "upcoming".
const FINISHED: &[&str] = &["cancelled", "completed"];

fn count(ctx: &Ctx<'_>, sql: &str, args: &[&str]) -> AppResult<i64> {
    Ok(ctx
        .conn
        .query_row(sql, params_from_iter(args.iter()), |r| r.get(0))?)
}

fn str_of<'a>(row: &'a Row, key: &str) -> &'a str {
    row.get(key).and_then(|v| v.as_str()).unwrap_or("")
}

fn is_upcoming(row: &Row, date_key: &str, today: &str) -> bool {
    str_of(row, date_key) >= today && !FINISHED.contains(&str_of(row, "status"))
}

fn recent(
    ctx: &Ctx<'_>,
    def: &TableDef,
    names: &[(&str, &str)],
    scope: impl Fn(&Row) -> bool,
) -> AppResult<Vec<Row>> {
    let query = ListQuery {
        limit: RECENT,
        ..ListQuery::default()
    };
    let dir = ProfileDirectory::load(ctx.conn)?;
    Ok(store::list(ctx.conn, def, &query, scope)?
        .into_iter()
        .map(|mut row| {
            dir.annotate(&mut row, names);
            row
        })
        .collect())
}

fn upcoming_events_count(ctx: &Ctx<'_>, today: &str) -> AppResult<i64> {
    count(
        ctx,
        "SELECT COUNT(*) FROM events
         WHERE event_date >= ? AND status NOT IN ('cancelled', 'completed')",
        &[today],
    )
}

fn upcoming_events(ctx: &Ctx<'_>, today: &str) -> AppResult<Vec<Row>> {
    recent(ctx, &EVENTS, &[], |row| is_upcoming(row, "eventDate", today))
}

fn admin_view(ctx: &Ctx<'_>, today: &str) -> AppResult<Value> {
    let cards = json!({
        "totalUsers": count(ctx, "SELECT COUNT(*) FROM profiles", &[])?,
        "totalPrefects": count(ctx, "SELECT COUNT(*) FROM user_roles WHERE role = 'prefect'", &[])?,
        "activeDuties": count(ctx, "SELECT COUNT(*) FROM duty_assignments WHERE status = 'assigned'", &[])?,
        "pendingComplaints": count(ctx, "SELECT COUNT(*) FROM complaints WHERE status = 'pending'", &[])?,
        "openIncidents": count(
            ctx,
            "SELECT COUNT(*) FROM incident_reports WHERE status IN ('open', 'investigating')",
            &[],
        )?,
        "pendingApplications": count(
            ctx,
            "SELECT COUNT(*) FROM prefect_applications WHERE status = 'pending'",
            &[],
        )?,
        "upcomingEvents": upcoming_events_count(ctx, today)?,
    });
    let recent = json!({
        "incidents": recent(ctx, &INCIDENTS, &[("reportedBy", "reportedByName")], |_| true)?,
        "complaints": recent(ctx, &COMPLAINTS, &[("submittedBy", "submittedByName")], |_| true)?,
    });
    Ok(json!({ "view": "admin", "cards": cards, "recent": recent }))
}

fn faculty_view(ctx: &Ctx<'_>, today: &str) -> AppResult<Value> {
    let cards = json!({
        "dutiesToday": count(ctx, "SELECT COUNT(*) FROM duty_assignments WHERE duty_date = ?", &[today])?,
        "pendingReports": count(ctx, "SELECT COUNT(*) FROM weekly_reports WHERE status = 'submitted'", &[])?,
        "pendingComplaints": count(ctx, "SELECT COUNT(*) FROM complaints WHERE status = 'pending'", &[])?,
        "openIncidents": count(
            ctx,
            "SELECT COUNT(*) FROM incident_reports WHERE status IN ('open', 'investigating')",
            &[],
        )?,
        "upcomingEvents": upcoming_events_count(ctx, today)?,
    });
    let recent = json!({
        "weeklyReports": recent(ctx, &WEEKLY_REPORTS, &[("prefectId", "prefectName")], |_| true)?,
        "evaluations": recent(ctx, &EVALUATIONS, &[("prefectId", "prefectName")], |_| true)?,
    });
    Ok(json!({ "view": "faculty", "cards": cards, "recent": recent }))
}

fn prefect_view(ctx: &Ctx<'_>, today: &str) -> AppResult<Value> {
    let me = ctx.caller.user_id.as_str();

    // prefect_id may hold a JSON list, so membership is decided in Rust.
    let mut stmt = ctx.conn.prepare(
        "SELECT prefect_id FROM duty_assignments
         WHERE duty_date >= ? AND status NOT IN ('cancelled', 'completed')",
    )?;
    let raw_ids = stmt
        .query_map([today], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    let my_upcoming = raw_ids
        .iter()
        .filter(|raw| prefect_ids::contains(raw, me))
        .count();

    let average: Option<f64> = ctx.conn.query_row(
        "SELECT AVG(overall_score) FROM performance_evaluations
         WHERE prefect_id = ? AND overall_score IS NOT NULL",
        [me],
        |r| r.get(0),
    )?;

    let cards = json!({
        "myUpcomingDuties": my_upcoming,
        "myGateLogs": count(ctx, "SELECT COUNT(*) FROM gate_assistance_logs WHERE prefect_id = ?", &[me])?,
        "myAverageScore": average.map(|a| (a * 100.0).round() / 100.0),
        "myReports": count(ctx, "SELECT COUNT(*) FROM weekly_reports WHERE prefect_id = ?", &[me])?,
    });

    let all = ListQuery {
        limit: usize::MAX,
        ..ListQuery::default()
    };
    let mut next_duties = store::list(ctx.conn, &DUTIES, &all, |row| {
        is_upcoming(row, "dutyDate", today)
            && row
                .get("prefectIds")
                .and_then(|v| v.as_array())
                .map(|ids| ids.iter().any(|id| id.as_str() == Some(me)))
                .unwrap_or(false)
    })?;
    next_duties.sort_by(|a, b| {
        (str_of(a, "dutyDate"), str_of(a, "startTime"))
            .cmp(&(str_of(b, "dutyDate"), str_of(b, "startTime")))
    });
    next_duties.truncate(RECENT);

    let recent = json!({
        "events": upcoming_events(ctx, today)?,
        "duties": next_duties,
    });
    Ok(json!({ "view": "prefect", "cards": cards, "recent": recent }))
}

fn student_view(ctx: &Ctx<'_>, today: &str) -> AppResult<Value> {
    let me = ctx.caller.user_id.as_str();
    let application: Option<String> = ctx
        .conn
        .query_row(
            "SELECT status FROM prefect_applications
             WHERE applicant_id = ? ORDER BY created_at DESC LIMIT 1",
            [me],
            |r| r.get(0),
        )
        .optional()?;

    let cards = json!({
        "myComplaints": count(ctx, "SELECT COUNT(*) FROM complaints WHERE submitted_by = ?", &[me])?,
        "myOpenComplaints": count(
            ctx,
            "SELECT COUNT(*) FROM complaints
             WHERE submitted_by = ? AND status IN ('pending', 'in_review')",
            &[me],
        )?,
        "applicationStatus": application,
        "upcomingEvents": upcoming_events_count(ctx, today)?,
    });
    let recent = json!({ "events": upcoming_events(ctx, today)? });
    Ok(json!({ "view": "student", "cards": cards, "recent": recent }))
}

fn handle_get(ctx: &Ctx<'_>, _params: &Value) -> AppResult<Value> {
    let today = today();
    match ctx.caller.primary_role() {
        Role::Admin => admin_view(ctx, &today),
        Role::Faculty => faculty_view(ctx, &today),
        Role::Prefect => prefect_view(ctx, &today),
        Role::Student => student_view(ctx, &today),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let (access, handler): (Access, Handler) = match req.method.as_str() {
        "dashboard.get" => (Access::Authenticated, handle_get),
        _ => return None,
    };
    Some(guard::dispatch(state, req, access, handler))
}
