//! Column layouts of the feature tables.

use crate::error::{AppError, AppResult};
use crate::store::{Column, Kind, Row, TableDef};
use serde_json::json;

pub const DUTY_TYPES: &[&str] = &["gate", "hallway", "canteen", "event", "assembly", "other"];
pub const DUTY_STATUSES: &[&str] = &["assigned", "completed", "missed", "cancelled"];
pub const GATE_STATUSES: &[&str] = &["present", "late", "absent", "excused"];
pub const EVENT_CATEGORIES: &[&str] = &["academic", "sports", "cultural", "community", "other"];
pub const EVENT_STATUSES: &[&str] = &["upcoming", "ongoing", "completed", "cancelled"];
pub const COMPLAINT_CATEGORIES: &[&str] = &["behavior", "facility", "academic", "safety", "other"];
pub const COMPLAINT_STATUSES: &[&str] = &["pending", "in_review", "resolved", "dismissed"];
pub const SEVERITIES: &[&str] = &["low", "medium", "high", "critical"];
pub const INCIDENT_STATUSES: &[&str] = &["open", "investigating", "resolved", "closed"];
pub const APPLICATION_STATUSES: &[&str] = &["pending", "approved", "rejected"];
pub const REPORT_STATUSES: &[&str] = &["draft", "submitted", "reviewed"];
pub const TRAINING_CATEGORIES: &[&str] =
    &["orientation", "leadership", "safety", "procedures", "other"];

pub static PROFILES: TableDef = TableDef {
    table: "profiles",
    entity: "profile",
    columns: &[
        Column::new("full_name", "fullName", Kind::Text).required(),
        Column::new("email", "email", Kind::Email).read_only(),
        Column::new("student_number", "studentNumber", Kind::Text),
        Column::new("grade_level", "gradeLevel", Kind::Text),
        Column::new("section", "section", Kind::Text),
        Column::new("phone", "phone", Kind::Text),
    ],
    search: &["fullName", "email", "studentNumber", "section"],
    filters: &["gradeLevel", "section"],
    order_by: "full_name",
    stats_by: &["gradeLevel"],
    check: None,
    derive: None,
};

pub static ACADEMIC_YEARS: TableDef = TableDef {
    table: "academic_years",
    entity: "academic year",
    columns: &[
        Column::new("name", "name", Kind::Text).required(),
        Column::new("start_date", "startDate", Kind::Date).required(),
        Column::new("end_date", "endDate", Kind::Date).required(),
        Column::new("is_current", "isCurrent", Kind::Bool).read_only(),
    ],
    search: &["name"],
    filters: &["isCurrent"],
    order_by: "start_date DESC",
    stats_by: &["isCurrent"],
    check: Some(check_date_range),
    derive: None,
};

pub static DUTIES: TableDef = TableDef {
    table: "duty_assignments",
    entity: "duty",
    columns: &[
        Column::new("prefect_id", "prefectIds", Kind::PrefectList).required(),
        Column::new("title", "title", Kind::Text).required(),
        Column::new("duty_type", "dutyType", Kind::Choice(DUTY_TYPES)).required(),
        Column::new("location", "location", Kind::Text),
        Column::new("duty_date", "dutyDate", Kind::Date).required(),
        Column::new("start_time", "startTime", Kind::Time),
        Column::new("end_time", "endTime", Kind::Time),
        Column::new("status", "status", Kind::Choice(DUTY_STATUSES)).default_to("assigned"),
        Column::new("notes", "notes", Kind::Text),
        Column::new("assigned_by", "assignedBy", Kind::Ref("profiles")),
    ],
    search: &["title", "location", "notes"],
    filters: &["status", "dutyType", "dutyDate", "prefectIds"],
    order_by: "duty_date DESC, start_time",
    stats_by: &["status", "dutyType"],
    check: Some(check_duty_times),
    derive: None,
};

pub static GATE_LOGS: TableDef = TableDef {
    table: "gate_assistance_logs",
    entity: "gate log",
    columns: &[
        Column::new("prefect_id", "prefectId", Kind::Ref("profiles")).required(),
        Column::new("duty_id", "dutyId", Kind::Ref("duty_assignments")),
        Column::new("gate", "gate", Kind::Text).required(),
        Column::new("log_date", "logDate", Kind::Date).required(),
        Column::new("time_in", "timeIn", Kind::Time),
        Column::new("time_out", "timeOut", Kind::Time),
        Column::new("status", "status", Kind::Choice(GATE_STATUSES)).required(),
        Column::new("notes", "notes", Kind::Text),
        Column::new("recorded_by", "recordedBy", Kind::Ref("profiles")),
    ],
    search: &["gate", "notes"],
    filters: &["status", "logDate", "prefectId", "dutyId"],
    order_by: "log_date DESC, time_in DESC",
    stats_by: &["status"],
    check: Some(check_gate_times),
    derive: None,
};

pub static EVENTS: TableDef = TableDef {
    table: "events",
    entity: "event",
    columns: &[
        Column::new("title", "title", Kind::Text).required(),
        Column::new("description", "description", Kind::Text),
        Column::new("event_date", "eventDate", Kind::Date).required(),
        Column::new("location", "location", Kind::Text),
        Column::new("category", "category", Kind::Choice(EVENT_CATEGORIES)).default_to("other"),
        Column::new("status", "status", Kind::Choice(EVENT_STATUSES)).default_to("upcoming"),
        Column::new("created_by", "createdBy", Kind::Ref("profiles")),
    ],
    search: &["title", "description", "location"],
    filters: &["status", "category", "eventDate"],
    order_by: "event_date, created_at",
    stats_by: &["status", "category"],
    check: None,
    derive: None,
};

pub static COMPLAINTS: TableDef = TableDef {
    table: "complaints",
    entity: "complaint",
    columns: &[
        Column::new("title", "title", Kind::Text).required(),
        Column::new("description", "description", Kind::Text).required(),
        Column::new("category", "category", Kind::Choice(COMPLAINT_CATEGORIES))
            .default_to("other"),
        Column::new("status", "status", Kind::Choice(COMPLAINT_STATUSES)).default_to("pending"),
        Column::new("submitted_by", "submittedBy", Kind::Ref("profiles")),
        Column::new("assigned_to", "assignedTo", Kind::Ref("profiles")),
        Column::new("resolution", "resolution", Kind::Text),
    ],
    search: &["title", "description", "resolution"],
    filters: &["status", "category", "submittedBy", "assignedTo"],
    order_by: "created_at DESC",
    stats_by: &["status", "category"],
    check: None,
    derive: None,
};

pub static INCIDENTS: TableDef = TableDef {
    table: "incident_reports",
    entity: "incident report",
    columns: &[
        Column::new("title", "title", Kind::Text).required(),
        Column::new("description", "description", Kind::Text).required(),
        Column::new("location", "location", Kind::Text),
        Column::new("incident_date", "incidentDate", Kind::Date).required(),
        Column::new("severity", "severity", Kind::Choice(SEVERITIES)).default_to("low"),
        Column::new("status", "status", Kind::Choice(INCIDENT_STATUSES)).default_to("open"),
        Column::new("reported_by", "reportedBy", Kind::Ref("profiles")),
        Column::new("students_involved", "studentsInvolved", Kind::Text),
        Column::new("action_taken", "actionTaken", Kind::Text),
    ],
    search: &["title", "description", "location", "studentsInvolved"],
    filters: &["status", "severity", "reportedBy"],
    order_by: "incident_date DESC, created_at DESC",
    stats_by: &["status", "severity"],
    check: None,
    derive: None,
};

pub static APPLICATIONS: TableDef = TableDef {
    table: "prefect_applications",
    entity: "application",
    columns: &[
        Column::new("applicant_id", "applicantId", Kind::Ref("profiles")).required(),
        Column::new("academic_year_id", "academicYearId", Kind::Ref("academic_years")),
        Column::new("statement", "statement", Kind::Text).required(),
        Column::new("grade_level", "gradeLevel", Kind::Text),
        Column::new("status", "status", Kind::Choice(APPLICATION_STATUSES)).default_to("pending"),
        Column::new("reviewed_by", "reviewedBy", Kind::Ref("profiles")),
        Column::new("reviewed_at", "reviewedAt", Kind::Text),
        Column::new("review_notes", "reviewNotes", Kind::Text),
    ],
    search: &["statement", "reviewNotes"],
    filters: &["status", "applicantId", "academicYearId"],
    order_by: "created_at DESC",
    stats_by: &["status"],
    check: None,
    derive: None,
};

pub static EVALUATIONS: TableDef = TableDef {
    table: "performance_evaluations",
    entity: "evaluation",
    columns: &[
        Column::new("prefect_id", "prefectId", Kind::Ref("profiles")).required(),
        Column::new("evaluator_id", "evaluatorId", Kind::Ref("profiles")),
        Column::new("academic_year_id", "academicYearId", Kind::Ref("academic_years")),
        Column::new("period", "period", Kind::Text).required(),
        Column::new("punctuality", "punctuality", Kind::Rating).required(),
        Column::new("leadership", "leadership", Kind::Rating).required(),
        Column::new("teamwork", "teamwork", Kind::Rating).required(),
        Column::new("communication", "communication", Kind::Rating).required(),
        Column::new("overall_score", "overallScore", Kind::Score).read_only(),
        Column::new("comments", "comments", Kind::Text),
    ],
    search: &["period", "comments"],
    filters: &["prefectId", "academicYearId", "period"],
    order_by: "created_at DESC",
    stats_by: &["period"],
    check: None,
    derive: Some(derive_overall_score),
};

pub static WEEKLY_REPORTS: TableDef = TableDef {
    table: "weekly_reports",
    entity: "weekly report",
    columns: &[
        Column::new("prefect_id", "prefectId", Kind::Ref("profiles")).required(),
        Column::new("week_start", "weekStart", Kind::Date).required(),
        Column::new("summary", "summary", Kind::Text).required(),
        Column::new("challenges", "challenges", Kind::Text),
        Column::new("plans", "plans", Kind::Text),
        Column::new("status", "status", Kind::Choice(REPORT_STATUSES)).default_to("draft"),
        Column::new("feedback", "feedback", Kind::Text),
        Column::new("reviewed_by", "reviewedBy", Kind::Ref("profiles")),
    ],
    search: &["summary", "challenges", "plans", "feedback"],
    filters: &["status", "prefectId", "weekStart"],
    order_by: "week_start DESC",
    stats_by: &["status"],
    check: None,
    derive: None,
};

pub static TRAINING: TableDef = TableDef {
    table: "training_materials",
    entity: "training material",
    columns: &[
        Column::new("title", "title", Kind::Text).required(),
        Column::new("description", "description", Kind::Text),
        Column::new("category", "category", Kind::Choice(TRAINING_CATEGORIES)).default_to("other"),
        Column::new("content_url", "contentUrl", Kind::Url).required(),
        Column::new("uploaded_by", "uploadedBy", Kind::Ref("profiles")),
    ],
    search: &["title", "description"],
    filters: &["category"],
    order_by: "created_at DESC",
    stats_by: &["category"],
    check: None,
    derive: None,
};

fn text<'a>(row: &'a Row, key: &str) -> Option<&'a str> {
    row.get(key).and_then(|v| v.as_str())
}

fn check_date_range(row: &Row) -> AppResult<()> {
    if let (Some(start), Some(end)) = (text(row, "startDate"), text(row, "endDate")) {
        // Both are normalized YYYY-MM-DD, so text order is date order.
        if end <= start {
            return Err(AppError::validation("endDate", "must be after startDate"));
        }
    }
    Ok(())
}

fn check_duty_times(row: &Row) -> AppResult<()> {
    if let (Some(start), Some(end)) = (text(row, "startTime"), text(row, "endTime")) {
        if end < start {
            return Err(AppError::validation("endTime", "must not be before startTime"));
        }
    }
    Ok(())
}

fn check_gate_times(row: &Row) -> AppResult<()> {
    if let (Some(time_in), Some(time_out)) = (text(row, "timeIn"), text(row, "timeOut")) {
        if time_out < time_in {
            return Err(AppError::validation("timeOut", "must not be before timeIn"));
        }
    }
    Ok(())
}

fn derive_overall_score(row: &mut Row) {
    let ratings: Vec<i64> = ["punctuality", "leadership", "teamwork", "communication"]
        .iter()
        .filter_map(|k| row.get(*k).and_then(|v| v.as_i64()))
        .collect();
    let score = if ratings.is_empty() {
        serde_json::Value::Null
    } else {
        let mean = ratings.iter().sum::<i64>() as f64 / ratings.len() as f64;
        json!((mean * 100.0).round() / 100.0)
    };
    row.insert("overallScore".into(), score);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn obj(v: Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn overall_score_is_rounded_mean() {
        let mut row = obj(json!({
            "punctuality": 5, "leadership": 4, "teamwork": 4, "communication": 4
        }));
        derive_overall_score(&mut row);
        assert_eq!(row["overallScore"], json!(4.25));

        let mut row = obj(json!({
            "punctuality": 5, "leadership": 4, "teamwork": 4, "communication": 5
        }));
        derive_overall_score(&mut row);
        assert_eq!(row["overallScore"], json!(4.5));
    }

    #[test]
    fn date_and_time_ranges() {
        assert!(check_date_range(&obj(json!({
            "startDate": "2026-06-01", "endDate": "2027-03-31"
        })))
        .is_ok());
        assert!(check_date_range(&obj(json!({
            "startDate": "2026-06-01", "endDate": "2026-06-01"
        })))
        .is_err());
        assert!(check_gate_times(&obj(json!({ "timeIn": "07:00", "timeOut": "06:59" }))).is_err());
        assert!(check_gate_times(&obj(json!({ "timeIn": "07:00", "timeOut": null }))).is_ok());
        assert!(check_duty_times(&obj(json!({ "startTime": "07:00", "endTime": "08:00" }))).is_ok());
    }

    #[test]
    fn every_table_has_its_filter_and_search_keys() {
        for def in [
            &PROFILES,
            &ACADEMIC_YEARS,
            &DUTIES,
            &GATE_LOGS,
            &EVENTS,
            &COMPLAINTS,
            &INCIDENTS,
            &APPLICATIONS,
            &EVALUATIONS,
            &WEEKLY_REPORTS,
            &TRAINING,
        ] {
            for key in def.search.iter().chain(def.filters).chain(def.stats_by) {
                assert!(def.column(key).is_some(), "{}.{}", def.table, key);
            }
        }
    }
}
