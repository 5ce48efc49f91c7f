use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    seq: u32,
}

impl Sidecar {
    fn spawn(workspace: &Path) -> Self {
        let exe = env!("CARGO_BIN_EXE_prefectd");
        let mut child = Command::new(exe)
            .env("PREFECTD_WORKSPACE", workspace)
            .env("PREFECTD_PBKDF2_ITERATIONS", "1000")
            .env("PREFECTD_BOOTSTRAP_ADMIN", "head@school.test")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn prefectd");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
            seq: 0,
        }
    }

    fn call(&mut self, method: &str, params: Value, session: Option<&str>) -> Value {
        self.seq += 1;
        let id = self.seq.to_string();
        let mut payload = json!({ "id": id, "method": method, "params": params });
        if let Some(token) = session {
            payload["session"] = json!(token);
        }
        writeln!(self.stdin, "{}", payload).expect("write request");
        self.stdin.flush().expect("flush request");

        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read response line");
        let value: Value = serde_json::from_str(line.trim()).expect("parse response json");
        assert_eq!(value["id"], json!(id));
        value
    }

    fn ok(&mut self, method: &str, params: Value, session: &str) -> Value {
        let resp = self.call(method, params, Some(session));
        assert_eq!(resp["ok"], true, "{} failed: {}", method, resp);
        resp["result"].clone()
    }

    /// Returns `(session token, user id)`.
    fn sign_up(&mut self, email: &str, full_name: &str) -> (String, String) {
        let resp = self.call(
            "auth.signUp",
            json!({ "email": email, "password": "password1", "fullName": full_name }),
            None,
        );
        assert_eq!(resp["ok"], true, "sign up failed: {}", resp);
        (
            resp["result"]["session"]["token"].as_str().unwrap().to_string(),
            resp["result"]["user"]["id"].as_str().unwrap().to_string(),
        )
    }

    fn finish(self) {
        let Sidecar {
            mut child, stdin, ..
        } = self;
        drop(stdin);
        let _ = child.wait();
    }
}

fn error_code(v: &Value) -> &str {
    v.pointer("/error/code").and_then(|c| c.as_str()).unwrap_or("")
}

#[test]
fn calls_without_a_valid_session_redirect_to_sign_in() {
    let workspace = temp_dir("prefect-gate-unauth");
    let mut sc = Sidecar::spawn(&workspace);

    for session in [None, Some("not-a-token")] {
        let resp = sc.call("events.list", json!({}), session);
        assert_eq!(resp["ok"], false);
        assert_eq!(error_code(&resp), "unauthenticated");
        assert_eq!(resp["error"]["details"]["redirect"], "/auth");
    }

    let health = sc.call("health", json!({}), None);
    assert_eq!(health["ok"], true);

    sc.finish();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn under_privileged_calls_redirect_to_dashboard() {
    let workspace = temp_dir("prefect-gate-forbidden");
    let mut sc = Sidecar::spawn(&workspace);
    let (admin, _) = sc.sign_up("head@school.test", "Head Teacher");
    let (student, student_id) = sc.sign_up("sam@school.test", "Sam Student");

    let attempts = [
        ("users.list", json!({})),
        ("roles.assign", json!({ "userId": student_id, "role": "admin" })),
        (
            "academicYears.create",
            json!({ "values": { "name": "2026-2027", "startDate": "2026-06-01", "endDate": "2027-03-31" } }),
        ),
        ("duties.list", json!({})),
        ("events.create", json!({ "values": { "title": "Assembly", "eventDate": "2030-01-01" } })),
        ("backup.export", json!({ "outPath": workspace.join("b.zip").to_string_lossy() })),
    ];
    for (method, params) in attempts {
        let resp = sc.call(method, params, Some(student.as_str()));
        assert_eq!(error_code(&resp), "forbidden", "{} should be forbidden: {}", method, resp);
        assert_eq!(resp["error"]["details"]["redirect"], "/dashboard");
    }

    // Nothing was granted by the rejected call.
    let roles = sc.ok("roles.list", json!({ "userId": student_id }), &admin);
    assert_eq!(roles["total"], 1);
    assert_eq!(roles["rows"][0]["role"], "student");

    sc.finish();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn sign_in_sign_out_and_password_change() {
    let workspace = temp_dir("prefect-gate-session");
    let mut sc = Sidecar::spawn(&workspace);
    let (first, _) = sc.sign_up("pat@school.test", "Pat");

    let dup = sc.call(
        "auth.signUp",
        json!({ "email": "PAT@school.test", "password": "password1", "fullName": "Pat Again" }),
        None,
    );
    assert_eq!(error_code(&dup), "conflict");

    let short = sc.call(
        "auth.signUp",
        json!({ "email": "short@school.test", "password": "abc", "fullName": "Short" }),
        None,
    );
    assert_eq!(error_code(&short), "validation_failed");
    assert_eq!(short["error"]["details"]["field"], "password");

    let wrong = sc.call(
        "auth.signIn",
        json!({ "email": "pat@school.test", "password": "wrong-password" }),
        None,
    );
    assert_eq!(error_code(&wrong), "invalid_credentials");

    let signed_in = sc.call(
        "auth.signIn",
        json!({ "email": "pat@school.test", "password": "password1" }),
        None,
    );
    assert_eq!(signed_in["ok"], true);
    let second = signed_in["result"]["session"]["token"].as_str().unwrap().to_string();
    assert_eq!(signed_in["result"]["user"]["primaryRole"], "student");

    sc.ok(
        "auth.changePassword",
        json!({ "currentPassword": "password1", "newPassword": "password2" }),
        &second,
    );
    let stale = sc.call("auth.session", json!({}), Some(first.as_str()));
    assert_eq!(error_code(&stale), "unauthenticated");

    sc.ok("auth.signOut", json!({}), &second);
    let gone = sc.call("auth.session", json!({}), Some(second.as_str()));
    assert_eq!(error_code(&gone), "unauthenticated");

    let again = sc.call(
        "auth.signIn",
        json!({ "email": "pat@school.test", "password": "password2" }),
        None,
    );
    assert_eq!(again["ok"], true);

    sc.finish();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn role_changes_apply_to_the_next_request() {
    let workspace = temp_dir("prefect-gate-roles");
    let mut sc = Sidecar::spawn(&workspace);
    let (admin, admin_id) = sc.sign_up("head@school.test", "Head Teacher");
    let (fran, fran_id) = sc.sign_up("fran@school.test", "Fran Faculty");

    assert_eq!(error_code(&sc.call("duties.list", json!({}), Some(fran.as_str()))), "forbidden");
    let assigned = sc.ok("roles.assign", json!({ "userId": fran_id, "role": "faculty" }), &admin);
    assert_eq!(assigned["added"], true);
    sc.ok("duties.list", json!({}), &fran);

    let session = sc.ok("auth.session", json!({}), &fran);
    assert_eq!(session["user"]["primaryRole"], "faculty");

    let bad_role = sc.call(
        "roles.assign",
        json!({ "userId": fran_id, "role": "janitor" }),
        Some(admin.as_str()),
    );
    assert_eq!(error_code(&bad_role), "validation_failed");

    let last_admin = sc.call(
        "roles.remove",
        json!({ "userId": admin_id, "role": "admin" }),
        Some(admin.as_str()),
    );
    assert_eq!(error_code(&last_admin), "conflict");

    let faculty = sc.ok("users.list", json!({ "role": "faculty" }), &admin);
    assert_eq!(faculty["total"], 1);
    assert_eq!(faculty["rows"][0]["fullName"], "Fran Faculty");

    sc.ok("roles.remove", json!({ "userId": fran_id, "role": "faculty" }), &admin);
    assert_eq!(error_code(&sc.call("duties.list", json!({}), Some(fran.as_str()))), "forbidden");

    sc.finish();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn last_admin_cannot_lose_the_role() {
    let workspace = temp_dir("prefect-gate-last-admin");
    let mut sc = Sidecar::spawn(&workspace);
    let (head, head_id) = sc.sign_up("head@school.test", "Head Teacher");
    let (deputy, deputy_id) = sc.sign_up("deputy@school.test", "Deputy Head");
    sc.ok("roles.assign", json!({ "userId": deputy_id, "role": "admin" }), &head);

    let removed = sc.ok(
        "roles.remove",
        json!({ "userId": head_id, "role": "admin" }),
        &deputy,
    );
    assert!(!removed["roles"].as_array().unwrap().contains(&json!("admin")));
    assert_eq!(error_code(&sc.call("users.list", json!({}), Some(head.as_str()))), "forbidden");

    let last = sc.call(
        "roles.remove",
        json!({ "userId": deputy_id, "role": "admin" }),
        Some(deputy.as_str()),
    );
    assert_eq!(error_code(&last), "conflict");
    let session = sc.ok("auth.session", json!({}), &deputy);
    assert_eq!(session["user"]["primaryRole"], "admin");

    sc.finish();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn profile_edits_are_limited_to_self_unless_admin() {
    let workspace = temp_dir("prefect-gate-profile-edit");
    let mut sc = Sidecar::spawn(&workspace);
    let (admin, _) = sc.sign_up("head@school.test", "Head Teacher");
    let (sam, sam_id) = sc.sign_up("sam@school.test", "Sam Student");
    let (_, tia_id) = sc.sign_up("tia@school.test", "Tia Student");

    let other = sc.call(
        "profiles.update",
        json!({ "id": tia_id, "patch": { "fullName": "Renamed" } }),
        Some(sam.as_str()),
    );
    assert_eq!(error_code(&other), "forbidden");
    assert_eq!(other["error"]["details"]["redirect"], "/dashboard");
    let tia = sc.ok("profiles.get", json!({ "id": tia_id }), &admin);
    assert_eq!(tia["row"]["fullName"], "Tia Student");

    let own = sc.ok(
        "profiles.update",
        json!({ "id": sam_id, "patch": { "gradeLevel": "11" } }),
        &sam,
    );
    assert_eq!(own["row"]["gradeLevel"], "11");
    let by_admin = sc.ok(
        "profiles.update",
        json!({ "id": tia_id, "patch": { "section": "B" } }),
        &admin,
    );
    assert_eq!(by_admin["row"]["section"], "B");

    sc.finish();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn deleting_an_account_removes_everything_or_nothing() {
    let workspace = temp_dir("prefect-gate-profile-delete");
    let mut sc = Sidecar::spawn(&workspace);
    let (admin, admin_id) = sc.sign_up("head@school.test", "Head Teacher");
    let (_, p1_id) = sc.sign_up("one@school.test", "P One");
    let (p2, p2_id) = sc.sign_up("two@school.test", "P Two");
    let (p3, p3_id) = sc.sign_up("three@school.test", "P Three");
    let (sam, sam_id) = sc.sign_up("sam@school.test", "Sam Student");
    for id in [&p1_id, &p2_id, &p3_id] {
        sc.ok("roles.assign", json!({ "userId": id, "role": "prefect" }), &admin);
    }

    // Listed on a duty: the id list has no foreign key behind it.
    let duty = sc.ok(
        "duties.create",
        json!({ "values": {
            "prefectIds": [p1_id, p2_id],
            "title": "Gate A", "dutyType": "gate", "dutyDate": "2030-05-01"
        } }),
        &admin,
    );
    let duty_id = duty["row"]["id"].as_str().unwrap().to_string();
    let listed = sc.call("profiles.delete", json!({ "id": p2_id }), Some(admin.as_str()));
    assert_eq!(error_code(&listed), "conflict");
    let kept = sc.ok("duties.get", json!({ "id": duty_id }), &admin);
    assert_eq!(kept["row"]["prefectNames"], json!(["P One", "P Two"]));
    sc.ok("profiles.me", json!({}), &p2);
    sc.ok(
        "duties.update",
        json!({ "id": duty_id, "patch": { "prefectIds": [p1_id, p2_id] } }),
        &admin,
    );

    // Referenced through a foreign key.
    sc.ok(
        "incidents.create",
        json!({ "values": {
            "title": "Fight", "description": "Car park", "incidentDate": "2030-05-01"
        } }),
        &p3,
    );
    let reporter = sc.call("profiles.delete", json!({ "id": p3_id }), Some(admin.as_str()));
    assert_eq!(error_code(&reporter), "conflict");
    sc.ok("profiles.me", json!({}), &p3);

    let own = sc.call("profiles.delete", json!({ "id": admin_id }), Some(admin.as_str()));
    assert_eq!(error_code(&own), "conflict");

    let gone = sc.ok("profiles.delete", json!({ "id": sam_id }), &admin);
    assert_eq!(gone["deleted"], true);
    assert_eq!(
        error_code(&sc.call("profiles.get", json!({ "id": sam_id }), Some(admin.as_str()))),
        "not_found"
    );
    assert_eq!(
        error_code(&sc.call("profiles.me", json!({}), Some(sam.as_str()))),
        "unauthenticated"
    );
    let sign_in = sc.call(
        "auth.signIn",
        json!({ "email": "sam@school.test", "password": "password1" }),
        None,
    );
    assert_eq!(error_code(&sign_in), "invalid_credentials");
    let users = sc.ok("users.list", json!({}), &admin);
    assert_eq!(users["total"], 4);

    sc.finish();
    let _ = std::fs::remove_dir_all(workspace);
}
