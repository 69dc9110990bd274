use crate::*;
use async_trait::async_trait;
use od_core::clock::{Clock, ManualClock, SharedClock};
use od_core::config::ExtensionConfig;
use od_core::deadline::Deadline;
use od_core::error::{ErrorKind, OdError, Result};
use od_core::types::DocumentType;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// In-memory transport with scriptable failures.
#[derive(Default)]
struct FakeTransport {
    unreachable: Mutex<HashSet<String>>,
    failing: Mutex<HashSet<String>>,
    hanging: Mutex<HashSet<String>>,
    delivered: Mutex<Vec<Delivery>>,
    starts: Mutex<Vec<String>>,
    stopped: Mutex<Vec<String>>,
}

impl FakeTransport {
    fn fail(&self, id: &str, on: bool) {
        let mut failing = self.failing.lock();
        if on {
            failing.insert(id.to_string());
        } else {
            failing.remove(id);
        }
    }

    fn delivered_to(&self, id: &str) -> usize {
        self.delivered.lock().iter().filter(|d| d.extension_id == id).count()
    }
}

#[async_trait]
impl ExtensionTransport for FakeTransport {
    async fn probe(&self, extension: &ExtensionConfig) -> std::result::Result<(), String> {
        if self.unreachable.lock().contains(&extension.id) {
            Err("not found: fake".into())
        } else {
            Ok(())
        }
    }

    async fn start(&self, extension: &ExtensionConfig) -> Result<()> {
        self.starts.lock().push(extension.id.clone());
        Ok(())
    }

    async fn deliver(&self, extension: &ExtensionConfig, delivery: &Delivery) -> Result<()> {
        let hang = self.hanging.lock().contains(&extension.id);
        if hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        let fail = self.failing.lock().contains(&extension.id);
        if fail {
            return Err(OdError::Storage("broken pipe".into()));
        }
        self.delivered.lock().push(delivery.clone());
        Ok(())
    }

    async fn stop(&self, extension_id: &str) {
        self.stopped.lock().push(extension_id.to_string());
    }
}

struct Source {
    ty: DocumentType,
    body: &'static str,
}

#[async_trait]
impl ExportSource for Source {
    fn document_type(&self) -> DocumentType {
        self.ty
    }

    async fn export(&self, format: &str) -> Result<Vec<u8>> {
        if format == "bogus" {
            return Err(OdError::Format(format!("cannot export {format}")));
        }
        Ok(format!("{format}:{}", self.body).into_bytes())
    }
}

fn word() -> Source {
    Source {
        ty: DocumentType::Word,
        body: "hello",
    }
}

struct Fixture {
    transport: Arc<FakeTransport>,
    clock: Arc<ManualClock>,
    supervisor: ExtensionSupervisor,
}

fn fixture_with(configs: Vec<ExtensionConfig>, limit: u32) -> Fixture {
    let transport = Arc::new(FakeTransport::default());
    let clock = ManualClock::starting_now();
    let shared: SharedClock = clock.clone();
    let supervisor = ExtensionSupervisor::new(
        configs,
        transport.clone(),
        RestartPolicy::new(limit),
        shared,
    );
    Fixture {
        transport,
        clock,
        supervisor,
    }
}

fn fixture() -> Fixture {
    fixture_with(
        vec![
            ExtensionConfig::new("pdfsign", &["pdf"]),
            ExtensionConfig::new("archiver", &["docx", "txt"]),
        ],
        3,
    )
}

// ========== State machine ==========

#[test]
fn test_state_transitions() {
    use ExtensionState::*;
    assert!(NotFound.can_transition_to(Idle));
    assert!(Idle.can_transition_to(Running));
    assert!(Running.can_transition_to(Crashed));
    assert!(Crashed.can_transition_to(Idle));
    assert!(Crashed.can_transition_to(NotFound));
    assert!(!NotFound.can_transition_to(Running));
    assert!(!Crashed.can_transition_to(Running));
    assert!(!Idle.can_transition_to(Crashed));

    let err = NotFound.transition(Crashed).unwrap_err();
    assert_eq!(err.to_string(), "invalid extension transition not_found -> crashed");
    assert!(Running.is_available());
    assert!(!Crashed.is_available());
}

#[test]
fn test_restart_policy_is_bounded() {
    let policy = RestartPolicy::default();
    assert_eq!(policy.decide(0), RestartDecision::Restart { attempt: 1 });
    assert_eq!(policy.decide(2), RestartDecision::Restart { attempt: 3 });
    assert_eq!(policy.decide(3), RestartDecision::Abandon);
    assert_eq!(RestartPolicy::new(0).decide(0), RestartDecision::Abandon);
}

// ========== Probe / List ==========

#[tokio::test]
async fn test_unprobed_extensions_are_not_found() {
    let f = fixture();
    let list = f.supervisor.list_extensions();
    assert_eq!(list.len(), 2);
    assert!(list.iter().all(|e| e.state == ExtensionState::NotFound && !e.available));

    f.supervisor.probe_all().await;
    let list = f.supervisor.list_extensions();
    assert!(list.iter().all(|e| e.available));
    assert_eq!(list[0].id, "archiver");
    assert_eq!(f.transport.starts.lock().len(), 2);
}

#[tokio::test]
async fn test_probe_marks_missing_extension_unavailable() {
    let f = fixture();
    f.supervisor.probe_all().await;
    f.transport.unreachable.lock().insert("pdfsign".into());
    f.supervisor.probe_all().await;

    let status = f.supervisor.status("pdfsign");
    assert_eq!(status.state, ExtensionState::NotFound);
    assert_eq!(status.unavailable_reason.as_deref(), Some("not found: fake"));
    assert_eq!(f.supervisor.status("archiver").state, ExtensionState::Idle);
}

// ========== Bind / Unbind ==========

#[tokio::test]
async fn test_bind_validates_extension_and_format() {
    let f = fixture();
    let err = f
        .supervisor
        .bind("s1", DocumentType::Word, "nope", "pdf")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = f
        .supervisor
        .bind("s1", DocumentType::Word, "pdfsign", "xlsx")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Argument);

    let binding = f
        .supervisor
        .bind("s1", DocumentType::Word, "pdfsign", "PDF")
        .unwrap();
    assert_eq!(binding.extension_id, "pdfsign");
    assert!(binding.last_sent_at.is_none());
}

#[tokio::test]
async fn test_bind_rejects_unsupported_document_type() {
    let mut only_excel = ExtensionConfig::new("sheets", &["xlsx"]);
    only_excel.document_types = vec![DocumentType::Excel];
    let f = fixture_with(vec![only_excel], 3);

    assert!(f.supervisor.bind("s1", DocumentType::Excel, "sheets", "xlsx").is_ok());
    let err = f
        .supervisor
        .bind("s2", DocumentType::Word, "sheets", "xlsx")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Argument);
}

#[tokio::test]
async fn test_rebind_keeps_single_binding() {
    let f = fixture();
    let first = f.supervisor.bind("s1", DocumentType::Word, "archiver", "docx").unwrap();
    f.clock.advance(chrono::Duration::minutes(5));
    let second = f.supervisor.bind("s1", DocumentType::Word, "archiver", "txt").unwrap();

    assert_eq!(first.created_at, second.created_at);
    assert_eq!(second.format, "txt");
    assert_eq!(f.supervisor.bindings_for("s1").len(), 1);
}

#[tokio::test]
async fn test_unbind_twice() {
    let f = fixture();
    f.supervisor.bind("s1", DocumentType::Word, "pdfsign", "pdf").unwrap();
    assert_eq!(f.supervisor.unbind("s1", Some("pdfsign")), 1);
    assert_eq!(f.supervisor.unbind("s1", Some("pdfsign")), 0);
}

#[tokio::test]
async fn test_unbind_all_for_session() {
    let f = fixture();
    f.supervisor.bind("s1", DocumentType::Word, "pdfsign", "pdf").unwrap();
    f.supervisor.bind("s1", DocumentType::Word, "archiver", "docx").unwrap();
    f.supervisor.bind("s2", DocumentType::Word, "archiver", "docx").unwrap();

    assert_eq!(f.supervisor.unbind("s1", None), 2);
    assert!(!f.supervisor.has_bindings("s1"));
    assert!(f.supervisor.has_bindings("s2"));
}

// ========== Push ==========

#[tokio::test]
async fn test_push_delivers_each_binding() {
    let f = fixture();
    f.supervisor.bind("s1", DocumentType::Word, "pdfsign", "pdf").unwrap();
    f.supervisor.bind("s1", DocumentType::Word, "archiver", "docx").unwrap();

    let report = f.supervisor.push("s1", &word(), Deadline::none()).await;
    assert_eq!(report.delivered, 2);
    assert!(report.is_clean());

    let delivered = f.transport.delivered.lock().clone();
    let pdf = delivered.iter().find(|d| d.extension_id == "pdfsign").unwrap();
    assert_eq!(pdf.payload, b"pdf:hello");
    assert_eq!(pdf.document_type, DocumentType::Word);

    for b in f.supervisor.bindings_for("s1") {
        assert_eq!(b.last_sent_at, Some(f.clock.now()));
    }
    let status = f.supervisor.status("pdfsign");
    assert_eq!(status.state, ExtensionState::Idle);
    assert_eq!(status.active_bindings, 1);
    assert!(status.last_activity.is_some());
}

#[tokio::test]
async fn test_older_export_never_overwrites_newer() {
    let f = fixture();
    f.supervisor.bind("s1", DocumentType::Word, "pdfsign", "pdf").unwrap();
    let first = Source {
        ty: DocumentType::Word,
        body: "v1",
    };
    let second = Source {
        ty: DocumentType::Word,
        body: "v2",
    };
    let older = f.supervisor.prepare("s1", &first).await;
    let newer = f.supervisor.prepare("s1", &second).await;
    assert!(newer.sequence > older.sequence);

    let report = f.supervisor.deliver(newer, Deadline::none()).await;
    assert_eq!(report.delivered, 1);
    let report = f.supervisor.deliver(older, Deadline::none()).await;
    assert_eq!(report.delivered, 0);
    assert_eq!(report.superseded, 1);
    assert!(report.is_clean());

    let delivered = f.transport.delivered.lock().clone();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].payload, b"pdf:v2");

    let report = f.supervisor.push("s1", &first, Deadline::none()).await;
    assert_eq!(report.delivered, 1);
}

#[tokio::test]
async fn test_push_without_bindings_is_empty() {
    let f = fixture();
    let prepared = f.supervisor.prepare("s1", &word()).await;
    assert!(prepared.is_empty());
    let report = f.supervisor.deliver(prepared, Deadline::none()).await;
    assert_eq!(report, PushReport::default());
}

#[tokio::test]
async fn test_export_failure_is_reported_not_raised() {
    let mut cfg = ExtensionConfig::new("odd", &["bogus"]);
    cfg.name = "Odd".into();
    let f = fixture_with(vec![cfg], 3);
    f.supervisor.bind("s1", DocumentType::Word, "odd", "bogus").unwrap();

    let report = f.supervisor.push("s1", &word(), Deadline::none()).await;
    assert_eq!(report.delivered, 0);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(f.transport.delivered_to("odd"), 0);
}

#[tokio::test]
async fn test_failed_delivery_crashes_and_keeps_binding() {
    let f = fixture();
    f.supervisor.bind("s1", DocumentType::Word, "pdfsign", "pdf").unwrap();
    f.transport.fail("pdfsign", true);

    let report = f.supervisor.push("s1", &word(), Deadline::none()).await;
    assert_eq!(report.delivered, 0);
    assert_eq!(report.failures[0].extension_id, "pdfsign");

    let status = f.supervisor.status("pdfsign");
    assert_eq!(status.state, ExtensionState::Crashed);
    assert!(status.unavailable_reason.unwrap().starts_with("unhealthy"));
    assert_eq!(status.active_bindings, 1);
    assert!(f.supervisor.bindings_for("s1")[0].last_sent_at.is_none());
}

#[tokio::test]
async fn test_crashed_extension_restarts_on_next_push() {
    let f = fixture();
    f.supervisor.bind("s1", DocumentType::Word, "pdfsign", "pdf").unwrap();
    f.transport.fail("pdfsign", true);
    f.supervisor.push("s1", &word(), Deadline::none()).await;

    f.transport.fail("pdfsign", false);
    let report = f.supervisor.push("s1", &word(), Deadline::none()).await;
    assert_eq!(report.delivered, 1);

    let status = f.supervisor.status("pdfsign");
    assert_eq!(status.state, ExtensionState::Idle);
    assert_eq!(status.restart_count, 1);
    // first launch, then one restart
    assert_eq!(f.transport.starts.lock().len(), 2);
}

#[tokio::test]
async fn test_restart_limit_abandons_extension() {
    let f = fixture_with(vec![ExtensionConfig::new("pdfsign", &["pdf"])], 2);
    f.supervisor.bind("s1", DocumentType::Word, "pdfsign", "pdf").unwrap();
    f.transport.fail("pdfsign", true);

    // initial crash, then two restarts that crash again
    for _ in 0..3 {
        f.supervisor.push("s1", &word(), Deadline::none()).await;
    }
    assert_eq!(f.supervisor.status("pdfsign").restart_count, 2);
    assert_eq!(f.supervisor.status("pdfsign").state, ExtensionState::Crashed);

    let report = f.supervisor.push("s1", &word(), Deadline::none()).await;
    assert!(report.failures[0].reason.contains("restart limit"));
    let status = f.supervisor.status("pdfsign");
    assert_eq!(status.state, ExtensionState::NotFound);
    assert_eq!(status.restart_count, 2);
    // first launch plus two restarts
    assert_eq!(f.transport.starts.lock().len(), 3);
}

#[tokio::test]
async fn test_abandoned_extension_receives_no_further_deliveries() {
    let f = fixture_with(vec![ExtensionConfig::new("pdfsign", &["pdf"])], 2);
    f.supervisor.bind("s1", DocumentType::Word, "pdfsign", "pdf").unwrap();
    f.transport.fail("pdfsign", true);
    for _ in 0..4 {
        f.supervisor.push("s1", &word(), Deadline::none()).await;
    }
    assert_eq!(f.supervisor.status("pdfsign").state, ExtensionState::NotFound);

    f.transport.fail("pdfsign", false);
    let starts = f.transport.starts.lock().len();
    for _ in 0..6 {
        let report = f.supervisor.push("s1", &word(), Deadline::none()).await;
        assert_eq!(report.delivered, 0);
        assert!(report.failures[0].reason.contains("restart limit"));
    }
    f.supervisor.probe_all().await;
    f.supervisor.push("s1", &word(), Deadline::none()).await;

    assert_eq!(f.transport.delivered_to("pdfsign"), 0);
    assert_eq!(f.transport.starts.lock().len(), starts);
    let status = f.supervisor.status("pdfsign");
    assert_eq!(status.state, ExtensionState::NotFound);
    assert_eq!(status.restart_count, 2);
}

#[tokio::test]
async fn test_reset_revives_abandoned_extension() {
    let f = fixture_with(vec![ExtensionConfig::new("pdfsign", &["pdf"])], 1);
    f.supervisor.bind("s1", DocumentType::Word, "pdfsign", "pdf").unwrap();
    f.transport.fail("pdfsign", true);
    for _ in 0..3 {
        f.supervisor.push("s1", &word(), Deadline::none()).await;
    }
    assert!(f.supervisor.status("pdfsign").unavailable_reason.unwrap().contains("restart limit"));

    f.transport.fail("pdfsign", false);
    let status = f.supervisor.reset("pdfsign").await.unwrap();
    assert_eq!(status.state, ExtensionState::Idle);
    assert_eq!(status.restart_count, 0);

    let report = f.supervisor.push("s1", &word(), Deadline::none()).await;
    assert_eq!(report.delivered, 1);
    assert_eq!(
        f.supervisor.reset("ghost").await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

#[tokio::test(start_paused = true)]
async fn test_push_timeout_leaves_last_sent_unset() {
    let f = fixture();
    f.supervisor.bind("s1", DocumentType::Word, "pdfsign", "pdf").unwrap();
    f.transport.hanging.lock().insert("pdfsign".into());

    let report = f
        .supervisor
        .push("s1", &word(), Deadline::after(Duration::from_secs(2)))
        .await;
    assert_eq!(report.delivered, 0);
    assert!(report.failures[0].reason.contains("timed out"));
    assert!(f.supervisor.bindings_for("s1")[0].last_sent_at.is_none());
    assert_eq!(f.supervisor.status("pdfsign").state, ExtensionState::Crashed);
}

#[tokio::test]
async fn test_unreachable_extension_fails_push() {
    let f = fixture();
    f.transport.unreachable.lock().insert("pdfsign".into());
    f.supervisor.bind("s1", DocumentType::Word, "pdfsign", "pdf").unwrap();

    let report = f.supervisor.push("s1", &word(), Deadline::none()).await;
    assert_eq!(report.failures.len(), 1);
    assert_eq!(f.supervisor.status("pdfsign").state, ExtensionState::NotFound);
    assert_eq!(f.transport.delivered_to("pdfsign"), 0);
}

// ========== Status / Shutdown ==========

#[tokio::test]
async fn test_status_of_unknown_extension() {
    let f = fixture();
    let status = f.supervisor.status("ghost");
    assert_eq!(status.state, ExtensionState::NotFound);
    assert_eq!(status.unavailable_reason.as_deref(), Some("not configured"));
    assert_eq!(status.active_bindings, 0);
}

#[tokio::test]
async fn test_shutdown_stops_every_extension() {
    let f = fixture();
    f.supervisor.shutdown().await;
    let mut stopped = f.transport.stopped.lock().clone();
    stopped.sort();
    assert_eq!(stopped, vec!["archiver".to_string(), "pdfsign".to_string()]);
}

// ========== Process transport ==========

#[tokio::test]
async fn test_process_probe_reports_reasons() {
    let transport = ProcessTransport::new();
    let cfg = ExtensionConfig::new("x", &["pdf"]);
    assert_eq!(
        transport.probe(&cfg).await.unwrap_err(),
        "misconfigured: no command"
    );

    let tmp = tempfile::TempDir::new().unwrap();
    let mut cfg = cfg;
    cfg.command = Some(tmp.path().join("missing-binary"));
    assert!(transport.probe(&cfg).await.unwrap_err().starts_with("not found"));
}
