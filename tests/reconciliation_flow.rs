use flowsync::config::Settings;
use flowsync::contexts::{FsContentProvider, ReconciliationController};
use flowsync::data::{
    ContentProvider, DriftDirection, ReconciliationAction, ReconciliationReport,
};
use flowsync::mapping_store::MappingStore;
use std::fs;
use std::path::Path;
use std::sync::Arc;

const SIGNUP_SPEC: &str = "specs/domains/users/flows/signup.yaml";
const LOGIN_SPEC: &str = "specs/domains/users/flows/login.yaml";

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// Three flows in two domains; signup and login implemented, invoice pending
fn setup_project() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();

    write(
        root,
        "ddd-project.json",
        r#"{"name": "shop", "domains": [{"name": "Users"}, {"name": "Billing"}]}"#,
    );
    write(
        root,
        "specs/domains/users/domain.yaml",
        "flows:\n  - id: signup\n    name: Sign Up\n  - id: login\n    name: Log In\n",
    );
    write(
        root,
        "specs/domains/billing/domain.yaml",
        "flows:\n  - id: invoice\n    name: Create Invoice\n",
    );
    write(root, SIGNUP_SPEC, "flow: signup\n");
    write(root, LOGIN_SPEC, "flow: login\n");
    write(root, "specs/domains/billing/flows/invoice.yaml", "flow: invoice\n");
    write(root, "src/signup.ts", "export const signup = () => {};\n");
    write(root, "src/login.ts", "export const login = () => {};\n");
    write(root, "src/login.test.ts", "test('login', () => {});\n");

    let provider: Arc<dyn ContentProvider> =
        Arc::new(FsContentProvider::new(Some(root.to_path_buf())));
    let mut store = MappingStore::load(provider).unwrap();
    store
        .record("users/signup", SIGNUP_SPEC, &["src/signup.ts".to_string()])
        .unwrap();
    store
        .record(
            "users/login",
            LOGIN_SPEC,
            &["src/login.ts".to_string(), "src/login.test.ts".to_string()],
        )
        .unwrap();

    dir
}

fn open(root: &Path) -> ReconciliationController {
    ReconciliationController::open(root, Settings::default()).unwrap()
}

fn read_report(path: &Path) -> ReconciliationReport {
    serde_yaml::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn recorded_project_starts_in_sync() {
    let dir = setup_project();
    let mut controller = open(dir.path());

    let snapshot = controller.detect_drift().unwrap();
    assert!(snapshot.entries.is_empty());
    assert_eq!(snapshot.score.total, 3);
    assert_eq!(snapshot.score.implemented, 2);
    assert_eq!(snapshot.score.pending, 1);
    assert_eq!(snapshot.score.score, 67);
}

#[test]
fn accept_forward_drift_writes_report_and_clears_it() {
    let dir = setup_project();
    write(dir.path(), SIGNUP_SPEC, "flow: signup\nvalidate: email\n");
    write(dir.path(), "src/signup.ts", "// edited as well\n");

    let mut controller = open(dir.path());
    let snapshot = controller.detect_drift().unwrap();
    assert_eq!(snapshot.entries.len(), 1);
    let entry = snapshot.entries[0].clone();
    assert_eq!(entry.direction, DriftDirection::Forward);
    assert_eq!(snapshot.score.score, 33);

    let resolution = controller
        .resolve("users/signup", ReconciliationAction::Accept)
        .unwrap();
    assert_eq!(resolution.sync_score_before, 33);
    assert_eq!(resolution.sync_score_after, 67);
    assert!(controller.session().drift().entries.is_empty());
    assert_eq!(
        controller.mapping("users/signup").unwrap().spec_hash,
        entry.current_hash
    );

    let report = read_report(&resolution.report.unwrap());
    assert_eq!(report.entries.len(), 1);
    assert_eq!(report.entries[0].flow_key, "users/signup");
    assert_eq!(report.entries[0].action, ReconciliationAction::Accept);
    assert_eq!(report.entries[0].previous_hash, entry.previous_hash);
    assert_eq!(report.entries[0].new_hash, entry.current_hash);

    // Accepting the spec leaves the edited implementation file to be reported
    let snapshot = controller.detect_drift().unwrap();
    assert_eq!(snapshot.entries.len(), 1);
    assert_eq!(snapshot.entries[0].direction, DriftDirection::Reverse);

    // A fresh controller sees the persisted mapping
    let mut reopened = open(dir.path());
    let snapshot = reopened.detect_drift().unwrap();
    assert!(snapshot
        .entries
        .iter()
        .all(|e| e.direction == DriftDirection::Reverse));
}

#[test]
fn ignore_lasts_until_session_reset() {
    let dir = setup_project();
    write(dir.path(), "src/login.test.ts", "test('login', () => { expect(1) });\n");

    let mut controller = open(dir.path());
    let snapshot = controller.detect_drift().unwrap();
    assert_eq!(snapshot.entries.len(), 1);
    assert_eq!(snapshot.entries[0].changed_path, "src/login.test.ts");
    let stored = controller.mapping("users/login").cloned();

    let resolution = controller
        .resolve("users/login", ReconciliationAction::Ignore)
        .unwrap();
    assert!(resolution.report.is_some());
    assert_eq!(controller.mapping("users/login").cloned(), stored);
    assert!(controller.session().is_ignored("users/login"));

    assert!(controller.detect_drift().unwrap().entries.is_empty());

    controller.reset_session();
    let snapshot = controller.detect_drift().unwrap();
    assert_eq!(snapshot.entries.len(), 1);
    assert_eq!(snapshot.entries[0].flow_key, "users/login");
}

#[test]
fn bulk_accept_writes_one_report_with_every_entry() {
    let dir = setup_project();
    write(dir.path(), SIGNUP_SPEC, "flow: signup\nversion: 2\n");
    write(dir.path(), "src/login.ts", "export const login = async () => {};\n");

    let mut controller = open(dir.path());
    let snapshot = controller.detect_drift().unwrap();
    assert_eq!(snapshot.entries.len(), 2);
    assert_eq!(snapshot.score.score, 0);

    let resolution = controller.resolve_all(ReconciliationAction::Accept).unwrap();
    assert_eq!(resolution.sync_score_before, 0);
    assert_eq!(resolution.sync_score_after, 67);
    assert!(resolution.warnings.is_empty());

    let reports = controller.audit().list().unwrap();
    assert_eq!(reports.len(), 1);
    let report = read_report(&reports[0]);
    assert_eq!(report.entries.len(), 2);
    assert_eq!(report.sync_score_before, 0);
    assert_eq!(report.sync_score_after, 67);

    assert!(controller.detect_drift().unwrap().entries.is_empty());
}

#[test]
fn bulk_result_matches_sequential_resolution() {
    let sequential_dir = setup_project();
    let bulk_dir = setup_project();
    for dir in [&sequential_dir, &bulk_dir] {
        write(dir.path(), SIGNUP_SPEC, "flow: signup\nversion: 2\n");
        write(dir.path(), LOGIN_SPEC, "flow: login\nversion: 2\n");
    }

    let mut sequential = open(sequential_dir.path());
    sequential.detect_drift().unwrap();
    let first = sequential
        .resolve("users/login", ReconciliationAction::Ignore)
        .unwrap();
    let second = sequential
        .resolve("users/signup", ReconciliationAction::Ignore)
        .unwrap();

    let mut bulk = open(bulk_dir.path());
    bulk.detect_drift().unwrap();
    let all = bulk.resolve_all(ReconciliationAction::Ignore).unwrap();

    assert_eq!(all.sync_score_before, first.sync_score_before);
    assert_eq!(all.sync_score_after, second.sync_score_after);
    assert_eq!(sequential.audit().list().unwrap().len(), 2);
    assert_eq!(bulk.audit().list().unwrap().len(), 1);
}

#[test]
fn resolving_unlisted_flow_is_an_error() {
    let dir = setup_project();
    let mut controller = open(dir.path());
    controller.detect_drift().unwrap();

    assert!(controller
        .resolve("users/signup", ReconciliationAction::Accept)
        .is_err());
    assert!(controller.audit().list().unwrap().is_empty());
}
