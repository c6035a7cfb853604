use anyhow::{Context, Result};
use flowsync::config::Settings;
use flowsync::contexts::{ReconciliationController, Resolution, RunOutcome};
use flowsync::data::{
    DriftDirection, DriftSnapshot, ReconciliationAction, SyncScore, TestSummary, UnitKey,
};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct Config {
    pub verbose: bool,
    pub dry_run: bool,
    pub project: PathBuf,
}

fn open_project(config: &Config) -> Result<ReconciliationController> {
    let settings = Settings::load(&config.project).context("Failed to load settings")?;
    ReconciliationController::open(&config.project, settings)
        .with_context(|| format!("Failed to open project at {}", config.project.display()))
}

fn parse_key(flow: &str) -> Result<UnitKey> {
    UnitKey::parse(flow)
        .with_context(|| format!("Invalid flow key '{}'. Expected <domain>/<flow>.", flow))
}

fn parse_action(action: &str) -> Result<ReconciliationAction> {
    action.parse().map_err(|e: String| anyhow::anyhow!(e))
}

pub async fn implement(flow: &str, prompt_file: Option<PathBuf>, config: &Config) -> Result<()> {
    let unit = parse_key(flow)?;
    let mut controller = open_project(config)?;

    match prompt_file {
        Some(path) => {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read prompt file {}", path.display()))?;
            controller.load_prompt(&unit, content)?;
        }
        None => controller.prepare_prompt(&unit)?,
    }

    if config.dry_run {
        let settings = controller.settings();
        println!(
            "[DRY RUN] Would run: {} {} with the prompt for {} on stdin",
            settings.implement.command,
            settings.implement.args.join(" "),
            unit
        );
        return Ok(());
    }

    run_prompt(&mut controller, config).await
}

/// Run the prepared prompt, streaming output until the run ends. Ctrl-C
/// cancels the run.
async fn run_prompt(controller: &mut ReconciliationController, config: &Config) -> Result<()> {
    let unit = controller
        .session()
        .prompt()
        .map(|p| p.unit.to_string())
        .unwrap_or_default();
    println!("Implementing {}...", unit);

    let handle = controller.start_run()?;
    let cancel = handle.cancel_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let outcome = controller
        .finish_run(handle, |chunk| {
            print!("{}", chunk);
            let _ = std::io::stdout().flush();
        })
        .await;
    interrupt.abort();
    let outcome = outcome?;

    report_run(controller, &outcome, config)
}

fn report_run(
    controller: &ReconciliationController,
    outcome: &RunOutcome,
    config: &Config,
) -> Result<()> {
    for warning in &outcome.warnings {
        eprintln!("⚠ {}", warning);
    }

    if !outcome.status.is_success() {
        let message = controller
            .session()
            .error()
            .unwrap_or("Implementation failed")
            .to_string();
        anyhow::bail!(message);
    }

    println!("✓ Implementation finished");
    if outcome.files.is_empty() {
        println!("  No implementation files detected in the output");
    } else {
        println!("  Recorded {} file(s):", outcome.files.len());
        for file in &outcome.files {
            println!("    {}", file);
        }
    }
    if let Some(summary) = &outcome.test_results {
        print_test_summary(summary, config);
    }
    Ok(())
}

pub async fn test(config: &Config) -> Result<()> {
    let mut controller = open_project(config)?;
    let settings = controller.settings();
    let command_line = format!("{} {}", settings.testing.command, settings.testing.args.join(" "));
    println!("Running tests with {}...", command_line);

    if config.dry_run {
        println!("[DRY RUN] Would run: {}", command_line);
        return Ok(());
    }

    let summary = controller.run_tests().await?;
    if config.verbose {
        print!("{}", controller.session().output());
    }
    print_test_summary(&summary, config);

    if summary.failed > 0 {
        anyhow::bail!("Tests failed");
    }
    Ok(())
}

fn print_test_summary(summary: &TestSummary, config: &Config) {
    println!(
        "Tests: {} total, {} passed, {} failed ({:.2}s)",
        summary.total, summary.passed, summary.failed, summary.duration
    );
    for case in summary.failed_cases() {
        println!("  ✗ {}", case.name);
        if let Some(error) = &case.error {
            let lines: Vec<&str> = error.lines().collect();
            let shown = if config.verbose { lines.len() } else { lines.len().min(5) };
            for line in &lines[..shown] {
                println!("      {}", line);
            }
        }
    }
}

pub fn drift(config: &Config) -> Result<()> {
    let mut controller = open_project(config)?;
    let snapshot = controller.detect_drift()?;
    print_drift(snapshot);
    Ok(())
}

fn print_drift(snapshot: &DriftSnapshot) {
    if snapshot.entries.is_empty() {
        println!("✓ No drift detected");
    } else {
        println!("Drifted flows:");
        for entry in &snapshot.entries {
            let direction = match entry.direction {
                DriftDirection::Forward => "spec changed",
                DriftDirection::Reverse => "code changed",
            };
            println!("  {} ({}): {}", entry.flow_key, direction, entry.changed_path);
        }
    }
    for key in &snapshot.indeterminate {
        eprintln!("⚠ {}: spec could not be read; not checked", key);
    }
    print_score(&snapshot.score);
}

fn print_score(score: &SyncScore) {
    println!(
        "Sync score: {}% ({} implemented, {} stale, {} pending, {} total)",
        score.score, score.implemented, score.stale, score.pending, score.total
    );
}

pub fn status(config: &Config) -> Result<()> {
    let mut controller = open_project(config)?;
    let snapshot = controller.detect_drift()?;
    print_score(&snapshot.score);
    Ok(())
}

pub async fn resolve(flow: &str, action: &str, config: &Config) -> Result<()> {
    let key = parse_key(flow)?.to_string();
    let action = parse_action(action)?;
    let mut controller = open_project(config)?;
    controller.detect_drift()?;

    if config.dry_run {
        let listed = controller.session().drift().entry(&key).is_some();
        if listed {
            println!("[DRY RUN] Would {} drift for {}", action, key);
        } else {
            println!("[DRY RUN] No drift listed for {}", key);
        }
        return Ok(());
    }

    let resolution = controller.resolve(&key, action)?;
    if action == ReconciliationAction::Reimplement {
        return run_prompt(&mut controller, config).await;
    }

    println!("✓ {} resolved with {}", key, action);
    report_resolution(&resolution, &config.project);
    Ok(())
}

pub fn resolve_all(action: &str, config: &Config) -> Result<()> {
    let action = parse_action(action)?;
    let mut controller = open_project(config)?;
    let pending = controller.detect_drift()?.entries.len();

    if pending == 0 {
        println!("✓ No drift to resolve");
        return Ok(());
    }
    if config.dry_run {
        println!("[DRY RUN] Would {} {} drifted flow(s)", action, pending);
        return Ok(());
    }

    let resolution = controller.resolve_all(action)?;
    println!("✓ {} drifted flow(s) resolved with {}", pending, action);
    report_resolution(&resolution, &config.project);
    Ok(())
}

fn report_resolution(resolution: &Resolution, project: &Path) {
    println!(
        "  Sync score: {}% -> {}%",
        resolution.sync_score_before, resolution.sync_score_after
    );
    if let Some(path) = &resolution.report {
        let shown = path.strip_prefix(project).unwrap_or(path);
        println!("  Report: {}", shown.display());
    }
    for warning in &resolution.warnings {
        eprintln!("⚠ {}", warning);
    }
}

pub fn mapping(flow: Option<&str>, config: &Config) -> Result<()> {
    let controller = open_project(config)?;

    let yaml = match flow {
        Some(flow) => {
            let key = parse_key(flow)?.to_string();
            let mapping = controller
                .mapping(&key)
                .with_context(|| format!("No mapping recorded for {}", key))?;
            serde_yaml::to_string(mapping)?
        }
        None => serde_yaml::to_string(controller.store().all())?,
    };
    print!("{}", yaml);
    Ok(())
}
