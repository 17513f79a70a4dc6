// CLI commands for preparing and driving Sentinel runs
use anyhow::{bail, Context, Result};
use sentinel_common::catalog::{self, CATALOG};
use sentinel_common::config::Settings;
use sentinel_common::lifecycle;
use sentinel_common::redis::RedisStore;
use sentinel_common::store::{ResultStore, RunSubmitter};
use sentinel_common::types::{
    CategorySelection, GuestDefaults, Run, RunConfiguration, RunDetail, TargetProfile,
};
use std::fs;
use std::path::Path;
use uuid::Uuid;

/// Configuration selecting every built-in case, grouped in catalog order
pub fn sample_configuration() -> RunConfiguration {
    let selected = catalog::categories()
        .into_iter()
        .map(|category| CategorySelection {
            category: category.to_string(),
            cases: CATALOG
                .iter()
                .filter(|c| c.category == category)
                .map(|c| c.name.to_string())
                .collect(),
        })
        .collect();

    RunConfiguration {
        name: "sample".to_string(),
        target: TargetProfile {
            host: "pve.example.com".to_string(),
            port: 8006,
            username: "root".to_string(),
            realm: "pam".to_string(),
            verify_ssl: true,
            node: "pve1".to_string(),
        },
        guests: GuestDefaults::default(),
        selected,
        destructive_enabled: false,
        cleanup_enabled: true,
    }
}

/// Load and validate a configuration file
pub fn load_configuration(path: &str) -> Result<RunConfiguration> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))?;
    let configuration: RunConfiguration =
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path))?;

    if let Err(reason) = configuration.validate() {
        bail!("Invalid configuration {}: {}", path, reason);
    }
    Ok(configuration)
}

/// One line per selected case, in execution order, plus the cleanup step
pub fn plan_lines(configuration: &RunConfiguration) -> Vec<String> {
    let mut lines: Vec<String> = configuration
        .selected_cases()
        .enumerate()
        .map(|(idx, (category, name))| {
            let destructive = catalog::lookup(category, name).map_or(false, |c| c.destructive);
            let note = match (destructive, configuration.destructive_enabled) {
                (true, false) => "  [skipped: destructive disabled]",
                (true, true) => "  [destructive]",
                _ => "",
            };
            format!("{:>3}. {} / {}{}", idx + 1, category, name, note)
        })
        .collect();

    let cleanup = if configuration.destructive_enabled && configuration.cleanup_enabled {
        "Cleanup: created resources are deleted after the suite"
    } else if configuration.destructive_enabled {
        "Cleanup: disabled, created resources are left on the target"
    } else {
        "Cleanup: not needed, nothing is created"
    };
    lines.push(cleanup.to_string());
    lines
}

async fn connect_store() -> Result<RedisStore> {
    let settings = Settings::from_env().context("Invalid settings")?;
    RedisStore::connect(&settings.redis_url, settings.result_ttl_seconds)
        .await
        .with_context(|| format!("Failed to connect to Redis at {}", settings.redis_url))
}

pub async fn init_configuration(path: &str, force: bool) -> Result<()> {
    println!("🚀 Writing sample configuration to: {}", path);

    if Path::new(path).exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path);
    }

    let content = serde_json::to_string_pretty(&sample_configuration())?;
    fs::write(path, content).with_context(|| format!("Failed to write {}", path))?;

    println!("✅ Configuration written!");
    println!("\n📋 Next steps:");
    println!("  1. Set target.host, target.username and target.node");
    println!("  2. Enable destructive cases if the target may be modified");
    println!("  3. Check the plan: sentinel-cli validate --config {}", path);
    Ok(())
}

pub async fn validate_configuration(path: &str) -> Result<()> {
    let configuration = load_configuration(path)?;

    println!("✅ Configuration '{}' is valid", configuration.name);
    println!(
        "🎯 Target: {}@{} on {}:{} (node {})",
        configuration.target.username,
        configuration.target.realm,
        configuration.target.host,
        configuration.target.port,
        configuration.target.node
    );
    println!("\n📋 Plan:");
    for line in plan_lines(&configuration) {
        println!("  {}", line);
    }
    Ok(())
}

pub async fn submit_run(path: &str) -> Result<()> {
    let configuration = load_configuration(path)?;
    let store = connect_store().await?;

    let run = Run::queued(configuration.name.clone());
    store
        .submit(&run, &configuration)
        .await
        .context("Failed to queue run")?;

    println!("✅ Run queued: {}", run.id);
    println!("\n📋 Follow it with: sentinel-cli status --run-id {}", run.id);
    Ok(())
}

pub async fn show_status(run_id: Uuid) -> Result<()> {
    let store = connect_store().await?;
    let Some(run) = store.load_run(run_id).await? else {
        bail!("Run {} not found", run_id);
    };

    let overall = run
        .overall_status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "-".to_string());
    println!("📊 Run {}", run.id);
    println!("  Configuration:  {}", run.configuration_name);
    println!("  Status:         {}", run.status);
    println!("  Overall status: {}", overall);
    if let Some(start) = run.start_time {
        println!("  Started:        {}", start.to_rfc3339());
    }
    if let Some(end) = run.end_time {
        println!("  Ended:          {}", end.to_rfc3339());
    }
    if let Some(duration) = run.duration_seconds {
        println!("  Duration:       {}s", duration);
    }
    Ok(())
}

pub async fn show_results(run_id: Uuid, json: bool) -> Result<()> {
    let store = connect_store().await?;
    let Some(run) = store.load_run(run_id).await? else {
        bail!("Run {} not found", run_id);
    };
    let detail = RunDetail::new(run, store.results(run_id).await?);

    if json {
        println!("{}", serde_json::to_string_pretty(&detail)?);
        return Ok(());
    }

    if detail.results.is_empty() {
        println!("No results recorded yet for run {} ({}).", run_id, detail.run.status);
        return Ok(());
    }

    println!("{:<24} {:<48} {:<8} {:>9}  {}", "CATEGORY", "CASE", "STATUS", "DURATION", "MESSAGE");
    println!("{}", "─".repeat(110));
    for result in &detail.results {
        println!(
            "{:<24} {:<48} {:<8} {:>8.2}s  {}",
            result.category, result.name, result.status, result.duration_seconds, result.message
        );
    }

    let counts = detail.counts;
    println!(
        "\n✅ Total: {}  passed: {}  failed: {}  errored: {}  skipped: {}",
        counts.total, counts.passed, counts.failed, counts.errored, counts.skipped
    );
    Ok(())
}

pub async fn cancel_run(run_id: Uuid) -> Result<()> {
    let store = connect_store().await?;
    let run = lifecycle::cancel(&store, run_id)
        .await
        .with_context(|| format!("Failed to cancel run {}", run_id))?;

    println!("🛑 Run {} cancelled", run.id);
    if let Some(duration) = run.duration_seconds {
        println!("  Duration: {}s", duration);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> String {
        std::env::temp_dir()
            .join(format!("sentinel-cli-{}-{}", Uuid::new_v4(), name))
            .to_string_lossy()
            .into_owned()
    }

    #[test]
    fn test_sample_configuration_is_valid_and_complete() {
        let configuration = sample_configuration();
        assert!(configuration.validate().is_ok());
        assert_eq!(configuration.selected_cases().count(), CATALOG.len());
        assert!(!configuration.destructive_enabled);
    }

    #[tokio::test]
    async fn test_init_writes_loadable_file() {
        let path = temp_path("init.json");

        init_configuration(&path, false).await.unwrap();
        let loaded = load_configuration(&path).unwrap();
        assert_eq!(loaded, sample_configuration());

        // Refuses to clobber without --force
        assert!(init_configuration(&path, false).await.is_err());
        assert!(init_configuration(&path, true).await.is_ok());

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_load_rejects_invalid_configuration() {
        let path = temp_path("invalid.json");
        let mut configuration = sample_configuration();
        configuration.selected[0].cases = vec!["Reboot Node".to_string()];
        fs::write(&path, serde_json::to_string(&configuration).unwrap()).unwrap();

        let err = load_configuration(&path).unwrap_err();
        assert!(err.to_string().contains("Reboot Node"));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_plan_marks_skipped_destructive_cases() {
        let configuration = sample_configuration();
        let lines = plan_lines(&configuration);

        assert_eq!(lines.len(), CATALOG.len() + 1);
        assert!(lines[0].ends_with("Resource Discovery / List Resources"));
        assert!(lines
            .iter()
            .any(|l| l.contains("Create VM") && l.contains("skipped: destructive disabled")));
        assert_eq!(lines.last().unwrap(), "Cleanup: not needed, nothing is created");
    }

    #[test]
    fn test_plan_with_destructive_enabled() {
        let mut configuration = sample_configuration();
        configuration.destructive_enabled = true;
        let lines = plan_lines(&configuration);

        assert!(lines
            .iter()
            .any(|l| l.contains("Create VM") && l.ends_with("[destructive]")));
        assert!(lines.last().unwrap().contains("deleted after the suite"));
    }
}
