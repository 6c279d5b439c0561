use std::error::Error;
use std::fs::{self, OpenOptions};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use querydeck_adapters::local::{LocalExecutionService, DEFAULT_ROW_LIMIT};
use querydeck_adapters::mysql::MysqlRowBackend;
use querydeck_core::config::{ConfigPaths, WorkbenchConfig};
use querydeck_core::datasources::FileDatasourceCatalog;
use querydeck_core::history::{record_finished_executions, FileExecutionHistory};
use querydeck_core::session::FileTabSession;
use querydeck_core::tab_store::TabStore;
use querydeck_core::workbench::Workbench;
use querydeck_tui::TuiError;
use tokio::runtime::Handle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const LOG_ENV_VAR: &str = "QUERYDECK_LOG";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

type Service = LocalExecutionService<MysqlRowBackend>;

fn init_logging(paths: &ConfigPaths) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(paths.dir())?;
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(paths.log_file())?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| "info".into()))
        .with_ansi(false)
        .with_writer(Mutex::new(log_file))
        .init();
    Ok(())
}

fn build_service(catalog: &FileDatasourceCatalog) -> Service {
    catalog
        .datasources()
        .iter()
        .filter(|profile| profile.permitted)
        .fold(
            LocalExecutionService::new(DEFAULT_ROW_LIMIT),
            |service, profile| {
                service.with_datasource(profile.id.clone(), MysqlRowBackend::from_profile(profile))
            },
        )
}

fn run_app(
    paths: &ConfigPaths,
    run_tui: impl FnOnce(
        Workbench<Service>,
        Handle,
        Option<FileExecutionHistory>,
    ) -> Result<(), TuiError>,
) -> Result<(), Box<dyn Error>> {
    let config = WorkbenchConfig::load_from_path(paths.config_file())?;
    let catalog = FileDatasourceCatalog::load_from_path(paths.datasources_file())?;
    let session = FileTabSession::from_path(paths.tabs_file());
    let tabs = match session.load() {
        Ok(snapshot) => snapshot.into_store(),
        Err(err) => {
            warn!(error = %err, "ignoring unreadable tab session");
            TabStore::new()
        }
    };
    let history = FileExecutionHistory::from_path(paths.history_file());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let guard = runtime.enter();

    let service = Arc::new(build_service(&catalog));
    let workbench = Workbench::builder(Arc::clone(&service), Arc::new(catalog.directory()))
        .config(config)
        .tabs(tabs)
        .build();
    workbench.attach_push_source(service);
    let recorder = runtime.spawn(record_finished_executions(
        history.clone(),
        workbench.subscribe(),
    ));
    info!(
        datasources = workbench.permitted_datasources().len(),
        tabs = workbench.tabs().len(),
        "querydeck started"
    );

    let tui_result = run_tui(workbench.clone(), runtime.handle().clone(), Some(history));

    if let Err(err) = session.save(&workbench.session_snapshot()) {
        warn!(error = %err, "failed to save tab session");
    }
    workbench.teardown();
    recorder.abort();
    drop(guard);
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    info!("querydeck stopped");

    tui_result?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let paths = ConfigPaths::resolve_default()?;
    init_logging(&paths)?;
    run_app(&paths, querydeck_tui::run)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io;

    use querydeck_core::config::ConfigPaths;
    use querydeck_core::session::FileTabSession;
    use tempfile::TempDir;

    use super::run_app;

    #[test]
    fn run_app_returns_ok_and_saves_the_session() {
        let temp_dir = TempDir::new().expect("temp dir");
        let paths = ConfigPaths::new(temp_dir.path());

        let result = run_app(&paths, |workbench, _runtime, history| {
            assert!(history.is_some());
            assert!(workbench.is_push_attached());
            let tab_id = workbench.active_id();
            workbench
                .set_sql(tab_id, "SELECT 1")
                .expect("active tab exists");
            Ok(())
        });
        assert!(result.is_ok());

        let snapshot = FileTabSession::from_path(paths.tabs_file())
            .load()
            .expect("session should load");
        assert_eq!(snapshot.tabs.len(), 1);
        assert_eq!(snapshot.tabs[0].sql, "SELECT 1");
    }

    #[test]
    fn run_app_restores_saved_tabs() {
        let temp_dir = TempDir::new().expect("temp dir");
        let paths = ConfigPaths::new(temp_dir.path());
        run_app(&paths, |workbench, _runtime, _history| {
            workbench.new_tab();
            Ok(())
        })
        .expect("first run");

        run_app(&paths, |workbench, _runtime, _history| {
            assert_eq!(workbench.tabs().len(), 2);
            Ok(())
        })
        .expect("second run");
    }

    #[test]
    fn run_app_propagates_tui_errors() {
        let temp_dir = TempDir::new().expect("temp dir");
        let paths = ConfigPaths::new(temp_dir.path());
        let result = run_app(&paths, |_workbench, _runtime, _history| {
            Err(querydeck_tui::TuiError::Io(io::Error::other("boom")))
        });
        assert!(result.is_err());
    }

    #[test]
    fn invalid_config_fails_before_the_tui_starts() {
        let temp_dir = TempDir::new().expect("temp dir");
        let paths = ConfigPaths::new(temp_dir.path());
        fs::write(paths.config_file(), "poll_interval_ms = 0\n").expect("write config");

        let result = run_app(&paths, |_workbench, _runtime, _history| {
            panic!("tui must not start with an invalid config")
        });
        assert!(result.is_err());
    }
}
