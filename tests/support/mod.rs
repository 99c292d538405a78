use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use once_cell::sync::Lazy;
use runstack::{
    BackendFuture, BackendInvocation, BackendOutput, BackendRunner, ConfigParser, OutputSink,
    RunOptions, Stack, UnitConfig,
};
use tracing_subscriber::EnvFilter;

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

/// Backend double recording the order units were applied in. Units whose
/// paths are listed in `failing` exit non-zero.
#[derive(Default)]
pub struct RecordingBackend {
    applied: Mutex<Vec<PathBuf>>,
    failing: Mutex<Vec<PathBuf>>,
}

impl RecordingBackend {
    pub fn failing_on(self, path: &Path) -> Self {
        self.failing.lock().unwrap().push(path.to_path_buf());
        self
    }

    pub fn applied(&self) -> Vec<PathBuf> {
        self.applied.lock().unwrap().clone()
    }
}

impl BackendRunner for RecordingBackend {
    fn run<'a>(&'a self, invocation: BackendInvocation<'a>) -> BackendFuture<'a> {
        let path = invocation.unit.path.clone();
        Box::pin(async move {
            self.applied.lock().unwrap().push(path.clone());

            if self.failing.lock().unwrap().contains(&path) {
                return Ok(BackendOutput {
                    exit_code: 1,
                    stdout: Vec::new(),
                    stderr: format!("provisioning failed in {}\n", path.display()).into_bytes(),
                });
            }

            Ok(BackendOutput {
                exit_code: 0,
                stdout: format!("applied {}\n", path.display()).into_bytes(),
                stderr: Vec::new(),
            })
        })
    }
}

/// Parser double serving canned configs keyed by config path.
#[derive(Default)]
pub struct MapParser {
    configs: HashMap<PathBuf, UnitConfig>,
}

impl MapParser {
    pub fn with(mut self, path: &Path, config: UnitConfig) -> Self {
        self.configs.insert(path.to_path_buf(), config);
        self
    }
}

impl ConfigParser for MapParser {
    fn partial_parse(&self, path: &Path) -> Result<UnitConfig> {
        Ok(self.configs.get(path).cloned().unwrap_or_default())
    }
}

/// Creates a unit directory with a config file and returns the config path.
pub fn write_unit_config(dir: &Path) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    let config_path = dir.join("unit.hcl");
    fs::write(&config_path, "# unit config\n").unwrap();
    config_path
}

/// Config snapshot with a source and the given dependency paths.
pub fn sourced(dependencies: &[&Path]) -> UnitConfig {
    UnitConfig {
        source: Some("git::stack-module".into()),
        dependencies: dependencies.iter().map(|path| path.to_path_buf()).collect(),
        ..UnitConfig::default()
    }
}

pub fn quiet_stack(
    options: RunOptions,
    parser: MapParser,
    backend: Arc<RecordingBackend>,
) -> Stack {
    Stack::new(options, Arc::new(parser), backend).with_output(OutputSink::discard())
}

pub fn apply_options(working_dir: &Path) -> RunOptions {
    RunOptions::builder()
        .working_dir(working_dir)
        .command("apply")
        .disable_color(true)
        .build()
        .unwrap()
}
