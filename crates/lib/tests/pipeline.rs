//! End-to-end tests: load a configuration, generate it, build the graph and
//! run an action over it.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use sitegen_lib::config;
use sitegen_lib::execute::{Action, ExecuteConfig, ExecuteError, ToolRunner, run_action};
use sitegen_lib::generate::{GenerateOptions, Generator, SiteOutcome, validate_hcl, write_files};
use sitegen_lib::graph::DependencyGraph;
use sitegen_lib::plugin::PluginRegistry;

const CONFIG: &str = r#"
global:
  environment: staging
  deployment:
    runners: 2
components:
  - name: network
    source: git::https://example.com/network.git
    version: "1.2.0"
    integrations: [aws]
  - name: api
    source: ./modules/api
    version: "0.4.0"
    integrations: [aws]
  - name: dashboard
    source: ./modules/dashboard
    version: "0.1.0"
sites:
  - identifier: eu
    aws:
      region: eu-west-1
      default_tags:
        team: platform
    components:
      - name: network
      - name: api
        variables:
          vpc_id: ${component.network.vpc_id}
      - name: dashboard
        deployment:
          type: site-component
        variables:
          endpoint: https://${component.api.hostname}
  - identifier: us
    aws:
      region: us-east-1
    components:
      - name: api
        variables:
          peer_vpc: ${site.eu.network.vpc_id}
"#;

/// Records "<unit> <subcommand>" for every call made below `root`.
struct Recorder {
  root: PathBuf,
  calls: Mutex<Vec<String>>,
}

impl Recorder {
  fn new(root: PathBuf) -> Self {
    Self {
      root,
      calls: Mutex::new(Vec::new()),
    }
  }
}

#[async_trait]
impl ToolRunner for Recorder {
  async fn run(&self, dir: &Path, args: &[String]) -> Result<String, ExecuteError> {
    let unit = dir.strip_prefix(&self.root).unwrap_or(dir);
    self
      .calls
      .lock()
      .unwrap()
      .push(format!("{} {}", unit.display(), args[0]));
    Ok(String::new())
  }
}

fn setup(temp: &TempDir) -> (config::Configuration, PluginRegistry) {
  let path = temp.path().join("platform.yml");
  std::fs::write(&path, CONFIG).unwrap();
  let mut plugins = PluginRegistry::with_builtins().unwrap();
  let cfg = config::load(&path, &mut plugins).unwrap();
  (cfg, plugins)
}

fn options(temp: &TempDir) -> GenerateOptions {
  GenerateOptions {
    output_path: temp.path().join("out"),
    site: None,
  }
}

#[test]
fn generates_valid_units() {
  let temp = TempDir::new().unwrap();
  let (cfg, plugins) = setup(&temp);

  let result = write_files(&cfg, &plugins, &options(&temp)).unwrap();
  assert_eq!(
    result.sites["eu"],
    SiteOutcome::Written {
      units: vec!["eu".to_string(), "eu/dashboard".to_string()]
    }
  );

  let root = temp.path().join("out").join("platform");
  let keys: Vec<&String> = result.locations.keys().collect();
  assert_eq!(keys, vec!["eu", "eu/dashboard", "us"]);

  for key in ["eu", "eu/dashboard", "us"] {
    let text = std::fs::read_to_string(root.join(key).join("site.tf")).unwrap();
    validate_hcl(&text).unwrap();
  }

  let eu = std::fs::read_to_string(root.join("eu").join("site.tf")).unwrap();
  assert!(eu.contains("region = \"eu-west-1\""));
  assert!(eu.contains("source = \"git::https://example.com/network.git?ref=1.2.0\""));
  assert!(eu.contains("vpc_id = module.network.vpc_id"));

  let dashboard = std::fs::read_to_string(root.join("eu").join("dashboard").join("site.tf")).unwrap();
  assert!(dashboard.contains("data \"terraform_remote_state\" \"eu\""));
  assert!(!dashboard.contains("provider \"aws\""));
}

#[test]
fn unchanged_configuration_is_skipped() {
  let temp = TempDir::new().unwrap();
  let (cfg, plugins) = setup(&temp);

  write_files(&cfg, &plugins, &options(&temp)).unwrap();
  let again = write_files(&cfg, &plugins, &options(&temp)).unwrap();
  assert!(again.sites.values().all(|outcome| *outcome == SiteOutcome::UpToDate));
}

#[tokio::test]
async fn plan_runs_in_dependency_order() {
  let temp = TempDir::new().unwrap();
  let (cfg, plugins) = setup(&temp);
  let result = write_files(&cfg, &plugins, &options(&temp)).unwrap();

  let generator = Generator::new(&cfg, &plugins, &temp.path().join("out")).unwrap();
  let graph = DependencyGraph::from_config(&generator, &result.locations).unwrap();
  assert_eq!(
    graph.waves().unwrap(),
    vec![vec!["eu".to_string()], vec!["eu/dashboard".to_string(), "us".to_string()]]
  );

  let recorder = Arc::new(Recorder::new(temp.path().join("out").join("platform")));
  let config = ExecuteConfig {
    runners: cfg.global.deployment.runners,
    ..Default::default()
  };
  let batch = run_action(recorder.clone(), &graph, &Action::Plan { lock: true }, &config)
    .await
    .unwrap();
  assert!(batch.is_success());
  assert_eq!(batch.total(), 3);

  let calls = recorder.calls.lock().unwrap().clone();
  assert_eq!(calls.len(), 6);
  let position = |call: &str| calls.iter().position(|c| c == call).unwrap();
  let last_init = ["eu init", "eu/dashboard init", "us init"].map(position).into_iter().max().unwrap();
  assert!(last_init < position("eu plan"));
  assert!(position("eu plan") < position("us plan"));
  assert!(position("eu plan") < position("eu/dashboard plan"));
}
