use std::{
	path::Path,
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc,
	},
	time::Duration,
};

use tracing_test::traced_test;

use gw_core::{
	clients::{RegistryModuleData, StaticRegistryClient},
	event::FileChangeType,
	fs::MemFs,
	lang::{
		ConfigDecoder, Diagnostic, FileDiags, GwkDecoder, ModFiles, ModuleMetadata, ParsedFile,
		ProviderAddr, ReferenceOrigin, ReferenceTarget, VarAssignment,
	},
	state::{DiagnosticSource, ModuleArtifact, OpState},
	Engine, EngineBuilder,
};

const WAIT: Duration = Duration::from_secs(10);

fn test_engine(fs: Arc<MemFs>) -> Engine {
	EngineBuilder::new()
		.with_fs(fs)
		.high_parallelism(4)
		.build()
}

async fn wait_for(engine: &Engine, ids: &[gw_core::JobId]) {
	tokio::time::timeout(WAIT, engine.wait_for_jobs(ids))
		.await
		.expect("jobs did not finish in time");
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn open_document_runs_the_full_decode_pipeline() {
	let source = "core >=1.0\n\
	              provider aws >=3.0\n\
	              variable region\n\
	              ref var.region\n\
	              ref var.missing\n";

	let fs = Arc::new(MemFs::new());
	fs.add_file("/ws/mod/main.gwk", source);

	let engine = test_engine(fs);
	engine.start();

	let ids = engine
		.open_document("/ws/mod/main.gwk", "groundwork", source)
		.await;
	assert!(!ids.is_empty());
	wait_for(&engine, &ids).await;

	let record = engine.modules.record(Path::new("/ws/mod")).unwrap();
	assert_eq!(record.meta_state, OpState::Loaded);
	assert!(record.parsed_files.contains_key("main.gwk"));
	assert!(record
		.meta
		.provider_requirements
		.contains_key(&ProviderAddr::from_local_name("aws")));
	assert!(record.ref_targets.iter().any(|t| t.addr == "var.region"));
	assert!(record.ref_origins.iter().any(|o| o.addr == "var.missing"));

	// First-level decoding also validated references
	let ref_diags = &record.diagnostics[&DiagnosticSource::ReferenceValidation]["main.gwk"];
	assert_eq!(ref_diags.len(), 1);
	assert!(ref_diags[0].message.contains("var.missing"));

	engine.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn nested_local_modules_are_decoded_through_followups() {
	let fs = Arc::new(MemFs::new());
	fs.add_file("/ws/root/main.gwk", "provider aws >=3.0\nmodule vpc ./modules/vpc\n");
	fs.add_file("/ws/root/modules/vpc/main.gwk", "provider google >=4.0\n");

	let engine = test_engine(fs);
	engine.start();

	let ids = engine.discover("/ws/root").await;
	wait_for(&engine, &ids).await;

	// The nested module was added and decoded without a separate event for it
	let nested = engine
		.modules
		.record(Path::new("/ws/root/modules/vpc"))
		.unwrap();
	assert_eq!(nested.meta_state, OpState::Loaded);

	let reqs = engine
		.modules
		.provider_requirements_for_module(Path::new("/ws/root"))
		.unwrap();
	assert!(reqs.contains_key(&ProviderAddr::from_local_name("aws")));
	assert!(reqs.contains_key(&ProviderAddr::from_local_name("google")));

	engine.stop().await;
}

/// Delegates to [`GwkDecoder`] while counting parse invocations, to observe whether jobs
/// actually recomputed or skipped via their admission guard.
#[derive(Debug, Default)]
struct CountingDecoder {
	inner: GwkDecoder,
	parse_calls: AtomicUsize,
}

impl ConfigDecoder for CountingDecoder {
	fn parse(&self, filename: &str, source: &str) -> (ParsedFile, Vec<Diagnostic>) {
		self.parse_calls.fetch_add(1, Ordering::SeqCst);
		self.inner.parse(filename, source)
	}

	fn decode_metadata(&self, dir: &Path, files: &ModFiles) -> (ModuleMetadata, Vec<Diagnostic>) {
		self.inner.decode_metadata(dir, files)
	}

	fn reference_targets(&self, meta: &ModuleMetadata, files: &ModFiles) -> Vec<ReferenceTarget> {
		self.inner.reference_targets(meta, files)
	}

	fn reference_origins(&self, files: &ModFiles) -> Vec<ReferenceOrigin> {
		self.inner.reference_origins(files)
	}

	fn validate_schema(&self, meta: &ModuleMetadata, files: &ModFiles) -> FileDiags {
		self.inner.validate_schema(meta, files)
	}

	fn validate_references(
		&self,
		targets: &[ReferenceTarget],
		origins: &[ReferenceOrigin],
	) -> FileDiags {
		self.inner.validate_references(targets, origins)
	}

	fn decode_vars(&self, filename: &str, source: &str) -> (Vec<VarAssignment>, Vec<Diagnostic>) {
		self.inner.decode_vars(filename, source)
	}
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn duplicate_jobs_skip_while_edits_recompute() {
	let source = "variable region\n";
	let fs = Arc::new(MemFs::new());
	fs.add_file("/ws/mod/main.gwk", source);

	let decoder = Arc::new(CountingDecoder::default());
	let engine = EngineBuilder::new()
		.with_fs(fs)
		.with_decoder(decoder.clone())
		.high_parallelism(4)
		.build();
	engine.start();

	let ids = engine
		.open_document("/ws/mod/main.gwk", "groundwork", source)
		.await;
	wait_for(&engine, &ids).await;
	assert_eq!(decoder.parse_calls.load(Ordering::SeqCst), 1);

	// A second open of the same directory finds all artifacts computed; every job
	// reports StateNotChanged and the decoder is not consulted again
	let ids = engine
		.open_document("/ws/mod/main.gwk", "groundwork", source)
		.await;
	wait_for(&engine, &ids).await;
	assert_eq!(decoder.parse_calls.load(Ordering::SeqCst), 1);

	// An edit invalidates; the pipeline recomputes despite the recorded state
	let ids = engine
		.change_document(Path::new("/ws/mod/main.gwk"), "variable zone\n")
		.await;
	wait_for(&engine, &ids).await;
	assert_eq!(decoder.parse_calls.load(Ordering::SeqCst), 2);

	let record = engine.modules.record(Path::new("/ws/mod")).unwrap();
	assert!(record.meta.variables.contains_key("zone"));

	engine.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn cyclic_module_calls_fail_schema_preload_but_complete() {
	let fs = Arc::new(MemFs::new());
	fs.add_file("/ws/a/main.gwk", "module b ../b\n");
	fs.add_file("/ws/b/main.gwk", "module a ../a\n");

	let engine = test_engine(fs);
	engine.start();

	let ids = engine.discover("/ws/a").await;
	wait_for(&engine, &ids).await;

	// The nesting bound turned the cycle into a job error, not a hang: the schema
	// preload artifact still reached completion
	let record = engine.modules.record(Path::new("/ws/a")).unwrap();
	assert_eq!(record.preload_embedded_schema_state, OpState::Loaded);
	assert!(engine.modules.exists(Path::new("/ws/b")));

	engine.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn watched_deletion_drops_the_module() {
	let fs = Arc::new(MemFs::new());
	fs.add_file("/ws/mod/main.gwk", "variable region\n");

	let engine = test_engine(Arc::clone(&fs));
	engine.start();

	let ids = engine.discover("/ws/mod").await;
	wait_for(&engine, &ids).await;
	assert!(engine.modules.exists(Path::new("/ws/mod")));

	fs.remove_file(Path::new("/ws/mod/main.gwk"));
	let ids = engine
		.watched_change("/ws/mod", FileChangeType::Deleted)
		.await;
	wait_for(&engine, &ids).await;

	assert!(!engine.modules.exists(Path::new("/ws/mod")));

	engine.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn change_batch_reports_what_the_pipeline_produced() {
	let source = "provider aws >=3.0\nref var.missing\n";
	let fs = Arc::new(MemFs::new());
	fs.add_file("/ws/mod/main.gwk", source);

	let engine = test_engine(fs);
	engine.start();

	let ids = engine
		.open_document("/ws/mod/main.gwk", "groundwork", source)
		.await;
	wait_for(&engine, &ids).await;

	let batch = tokio::time::timeout(WAIT, engine.next_change_batch())
		.await
		.expect("no change batch released");
	assert_eq!(batch.dir.path(), Path::new("/ws/mod"));
	assert!(batch.is_dir_open);
	assert!(batch.changes.provider_requirements);
	assert!(batch.changes.diagnostics);
	assert!(batch.changes.reference_origins);

	engine.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn registry_lookups_cache_hits_and_tolerate_failures() {
	let fs = Arc::new(MemFs::new());
	fs.add_file(
		"/ws/mod/main.gwk",
		"module vpc acme/vpc 1.0.0\nmodule gone acme/missing\n",
	);

	let registry = Arc::new(StaticRegistryClient::new());
	registry.insert(
		"acme/vpc",
		RegistryModuleData {
			versions: vec!["1.0.0".into()],
			inputs: vec!["cidr".into()],
			outputs: vec!["vpc_id".into()],
		},
	);

	let engine = EngineBuilder::new()
		.with_fs(fs)
		.with_registry_client(registry)
		.high_parallelism(4)
		.build();
	engine.start();

	let ids = engine.discover("/ws/mod").await;
	wait_for(&engine, &ids).await;

	// The failed lookup did not prevent the successful one from being cached
	assert!(engine.registry.exists("acme/vpc"));
	assert!(!engine.registry.exists("acme/missing"));
	assert_eq!(engine.registry.get("acme/vpc").unwrap().inputs, vec!["cidr"]);

	engine.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn root_module_artifacts_are_indexed_and_installed_modules_decoded() {
	let fs = Arc::new(MemFs::new());
	fs.add_file("/ws/root/main.gwk", "module consul hashicorp/consul 0.11.0\n");
	fs.add_file(
		"/ws/root/.groundwork.lock.json",
		r#"{"providers": {"registry.groundwork.io/providers/aws": "3.2.1"}}"#,
	);
	fs.add_file(
		"/ws/root/.groundwork/modules/manifest.json",
		r#"{"modules": [
			{"key": "consul", "source": "hashicorp/consul", "version": "0.11.0",
			 "dir": ".groundwork/modules/consul"}
		]}"#,
	);
	fs.add_file(
		"/ws/root/.groundwork/modules/consul/main.gwk",
		"variable datacenter\n",
	);

	let engine = test_engine(fs);
	engine.start();

	let ids = engine.discover("/ws/root").await;
	wait_for(&engine, &ids).await;

	let root = engine.roots.record(Path::new("/ws/root")).unwrap();
	assert_eq!(root.mod_manifest_state, OpState::Loaded);
	assert_eq!(
		root.installed_providers
			.get(&ProviderAddr::new("registry.groundwork.io/providers/aws"))
			.map(String::as_str),
		Some("3.2.1")
	);

	// The manifest's followups decoded the installed module
	let installed = engine
		.modules
		.record(Path::new("/ws/root/.groundwork/modules/consul"))
		.unwrap();
	assert_eq!(installed.meta_state, OpState::Loaded);
	assert!(installed.meta.variables.contains_key("datacenter"));

	engine.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn lock_file_change_refreshes_installed_providers() {
	let fs = Arc::new(MemFs::new());
	fs.add_file("/ws/root/main.gwk", "provider aws >=3.0\n");
	fs.add_file(
		"/ws/root/.groundwork.lock.json",
		r#"{"providers": {"registry.groundwork.io/providers/aws": "3.0.0"}}"#,
	);

	let engine = test_engine(Arc::clone(&fs));
	engine.start();

	let ids = engine.discover("/ws/root").await;
	wait_for(&engine, &ids).await;

	fs.add_file(
		"/ws/root/.groundwork.lock.json",
		r#"{"providers": {"registry.groundwork.io/providers/aws": "3.2.1"}}"#,
	);
	let ids = engine
		.watched_change("/ws/root/.groundwork.lock.json", FileChangeType::Changed)
		.await;
	wait_for(&engine, &ids).await;

	let root = engine.roots.record(Path::new("/ws/root")).unwrap();
	assert_eq!(
		root.installed_providers
			.get(&ProviderAddr::new("registry.groundwork.io/providers/aws"))
			.map(String::as_str),
		Some("3.2.1")
	);

	engine.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn non_configuration_documents_schedule_no_work() {
	let fs = Arc::new(MemFs::new());
	fs.add_file("/ws/notes/readme.md", "# notes\n");

	let engine = test_engine(fs);
	engine.start();

	let ids = engine
		.open_document("/ws/notes/readme.md", "markdown", "# notes\n")
		.await;
	assert!(ids.is_empty());

	assert!(!engine.modules.exists(Path::new("/ws/notes")));
	assert!(!engine.roots.exists(Path::new("/ws/notes")));

	engine.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn unreadable_directory_still_completes_parsing() {
	// Nothing on disk for the opened document's directory, so listing it fails
	let fs = Arc::new(MemFs::new());

	let engine = test_engine(fs);
	engine.start();

	let ids = engine
		.open_document("/ws/ghost/main.gwk", "groundwork", "variable region\n")
		.await;
	assert!(!ids.is_empty());
	wait_for(&engine, &ids).await;

	// The failure is recorded on the module instead of leaving the artifact loading
	let record = engine.modules.record(Path::new("/ws/ghost")).unwrap();
	assert_eq!(
		record.artifact_state(ModuleArtifact::Diagnostics(DiagnosticSource::Parsing)),
		OpState::Loaded
	);
	assert!(record.parsing_err.is_some());
	assert_eq!(record.meta_state, OpState::Loaded);

	engine.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn vars_files_are_checked_against_declared_variables() {
	let fs = Arc::new(MemFs::new());
	fs.add_file("/ws/mod/main.gwk", "variable region\n");
	fs.add_file("/ws/mod/prod.gwkvars", "region us-east-1\nzone us-east-1a\n");

	let engine = test_engine(fs);
	engine.start();

	let ids = engine
		.open_document(
			"/ws/mod/prod.gwkvars",
			"groundwork-vars",
			"region us-east-1\nzone us-east-1a\n",
		)
		.await;
	assert!(!ids.is_empty());
	wait_for(&engine, &ids).await;

	let record = engine.modules.record(Path::new("/ws/mod")).unwrap();
	assert_eq!(
		record.artifact_state(ModuleArtifact::Diagnostics(
			DiagnosticSource::VariablesValidation
		)),
		OpState::Loaded
	);

	// `region` is declared in main.gwk, `zone` is not
	let diags = &record.diagnostics[&DiagnosticSource::VariablesValidation]["prod.gwkvars"];
	assert_eq!(diags.len(), 1);
	assert_eq!(diags[0].line, 2);
	assert!(diags[0].message.contains("zone"));

	engine.stop().await;
}
