//! The variable definitions validation job.

use std::{collections::BTreeSet, fmt, sync::Arc};

use gw_task_system::{ExecStatus, WorkContext};
use tracing::warn;

use crate::{
	lang::{is_vars_filename, Diagnostic, FileDiags, Severity},
	state::{DiagnosticSource, ModuleArtifact, OpState, StateError},
	work::{OpType, WorkError},
};

use super::VariablesFeature;

pub struct VariablesWork {
	feature: Arc<VariablesFeature>,
}

impl fmt::Debug for VariablesWork {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("VariablesWork").finish_non_exhaustive()
	}
}

impl VariablesWork {
	pub(crate) fn new(feature: Arc<VariablesFeature>) -> Self {
		Self { feature }
	}

	pub(crate) fn op_type(&self) -> OpType {
		OpType::ValidateVariables
	}

	/// Checks every assignment in the module's variable definition files against the
	/// declared variables, blocking until the metadata naming them is loaded.
	pub(crate) async fn run(&self, ctx: &WorkContext) -> Result<ExecStatus, WorkError> {
		let path = ctx.dir().path();
		let store = &self.feature.modules.store;
		let artifact = ModuleArtifact::Diagnostics(DiagnosticSource::VariablesValidation);

		if !store.begin_artifact(path, artifact, ctx.ignore_state())? {
			return Ok(ExecStatus::StateNotChanged);
		}

		let meta = loop {
			tokio::select! {
				() = ctx.cancelled() => {
					// Release the claim so a later run can pick the artifact up again
					store.set_artifact_state(path, artifact, OpState::Unknown)?;
					return Ok(ExecStatus::StateNotChanged);
				}
				() = store.await_metadata_loaded(path) => {}
			}

			// A concurrent re-decode may have reclaimed the metadata in between
			match store.local_module_meta(path) {
				Ok(meta) => break meta,
				Err(StateError::MetadataNotLoaded { .. }) => {}
				Err(err) => return Err(err.into()),
			}
		};

		// Files on disk plus open-but-unsaved buffers in the same directory
		let mut filenames = BTreeSet::new();
		match self.feature.fs.read_dir(path) {
			Ok(entries) => {
				for entry in entries {
					if !entry.is_dir && is_vars_filename(&entry.name) {
						filenames.insert(entry.name);
					}
				}
			}
			Err(err) => {
				warn!(dir = %ctx.dir(), "failed to list variable definition files: {err}");
			}
		}
		for doc in self.feature.documents.open_documents_in(ctx.dir()) {
			if let Some(name) = doc.path.file_name().map(|n| n.to_string_lossy().into_owned()) {
				if is_vars_filename(&name) {
					filenames.insert(name);
				}
			}
		}

		let mut diags = FileDiags::new();
		for filename in filenames {
			let file_path = path.join(&filename);

			// The editor buffer wins over whatever is on disk
			let source = match self.feature.documents.get(&file_path) {
				Some(doc) => doc.text,
				None => match self.feature.fs.read_to_string(&file_path) {
					Ok(source) => source,
					Err(err) => {
						warn!(file = %file_path.display(), "failed to read variable file: {err}");
						continue;
					}
				},
			};

			let (assignments, mut file_diags) =
				self.feature.decoder.decode_vars(&filename, &source);
			for assignment in assignments {
				if !meta.variables.contains_key(&assignment.name) {
					file_diags.push(Diagnostic {
						severity: Severity::Error,
						filename: filename.clone(),
						line: assignment.line,
						message: format!("value for undeclared variable {:?}", assignment.name),
					});
				}
			}
			if !file_diags.is_empty() {
				diags.insert(filename, file_diags);
			}
		}

		store.update_diagnostics(path, DiagnosticSource::VariablesValidation, diags)?;
		Ok(ExecStatus::Done)
	}
}
