//! The single work payload type executed by the job system.
//!
//! Every background computation of every feature is one variant-tag pair here, so the
//! scheduler stays monomorphic and `(dir, OpType)` identifies a computation globally.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use gw_task_system::{ExecStatus, FollowupGraph, Work, WorkContext};

use crate::{
	clients::{RegistryError, SchemaError},
	features::{modules::ModuleWork, root_modules::RootWork, variables::VariablesWork},
	lang::MetadataDecodeError,
	state::StateError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpType {
	ParseConfiguration,
	LoadMetadata,
	PreloadEmbeddedSchema,
	DecodeReferenceTargets,
	DecodeReferenceOrigins,
	SchemaValidation,
	ReferenceValidation,
	ValidateVariables,
	GetRegistryData,
	ParseModuleManifest,
	GetInstalledProviders,
}

#[derive(Debug, Error)]
pub enum WorkError {
	#[error(transparent)]
	State(#[from] StateError),
	#[error(transparent)]
	Io(#[from] std::io::Error),
	#[error(transparent)]
	MetadataDecode(#[from] MetadataDecodeError),
	#[error(transparent)]
	Schema(#[from] SchemaError),
	#[error("{} registry lookup(s) failed", errors.len())]
	Registry { errors: Vec<RegistryError> },
	#[error("failed to parse module manifest: {0}")]
	ManifestParse(Arc<serde_json::Error>),
	#[error("failed to parse provider lock file: {0}")]
	LockFileParse(Arc<serde_json::Error>),
}

#[derive(Debug)]
pub enum CoreWork {
	Module(ModuleWork),
	Root(RootWork),
	Variables(VariablesWork),
}

#[async_trait]
impl Work for CoreWork {
	type Op = OpType;
	type Error = WorkError;

	fn op(&self) -> OpType {
		match self {
			Self::Module(work) => work.op_type(),
			Self::Root(work) => work.op_type(),
			Self::Variables(work) => work.op_type(),
		}
	}

	async fn run(&self, ctx: &WorkContext) -> Result<ExecStatus, WorkError> {
		match self {
			Self::Module(work) => work.run(ctx).await,
			Self::Root(work) => work.run(ctx).await,
			Self::Variables(work) => work.run(ctx).await,
		}
	}

	fn followups(
		&self,
		ctx: &WorkContext,
		result: &Result<ExecStatus, WorkError>,
	) -> FollowupGraph<Self> {
		match self {
			Self::Module(work) => work.followups(ctx, result),
			Self::Root(work) => work.followups(ctx, result),
			Self::Variables(_) => FollowupGraph::default(),
		}
	}
}
