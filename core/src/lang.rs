//! The Groundwork configuration language surface the engine analyzes.
//!
//! The engine itself is decoder-agnostic: everything language specific sits behind
//! [`ConfigDecoder`]. The built-in [`GwkDecoder`] understands the line-directive syntax of
//! `.gwk` files, which is enough for module metadata, references and validation.

use std::{
	collections::BTreeMap,
	fmt,
	path::{Path, PathBuf},
	sync::Arc,
};

use serde::Serialize;
use thiserror::Error;

pub const FILE_EXT: &str = ".gwk";
pub const VARS_FILE_EXT: &str = ".gwkvars";

/// Language id editors report for configuration documents.
pub const LANGUAGE_ID: &str = "groundwork";
/// Language id editors report for variable definition documents.
pub const VARS_LANGUAGE_ID: &str = "groundwork-vars";

/// Whether a directory entry name is a configuration file the engine should index.
/// Hidden files are ignored, as editors and tools drop temp files next to real ones.
#[must_use]
pub fn is_config_filename(name: &str) -> bool {
	name.ends_with(FILE_EXT) && !name.starts_with('.')
}

/// Whether a directory entry name is a variable definitions file.
#[must_use]
pub fn is_vars_filename(name: &str) -> bool {
	name.ends_with(VARS_FILE_EXT) && !name.starts_with('.')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Severity {
	Error,
	Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
	pub severity: Severity,
	pub filename: String,
	/// 1-based line the diagnostic points at.
	pub line: usize,
	pub message: String,
}

/// Diagnostics grouped by filename.
pub type FileDiags = BTreeMap<String, Vec<Diagnostic>>;

/// Parsed files of one module directory, keyed by filename.
pub type ModFiles = BTreeMap<String, Arc<ParsedFile>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
	CoreRequirement {
		constraint: String,
	},
	Backend {
		backend_type: String,
	},
	Provider {
		local_name: String,
		constraint: Option<String>,
	},
	Variable {
		name: String,
	},
	Output {
		name: String,
	},
	ModuleCall {
		name: String,
		source: String,
		version: Option<String>,
	},
	Ref {
		addr: String,
	},
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFile {
	pub filename: String,
	/// Directives with their 1-based line numbers, in file order.
	pub directives: Vec<(usize, Directive)>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct VersionConstraint(String);

impl VersionConstraint {
	pub fn new(raw: impl Into<String>) -> Self {
		Self(raw.into())
	}

	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for VersionConstraint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Fully qualified provider address, e.g. `registry.groundwork.io/providers/aws`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProviderAddr(String);

pub const DEFAULT_PROVIDER_REGISTRY: &str = "registry.groundwork.io/providers";

impl ProviderAddr {
	pub fn new(raw: impl Into<String>) -> Self {
		Self(raw.into())
	}

	/// Resolves a bare local name (`aws`) against the default registry.
	#[must_use]
	pub fn from_local_name(name: &str) -> Self {
		if name.contains('/') {
			Self(name.to_string())
		} else {
			Self(format!("{DEFAULT_PROVIDER_REGISTRY}/{name}"))
		}
	}

	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for ProviderAddr {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Providers a module (tree) requires, with every constraint declared for each.
pub type ProviderRequirements = BTreeMap<ProviderAddr, Vec<VersionConstraint>>;

/// Where a module call points to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceAddr {
	/// Relative path into the same workspace, e.g. `./modules/vpc`.
	Local(PathBuf),
	/// Registry namespace/name, resolved through a module registry.
	Registry(String),
	/// Anything else (git, http archives); opaque to the engine.
	Remote(String),
}

impl SourceAddr {
	#[must_use]
	pub fn parse(raw: &str) -> Self {
		if raw.starts_with("./") || raw.starts_with("../") {
			Self::Local(PathBuf::from(raw))
		} else if raw.contains("://") || raw.starts_with("git@") {
			Self::Remote(raw.to_string())
		} else {
			Self::Registry(raw.to_string())
		}
	}
}

impl fmt::Display for SourceAddr {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Local(path) => write!(f, "{}", path.display()),
			Self::Registry(addr) | Self::Remote(addr) => f.write_str(addr),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredModuleCall {
	pub local_name: String,
	pub source: SourceAddr,
	pub version: Option<VersionConstraint>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
	pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
	pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
	pub backend_type: String,
}

/// Everything the engine knows about a module directory after metadata decoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleMetadata {
	pub core_requirements: Vec<VersionConstraint>,
	pub backend: Option<Backend>,
	pub provider_requirements: ProviderRequirements,
	/// Local provider name to fully qualified address.
	pub provider_references: BTreeMap<String, ProviderAddr>,
	pub variables: BTreeMap<String, Variable>,
	pub outputs: BTreeMap<String, Output>,
	pub module_calls: BTreeMap<String, DeclaredModuleCall>,
	pub filenames: Vec<String>,
}

/// An addressable symbol a reference can point at, e.g. `var.region`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceTarget {
	pub addr: String,
	pub filename: String,
	pub line: usize,
}

/// A use of an address somewhere in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceOrigin {
	pub addr: String,
	pub filename: String,
	pub line: usize,
}

#[derive(Debug, Clone, Error)]
#[error("metadata decoding raised {count} error diagnostic(s)")]
pub struct MetadataDecodeError {
	pub count: usize,
}

/// One `name value` assignment in a variable definitions file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarAssignment {
	pub name: String,
	/// 1-based line of the assignment.
	pub line: usize,
}

/// Language-specific analysis the engine delegates to.
pub trait ConfigDecoder: fmt::Debug + Send + Sync + 'static {
	fn parse(&self, filename: &str, source: &str) -> (ParsedFile, Vec<Diagnostic>);

	fn decode_metadata(&self, dir: &Path, files: &ModFiles) -> (ModuleMetadata, Vec<Diagnostic>);

	fn reference_targets(&self, meta: &ModuleMetadata, files: &ModFiles) -> Vec<ReferenceTarget>;

	fn reference_origins(&self, files: &ModFiles) -> Vec<ReferenceOrigin>;

	fn validate_schema(&self, meta: &ModuleMetadata, files: &ModFiles) -> FileDiags;

	fn validate_references(
		&self,
		targets: &[ReferenceTarget],
		origins: &[ReferenceOrigin],
	) -> FileDiags;

	fn decode_vars(&self, filename: &str, source: &str) -> (Vec<VarAssignment>, Vec<Diagnostic>);
}

/// Decoder for the `.gwk` line-directive syntax.
#[derive(Debug, Default, Clone, Copy)]
pub struct GwkDecoder;

impl GwkDecoder {
	fn parse_line(filename: &str, line_no: usize, line: &str) -> Result<Option<Directive>, Diagnostic> {
		let mut tokens = line.split_whitespace();
		let Some(keyword) = tokens.next() else {
			return Ok(None);
		};
		if keyword.starts_with('#') {
			return Ok(None);
		}

		let err = |message: String| Diagnostic {
			severity: Severity::Error,
			filename: filename.to_string(),
			line: line_no,
			message,
		};

		let directive = match keyword {
			"core" => {
				let constraint = tokens.collect::<Vec<_>>().join(" ");
				if constraint.is_empty() {
					return Err(err("`core` requires a version constraint".into()));
				}
				Directive::CoreRequirement { constraint }
			}
			"backend" => {
				let backend_type = tokens
					.next()
					.ok_or_else(|| err("`backend` requires a type".into()))?;
				Directive::Backend {
					backend_type: backend_type.to_string(),
				}
			}
			"provider" => {
				let local_name = tokens
					.next()
					.ok_or_else(|| err("`provider` requires a name".into()))?;
				let constraint = tokens.collect::<Vec<_>>().join(" ");
				Directive::Provider {
					local_name: local_name.to_string(),
					constraint: (!constraint.is_empty()).then_some(constraint),
				}
			}
			"variable" => {
				let name = tokens
					.next()
					.ok_or_else(|| err("`variable` requires a name".into()))?;
				Directive::Variable {
					name: name.to_string(),
				}
			}
			"output" => {
				let name = tokens
					.next()
					.ok_or_else(|| err("`output` requires a name".into()))?;
				Directive::Output {
					name: name.to_string(),
				}
			}
			"module" => {
				let name = tokens
					.next()
					.ok_or_else(|| err("`module` requires a name".into()))?;
				let source = tokens
					.next()
					.ok_or_else(|| err(format!("module {name:?} requires a source")))?;
				Directive::ModuleCall {
					name: name.to_string(),
					source: source.to_string(),
					version: tokens.next().map(ToString::to_string),
				}
			}
			"ref" => {
				let addr = tokens
					.next()
					.ok_or_else(|| err("`ref` requires an address".into()))?;
				Directive::Ref {
					addr: addr.to_string(),
				}
			}
			other => return Err(err(format!("unknown directive {other:?}"))),
		};

		Ok(Some(directive))
	}
}

impl ConfigDecoder for GwkDecoder {
	fn parse(&self, filename: &str, source: &str) -> (ParsedFile, Vec<Diagnostic>) {
		let mut directives = Vec::new();
		let mut diags = Vec::new();

		for (idx, line) in source.lines().enumerate() {
			let line_no = idx + 1;
			match Self::parse_line(filename, line_no, line) {
				Ok(Some(directive)) => directives.push((line_no, directive)),
				Ok(None) => {}
				Err(diag) => diags.push(diag),
			}
		}

		(
			ParsedFile {
				filename: filename.to_string(),
				directives,
			},
			diags,
		)
	}

	fn decode_metadata(&self, _dir: &Path, files: &ModFiles) -> (ModuleMetadata, Vec<Diagnostic>) {
		let mut meta = ModuleMetadata {
			filenames: files.keys().cloned().collect(),
			..ModuleMetadata::default()
		};
		let mut diags = Vec::new();

		for file in files.values() {
			for (line, directive) in &file.directives {
				match directive {
					Directive::CoreRequirement { constraint } => {
						meta.core_requirements
							.push(VersionConstraint::new(constraint.clone()));
					}
					Directive::Backend { backend_type } => {
						if meta.backend.is_some() {
							diags.push(Diagnostic {
								severity: Severity::Error,
								filename: file.filename.clone(),
								line: *line,
								message: "duplicate backend declaration".into(),
							});
						}
						meta.backend = Some(Backend {
							backend_type: backend_type.clone(),
						});
					}
					Directive::Provider {
						local_name,
						constraint,
					} => {
						let addr = ProviderAddr::from_local_name(local_name);
						let constraints =
							meta.provider_requirements.entry(addr.clone()).or_default();
						if let Some(constraint) = constraint {
							let constraint = VersionConstraint::new(constraint.clone());
							if !constraints.contains(&constraint) {
								constraints.push(constraint);
							}
						}
						meta.provider_references.insert(local_name.clone(), addr);
					}
					Directive::Variable { name } => {
						meta.variables
							.insert(name.clone(), Variable { name: name.clone() });
					}
					Directive::Output { name } => {
						meta.outputs
							.insert(name.clone(), Output { name: name.clone() });
					}
					Directive::ModuleCall {
						name,
						source,
						version,
					} => {
						meta.module_calls.insert(
							name.clone(),
							DeclaredModuleCall {
								local_name: name.clone(),
								source: SourceAddr::parse(source),
								version: version.clone().map(VersionConstraint::new),
							},
						);
					}
					Directive::Ref { .. } => {}
				}
			}
		}

		(meta, diags)
	}

	fn reference_targets(&self, _meta: &ModuleMetadata, files: &ModFiles) -> Vec<ReferenceTarget> {
		let mut targets = Vec::new();
		for file in files.values() {
			for (line, directive) in &file.directives {
				let addr = match directive {
					Directive::Variable { name } => format!("var.{name}"),
					Directive::Output { name } => format!("output.{name}"),
					_ => continue,
				};
				targets.push(ReferenceTarget {
					addr,
					filename: file.filename.clone(),
					line: *line,
				});
			}
		}
		targets
	}

	fn reference_origins(&self, files: &ModFiles) -> Vec<ReferenceOrigin> {
		let mut origins = Vec::new();
		for file in files.values() {
			for (line, directive) in &file.directives {
				if let Directive::Ref { addr } = directive {
					origins.push(ReferenceOrigin {
						addr: addr.clone(),
						filename: file.filename.clone(),
						line: *line,
					});
				}
			}
		}
		origins
	}

	fn validate_schema(&self, meta: &ModuleMetadata, files: &ModFiles) -> FileDiags {
		let mut diags = FileDiags::new();

		for file in files.values() {
			for (line, directive) in &file.directives {
				match directive {
					Directive::Provider {
						local_name,
						constraint: None,
					} => {
						diags.entry(file.filename.clone()).or_default().push(Diagnostic {
							severity: Severity::Warning,
							filename: file.filename.clone(),
							line: *line,
							message: format!(
								"provider {local_name:?} has no version constraint"
							),
						});
					}
					Directive::ModuleCall { name, version: None, .. }
						if matches!(
							meta.module_calls.get(name).map(|mc| &mc.source),
							Some(SourceAddr::Registry(_))
						) =>
					{
						diags.entry(file.filename.clone()).or_default().push(Diagnostic {
							severity: Severity::Warning,
							filename: file.filename.clone(),
							line: *line,
							message: format!(
								"registry module {name:?} has no version constraint"
							),
						});
					}
					_ => {}
				}
			}
		}

		diags
	}

	fn validate_references(
		&self,
		targets: &[ReferenceTarget],
		origins: &[ReferenceOrigin],
	) -> FileDiags {
		let known = targets
			.iter()
			.map(|t| t.addr.as_str())
			.collect::<std::collections::BTreeSet<_>>();

		let mut diags = FileDiags::new();
		for origin in origins {
			// Only addresses the engine can resolve locally are validated
			let resolvable = origin.addr.starts_with("var.") || origin.addr.starts_with("output.");
			if resolvable && !known.contains(origin.addr.as_str()) {
				diags.entry(origin.filename.clone()).or_default().push(Diagnostic {
					severity: Severity::Error,
					filename: origin.filename.clone(),
					line: origin.line,
					message: format!("reference to undeclared address {:?}", origin.addr),
				});
			}
		}
		diags
	}

	fn decode_vars(&self, filename: &str, source: &str) -> (Vec<VarAssignment>, Vec<Diagnostic>) {
		let mut assignments = Vec::new();
		let mut diags = Vec::new();

		for (idx, line) in source.lines().enumerate() {
			let line_no = idx + 1;
			let mut tokens = line.split_whitespace();
			let Some(name) = tokens.next() else {
				continue;
			};
			if name.starts_with('#') {
				continue;
			}
			if tokens.next().is_none() {
				diags.push(Diagnostic {
					severity: Severity::Error,
					filename: filename.to_string(),
					line: line_no,
					message: format!("variable {name:?} is assigned no value"),
				});
				continue;
			}
			assignments.push(VarAssignment {
				name: name.to_string(),
				line: line_no,
			});
		}

		(assignments, diags)
	}
}
