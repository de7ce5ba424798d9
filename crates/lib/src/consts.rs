//! Constants shared across the crate.

/// Length of the truncated hex digest used for component hashes.
pub const OBJ_HASH_PREFIX_LEN: usize = 20;

/// Name of the generated Terraform file in every deployment unit directory.
pub const SITE_FILENAME: &str = "site.tf";

/// Name of the per-site lock file.
pub const LOCK_FILENAME: &str = "sitegen.lock";

/// Name of the plan artifact written by `terraform plan -out`.
pub const PLAN_FILENAME: &str = "terraform.plan";

/// Version of this tool, recorded in lock files and fingerprints.
pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// First line of every generated file.
pub const GENERATED_HEADER: &str = "# This file is auto-generated by sitegen";
