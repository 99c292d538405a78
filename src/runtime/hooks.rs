//! Resolver-side collaborator seams: configuration parsing, credential
//! acquisition, and external-dependency confirmation.

use std::path::Path;

use anyhow::Result;

use crate::runtime::options::UnitOptions;
use crate::unit::{Unit, UnitConfig};

/// Parses unit configuration files.
///
/// `partial_parse` decodes only the blocks the resolver needs (source,
/// dependencies, error handling, exclude, read-files, includes); `parse` is
/// the full decode performed right before the backend is invoked, so late
/// interpolation happens as close to execution as possible.
pub trait ConfigParser: Send + Sync + 'static {
    fn partial_parse(&self, path: &Path) -> Result<UnitConfig>;

    fn parse(&self, path: &Path) -> Result<UnitConfig> {
        self.partial_parse(path)
    }
}

/// Acquires credentials for a unit before its config is parsed. Failure
/// propagates as a resolution error.
pub trait CredentialSource: Send + Sync + 'static {
    fn acquire(&self, options: &UnitOptions) -> Result<()>;
}

/// No-op credential source; the default when none is injected.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCredentials;

impl CredentialSource for NoCredentials {
    fn acquire(&self, _options: &UnitOptions) -> Result<()> {
        Ok(())
    }
}

/// Decides whether an external dependency should actually be applied.
///
/// Returning `false` marks the unit as assume-already-applied: it is kept in
/// the graph but never executed. Runs on the resolver thread and may block on
/// user input.
pub trait ExternalConfirmation: Send + Sync + 'static {
    fn confirm(&self, unit: &Unit) -> bool;
}

/// Adapter turning a closure into an [`ExternalConfirmation`].
pub struct ConfirmFn<F>(pub F);

impl<F> ExternalConfirmation for ConfirmFn<F>
where
    F: Fn(&Unit) -> bool + Send + Sync + 'static,
{
    fn confirm(&self, unit: &Unit) -> bool {
        (self.0)(unit)
    }
}

/// Declines every external dependency; the default when none is injected.
#[derive(Debug, Default, Clone, Copy)]
pub struct AssumeAllApplied;

impl ExternalConfirmation for AssumeAllApplied {
    fn confirm(&self, _unit: &Unit) -> bool {
        false
    }
}
